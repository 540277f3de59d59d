//! Import resolvers: the interfaces shipped with the compiler and a
//! directory lookup for the command line.

use std::path::PathBuf;

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::typecheck::{ImportResolver, ImportSource};

/// Serves `vyper.interfaces.*`.
#[derive(Clone, Copy, Debug, Default)]
pub struct BuiltinInterfaces;

fn param(name: &str, typ: &str) -> Value {
    json!({ "name": name, "type": typ })
}

fn function(name: &str, inputs: &[(&str, &str)], output: Option<&str>, mutability: &str) -> Value {
    let inputs: Vec<Value> = inputs.iter().map(|(n, t)| param(n, t)).collect();
    let outputs: Vec<Value> = output.into_iter().map(|t| param("", t)).collect();
    json!({
        "type": "function",
        "name": name,
        "inputs": inputs,
        "outputs": outputs,
        "stateMutability": mutability,
    })
}

fn erc20() -> Value {
    Value::Array(vec![
        function("totalSupply", &[], Some("uint256"), "view"),
        function("balanceOf", &[("_owner", "address")], Some("uint256"), "view"),
        function("allowance", &[("_owner", "address"), ("_spender", "address")], Some("uint256"), "view"),
        function("transfer", &[("_to", "address"), ("_value", "uint256")], Some("bool"), "nonpayable"),
        function(
            "transferFrom",
            &[("_from", "address"), ("_to", "address"), ("_value", "uint256")],
            Some("bool"),
            "nonpayable",
        ),
        function("approve", &[("_spender", "address"), ("_value", "uint256")], Some("bool"), "nonpayable"),
    ])
}

fn erc721() -> Value {
    Value::Array(vec![
        function("balanceOf", &[("_owner", "address")], Some("uint256"), "view"),
        function("ownerOf", &[("_tokenId", "uint256")], Some("address"), "view"),
        function("getApproved", &[("_tokenId", "uint256")], Some("address"), "view"),
        function(
            "isApprovedForAll",
            &[("_owner", "address"), ("_operator", "address")],
            Some("bool"),
            "view",
        ),
        function(
            "transferFrom",
            &[("_from", "address"), ("_to", "address"), ("_tokenId", "uint256")],
            None,
            "payable",
        ),
        function("approve", &[("_approved", "address"), ("_tokenId", "uint256")], None, "payable"),
        function(
            "setApprovalForAll",
            &[("_operator", "address"), ("_approved", "bool")],
            None,
            "nonpayable",
        ),
    ])
}

impl ImportResolver for BuiltinInterfaces {
    fn resolve(&self, path: &str) -> Option<ImportSource> {
        match path {
            "vyper.interfaces.ERC20" => Some(ImportSource::AbiJson(erc20())),
            "vyper.interfaces.ERC721" => Some(ImportSource::AbiJson(erc721())),
            _ => None,
        }
    }
}

/// Looks up `a.b.C` as `<root>/a/b/C.vy`, then `<root>/a/b/C.json`, in
/// every root in order.
#[derive(Clone, Debug, Default)]
pub struct DirectoryResolver {
    roots: Vec<PathBuf>,
}

impl DirectoryResolver {
    pub fn new(roots: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            roots: roots.into_iter().collect(),
        }
    }
}

impl ImportResolver for DirectoryResolver {
    fn resolve(&self, path: &str) -> Option<ImportSource> {
        let relative: PathBuf = path.trim_start_matches('.').split('.').collect();
        for root in &self.roots {
            let base = root.join(&relative);
            let source = base.with_extension("vy");
            if let Ok(code) = std::fs::read_to_string(&source) {
                debug!(path, file = %source.display(), "import resolved to source");
                return Some(ImportSource::Source(code));
            }
            let abi = base.with_extension("json");
            if let Ok(text) = std::fs::read_to_string(&abi) {
                match serde_json::from_str(&text) {
                    Ok(value) => return Some(ImportSource::AbiJson(value)),
                    Err(err) => warn!(file = %abi.display(), %err, "ignoring malformed ABI file"),
                }
            }
        }
        None
    }
}

/// Tries each resolver in turn.
#[derive(Default)]
pub struct ResolverChain {
    resolvers: Vec<Box<dyn ImportResolver>>,
}

impl ResolverChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, resolver: impl ImportResolver + 'static) -> Self {
        self.resolvers.push(Box::new(resolver));
        self
    }
}

impl ImportResolver for ResolverChain {
    fn resolve(&self, path: &str) -> Option<ImportSource> {
        self.resolvers.iter().find_map(|r| r.resolve(path))
    }
}
