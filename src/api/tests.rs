use num_bigint::BigInt;
use num_traits::One;

use super::*;
use crate::diagnostic::ErrorKind;
use crate::ir::{optimize, parse_ir};
use crate::typecheck::function::method_id;
use crate::typecheck::{ImportSource, LayoutEntry, Mutability, Type};

fn compile_ok(source: &str, options: &CompileOptions) -> CompilerOutput {
    match compile_code(source, options) {
        Ok(output) => output,
        Err(diags) => panic!("unexpected errors: {:#?}", diags),
    }
}

fn first_error(source: &str) -> crate::diagnostic::Diagnostic {
    match compile_code(source, &CompileOptions::default()) {
        Ok(_) => panic!("expected an error for:\n{}", source),
        Err(diags) => diags[0].clone(),
    }
}

#[test]
fn increment_returns_clamped_int128() {
    let output = compile_ok(
        "@external\ndef foo(x: int128) -> int128:\n    return x + 1\n",
        &CompileOptions::unoptimized(),
    );
    let contract = &output.analysis.contract;
    let externals: Vec<_> = contract.functions.values().filter(|f| f.is_external()).collect();
    assert_eq!(externals.len(), 1);
    let foo = externals[0];
    assert_eq!(foo.name, "foo");
    assert_eq!(foo.args, vec![("x".to_string(), Type::int128())]);
    assert_eq!(foo.return_type, Some(Type::int128()));
    assert_eq!(foo.mutability, Mutability::Nonpayable);

    let id = method_id("foo(int128)");
    let expected = format!("0x{}", id.iter().map(|b| format!("{:02x}", b)).collect::<String>());
    assert_eq!(output.method_identifiers["foo(int128)"], expected);

    let lo = -(BigInt::one() << 127usize);
    let hi = (BigInt::one() << 127usize) - 1;
    let runtime = output.runtime_ir().unwrap();
    let stored = runtime
        .iter()
        .filter(|n| n.is_op("mstore"))
        .find_map(|n| n.args.get(1).filter(|v| v.is_op("clamp") && v.args[1].is_op("add")))
        .expect("returned value is clamped");
    assert_eq!(stored.args[0].as_int(), Some(&lo));
    assert_eq!(stored.args[2].as_int(), Some(&hi));
}

#[test]
fn view_function_cannot_write_storage() {
    let err = first_error(
        "balances: HashMap[address, uint256]\n\
         @external\n@view\ndef f(x: address, amount: uint256):\n    self.balances[x] = self.balances[x] + amount\n",
    );
    assert_eq!(err.kind, ErrorKind::StateAccess);
    assert!(err.message.contains("modify storage in a view function"), "{}", err.message);
}

#[test]
fn mutual_recursion_is_rejected() {
    let err = first_error(
        "@internal\ndef a():\n    self.b()\n\n@internal\ndef b():\n    self.a()\n",
    );
    assert_eq!(err.kind, ErrorKind::CallViolation);
    assert!(err.message.contains("a -> b -> a"), "{}", err.message);
}

#[test]
fn descending_range_fails_before_codegen() {
    let err = first_error("@external\ndef f():\n    for i in range(10, 5):\n        pass\n");
    assert_eq!(err.kind, ErrorKind::Structure);
    assert!(err.message.contains("second value must be greater than first"));
}

#[test]
fn constant_expression_folds_with_annotation() {
    let tree = parse_ir("(add 2 (mul 3 4))").unwrap();
    let folded = optimize(&tree).unwrap();
    assert_eq!(folded.as_int(), Some(&BigInt::from(14)));
    let note = folded.annotation.clone().unwrap_or_default();
    for part in ["2", "+", "3", "*", "4"] {
        assert!(note.contains(part), "{}", note);
    }
    assert!(folded.gas < tree.gas);
}

const TOKEN: &str = "\
from vyper.interfaces import ERC20

event Transfer:
    sender: indexed(address)
    receiver: indexed(address)
    value: uint256

symbol: public(String[32])
balanceOf: public(HashMap[address, uint256])
totalSupply: public(uint256)

@external
def __init__(supply: uint256):
    self.symbol = \"TKN\"
    self.balanceOf[msg.sender] = supply
    self.totalSupply = supply

@external
def transfer(to: address, amount: uint256) -> bool:
    self.balanceOf[msg.sender] -= amount
    self.balanceOf[to] += amount
    log Transfer(msg.sender, to, amount)
    return True

@external
def sweep(token: address, to: address):
    ERC20(token).transfer(to, ERC20(token).balanceOf(self))
";

#[test]
fn token_outputs() {
    let output = compile_ok(TOKEN, &CompileOptions::default());
    let abi = output.abi.as_array().unwrap();
    let names: Vec<&str> = abi.iter().filter_map(|e| e["name"].as_str()).collect();
    for expected in ["symbol", "balanceOf", "totalSupply", "transfer", "sweep", "Transfer"] {
        assert!(names.contains(&expected), "missing {} in {:?}", expected, names);
    }
    assert!(abi.iter().any(|e| e["type"] == "constructor"));
    assert_eq!(output.method_identifiers["transfer(address,uint256)"], "0xa9059cbb");
    assert_eq!(output.method_identifiers["balanceOf(address)"], "0x70a08231");
    assert!(output.layout["storage_layout"]["totalSupply"].is_object());
    assert!(output.function_gas["transfer"] > 0);
    assert!(output.unoptimized_ir.is_none());
}

#[test]
fn optimization_never_raises_the_gas_bound() {
    let options = CompileOptions {
        emit_unoptimized: true,
        ..CompileOptions::default()
    };
    let output = compile_ok(TOKEN, &options);
    let unoptimized = output.unoptimized_ir.as_ref().unwrap();
    assert!(output.ir.gas <= unoptimized.gas);
}

#[test]
fn storage_layout_override_pins_slots() {
    let mut layout = StorageLayoutOverride::new();
    layout.insert(
        "x".to_string(),
        serde_json::from_value::<LayoutEntry>(serde_json::json!({"type": "uint256", "location": "storage", "slot": 7}))
            .unwrap(),
    );
    let options = CompileOptions::default().with_storage_layout(layout);
    let output = compile_ok("x: uint256\n@external\ndef f():\n    self.x = 1\n", &options);
    assert_eq!(output.analysis.contract.layout.slot_of("x"), Some(7));
    assert_eq!(output.layout["storage_layout"]["x"]["slot"], 7);
}

#[test]
fn custom_resolver_supplies_interfaces() {
    let resolver = |path: &str| {
        (path == "lib.Oracle").then(|| {
            ImportSource::Source("@external\n@view\ndef price() -> uint256:\n    return 1\n".to_string())
        })
    };
    let options = CompileOptions::default().with_resolver(resolver);
    let output = compile_ok(
        "import lib.Oracle as Oracle\n@external\n@view\ndef f(o: address) -> uint256:\n    return Oracle(o).price()\n",
        &options,
    );
    assert!(output.runtime_ir().unwrap().iter().any(|n| n.is_op("staticcall")));
}

#[test]
fn unknown_import_is_a_namespace_error() {
    let err = first_error("import lib.Missing as Missing\n");
    assert_eq!(err.kind, ErrorKind::Namespace);
}

#[test]
fn check_code_stops_after_analysis() {
    let analysis = check_code("x: uint256\n", &CompileOptions::default()).unwrap();
    assert!(analysis.contract.storage.contains_key("x"));
}

#[test]
fn rendered_outputs() {
    let output = compile_ok(TOKEN, &CompileOptions::default());
    let ids = render_output(&output, "method_ids".parse().unwrap());
    assert!(ids.contains("0xa9059cbb"));
    let ir = render_output(&output, OutputFormat::Ir);
    assert!(ir.contains("deploy"));
    let gas = render_output(&output, OutputFormat::Gas);
    assert!(gas.lines().any(|l| l.starts_with("transfer")));
    assert!("bytecode".parse::<OutputFormat>().is_err());
}
