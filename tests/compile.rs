use viper::diagnostic::ErrorKind;
use viper::{compile_code, render_output, CompileOptions, DirectoryResolver, OutputFormat, ResolverChain};

fn compile(source: &str, options: &CompileOptions) -> viper::CompilerOutput {
    compile_code(source, options).unwrap_or_else(|errs| {
        panic!(
            "should compile, got {} errors: {:?}",
            errs.len(),
            errs.iter().map(|e| &e.message).collect::<Vec<_>>()
        )
    })
}

const VAULT: &str = r#"
from vyper.interfaces import ERC20

struct Position:
    amount: uint256
    since: uint256

token: public(ERC20)
positions: HashMap[address, Position]
depositors: DynArray[address, 16]
paused: bool

@external
def __init__(token: address):
    self.token = ERC20(token)

@internal
@view
def _owed(who: address) -> uint256:
    return self.positions[who].amount

@external
@nonreentrant("vault")
def deposit(amount: uint256):
    assert not self.paused, "paused"
    assert amount > 0
    self.token.transferFrom(msg.sender, self, amount)
    if self.positions[msg.sender].amount == 0:
        self.depositors.append(msg.sender)
    self.positions[msg.sender] = Position({amount: self._owed(msg.sender) + amount, since: block.timestamp})

@external
@view
def total() -> uint256:
    acc: uint256 = 0
    for who in self.depositors:
        acc += self._owed(who)
    return acc
"#;

#[test]
fn vault_compiles_with_builtin_interfaces() {
    let output = compile(VAULT, &CompileOptions::default());
    let ids = &output.method_identifiers;
    assert!(ids.contains_key("deposit(uint256)"));
    assert!(ids.contains_key("total()"));
    assert!(ids.contains_key("token()"));
    let runtime = output.runtime_ir().unwrap();
    assert!(runtime.iter().any(|n| n.is_op("repeat")));
    assert!(output.function_gas.contains_key("_owed"));
    let layout = render_output(&output, OutputFormat::Layout);
    assert!(layout.contains("nonreentrant.vault"));
}

#[test]
fn imports_resolve_from_directories() {
    let dir = tempfile::tempdir().unwrap();
    let interfaces = dir.path().join("interfaces");
    std::fs::create_dir_all(&interfaces).unwrap();
    std::fs::write(
        interfaces.join("Feed.json"),
        r#"[{"type": "function", "name": "latest", "inputs": [], "outputs": [{"name": "", "type": "int256"}], "stateMutability": "view"}]"#,
    )
    .unwrap();
    std::fs::write(
        interfaces.join("Counter.vy"),
        "count: public(uint256)\n@external\ndef bump() -> uint256:\n    self.count += 1\n    return self.count\n",
    )
    .unwrap();

    let resolver = ResolverChain::new().with(DirectoryResolver::new([dir.path().to_path_buf()]));
    let options = CompileOptions::default().with_resolver(resolver);
    let output = compile(
        "import interfaces.Feed as Feed\nimport interfaces.Counter as Counter\n\
         @external\ndef f(feed: address, counter: address) -> int256:\n    Counter(counter).bump()\n    return Feed(feed).latest()\n",
        &options,
    );
    let runtime = output.runtime_ir().unwrap();
    assert!(runtime.iter().any(|n| n.is_op("staticcall")));
    assert!(runtime.iter().any(|n| n.is_op("call")));
}

#[test]
fn errors_carry_kinds_and_positions() {
    let source = "@external\ndef f() -> uint256:\n    return missing\n";
    let errs = compile_code(source, &CompileOptions::default()).unwrap_err();
    let err = &errs[0];
    assert_eq!(err.kind, ErrorKind::Namespace, "{:?}", err);
    assert!(err.pretty(source).starts_with("line 3:"), "{}", err.pretty(source));
}

#[test]
fn syntax_errors_stop_compilation() {
    let errs = compile_code("@external\ndef f(:\n    pass\n", &CompileOptions::default()).unwrap_err();
    assert_eq!(errs[0].kind, ErrorKind::Syntax);
}
