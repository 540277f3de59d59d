use num_bigint::BigInt;

use super::{generate, int, Codegen, Program};
use crate::ir::IrNode;
use crate::lexer::Lexer;
use crate::parser::Parser;
use crate::typecheck::{analyze, Analysis, DataLocation, Type};

fn analysis_of(source: &str) -> Analysis {
    let (tokens, lex_errors) = Lexer::new(source, 0).tokenize();
    assert!(lex_errors.is_empty(), "lex errors: {:?}", lex_errors);
    let module = Parser::new(tokens).parse_module().unwrap();
    match analyze(&module) {
        Ok(analysis) => analysis,
        Err(diags) => panic!("unexpected errors: {:#?}", diags),
    }
}

fn compile(source: &str) -> Program {
    let analysis = analysis_of(source);
    match generate(&analysis) {
        Ok(program) => program,
        Err(diag) => panic!("codegen failed: {:#?}", diag),
    }
}

fn has_op(node: &IrNode, name: &str) -> bool {
    node.iter().any(|n| n.is_op(name))
}

fn count_op(node: &IrNode, name: &str) -> usize {
    node.iter().filter(|n| n.is_op(name)).count()
}

fn has_int(node: &IrNode, value: u64) -> bool {
    let value = BigInt::from(value);
    node.iter().any(|n| n.as_int() == Some(&value))
}

const TOKEN: &str = "\
balances: public(HashMap[address, uint256])
total: uint256

@external
def __init__(supply: uint256):
    self.balances[msg.sender] = supply
    self.total = supply

@external
def transfer(to: address, amount: uint256) -> bool:
    self.balances[msg.sender] -= amount
    self.balances[to] += amount
    return True
";

#[test]
fn root_wraps_runtime_in_deploy() {
    let program = compile(TOKEN);
    assert!(program.ir.is_op("seq"));
    let deploy = program.ir.args.last().unwrap();
    assert!(deploy.is_op("deploy"));
    assert_eq!(deploy.args.len(), 3);
    assert_eq!(deploy.args[1].as_int(), Some(&BigInt::from(320)));
    assert!(program.runtime().is_some());
}

#[test]
fn dispatcher_compares_method_ids() {
    let program = compile(TOKEN);
    let runtime = program.runtime().unwrap();
    assert!(has_op(runtime, "calldataload"));
    // transfer(address,uint256)
    assert!(has_int(runtime, 0xa905_9cbb));
    // balances(address)
    assert!(has_int(runtime, 0x27e2_35e3));
}

#[test]
fn nonpayable_functions_reject_value() {
    let program = compile(TOKEN);
    let runtime = program.runtime().unwrap();
    assert!(has_op(runtime, "callvalue"));
}

#[test]
fn storage_arithmetic_is_checked() {
    let program = compile(TOKEN);
    let runtime = program.runtime().unwrap();
    assert!(has_op(runtime, "sha3_64"));
    assert!(has_op(runtime, "uclample"));
    assert!(has_op(runtime, "uclampge"));
    assert!(has_op(runtime, "sstore"));
}

#[test]
fn constructor_reads_arguments_after_init_code() {
    let program = compile(TOKEN);
    let ctor = &program.ir.args[0];
    assert!(has_op(ctor, "codecopy"));
    assert!(ctor.iter().any(|n| n.is_op("symbol")));
    assert!(!has_op(ctor, "deploy"));
}

#[test]
fn gas_is_recorded_per_function() {
    let program = compile(TOKEN);
    assert!(program.function_gas["transfer"] > 0);
    assert!(program.function_gas.contains_key("balances"));
    assert!(program.function_gas.contains_key("__init__"));
}

#[test]
fn internal_calls_jump_through_frames() {
    let program = compile(
        "\
@internal
def double(x: uint256) -> uint256:
    return x * 2

@external
def quad(x: uint256) -> uint256:
    return self.double(self.double(x))
",
    );
    let runtime = program.runtime().unwrap();
    assert_eq!(count_op(runtime, "goto"), 2);
    assert!(has_op(runtime, "jump"));
    let double = program.function_gas["double"];
    assert!(program.function_gas["quad"] > 2 * double);
}

#[test]
fn unreachable_internal_functions_are_skipped() {
    let program = compile(
        "\
@internal
def unused() -> uint256:
    return 1

@external
def f() -> uint256:
    return 2
",
    );
    assert!(!program.function_gas.contains_key("unused"));
}

#[test]
fn nonreentrant_locks_and_unlocks() {
    let program = compile(
        "\
@external
@nonreentrant(\"lock\")
def f() -> uint256:
    return 1
",
    );
    let runtime = program.runtime().unwrap();
    assert!(count_op(runtime, "sstore") >= 2);
    assert!(has_op(runtime, "sload"));
}

#[test]
fn default_arguments_add_dispatch_branches() {
    let program = compile(
        "\
@external
def f(a: uint256, b: uint256 = 7) -> uint256:
    return a + b
",
    );
    let runtime = program.runtime().unwrap();
    assert!(count_op(runtime, "label") >= 1);
    assert!(has_int(runtime, 7));
    let branches = runtime
        .iter()
        .filter(|n| n.is_op("if") && n.annotation.as_deref().is_some_and(|a| a.starts_with("f(")))
        .count();
    assert_eq!(branches, 2);
}

#[test]
fn range_loops_repeat() {
    let program = compile(
        "\
@external
def f() -> uint256:
    total: uint256 = 0
    for i in range(10):
        total += i
    return total
",
    );
    let runtime = program.runtime().unwrap();
    let repeat = runtime.iter().find(|n| n.is_op("repeat")).unwrap();
    assert_eq!(repeat.args[2].as_int(), Some(&BigInt::from(10)));
}

#[test]
fn events_log_indexed_topics() {
    let program = compile(
        "\
event Transfer:
    sender: indexed(address)
    receiver: indexed(address)
    value: uint256

@external
def f(to: address):
    log Transfer(msg.sender, to, 5)
",
    );
    let runtime = program.runtime().unwrap();
    assert!(has_op(runtime, "log3"));
}

#[test]
fn failed_asserts_with_reasons_revert_with_error_string() {
    let program = compile(
        "\
@external
def f(x: uint256):
    assert x > 1, \"too small\"
",
    );
    let runtime = program.runtime().unwrap();
    assert!(has_int(runtime, 0x08c3_79a0));
    assert!(has_op(runtime, "revert"));
}

#[test]
fn external_calls_check_returned_data() {
    let program = compile(
        "\
interface Token:
    def balanceOf(owner: address) -> uint256: view

@external
@view
def f(token: address) -> uint256:
    return Token(token).balanceOf(self)
",
    );
    let runtime = program.runtime().unwrap();
    assert!(has_op(runtime, "staticcall"));
    assert!(has_op(runtime, "returndatasize"));
    assert!(has_op(runtime, "extcodesize"));
}

#[test]
fn immutables_are_read_from_the_code_tail() {
    let program = compile(
        "\
OWNER: immutable(address)

@external
def __init__():
    OWNER = msg.sender

@external
@view
def owner() -> address:
    return OWNER
",
    );
    let deploy = program.ir.args.last().unwrap();
    assert_eq!(deploy.args[2].as_int(), Some(&BigInt::from(32)));
    let runtime = program.runtime().unwrap();
    assert!(has_op(runtime, "codecopy"));
}

#[test]
fn builtins_lower_to_opcodes() {
    let program = compile(
        "\
@external
@pure
def f(a: uint256, b: uint256) -> uint256:
    return uint256_addmod(a, b, 7) + min(a, b)

@external
@view
def g(data: Bytes[64]) -> bytes32:
    return keccak256(slice(data, 1, 4))
",
    );
    let runtime = program.runtime().unwrap();
    assert!(has_op(runtime, "addmod"));
    assert!(has_op(runtime, "lt"));
    assert!(has_op(runtime, "sha3"));
}

#[test]
fn generated_ir_survives_optimization() {
    let program = compile(TOKEN);
    let optimized = crate::ir::optimize(&program.ir).unwrap();
    assert!(optimized.iter().any(|n| n.is_op("deploy")));
}

// ── Copies ──

/// Copy a `src_typ` value at memory offset 1024 into a `typ` slot at `dst`.
fn copy_ir(dst: u64, dst_loc: DataLocation, typ: &Type, src_typ: &Type) -> IrNode {
    let analysis = analysis_of("x: uint256\n");
    let mut cg = Codegen::new(&analysis);
    cg.copy(int(dst), dst_loc, typ, int(1024), DataLocation::Memory, src_typ)
        .unwrap()
}

fn has_length_check(node: &IrNode, max: u64) -> bool {
    let max = BigInt::from(max);
    node.iter().any(|n| {
        n.is_op("assert") && n.args[0].is_op("le") && n.args[0].args[1].as_int() == Some(&max)
    })
}

#[test]
fn memory_bytestrings_copy_through_the_identity_precompile() {
    let ir = copy_ir(512, DataLocation::Memory, &Type::Bytes(64), &Type::Bytes(64));
    let four = BigInt::from(4);
    assert!(ir
        .iter()
        .any(|n| n.is_op("staticcall") && n.args[1].as_int() == Some(&four)));
    assert!(!has_op(&ir, "repeat"));
    assert!(!has_op(&ir, "assert"));
}

#[test]
fn storage_copies_loop_over_the_destination_size() {
    // String[100] spans 5 words: the length word and 4 words of payload.
    let ir = copy_ir(3, DataLocation::Storage, &Type::String(100), &Type::String(200));
    let repeat = ir.iter().find(|n| n.is_op("repeat")).expect("word loop");
    assert_eq!(repeat.args[2].as_int(), Some(&BigInt::from(5)));
    assert!(has_op(repeat, "sstore"));
    assert!(has_op(repeat, "break"));
    assert!(has_length_check(&ir, 100));
}

#[test]
fn narrowing_copies_check_the_runtime_length() {
    let ir = copy_ir(512, DataLocation::Memory, &Type::Bytes(10), &Type::Bytes(100));
    assert!(has_length_check(&ir, 10));
    let wide = copy_ir(512, DataLocation::Memory, &Type::Bytes(100), &Type::Bytes(10));
    assert!(!has_op(&wide, "assert"));
}

#[test]
fn calldata_bytestrings_are_clamped_to_their_capacity() {
    let program = compile("@external\ndef f(x: Bytes[10]) -> uint256:\n    return len(x)\n");
    let runtime = program.runtime().unwrap();
    let ten = BigInt::from(10);
    assert!(runtime
        .iter()
        .any(|n| n.is_op("uclample") && n.args[1].as_int() == Some(&ten)));
}

#[test]
fn external_calls_refuse_the_own_address() {
    let program = compile(
        "\
interface Token:
    def transfer(to: address, amount: uint256) -> bool: nonpayable

@external
def f(token: address):
    Token(token).transfer(msg.sender, 1)
",
    );
    let runtime = program.runtime().unwrap();
    let guard = runtime.iter().find(|n| {
        n.is_op("iszero") && n.args[0].is_op("eq") && n.args[0].args.iter().any(|a| a.is_op("address"))
    });
    assert!(guard.is_some());
    assert!(has_op(runtime, "call"));
}
