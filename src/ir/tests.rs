use proptest::prelude::*;

use super::opcodes::{self, OpInfo};
use super::*;

fn int(v: i64) -> IrNode {
    IrNode::int(v)
}

fn op(name: &str, args: Vec<IrNode>) -> IrNode {
    IrNode::op(name, args).unwrap()
}

// --- Construction ---

#[test]
fn literals_and_names_push_one_value() {
    assert_eq!(int(7).valency, 1);
    assert_eq!(int(7).gas, LITERAL_GAS);
    assert_eq!(IrNode::name("x").valency, 1);
    assert_eq!(IrNode::name("x").gas, NAME_GAS);
}

#[test]
fn wrong_arity_is_rejected() {
    let err = IrNode::op("add", vec![int(1)]).unwrap_err();
    assert_eq!(
        err,
        IrError::Arity {
            op: "add".into(),
            expected: "2".into(),
            got: 1
        }
    );
}

#[test]
fn zero_valent_operand_is_rejected() {
    let store = op("mstore", vec![int(0), int(1)]);
    let err = IrNode::op("add", vec![store, int(2)]).unwrap_err();
    assert_eq!(
        err,
        IrError::Valency {
            op: "add".into(),
            index: 0
        }
    );
}

#[test]
fn unknown_operation() {
    assert!(matches!(IrNode::op("frobnicate", vec![]), Err(IrError::UnknownOp(_))));
}

#[test]
fn fixed_op_gas_counts_children_and_stack_effect() {
    // mul: 5 + 5 + 5 + 2 - 4
    assert_eq!(op("mul", vec![int(3), int(4)]).gas, 13);
    let tree = op("add", vec![int(2), op("mul", vec![int(3), int(4)])]);
    assert_eq!(tree.gas, 19);
}

#[test]
fn storage_write_of_zero_is_cheaper() {
    let zero = op("sstore", vec![int(0), int(0)]);
    let one = op("sstore", vec![int(0), int(1)]);
    assert_eq!(zero.gas, 5006);
    assert_eq!(one.gas, zero.gas + SSTORE_SET_GAS);
    let unknown = op("sstore", vec![int(0), IrNode::name("v")]);
    assert_eq!(unknown.gas, zero.gas - LITERAL_GAS + NAME_GAS + SSTORE_SET_GAS);
}

#[test]
fn copy_of_unknown_length_is_charged_conservatively() {
    let known = op("calldatacopy", vec![int(0), int(4), int(64)]);
    let unknown = op("calldatacopy", vec![int(0), int(4), IrNode::name("n")]);
    assert_eq!(known.gas, 3 + 15 - 6 + 6);
    assert!(unknown.gas >= DYNAMIC_SIZE_GAS);
}

// --- Control constructs ---

#[test]
fn seq_takes_valency_of_last_child() {
    let s = IrNode::seq(vec![op("mstore", vec![int(0), int(1)]), op("mload", vec![int(0)])]).unwrap();
    assert_eq!(s.valency, 1);
    assert_eq!(IrNode::seq(vec![]).unwrap().valency, 0);
}

#[test]
fn multi_sums_valencies() {
    let m = op("multi", vec![int(1), int(2), int(3)]);
    assert_eq!(m.valency, 3);
    assert!(IrNode::op("multi", vec![IrNode::pass()]).is_err());
}

#[test]
fn one_armed_if_body_must_be_zero_valent() {
    let test = op("lt", vec![IrNode::name("x"), int(3)]);
    let ok = op("if", vec![test.clone(), IrNode::pass()]);
    assert_eq!(ok.valency, 0);
    assert_eq!(ok.gas, test.gas + IF_GAS);
    let err = IrNode::op("if", vec![test, int(1)]).unwrap_err();
    assert!(matches!(err, IrError::Malformed { .. }));
}

#[test]
fn two_armed_if_charges_the_costlier_branch() {
    let cheap = int(1);
    let costly = op("sload", vec![int(0)]);
    let node = op("if", vec![int(1), cheap, costly.clone()]);
    assert_eq!(node.valency, 1);
    assert_eq!(node.gas, LITERAL_GAS + costly.gas + IF_ELSE_GAS);
    let err = IrNode::op("if", vec![int(1), int(1), IrNode::pass()]).unwrap_err();
    assert!(matches!(err, IrError::Malformed { .. }));
}

#[test]
fn with_binds_a_plain_name() {
    let node = IrNode::with("x", int(5), op("add", vec![IrNode::name("x"), int(1)])).unwrap();
    assert_eq!(node.valency, 1);
    assert!(IrNode::op("with", vec![int(1), int(2), int(3)]).is_err());
    assert!(IrNode::with("mload", int(1), int(2)).is_err());
    assert!(IrNode::with("x", IrNode::pass(), int(2)).is_err());
}

#[test]
fn repeat_needs_a_literal_positive_count() {
    let body = op("mstore", vec![int(0), int(1)]);
    let node = op("repeat", vec![int(320), int(0), int(10), body.clone()]);
    assert_eq!(node.valency, 0);
    assert_eq!(node.gas, 5 + 5 + 10 * (9 + REPEAT_ITERATION_GAS) + 30);

    let symbolic = IrNode::op("repeat", vec![int(320), int(0), IrNode::name("n"), body.clone()]);
    assert!(matches!(symbolic, Err(IrError::RepeatCount(_))));
    let zero = IrNode::op("repeat", vec![int(320), int(0), int(0), body]);
    assert!(matches!(zero, Err(IrError::RepeatCount(_))));
}

#[test]
fn labels_and_symbols() {
    assert_eq!(op("label", vec![IrNode::name("f")]).valency, 0);
    assert_eq!(op("symbol", vec![IrNode::name("f")]).valency, 1);
    assert!(IrNode::op("goto", vec![int(3)]).is_err());
}

#[test]
fn deploy_does_not_charge_runtime_gas() {
    let runtime = op("sstore", vec![int(0), int(1)]);
    let node = op("deploy", vec![runtime, int(320), int(0)]);
    assert_eq!(node.gas, 2 * LITERAL_GAS);
}

#[test]
fn added_gas_is_counted() {
    let node = op("goto", vec![IrNode::name("f")]).with_add_gas(1000);
    assert_eq!(node.gas, 1008);
    assert_eq!(node.add_gas_estimate, 1000);
    let body = node.with_function("f");
    assert_eq!(body.total_gas, Some(1008));
}

#[test]
fn opcode_names_are_known() {
    assert!(opcodes::is_evm_opcode("sload"));
    assert!(opcodes::is_evm_opcode("balance"));
    assert!(!opcodes::is_evm_opcode("clamp"));
    assert!(!opcodes::is_evm_opcode("seq"));
    assert_eq!(opcodes::log_opcode(2), Some("log2"));
    assert_eq!(opcodes::log_opcode(5), None);
}

// --- Text form ---

#[test]
fn display_and_parse_round_trip() {
    let text = "(seq (mstore 0 (add 1 2)) (with x 5 (mstore 32 x)) (return 0 64))";
    let node = parse_ir(text).unwrap();
    assert_eq!(node.to_string(), text);
    assert_eq!(node.args[1].args[0].value, IrValue::Name("x".into()));
}

#[test]
fn parse_reads_hex_negative_and_comments() {
    let node = parse_ir("(add 0xff /* two fifty five */ -1)").unwrap();
    assert_eq!(node.args[0].as_int(), Some(&BigInt::from(255)));
    assert_eq!(node.args[1].as_int(), Some(&BigInt::from(-1)));
    assert!(parse_ir("caller").unwrap().is_op("caller"));
}

#[test]
fn parse_errors() {
    assert!(matches!(parse_ir("(add 1"), Err(IrError::Parse { .. })));
    assert!(matches!(parse_ir("(nope 1)"), Err(IrError::Parse { .. })));
    assert!(matches!(parse_ir("1 2"), Err(IrError::Parse { .. })));
    assert!(matches!(parse_ir("(add 1)"), Err(IrError::Arity { .. })));
}

#[test]
fn pretty_print_shows_annotations() {
    let node = op("add", vec![int(1), int(2)]).with_annotation("one plus two");
    assert_eq!(format!("{:#}", node), "(add 1 2) /* one plus two */");
    assert_eq!(node.to_string(), "(add 1 2)");
}

#[test]
fn pretty_print_breaks_long_nodes() {
    let node = parse_ir(
        "(seq (mstore 320 (add 1 2)) (mstore 352 (mul 3 4)) (sstore 0 (mload 320)) (return 320 64))",
    )
    .unwrap();
    insta::assert_snapshot!(format!("{:#}", node), @r"
    (seq
      (mstore 320 (add 1 2))
      (mstore 352 (mul 3 4))
      (sstore 0 (mload 320))
      (return 320 64))
    ");
}

#[test]
fn walk_visits_every_node() {
    let tree = parse_ir("(seq (mstore 0 (add 1 2)) pass)").unwrap();
    let ops: Vec<String> = tree.iter().filter_map(|n| n.op_name().map(str::to_string)).collect();
    assert_eq!(ops, vec!["seq", "mstore", "add", "pass"]);
}

#[test]
fn ir_errors_become_panic_diagnostics() {
    let diag: Diagnostic = IrError::UnknownOp("x".into()).into();
    assert_eq!(diag.kind, ErrorKind::Panic);
}

proptest! {
    /// Fixed-arity operations accept exactly their declared operand count.
    #[test]
    fn fixed_arity_is_enforced(
        info in prop::sample::select(opcodes::fixed_arity().copied().collect::<Vec<OpInfo>>()),
        count in 0usize..8,
    ) {
        let args: Vec<IrNode> = (0..count).map(|i| IrNode::int(i as u64)).collect();
        let result = IrNode::op(info.name, args);
        if count == info.inputs as usize {
            let node = result.unwrap();
            prop_assert_eq!(node.valency, info.outputs);
        } else {
            let is_arity_error = matches!(result, Err(IrError::Arity { .. }));
            prop_assert!(is_arity_error);
        }
    }
}
