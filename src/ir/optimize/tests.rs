use num_bigint::BigInt;
use proptest::prelude::*;

use super::*;
use crate::ir::parse_ir;

fn optimized(text: &str) -> IrNode {
    optimize(&parse_ir(text).unwrap()).unwrap()
}

#[test]
fn folds_nested_arithmetic() {
    let tree = parse_ir("(add 2 (mul 3 4))").unwrap();
    let out = optimize(&tree).unwrap();
    assert_eq!(out.as_int(), Some(&BigInt::from(14)));
    let note = out.annotation.clone().unwrap();
    for part in ["2", "+", "3", "*", "4"] {
        assert!(note.contains(part), "{}", note);
    }
    assert!(out.gas < tree.gas);
}

#[test]
fn folding_follows_evm_word_semantics() {
    assert_eq!(optimized("(div 7 0)").as_int(), Some(&BigInt::from(0)));
    assert_eq!(optimized("(sdiv -7 2)").as_int(), Some(&BigInt::from(-3)));
    assert_eq!(optimized("(smod -7 2)").as_int(), Some(&BigInt::from(-1)));
    assert_eq!(optimized("(slt -1 0)").as_int(), Some(&BigInt::from(1)));
    assert_eq!(optimized("(lt -1 0)").as_int(), Some(&BigInt::from(0)));
    assert_eq!(optimized("(shl 4 1)").as_int(), Some(&BigInt::from(16)));
    assert_eq!(optimized("(sar 1 -4)").as_int(), Some(&BigInt::from(-2)));
    let wrapped = optimized("(add 0xffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff 2)");
    assert_eq!(wrapped.as_int(), Some(&BigInt::from(1)));
}

#[test]
fn adding_zero_is_dropped() {
    let out = optimized("(add (mload 64) 0)");
    assert_eq!(out.to_string(), "(mload 64)");
}

#[test]
fn constant_additions_merge() {
    let out = optimized("(add (add (mload 0) 3) 4)");
    assert_eq!(out.to_string(), "(add (mload 0) 7)");
}

#[test]
fn satisfied_clamp_reduces_to_its_value() {
    let out = optimized("(clamp -128 (add 100 20) 127)");
    assert_eq!(out.as_int(), Some(&BigInt::from(120)));
    assert_eq!(optimized("(uclamplt 3 10)").as_int(), Some(&BigInt::from(3)));
}

#[test]
fn violated_clamp_is_a_compile_error() {
    let tree = parse_ir("(clamp -128 (add 100 100) 127)").unwrap();
    assert!(matches!(optimize(&tree), Err(IrError::ClampFailure(_))));
    let tree = parse_ir("(uclampge 3 10)").unwrap();
    assert!(matches!(optimize(&tree), Err(IrError::ClampFailure(_))));
}

#[test]
fn clamp_nonzero_of_a_literal() {
    assert_eq!(optimized("(clamp_nonzero 5)").as_int(), Some(&BigInt::from(5)));
    let tree = parse_ir("(clamp_nonzero (sub 5 5))").unwrap();
    assert!(matches!(optimize(&tree), Err(IrError::ClampFailure(_))));
}

#[test]
fn nested_seq_flattens_and_pass_drops() {
    let out = optimized("(seq (seq (mstore 0 1) pass) pass (seq (mstore 32 2)) (mload 0))");
    assert_eq!(out.to_string(), "(seq (mstore 0 1) (mstore 32 2) (mload 0))");
}

#[test]
fn trailing_pass_keeps_valency() {
    let out = optimized("(seq (mload 0) pass)");
    assert_eq!(out.valency, 0);
}

#[test]
fn bookkeeping_nodes_are_not_folded_away() {
    let call = IrNode::seq(vec![IrNode::op("goto", vec![IrNode::name("f")]).unwrap()])
        .unwrap()
        .with_add_gas(500);
    let tree = IrNode::seq(vec![call, IrNode::pass()]).unwrap();
    let out = optimize(&tree).unwrap();
    assert_eq!(out.gas, tree.gas);
    assert!(out.iter().any(|n| n.add_gas_estimate == 500));
}

#[test]
fn function_total_gas_is_rederived() {
    let body = parse_ir("(seq (mstore 0 (add 2 3)) (return 0 32))")
        .unwrap()
        .with_function("f");
    let total = body.total_gas.unwrap();
    let out = optimize(&body).unwrap();
    assert_eq!(out.func_name.as_deref(), Some("f"));
    assert_eq!(out.total_gas, Some(total - body.gas + out.gas));
    assert!(out.total_gas.unwrap() < total);
}

#[test]
fn input_is_not_mutated() {
    let tree = parse_ir("(add 1 2)").unwrap();
    let before = tree.clone();
    optimize(&tree).unwrap();
    assert_eq!(tree, before);
}

fn arith_tree() -> impl Strategy<Value = String> {
    let leaf = prop_oneof![
        (0i64..1000).prop_map(|v| v.to_string()),
        Just("(mload 0)".to_string()),
        Just("(calldataload 4)".to_string()),
    ];
    leaf.prop_recursive(4, 32, 2, |inner| {
        (
            prop::sample::select(vec!["add", "sub", "mul", "div", "lt", "eq", "and", "xor"]),
            inner.clone(),
            inner,
        )
            .prop_map(|(op, l, r)| format!("({} {} {})", op, l, r))
    })
}

proptest! {
    /// Optimization never raises a gas bound.
    #[test]
    fn gas_never_increases(text in arith_tree()) {
        let tree = parse_ir(&text).unwrap();
        let out = optimize(&tree).unwrap();
        prop_assert!(out.gas <= tree.gas, "{} -> {}", tree, out);
    }
}
