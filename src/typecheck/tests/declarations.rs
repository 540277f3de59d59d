use num_bigint::BigInt;

use super::{check_err, check_ok, first_err};
use crate::ast::ExprKind;
use crate::diagnostic::ErrorKind;
use crate::typecheck::function::method_id;
use crate::typecheck::types::IntType;
use crate::typecheck::{Mutability, Type, Visibility};

#[test]
fn external_function_signature() {
    let a = check_ok("@external\ndef foo(x: int128) -> int128:\n    return x + 1\n");
    let foo = &a.contract.functions["foo"];
    assert_eq!(foo.args, vec![("x".to_string(), Type::int128())]);
    assert_eq!(foo.return_type, Some(Type::int128()));
    assert_eq!(foo.mutability, Mutability::Nonpayable);
    assert_eq!(foo.visibility, Visibility::External);
    assert_eq!(foo.method_ids(), vec![("foo(int128)".to_string(), method_id("foo(int128)"))]);
    assert_eq!(a.contract.function_order, vec!["foo"]);
}

#[test]
fn return_expression_is_typed() {
    let a = check_ok("@external\ndef foo(x: int128) -> int128:\n    return x + 1\n");
    let decl = a.function_decl("foo").unwrap();
    let crate::ast::Stmt::Return(Some(value)) = &decl.body[0].node else {
        panic!("expected a return statement");
    };
    assert_eq!(a.types.get(&value.id), Some(&Type::int128()));
    if let ExprKind::BinOp { right, .. } = &value.kind {
        assert_eq!(a.types.get(&right.id), Some(&Type::int128()));
    } else {
        panic!("expected a binary operation");
    }
}

#[test]
fn declarations_may_reference_later_types() {
    let a = check_ok(
        "pos: Point\ncount: uint256\nstruct Point:\n    x: int128\n    y: int128\nevent Moved:\n    to: Point\n",
    );
    assert_eq!(a.contract.storage_order, vec!["pos", "count"]);
    assert_eq!(a.contract.layout.slot_of("pos"), Some(0));
    assert_eq!(a.contract.layout.slot_of("count"), Some(2));
    assert!(a.contract.events.contains_key("Moved"));
}

#[test]
fn undeclared_type_is_a_namespace_error() {
    let err = first_err("x: Missing\n", ErrorKind::Namespace);
    assert!(err.message.contains("Missing"), "{}", err.message);
}

#[test]
fn constants_fold_at_declaration() {
    let a = check_ok("TEN: constant(uint256) = 2 * 5\nTWENTY: constant(uint256) = TEN * 2\n");
    let value = a.contract.constant_value("TWENTY").unwrap();
    assert_eq!(value.kind, ExprKind::Int(BigInt::from(20)));
}

#[test]
fn constants_must_be_compile_time() {
    let err = first_err("X: constant(uint256) = block.number\n", ErrorKind::Structure);
    assert!(err.message.contains("compile-time"), "{}", err.message);
}

#[test]
fn constant_out_of_range() {
    first_err("X: constant(uint8) = 256\n", ErrorKind::Overflow);
}

#[test]
fn storage_variables_cannot_be_initialized() {
    first_err("x: uint256 = 5\n", ErrorKind::Structure);
}

#[test]
fn duplicate_storage_variable() {
    first_err("x: uint256\nx: address\n", ErrorKind::Namespace);
}

#[test]
fn opcode_names_are_reserved() {
    let err = first_err("@external\ndef f():\n    mstore: uint256 = 1\n", ErrorKind::Namespace);
    assert!(err.message.contains("reserved"), "{}", err.message);
}

#[test]
fn public_mapping_gets_a_getter() {
    let a = check_ok("balances: public(HashMap[address, uint256])\n");
    let getter = &a.contract.functions["balances"];
    assert!(getter.is_getter);
    assert_eq!(getter.mutability, Mutability::View);
    assert_eq!(getter.args, vec![("arg0".to_string(), Type::Address)]);
    assert_eq!(getter.return_type, Some(Type::uint256()));
    assert_eq!(getter.signature(1), "balances(address)");
    assert!(a.function_decl("balances").is_some());
}

#[test]
fn public_nested_array_getter_takes_indices() {
    let a = check_ok("grid: public(uint8[3][4])\n");
    let getter = &a.contract.functions["grid"];
    assert_eq!(getter.args.len(), 2);
    assert!(getter.args.iter().all(|(_, t)| *t == Type::uint256()));
    assert_eq!(getter.return_type, Some(Type::Int(IntType::UINT8)));
}

#[test]
fn missing_visibility_is_structural() {
    let err = first_err("def f():\n    pass\n", ErrorKind::Structure);
    assert!(err.message.contains("@external or @internal"));
}

#[test]
fn payable_internal_is_rejected() {
    first_err("@internal\n@payable\ndef f():\n    pass\n", ErrorKind::Structure);
}

#[test]
fn event_with_too_many_indexed_fields() {
    first_err(
        "event E:\n    a: indexed(uint256)\n    b: indexed(uint256)\n    c: indexed(uint256)\n    d: indexed(uint256)\n",
        ErrorKind::Structure,
    );
}

#[test]
fn struct_cannot_hold_hashmap() {
    first_err(
        "struct S:\n    m: HashMap[address, uint256]\n",
        ErrorKind::Structure,
    );
}

#[test]
fn enum_members_are_flags() {
    let a = check_ok(
        "enum Role:\n    ADMIN\n    USER\nrole: Role\n@external\ndef f() -> bool:\n    return self.role == Role.USER\n",
    );
    assert!(matches!(a.contract.storage["role"].typ(), Type::Enum(e) if e.members.len() == 2));
}

#[test]
fn immutables_are_set_once_in_constructor() {
    let a = check_ok(
        "OWNER: immutable(address)\n@external\ndef __init__():\n    OWNER = msg.sender\n@external\n@view\ndef owner() -> address:\n    return OWNER\n",
    );
    assert_eq!(a.contract.layout.code_offset("OWNER"), Some(0));
    assert_eq!(a.contract.immutables_size(), 32);
}

#[test]
fn unassigned_immutable_is_rejected() {
    let err = first_err("OWNER: immutable(address)\n", ErrorKind::StateAccess);
    assert!(err.message.contains("exactly once"));
}

#[test]
fn immutable_written_outside_constructor() {
    first_err(
        "OWNER: immutable(address)\n@external\ndef __init__():\n    OWNER = msg.sender\n@external\ndef f():\n    OWNER = msg.sender\n",
        ErrorKind::StateAccess,
    );
}

#[test]
fn interface_declaration_is_callable() {
    check_ok(
        "interface Token:\n    def balanceOf(owner: address) -> uint256: view\n@external\n@view\ndef f(t: address) -> uint256:\n    return Token(t).balanceOf(msg.sender)\n",
    );
}

#[test]
fn every_unresolved_declaration_is_reported() {
    let diags = check_err("a: Foo\nb: Bar\n");
    let messages: Vec<&str> = diags.iter().map(|d| d.message.as_str()).collect();
    assert_eq!(diags.len(), 2, "{:?}", messages);
    assert!(messages[0].contains("'Foo' has not been declared"), "{:?}", messages);
    assert!(messages[1].contains("'Bar' has not been declared"), "{:?}", messages);
    assert!(diags.iter().all(|d| d.kind == ErrorKind::Namespace));
}

#[test]
fn redeclaration_is_not_retried() {
    // The pending forward reference does not hold back the collision.
    let diags = check_err("b: Missing\na: uint256\na: uint256\n");
    assert_eq!(diags.len(), 1, "{:?}", diags);
    assert_eq!(diags[0].kind, ErrorKind::Namespace);
    assert!(diags[0].message.contains("'a' has already been declared"), "{}", diags[0].message);
    assert!(diags[0].undeclared.is_none());
}
