use super::{check_err, check_ok, first_err};
use crate::ast::Stmt;
use crate::diagnostic::ErrorKind;
use crate::typecheck::Type;

#[test]
fn view_cannot_write_storage() {
    let err = first_err(
        "balances: HashMap[address, uint256]\n@external\n@view\ndef f(x: address, amount: uint256):\n    self.balances[x] = self.balances[x] + amount\n",
        ErrorKind::StateAccess,
    );
    assert!(err.message.contains("modify storage in a view function"), "{}", err.message);
}

#[test]
fn range_stop_must_exceed_start() {
    let err = first_err(
        "@external\ndef f():\n    for i in range(10, 5):\n        pass\n",
        ErrorKind::Structure,
    );
    assert!(err.message.contains("second value must be greater than first"));
}

#[test]
fn single_range_bound_must_be_literal() {
    first_err(
        "@external\ndef f(x: uint256):\n    for i in range(x):\n        pass\n",
        ErrorKind::Iterator,
    );
}

#[test]
fn range_with_offset_bound() {
    check_ok("@external\ndef f(x: uint256):\n    for i in range(x, x + 10):\n        pass\n");
    first_err(
        "@external\ndef f(x: uint256, y: uint256):\n    for i in range(x, y):\n        pass\n",
        ErrorKind::Iterator,
    );
}

#[test]
fn range_bound_from_constant() {
    check_ok("N: constant(uint256) = 4\n@external\ndef f():\n    for i in range(N):\n        pass\n");
}

#[test]
fn loop_variable_is_retyped_to_fit_its_uses() {
    let a = check_ok(
        "@external\ndef f() -> uint256:\n    total: uint256 = 0\n    for i in range(10):\n        y: uint256 = i\n        total += y\n    return total\n",
    );
    let decl = a.function_decl("f").unwrap();
    let Stmt::For { iter, .. } = &decl.body[1].node else {
        panic!("expected a for loop");
    };
    assert_eq!(a.types.get(&iter.id), Some(&Type::uint256()));
}

#[test]
fn loop_over_literal_list() {
    check_ok(
        "@external\ndef f() -> int128:\n    s: int128 = 0\n    for v in [1, -2, 3]:\n        s += v\n    return s\n",
    );
    first_err(
        "@external\ndef f():\n    for v in []:\n        pass\n",
        ErrorKind::Iterator,
    );
}

#[test]
fn cannot_iterate_over_an_integer() {
    let err = first_err(
        "@external\ndef f(x: uint256):\n    for v in x:\n        pass\n",
        ErrorKind::Iterator,
    );
    assert!(err.message.contains("cannot iterate over"));
}

#[test]
fn storage_array_modified_in_its_own_loop() {
    let err = first_err(
        "xs: uint256[3]\n@external\ndef f():\n    for v in self.xs:\n        self.xs[0] = v\n",
        ErrorKind::StateAccess,
    );
    assert!(err.message.contains("while iterating"), "{}", err.message);
}

#[test]
fn callee_modifying_the_iterated_array() {
    let err = first_err(
        "xs: uint256[3]\n@internal\ndef reset():\n    self.xs[1] = 0\n@external\ndef f():\n    for v in self.xs:\n        self.reset()\n",
        ErrorKind::StateAccess,
    );
    assert!(err.message.contains("'reset' modifies it"), "{}", err.message);
}

#[test]
fn loop_variable_is_read_only() {
    first_err(
        "@external\ndef f():\n    for i in range(3):\n        i = 2\n",
        ErrorKind::StateAccess,
    );
}

#[test]
fn break_outside_loop() {
    let err = first_err("@external\ndef f():\n    break\n", ErrorKind::Structure);
    assert!(err.message.contains("inside a loop"));
}

#[test]
fn missing_return() {
    let err = first_err(
        "@external\ndef f(x: bool) -> uint256:\n    if x:\n        return 1\n",
        ErrorKind::Structure,
    );
    assert!(err.message.contains("missing return"));
    check_ok("@external\ndef f(x: bool) -> uint256:\n    if x:\n        return 1\n    else:\n        return 2\n");
}

#[test]
fn code_after_return_is_unreachable() {
    let err = first_err(
        "@external\ndef f() -> uint256:\n    return 1\n    pass\n",
        ErrorKind::Structure,
    );
    assert_eq!(err.message, "unreachable code");
}

#[test]
fn view_cannot_log() {
    first_err(
        "event Ping:\n    n: uint256\n@external\n@view\ndef f():\n    log Ping(1)\n",
        ErrorKind::StateAccess,
    );
}

#[test]
fn log_arguments_by_keyword() {
    check_ok(
        "event Sent:\n    to: indexed(address)\n    amount: uint256\n@external\ndef f():\n    log Sent(amount=5, to=msg.sender)\n",
    );
    first_err(
        "event Sent:\n    to: indexed(address)\n    amount: uint256\n@external\ndef f():\n    log Sent(msg.sender)\n",
        ErrorKind::Structure,
    );
}

#[test]
fn event_call_without_log_suggests_it() {
    let err = first_err(
        "event Ping:\n    n: uint256\n@external\ndef f():\n    Ping(1)\n",
        ErrorKind::Structure,
    );
    assert!(err.help.as_deref().is_some_and(|h| h.contains("log")), "{:?}", err);
}

#[test]
fn pure_builtin_result_must_be_used() {
    first_err(
        "@external\ndef f(x: uint256):\n    min(x, 1)\n",
        ErrorKind::Structure,
    );
}

#[test]
fn arguments_are_read_only() {
    let err = first_err(
        "@external\ndef f(x: uint256):\n    x = 1\n",
        ErrorKind::StateAccess,
    );
    assert!(err.message.contains("argument"));
}

#[test]
fn augmented_assignment_needs_a_number() {
    first_err(
        "@external\ndef f():\n    a: bool = True\n    a += True\n",
        ErrorKind::TypeMismatch,
    );
}

#[test]
fn division_by_literal_zero() {
    first_err(
        "@external\ndef f():\n    a: uint256 = 1\n    a /= 0\n",
        ErrorKind::InvalidLiteral,
    );
}

#[test]
fn assert_reasons() {
    check_ok("@external\ndef f(x: uint256):\n    assert x > 1, \"too small\"\n");
    check_ok("@external\ndef f(x: uint256):\n    assert x > 1, UNREACHABLE\n");
    first_err(
        "@external\ndef f(x: uint256):\n    assert x > 1, \"\"\n",
        ErrorKind::Structure,
    );
}

#[test]
fn local_must_be_initialized() {
    first_err("@external\ndef f():\n    a: uint256\n", ErrorKind::Structure);
}

#[test]
fn locals_do_not_leak_between_branches() {
    first_err(
        "@external\ndef f(x: bool) -> uint256:\n    if x:\n        a: uint256 = 1\n    return a\n",
        ErrorKind::Namespace,
    );
}

#[test]
fn errors_from_every_function_are_reported() {
    let diags = check_err(
        "@external\ndef f():\n    break\n@external\ndef g(x: uint256):\n    x = 2\n",
    );
    assert_eq!(diags.len(), 2);
    assert_eq!(diags[0].kind, ErrorKind::Structure);
    assert_eq!(diags[1].kind, ErrorKind::StateAccess);
}
