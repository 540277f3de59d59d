use std::collections::BTreeSet;

use serde_json::json;

use super::{check_ok, check_with, first_err};
use crate::diagnostic::ErrorKind;
use crate::typecheck::{AnalysisOptions, ImportSource, Mutability, Type};

#[test]
fn mutual_recursion_is_a_cycle() {
    let err = first_err(
        "@internal\ndef a():\n    self.b()\n@internal\ndef b():\n    self.a()\n",
        ErrorKind::CallViolation,
    );
    assert!(err.message.contains("a -> b -> a"), "{}", err.message);
}

#[test]
fn three_function_cycle_names_every_step() {
    let err = first_err(
        "@internal\ndef a():\n    self.b()\n@internal\ndef b():\n    self.c()\n@internal\ndef c():\n    self.a()\n",
        ErrorKind::CallViolation,
    );
    assert!(err.message.contains("a -> b -> c -> a"), "{}", err.message);
}

#[test]
fn self_recursion_is_a_cycle() {
    let err = first_err("@internal\ndef a():\n    self.a()\n", ErrorKind::CallViolation);
    assert!(err.message.contains("a -> a"), "{}", err.message);
}

#[test]
fn reachable_functions_and_emission_order() {
    let a = check_ok(
        "@internal\ndef leaf() -> uint256:\n    return 1\n\
         @internal\ndef mid() -> uint256:\n    return self.leaf() + 1\n\
         @external\ndef top() -> uint256:\n    return self.mid()\n",
    );
    let top = &a.contract.functions["top"];
    let expected: BTreeSet<String> = ["leaf", "mid"].iter().map(|s| s.to_string()).collect();
    assert_eq!(top.reachable_internal_functions, expected);
    assert!(top.called_functions.contains("mid") && top.called_functions.len() == 1);
    assert!(a.contract.functions["leaf"].reachable_internal_functions.is_empty());

    let pos = |n: &str| a.codegen_order.iter().position(|x| x == n).unwrap();
    assert!(pos("leaf") < pos("mid"));
    assert!(pos("mid") < pos("top"));
}

#[test]
fn external_functions_cannot_be_called_through_self() {
    let err = first_err(
        "@external\ndef a():\n    pass\n@external\ndef b():\n    self.a()\n",
        ErrorKind::CallViolation,
    );
    assert!(err.message.contains("through 'self'"));
}

#[test]
fn view_cannot_call_mutating_function() {
    first_err(
        "x: uint256\n@internal\ndef bump():\n    self.x += 1\n@external\n@view\ndef f():\n    self.bump()\n",
        ErrorKind::CallViolation,
    );
}

#[test]
fn pure_cannot_read_storage() {
    let err = first_err(
        "x: uint256\n@external\n@pure\ndef f() -> uint256:\n    return self.x\n",
        ErrorKind::StateAccess,
    );
    assert!(err.message.contains("pure"));
}

#[test]
fn msg_value_needs_payable() {
    first_err(
        "@external\ndef f() -> uint256:\n    return msg.value\n",
        ErrorKind::StateAccess,
    );
    check_ok("@external\n@payable\ndef f() -> uint256:\n    return msg.value\n");
}

#[test]
fn wrong_argument_count() {
    let err = first_err(
        "@internal\ndef g(a: uint256) -> uint256:\n    return a\n@external\ndef f() -> uint256:\n    return self.g(1, 2)\n",
        ErrorKind::Structure,
    );
    assert!(err.message.contains("expects 1 arguments, got 2"), "{}", err.message);
}

#[test]
fn default_arguments_relax_the_minimum() {
    let a = check_ok(
        "@internal\ndef g(a: uint256, b: uint256 = 7) -> uint256:\n    return a + b\n@external\ndef f() -> uint256:\n    return self.g(1)\n",
    );
    assert_eq!(a.contract.functions["g"].min_args(), 1);
}

#[test]
fn unresolved_import_is_a_namespace_error() {
    let err = first_err("import tokens.Missing as Missing\n", ErrorKind::Namespace);
    assert!(err.message.contains("tokens.Missing"), "{}", err.message);
}

#[test]
fn import_from_abi_json() {
    let abi = json!([
        {
            "type": "function",
            "name": "balanceOf",
            "stateMutability": "view",
            "inputs": [{"name": "owner", "type": "address"}],
            "outputs": [{"name": "", "type": "uint256"}]
        },
        {
            "type": "function",
            "name": "transfer",
            "stateMutability": "nonpayable",
            "inputs": [{"name": "to", "type": "address"}, {"name": "amount", "type": "uint256"}],
            "outputs": [{"name": "", "type": "bool"}]
        },
        {"type": "event", "name": "Transfer", "inputs": []}
    ]);
    let resolver = move |path: &str| -> Option<ImportSource> {
        (path == "tokens.Token").then(|| ImportSource::AbiJson(abi.clone()))
    };
    let options = AnalysisOptions {
        resolver: Some(&resolver),
        ..Default::default()
    };
    let a = check_with(
        "from tokens import Token\n@external\n@view\ndef f(t: address) -> uint256:\n    return Token(t).balanceOf(self)\n",
        options,
    )
    .unwrap();
    let token = &a.contract.interfaces["Token"];
    assert_eq!(token.functions.len(), 2);
    assert_eq!(token.functions["balanceOf"].mutability, Mutability::View);
    assert_eq!(token.functions["transfer"].return_type, Some(Type::Bool));
}

#[test]
fn view_cannot_make_mutating_external_call() {
    let err = first_err(
        "interface Token:\n    def transfer(to: address, amount: uint256) -> bool: nonpayable\n\
         @external\n@view\ndef f(t: address) -> bool:\n    return Token(t).transfer(msg.sender, 1)\n",
        ErrorKind::CallViolation,
    );
    assert!(err.message.contains("Token.transfer"), "{}", err.message);
}

#[test]
fn import_from_source_exposes_external_functions() {
    let resolver = |path: &str| -> Option<ImportSource> {
        (path == "lib.Counter").then(|| {
            ImportSource::Source(
                "n: uint256\n@external\ndef inc():\n    self.n += 1\n@internal\ndef hidden():\n    pass\n"
                    .to_string(),
            )
        })
    };
    let options = AnalysisOptions {
        resolver: Some(&resolver),
        ..Default::default()
    };
    let a = check_with(
        "import lib.Counter as Counter\n@external\ndef f(c: address):\n    Counter(c).inc()\n",
        options,
    )
    .unwrap();
    let counter = &a.contract.interfaces["Counter"];
    assert!(counter.functions.contains_key("inc"));
    assert!(!counter.functions.contains_key("hidden"));
}
