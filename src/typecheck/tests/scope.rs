use proptest::prelude::*;

use crate::span::Span;
use crate::typecheck::namespace::{Binding, Namespace, VarInfo, VarKind};
use crate::typecheck::types::{DataLocation, TypeDef};
use crate::typecheck::Type;

fn local() -> Binding {
    let def = TypeDef::new(Type::uint256(), DataLocation::Memory);
    Binding::Variable(VarInfo::new(def, VarKind::Local, Span::dummy()))
}

fn snapshot(ns: &Namespace) -> Vec<String> {
    ns.names().map(str::to_string).collect()
}

#[test]
fn guard_pops_on_drop() {
    let mut ns = Namespace::new();
    let before = snapshot(&ns);
    {
        let mut scope = ns.enter_scope();
        scope.insert("total", local(), Span::dummy()).unwrap();
        assert!(scope.contains("total"));
        assert_eq!(scope.depth(), 2);
    }
    assert_eq!(snapshot(&ns), before);
    assert_eq!(ns.depth(), 1);
}

#[test]
fn shadowing_is_rejected() {
    let mut ns = Namespace::new();
    ns.insert("total", local(), Span::dummy()).unwrap();
    ns.push_scope();
    let err = ns.insert("total", local(), Span::dummy()).unwrap_err();
    assert!(err.message.contains("already been declared"));
}

#[test]
fn builtins_are_not_rebindable() {
    let mut ns = Namespace::new();
    assert!(ns.insert("uint256", local(), Span::dummy()).is_err());
    assert!(ns.insert("msg", local(), Span::dummy()).is_err());
    assert!(ns.insert("sload", local(), Span::dummy()).is_err());
}

proptest! {
    /// Popping a scope restores exactly the names visible before it was pushed.
    #[test]
    fn pop_restores_outer_scope(
        outer in prop::collection::btree_set("[a-z]{1,4}_v", 0..5),
        inner in prop::collection::btree_set("[a-z]{1,4}_w", 0..8),
    ) {
        let mut ns = Namespace::new();
        for name in &outer {
            ns.insert(name, local(), Span::dummy()).unwrap();
        }
        let before = snapshot(&ns);
        ns.push_scope();
        for name in &inner {
            ns.insert(name, local(), Span::dummy()).unwrap();
        }
        prop_assert_eq!(ns.names().count(), before.len() + inner.len());
        ns.pop_scope();
        prop_assert_eq!(snapshot(&ns), before);
    }
}
