use serde_json::json;

use super::{check_ok, check_with, first_err};
use crate::diagnostic::{Diagnostic, ErrorKind};
use crate::typecheck::{Analysis, AnalysisOptions, StorageLayoutOverride};

fn with_override(source: &str, layout: serde_json::Value) -> Result<Analysis, Vec<Diagnostic>> {
    let overrides: StorageLayoutOverride = serde_json::from_value(layout).unwrap();
    check_with(
        source,
        AnalysisOptions {
            storage_layout: Some(&overrides),
            ..Default::default()
        },
    )
}

const LOCKED: &str = "\
a: uint256
b: uint256[3]
c: address
@external
@nonreentrant(\"lock\")
def f():
    pass
@external
@nonreentrant(\"other\")
def g():
    pass
@external
@nonreentrant(\"lock\")
def h():
    pass
";

#[test]
fn storage_is_allocated_sequentially() {
    let a = check_ok("a: uint256\nb: uint256[3]\nc: address\n");
    let layout = &a.contract.layout;
    assert_eq!(layout.slot_of("a"), Some(0));
    assert_eq!(layout.slot_of("b"), Some(1));
    assert_eq!(layout.slot_of("c"), Some(4));
}

#[test]
fn locks_take_the_first_slots() {
    let a = check_ok(LOCKED);
    let layout = &a.contract.layout;
    assert_eq!(layout.lock_slot("lock"), Some(0));
    assert_eq!(layout.lock_slot("other"), Some(1));
    assert_eq!(layout.reserved_prefix(), 2);
    assert_eq!(layout.slot_of("a"), Some(2));
    assert_eq!(layout.slot_of("c"), Some(6));
}

#[test]
fn layout_json_lists_locks_and_variables() {
    let a = check_ok(LOCKED);
    let out = a.contract.layout.to_json();
    assert_eq!(out["storage_layout"]["nonreentrant.lock"]["slot"], 0);
    assert_eq!(out["storage_layout"]["b"]["type"], "uint256[3]");
    assert_eq!(out["storage_layout"]["b"]["slot"], 3);
}

#[test]
fn override_places_variables() {
    let a = with_override(
        "a: uint256\nb: address\n",
        json!({
            "a": {"type": "uint256", "slot": 10},
            "b": {"type": "address", "location": "storage", "slot": 3}
        }),
    )
    .unwrap();
    assert_eq!(a.contract.layout.slot_of("a"), Some(10));
    assert_eq!(a.contract.layout.slot_of("b"), Some(3));
}

#[test]
fn override_must_not_overlap_locks() {
    let diags = with_override(
        LOCKED,
        json!({
            "nonreentrant.lock": {"type": "nonreentrant lock", "slot": 0},
            "a": {"type": "uint256", "slot": 1},
            "b": {"type": "uint256[3]", "slot": 10},
            "c": {"type": "address", "slot": 20}
        }),
    )
    .unwrap_err();
    assert_eq!(diags[0].kind, ErrorKind::Structure);
    assert!(diags[0].message.contains("storage collision"), "{}", diags[0].message);
}

#[test]
fn override_entries_must_not_overlap() {
    let diags = with_override(
        "a: uint256\nb: uint256[3]\n",
        json!({
            "a": {"type": "uint256", "slot": 2},
            "b": {"type": "uint256[3]", "slot": 0}
        }),
    )
    .unwrap_err();
    assert_eq!(diags[0].kind, ErrorKind::Structure);
    assert!(diags[0].message.contains("overlaps 'a'"), "{}", diags[0].message);
}

#[test]
fn override_type_must_match_declaration() {
    let diags = with_override(
        "a: uint256\n",
        json!({ "a": {"type": "address", "slot": 0} }),
    )
    .unwrap_err();
    assert_eq!(diags[0].kind, ErrorKind::TypeMismatch);
}

#[test]
fn override_must_place_every_variable() {
    let diags = with_override(
        "a: uint256\nb: uint256\n",
        json!({ "a": {"type": "uint256", "slot": 0} }),
    )
    .unwrap_err();
    assert!(diags[0].message.contains("does not place 'b'"), "{}", diags[0].message);
}

#[test]
fn override_slot_must_leave_room_for_the_value() {
    let diags = with_override(
        "x: uint256[2]\n",
        json!({ "x": {"type": "uint256[2]", "slot": u64::MAX} }),
    )
    .unwrap_err();
    assert_eq!(diags[0].kind, ErrorKind::Structure);
    assert!(diags[0].message.contains("runs past the last slot"), "{}", diags[0].message);
}

// ── Sizes ──

#[test]
fn oversized_arrays_are_rejected() {
    for source in [
        "x: uint256[18446744073709551615]\n",
        "x: DynArray[uint256[4294967296], 4294967296]\n",
        "x: Bytes[18446744073709551615]\n",
    ] {
        let err = first_err(source, ErrorKind::Overflow);
        assert!(err.message.contains("too large"), "{}", err.message);
    }
}

#[test]
fn struct_size_counts_every_member() {
    // Each member alone is exactly at the size limit.
    let err = first_err(
        "struct Big:\n    a: uint256[34359738368]\n    b: uint256[34359738368]\nx: Big\n",
        ErrorKind::Overflow,
    );
    assert!(err.message.contains("struct 'Big' is too large"), "{}", err.message);
}

#[test]
fn largest_accepted_array_is_allocated() {
    let a = check_ok("x: uint256[34359738368]\ny: uint256\n");
    assert_eq!(a.contract.layout.slot_of("y"), Some(1 << 35));
}

#[test]
fn raw_call_output_size_is_bounded() {
    let err = first_err(
        "@external\ndef f(a: address, data: Bytes[4]) -> Bytes[32]:\n    return raw_call(a, data, max_outsize=18446744073709551615)\n",
        ErrorKind::Overflow,
    );
    assert!(err.message.contains("max_outsize"), "{}", err.message);
}
