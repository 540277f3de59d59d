use num_bigint::BigInt;
use proptest::prelude::*;

use super::*;
use crate::ast::{Expr, ExprKind, Item};
use crate::diagnostic::ErrorKind;
use crate::lexer::Lexer;
use crate::parser::Parser;
use crate::span::Span;
use crate::typecheck::namespace::Namespace;

fn lit(kind: ExprKind) -> Expr {
    Expr {
        id: 0,
        kind,
        span: Span::dummy(),
    }
}

fn int(v: impl Into<BigInt>) -> Expr {
    lit(ExprKind::Int(v.into()))
}

fn annotation(source: &str) -> Expr {
    let (tokens, _) = Lexer::new(&format!("x: {}\n", source), 0).tokenize();
    let module = Parser::new(tokens).parse_module().expect("parse");
    match &module.items[0].node {
        Item::Variable(v) => v.annotation.clone(),
        other => panic!("expected variable, got {:?}", other),
    }
}

fn resolve(source: &str) -> Result<Type, crate::diagnostic::Diagnostic> {
    type_from_annotation(&annotation(source), &Namespace::new())
}

fn int_types() -> impl Strategy<Value = IntType> {
    (1u16..=32, any::<bool>()).prop_map(|(n, signed)| IntType::new(n * 8, signed))
}

proptest! {
    #[test]
    fn int_literals_within_bounds_are_accepted(it in int_types(), frac in 0u32..=1000) {
        let (lo, hi) = it.bounds();
        let value = &lo + (&hi - &lo) * BigInt::from(frac) / BigInt::from(1000);
        let t = Type::Int(it);
        prop_assert!(t.from_literal(&int(lo.clone())).is_ok());
        prop_assert!(t.from_literal(&int(hi.clone())).is_ok());
        prop_assert!(t.from_literal(&int(value)).is_ok());
    }

    #[test]
    fn int_literals_outside_bounds_overflow(it in int_types()) {
        let (lo, hi) = it.bounds();
        let t = Type::Int(it);
        let below = t.from_literal(&int(lo - 1)).unwrap_err();
        prop_assert_eq!(below.kind, ErrorKind::Overflow);
        prop_assert!(below.message.contains("lower bound"));
        let above = t.from_literal(&int(hi + 1)).unwrap_err();
        prop_assert_eq!(above.kind, ErrorKind::Overflow);
        prop_assert!(above.message.contains("upper bound"));
    }

    #[test]
    fn canonical_int_names_resolve_back(it in int_types()) {
        let t = Type::Int(it);
        prop_assert_eq!(resolve(&t.canonical()).unwrap(), t);
    }
}

#[test]
fn test_int_bounds() {
    assert_eq!(
        IntType::INT128.bounds(),
        (-(BigInt::from(1) << 127usize), (BigInt::from(1) << 127usize) - 1)
    );
    assert_eq!(IntType::UINT8.bounds(), (BigInt::from(0), BigInt::from(255)));
}

#[test]
fn test_literal_preference_order() {
    let types = literal_types(&int(5)).unwrap();
    assert_eq!(types[0], Type::int128());
    let types = literal_types(&int(BigInt::from(1) << 200usize)).unwrap();
    assert_eq!(types[0], Type::Int(IntType::INT256));
    let types = literal_types(&int(BigInt::from(1) << 255usize)).unwrap();
    assert_eq!(types, vec![Type::uint256()]);
    let err = literal_types(&int(BigInt::from(1) << 256usize)).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Overflow);
}

#[test]
fn test_negative_literal_rejected_by_unsigned() {
    let err = Type::uint256().from_literal(&int(-1)).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Overflow);
    assert!(err.message.contains("lower bound of uint256 (0)"));
}

#[test]
fn test_decimal_literals() {
    assert_eq!(parse_decimal("1.5"), Some(BigInt::from(15_000_000_000u64)));
    assert_eq!(parse_decimal("-0.25"), Some(BigInt::from(-2_500_000_000i64)));
    assert_eq!(parse_decimal("0.00000000001"), None);
    assert!(Type::Decimal
        .from_literal(&lit(ExprKind::Decimal("3.1415".into())))
        .is_ok());
    let err = Type::Decimal
        .from_literal(&lit(ExprKind::Decimal("0.00000000001".into())))
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidLiteral);
    assert!(Type::Decimal.from_literal(&int(7)).is_ok());
    let too_big = BigInt::from(1) << 127usize;
    let err = Type::Decimal.from_literal(&int(too_big)).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Overflow);
}

#[test]
fn test_address_checksum() {
    let good = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";
    assert_eq!(checksum_address(good).as_deref(), Some(good));
    assert!(Type::Address
        .from_literal(&lit(ExprKind::Hex(good.into())))
        .is_ok());

    let bad = "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed";
    let err = Type::Address
        .from_literal(&lit(ExprKind::Hex(bad.into())))
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidLiteral);
    assert!(err.message.contains("checksum"));
    assert_eq!(
        err.help.as_deref(),
        Some(format!("the correctly checksummed form is {}", good).as_str())
    );

    let short = Type::Address
        .from_literal(&lit(ExprKind::Hex("0x1234".into())))
        .unwrap_err();
    assert!(short.message.contains("42 characters"));
}

#[test]
fn test_bytes_literals() {
    let b4 = lit(ExprKind::Hex("0x01020304".into()));
    assert!(Type::BytesM(4).from_literal(&b4).is_ok());
    assert!(Type::BytesM(5).from_literal(&b4).is_err());
    let types = literal_types(&b4).unwrap();
    assert_eq!(types[0], Type::BytesM(4));
    assert!(types.contains(&Type::uint256()));

    let s = lit(ExprKind::Str("hello".into()));
    assert!(Type::String(5).from_literal(&s).is_ok());
    assert_eq!(
        Type::String(4).from_literal(&s).unwrap_err().kind,
        ErrorKind::InvalidLiteral
    );
    assert!(Type::Bool.from_literal(&s).is_err());
}

#[test]
fn test_sizes() {
    assert_eq!(Type::uint256().size_in_bytes(), 32);
    assert_eq!(Type::Bytes(1).size_in_bytes(), 64);
    assert_eq!(Type::String(64).size_in_bytes(), 96);
    assert_eq!(Type::Array(Box::new(Type::Bool), 3).size_in_words(), 3);
    assert_eq!(Type::DynArray(Box::new(Type::uint256()), 4).size_in_words(), 5);
    let map = Type::HashMap(Box::new(Type::Address), Box::new(Type::uint256()));
    assert_eq!(map.size_in_words(), 1);
}

#[test]
fn test_canonical_strings() {
    assert_eq!(Type::Decimal.canonical(), "fixed168x10");
    assert_eq!(Type::Bytes(10).canonical(), "bytes");
    assert_eq!(
        Type::Array(Box::new(Type::Address), 2).canonical(),
        "address[2]"
    );
    assert_eq!(
        Type::DynArray(Box::new(Type::uint256()), 9).canonical(),
        "uint256[]"
    );
    assert_eq!(
        Type::Tuple(vec![Type::Bool, Type::String(3)]).canonical(),
        "(bool,string)"
    );
    assert_eq!(Type::Interface("Token".into()).canonical(), "address");
}

#[test]
fn test_compare_type_widens_bytestrings_only() {
    assert!(Type::Bytes(10).compare_type(&Type::Bytes(5)));
    assert!(!Type::Bytes(5).compare_type(&Type::Bytes(10)));
    assert!(!Type::Bytes(5).compare_type(&Type::String(5)));
    let a3 = Type::Array(Box::new(Type::uint256()), 3);
    let a4 = Type::Array(Box::new(Type::uint256()), 4);
    assert!(!a3.compare_type(&a4));
    assert!(Type::DynArray(Box::new(Type::Bool), 4)
        .compare_type(&Type::DynArray(Box::new(Type::Bool), 2)));
    assert!(!Type::int128().compare_type(&Type::uint256()));
}

#[test]
fn test_bind_location_once() {
    let mut def = TypeDef::new(Type::uint256(), DataLocation::Unset);
    def.bind_location(DataLocation::Storage).unwrap();
    def.bind_location(DataLocation::Storage).unwrap();
    assert!(def.bind_location(DataLocation::Memory).is_err());
}

#[test]
fn test_annotations() {
    assert_eq!(resolve("Bytes[100]").unwrap(), Type::Bytes(100));
    assert_eq!(
        resolve("HashMap[address, uint256]").unwrap(),
        Type::HashMap(Box::new(Type::Address), Box::new(Type::uint256()))
    );
    assert_eq!(
        resolve("DynArray[int128, 5]").unwrap(),
        Type::DynArray(Box::new(Type::int128()), 5)
    );
    assert_eq!(
        resolve("uint8[2][3]").unwrap(),
        Type::Array(Box::new(Type::Array(Box::new(Type::Int(IntType::UINT8)), 2)), 3)
    );
}

#[test]
fn test_annotation_errors() {
    assert_eq!(resolve("Bytes[0]").unwrap_err().kind, ErrorKind::InvalidLiteral);
    assert_eq!(resolve("Bytes[-1]").unwrap_err().kind, ErrorKind::InvalidLiteral);
    assert!(resolve("Bytes[3][2]")
        .unwrap_err()
        .message
        .contains("multidimensional"));
    assert!(resolve("HashMap[address]").is_err());
    assert_eq!(resolve("Foo").unwrap_err().kind, ErrorKind::Namespace);
    assert!(resolve("Bytes").unwrap_err().message.contains("requires parameters"));
}

#[test]
fn test_hashmap_outside_storage_rejected() {
    let ns = Namespace::new();
    let ann = annotation("HashMap[address, bool]");
    assert!(from_annotation(&ann, &ns, DataLocation::Storage, TypeFlags::default()).is_ok());
    let err =
        from_annotation(&ann, &ns, DataLocation::Memory, TypeFlags::default()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Structure);
}
