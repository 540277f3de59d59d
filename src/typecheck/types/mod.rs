//! Value types of the contract language.
//!
//! `Type` is the structural shape of a value. `TypeDef` pairs a shape with
//! the place it lives (`DataLocation`) and its declaration flags. Concrete
//! types are built either from an annotation (`from_annotation`) or from a
//! literal (`Type::from_literal`, `literal_types`).

mod annotation;
mod literal;
#[cfg(test)]
mod tests;

use std::fmt;

use num_bigint::BigInt;
use num_traits::One;

pub use annotation::{from_annotation, type_from_annotation};
pub use literal::{checksum_address, literal_types, parse_decimal};

/// Number of decimal places carried by the `decimal` type.
pub const DECIMAL_PLACES: u32 = 10;

/// Scale factor between a decimal value and its integer representation.
pub fn decimal_divisor() -> BigInt {
    BigInt::from(10u64.pow(DECIMAL_PLACES))
}

/// Where a value lives at runtime.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DataLocation {
    #[default]
    Unset,
    Memory,
    Storage,
    Calldata,
    Code,
}

impl fmt::Display for DataLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DataLocation::Unset => "unset",
            DataLocation::Memory => "memory",
            DataLocation::Storage => "storage",
            DataLocation::Calldata => "calldata",
            DataLocation::Code => "code",
        };
        f.write_str(s)
    }
}

/// Exact runtime position of a variable, assigned once during analysis.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataPosition {
    /// Static head offset of an argument within the ABI-encoded calldata.
    Calldata(u64),
    Memory(u64),
    Storage(u64),
    /// Offset of an immutable within the data appended to runtime code.
    Code(u64),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IntType {
    pub bits: u16,
    pub signed: bool,
}

impl IntType {
    pub const UINT8: IntType = IntType::new(8, false);
    pub const INT128: IntType = IntType::new(128, true);
    pub const INT256: IntType = IntType::new(256, true);
    pub const UINT256: IntType = IntType::new(256, false);

    pub const fn new(bits: u16, signed: bool) -> Self {
        Self { bits, signed }
    }

    /// Inclusive `(lower, upper)` bounds.
    pub fn bounds(&self) -> (BigInt, BigInt) {
        let one = BigInt::one();
        if self.signed {
            let half = &one << (self.bits as usize - 1);
            (-half.clone(), half - one)
        } else {
            (BigInt::from(0), (&one << self.bits as usize) - one)
        }
    }

    pub fn contains(&self, value: &BigInt) -> bool {
        let (lo, hi) = self.bounds();
        *value >= lo && *value <= hi
    }

    /// Every integer type, in the order unconstrained literals prefer them.
    pub fn all() -> Vec<IntType> {
        let mut out = vec![IntType::INT128, IntType::INT256, IntType::UINT256];
        for bits in (8..=256).step_by(8) {
            for signed in [false, true] {
                let t = IntType::new(bits, signed);
                if !out.contains(&t) {
                    out.push(t);
                }
            }
        }
        out
    }
}

impl fmt::Display for IntType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = if self.signed { "int" } else { "uint" };
        write!(f, "{}{}", prefix, self.bits)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StructType {
    pub name: String,
    pub members: Vec<(String, Type)>,
}

impl StructType {
    pub fn member(&self, name: &str) -> Option<(usize, &Type)> {
        self.members
            .iter()
            .enumerate()
            .find(|(_, (n, _))| n == name)
            .map(|(i, (_, t))| (i, t))
    }

    pub fn member_types(&self) -> Vec<Type> {
        self.members.iter().map(|(_, t)| t.clone()).collect()
    }
}

/// Enum values are bit flags: member `i` has the value `1 << i`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EnumType {
    pub name: String,
    pub members: Vec<String>,
}

impl EnumType {
    pub fn value_of(&self, member: &str) -> Option<BigInt> {
        let idx = self.members.iter().position(|m| m == member)?;
        Some(BigInt::one() << idx)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Type {
    Bool,
    Int(IntType),
    Decimal,
    Address,
    /// `bytes1`..`bytes32`, left-aligned in a word.
    BytesM(u8),
    /// `Bytes[N]`
    Bytes(u64),
    /// `String[N]`
    String(u64),
    Array(Box<Type>, u64),
    DynArray(Box<Type>, u64),
    HashMap(Box<Type>, Box<Type>),
    Struct(StructType),
    Tuple(Vec<Type>),
    /// An address with the callable members of the named interface.
    Interface(String),
    Enum(EnumType),
}

/// Largest size in bytes of any declared type.
pub const MAX_TYPE_SIZE: u64 = 1 << 40;

fn ceil32(n: u64) -> Option<u64> {
    n.div_ceil(32).checked_mul(32)
}

/// `a * b + c`, or `None` when it does not fit in a `u64`.
fn mul_add(a: u64, b: u64, c: u64) -> Option<u64> {
    a.checked_mul(b)?.checked_add(c)
}

fn checked_sum(sizes: impl IntoIterator<Item = Option<u64>>) -> Option<u64> {
    sizes.into_iter().try_fold(0u64, |acc, s| acc.checked_add(s?))
}

impl Type {
    pub fn uint256() -> Type {
        Type::Int(IntType::UINT256)
    }

    pub fn int128() -> Type {
        Type::Int(IntType::INT128)
    }

    pub fn bytes32() -> Type {
        Type::BytesM(32)
    }

    pub fn as_int(&self) -> Option<IntType> {
        match self {
            Type::Int(it) => Some(*it),
            _ => None,
        }
    }

    /// Fits in one stack word and is passed by value.
    pub fn is_value_type(&self) -> bool {
        matches!(
            self,
            Type::Bool
                | Type::Int(_)
                | Type::Decimal
                | Type::Address
                | Type::BytesM(_)
                | Type::Interface(_)
                | Type::Enum(_)
        )
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Type::Int(_) | Type::Decimal)
    }

    /// Signed for the purpose of comparisons and division.
    pub fn is_signed(&self) -> bool {
        match self {
            Type::Int(it) => it.signed,
            Type::Decimal => true,
            _ => false,
        }
    }

    pub fn is_bytestring(&self) -> bool {
        matches!(self, Type::Bytes(_) | Type::String(_))
    }

    /// Has a length word followed by a variable amount of payload.
    pub fn has_length_word(&self) -> bool {
        matches!(self, Type::Bytes(_) | Type::String(_) | Type::DynArray(..))
    }

    /// Encoded with a head offset and a tail in the ABI.
    pub fn is_dynamic(&self) -> bool {
        match self {
            Type::Bytes(_) | Type::String(_) | Type::DynArray(..) => true,
            Type::Array(elem, _) => elem.is_dynamic(),
            Type::Struct(s) => s.members.iter().any(|(_, t)| t.is_dynamic()),
            Type::Tuple(ts) => ts.iter().any(|t| t.is_dynamic()),
            _ => false,
        }
    }

    pub fn contains_hashmap(&self) -> bool {
        match self {
            Type::HashMap(..) => true,
            Type::Array(elem, _) | Type::DynArray(elem, _) => elem.contains_hashmap(),
            Type::Struct(s) => s.members.iter().any(|(_, t)| t.contains_hashmap()),
            Type::Tuple(ts) => ts.iter().any(|t| t.contains_hashmap()),
            _ => false,
        }
    }

    /// Maximum capacity in bytes (or elements, for dynamic arrays).
    pub fn capacity(&self) -> Option<u64> {
        match self {
            Type::Bytes(n) | Type::String(n) | Type::DynArray(_, n) => Some(*n),
            _ => None,
        }
    }

    /// Memory footprint. Bytestrings reserve a length word plus the
    /// payload rounded up to the word size. Saturates at `u64::MAX`; types
    /// accepted from annotations always fit.
    pub fn size_in_bytes(&self) -> u64 {
        self.checked_size_in_bytes().unwrap_or(u64::MAX)
    }

    /// `size_in_bytes`, or `None` if it overflows a `u64`.
    pub fn checked_size_in_bytes(&self) -> Option<u64> {
        match self {
            Type::Bytes(n) | Type::String(n) => ceil32(*n)?.checked_add(32),
            Type::Array(elem, n) => mul_add(*n, elem.checked_size_in_bytes()?, 0),
            Type::DynArray(elem, n) => mul_add(*n, elem.checked_size_in_bytes()?, 32),
            Type::Struct(s) => checked_sum(s.members.iter().map(|(_, t)| t.checked_size_in_bytes())),
            Type::Tuple(ts) => checked_sum(ts.iter().map(|t| t.checked_size_in_bytes())),
            _ => Some(32),
        }
    }

    /// Words occupied in memory, equal to slots occupied in storage.
    pub fn size_in_words(&self) -> u64 {
        self.size_in_bytes().div_ceil(32)
    }

    /// Bytes occupied in the head of an enclosing ABI tuple.
    pub fn abi_head_size(&self) -> u64 {
        if self.is_dynamic() {
            32
        } else {
            self.size_in_bytes()
        }
    }

    /// Upper bound on the encoded size, excluding the parent's head word
    /// for dynamic types. Saturates like `size_in_bytes`.
    pub fn abi_max_size(&self) -> u64 {
        self.checked_abi_max_size().unwrap_or(u64::MAX)
    }

    pub fn checked_abi_max_size(&self) -> Option<u64> {
        let slot = |t: &Type| {
            let head = if t.is_dynamic() { Some(32) } else { t.checked_size_in_bytes() };
            t.checked_abi_tail_size()?.checked_add(head?)
        };
        match self {
            Type::Bytes(n) | Type::String(n) => ceil32(*n)?.checked_add(32),
            Type::DynArray(elem, n) => mul_add(*n, slot(elem)?, 32),
            Type::Array(elem, n) if elem.is_dynamic() => mul_add(*n, slot(elem)?, 0),
            Type::Struct(s) if self.is_dynamic() => checked_sum(s.members.iter().map(|(_, t)| slot(t))),
            Type::Tuple(ts) if self.is_dynamic() => checked_sum(ts.iter().map(slot)),
            _ => self.checked_size_in_bytes(),
        }
    }

    fn checked_abi_tail_size(&self) -> Option<u64> {
        if self.is_dynamic() {
            self.checked_abi_max_size()
        } else {
            Some(0)
        }
    }

    /// Whether the memory footprint and encoded size stay within
    /// `MAX_TYPE_SIZE`, so offsets summed over many values cannot overflow.
    pub fn has_bounded_size(&self) -> bool {
        let fits = |size: Option<u64>| size.is_some_and(|s| s <= MAX_TYPE_SIZE);
        fits(self.checked_size_in_bytes()) && fits(self.checked_abi_max_size())
    }

    /// Canonical ABI type string used in signatures.
    pub fn canonical(&self) -> String {
        match self {
            Type::Bool => "bool".into(),
            Type::Int(it) => it.to_string(),
            Type::Decimal => format!("fixed168x{}", DECIMAL_PLACES),
            Type::Address | Type::Interface(_) => "address".into(),
            Type::BytesM(m) => format!("bytes{}", m),
            Type::Bytes(_) => "bytes".into(),
            Type::String(_) => "string".into(),
            Type::Array(elem, n) => format!("{}[{}]", elem.canonical(), n),
            Type::DynArray(elem, _) => format!("{}[]", elem.canonical()),
            Type::Struct(s) => tuple_canonical(s.members.iter().map(|(_, t)| t)),
            Type::Tuple(ts) => tuple_canonical(ts.iter()),
            Type::Enum(_) => "uint256".into(),
            Type::HashMap(..) => self.to_string(),
        }
    }

    /// Inclusive bounds of numeric types, in their stored representation
    /// (decimals are scaled).
    pub fn bounds(&self) -> Option<(BigInt, BigInt)> {
        match self {
            Type::Int(it) => Some(it.bounds()),
            Type::Decimal => {
                let (lo, hi) = IntType::INT128.bounds();
                let d = decimal_divisor();
                Some((lo * &d, hi * d))
            }
            _ => None,
        }
    }

    /// Can a value of type `source` be stored into a slot of this type?
    ///
    /// Structural parameters must match exactly, except that variable-length
    /// destinations accept any source of equal or smaller capacity.
    pub fn compare_type(&self, source: &Type) -> bool {
        match (self, source) {
            (Type::Bytes(a), Type::Bytes(b)) | (Type::String(a), Type::String(b)) => a >= b,
            (Type::DynArray(t1, a), Type::DynArray(t2, b)) => t1 == t2 && a >= b,
            (Type::Array(t1, a), Type::Array(t2, b)) => a == b && t1.compare_type(t2),
            (Type::Tuple(a), Type::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.compare_type(y))
            }
            _ => self == source,
        }
    }
}

/// ABI JSON parameter descriptor. Structs and tuples, and arrays of
/// them, expand into `components`.
pub fn abi_param(name: &str, typ: &Type) -> serde_json::Value {
    let (inner, suffix) = match typ {
        Type::Array(elem, n) => (&**elem, format!("[{}]", n)),
        Type::DynArray(elem, _) => (&**elem, "[]".to_string()),
        _ => (typ, String::new()),
    };
    let members: Vec<(String, &Type)> = match inner {
        Type::Struct(s) => s.members.iter().map(|(n, t)| (n.clone(), t)).collect(),
        Type::Tuple(ts) => ts.iter().enumerate().map(|(i, t)| (i.to_string(), t)).collect(),
        _ => return serde_json::json!({ "name": name, "type": typ.canonical() }),
    };
    let components: Vec<serde_json::Value> =
        members.iter().map(|(n, t)| abi_param(n, t)).collect();
    serde_json::json!({
        "name": name,
        "type": format!("tuple{}", suffix),
        "components": components,
    })
}

fn tuple_canonical<'a>(members: impl Iterator<Item = &'a Type>) -> String {
    let parts: Vec<String> = members.map(|t| t.canonical()).collect();
    format!("({})", parts.join(","))
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Bool => write!(f, "bool"),
            Type::Int(it) => write!(f, "{}", it),
            Type::Decimal => write!(f, "decimal"),
            Type::Address => write!(f, "address"),
            Type::BytesM(m) => write!(f, "bytes{}", m),
            Type::Bytes(n) => write!(f, "Bytes[{}]", n),
            Type::String(n) => write!(f, "String[{}]", n),
            Type::Array(elem, n) => write!(f, "{}[{}]", elem, n),
            Type::DynArray(elem, n) => write!(f, "DynArray[{}, {}]", elem, n),
            Type::HashMap(k, v) => write!(f, "HashMap[{}, {}]", k, v),
            Type::Struct(s) => write!(f, "{}", s.name),
            Type::Tuple(ts) => {
                let parts: Vec<String> = ts.iter().map(|t| t.to_string()).collect();
                write!(f, "({})", parts.join(", "))
            }
            Type::Interface(name) => write!(f, "{}", name),
            Type::Enum(e) => write!(f, "{}", e.name),
        }
    }
}

/// Declaration flags carried alongside a type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TypeFlags {
    pub is_constant: bool,
    pub is_public: bool,
    pub is_immutable: bool,
}

/// A type bound to a data location.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeDef {
    pub typ: Type,
    pub location: DataLocation,
    pub is_constant: bool,
    pub is_public: bool,
    pub is_immutable: bool,
}

impl TypeDef {
    pub fn new(typ: Type, location: DataLocation) -> Self {
        Self {
            typ,
            location,
            is_constant: false,
            is_public: false,
            is_immutable: false,
        }
    }

    pub fn with_flags(mut self, flags: TypeFlags) -> Self {
        self.is_constant = flags.is_constant;
        self.is_public = flags.is_public;
        self.is_immutable = flags.is_immutable;
        self
    }

    /// Set the location once. Rebinding to a different location is refused.
    pub fn bind_location(&mut self, location: DataLocation) -> Result<(), String> {
        if self.location != DataLocation::Unset && self.location != location {
            return Err(format!(
                "type {} is already bound to {}, cannot rebind to {}",
                self.typ, self.location, location
            ));
        }
        self.location = location;
        Ok(())
    }
}
