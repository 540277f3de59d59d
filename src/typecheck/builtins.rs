//! Builtin functions: typing rules, mutability and side effects.

use num_bigint::BigInt;
use num_traits::{ToPrimitive, Zero};

use super::expr::ExprTyper;
use super::function::Mutability;
use super::types::{type_from_annotation, IntType, Type, MAX_TYPE_SIZE};
use crate::ast::{Expr, ExprKind, Keyword};
use crate::diagnostic::{Diagnostic, ErrorKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Builtin {
    Len,
    Concat,
    Slice,
    Keccak256,
    Sha256,
    Convert,
    Min,
    Max,
    Abs,
    Floor,
    Ceil,
    Empty,
    Uint256Addmod,
    Uint256Mulmod,
    AsWeiValue,
    MethodId,
    Extract32,
    Blockhash,
    Send,
    RawCall,
    RawLog,
    Selfdestruct,
    Range,
}

/// Resolved argument and return types of one builtin call. `None` marks a
/// position that holds a type annotation or a compile-time option rather
/// than a runtime value.
#[derive(Clone, Debug, PartialEq)]
pub struct BuiltinSig {
    pub args: Vec<Option<Type>>,
    pub kwargs: Vec<(String, Option<Type>)>,
    pub ret: Option<Type>,
}

impl BuiltinSig {
    fn new(args: Vec<Option<Type>>, ret: Option<Type>) -> Self {
        Self {
            args,
            kwargs: Vec::new(),
            ret,
        }
    }
}

/// Wei per unit for `as_wei_value`.
pub fn wei_denomination(unit: &str) -> Option<BigInt> {
    let exp = match unit {
        "wei" => 0,
        "kwei" | "babbage" => 3,
        "mwei" | "lovelace" => 6,
        "gwei" | "shannon" => 9,
        "microether" | "szabo" => 12,
        "milliether" | "finney" => 15,
        "ether" => 18,
        _ => return None,
    };
    Some(BigInt::from(10u32).pow(exp))
}

fn structure(message: impl Into<String>, expr: &Expr) -> Diagnostic {
    Diagnostic::error(ErrorKind::Structure, message, expr.span)
}

fn mismatch(message: impl Into<String>, expr: &Expr) -> Diagnostic {
    Diagnostic::error(ErrorKind::TypeMismatch, message, expr.span)
}

impl Builtin {
    pub const ALL: &'static [Builtin] = &[
        Builtin::Len,
        Builtin::Concat,
        Builtin::Slice,
        Builtin::Keccak256,
        Builtin::Sha256,
        Builtin::Convert,
        Builtin::Min,
        Builtin::Max,
        Builtin::Abs,
        Builtin::Floor,
        Builtin::Ceil,
        Builtin::Empty,
        Builtin::Uint256Addmod,
        Builtin::Uint256Mulmod,
        Builtin::AsWeiValue,
        Builtin::MethodId,
        Builtin::Extract32,
        Builtin::Blockhash,
        Builtin::Send,
        Builtin::RawCall,
        Builtin::RawLog,
        Builtin::Selfdestruct,
        Builtin::Range,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Builtin::Len => "len",
            Builtin::Concat => "concat",
            Builtin::Slice => "slice",
            Builtin::Keccak256 => "keccak256",
            Builtin::Sha256 => "sha256",
            Builtin::Convert => "convert",
            Builtin::Min => "min",
            Builtin::Max => "max",
            Builtin::Abs => "abs",
            Builtin::Floor => "floor",
            Builtin::Ceil => "ceil",
            Builtin::Empty => "empty",
            Builtin::Uint256Addmod => "uint256_addmod",
            Builtin::Uint256Mulmod => "uint256_mulmod",
            Builtin::AsWeiValue => "as_wei_value",
            Builtin::MethodId => "method_id",
            Builtin::Extract32 => "extract32",
            Builtin::Blockhash => "blockhash",
            Builtin::Send => "send",
            Builtin::RawCall => "raw_call",
            Builtin::RawLog => "raw_log",
            Builtin::Selfdestruct => "selfdestruct",
            Builtin::Range => "range",
        }
    }

    /// May be used as a bare expression statement.
    pub fn is_side_effecting(self) -> bool {
        matches!(
            self,
            Builtin::Send | Builtin::RawCall | Builtin::RawLog | Builtin::Selfdestruct
        )
    }

    /// Lowest function mutability allowed to make this call.
    pub fn mutability(self, keywords: &[Keyword]) -> Mutability {
        match self {
            Builtin::Blockhash => Mutability::View,
            Builtin::RawCall if bool_keyword(keywords, "is_static_call") == Some(true) => {
                Mutability::View
            }
            Builtin::Send | Builtin::RawCall | Builtin::RawLog | Builtin::Selfdestruct => {
                Mutability::Nonpayable
            }
            _ => Mutability::Pure,
        }
    }

    /// Validate a call and resolve its signature.
    pub fn signature(
        self,
        typer: &ExprTyper<'_>,
        call: &Expr,
        args: &[Expr],
        keywords: &[Keyword],
    ) -> Result<BuiltinSig, Diagnostic> {
        let allowed: &[&str] = match self {
            Builtin::RawCall => &[
                "max_outsize",
                "gas",
                "value",
                "is_delegate_call",
                "is_static_call",
                "revert_on_failure",
            ],
            Builtin::MethodId | Builtin::Extract32 => &["output_type"],
            _ => &[],
        };
        if let Some(kw) = keywords.iter().find(|k| !allowed.contains(&k.name.node.as_str())) {
            return Err(Diagnostic::error(
                ErrorKind::Structure,
                format!("{}() got an unexpected keyword argument '{}'", self.name(), kw.name.node),
                kw.name.span,
            ));
        }

        match self {
            Builtin::Len => {
                self.arity(call, args, 1, 1)?;
                let t = typer.exact_type(&args[0])?;
                if !t.has_length_word() {
                    return Err(mismatch(format!("len() is not defined for {}", t), &args[0]));
                }
                Ok(BuiltinSig::new(vec![Some(t)], Some(Type::uint256())))
            }
            Builtin::Concat => {
                self.arity(call, args, 2, usize::MAX)?;
                let mut types = Vec::with_capacity(args.len());
                let mut total = 0u64;
                for arg in args {
                    let t = typer.exact_type(arg)?;
                    let len = match &t {
                        Type::Bytes(n) | Type::String(n) => *n,
                        Type::BytesM(m) => *m as u64,
                        _ => {
                            return Err(mismatch(
                                format!("concat() arguments must be bytes or strings, not {}", t),
                                arg,
                            ))
                        }
                    };
                    total = total.checked_add(len).ok_or_else(|| {
                        Diagnostic::error(ErrorKind::Overflow, "concat() result is too large", call.span)
                    })?;
                    types.push(t);
                }
                let strings = types.iter().filter(|t| matches!(t, Type::String(_))).count();
                let ret = if strings == types.len() {
                    Type::String(total)
                } else if strings == 0 {
                    Type::Bytes(total)
                } else {
                    return Err(mismatch("concat() cannot mix strings and bytes", call));
                };
                Ok(BuiltinSig::new(types.into_iter().map(Some).collect(), Some(ret)))
            }
            Builtin::Slice => {
                self.arity(call, args, 3, 3)?;
                let src = typer.exact_type(&args[0])?;
                let cap = match &src {
                    Type::Bytes(n) | Type::String(n) => *n,
                    Type::BytesM(32) => 32,
                    _ => {
                        return Err(mismatch(
                            format!("slice() is not defined for {}", src),
                            &args[0],
                        ))
                    }
                };
                typer.validate_expected(&args[1], &Type::uint256())?;
                typer.validate_expected(&args[2], &Type::uint256())?;
                let start = literal_u64(&args[1]);
                let len = literal_u64(&args[2]);
                if len == Some(0) {
                    return Err(structure("slice() length must be greater than 0", &args[2]));
                }
                if let (Some(s), Some(l)) = (start.or(Some(0)), len) {
                    if s + l > cap {
                        return Err(Diagnostic::error(
                            ErrorKind::Overflow,
                            format!("slice() range {}..{} is outside {}", s, s + l, src),
                            call.span,
                        ));
                    }
                }
                let out = len.unwrap_or(cap);
                let ret = match src {
                    Type::String(_) => Type::String(out),
                    _ => Type::Bytes(out),
                };
                Ok(BuiltinSig::new(
                    vec![Some(src), Some(Type::uint256()), Some(Type::uint256())],
                    Some(ret),
                ))
            }
            Builtin::Keccak256 | Builtin::Sha256 => {
                self.arity(call, args, 1, 1)?;
                let t = typer.exact_type(&args[0])?;
                if !(t.is_bytestring() || t == Type::bytes32()) {
                    return Err(mismatch(
                        format!("{}() expects bytes, a string or bytes32, not {}", self.name(), t),
                        &args[0],
                    ));
                }
                Ok(BuiltinSig::new(vec![Some(t)], Some(Type::bytes32())))
            }
            Builtin::Convert => {
                self.arity(call, args, 2, 2)?;
                let target = type_from_annotation(&args[1], typer.ns)?;
                let source = convert_source(typer, &args[0], &target)?;
                check_convert(&source, &target, call)?;
                Ok(BuiltinSig::new(vec![Some(source), None], Some(target)))
            }
            Builtin::Min | Builtin::Max => {
                self.arity(call, args, 2, 2)?;
                let t = typer
                    .common_types(args)?
                    .into_iter()
                    .find(|t| t.is_numeric())
                    .ok_or_else(|| {
                        mismatch(
                            format!("{}() arguments must be numbers of the same type", self.name()),
                            call,
                        )
                    })?;
                Ok(BuiltinSig::new(vec![Some(t.clone()), Some(t.clone())], Some(t)))
            }
            Builtin::Abs => {
                self.arity(call, args, 1, 1)?;
                let t = typer
                    .possible_types(&args[0])?
                    .into_iter()
                    .find(|t| matches!(t, Type::Int(it) if it.signed))
                    .ok_or_else(|| mismatch("abs() expects a signed integer", &args[0]))?;
                Ok(BuiltinSig::new(vec![Some(t.clone())], Some(t)))
            }
            Builtin::Floor | Builtin::Ceil => {
                self.arity(call, args, 1, 1)?;
                typer.validate_expected(&args[0], &Type::Decimal)?;
                Ok(BuiltinSig::new(
                    vec![Some(Type::Decimal)],
                    Some(Type::Int(IntType::INT256)),
                ))
            }
            Builtin::Empty => {
                self.arity(call, args, 1, 1)?;
                let t = type_from_annotation(&args[0], typer.ns)?;
                if t.contains_hashmap() {
                    return Err(structure("empty() cannot create a HashMap", &args[0]));
                }
                Ok(BuiltinSig::new(vec![None], Some(t)))
            }
            Builtin::Uint256Addmod | Builtin::Uint256Mulmod => {
                self.arity(call, args, 3, 3)?;
                for arg in args {
                    typer.validate_expected(arg, &Type::uint256())?;
                }
                Ok(BuiltinSig::new(
                    vec![Some(Type::uint256()); 3],
                    Some(Type::uint256()),
                ))
            }
            Builtin::AsWeiValue => {
                self.arity(call, args, 2, 2)?;
                let unit = match &args[1].kind {
                    ExprKind::Str(s) => s.as_str(),
                    _ => return Err(structure("as_wei_value() unit must be a string literal", &args[1])),
                };
                if wei_denomination(unit).is_none() {
                    return Err(Diagnostic::error(
                        ErrorKind::InvalidLiteral,
                        format!("unknown denomination '{}'", unit),
                        args[1].span,
                    ));
                }
                let t = typer
                    .possible_types(&args[0])?
                    .into_iter()
                    .find(|t| t.is_numeric())
                    .ok_or_else(|| mismatch("as_wei_value() expects a number", &args[0]))?;
                if let Some(v) = args[0].as_int() {
                    if v.is_zero() || *v < BigInt::zero() {
                        return Err(Diagnostic::error(
                            ErrorKind::InvalidLiteral,
                            "as_wei_value() value must be positive",
                            args[0].span,
                        ));
                    }
                }
                Ok(BuiltinSig::new(vec![Some(t), None], Some(Type::uint256())))
            }
            Builtin::MethodId => {
                self.arity(call, args, 1, 1)?;
                if !matches!(&args[0].kind, ExprKind::Str(s) if s.contains('(') && s.ends_with(')')) {
                    return Err(structure(
                        "method_id() expects a function signature string literal",
                        &args[0],
                    ));
                }
                let ret = match keywords.first() {
                    Some(kw) => {
                        let t = type_from_annotation(&kw.value, typer.ns)?;
                        if t != Type::BytesM(4) && t != Type::Bytes(4) {
                            return Err(mismatch(
                                "method_id() output_type must be Bytes[4] or bytes4",
                                &kw.value,
                            ));
                        }
                        t
                    }
                    None => Type::Bytes(4),
                };
                let mut sig = BuiltinSig::new(vec![None], Some(ret));
                sig.kwargs = keywords.iter().map(|k| (k.name.node.clone(), None)).collect();
                Ok(sig)
            }
            Builtin::Extract32 => {
                self.arity(call, args, 2, 2)?;
                let src = typer.exact_type(&args[0])?;
                if !matches!(src, Type::Bytes(_)) {
                    return Err(mismatch("extract32() expects a byte array", &args[0]));
                }
                typer.validate_expected(&args[1], &Type::uint256())?;
                let ret = match keywords.first() {
                    Some(kw) => {
                        let t = type_from_annotation(&kw.value, typer.ns)?;
                        let ok = matches!(t, Type::BytesM(32) | Type::Address)
                            || matches!(t, Type::Int(it) if it.bits == 128 || it.bits == 256);
                        if !ok {
                            return Err(mismatch(
                                format!("extract32() cannot produce {}", t),
                                &kw.value,
                            ));
                        }
                        t
                    }
                    None => Type::bytes32(),
                };
                let mut sig =
                    BuiltinSig::new(vec![Some(src), Some(Type::uint256())], Some(ret));
                sig.kwargs = keywords.iter().map(|k| (k.name.node.clone(), None)).collect();
                Ok(sig)
            }
            Builtin::Blockhash => {
                self.arity(call, args, 1, 1)?;
                typer.validate_expected(&args[0], &Type::uint256())?;
                Ok(BuiltinSig::new(vec![Some(Type::uint256())], Some(Type::bytes32())))
            }
            Builtin::Send => {
                self.arity(call, args, 2, 2)?;
                typer.validate_expected(&args[0], &Type::Address)?;
                typer.validate_expected(&args[1], &Type::uint256())?;
                Ok(BuiltinSig::new(
                    vec![Some(Type::Address), Some(Type::uint256())],
                    None,
                ))
            }
            Builtin::Selfdestruct => {
                self.arity(call, args, 1, 1)?;
                typer.validate_expected(&args[0], &Type::Address)?;
                Ok(BuiltinSig::new(vec![Some(Type::Address)], None))
            }
            Builtin::RawCall => self.raw_call(typer, call, args, keywords),
            Builtin::RawLog => {
                self.arity(call, args, 2, 2)?;
                let topics = match &args[0].kind {
                    ExprKind::List(items) => items,
                    _ => return Err(structure("raw_log() topics must be a list literal", &args[0])),
                };
                if topics.len() > 4 {
                    return Err(structure("raw_log() accepts at most 4 topics", &args[0]));
                }
                for topic in topics {
                    typer.validate_expected(topic, &Type::bytes32())?;
                }
                let data = typer.exact_type(&args[1])?;
                if !matches!(data, Type::Bytes(_) | Type::BytesM(32)) {
                    return Err(mismatch("raw_log() data must be bytes or bytes32", &args[1]));
                }
                Ok(BuiltinSig::new(
                    vec![
                        Some(Type::Array(Box::new(Type::bytes32()), topics.len() as u64)),
                        Some(data),
                    ],
                    None,
                ))
            }
            Builtin::Range => Err(structure("range() can only be used as a for loop iterator", call)),
        }
    }

    fn raw_call(
        self,
        typer: &ExprTyper<'_>,
        call: &Expr,
        args: &[Expr],
        keywords: &[Keyword],
    ) -> Result<BuiltinSig, Diagnostic> {
        self.arity(call, args, 2, 2)?;
        typer.validate_expected(&args[0], &Type::Address)?;
        let data = typer.exact_type(&args[1])?;
        if !matches!(data, Type::Bytes(_)) {
            return Err(mismatch("raw_call() data must be a byte array", &args[1]));
        }
        let mut kwargs = Vec::new();
        let mut max_outsize = 0u64;
        for kw in keywords {
            let t = match kw.name.node.as_str() {
                "max_outsize" => {
                    max_outsize = literal_u64(&kw.value).ok_or_else(|| {
                        structure("max_outsize must be a non-negative integer literal", &kw.value)
                    })?;
                    if max_outsize > MAX_TYPE_SIZE {
                        return Err(Diagnostic::error(
                            ErrorKind::Overflow,
                            format!("max_outsize may be at most {}", MAX_TYPE_SIZE),
                            kw.value.span,
                        ));
                    }
                    None
                }
                "gas" | "value" => {
                    typer.validate_expected(&kw.value, &Type::uint256())?;
                    Some(Type::uint256())
                }
                name => {
                    if !matches!(kw.value.kind, ExprKind::Bool(_)) {
                        return Err(structure(format!("{} must be True or False", name), &kw.value));
                    }
                    None
                }
            };
            kwargs.push((kw.name.node.clone(), t));
        }
        let delegate = bool_keyword(keywords, "is_delegate_call") == Some(true);
        let is_static = bool_keyword(keywords, "is_static_call") == Some(true);
        if delegate && is_static {
            return Err(structure(
                "raw_call() cannot be both a delegate call and a static call",
                call,
            ));
        }
        if (delegate || is_static) && keywords.iter().any(|k| k.name.node == "value") {
            return Err(Diagnostic::error(
                ErrorKind::StateAccess,
                "value cannot be sent with a delegate or static call",
                call.span,
            ));
        }
        let revert = bool_keyword(keywords, "revert_on_failure").unwrap_or(true);
        let ret = match (revert, max_outsize) {
            (true, 0) => None,
            (true, n) => Some(Type::Bytes(n)),
            (false, 0) => Some(Type::Bool),
            (false, n) => Some(Type::Tuple(vec![Type::Bool, Type::Bytes(n)])),
        };
        Ok(BuiltinSig {
            args: vec![Some(Type::Address), Some(data)],
            kwargs,
            ret,
        })
    }

    fn arity(self, call: &Expr, args: &[Expr], min: usize, max: usize) -> Result<(), Diagnostic> {
        if args.len() < min || args.len() > max {
            let expected = if min == max {
                format!("{}", min)
            } else if max == usize::MAX {
                format!("at least {}", min)
            } else {
                format!("{} to {}", min, max)
            };
            return Err(structure(
                format!(
                    "{}() expects {} arguments, got {}",
                    self.name(),
                    expected,
                    args.len()
                ),
                call,
            ));
        }
        Ok(())
    }
}

pub(crate) fn bool_keyword(keywords: &[Keyword], name: &str) -> Option<bool> {
    keywords
        .iter()
        .find(|k| k.name.node == name)
        .and_then(|k| match k.value.kind {
            ExprKind::Bool(b) => Some(b),
            _ => None,
        })
}

pub(crate) fn literal_u64(expr: &Expr) -> Option<u64> {
    expr.as_int().and_then(|v| v.to_u64())
}

/// Type of the value being converted. Literals are typed as the first
/// candidate that converts cleanly to the target.
fn convert_source(typer: &ExprTyper<'_>, arg: &Expr, target: &Type) -> Result<Type, Diagnostic> {
    let candidates = typer.possible_types(arg)?;
    let fallback = candidates.first().cloned();
    candidates
        .into_iter()
        .find(|t| t != target && convertible(t, target))
        .or(fallback)
        .ok_or_else(|| mismatch("cannot determine the type of the converted value", arg))
}

fn convertible(from: &Type, to: &Type) -> bool {
    let scalar = |t: &Type| {
        matches!(
            t,
            Type::Bool | Type::Int(_) | Type::Decimal | Type::BytesM(_) | Type::Address
        )
    };
    match (from, to) {
        (Type::Decimal, Type::Address) | (Type::Address, Type::Decimal) => false,
        (Type::Bool, Type::Address) | (Type::Address, Type::Bool) => false,
        (Type::Enum(_), Type::Int(it)) | (Type::Int(it), Type::Enum(_)) => *it == IntType::UINT256,
        (Type::Interface(_), Type::Address) | (Type::Address, Type::Interface(_)) => true,
        (Type::Bytes(n), t) | (Type::String(n), t) if scalar(t) => *n <= 32,
        (Type::BytesM(m), Type::Bytes(n)) => *m as u64 <= *n,
        (Type::String(a), Type::Bytes(b)) | (Type::Bytes(a), Type::String(b)) => a <= b,
        (a, b) => scalar(a) && scalar(b),
    }
}

fn check_convert(from: &Type, to: &Type, call: &Expr) -> Result<(), Diagnostic> {
    if from == to {
        return Err(mismatch(format!("value is already of type {}", to), call));
    }
    if !convertible(from, to) {
        return Err(mismatch(format!("cannot convert {} to {}", from, to), call));
    }
    Ok(())
}
