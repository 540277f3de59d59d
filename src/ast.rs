use num_bigint::BigInt;

use crate::span::{Span, Spanned};

pub mod display;
pub mod navigate;

/// Unique identifier of an expression node within one parsed module.
/// Semantic analysis keys its type annotations by this id.
pub type NodeId = u32;

/// A parsed contract module.
#[derive(Clone, Debug)]
pub struct Module {
    pub items: Vec<Spanned<Item>>,
    /// Number of expression ids handed out while parsing.
    pub node_count: u32,
}

/// Top-level declarations.
#[derive(Clone, Debug)]
pub enum Item {
    Import(ImportDecl),
    Interface(InterfaceDecl),
    Event(EventDecl),
    Struct(StructDecl),
    Enum(EnumDecl),
    Variable(VariableDecl),
    Function(FunctionDecl),
}

/// `import a.b as c` or `from a.b import c [as d]`.
#[derive(Clone, Debug)]
pub struct ImportDecl {
    /// Leading dots of a relative import (`from . import x` has level 1).
    pub level: u32,
    /// Dotted path of the imported module, including the imported name.
    pub path: Vec<String>,
    pub alias: Spanned<String>,
}

impl ImportDecl {
    pub fn dotted(&self) -> String {
        format!("{}{}", ".".repeat(self.level as usize), self.path.join("."))
    }
}

#[derive(Clone, Debug)]
pub struct InterfaceDecl {
    pub name: Spanned<String>,
    pub functions: Vec<InterfaceFn>,
}

/// `def name(args) -> ret: mutability` inside an interface body.
#[derive(Clone, Debug)]
pub struct InterfaceFn {
    pub name: Spanned<String>,
    pub args: Vec<Arg>,
    pub returns: Option<Expr>,
    pub mutability: Spanned<String>,
}

#[derive(Clone, Debug)]
pub struct EventDecl {
    pub name: Spanned<String>,
    pub fields: Vec<EventField>,
}

#[derive(Clone, Debug)]
pub struct EventField {
    pub name: Spanned<String>,
    pub annotation: Expr,
    pub indexed: bool,
}

#[derive(Clone, Debug)]
pub struct StructDecl {
    pub name: Spanned<String>,
    pub fields: Vec<(Spanned<String>, Expr)>,
}

#[derive(Clone, Debug)]
pub struct EnumDecl {
    pub name: Spanned<String>,
    pub members: Vec<Spanned<String>>,
}

/// A module-level variable. The `public(..)`, `constant(..)` and
/// `immutable(..)` wrappers are unwrapped by the parser into flags.
#[derive(Clone, Debug)]
pub struct VariableDecl {
    pub name: Spanned<String>,
    pub annotation: Expr,
    pub value: Option<Expr>,
    pub is_public: bool,
    pub is_constant: bool,
    pub is_immutable: bool,
}

#[derive(Clone, Debug)]
pub struct FunctionDecl {
    pub name: Spanned<String>,
    pub decorators: Vec<Expr>,
    pub args: Vec<Arg>,
    pub returns: Option<Expr>,
    pub body: Block,
}

#[derive(Clone, Debug)]
pub struct Arg {
    pub name: Spanned<String>,
    pub annotation: Expr,
    pub default: Option<Expr>,
}

pub type Block = Vec<Spanned<Stmt>>;

#[derive(Clone, Debug)]
pub enum Stmt {
    /// `name: type = value`
    AnnAssign {
        target: Spanned<String>,
        annotation: Expr,
        value: Option<Expr>,
    },
    Assign {
        target: Expr,
        value: Expr,
    },
    AugAssign {
        target: Expr,
        op: BinOp,
        value: Expr,
    },
    If {
        test: Expr,
        body: Block,
        orelse: Block,
    },
    For {
        target: Spanned<String>,
        iter: Expr,
        body: Block,
    },
    Assert {
        test: Expr,
        msg: Option<Expr>,
    },
    Raise {
        msg: Option<Expr>,
    },
    Return(Option<Expr>),
    /// `log Event(args)`; the payload is the call expression.
    Log(Expr),
    Expr(Expr),
    Pass,
    Break,
    Continue,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Expr {
    pub id: NodeId,
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ExprKind {
    Int(BigInt),
    /// Decimal literal kept as source text (`3.25`, `-0.5`).
    Decimal(String),
    /// Hex literal kept as source text, `0x` prefix included.
    Hex(String),
    Str(String),
    Bytes(Vec<u8>),
    Bool(bool),
    Name(String),
    Attribute {
        value: Box<Expr>,
        attr: Spanned<String>,
    },
    Subscript {
        value: Box<Expr>,
        index: Box<Expr>,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        keywords: Vec<Keyword>,
    },
    BinOp {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    UnaryOp {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Compare {
        op: CmpOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    BoolOp {
        op: BoolOpKind,
        values: Vec<Expr>,
    },
    Tuple(Vec<Expr>),
    List(Vec<Expr>),
    /// `{a: x, b: y}`, only valid as a struct constructor argument.
    Dict(Vec<(Spanned<String>, Expr)>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Keyword {
    pub name: Spanned<String>,
    pub value: Expr,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Pow => "**",
            BinOp::BitAnd => "&",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
        }
    }

    pub fn is_bitwise(self) -> bool {
        matches!(
            self,
            BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor | BinOp::Shl | BinOp::Shr
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Not,
    Neg,
    Invert,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    In,
    NotIn,
}

impl CmpOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::NotEq => "!=",
            CmpOp::Lt => "<",
            CmpOp::LtE => "<=",
            CmpOp::Gt => ">",
            CmpOp::GtE => ">=",
            CmpOp::In => "in",
            CmpOp::NotIn => "not in",
        }
    }

    pub fn is_ordering(self) -> bool {
        matches!(self, CmpOp::Lt | CmpOp::LtE | CmpOp::Gt | CmpOp::GtE)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BoolOpKind {
    And,
    Or,
}

impl Expr {
    pub fn is_literal(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::Int(_)
                | ExprKind::Decimal(_)
                | ExprKind::Hex(_)
                | ExprKind::Str(_)
                | ExprKind::Bytes(_)
                | ExprKind::Bool(_)
        )
    }

    /// A literal, or an operator tree whose leaves are all literals.
    pub fn is_constant_tree(&self) -> bool {
        match &self.kind {
            ExprKind::BinOp { left, right, .. } => {
                left.is_constant_tree() && right.is_constant_tree()
            }
            ExprKind::UnaryOp { operand, .. } => operand.is_constant_tree(),
            _ => self.is_literal(),
        }
    }

    pub fn as_name(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Name(n) => Some(n),
            _ => None,
        }
    }

    /// `self.<attr>` → `attr`.
    pub fn as_self_attribute(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Attribute { value, attr } if value.as_name() == Some("self") => {
                Some(&attr.node)
            }
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<&BigInt> {
        match &self.kind {
            ExprKind::Int(n) => Some(n),
            _ => None,
        }
    }
}

impl Module {
    pub fn functions(&self) -> impl Iterator<Item = &FunctionDecl> {
        self.items.iter().filter_map(|item| match &item.node {
            Item::Function(f) => Some(f),
            _ => None,
        })
    }
}
