use num_bigint::BigUint;

/// All lexemes of the contract language.
#[derive(Clone, Debug, PartialEq)]
pub enum Lexeme {
    // Keywords
    Def,
    Event,
    Struct,
    Interface,
    Enum,
    Import,
    From,
    As,
    If,
    Elif,
    Else,
    For,
    In,
    Return,
    Pass,
    Break,
    Continue,
    Assert,
    Raise,
    Log,
    And,
    Or,
    Not,
    True,
    False,

    // Layout
    Newline,
    Indent,
    Dedent,

    // Symbols
    LParen,     // (
    RParen,     // )
    LBrace,     // {
    RBrace,     // }
    LBracket,   // [
    RBracket,   // ]
    Comma,      // ,
    Colon,      // :
    Dot,        // .
    Arrow,      // ->
    At,         // @
    Eq,         // =
    EqEq,       // ==
    NotEq,      // !=
    Lt,         // <
    LtEq,       // <=
    Gt,         // >
    GtEq,       // >=
    Plus,       // +
    Minus,      // -
    Star,       // *
    StarStar,   // **
    Slash,      // /
    Percent,    // %
    Amp,        // &
    Pipe,       // |
    Caret,      // ^
    Tilde,      // ~
    Shl,        // <<
    Shr,        // >>
    PlusEq,     // +=
    MinusEq,    // -=
    StarEq,     // *=
    SlashEq,    // /=
    PercentEq,  // %=

    // Literals
    Integer(BigUint),
    Hex(String),
    Decimal(String),
    Str(String),
    Bytes(Vec<u8>),
    Ident(String),

    Eof,
}

impl Lexeme {
    /// Try to match an identifier string to a keyword lexeme.
    pub fn from_keyword(s: &str) -> Option<Lexeme> {
        match s {
            "def" => Some(Lexeme::Def),
            "event" => Some(Lexeme::Event),
            "struct" => Some(Lexeme::Struct),
            "interface" => Some(Lexeme::Interface),
            "enum" => Some(Lexeme::Enum),
            "import" => Some(Lexeme::Import),
            "from" => Some(Lexeme::From),
            "as" => Some(Lexeme::As),
            "if" => Some(Lexeme::If),
            "elif" => Some(Lexeme::Elif),
            "else" => Some(Lexeme::Else),
            "for" => Some(Lexeme::For),
            "in" => Some(Lexeme::In),
            "return" => Some(Lexeme::Return),
            "pass" => Some(Lexeme::Pass),
            "break" => Some(Lexeme::Break),
            "continue" => Some(Lexeme::Continue),
            "assert" => Some(Lexeme::Assert),
            "raise" => Some(Lexeme::Raise),
            "log" => Some(Lexeme::Log),
            "and" => Some(Lexeme::And),
            "or" => Some(Lexeme::Or),
            "not" => Some(Lexeme::Not),
            "True" => Some(Lexeme::True),
            "False" => Some(Lexeme::False),
            _ => None,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Lexeme::Def => "'def'",
            Lexeme::Event => "'event'",
            Lexeme::Struct => "'struct'",
            Lexeme::Interface => "'interface'",
            Lexeme::Enum => "'enum'",
            Lexeme::Import => "'import'",
            Lexeme::From => "'from'",
            Lexeme::As => "'as'",
            Lexeme::If => "'if'",
            Lexeme::Elif => "'elif'",
            Lexeme::Else => "'else'",
            Lexeme::For => "'for'",
            Lexeme::In => "'in'",
            Lexeme::Return => "'return'",
            Lexeme::Pass => "'pass'",
            Lexeme::Break => "'break'",
            Lexeme::Continue => "'continue'",
            Lexeme::Assert => "'assert'",
            Lexeme::Raise => "'raise'",
            Lexeme::Log => "'log'",
            Lexeme::And => "'and'",
            Lexeme::Or => "'or'",
            Lexeme::Not => "'not'",
            Lexeme::True => "'True'",
            Lexeme::False => "'False'",
            Lexeme::Newline => "newline",
            Lexeme::Indent => "indent",
            Lexeme::Dedent => "dedent",
            Lexeme::LParen => "'('",
            Lexeme::RParen => "')'",
            Lexeme::LBrace => "'{'",
            Lexeme::RBrace => "'}'",
            Lexeme::LBracket => "'['",
            Lexeme::RBracket => "']'",
            Lexeme::Comma => "','",
            Lexeme::Colon => "':'",
            Lexeme::Dot => "'.'",
            Lexeme::Arrow => "'->'",
            Lexeme::At => "'@'",
            Lexeme::Eq => "'='",
            Lexeme::EqEq => "'=='",
            Lexeme::NotEq => "'!='",
            Lexeme::Lt => "'<'",
            Lexeme::LtEq => "'<='",
            Lexeme::Gt => "'>'",
            Lexeme::GtEq => "'>='",
            Lexeme::Plus => "'+'",
            Lexeme::Minus => "'-'",
            Lexeme::Star => "'*'",
            Lexeme::StarStar => "'**'",
            Lexeme::Slash => "'/'",
            Lexeme::Percent => "'%'",
            Lexeme::Amp => "'&'",
            Lexeme::Pipe => "'|'",
            Lexeme::Caret => "'^'",
            Lexeme::Tilde => "'~'",
            Lexeme::Shl => "'<<'",
            Lexeme::Shr => "'>>'",
            Lexeme::PlusEq => "'+='",
            Lexeme::MinusEq => "'-='",
            Lexeme::StarEq => "'*='",
            Lexeme::SlashEq => "'/='",
            Lexeme::PercentEq => "'%='",
            Lexeme::Integer(_) => "integer literal",
            Lexeme::Hex(_) => "hex literal",
            Lexeme::Decimal(_) => "decimal literal",
            Lexeme::Str(_) => "string literal",
            Lexeme::Bytes(_) => "bytes literal",
            Lexeme::Ident(_) => "identifier",
            Lexeme::Eof => "end of file",
        }
    }
}
