//! Reader for the S-expression form printed by `IrNode`'s `Display`.
//!
//! Words found in the opcode table become operations, integers (decimal,
//! negative or `0x` hex) become literals, and any other word is a name.
//! `/* ... */` comments are skipped. Every node goes through `IrNode::op`,
//! so parsed trees are validated exactly like generated ones.

use num_bigint::BigInt;
use num_traits::Num;

use super::{opcodes, IrError, IrNode};

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Open,
    Close,
    Word(String),
}

fn parse_error(pos: usize, message: impl Into<String>) -> IrError {
    IrError::Parse {
        pos,
        message: message.into(),
    }
}

fn tokenize(text: &str) -> Result<Vec<(usize, Token)>, IrError> {
    let bytes = text.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if c.is_ascii_whitespace() {
            i += 1;
        } else if text[i..].starts_with("/*") {
            let end = text[i + 2..]
                .find("*/")
                .ok_or_else(|| parse_error(i, "unterminated comment"))?;
            i += end + 4;
        } else if c == b'(' {
            tokens.push((i, Token::Open));
            i += 1;
        } else if c == b')' {
            tokens.push((i, Token::Close));
            i += 1;
        } else {
            let start = i;
            while i < bytes.len() && !bytes[i].is_ascii_whitespace() && bytes[i] != b'(' && bytes[i] != b')' {
                i += 1;
            }
            tokens.push((start, Token::Word(text[start..i].to_string())));
        }
    }
    Ok(tokens)
}

fn parse_int(word: &str) -> Option<BigInt> {
    let (negative, digits) = match word.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, word),
    };
    let value = match digits.strip_prefix("0x") {
        Some(hex) => BigInt::from_str_radix(hex, 16).ok()?,
        None if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) => {
            BigInt::from_str_radix(digits, 10).ok()?
        }
        None => return None,
    };
    Some(if negative { -value } else { value })
}

fn atom(word: &str) -> Result<IrNode, IrError> {
    if let Some(v) = parse_int(word) {
        return Ok(IrNode::int(v));
    }
    if opcodes::lookup(word).is_some() {
        return IrNode::op(word, Vec::new());
    }
    Ok(IrNode::name(word))
}

struct Reader {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    end: usize,
}

impl Reader {
    fn node(&mut self) -> Result<IrNode, IrError> {
        let (at, token) = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| parse_error(self.end, "unexpected end of input"))?;
        self.pos += 1;
        match token {
            Token::Word(w) => atom(&w),
            Token::Close => Err(parse_error(at, "unexpected ')'")),
            Token::Open => {
                let head = match self.tokens.get(self.pos) {
                    Some((_, Token::Word(w))) => w.clone(),
                    _ => return Err(parse_error(at, "expected an operation after '('")),
                };
                self.pos += 1;
                let mut args = Vec::new();
                loop {
                    let next = self.tokens.get(self.pos).map(|(_, t)| t.clone());
                    match next {
                        Some(Token::Close) => {
                            self.pos += 1;
                            break;
                        }
                        Some(_) => args.push(self.node()?),
                        None => return Err(parse_error(at, "unclosed '('")),
                    }
                }
                if opcodes::lookup(&head).is_none() {
                    return Err(parse_error(at, format!("unknown operation '{}'", head)));
                }
                IrNode::op(&head, args)
            }
        }
    }
}

/// Parse one IR tree.
pub fn parse_ir(text: &str) -> Result<IrNode, IrError> {
    let tokens = tokenize(text)?;
    let mut reader = Reader {
        tokens,
        pos: 0,
        end: text.len(),
    };
    let node = reader.node()?;
    if let Some((at, _)) = reader.tokens.get(reader.pos) {
        return Err(parse_error(*at, "trailing input after the first expression"));
    }
    Ok(node)
}
