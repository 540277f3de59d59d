use num_bigint::BigUint;

use crate::diagnostic::{Diagnostic, ErrorKind};
use crate::lexeme::Lexeme;
use crate::span::{Span, Spanned};

/// Indentation-aware lexer. Produces `Newline`/`Indent`/`Dedent` tokens at
/// logical line boundaries; physical newlines inside brackets are ignored.
pub(crate) struct Lexer<'src> {
    source: &'src [u8],
    file_id: u16,
    pos: usize,
    diagnostics: Vec<Diagnostic>,
    indents: Vec<usize>,
    bracket_depth: u32,
    at_line_start: bool,
    pending: Vec<Spanned<Lexeme>>,
}

impl<'src> Lexer<'src> {
    pub(crate) fn new(source: &'src str, file_id: u16) -> Self {
        Self {
            source: source.as_bytes(),
            file_id,
            pos: 0,
            diagnostics: Vec::new(),
            indents: vec![0],
            bracket_depth: 0,
            at_line_start: true,
            pending: Vec::new(),
        }
    }

    pub(crate) fn tokenize(mut self) -> (Vec<Spanned<Lexeme>>, Vec<Diagnostic>) {
        let mut tokens: Vec<Spanned<Lexeme>> = Vec::new();
        loop {
            let tok = self.next_token();
            let is_eof = tok.node == Lexeme::Eof;
            if is_eof {
                // Close the last logical line and any open blocks.
                let at = tok.span;
                if !matches!(
                    tokens.last().map(|t| &t.node),
                    None | Some(Lexeme::Newline) | Some(Lexeme::Dedent)
                ) {
                    tokens.push(Spanned::new(Lexeme::Newline, at));
                }
                while self.indents.len() > 1 {
                    self.indents.pop();
                    tokens.push(Spanned::new(Lexeme::Dedent, at));
                }
                tokens.push(tok);
                break;
            }
            tokens.push(tok);
        }
        (tokens, self.diagnostics)
    }

    fn next_token(&mut self) -> Spanned<Lexeme> {
        loop {
            if let Some(tok) = self.pending.pop() {
                return tok;
            }

            if self.at_line_start && self.bracket_depth == 0 {
                self.at_line_start = false;
                if self.handle_indentation() {
                    continue;
                }
            }

            self.skip_inline_whitespace_and_comments();

            if self.pos >= self.source.len() {
                return self.make_token(Lexeme::Eof, self.pos, self.pos);
            }

            let start = self.pos;
            let ch = self.source[self.pos];

            if ch == b'\n' {
                self.pos += 1;
                if self.bracket_depth > 0 {
                    continue;
                }
                self.at_line_start = true;
                return self.make_token(Lexeme::Newline, start, start + 1);
            }

            if ch == b'\\' && self.peek_at(1) == Some(b'\n') {
                // explicit line continuation
                self.pos += 2;
                continue;
            }

            if (ch == b'b' || ch == b'B') && matches!(self.peek_at(1), Some(b'"') | Some(b'\'')) {
                self.pos += 1;
                return self.scan_string(start, true);
            }

            if is_ident_start(ch) {
                return self.scan_ident_or_keyword();
            }

            if ch.is_ascii_digit() {
                return self.scan_number();
            }

            if ch == b'"' || ch == b'\'' {
                return self.scan_string(start, false);
            }

            if let Some(tok) = self.scan_symbol(start) {
                return tok;
            }
            // scan_symbol returned None -> error was recorded, try again
        }
    }

    /// Measure the indentation of a new logical line and queue Indent/Dedent
    /// tokens. Blank and comment-only lines are skipped entirely. Returns true
    /// when tokens were queued or lines skipped, so the caller loops again.
    fn handle_indentation(&mut self) -> bool {
        loop {
            let line_start = self.pos;
            let mut width = 0usize;
            while self.pos < self.source.len() {
                match self.source[self.pos] {
                    b' ' => width += 1,
                    b'\t' => width += 4,
                    b'\r' => {}
                    _ => break,
                }
                self.pos += 1;
            }
            if self.pos >= self.source.len() {
                return false;
            }
            match self.source[self.pos] {
                b'\n' => {
                    self.pos += 1;
                    continue;
                }
                b'#' => {
                    while self.pos < self.source.len() && self.source[self.pos] != b'\n' {
                        self.pos += 1;
                    }
                    continue;
                }
                _ => {}
            }

            let current = *self.indents.last().unwrap_or(&0);
            if width > current {
                self.indents.push(width);
                self.pending
                    .push(self.make_token(Lexeme::Indent, line_start, self.pos));
                return true;
            }
            if width < current {
                let mut queued = Vec::new();
                while width < *self.indents.last().unwrap_or(&0) {
                    self.indents.pop();
                    queued.push(self.make_token(Lexeme::Dedent, line_start, self.pos));
                }
                if width != *self.indents.last().unwrap_or(&0) {
                    self.diagnostics.push(Diagnostic::error(
                        ErrorKind::Syntax,
                        "unindent does not match any outer indentation level",
                        Span::new(self.file_id, line_start as u32, self.pos as u32),
                    ));
                }
                // pending is a stack: push in reverse so they pop in order
                queued.reverse();
                self.pending.extend(queued);
                return true;
            }
            return false;
        }
    }

    fn skip_inline_whitespace_and_comments(&mut self) {
        while self.pos < self.source.len() {
            match self.source[self.pos] {
                b' ' | b'\t' | b'\r' => self.pos += 1,
                b'#' => {
                    while self.pos < self.source.len() && self.source[self.pos] != b'\n' {
                        self.pos += 1;
                    }
                }
                _ => break,
            }
        }
    }

    fn scan_ident_or_keyword(&mut self) -> Spanned<Lexeme> {
        let start = self.pos;
        while self.pos < self.source.len() && is_ident_continue(self.source[self.pos]) {
            self.pos += 1;
        }
        let text = String::from_utf8_lossy(&self.source[start..self.pos]).into_owned();
        let token = Lexeme::from_keyword(&text).unwrap_or(Lexeme::Ident(text));
        self.make_token(token, start, self.pos)
    }

    fn scan_number(&mut self) -> Spanned<Lexeme> {
        let start = self.pos;
        if self.source[self.pos] == b'0' && matches!(self.peek_at(1), Some(b'x') | Some(b'X')) {
            self.pos += 2;
            while self.pos < self.source.len() && self.source[self.pos].is_ascii_hexdigit() {
                self.pos += 1;
            }
            let text = String::from_utf8_lossy(&self.source[start..self.pos]).into_owned();
            if text.len() == 2 {
                self.diagnostics.push(Diagnostic::error(
                    ErrorKind::Syntax,
                    "hex literal has no digits",
                    Span::new(self.file_id, start as u32, self.pos as u32),
                ));
            }
            return self.make_token(Lexeme::Hex(text), start, self.pos);
        }

        while self.pos < self.source.len()
            && (self.source[self.pos].is_ascii_digit() || self.source[self.pos] == b'_')
        {
            self.pos += 1;
        }
        let is_decimal = self.source.get(self.pos) == Some(&b'.')
            && self.peek_at(1).is_some_and(|c| c.is_ascii_digit());
        if is_decimal {
            self.pos += 1;
            while self.pos < self.source.len() && self.source[self.pos].is_ascii_digit() {
                self.pos += 1;
            }
            let text: String = String::from_utf8_lossy(&self.source[start..self.pos])
                .chars()
                .filter(|c| *c != '_')
                .collect();
            return self.make_token(Lexeme::Decimal(text), start, self.pos);
        }

        let digits: String = String::from_utf8_lossy(&self.source[start..self.pos])
            .chars()
            .filter(|c| *c != '_')
            .collect();
        match digits.parse::<BigUint>() {
            Ok(n) => self.make_token(Lexeme::Integer(n), start, self.pos),
            Err(_) => {
                self.diagnostics.push(Diagnostic::error(
                    ErrorKind::Syntax,
                    format!("invalid integer literal '{}'", digits),
                    Span::new(self.file_id, start as u32, self.pos as u32),
                ));
                self.make_token(Lexeme::Integer(BigUint::default()), start, self.pos)
            }
        }
    }

    /// Scan a quoted literal. `self.pos` points at the opening quote.
    fn scan_string(&mut self, start: usize, is_bytes: bool) -> Spanned<Lexeme> {
        let quote = self.source[self.pos];
        self.pos += 1;
        let mut out: Vec<u8> = Vec::new();
        loop {
            if self.pos >= self.source.len() || self.source[self.pos] == b'\n' {
                self.diagnostics.push(
                    Diagnostic::error(
                        ErrorKind::Syntax,
                        "unterminated string literal",
                        Span::new(self.file_id, start as u32, self.pos as u32),
                    )
                    .with_help("close the literal with a matching quote on the same line"),
                );
                break;
            }
            let c = self.source[self.pos];
            self.pos += 1;
            if c == quote {
                break;
            }
            if c != b'\\' {
                out.push(c);
                continue;
            }
            let Some(esc) = self.source.get(self.pos).copied() else {
                continue;
            };
            self.pos += 1;
            match esc {
                b'n' => out.push(b'\n'),
                b't' => out.push(b'\t'),
                b'r' => out.push(b'\r'),
                b'0' => out.push(0),
                b'\\' | b'"' | b'\'' => out.push(esc),
                b'x' => {
                    let hex = self.source.get(self.pos..self.pos + 2).unwrap_or(b"");
                    match std::str::from_utf8(hex)
                        .ok()
                        .and_then(|h| u8::from_str_radix(h, 16).ok())
                    {
                        Some(byte) => {
                            out.push(byte);
                            self.pos += 2;
                        }
                        None => self.diagnostics.push(Diagnostic::error(
                            ErrorKind::Syntax,
                            "invalid \\x escape",
                            Span::new(self.file_id, (self.pos - 2) as u32, self.pos as u32),
                        )),
                    }
                }
                other => {
                    out.push(b'\\');
                    out.push(other);
                }
            }
        }
        let token = if is_bytes {
            Lexeme::Bytes(out)
        } else {
            Lexeme::Str(String::from_utf8_lossy(&out).into_owned())
        };
        self.make_token(token, start, self.pos)
    }

    fn scan_symbol(&mut self, start: usize) -> Option<Spanned<Lexeme>> {
        let ch = self.source[self.pos];
        self.pos += 1;
        let next = self.peek_at(0);

        let token = match (ch, next) {
            (b'(', _) => {
                self.bracket_depth += 1;
                Lexeme::LParen
            }
            (b'[', _) => {
                self.bracket_depth += 1;
                Lexeme::LBracket
            }
            (b'{', _) => {
                self.bracket_depth += 1;
                Lexeme::LBrace
            }
            (b')', _) => {
                self.bracket_depth = self.bracket_depth.saturating_sub(1);
                Lexeme::RParen
            }
            (b']', _) => {
                self.bracket_depth = self.bracket_depth.saturating_sub(1);
                Lexeme::RBracket
            }
            (b'}', _) => {
                self.bracket_depth = self.bracket_depth.saturating_sub(1);
                Lexeme::RBrace
            }
            (b',', _) => Lexeme::Comma,
            (b':', _) => Lexeme::Colon,
            (b'.', _) => Lexeme::Dot,
            (b'@', _) => Lexeme::At,
            (b'~', _) => Lexeme::Tilde,
            (b'&', _) => Lexeme::Amp,
            (b'|', _) => Lexeme::Pipe,
            (b'^', _) => Lexeme::Caret,
            (b'-', Some(b'>')) => self.bump(Lexeme::Arrow),
            (b'-', Some(b'=')) => self.bump(Lexeme::MinusEq),
            (b'-', _) => Lexeme::Minus,
            (b'+', Some(b'=')) => self.bump(Lexeme::PlusEq),
            (b'+', _) => Lexeme::Plus,
            (b'*', Some(b'*')) => self.bump(Lexeme::StarStar),
            (b'*', Some(b'=')) => self.bump(Lexeme::StarEq),
            (b'*', _) => Lexeme::Star,
            (b'/', Some(b'=')) => self.bump(Lexeme::SlashEq),
            (b'/', _) => Lexeme::Slash,
            (b'%', Some(b'=')) => self.bump(Lexeme::PercentEq),
            (b'%', _) => Lexeme::Percent,
            (b'=', Some(b'=')) => self.bump(Lexeme::EqEq),
            (b'=', _) => Lexeme::Eq,
            (b'!', Some(b'=')) => self.bump(Lexeme::NotEq),
            (b'<', Some(b'=')) => self.bump(Lexeme::LtEq),
            (b'<', Some(b'<')) => self.bump(Lexeme::Shl),
            (b'<', _) => Lexeme::Lt,
            (b'>', Some(b'=')) => self.bump(Lexeme::GtEq),
            (b'>', Some(b'>')) => self.bump(Lexeme::Shr),
            (b'>', _) => Lexeme::Gt,
            _ => {
                self.diagnostics.push(
                    Diagnostic::error(
                        ErrorKind::Syntax,
                        format!("unexpected character '{}' (U+{:04X})", ch as char, ch),
                        Span::new(self.file_id, start as u32, self.pos as u32),
                    )
                    .with_help("this character is not part of the language syntax"),
                );
                return None;
            }
        };

        Some(self.make_token(token, start, self.pos))
    }

    /// Consume the second byte of a two-character symbol.
    fn bump(&mut self, tok: Lexeme) -> Lexeme {
        self.pos += 1;
        tok
    }

    fn peek_at(&self, ahead: usize) -> Option<u8> {
        self.source.get(self.pos + ahead).copied()
    }

    fn make_token(&self, token: Lexeme, start: usize, end: usize) -> Spanned<Lexeme> {
        Spanned::new(token, Span::new(self.file_id, start as u32, end as u32))
    }
}

fn is_ident_start(ch: u8) -> bool {
    ch.is_ascii_alphabetic() || ch == b'_'
}

fn is_ident_continue(ch: u8) -> bool {
    ch.is_ascii_alphanumeric() || ch == b'_'
}

#[cfg(test)]
mod tests;
