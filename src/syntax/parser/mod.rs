use crate::ast::*;
use crate::diagnostic::{Diagnostic, ErrorKind};
use crate::lexeme::Lexeme;
use crate::span::{Span, Spanned};

mod expr;
mod items;
mod stmt;
#[cfg(test)]
mod tests;

const MAX_NESTING_DEPTH: u32 = 128;

/// Recursive-descent parser over the indentation-aware token stream.
pub(crate) struct Parser {
    tokens: Vec<Spanned<Lexeme>>,
    pos: usize,
    diagnostics: Vec<Diagnostic>,
    depth: u32,
    next_id: NodeId,
}

impl Parser {
    pub(crate) fn new(tokens: Vec<Spanned<Lexeme>>) -> Self {
        let mut tokens = tokens;
        if !matches!(tokens.last().map(|t| &t.node), Some(Lexeme::Eof)) {
            let at = tokens.last().map(|t| t.span).unwrap_or_else(Span::dummy);
            tokens.push(Spanned::new(Lexeme::Eof, at));
        }
        Self {
            tokens,
            pos: 0,
            diagnostics: Vec::new(),
            depth: 0,
            next_id: 0,
        }
    }

    pub(crate) fn parse_module(mut self) -> Result<Module, Vec<Diagnostic>> {
        let items = self.parse_items();
        if !self.diagnostics.is_empty() {
            return Err(self.diagnostics);
        }
        Ok(Module {
            items,
            node_count: self.next_id,
        })
    }

    fn enter_nesting(&mut self) -> bool {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            self.error_with_help(
                "nesting depth exceeded (maximum 128 levels)",
                "split deeply nested code into internal functions",
            );
            self.depth -= 1;
            return false;
        }
        true
    }

    fn exit_nesting(&mut self) {
        self.depth -= 1;
    }

    // --- Blocks ---

    /// Parse the body after a `:`. Either an indented block or a single
    /// simple statement on the same line.
    fn parse_suite(&mut self) -> Block {
        if !self.eat(&Lexeme::Newline) {
            let stmt = self.parse_simple_stmt();
            return vec![stmt];
        }
        if !self.at(&Lexeme::Indent) {
            self.error_at_current("expected an indented block");
            return Vec::new();
        }
        self.advance();
        let mut body = Vec::new();
        while !self.at(&Lexeme::Dedent) && !self.at(&Lexeme::Eof) {
            if self.eat(&Lexeme::Newline) {
                continue;
            }
            let before = self.pos;
            body.push(self.parse_stmt());
            if self.pos == before {
                // no progress; skip the offending token
                self.advance();
            }
        }
        self.eat(&Lexeme::Dedent);
        body
    }

    /// Skip to the start of the next logical line after an error.
    fn synchronize(&mut self) {
        while !self.at(&Lexeme::Newline) && !self.at(&Lexeme::Eof) {
            if self.at(&Lexeme::Indent) || self.at(&Lexeme::Dedent) {
                return;
            }
            self.advance();
        }
        self.eat(&Lexeme::Newline);
    }

    fn expect_line_end(&mut self) {
        if self.at(&Lexeme::Eof) || self.at(&Lexeme::Dedent) {
            return;
        }
        if !self.eat(&Lexeme::Newline) {
            self.error_at_current(&format!(
                "expected end of line, found {}",
                self.peek().description()
            ));
            self.synchronize();
        }
    }

    // --- Node construction ---

    fn mk(&mut self, kind: ExprKind, span: Span) -> Expr {
        let id = self.next_id;
        self.next_id += 1;
        Expr { id, kind, span }
    }

    // --- Utility methods ---

    fn peek(&self) -> &Lexeme {
        &self.tokens[self.pos].node
    }

    fn peek_ahead(&self, n: usize) -> &Lexeme {
        let idx = (self.pos + n).min(self.tokens.len() - 1);
        &self.tokens[idx].node
    }

    fn current_span(&self) -> Span {
        self.tokens[self.pos].span
    }

    fn prev_span(&self) -> Span {
        if self.pos > 0 {
            self.tokens[self.pos - 1].span
        } else {
            self.current_span()
        }
    }

    fn advance(&mut self) -> &Spanned<Lexeme> {
        let tok = &self.tokens[self.pos];
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn at(&self, token: &Lexeme) -> bool {
        std::mem::discriminant(self.peek()) == std::mem::discriminant(token)
    }

    fn eat(&mut self, token: &Lexeme) -> bool {
        if self.at(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Lexeme) -> Span {
        if self.at(token) {
            let span = self.current_span();
            self.advance();
            span
        } else {
            self.error_at_current(&format!(
                "expected {}, found {}",
                token.description(),
                self.peek().description()
            ));
            self.current_span()
        }
    }

    fn expect_ident(&mut self) -> Spanned<String> {
        if let Lexeme::Ident(name) = self.peek().clone() {
            let span = self.current_span();
            self.advance();
            Spanned::new(name, span)
        } else {
            self.error_at_current(&format!(
                "expected identifier, found {}",
                self.peek().description()
            ));
            Spanned::new("_error_".to_string(), self.current_span())
        }
    }

    fn error_at_current(&mut self, msg: &str) {
        self.diagnostics.push(Diagnostic::error(
            ErrorKind::Syntax,
            msg,
            self.current_span(),
        ));
    }

    fn error_at(&mut self, msg: &str, span: Span) {
        self.diagnostics
            .push(Diagnostic::error(ErrorKind::Syntax, msg, span));
    }

    fn error_with_help(&mut self, msg: &str, help: &str) {
        self.diagnostics.push(
            Diagnostic::error(ErrorKind::Syntax, msg, self.current_span()).with_help(help),
        );
    }
}
