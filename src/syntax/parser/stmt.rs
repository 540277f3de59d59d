use crate::ast::*;
use crate::lexeme::Lexeme;
use crate::span::Spanned;

use super::Parser;

impl Parser {
    pub(super) fn parse_stmt(&mut self) -> Spanned<Stmt> {
        match self.peek() {
            Lexeme::If => self.parse_if(),
            Lexeme::For => self.parse_for(),
            _ => self.parse_simple_stmt(),
        }
    }

    /// A statement that fits on one line. Consumes the trailing newline.
    pub(super) fn parse_simple_stmt(&mut self) -> Spanned<Stmt> {
        let start = self.current_span();
        let stmt = match self.peek() {
            Lexeme::Pass => {
                self.advance();
                Stmt::Pass
            }
            Lexeme::Break => {
                self.advance();
                Stmt::Break
            }
            Lexeme::Continue => {
                self.advance();
                Stmt::Continue
            }
            Lexeme::Return => {
                self.advance();
                if self.at(&Lexeme::Newline) || self.at(&Lexeme::Eof) || self.at(&Lexeme::Dedent) {
                    Stmt::Return(None)
                } else {
                    Stmt::Return(Some(self.parse_expr_list()))
                }
            }
            Lexeme::Assert => {
                self.advance();
                let test = self.parse_expr();
                let msg = if self.eat(&Lexeme::Comma) {
                    Some(self.parse_expr())
                } else {
                    None
                };
                Stmt::Assert { test, msg }
            }
            Lexeme::Raise => {
                self.advance();
                let msg = if self.at(&Lexeme::Newline) || self.at(&Lexeme::Eof) {
                    None
                } else {
                    Some(self.parse_expr())
                };
                Stmt::Raise { msg }
            }
            Lexeme::Log => {
                self.advance();
                Stmt::Log(self.parse_expr())
            }
            Lexeme::If | Lexeme::For => {
                self.error_at_current("compound statement must start on its own line");
                self.synchronize();
                return Spanned::new(Stmt::Pass, start);
            }
            _ => self.parse_expr_stmt(),
        };
        let span = start.merge(self.prev_span());
        self.expect_line_end();
        Spanned::new(stmt, span)
    }

    fn parse_expr_stmt(&mut self) -> Stmt {
        let target = self.parse_expr_list();
        let aug = match self.peek() {
            Lexeme::PlusEq => Some(BinOp::Add),
            Lexeme::MinusEq => Some(BinOp::Sub),
            Lexeme::StarEq => Some(BinOp::Mul),
            Lexeme::SlashEq => Some(BinOp::Div),
            Lexeme::PercentEq => Some(BinOp::Mod),
            _ => None,
        };
        if let Some(op) = aug {
            self.advance();
            let value = self.parse_expr();
            return Stmt::AugAssign { target, op, value };
        }
        if self.eat(&Lexeme::Colon) {
            let name = match &target.kind {
                ExprKind::Name(n) => Spanned::new(n.clone(), target.span),
                _ => {
                    self.error_at("only a plain name can be declared", target.span);
                    Spanned::new("_error_".to_string(), target.span)
                }
            };
            let annotation = self.parse_expr();
            let value = if self.eat(&Lexeme::Eq) {
                Some(self.parse_expr_list())
            } else {
                None
            };
            return Stmt::AnnAssign {
                target: name,
                annotation,
                value,
            };
        }
        if self.eat(&Lexeme::Eq) {
            let value = self.parse_expr_list();
            return Stmt::Assign { target, value };
        }
        Stmt::Expr(target)
    }

    fn parse_if(&mut self) -> Spanned<Stmt> {
        let start = self.current_span();
        // consumes `if` or `elif`
        self.advance();
        if !self.enter_nesting() {
            self.synchronize();
            return Spanned::new(Stmt::Pass, start);
        }
        let test = self.parse_expr();
        self.expect(&Lexeme::Colon);
        let body = self.parse_suite();
        let orelse = if self.at(&Lexeme::Elif) {
            vec![self.parse_if()]
        } else if self.eat(&Lexeme::Else) {
            self.expect(&Lexeme::Colon);
            self.parse_suite()
        } else {
            Vec::new()
        };
        self.exit_nesting();
        let span = start.merge(self.prev_span());
        Spanned::new(Stmt::If { test, body, orelse }, span)
    }

    fn parse_for(&mut self) -> Spanned<Stmt> {
        let start = self.current_span();
        self.advance();
        if !self.enter_nesting() {
            self.synchronize();
            return Spanned::new(Stmt::Pass, start);
        }
        let target = self.expect_ident();
        self.expect(&Lexeme::In);
        let iter = self.parse_expr();
        self.expect(&Lexeme::Colon);
        let body = self.parse_suite();
        self.exit_nesting();
        let span = start.merge(self.prev_span());
        Spanned::new(Stmt::For { target, iter, body }, span)
    }
}
