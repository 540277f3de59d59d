use num_bigint::BigInt;

use crate::ast::*;
use crate::lexeme::Lexeme;

use super::Parser;

impl Parser {
    // --- Expression parsing (precedence climbing, Python operator order) ---

    pub(super) fn parse_expr(&mut self) -> Expr {
        if !self.enter_nesting() {
            let span = self.current_span();
            self.synchronize();
            return self.mk(ExprKind::Bool(false), span);
        }
        let expr = self.parse_or();
        self.exit_nesting();
        expr
    }

    /// `a, b, c` without brackets becomes a tuple (assignment targets, returns).
    pub(super) fn parse_expr_list(&mut self) -> Expr {
        let first = self.parse_expr();
        if !self.at(&Lexeme::Comma) {
            return first;
        }
        let start = first.span;
        let mut items = vec![first];
        while self.eat(&Lexeme::Comma) {
            if self.at(&Lexeme::Newline) || self.at(&Lexeme::Eq) || self.at(&Lexeme::Eof) {
                break;
            }
            items.push(self.parse_expr());
        }
        let span = start.merge(self.prev_span());
        self.mk(ExprKind::Tuple(items), span)
    }

    fn parse_or(&mut self) -> Expr {
        let first = self.parse_and();
        if !self.at(&Lexeme::Or) {
            return first;
        }
        let mut values = vec![first];
        while self.eat(&Lexeme::Or) {
            values.push(self.parse_and());
        }
        self.bool_op(BoolOpKind::Or, values)
    }

    fn parse_and(&mut self) -> Expr {
        let first = self.parse_not();
        if !self.at(&Lexeme::And) {
            return first;
        }
        let mut values = vec![first];
        while self.eat(&Lexeme::And) {
            values.push(self.parse_not());
        }
        self.bool_op(BoolOpKind::And, values)
    }

    fn bool_op(&mut self, op: BoolOpKind, values: Vec<Expr>) -> Expr {
        let span = values[0].span.merge(values[values.len() - 1].span);
        self.mk(ExprKind::BoolOp { op, values }, span)
    }

    fn parse_not(&mut self) -> Expr {
        if self.at(&Lexeme::Not) {
            let start = self.current_span();
            self.advance();
            let operand = self.parse_not();
            let span = start.merge(operand.span);
            return self.mk(
                ExprKind::UnaryOp {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                },
                span,
            );
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Expr {
        let mut left = self.parse_binary(0);
        loop {
            let op = match self.peek() {
                Lexeme::EqEq => CmpOp::Eq,
                Lexeme::NotEq => CmpOp::NotEq,
                Lexeme::Lt => CmpOp::Lt,
                Lexeme::LtEq => CmpOp::LtE,
                Lexeme::Gt => CmpOp::Gt,
                Lexeme::GtEq => CmpOp::GtE,
                Lexeme::In => CmpOp::In,
                Lexeme::Not if matches!(self.peek_ahead(1), Lexeme::In) => CmpOp::NotIn,
                _ => break,
            };
            self.advance();
            if op == CmpOp::NotIn {
                self.advance();
            }
            let right = self.parse_binary(0);
            let span = left.span.merge(right.span);
            left = self.mk(
                ExprKind::Compare {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span,
            );
        }
        left
    }

    fn parse_binary(&mut self, min_bp: u8) -> Expr {
        let mut lhs = self.parse_unary();
        loop {
            let op = match self.peek() {
                Lexeme::Pipe => BinOp::BitOr,
                Lexeme::Caret => BinOp::BitXor,
                Lexeme::Amp => BinOp::BitAnd,
                Lexeme::Shl => BinOp::Shl,
                Lexeme::Shr => BinOp::Shr,
                Lexeme::Plus => BinOp::Add,
                Lexeme::Minus => BinOp::Sub,
                Lexeme::Star => BinOp::Mul,
                Lexeme::Slash => BinOp::Div,
                Lexeme::Percent => BinOp::Mod,
                _ => break,
            };
            let (l_bp, r_bp) = op_binding_power(op);
            if l_bp < min_bp {
                break;
            }
            self.advance();
            let rhs = self.parse_binary(r_bp);
            let span = lhs.span.merge(rhs.span);
            lhs = self.mk(
                ExprKind::BinOp {
                    op,
                    left: Box::new(lhs),
                    right: Box::new(rhs),
                },
                span,
            );
        }
        lhs
    }

    fn parse_unary(&mut self) -> Expr {
        let start = self.current_span();
        let op = match self.peek() {
            Lexeme::Minus => UnaryOp::Neg,
            Lexeme::Tilde => UnaryOp::Invert,
            _ => return self.parse_power(),
        };
        self.advance();
        let operand = self.parse_unary();
        let span = start.merge(operand.span);
        if op == UnaryOp::Neg {
            // Negative literals are folded so range checks see the real value.
            match &operand.kind {
                ExprKind::Int(n) => return self.mk(ExprKind::Int(-n), span),
                ExprKind::Decimal(s) if !s.starts_with('-') => {
                    return self.mk(ExprKind::Decimal(format!("-{}", s)), span)
                }
                _ => {}
            }
        }
        self.mk(
            ExprKind::UnaryOp {
                op,
                operand: Box::new(operand),
            },
            span,
        )
    }

    fn parse_power(&mut self) -> Expr {
        let atom = self.parse_atom();
        let base = self.parse_postfix(atom);
        if !self.eat(&Lexeme::StarStar) {
            return base;
        }
        let exponent = self.parse_unary();
        let span = base.span.merge(exponent.span);
        self.mk(
            ExprKind::BinOp {
                op: BinOp::Pow,
                left: Box::new(base),
                right: Box::new(exponent),
            },
            span,
        )
    }

    /// Parse postfix operations: `.attr`, `[index]`, `(args)`.
    fn parse_postfix(&mut self, mut expr: Expr) -> Expr {
        loop {
            if self.eat(&Lexeme::Dot) {
                let attr = self.expect_ident();
                let span = expr.span.merge(attr.span);
                expr = self.mk(
                    ExprKind::Attribute {
                        value: Box::new(expr),
                        attr,
                    },
                    span,
                );
            } else if self.eat(&Lexeme::LBracket) {
                let index = self.parse_expr_list();
                self.expect(&Lexeme::RBracket);
                let span = expr.span.merge(self.prev_span());
                expr = self.mk(
                    ExprKind::Subscript {
                        value: Box::new(expr),
                        index: Box::new(index),
                    },
                    span,
                );
            } else if self.eat(&Lexeme::LParen) {
                let (args, keywords) = self.parse_call_args();
                let span = expr.span.merge(self.prev_span());
                expr = self.mk(
                    ExprKind::Call {
                        func: Box::new(expr),
                        args,
                        keywords,
                    },
                    span,
                );
            } else {
                break;
            }
        }
        expr
    }

    /// Arguments after an opening `(`; consumes the closing `)`.
    fn parse_call_args(&mut self) -> (Vec<Expr>, Vec<Keyword>) {
        let mut args = Vec::new();
        let mut keywords = Vec::new();
        while !self.at(&Lexeme::RParen) && !self.at(&Lexeme::Eof) {
            let is_keyword =
                matches!(self.peek(), Lexeme::Ident(_)) && matches!(self.peek_ahead(1), Lexeme::Eq);
            if is_keyword {
                let name = self.expect_ident();
                self.advance();
                let value = self.parse_expr();
                keywords.push(Keyword { name, value });
            } else {
                if !keywords.is_empty() {
                    self.error_at_current("positional argument follows keyword argument");
                }
                args.push(self.parse_expr());
            }
            if !self.eat(&Lexeme::Comma) {
                break;
            }
        }
        self.expect(&Lexeme::RParen);
        (args, keywords)
    }

    fn parse_atom(&mut self) -> Expr {
        let start = self.current_span();
        let kind = match self.peek().clone() {
            Lexeme::Integer(n) => {
                self.advance();
                ExprKind::Int(BigInt::from(n))
            }
            Lexeme::Hex(s) => {
                self.advance();
                ExprKind::Hex(s)
            }
            Lexeme::Decimal(s) => {
                self.advance();
                ExprKind::Decimal(s)
            }
            Lexeme::Str(s) => {
                self.advance();
                ExprKind::Str(s)
            }
            Lexeme::Bytes(b) => {
                self.advance();
                ExprKind::Bytes(b)
            }
            Lexeme::True => {
                self.advance();
                ExprKind::Bool(true)
            }
            Lexeme::False => {
                self.advance();
                ExprKind::Bool(false)
            }
            Lexeme::Ident(name) => {
                self.advance();
                ExprKind::Name(name)
            }
            Lexeme::LParen => {
                self.advance();
                if self.eat(&Lexeme::RParen) {
                    ExprKind::Tuple(Vec::new())
                } else {
                    let first = self.parse_expr();
                    if self.at(&Lexeme::Comma) {
                        let mut items = vec![first];
                        while self.eat(&Lexeme::Comma) {
                            if self.at(&Lexeme::RParen) {
                                break;
                            }
                            items.push(self.parse_expr());
                        }
                        self.expect(&Lexeme::RParen);
                        ExprKind::Tuple(items)
                    } else {
                        self.expect(&Lexeme::RParen);
                        // parenthesized expression keeps its own node
                        return first;
                    }
                }
            }
            Lexeme::LBracket => {
                self.advance();
                let mut items = Vec::new();
                while !self.at(&Lexeme::RBracket) && !self.at(&Lexeme::Eof) {
                    items.push(self.parse_expr());
                    if !self.eat(&Lexeme::Comma) {
                        break;
                    }
                }
                self.expect(&Lexeme::RBracket);
                ExprKind::List(items)
            }
            Lexeme::LBrace => {
                self.advance();
                let mut entries = Vec::new();
                while !self.at(&Lexeme::RBrace) && !self.at(&Lexeme::Eof) {
                    let key = self.expect_ident();
                    self.expect(&Lexeme::Colon);
                    let value = self.parse_expr();
                    entries.push((key, value));
                    if !self.eat(&Lexeme::Comma) {
                        break;
                    }
                }
                self.expect(&Lexeme::RBrace);
                ExprKind::Dict(entries)
            }
            other => {
                self.error_at_current(&format!(
                    "expected an expression, found {}",
                    other.description()
                ));
                // leave the token for the caller's recovery
                ExprKind::Bool(false)
            }
        };
        let span = start.merge(self.prev_span());
        self.mk(kind, span)
    }
}

/// Returns (left binding power, right binding power) for a binary operator.
/// Higher binding power = higher precedence; all are left-associative.
fn op_binding_power(op: BinOp) -> (u8, u8) {
    match op {
        BinOp::BitOr => (2, 3),
        BinOp::BitXor => (4, 5),
        BinOp::BitAnd => (6, 7),
        BinOp::Shl | BinOp::Shr => (8, 9),
        BinOp::Add | BinOp::Sub => (10, 11),
        BinOp::Mul | BinOp::Div | BinOp::Mod => (12, 13),
        // `**` is handled in parse_power
        BinOp::Pow => (14, 15),
    }
}
