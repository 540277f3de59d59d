use crate::ast::*;
use crate::lexeme::Lexeme;
use crate::span::Spanned;

use super::Parser;

impl Parser {
    pub(super) fn parse_items(&mut self) -> Vec<Spanned<Item>> {
        let mut items = Vec::new();
        loop {
            while self.eat(&Lexeme::Newline) {}
            if self.at(&Lexeme::Eof) {
                break;
            }
            if self.at(&Lexeme::Indent) || self.at(&Lexeme::Dedent) {
                self.error_at_current("unexpected indentation at module level");
                self.advance();
                continue;
            }
            let start = self.current_span();
            let before = self.pos;
            let item = match self.peek() {
                Lexeme::At | Lexeme::Def => self.parse_function().map(Item::Function),
                Lexeme::Event => Some(Item::Event(self.parse_event())),
                Lexeme::Struct => Some(Item::Struct(self.parse_struct())),
                Lexeme::Enum => Some(Item::Enum(self.parse_enum())),
                Lexeme::Interface => Some(Item::Interface(self.parse_interface())),
                Lexeme::Import | Lexeme::From => Some(Item::Import(self.parse_import())),
                Lexeme::Ident(_) => Some(Item::Variable(self.parse_variable())),
                other => {
                    let msg = format!("expected a declaration, found {}", other.description());
                    self.error_at_current(&msg);
                    self.synchronize();
                    None
                }
            };
            if let Some(item) = item {
                let span = start.merge(self.prev_span());
                items.push(Spanned::new(item, span));
            }
            if self.pos == before {
                self.advance();
            }
        }
        items
    }

    fn parse_function(&mut self) -> Option<FunctionDecl> {
        let mut decorators = Vec::new();
        while self.eat(&Lexeme::At) {
            decorators.push(self.parse_expr());
            self.expect_line_end();
            while self.eat(&Lexeme::Newline) {}
        }
        if !self.at(&Lexeme::Def) {
            self.error_at_current(&format!(
                "expected 'def' after decorators, found {}",
                self.peek().description()
            ));
            self.synchronize();
            return None;
        }
        self.advance();
        let name = self.expect_ident();
        let args = self.parse_args();
        let returns = if self.eat(&Lexeme::Arrow) {
            Some(self.parse_expr())
        } else {
            None
        };
        self.expect(&Lexeme::Colon);
        let body = self.parse_suite();
        Some(FunctionDecl {
            name,
            decorators,
            args,
            returns,
            body,
        })
    }

    fn parse_args(&mut self) -> Vec<Arg> {
        let mut args = Vec::new();
        self.expect(&Lexeme::LParen);
        while !self.at(&Lexeme::RParen) && !self.at(&Lexeme::Eof) {
            let name = self.expect_ident();
            self.expect(&Lexeme::Colon);
            let annotation = self.parse_expr();
            let default = if self.eat(&Lexeme::Eq) {
                Some(self.parse_expr())
            } else {
                None
            };
            args.push(Arg {
                name,
                annotation,
                default,
            });
            if !self.eat(&Lexeme::Comma) {
                break;
            }
        }
        self.expect(&Lexeme::RParen);
        args
    }

    /// Parse an indented body of one-line members, handing each line to `f`.
    fn parse_member_block(&mut self, mut f: impl FnMut(&mut Self)) {
        self.expect(&Lexeme::Colon);
        if !self.eat(&Lexeme::Newline) {
            // `event Foo: pass`
            if !self.eat(&Lexeme::Pass) {
                self.error_at_current("expected an indented member block");
            }
            self.expect_line_end();
            return;
        }
        if !self.eat(&Lexeme::Indent) {
            self.error_at_current("expected an indented member block");
            return;
        }
        while !self.at(&Lexeme::Dedent) && !self.at(&Lexeme::Eof) {
            if self.eat(&Lexeme::Newline) {
                continue;
            }
            if self.eat(&Lexeme::Pass) {
                self.expect_line_end();
                continue;
            }
            let before = self.pos;
            f(self);
            if self.pos == before {
                self.synchronize();
            }
        }
        self.eat(&Lexeme::Dedent);
    }

    fn parse_event(&mut self) -> EventDecl {
        self.advance();
        let name = self.expect_ident();
        let mut fields = Vec::new();
        self.parse_member_block(|p| {
            let field_name = p.expect_ident();
            p.expect(&Lexeme::Colon);
            let annotation = p.parse_expr();
            let inner = match &annotation.kind {
                ExprKind::Call { func, args, .. }
                    if func.as_name() == Some("indexed") && args.len() == 1 =>
                {
                    Some(args[0].clone())
                }
                _ => None,
            };
            let (annotation, indexed) = match inner {
                Some(inner) => (inner, true),
                None => (annotation, false),
            };
            fields.push(EventField {
                name: field_name,
                annotation,
                indexed,
            });
            p.expect_line_end();
        });
        EventDecl { name, fields }
    }

    fn parse_struct(&mut self) -> StructDecl {
        self.advance();
        let name = self.expect_ident();
        let mut fields = Vec::new();
        self.parse_member_block(|p| {
            let field_name = p.expect_ident();
            p.expect(&Lexeme::Colon);
            let annotation = p.parse_expr();
            fields.push((field_name, annotation));
            p.expect_line_end();
        });
        StructDecl { name, fields }
    }

    fn parse_enum(&mut self) -> EnumDecl {
        self.advance();
        let name = self.expect_ident();
        let mut members = Vec::new();
        self.parse_member_block(|p| {
            members.push(p.expect_ident());
            p.expect_line_end();
        });
        EnumDecl { name, members }
    }

    fn parse_interface(&mut self) -> InterfaceDecl {
        self.advance();
        let name = self.expect_ident();
        let mut functions = Vec::new();
        self.parse_member_block(|p| {
            if !p.at(&Lexeme::Def) {
                p.error_at_current("interface bodies may only contain function signatures");
                p.synchronize();
                return;
            }
            p.advance();
            let fn_name = p.expect_ident();
            let args = p.parse_args();
            let returns = if p.eat(&Lexeme::Arrow) {
                Some(p.parse_expr())
            } else {
                None
            };
            p.expect(&Lexeme::Colon);
            let mutability = p.expect_ident();
            functions.push(InterfaceFn {
                name: fn_name,
                args,
                returns,
                mutability,
            });
            p.expect_line_end();
        });
        InterfaceDecl { name, functions }
    }

    fn parse_import(&mut self) -> ImportDecl {
        if self.eat(&Lexeme::Import) {
            let start = self.current_span();
            let path = self.parse_dotted();
            let alias = if self.eat(&Lexeme::As) {
                self.expect_ident()
            } else {
                let last = path.last().cloned().unwrap_or_default();
                Spanned::new(last, start.merge(self.prev_span()))
            };
            self.expect_line_end();
            return ImportDecl {
                level: 0,
                path,
                alias,
            };
        }

        self.expect(&Lexeme::From);
        let mut level = 0;
        while self.eat(&Lexeme::Dot) {
            level += 1;
        }
        let mut path = if self.at(&Lexeme::Import) {
            Vec::new()
        } else {
            self.parse_dotted()
        };
        self.expect(&Lexeme::Import);
        let name = self.expect_ident();
        path.push(name.node.clone());
        let alias = if self.eat(&Lexeme::As) {
            self.expect_ident()
        } else {
            name
        };
        self.expect_line_end();
        ImportDecl { level, path, alias }
    }

    fn parse_dotted(&mut self) -> Vec<String> {
        let mut parts = vec![self.expect_ident().node];
        while self.eat(&Lexeme::Dot) {
            parts.push(self.expect_ident().node);
        }
        parts
    }

    fn parse_variable(&mut self) -> VariableDecl {
        let name = self.expect_ident();
        self.expect(&Lexeme::Colon);
        let mut annotation = self.parse_expr();
        let mut is_public = false;
        let mut is_constant = false;
        let mut is_immutable = false;
        loop {
            let unwrapped = match &annotation.kind {
                ExprKind::Call { func, args, .. } if args.len() == 1 => {
                    match func.as_name() {
                        Some("public") if !is_public => {
                            is_public = true;
                            Some(args[0].clone())
                        }
                        Some("constant") if !is_constant => {
                            is_constant = true;
                            Some(args[0].clone())
                        }
                        Some("immutable") if !is_immutable => {
                            is_immutable = true;
                            Some(args[0].clone())
                        }
                        _ => None,
                    }
                }
                _ => None,
            };
            match unwrapped {
                Some(inner) => annotation = inner,
                None => break,
            }
        }
        let value = if self.eat(&Lexeme::Eq) {
            Some(self.parse_expr())
        } else {
            None
        };
        self.expect_line_end();
        VariableDecl {
            name,
            annotation,
            value,
            is_public,
            is_constant,
            is_immutable,
        }
    }
}
