//! AST navigation: structural comparison and searches over function bodies.

use super::{Block, Expr, ExprKind, Stmt};
use crate::span::Span;

/// Structural equality that ignores node ids and spans.
pub fn same_expr(a: &Expr, b: &Expr) -> bool {
    match (&a.kind, &b.kind) {
        (ExprKind::Name(x), ExprKind::Name(y)) => x == y,
        (ExprKind::Int(x), ExprKind::Int(y)) => x == y,
        (ExprKind::Decimal(x), ExprKind::Decimal(y)) | (ExprKind::Hex(x), ExprKind::Hex(y)) => {
            x == y
        }
        (ExprKind::Str(x), ExprKind::Str(y)) => x == y,
        (ExprKind::Bytes(x), ExprKind::Bytes(y)) => x == y,
        (ExprKind::Bool(x), ExprKind::Bool(y)) => x == y,
        (
            ExprKind::Attribute {
                value: v1,
                attr: a1,
            },
            ExprKind::Attribute {
                value: v2,
                attr: a2,
            },
        ) => a1.node == a2.node && same_expr(v1, v2),
        (
            ExprKind::Subscript {
                value: v1,
                index: i1,
            },
            ExprKind::Subscript {
                value: v2,
                index: i2,
            },
        ) => same_expr(v1, v2) && same_expr(i1, i2),
        (
            ExprKind::BinOp {
                op: o1,
                left: l1,
                right: r1,
            },
            ExprKind::BinOp {
                op: o2,
                left: l2,
                right: r2,
            },
        ) => o1 == o2 && same_expr(l1, l2) && same_expr(r1, r2),
        (
            ExprKind::UnaryOp {
                op: o1,
                operand: x1,
            },
            ExprKind::UnaryOp {
                op: o2,
                operand: x2,
            },
        ) => o1 == o2 && same_expr(x1, x2),
        (ExprKind::Tuple(xs), ExprKind::Tuple(ys)) | (ExprKind::List(xs), ExprKind::List(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| same_expr(x, y))
        }
        (
            ExprKind::Call {
                func: f1,
                args: a1,
                ..
            },
            ExprKind::Call {
                func: f2,
                args: a2,
                ..
            },
        ) => {
            same_expr(f1, f2)
                && a1.len() == a2.len()
                && a1.iter().zip(a2).all(|(x, y)| same_expr(x, y))
        }
        _ => false,
    }
}

/// True when `target` is `root` or an attribute/subscript path below it.
pub fn is_within(target: &Expr, root: &Expr) -> bool {
    if same_expr(target, root) {
        return true;
    }
    match &target.kind {
        ExprKind::Attribute { value, .. } | ExprKind::Subscript { value, .. } => {
            is_within(value, root)
        }
        _ => false,
    }
}

/// Visit every expression in a block, outermost first.
pub fn walk_block<'a>(block: &'a Block, f: &mut impl FnMut(&'a Expr)) {
    for stmt in block {
        walk_stmt(&stmt.node, f);
    }
}

pub fn walk_stmt<'a>(stmt: &'a Stmt, f: &mut impl FnMut(&'a Expr)) {
    match stmt {
        Stmt::AnnAssign {
            annotation, value, ..
        } => {
            walk_expr(annotation, f);
            if let Some(v) = value {
                walk_expr(v, f);
            }
        }
        Stmt::Assign { target, value } | Stmt::AugAssign { target, value, .. } => {
            walk_expr(target, f);
            walk_expr(value, f);
        }
        Stmt::If { test, body, orelse } => {
            walk_expr(test, f);
            walk_block(body, f);
            walk_block(orelse, f);
        }
        Stmt::For { iter, body, .. } => {
            walk_expr(iter, f);
            walk_block(body, f);
        }
        Stmt::Assert { test, msg } => {
            walk_expr(test, f);
            if let Some(m) = msg {
                walk_expr(m, f);
            }
        }
        Stmt::Raise { msg } | Stmt::Return(msg) => {
            if let Some(m) = msg {
                walk_expr(m, f);
            }
        }
        Stmt::Log(e) | Stmt::Expr(e) => walk_expr(e, f),
        Stmt::Pass | Stmt::Break | Stmt::Continue => {}
    }
}

pub fn walk_expr<'a>(expr: &'a Expr, f: &mut impl FnMut(&'a Expr)) {
    f(expr);
    match &expr.kind {
        ExprKind::Attribute { value, .. } => walk_expr(value, f),
        ExprKind::Subscript { value, index } => {
            walk_expr(value, f);
            walk_expr(index, f);
        }
        ExprKind::Call {
            func,
            args,
            keywords,
        } => {
            walk_expr(func, f);
            for a in args {
                walk_expr(a, f);
            }
            for kw in keywords {
                walk_expr(&kw.value, f);
            }
        }
        ExprKind::BinOp { left, right, .. } | ExprKind::Compare { left, right, .. } => {
            walk_expr(left, f);
            walk_expr(right, f);
        }
        ExprKind::UnaryOp { operand, .. } => walk_expr(operand, f),
        ExprKind::BoolOp { values, .. } | ExprKind::Tuple(values) | ExprKind::List(values) => {
            for v in values {
                walk_expr(v, f);
            }
        }
        ExprKind::Dict(entries) => {
            for (_, v) in entries {
                walk_expr(v, f);
            }
        }
        _ => {}
    }
}

/// Internal calls `self.name(...)` in source order, with the call span.
pub fn self_calls(block: &Block) -> Vec<(String, Span)> {
    let mut calls = Vec::new();
    walk_block(block, &mut |e| {
        if let ExprKind::Call { func, .. } = &e.kind {
            if let Some(name) = func.as_self_attribute() {
                calls.push((name.to_string(), e.span));
            }
        }
    });
    calls
}

/// Targets written by assignments in a block, including nested blocks.
pub fn assignment_targets(block: &Block) -> Vec<&Expr> {
    let mut targets = Vec::new();
    collect_targets(block, &mut targets);
    targets
}

fn collect_targets<'a>(block: &'a Block, out: &mut Vec<&'a Expr>) {
    for stmt in block {
        match &stmt.node {
            Stmt::Assign { target, .. } | Stmt::AugAssign { target, .. } => match &target.kind {
                ExprKind::Tuple(items) => out.extend(items.iter()),
                _ => out.push(target),
            },
            Stmt::If { body, orelse, .. } => {
                collect_targets(body, out);
                collect_targets(orelse, out);
            }
            Stmt::For { body, .. } => collect_targets(body, out),
            _ => {}
        }
    }
}

/// Receivers of mutating dynamic-array method calls (`x.append(..)`, `x.pop()`).
pub fn mutating_method_receivers(block: &Block) -> Vec<&Expr> {
    let mut receivers = Vec::new();
    walk_block(block, &mut |e| {
        if let ExprKind::Call { func, .. } = &e.kind {
            if let ExprKind::Attribute { value, attr } = &func.kind {
                if matches!(attr.node.as_str(), "append" | "pop" | "extend") {
                    receivers.push(value.as_ref());
                }
            }
        }
    });
    receivers
}

/// Does any write in `block` touch `root` or something beneath it?
pub fn block_modifies(block: &Block, root: &Expr) -> Option<Span> {
    assignment_targets(block)
        .into_iter()
        .chain(mutating_method_receivers(block))
        .find(|t| is_within(t, root) || is_within(root, t))
        .map(|t| t.span)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::parser::Parser;

    fn body_of(source: &str) -> Block {
        let (tokens, _) = Lexer::new(source, 0).tokenize();
        let module = Parser::new(tokens).parse_module().unwrap();
        let body = module.functions().next().unwrap().body.clone();
        body
    }

    #[test]
    fn finds_self_calls() {
        let body = body_of("@external\ndef f():\n    self.a()\n    x: uint256 = self.b(1) + 2\n");
        let names: Vec<String> = self_calls(&body).into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn detects_nested_modification() {
        let body = body_of("@external\ndef f():\n    if True:\n        self.xs[1] = 2\n");
        let root = body_of("@external\ndef f():\n    self.xs = 1\n");
        let Stmt::Assign { target, .. } = &root[0].node else {
            panic!("expected assignment");
        };
        assert!(block_modifies(&body, target).is_some());
    }

    #[test]
    fn detects_append_on_iterated_list() {
        let body = body_of("@external\ndef f():\n    self.xs.append(3)\n");
        let root = body_of("@external\ndef f():\n    self.xs = 1\n");
        let Stmt::Assign { target, .. } = &root[0].node else {
            panic!("expected assignment");
        };
        assert!(block_modifies(&body, target).is_some());
    }

    #[test]
    fn unrelated_writes_are_ignored() {
        let body = body_of("@external\ndef f():\n    self.ys[0] = 1\n");
        let root = body_of("@external\ndef f():\n    self.xs = 1\n");
        let Stmt::Assign { target, .. } = &root[0].node else {
            panic!("expected assignment");
        };
        assert!(block_modifies(&body, target).is_none());
    }
}
