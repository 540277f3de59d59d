use super::*;
use crate::lexer::Lexer;

fn parse(source: &str) -> Module {
    let (tokens, lex_diags) = Lexer::new(source, 0).tokenize();
    assert!(lex_diags.is_empty(), "lex errors: {:?}", lex_diags);
    match Parser::new(tokens).parse_module() {
        Ok(m) => m,
        Err(diags) => panic!("parse errors: {:?}", diags),
    }
}

fn parse_err(source: &str) -> Vec<Diagnostic> {
    let (tokens, _) = Lexer::new(source, 0).tokenize();
    match Parser::new(tokens).parse_module() {
        Ok(_) => panic!("expected a parse error for {:?}", source),
        Err(diags) => diags,
    }
}

/// Parse a single expression via a constant declaration.
fn expr(source: &str) -> Expr {
    let module = parse(&format!("X: constant(uint256) = {}\n", source));
    match &module.items[0].node {
        Item::Variable(v) => v.value.clone().expect("initializer"),
        other => panic!("expected variable, got {:?}", other),
    }
}

fn body(source: &str) -> Block {
    parse(source)
        .functions()
        .next()
        .expect("function")
        .body
        .clone()
}

#[test]
fn test_storage_variable_flags() {
    let m = parse("owner: public(address)\nMAX: constant(uint256) = 10\nTOKEN: immutable(address)\n");
    let vars: Vec<&VariableDecl> = m
        .items
        .iter()
        .filter_map(|i| match &i.node {
            Item::Variable(v) => Some(v),
            _ => None,
        })
        .collect();
    assert_eq!(vars.len(), 3);
    assert!(vars[0].is_public && !vars[0].is_constant);
    assert_eq!(vars[0].annotation.as_name(), Some("address"));
    assert!(vars[1].is_constant);
    assert!(vars[1].value.is_some());
    assert!(vars[2].is_immutable);
}

#[test]
fn test_function_with_decorators_and_defaults() {
    let m = parse(
        "@external\n@nonreentrant(\"lock\")\ndef foo(x: int128, y: uint256 = 3) -> int128:\n    return x\n",
    );
    let f = m.functions().next().unwrap();
    assert_eq!(f.name.node, "foo");
    assert_eq!(f.decorators.len(), 2);
    assert_eq!(f.decorators[0].as_name(), Some("external"));
    assert!(matches!(f.decorators[1].kind, ExprKind::Call { .. }));
    assert_eq!(f.args.len(), 2);
    assert!(f.args[0].default.is_none());
    assert!(f.args[1].default.is_some());
    assert_eq!(f.returns.as_ref().and_then(|r| r.as_name()), Some("int128"));
    assert!(matches!(f.body[0].node, Stmt::Return(Some(_))));
}

#[test]
fn test_event_indexed_fields() {
    let m = parse("event Transfer:\n    sender: indexed(address)\n    value: uint256\n");
    let Item::Event(ev) = &m.items[0].node else {
        panic!("expected event");
    };
    assert_eq!(ev.name.node, "Transfer");
    assert!(ev.fields[0].indexed);
    assert_eq!(ev.fields[0].annotation.as_name(), Some("address"));
    assert!(!ev.fields[1].indexed);
}

#[test]
fn test_struct_enum_interface() {
    let m = parse(
        "struct Point:\n    x: int128\n    y: int128\n\nenum Role:\n    ADMIN\n    USER\n\ninterface Token:\n    def balanceOf(a: address) -> uint256: view\n    def burn(): nonpayable\n",
    );
    let Item::Struct(s) = &m.items[0].node else {
        panic!("expected struct");
    };
    assert_eq!(s.fields.len(), 2);
    let Item::Enum(e) = &m.items[1].node else {
        panic!("expected enum");
    };
    assert_eq!(e.members.len(), 2);
    let Item::Interface(i) = &m.items[2].node else {
        panic!("expected interface");
    };
    assert_eq!(i.functions.len(), 2);
    assert_eq!(i.functions[0].mutability.node, "view");
    assert!(i.functions[1].returns.is_none());
}

#[test]
fn test_imports() {
    let m = parse("from vyper.interfaces import ERC20\nimport foo.bar as baz\nfrom . import sibling\n");
    let imports: Vec<&ImportDecl> = m
        .items
        .iter()
        .filter_map(|i| match &i.node {
            Item::Import(d) => Some(d),
            _ => None,
        })
        .collect();
    assert_eq!(imports[0].dotted(), "vyper.interfaces.ERC20");
    assert_eq!(imports[0].alias.node, "ERC20");
    assert_eq!(imports[1].dotted(), "foo.bar");
    assert_eq!(imports[1].alias.node, "baz");
    assert_eq!(imports[2].level, 1);
    assert_eq!(imports[2].dotted(), ".sibling");
}

#[test]
fn test_precedence_mul_over_add() {
    let e = expr("2 + 3 * 4");
    let ExprKind::BinOp { op, right, .. } = &e.kind else {
        panic!("expected binop");
    };
    assert_eq!(*op, BinOp::Add);
    assert!(matches!(right.kind, ExprKind::BinOp { op: BinOp::Mul, .. }));
}

#[test]
fn test_power_is_right_associative() {
    let e = expr("2 ** 3 ** 2");
    let ExprKind::BinOp { op, right, .. } = &e.kind else {
        panic!("expected binop");
    };
    assert_eq!(*op, BinOp::Pow);
    assert!(matches!(right.kind, ExprKind::BinOp { op: BinOp::Pow, .. }));
}

#[test]
fn test_subtraction_is_left_associative() {
    let e = expr("10 - 3 - 2");
    let ExprKind::BinOp { left, .. } = &e.kind else {
        panic!("expected binop");
    };
    assert!(matches!(left.kind, ExprKind::BinOp { op: BinOp::Sub, .. }));
}

#[test]
fn test_negative_literals_fold() {
    assert_eq!(expr("-5").as_int(), Some(&num_bigint::BigInt::from(-5)));
    assert_eq!(expr("-1.5").kind, ExprKind::Decimal("-1.5".into()));
}

#[test]
fn test_boolean_operators_and_not_in() {
    let e = expr("a and b or not c");
    let ExprKind::BoolOp { op, values } = &e.kind else {
        panic!("expected or");
    };
    assert_eq!(*op, BoolOpKind::Or);
    assert!(matches!(values[0].kind, ExprKind::BoolOp { op: BoolOpKind::And, .. }));
    assert!(matches!(values[1].kind, ExprKind::UnaryOp { op: UnaryOp::Not, .. }));

    let e = expr("x not in y");
    assert!(matches!(e.kind, ExprKind::Compare { op: CmpOp::NotIn, .. }));
}

#[test]
fn test_postfix_chain() {
    let e = expr("self.balances[msg.sender].foo(1, value=2)");
    let ExprKind::Call { func, args, keywords } = &e.kind else {
        panic!("expected call");
    };
    assert_eq!(args.len(), 1);
    assert_eq!(keywords[0].name.node, "value");
    assert!(matches!(func.kind, ExprKind::Attribute { .. }));
}

#[test]
fn test_hashmap_annotation_subscript_is_tuple() {
    let m = parse("balances: HashMap[address, uint256]\n");
    let Item::Variable(v) = &m.items[0].node else {
        panic!("expected variable");
    };
    let ExprKind::Subscript { index, .. } = &v.annotation.kind else {
        panic!("expected subscript");
    };
    assert!(matches!(&index.kind, ExprKind::Tuple(items) if items.len() == 2));
}

#[test]
fn test_collections() {
    assert!(matches!(expr("[1, 2, 3]").kind, ExprKind::List(ref v) if v.len() == 3));
    assert!(matches!(expr("(1, 2)").kind, ExprKind::Tuple(ref v) if v.len() == 2));
    assert!(matches!(expr("(1)").kind, ExprKind::Int(_)));
    assert!(matches!(expr("Point({x: 1, y: 2})").kind, ExprKind::Call { .. }));
}

#[test]
fn test_statements() {
    let b = body(
        "@external\ndef f():\n    x: uint256 = 1\n    x += 2\n    a, b = self.g()\n    assert x > 0, \"bad\"\n    log Foo(x)\n    raise\n",
    );
    assert!(matches!(b[0].node, Stmt::AnnAssign { .. }));
    assert!(matches!(b[1].node, Stmt::AugAssign { op: BinOp::Add, .. }));
    match &b[2].node {
        Stmt::Assign { target, .. } => assert!(matches!(target.kind, ExprKind::Tuple(_))),
        other => panic!("expected assign, got {:?}", other),
    }
    assert!(matches!(b[3].node, Stmt::Assert { msg: Some(_), .. }));
    assert!(matches!(b[4].node, Stmt::Log(_)));
    assert!(matches!(b[5].node, Stmt::Raise { msg: None }));
}

#[test]
fn test_if_elif_else_and_for() {
    let b = body(
        "@external\ndef f():\n    if a:\n        pass\n    elif b:\n        pass\n    else:\n        pass\n    for i in range(10):\n        break\n",
    );
    let Stmt::If { orelse, .. } = &b[0].node else {
        panic!("expected if");
    };
    let Stmt::If { orelse: inner, .. } = &orelse[0].node else {
        panic!("expected elif");
    };
    assert_eq!(inner.len(), 1);
    let Stmt::For { target, body, .. } = &b[1].node else {
        panic!("expected for");
    };
    assert_eq!(target.node, "i");
    assert!(matches!(body[0].node, Stmt::Break));
}

#[test]
fn test_single_line_suite() {
    let b = body("@external\ndef f():\n    for i in range(10, 5): pass\n");
    let Stmt::For { body, .. } = &b[0].node else {
        panic!("expected for");
    };
    assert!(matches!(body[0].node, Stmt::Pass));
}

#[test]
fn test_node_ids_are_unique() {
    let m = parse("@external\ndef f(x: uint256) -> uint256:\n    return x + 1 * 2\n");
    let mut ids = Vec::new();
    for f in m.functions() {
        crate::ast::navigate::walk_block(&f.body, &mut |e| ids.push(e.id));
    }
    let mut sorted = ids.clone();
    sorted.sort();
    sorted.dedup();
    assert_eq!(sorted.len(), ids.len());
    assert!(ids.iter().all(|id| *id < m.node_count));
}

#[test]
fn test_error_missing_colon() {
    let diags = parse_err("@external\ndef f()\n    pass\n");
    assert!(diags[0].message.contains("expected ':'"));
    assert_eq!(diags[0].kind, ErrorKind::Syntax);
}

#[test]
fn test_error_decorator_without_def() {
    let diags = parse_err("@external\nx: uint256\n");
    assert!(diags[0].message.contains("expected 'def'"));
}

#[test]
fn test_error_positional_after_keyword() {
    let diags = parse_err("X: constant(uint256) = f(a=1, 2)\n");
    assert!(diags
        .iter()
        .any(|d| d.message.contains("positional argument follows keyword")));
}

#[test]
fn test_error_deep_nesting() {
    let src = format!("X: constant(uint256) = {}1{}\n", "(".repeat(200), ")".repeat(200));
    let diags = parse_err(&src);
    assert!(diags.iter().any(|d| d.message.contains("nesting depth exceeded")));
}
