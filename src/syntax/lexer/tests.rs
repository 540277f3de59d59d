use super::*;

fn lex(source: &str) -> Vec<Lexeme> {
    let (tokens, diags) = Lexer::new(source, 0).tokenize();
    assert!(diags.is_empty(), "unexpected diagnostics: {:?}", diags);
    tokens.into_iter().map(|t| t.node).collect()
}

fn ident(s: &str) -> Lexeme {
    Lexeme::Ident(s.to_string())
}

#[test]
fn test_simple_declaration() {
    let toks = lex("x: uint256");
    assert_eq!(
        toks,
        vec![
            ident("x"),
            Lexeme::Colon,
            ident("uint256"),
            Lexeme::Newline,
            Lexeme::Eof
        ]
    );
}

#[test]
fn test_indent_dedent() {
    let toks = lex("def f():\n    pass\nx: bool\n");
    assert_eq!(
        toks,
        vec![
            Lexeme::Def,
            ident("f"),
            Lexeme::LParen,
            Lexeme::RParen,
            Lexeme::Colon,
            Lexeme::Newline,
            Lexeme::Indent,
            Lexeme::Pass,
            Lexeme::Newline,
            Lexeme::Dedent,
            ident("x"),
            Lexeme::Colon,
            ident("bool"),
            Lexeme::Newline,
            Lexeme::Eof,
        ]
    );
}

#[test]
fn test_dedent_at_eof() {
    let toks = lex("def f():\n    if True:\n        pass");
    let dedents = toks.iter().filter(|t| **t == Lexeme::Dedent).count();
    let indents = toks.iter().filter(|t| **t == Lexeme::Indent).count();
    assert_eq!(indents, 2);
    assert_eq!(dedents, 2);
}

#[test]
fn test_blank_and_comment_lines_ignored() {
    let toks = lex("def f():\n\n    # comment\n    pass  # trailing\n");
    assert!(toks.contains(&Lexeme::Pass));
    assert_eq!(toks.iter().filter(|t| **t == Lexeme::Indent).count(), 1);
}

#[test]
fn test_newlines_inside_brackets() {
    let toks = lex("x: uint256 = foo(\n    1,\n    2\n)\n");
    assert_eq!(toks.iter().filter(|t| **t == Lexeme::Newline).count(), 1);
    assert!(!toks.contains(&Lexeme::Indent));
}

#[test]
fn test_number_literals() {
    let toks = lex("1_000 0xFF 3.25");
    assert_eq!(toks[0], Lexeme::Integer(BigUint::from(1000u32)));
    assert_eq!(toks[1], Lexeme::Hex("0xFF".to_string()));
    assert_eq!(toks[2], Lexeme::Decimal("3.25".to_string()));
}

#[test]
fn test_big_integer_literal() {
    let toks = lex("115792089237316195423570985008687907853269984665640564039457584007913129639935");
    match &toks[0] {
        Lexeme::Integer(n) => assert_eq!(n.bits(), 256),
        other => panic!("expected integer, got {:?}", other),
    }
}

#[test]
fn test_string_and_bytes() {
    let toks = lex("\"hi\\n\" b'\\x01\\x02'");
    assert_eq!(toks[0], Lexeme::Str("hi\n".to_string()));
    assert_eq!(toks[1], Lexeme::Bytes(vec![1, 2]));
}

#[test]
fn test_operators() {
    let toks = lex("a ** b << c != d -> e += f //");
    assert!(toks.contains(&Lexeme::StarStar));
    assert!(toks.contains(&Lexeme::Shl));
    assert!(toks.contains(&Lexeme::NotEq));
    assert!(toks.contains(&Lexeme::Arrow));
    assert!(toks.contains(&Lexeme::PlusEq));
}

#[test]
fn test_keywords() {
    let toks = lex("for i in range(3): pass");
    assert_eq!(toks[0], Lexeme::For);
    assert_eq!(toks[2], Lexeme::In);
}

#[test]
fn test_unterminated_string_reports() {
    let (_, diags) = Lexer::new("x = \"abc\n", 0).tokenize();
    assert_eq!(diags.len(), 1);
    assert_eq!(diags[0].kind, ErrorKind::Syntax);
}

#[test]
fn test_bad_dedent_reports() {
    let (_, diags) = Lexer::new("def f():\n        pass\n    pass\n", 0).tokenize();
    assert!(!diags.is_empty());
}

#[test]
fn test_unexpected_character() {
    let (_, diags) = Lexer::new("x = $", 0).tokenize();
    assert!(diags[0].message.contains("unexpected character"));
}
