mod calls;
mod declarations;
mod layout;
mod scope;
mod statements;

use crate::diagnostic::{Diagnostic, ErrorKind};
use crate::lexer::Lexer;
use crate::parser::Parser;
use crate::typecheck::{analyze, analyze_with, Analysis, AnalysisOptions};

pub(super) fn parse(source: &str) -> crate::ast::Module {
    let (tokens, lex_errors) = Lexer::new(source, 0).tokenize();
    assert!(lex_errors.is_empty(), "lex errors: {:?}", lex_errors);
    Parser::new(tokens).parse_module().unwrap()
}

pub(super) fn check(source: &str) -> Result<Analysis, Vec<Diagnostic>> {
    analyze(&parse(source))
}

pub(super) fn check_with(
    source: &str,
    options: AnalysisOptions<'_>,
) -> Result<Analysis, Vec<Diagnostic>> {
    analyze_with(&parse(source), options)
}

pub(super) fn check_ok(source: &str) -> Analysis {
    match check(source) {
        Ok(analysis) => analysis,
        Err(diags) => panic!("unexpected errors: {:#?}", diags),
    }
}

pub(super) fn check_err(source: &str) -> Vec<Diagnostic> {
    match check(source) {
        Ok(_) => panic!("expected an error for:\n{}", source),
        Err(diags) => diags,
    }
}

/// The first error, which must have the given kind.
pub(super) fn first_err(source: &str, kind: ErrorKind) -> Diagnostic {
    let diags = check_err(source);
    let first = diags[0].clone();
    assert_eq!(first.kind, kind, "wrong kind for {:?}", first);
    first
}
