pub mod api;
pub mod ast;
pub mod codegen;
pub mod diagnostic;
pub mod ir;
pub mod syntax;
pub mod typecheck;

// Re-exports — short `crate::X` paths for the front end
pub use syntax::lexeme;
pub use syntax::lexer;
pub use syntax::parser;
pub use syntax::span;
pub use typecheck::types;

// Re-export public API — `viper::compile_code()` etc.
pub use api::*;

use diagnostic::Diagnostic;
use lexer::Lexer;
use parser::Parser;

/// Lex and parse one source file. `file_id` tags the spans so diagnostics
/// from imported sources can be told apart.
pub(crate) fn parse_source(source: &str, file_id: u16) -> Result<ast::Module, Vec<Diagnostic>> {
    let (tokens, lex_errors) = Lexer::new(source, file_id).tokenize();
    if !lex_errors.is_empty() {
        return Err(lex_errors);
    }
    Parser::new(tokens).parse_module()
}
