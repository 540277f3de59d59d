use std::fmt;

use crate::span::Span;

/// A compiler diagnostic (error or warning).
#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: ErrorKind,
    pub message: String,
    pub span: Span,
    pub notes: Vec<String>,
    pub help: Option<String>,
    /// The name whose lookup failed, for errors that a later declaration
    /// could resolve.
    pub undeclared: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// Category of a compile error. Each variant is a distinct condition class.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Lexer or parser failure.
    Syntax,
    /// Well-formed syntax used in the wrong place, bad decorators, uncallable callee.
    Structure,
    /// Duplicate declaration, reserved identifier, or undeclared name.
    Namespace,
    /// Incompatible types in assignment, argument, return, or operand.
    TypeMismatch,
    /// A literal whose class is not accepted by the target type.
    InvalidLiteral,
    /// A literal or constant expression outside the representable range.
    Overflow,
    /// Illegal state access or modification of a non-writable location.
    StateAccess,
    /// Mutability-violating or cyclic function call.
    CallViolation,
    /// Malformed loop bounds or iteration target.
    Iterator,
    /// Internal compiler consistency failure.
    Panic,
}

impl ErrorKind {
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::Syntax => "SyntaxException",
            ErrorKind::Structure => "StructureException",
            ErrorKind::Namespace => "NamespaceCollision",
            ErrorKind::TypeMismatch => "TypeMismatch",
            ErrorKind::InvalidLiteral => "InvalidLiteral",
            ErrorKind::Overflow => "OverflowException",
            ErrorKind::StateAccess => "StateAccessViolation",
            ErrorKind::CallViolation => "CallViolation",
            ErrorKind::Iterator => "IteratorException",
            ErrorKind::Panic => "CompilerPanic",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Diagnostic {
    pub fn error(kind: ErrorKind, message: impl Into<String>, span: Span) -> Self {
        Self {
            severity: Severity::Error,
            kind,
            message: message.into(),
            span,
            notes: Vec::new(),
            help: None,
            undeclared: None,
        }
    }

    pub fn warning(message: impl Into<String>, span: Span) -> Self {
        Self {
            severity: Severity::Warning,
            kind: ErrorKind::Structure,
            message: message.into(),
            span,
            notes: Vec::new(),
            help: None,
            undeclared: None,
        }
    }

    /// A reference to `name` before anything by that name was declared.
    pub fn undeclared(name: &str, message: impl Into<String>, span: Span) -> Self {
        Self {
            undeclared: Some(name.to_string()),
            ..Self::error(ErrorKind::Namespace, message, span)
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// Attach a span if the diagnostic was raised without one.
    pub fn or_span(mut self, span: Span) -> Self {
        if self.span.is_dummy() {
            self.span = span;
        }
        self
    }

    /// Plain-text rendering: `line L:C <message>` followed by the offending
    /// source line and a caret under the error column.
    pub fn pretty(&self, source: &str) -> String {
        let mut out = format!("{}: {}", self.kind, self.message);
        if !self.span.is_dummy() {
            let (line, col) = self.span.line_col(source);
            let text = source.lines().nth(line - 1).unwrap_or("");
            out = format!(
                "line {}:{} {}\n{}\n{}^",
                line,
                col,
                out,
                text,
                " ".repeat(col.saturating_sub(1))
            );
        }
        for note in &self.notes {
            out.push_str(&format!("\nnote: {}", note));
        }
        if let Some(help) = &self.help {
            out.push_str(&format!("\nhelp: {}", help));
        }
        out
    }

    /// Render the diagnostic to stderr using ariadne.
    pub fn render(&self, filename: &str, source: &str) {
        use ariadne::{Color, Label, Report, ReportKind, Source};

        let kind = match self.severity {
            Severity::Error => ReportKind::Error,
            Severity::Warning => ReportKind::Warning,
        };

        let color = match self.severity {
            Severity::Error => Color::Red,
            Severity::Warning => Color::Yellow,
        };

        let start = (self.span.start as usize).min(source.len());
        let end = (self.span.end as usize).clamp(start, source.len());
        let mut report = Report::build(kind, filename, start)
            .with_code(self.kind.name())
            .with_message(&self.message)
            .with_label(
                Label::new((filename, start..end))
                    .with_message(&self.message)
                    .with_color(color),
            );

        for note in &self.notes {
            report = report.with_note(note);
        }

        if let Some(help) = &self.help {
            report = report.with_help(help);
        }

        // stderr may be closed; nothing useful to do then
        let _ = report.finish().eprint((filename, Source::from(source)));
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Render a list of diagnostics.
pub fn render_diagnostics(diagnostics: &[Diagnostic], filename: &str, source: &str) {
    for diag in diagnostics {
        diag.render(filename, source);
    }
}

/// Shorthand result type for analysis passes that stop at the first error.
pub type DiagResult<T> = Result<T, Diagnostic>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_construction() {
        let span = Span::new(0, 10, 15);
        let d = Diagnostic::error(ErrorKind::TypeMismatch, "type mismatch", span);
        assert_eq!(d.severity, Severity::Error);
        assert_eq!(d.kind, ErrorKind::TypeMismatch);
        assert_eq!(d.message, "type mismatch");
        assert_eq!(d.span.start, 10);
        assert!(d.notes.is_empty());
        assert!(d.help.is_none());
    }

    #[test]
    fn test_chained_builders() {
        let d = Diagnostic::warning("hint", Span::new(0, 0, 5))
            .with_note("note 1")
            .with_help("help text")
            .with_note("note 2");
        assert_eq!(d.severity, Severity::Warning);
        assert_eq!(d.notes.len(), 2);
        assert_eq!(d.help.as_deref(), Some("help text"));
    }

    #[test]
    fn test_pretty_points_at_column() {
        let source = "x: uint256\ny: int128 = 300\n";
        let d = Diagnostic::error(ErrorKind::Overflow, "value too large", Span::new(0, 23, 26));
        let text = d.pretty(source);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "line 2:13 OverflowException: value too large");
        assert_eq!(lines[1], "y: int128 = 300");
        assert_eq!(lines[2], "            ^");
    }

    #[test]
    fn test_pretty_without_span() {
        let d = Diagnostic::error(ErrorKind::Panic, "bad node", Span::dummy());
        assert_eq!(d.pretty("whatever"), "CompilerPanic: bad node");
    }

    #[test]
    fn test_or_span_keeps_existing() {
        let d = Diagnostic::error(ErrorKind::Namespace, "x", Span::new(0, 1, 2))
            .or_span(Span::new(0, 7, 8));
        assert_eq!(d.span.start, 1);
        let d = Diagnostic::error(ErrorKind::Namespace, "x", Span::dummy())
            .or_span(Span::new(0, 7, 8));
        assert_eq!(d.span.start, 7);
    }

    #[test]
    fn test_render_does_not_panic() {
        let source = "@external\ndef foo():\n    x: uint256 = -1\n";
        let d = Diagnostic::error(ErrorKind::InvalidLiteral, "negative", Span::new(0, 36, 38))
            .with_help("use an int type");
        d.render("test.vy", source);
    }
}
