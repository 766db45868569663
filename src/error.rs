use std::fmt;
use std::fmt::Write;

use pest::Span;

use crate::ast::StringSpan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    DuplicateSymbol,
    UndefinedSymbol,
    VariableNotDefinedBeforeUse,
    SelfReferentialInitializer,
    VariableHasTypeName,
    IncompatibleUnits,
    IncompatibleTypes,
    NonBooleanCondition,
    FunctionDoesNotExist,
    VectorVariableInNonVectorDeclaration,
    MultipleBlocks,
    CodeAfterReturn,
    MissingReturn,
    IllegalForLoop,
    IllegalAssignment,
    IllegalEquationTarget,
    DerivativeOrderTooHigh,
    MissingEquation,
    IncompatibleBufferType,
    UnsupportedShape,
    PropagatorUnavailable,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "Warning"),
            Severity::Error => write!(f, "Error"),
        }
    }
}

/// A single semantic defect found in a model, tied to the source text by an optional span.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub code: ErrorCode,
    pub severity: Severity,
    pub message: String,
    pub span: Option<StringSpan>,
}

impl Diagnostic {
    pub fn error(code: ErrorCode, message: String, span: Option<StringSpan>) -> Self {
        Self {
            code,
            severity: Severity::Error,
            message,
            span,
        }
    }

    pub fn warning(code: ErrorCode, message: String, span: Option<StringSpan>) -> Self {
        Self {
            code,
            severity: Severity::Warning,
            message,
            span,
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    pub fn as_error_message(&self, f: &mut String, input: &str) -> fmt::Result {
        let position = self
            .span
            .and_then(|span| Span::new(input, span.pos_start, span.pos_end))
            .map(|span| span.start_pos().line_col());
        match position {
            Some((line, col)) => write!(
                f,
                "Line {}, Column {}: {}: {}",
                line, col, self.severity, self.message
            ),
            None => write!(f, "{}: {}", self.severity, self.message),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(span) = self.span {
            write!(f, "{}: {}: {}", span, self.severity, self.message)
        } else {
            write!(f, "{}: {}", self.severity, self.message)
        }
    }
}

/// Ordered collection of diagnostics, in the order the checks produced them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diagnostics {
    diagnostics: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, new: Diagnostic) {
        self.diagnostics.push(new);
    }

    pub fn extend(&mut self, new: impl IntoIterator<Item = Diagnostic>) {
        self.diagnostics.extend(new)
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter()
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.is_error())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| !d.is_error())
    }

    pub fn count(&self, code: ErrorCode) -> usize {
        self.diagnostics.iter().filter(|d| d.code == code).count()
    }

    pub fn has_code(&self, code: ErrorCode) -> bool {
        self.count(code) > 0
    }

    pub fn has_error_contains(&self, text: &str) -> bool {
        self.diagnostics.iter().any(|d| d.message.contains(text))
    }

    pub fn as_error_message(&self, input: &str) -> String {
        let mut buf = "\n".to_string();
        for diagnostic in self.diagnostics.iter() {
            // writing into a String cannot fail
            let _ = diagnostic.as_error_message(&mut buf, input);
            buf.push('\n');
        }
        buf
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.diagnostics
    }
}

impl From<Vec<Diagnostic>> for Diagnostics {
    fn from(diagnostics: Vec<Diagnostic>) -> Self {
        Self { diagnostics }
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.diagnostics.into_iter()
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for diagnostic in self.diagnostics.iter() {
            writeln!(f, "{}", diagnostic)?;
        }
        Ok(())
    }
}

impl std::error::Error for Diagnostics {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_message_has_line_and_column() {
        let input = "neuron a:\n  state:\n    V mV = 0\n  end\nend\n";
        let start = input.find("V mV").unwrap();
        let mut diagnostics = Diagnostics::new();
        diagnostics.push(Diagnostic::error(
            ErrorCode::UndefinedSymbol,
            "Variable 'x' is not defined".to_string(),
            Some(StringSpan {
                pos_start: start,
                pos_end: start + 1,
            }),
        ));
        diagnostics.push(Diagnostic::warning(
            ErrorCode::PropagatorUnavailable,
            "no propagator".to_string(),
            None,
        ));
        let message = diagnostics.as_error_message(input);
        assert!(message.contains("Line 3, Column 5: Error: Variable 'x' is not defined"));
        assert!(message.contains("Warning: no propagator"));
        assert!(diagnostics.has_errors());
        assert_eq!(diagnostics.errors().count(), 1);
        assert_eq!(diagnostics.warnings().count(), 1);
    }
}
