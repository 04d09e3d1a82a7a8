//! Compile-time diagnostics.
//!
//! Every stage of the pipeline appends to the same list instead of bailing
//! out early, so a single compile surfaces as many problems as possible.
//! Only [`Severity::Fatal`] diagnostics stop the pipeline before optimization
//! and code generation.

use std::fmt;
use std::sync::Arc;

use crate::lexer::Span;

/// How serious a diagnostic is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// Purely informational (e.g. a constant loop condition)
    Info,
    /// Suspicious but valid code (e.g. shadowing)
    Warning,
    /// Invalid code with a usable fallback (e.g. enum renumbering)
    Error,
    /// Invalid code; no artifact will be produced
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Fatal => "fatal",
        };
        f.write_str(label)
    }
}

/// A source location: file, 1-based line and column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location {
    /// The file name the source was compiled under
    pub file: Arc<str>,
    /// 1-based line
    pub line: u32,
    /// 1-based column
    pub column: u32,
}

impl Location {
    /// Creates a location for `span` inside `file`.
    pub fn new(file: Arc<str>, span: Span) -> Self {
        Self {
            file,
            line: span.line,
            column: span.column,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// A single compile-time diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// The severity
    pub severity: Severity,
    /// Where it was reported
    pub location: Location,
    /// Human-readable message
    pub message: String,
}

impl Diagnostic {
    /// Returns true if this diagnostic blocks code generation.
    pub fn is_fatal(&self) -> bool {
        self.severity == Severity::Fatal
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}: {}", self.location, self.severity, self.message)
    }
}
