//! The per-compile state shared by every pipeline stage.

use std::sync::Arc;

use crate::diagnostics::{Diagnostic, Location, Severity};
use crate::lexer::Span;
use crate::sema::{SymbolTable, TypeTable};

/// State of one top-level compile.
///
/// Owns the global symbol table, the type graph and the accumulated
/// diagnostics. It is dropped once baking is done; nothing in it is needed
/// at runtime.
#[derive(Debug)]
pub struct CompilationUnit {
    file: Arc<str>,
    diagnostics: Vec<Diagnostic>,
    /// Every type referenced by this unit
    pub types: TypeTable,
    /// Module-level names
    pub symbols: SymbolTable,
}

impl CompilationUnit {
    /// Creates an empty unit for the given file name.
    pub fn new(file: impl Into<Arc<str>>) -> Self {
        Self {
            file: file.into(),
            diagnostics: Vec::new(),
            types: TypeTable::new(),
            symbols: SymbolTable::new(),
        }
    }

    /// The file name diagnostics are reported against.
    pub fn file(&self) -> &Arc<str> {
        &self.file
    }

    /// Appends a diagnostic.
    pub fn report(&mut self, severity: Severity, span: Span, message: impl Into<String>) {
        let diagnostic = Diagnostic {
            severity,
            location: Location::new(self.file.clone(), span),
            message: message.into(),
        };
        tracing::debug!(%diagnostic, "diagnostic");
        self.diagnostics.push(diagnostic);
    }

    /// Appends a fatal diagnostic.
    pub fn fatal(&mut self, span: Span, message: impl Into<String>) {
        self.report(Severity::Fatal, span, message);
    }

    /// Appends an error diagnostic.
    pub fn error(&mut self, span: Span, message: impl Into<String>) {
        self.report(Severity::Error, span, message);
    }

    /// Appends a warning.
    pub fn warning(&mut self, span: Span, message: impl Into<String>) {
        self.report(Severity::Warning, span, message);
    }

    /// Appends an informational note.
    pub fn info(&mut self, span: Span, message: impl Into<String>) {
        self.report(Severity::Info, span, message);
    }

    /// All diagnostics so far, in report order.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Returns true if any diagnostic blocks code generation.
    pub fn has_fatal(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_fatal)
    }

    /// Consumes the unit, keeping only the diagnostics.
    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.diagnostics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_fatal_blocks() {
        let mut unit = CompilationUnit::new("a.lm");
        let span = Span::new(0, 1, 1, 1);
        unit.warning(span, "shadowed");
        unit.error(span, "bad enumerator");
        assert!(!unit.has_fatal());
        unit.fatal(span, "undefined");
        assert!(unit.has_fatal());
        assert_eq!(unit.diagnostics().len(), 3);
        assert_eq!(&*unit.diagnostics()[0].location.file, "a.lm");
    }
}
