//! Lexical scopes of one function body.
//!
//! Scopes live in an arena and point at their parent by index, so closing
//! a scope is just moving the cursor back to the parent.

use rustc_hash::FxHashMap;

use super::types::TypeId;
use crate::ast::{Literal, LocalId};
use crate::lexer::Span;

/// Index of a scope in a [`ScopeArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeId(usize);

/// A local variable.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalSymbol {
    /// Slot id
    pub id: LocalId,
    /// Declared type
    pub ty: TypeId,
    /// False for `const`
    pub mutable: bool,
    /// Literal value of a `const`
    pub constant: Option<Literal>,
    /// Declaration site
    pub span: Span,
}

#[derive(Debug, Default)]
struct Scope {
    parent: Option<ScopeId>,
    symbols: FxHashMap<String, LocalSymbol>,
}

/// Result of declaring a local.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Declared {
    /// New name
    Fresh,
    /// Hides a local of an enclosing scope declared at the given span
    Shadows(Span),
    /// Already declared in this very scope at the given span
    Duplicate(Span),
}

/// Arena-allocated scope stack.
#[derive(Debug, Default)]
pub struct ScopeArena {
    scopes: Vec<Scope>,
    current: Option<ScopeId>,
}

impl ScopeArena {
    /// Creates an arena with no open scope.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a child of the current scope.
    pub fn open(&mut self) -> ScopeId {
        let id = ScopeId(self.scopes.len());
        self.scopes.push(Scope {
            parent: self.current,
            symbols: FxHashMap::default(),
        });
        self.current = Some(id);
        id
    }

    /// Closes the current scope.
    pub fn close(&mut self) {
        if let Some(id) = self.current {
            self.current = self.scopes[id.0].parent;
        }
    }

    /// Number of open scopes.
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut cursor = self.current;
        while let Some(id) = cursor {
            depth += 1;
            cursor = self.scopes[id.0].parent;
        }
        depth
    }

    /// Declares a local in the current scope. Duplicates are not inserted.
    pub fn declare(&mut self, name: &str, symbol: LocalSymbol) -> Declared {
        let Some(current) = self.current else {
            return Declared::Fresh;
        };
        if let Some(existing) = self.scopes[current.0].symbols.get(name) {
            return Declared::Duplicate(existing.span);
        }
        let shadowed = self.lookup_from(self.scopes[current.0].parent, name).map(|s| s.span);
        self.scopes[current.0].symbols.insert(name.to_string(), symbol);
        match shadowed {
            Some(span) => Declared::Shadows(span),
            None => Declared::Fresh,
        }
    }

    /// Resolves `name` from the innermost scope outwards.
    pub fn lookup(&self, name: &str) -> Option<&LocalSymbol> {
        self.lookup_from(self.current, name)
    }

    fn lookup_from(&self, mut cursor: Option<ScopeId>, name: &str) -> Option<&LocalSymbol> {
        while let Some(id) = cursor {
            let scope = &self.scopes[id.0];
            if let Some(symbol) = scope.symbols.get(name) {
                return Some(symbol);
            }
            cursor = scope.parent;
        }
        None
    }
}
