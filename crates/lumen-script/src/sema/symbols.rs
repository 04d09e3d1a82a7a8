//! Module-level symbols.

use rustc_hash::FxHashMap;

use super::types::TypeId;
use crate::ast::{FunctionId, GlobalId, Literal, NativeId};
use crate::lexer::Span;

/// What a module-level name denotes.
#[derive(Debug, Clone, PartialEq)]
pub enum GlobalSymbol {
    /// Concrete script function
    Function {
        /// Function index
        id: FunctionId,
    },
    /// Generic function template (index into the analyzer's templates)
    GenericFunction(usize),
    /// Host-provided function
    Native {
        /// Native index
        id: NativeId,
        /// Signature
        ty: TypeId,
    },
    /// Module-level variable
    Variable {
        /// Global slot
        id: GlobalId,
        /// Declared type
        ty: TypeId,
        /// False for `const`
        mutable: bool,
        /// Literal value of a `const`
        constant: Option<Literal>,
    },
    /// Struct or enum type
    Type(TypeId),
    /// Generic struct template (index into the analyzer's templates)
    GenericType(usize),
}

/// The global symbol table of one compilation unit.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    symbols: FxHashMap<String, (GlobalSymbol, Span)>,
}

impl SymbolTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares `name`. Returns the span of the previous declaration if the
    /// name is taken, leaving the table unchanged.
    pub fn declare(&mut self, name: &str, symbol: GlobalSymbol, span: Span) -> Result<(), Span> {
        if let Some((_, previous)) = self.symbols.get(name) {
            return Err(*previous);
        }
        self.symbols.insert(name.to_string(), (symbol, span));
        Ok(())
    }

    /// Replaces the meaning of an already declared name.
    pub fn redefine(&mut self, name: &str, symbol: GlobalSymbol) {
        if let Some(entry) = self.symbols.get_mut(name) {
            entry.0 = symbol;
        }
    }

    /// Looks up a name.
    pub fn get(&self, name: &str) -> Option<&GlobalSymbol> {
        self.symbols.get(name).map(|(symbol, _)| symbol)
    }

    /// Number of declared names.
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// Returns true if nothing is declared.
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}
