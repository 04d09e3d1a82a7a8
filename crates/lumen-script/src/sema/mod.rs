//! Semantic analysis.
//!
//! The [`Analyzer`] walks the parsed program once per function body,
//! resolving every name against an arena of lexical scopes and the global
//! [`SymbolTable`], checking types against the unit's [`TypeTable`], and
//! annotating the tree in place. Its output is a [`Module`]: a flat list of
//! concrete functions (generic templates are instantiated per distinct type
//! argument list) plus the module's globals and natives.
//!
//! ## Structure
//!
//! - `analyzer` - Declaration passes, statements, and the module assembly
//! - `expressions` - Expression typing and binding resolution
//! - `generics` - Prototype resolution, template instantiation, inference
//! - `scope` - Arena scope stack
//! - `symbols` - Global symbol table
//! - `types` - The symbol type graph

mod analyzer;
mod expressions;
mod generics;
mod scope;
mod symbols;
mod types;

pub use analyzer::Analyzer;
pub use scope::{Declared, LocalSymbol, ScopeArena, ScopeId};
pub use symbols::{GlobalSymbol, SymbolTable};
pub use types::{AggregateType, EnumType, Field, Primitive, SymbolType, TypeId, TypeTable};

use crate::ast::{FunctionId, Statement};
use crate::lexer::Span;

/// A concrete function ready for code generation.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionInstance {
    /// Display name; generic instances include their arguments
    pub name: String,
    /// Parameter types
    pub params: Vec<TypeId>,
    /// Return type
    pub ret: TypeId,
    /// Annotated body
    pub body: Vec<Statement>,
    /// True for the module initializer
    pub is_init: bool,
    /// Declaration site
    pub span: Span,
}

/// A module-level variable.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalInfo {
    /// Name
    pub name: String,
    /// Type
    pub ty: TypeId,
    /// False for `const`
    pub mutable: bool,
    /// True if the host supplies the value at load time
    pub native: bool,
}

/// A host-provided function.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeInfo {
    /// Name the host binds the implementation under
    pub name: String,
    /// Parameter types
    pub params: Vec<TypeId>,
    /// Return type
    pub ret: TypeId,
}

/// The analyzed program.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Module {
    /// Concrete functions indexed by [`FunctionId`]; index 0 is the
    /// module initializer
    pub functions: Vec<FunctionInstance>,
    /// Globals indexed by [`GlobalId`](crate::ast::GlobalId)
    pub globals: Vec<GlobalInfo>,
    /// Natives indexed by [`NativeId`](crate::ast::NativeId)
    pub natives: Vec<NativeInfo>,
}

impl Module {
    /// The initializer function id.
    pub const INIT: FunctionId = FunctionId(0);

    /// Returns a function by id.
    pub fn function(&self, id: FunctionId) -> Option<&FunctionInstance> {
        self.functions.get(id.0 as usize)
    }
}
