//! Bytecode compiler.
//!
//! Transforms an analyzed [`Module`](crate::sema::Module) into a
//! [`Buildable`]: a symbolic instruction stream with labels plus the pool of
//! static objects it refers to. Baking it into bytes is the job of
//! [`bytecode::bake`](crate::bytecode::bake).
//!
//! # Module Structure
//!
//! - `buildable`: The symbolic instruction stream and static pool
//! - `codegen`: Code generation from the annotated AST
//!   - `codegen::scope`: Local slot tracking and loop/try nesting

mod buildable;
pub mod codegen;

pub use buildable::{Buildable, StaticPool};
pub use codegen::Compiler;
