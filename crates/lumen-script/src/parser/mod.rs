//! Parser for script source code.
//!
//! Transforms a [`TokenStream`](crate::lexer::TokenStream) into an Abstract
//! Syntax Tree (AST). Syntax errors never abort the parse: each one is
//! recorded as a fatal diagnostic, the offending statement is replaced by
//! [`Statement::Invalid`](crate::ast::Statement::Invalid), and parsing
//! resumes at the next statement boundary.
//!
//! ## Structure
//!
//! - `parser` - Token plumbing, error recovery and statement parsing
//! - `expressions` - Binary precedence table and unary prefix/postfix tables
//! - `prototype` - Type annotation sub-grammar
//!
//! ## Usage
//!
//! ```rust
//! use lumen_script::lexer::Scanner;
//! use lumen_script::parser::Parser;
//! use lumen_script::CompilationUnit;
//!
//! let mut unit = CompilationUnit::new("main.lm");
//! let tokens = Scanner::analyze("let x = 1 + 2;", &mut unit);
//! let program = Parser::parse(tokens, &mut unit);
//! assert_eq!(program.body.len(), 1);
//! ```

mod expressions;
#[allow(clippy::module_inception)]
mod parser;
mod prototype;

pub use parser::{ParseError, Parser};
