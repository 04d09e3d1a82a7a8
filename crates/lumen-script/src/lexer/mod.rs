//! Lexical analysis (tokenization) for script source code.
//!
//! The lexer transforms source text into a [`TokenStream`] consumed by the
//! parser. Literals are decoded here: integers become `i128`, floats `f64`,
//! and strings arrive with escapes resolved.
//!
//! ## Structure
//!
//! - `scanner.rs` - Main `Scanner` struct that produces tokens
//! - `token.rs` - `Token`, `TokenKind` and `TokenStream` definitions
//!
//! ## Usage
//!
//! ```rust
//! use lumen_script::lexer::{Scanner, TokenKind};
//! use lumen_script::CompilationUnit;
//!
//! let mut unit = CompilationUnit::new("main.lm");
//! let stream = Scanner::analyze("let x = 42;", &mut unit);
//!
//! assert_eq!(stream.tokens()[0].kind, TokenKind::Let);
//! assert!(!unit.has_fatal());
//! ```

mod scanner;
mod token;

pub use scanner::Scanner;
pub use token::{Span, Token, TokenKind, TokenStream};
