// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! # lumen-script
//!
//! An embeddable, statically typed scripting language: a compiler from
//! source text to a portable bytecode artifact, and a multi-threaded,
//! garbage-collected virtual machine that runs it.
//!
//! ## Pipeline
//!
//! ```text
//! source ─▶ lexer ─▶ parser ─▶ analyzer ─▶ optimizer ─▶ compiler ─▶ bake
//!                                                                     │
//!                         decompile ◀── Artifact ◀────────────────────┘
//!                                          │
//!                                          ▼
//!                                   Script (VM threads)
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use lumen_script::{BindingContext, ModuleContext, Script, Value, VmConfig, compile};
//!
//! let compilation = compile("fn add(a: i32, b: i32) -> i32 { return a + b; }", &ModuleContext::new());
//! let artifact = compilation.into_result().unwrap();
//! let script = Script::run(&artifact, &BindingContext::new(), VmConfig::default()).unwrap();
//! let add = script.function("add").unwrap();
//! let sum = script.call_function(&add, &[Value::I32(2), Value::I32(3)]).unwrap();
//! assert_eq!(sum, Value::I32(5));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod ast;
pub mod bytecode;
pub mod compiler;
pub mod config;
pub mod diagnostics;
pub mod gc;
pub mod lexer;
pub mod optimizer;
pub mod parser;
pub mod runtime;
pub mod sema;
pub mod unit;
pub mod vm;

use thiserror::Error;
use tracing::{debug, info};

use crate::ast::Prototype;
use crate::bytecode::{ArtifactError, DecodeError, bake};
use crate::compiler::Compiler;
use crate::lexer::{Scanner, Span};
use crate::optimizer::Optimizer;
use crate::parser::Parser;
use crate::sema::Analyzer;

// Re-exports for convenience
pub use bytecode::Artifact;
pub use config::{CompileOptions, VmConfig};
pub use diagnostics::{Diagnostic, Severity};
pub use gc::HeapStats;
pub use runtime::{BindingContext, NativeCall, NativeFn, NativeStatus, Tag, Value};
pub use unit::CompilationUnit;
pub use vm::{FunctionHandle, Script, ThreadHandle, ThreadStatus};

/// Errors reported to the host.
#[derive(Debug, Error)]
pub enum Error {
    /// Compilation produced fatal diagnostics
    #[error("compilation failed: {0}")]
    Compile(String),
    /// Bytecode does not decode or verify
    #[error("invalid bytecode: {0}")]
    Decode(#[from] DecodeError),
    /// A persisted artifact is malformed
    #[error("invalid artifact: {0}")]
    Artifact(#[from] ArtifactError),
    /// The artifact declares a native with no implementation bound
    #[error("native function '{0}' is not bound")]
    UnboundNative(String),
    /// The artifact declares a native global with no value bound
    #[error("native global '{0}' is not bound")]
    UnboundGlobal(String),
    /// Every execution thread is in use
    #[error("thread limit of {0} reached")]
    ThreadLimit(usize),
    /// The OS refused to start a thread
    #[error("failed to spawn thread: {0}")]
    Spawn(String),
    /// A script exception reached the host
    #[error("unhandled exception on thread {thread}: {message}")]
    Unhandled {
        /// Id of the thread that halted
        thread: usize,
        /// The exception, formatted
        message: String,
    },
    /// A VM-fatal condition
    #[error("fatal: {0}")]
    Fatal(String),
    /// The VM was left unusable by an earlier failure
    #[error("vm is not good; reset it first")]
    VmNotGood,
    /// A host call that does not fit the target
    #[error("invalid call: {0}")]
    InvalidCall(String),
}

/// Result type for host-facing operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Host declarations visible to scripts at compile time.
///
/// Prototypes use the language's type syntax, e.g. `fn(string) -> i32`.
///
/// ```
/// use lumen_script::{ModuleContext, compile};
///
/// let mut context = ModuleContext::new();
/// context
///     .declare_native("print", "fn(string)")
///     .declare_global("limit", "i32", false);
/// let compilation = compile("fn main() { if (limit > 0) { print(\"hi\"); } }", &context);
/// assert!(compilation.success);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ModuleContext {
    natives: Vec<(String, String)>,
    globals: Vec<(String, String, bool)>,
}

impl ModuleContext {
    /// Creates a context with no declarations.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a native function with a `fn(...) -> ...` prototype.
    pub fn declare_native(&mut self, name: impl Into<String>, proto: impl Into<String>) -> &mut Self {
        self.natives.push((name.into(), proto.into()));
        self
    }

    /// Declares a native global variable.
    pub fn declare_global(
        &mut self,
        name: impl Into<String>,
        proto: impl Into<String>,
        mutable: bool,
    ) -> &mut Self {
        self.globals.push((name.into(), proto.into(), mutable));
        self
    }

    /// Parses every prototype, reporting malformed ones to `unit`.
    fn prototypes(&self, unit: &mut CompilationUnit) -> (Vec<(&str, Prototype)>, Vec<(&str, Prototype, bool)>) {
        let natives = self
            .natives
            .iter()
            .filter_map(|(name, proto)| Some((name.as_str(), parse_prototype(name, proto, unit)?)))
            .collect();
        let globals = self
            .globals
            .iter()
            .filter_map(|(name, proto, mutable)| {
                Some((name.as_str(), parse_prototype(name, proto, unit)?, *mutable))
            })
            .collect();
        (natives, globals)
    }
}

fn parse_prototype(name: &str, source: &str, unit: &mut CompilationUnit) -> Option<Prototype> {
    let stream = Scanner::analyze(source, unit);
    match Parser::new(stream).parse_standalone_prototype() {
        Ok(proto) => Some(proto),
        Err(err) => {
            unit.fatal(err.span, format!("prototype of '{}': {}", name, err.message));
            None
        }
    }
}

/// The outcome of one compile.
#[derive(Debug, Clone)]
pub struct Compilation {
    /// True when no fatal diagnostic was reported
    pub success: bool,
    /// Everything every stage reported, in order
    pub diagnostics: Vec<Diagnostic>,
    /// The artifact, present exactly when `success` is true
    pub artifact: Option<Artifact>,
}

impl Compilation {
    fn failed(diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            success: false,
            diagnostics,
            artifact: None,
        }
    }

    /// The artifact, or an error listing the fatal diagnostics.
    pub fn into_result(self) -> Result<Artifact> {
        match self.artifact {
            Some(artifact) if self.success => Ok(artifact),
            _ => {
                let fatal: Vec<String> = self
                    .diagnostics
                    .iter()
                    .filter(|d| d.is_fatal())
                    .map(ToString::to_string)
                    .collect();
                Err(Error::Compile(fatal.join("; ")))
            }
        }
    }
}

/// Compiles `source` with default options.
pub fn compile(source: &str, context: &ModuleContext) -> Compilation {
    compile_with(source, context, &CompileOptions::default())
}

/// Compiles `source` through every stage.
///
/// Lexing, parsing and analysis always run to completion so one compile
/// surfaces as many problems as possible; any fatal diagnostic then stops
/// the pipeline before optimization.
pub fn compile_with(source: &str, context: &ModuleContext, options: &CompileOptions) -> Compilation {
    let mut unit = CompilationUnit::new(options.file_name.as_str());
    let stream = Scanner::analyze(source, &mut unit);
    let program = Parser::parse(stream, &mut unit);
    let (natives, globals) = context.prototypes(&mut unit);

    let mut analyzer = Analyzer::new(&mut unit);
    for (name, proto) in &natives {
        analyzer.declare_native(name, proto);
    }
    for (name, proto, mutable) in &globals {
        analyzer.declare_native_global(name, proto, *mutable);
    }
    let mut module = analyzer.run(program);

    if unit.has_fatal() {
        debug!(file = %unit.file(), "compilation stopped after analysis");
        return Compilation::failed(unit.into_diagnostics());
    }
    if options.optimize {
        Optimizer::optimize(&mut module, &mut unit);
    }

    let chunk = Compiler::compile(&module, &unit.types)
        .map_err(|err| err.to_string())
        .and_then(|build| bake(&build).map_err(|err| err.to_string()));
    let chunk = match chunk {
        Ok(chunk) => chunk,
        Err(message) => {
            unit.fatal(Span::default(), message);
            return Compilation::failed(unit.into_diagnostics());
        }
    };

    info!(
        file = %unit.file(),
        functions = module.functions.len(),
        bytes = chunk.code().len(),
        statics = chunk.statics().len(),
        "compiled"
    );
    Compilation {
        success: true,
        diagnostics: unit.into_diagnostics(),
        artifact: Some(Artifact::new(vec![chunk])),
    }
}

/// Compiles independent `(file name, source)` pairs, in parallel when the
/// `parallel` feature is on. Results come back in input order.
pub fn compile_batch(
    sources: &[(&str, &str)],
    context: &ModuleContext,
    options: &CompileOptions,
) -> Vec<Compilation> {
    let compile_one = |(name, source): &(&str, &str)| {
        let options = options.clone().with_file_name(*name);
        compile_with(source, context, &options)
    };

    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        sources.par_iter().map(compile_one).collect()
    }

    #[cfg(not(feature = "parallel"))]
    {
        sources.iter().map(compile_one).collect()
    }
}

/// Lists every chunk's instructions and static objects.
pub fn decompile(artifact: &Artifact) -> Result<String> {
    Ok(bytecode::decompile(artifact)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_reports_fatal_diagnostics() {
        let compilation = compile("fn f() -> i32 { return missing; }", &ModuleContext::new());
        assert!(!compilation.success);
        assert!(compilation.artifact.is_none());
        assert!(compilation.diagnostics.iter().any(Diagnostic::is_fatal));
        assert!(matches!(compilation.into_result(), Err(Error::Compile(msg)) if msg.contains("missing")));
    }

    #[test]
    fn test_bad_prototype_is_fatal() {
        let mut context = ModuleContext::new();
        context.declare_native("print", "fn(string");
        let compilation = compile("fn f() {}", &context);
        assert!(!compilation.success);
        assert!(compilation.diagnostics.iter().any(|d| d.message.contains("print")));
    }

    #[test]
    fn test_native_global_must_be_declared() {
        let source = "fn f() -> i32 { return limit; }";
        assert!(!compile(source, &ModuleContext::new()).success);

        let mut context = ModuleContext::new();
        context.declare_global("limit", "i32", false);
        assert!(compile(source, &context).success);
    }

    #[test]
    fn test_file_name_reaches_diagnostics() {
        let options = CompileOptions::default().with_file_name("main.lm");
        let compilation = compile_with("fn f( {", &ModuleContext::new(), &options);
        assert!(!compilation.success);
        assert!(compilation.diagnostics.iter().all(|d| &*d.location.file == "main.lm"));
    }

    #[test]
    fn test_batch_keeps_input_order() {
        let sources = [("a.lm", "fn a() {}"), ("b.lm", "fn b( {"), ("c.lm", "fn c() {}")];
        let results = compile_batch(&sources, &ModuleContext::new(), &CompileOptions::default());
        let success: Vec<bool> = results.iter().map(|c| c.success).collect();
        assert_eq!(success, vec![true, false, true]);
    }

    #[test]
    fn test_decompile_lists_functions() {
        let artifact = compile("fn answer() -> i32 { return 42; }", &ModuleContext::new())
            .into_result()
            .unwrap();
        let listing = decompile(&artifact).unwrap();
        assert!(listing.contains("answer"));
    }
}
