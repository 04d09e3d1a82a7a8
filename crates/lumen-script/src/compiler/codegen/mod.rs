//! Code generation from the annotated AST.
//!
//! The [`Compiler`] walks every concrete function of an analyzed module and
//! appends its code to a single [`Buildable`]. Functions become static
//! function descriptors first, in [`FunctionId`] order, followed by the
//! native descriptors; a script function's static id is therefore its
//! `FunctionId`, and a native's is the function count plus its `NativeId`.

mod expressions;
mod scope;
mod statements;

#[cfg(test)]
mod tests;

pub use scope::{LoopTarget, Scope};

use thiserror::Error;
use tracing::debug;

use super::Buildable;
use crate::ast::{FunctionId, NativeId};
use crate::bytecode::{FLAG_INIT, FLAG_NATIVE, FLAG_VOID, Instruction, Label, StaticObject};
use crate::runtime::{Tag, Value};
use crate::sema::{Module, Primitive, TypeId, TypeTable};

/// Limits exceeded during code generation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodegenError {
    /// A function needs more local slots than a frame can address
    #[error("function '{0}' declares more than 65535 locals")]
    TooManyLocals(String),
    /// A call passes more arguments than an instruction can encode
    #[error("a call in '{0}' passes more than 255 arguments")]
    TooManyArguments(String),
    /// An array literal has more elements than an instruction can encode
    #[error("an array literal in '{0}' has more than 65535 elements")]
    TooManyElements(String),
    /// A function has more than 255 parameters
    #[error("function '{0}' has more than 255 parameters")]
    TooManyParameters(String),
    /// A node reached code generation without analyzer annotations
    #[error("unresolved {what} in '{function}'")]
    Unresolved {
        /// What was missing
        what: &'static str,
        /// Function being compiled
        function: String,
    },
}

pub(super) type CResult<T> = Result<T, CodegenError>;

/// Compiles an analyzed module into a [`Buildable`].
pub struct Compiler<'m> {
    module: &'m Module,
    types: &'m TypeTable,
    build: Buildable,
    scope: Scope,
    /// Name of the function being compiled, for errors
    function: String,
}

impl<'m> Compiler<'m> {
    /// Compiles every function of `module`.
    ///
    /// The module must come from an analysis without fatal diagnostics.
    pub fn compile(module: &'m Module, types: &'m TypeTable) -> CResult<Buildable> {
        let mut compiler = Compiler {
            module,
            types,
            build: Buildable::new(),
            scope: Scope::default(),
            function: String::new(),
        };
        compiler.run()?;
        debug!(
            functions = module.functions.len(),
            instructions = compiler.build.instructions().len(),
            statics = compiler.build.statics().len(),
            "compiled module"
        );
        Ok(compiler.build)
    }

    fn run(&mut self) -> CResult<()> {
        let module = self.module;
        let void = self.types.primitive(Primitive::Void);

        let mut entries = Vec::with_capacity(module.functions.len());
        for function in &module.functions {
            let entry = self.build.new_label();
            let mut flags = 0;
            if function.is_init {
                flags |= FLAG_INIT;
            }
            if function.ret == void {
                flags |= FLAG_VOID;
            }
            self.build.intern(StaticObject::Function {
                name: function.name.clone(),
                entry: Some(entry),
                arity: self.arity(&function.name, function.params.len())?,
                flags,
            });
            entries.push(entry);
        }
        for native in &module.natives {
            let mut flags = FLAG_NATIVE;
            if native.ret == void {
                flags |= FLAG_VOID;
            }
            self.build.intern(StaticObject::Function {
                name: native.name.clone(),
                entry: None,
                arity: self.arity(&native.name, native.params.len())?,
                flags,
            });
        }

        for (function, entry) in module.functions.iter().zip(entries) {
            self.function = function.name.clone();
            self.build.place(entry);
            self.scope = Scope::for_function(function.params.len() as u16);

            if function.is_init {
                self.emit(Instruction::InitGlobals(module.globals.len() as u32));
                for (index, global) in module.globals.iter().enumerate() {
                    if global.native {
                        let name = self.build.intern(StaticObject::String(global.name.clone()));
                        self.emit(Instruction::BindGlobal {
                            global: index as u32,
                            name,
                        });
                    }
                }
            }

            self.scope.begin_block();
            for statement in &function.body {
                self.statement(statement)?;
            }
            self.scope.end_block();

            // Falling off the end returns the type's default value.
            if function.ret == void {
                self.emit(Instruction::RetVoid);
            } else {
                self.default_value(function.ret);
                self.emit(Instruction::Ret);
            }
        }
        Ok(())
    }

    fn arity(&self, name: &str, count: usize) -> CResult<u8> {
        u8::try_from(count).map_err(|_| CodegenError::TooManyParameters(name.to_string()))
    }

    // ========================================================================
    // Helpers shared by statements and expressions
    // ========================================================================

    fn emit(&mut self, instruction: Instruction<Label>) -> usize {
        self.build.emit(instruction)
    }

    fn new_label(&mut self) -> Label {
        self.build.new_label()
    }

    fn place(&mut self, label: Label) {
        self.build.place(label)
    }

    fn pop_locals(&mut self, count: u16) {
        match count {
            0 => {}
            1 => {
                self.emit(Instruction::Pop);
            }
            n => {
                self.emit(Instruction::PopN(n));
            }
        }
    }

    /// Static id of a script function descriptor.
    fn function_static(&self, id: FunctionId) -> u32 {
        id.0
    }

    /// Static id of a native function descriptor.
    fn native_static(&self, id: NativeId) -> u32 {
        self.module.functions.len() as u32 + id.0
    }

    fn is_void(&self, ty: Option<TypeId>) -> bool {
        ty.is_some_and(|ty| self.types.is(ty, Primitive::Void))
    }

    /// Pushes the zero value of `ty`: typed zero, `false`, or none.
    fn default_value(&mut self, ty: TypeId) {
        let value = match self.types.tag(ty) {
            Some(Tag::Bool) => Value::Bool(false),
            Some(tag) if tag.is_integer() => Value::from_i128(tag, 0).unwrap_or_default(),
            Some(tag) if tag.is_float() => Value::from_f64(tag, 0.0).unwrap_or_default(),
            _ => Value::None,
        };
        self.emit(Instruction::Push(value));
    }

    fn unresolved(&self, what: &'static str) -> CodegenError {
        CodegenError::Unresolved {
            what,
            function: self.function.clone(),
        }
    }
}
