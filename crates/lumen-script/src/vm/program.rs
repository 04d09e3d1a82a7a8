//! Loading an artifact: verification and native binding.

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::bytecode::{
    Artifact, Chunk, DecodeError, FLAG_NATIVE, FLAG_VOID, Instruction, Static,
};
use crate::runtime::{BindingContext, NativeFn, NativeRef, Value};
use crate::{Error, Result};

/// A native function bound to one function descriptor.
pub(crate) struct NativeEntry {
    pub(crate) name: String,
    pub(crate) function: NativeFn,
    pub(crate) arity: u8,
    pub(crate) void: bool,
}

/// A verified artifact with its natives resolved.
pub(crate) struct Program {
    chunks: Vec<Chunk>,
    /// Per chunk, the native bound to each static id
    native_refs: Vec<FxHashMap<u32, NativeRef>>,
    natives: Vec<NativeEntry>,
    globals: FxHashMap<String, Value>,
}

impl Program {
    /// Verifies every chunk and binds its natives and native globals.
    pub(crate) fn load(artifact: &Artifact, bindings: &BindingContext) -> Result<Self> {
        let mut native_refs = Vec::with_capacity(artifact.chunks().len());
        let mut natives = Vec::new();
        let mut globals = FxHashMap::default();

        for chunk in artifact.chunks() {
            verify(chunk)?;

            let mut refs = FxHashMap::default();
            for (id, object) in chunk.statics().iter().enumerate() {
                let Static::Function {
                    name, arity, flags, ..
                } = object
                else {
                    continue;
                };
                if flags & FLAG_NATIVE == 0 {
                    continue;
                }
                let function = bindings
                    .native(name)
                    .ok_or_else(|| Error::UnboundNative(name.clone()))?;
                refs.insert(id as u32, NativeRef(natives.len() as u32));
                natives.push(NativeEntry {
                    name: name.clone(),
                    function: function.clone(),
                    arity: *arity,
                    void: flags & FLAG_VOID != 0,
                });
            }
            native_refs.push(refs);

            for item in chunk.instructions() {
                let (_, instruction) = item?;
                if let Instruction::BindGlobal { name, .. } = instruction {
                    let Some(Static::String(name)) = chunk.statics().get(name as usize) else {
                        continue;
                    };
                    let value = bindings
                        .global(name)
                        .ok_or_else(|| Error::UnboundGlobal(name.clone()))?;
                    globals.insert(name.clone(), value);
                }
            }
        }

        debug!(
            chunks = artifact.chunks().len(),
            natives = natives.len(),
            "loaded program"
        );
        Ok(Self {
            chunks: artifact.chunks().to_vec(),
            native_refs,
            natives,
            globals,
        })
    }

    pub(crate) fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub(crate) fn chunk(&self, index: u32) -> Option<&Chunk> {
        self.chunks.get(index as usize)
    }

    pub(crate) fn static_object(&self, chunk: u32, id: u32) -> Option<&Static> {
        self.chunk(chunk)?.statics().get(id as usize)
    }

    /// The native bound to a function descriptor.
    pub(crate) fn native_ref(&self, chunk: u32, id: u32) -> Option<NativeRef> {
        self.native_refs.get(chunk as usize)?.get(&id).copied()
    }

    pub(crate) fn native(&self, native: NativeRef) -> Option<&NativeEntry> {
        self.natives.get(native.0 as usize)
    }

    /// The bound value of a native global.
    pub(crate) fn global_binding(&self, name: &str) -> Option<Value> {
        self.globals.get(name).copied()
    }
}

/// Checks that every instruction decodes and that every operand refers to
/// something that exists: jump targets land on instruction boundaries and
/// static ids name objects of the right kind.
fn verify(chunk: &Chunk) -> std::result::Result<(), DecodeError> {
    let mut boundaries = Vec::new();
    let mut decoded = Vec::new();
    for item in chunk.instructions() {
        let (offset, instruction) = item?;
        boundaries.push(offset as u32);
        decoded.push((offset, instruction));
    }
    let is_boundary = |target: u32| boundaries.binary_search(&target).is_ok();
    let statics = chunk.statics();

    for (id, object) in statics.iter().enumerate() {
        let target = match object {
            Static::Label(target) => *target,
            Static::Function { entry, flags, .. } if flags & FLAG_NATIVE == 0 => *entry,
            _ => continue,
        };
        if !is_boundary(target) {
            return Err(DecodeError::InvalidStatic(id));
        }
    }

    for (offset, instruction) in decoded {
        let invalid = DecodeError::InvalidOperand {
            opcode: instruction.opcode(),
            offset,
        };
        let kind_ok = match instruction {
            Instruction::Jump(target)
            | Instruction::JumpIfTrue(target)
            | Instruction::JumpIfFalse(target) => is_boundary(target),
            Instruction::LoadStatic(id) => matches!(
                statics.get(id as usize),
                Some(Static::String(_) | Static::Function { .. })
            ),
            Instruction::Call { function, .. } => {
                matches!(statics.get(function as usize), Some(Static::Function { .. }))
            }
            Instruction::NewStruct(id) => {
                matches!(statics.get(id as usize), Some(Static::Aggregate { .. }))
            }
            Instruction::TryBegin(id) => matches!(statics.get(id as usize), Some(Static::Label(_))),
            Instruction::BindGlobal { name, .. } => {
                matches!(statics.get(name as usize), Some(Static::String(_)))
            }
            _ => true,
        };
        if !kind_ok {
            return Err(invalid);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{FLAG_INIT, Opcode};
    use bytes::{Bytes, BytesMut};

    fn chunk(code: &[Instruction], statics: Vec<Static>) -> Chunk {
        let mut out = BytesMut::new();
        for instruction in code {
            instruction.encode(&mut out);
        }
        Chunk::new(out.freeze(), statics)
    }

    fn init() -> Static {
        Static::Function {
            name: "<init>".into(),
            entry: 0,
            arity: 0,
            flags: FLAG_INIT | FLAG_VOID,
        }
    }

    #[test]
    fn test_unbound_native_is_reported() {
        let artifact = Artifact::new(vec![chunk(
            &[Instruction::RetVoid],
            vec![
                init(),
                Static::Function {
                    name: "print".into(),
                    entry: 0,
                    arity: 1,
                    flags: FLAG_NATIVE | FLAG_VOID,
                },
            ],
        )]);
        let result = Program::load(&artifact, &BindingContext::new());
        assert!(matches!(result, Err(Error::UnboundNative(name)) if name == "print"));
    }

    #[test]
    fn test_jump_into_an_instruction_is_rejected() {
        let artifact = Artifact::new(vec![chunk(
            &[Instruction::Jump(2), Instruction::Push(Value::I32(1)), Instruction::RetVoid],
            vec![init()],
        )]);
        assert!(matches!(
            Program::load(&artifact, &BindingContext::new()),
            Err(Error::Decode(DecodeError::InvalidOperand { .. }))
        ));
    }

    #[test]
    fn test_static_kinds_are_checked() {
        let artifact = Artifact::new(vec![chunk(
            &[Instruction::NewStruct(0), Instruction::RetVoid],
            vec![init()],
        )]);
        assert!(Program::load(&artifact, &BindingContext::new()).is_err());
    }

    #[test]
    fn test_truncated_code_is_rejected() {
        let artifact = Artifact::new(vec![Chunk::new(
            Bytes::from_static(&[Opcode::PopN as u8, 1]),
            vec![init()],
        )]);
        assert!(matches!(
            Program::load(&artifact, &BindingContext::new()),
            Err(Error::Decode(DecodeError::Truncated(0)))
        ));
    }

    #[test]
    fn test_natives_and_globals_bind() {
        let artifact = Artifact::new(vec![chunk(
            &[
                Instruction::InitGlobals(1),
                Instruction::BindGlobal { global: 0, name: 2 },
                Instruction::RetVoid,
            ],
            vec![
                init(),
                Static::Function {
                    name: "now".into(),
                    entry: 0,
                    arity: 0,
                    flags: FLAG_NATIVE,
                },
                Static::String("limit".into()),
            ],
        )]);
        let mut bindings = BindingContext::new();
        bindings
            .bind_native("now", |_| crate::runtime::NativeStatus::Ok)
            .bind_global("limit", Value::I32(3));
        let program = Program::load(&artifact, &bindings).unwrap();
        assert_eq!(program.native_ref(0, 1), Some(NativeRef(0)));
        assert_eq!(program.global_binding("limit"), Some(Value::I32(3)));
        assert!(!program.native(NativeRef(0)).unwrap().void);

        bindings = BindingContext::new();
        bindings.bind_native("now", |_| crate::runtime::NativeStatus::Ok);
        assert!(matches!(
            Program::load(&artifact, &bindings),
            Err(Error::UnboundGlobal(name)) if name == "limit"
        ));
    }
}
