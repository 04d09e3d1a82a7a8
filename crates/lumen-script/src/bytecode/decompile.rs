//! Human-readable listings of baked code.

use std::fmt::{self, Write};

use super::{
    Artifact, Chunk, DecodeError, FLAG_INIT, FLAG_NATIVE, FLAG_VOID, Instruction, Static,
};
use crate::runtime::Value;

/// Lists every chunk of an artifact: one line per instruction with its
/// offset and operands, then the static object table.
pub fn decompile(artifact: &Artifact) -> Result<String, DecodeError> {
    let mut out = String::new();
    for (index, chunk) in artifact.chunks().iter().enumerate() {
        if index > 0 {
            out.push('\n');
        }
        let _ = writeln!(
            out,
            "chunk {}: {} bytes, {} statics",
            index,
            chunk.code().len(),
            chunk.statics().len()
        );
        out.push_str(&disassemble(chunk)?);
    }
    Ok(out)
}

/// Lists one chunk.
pub fn disassemble(chunk: &Chunk) -> Result<String, DecodeError> {
    let mut out = String::new();
    for decoded in chunk.instructions() {
        let (offset, instruction) = decoded?;
        let _ = write!(out, "  {:04x}  {}", offset, instruction);
        if let Some(note) = annotation(chunk, &instruction) {
            let _ = write!(out, "  ; {}", note);
        }
        out.push('\n');
    }
    out.push_str("statics:\n");
    for (id, object) in chunk.statics().iter().enumerate() {
        let _ = writeln!(out, "  #{:<3} {}", id, object);
    }
    Ok(out)
}

/// Names the static an instruction refers to.
fn annotation(chunk: &Chunk, instruction: &Instruction) -> Option<String> {
    let id = match instruction {
        Instruction::LoadStatic(id)
        | Instruction::NewStruct(id)
        | Instruction::TryBegin(id)
        | Instruction::Call { function: id, .. }
        | Instruction::BindGlobal { name: id, .. } => *id,
        _ => return None,
    };
    chunk.statics().get(id as usize).map(|object| match object {
        Static::Label(offset) => format!("-> {:04x}", offset),
        Static::String(s) => format!("{:?}", s),
        Static::Function { name, .. } | Static::Aggregate { name, .. } => name.clone(),
    })
}

fn immediate(value: &Value) -> String {
    match value {
        Value::None => "none".to_string(),
        other => format!("{} {}", other.tag().name(), other),
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = format!("{:?}", self.opcode());
        match self {
            Instruction::Push(value) => write!(f, "{:<12}{}", name, immediate(value)),
            Instruction::LoadStatic(id) | Instruction::NewStruct(id) | Instruction::TryBegin(id) => {
                write!(f, "{:<12}#{}", name, id)
            }
            Instruction::PopN(n)
            | Instruction::LoadLocal(n)
            | Instruction::StoreLocal(n)
            | Instruction::NewArray(n)
            | Instruction::GetField(n)
            | Instruction::SetField(n) => write!(f, "{:<12}{}", name, n),
            Instruction::LoadGlobal(n) | Instruction::StoreGlobal(n) | Instruction::InitGlobals(n) => {
                write!(f, "{:<12}{}", name, n)
            }
            Instruction::BindGlobal { global, name: id } => write!(f, "{:<12}{} #{}", name, global, id),
            Instruction::LoadReg(r) | Instruction::StoreReg(r) => write!(f, "{:<12}r{}", name, r),
            Instruction::Convert(tag) => write!(f, "{:<12}{}", name, tag.name()),
            Instruction::Jump(target)
            | Instruction::JumpIfTrue(target)
            | Instruction::JumpIfFalse(target) => write!(f, "{:<12}{:04x}", name, target),
            Instruction::Call { function, argc } => write!(f, "{:<12}#{} {}", name, function, argc),
            Instruction::CallValue(argc) => write!(f, "{:<12}{}", name, argc),
            _ => write!(f, "{}", name),
        }
    }
}

impl fmt::Display for Static {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Static::Label(offset) => write!(f, "label {:04x}", offset),
            Static::String(s) => write!(f, "string {:?}", s),
            Static::Function {
                name,
                entry,
                arity,
                flags,
            } => {
                let mut tags = Vec::new();
                for (flag, tag) in [(FLAG_NATIVE, "native"), (FLAG_INIT, "init"), (FLAG_VOID, "void")] {
                    if flags & flag != 0 {
                        tags.push(tag);
                    }
                }
                write!(f, "function {} arity {}", name, arity)?;
                if flags & FLAG_NATIVE == 0 {
                    write!(f, " entry {:04x}", entry)?;
                }
                if !tags.is_empty() {
                    write!(f, " [{}]", tags.join(" "))?;
                }
                Ok(())
            }
            Static::Aggregate { name, members } => {
                write!(f, "aggregate {} {{ {} }}", name, members.join(", "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::bake;
    use crate::compiler::Buildable;
    use crate::bytecode::{Label, StaticObject};
    use crate::runtime::{ArithOp, Tag};

    fn chunk() -> Chunk {
        let mut build = Buildable::new();
        let entry: Label = build.new_label();
        build.intern(StaticObject::Function {
            name: "main".into(),
            entry: Some(entry),
            arity: 1,
            flags: 0,
        });
        let greeting = build.intern(StaticObject::String("hi".into()));
        build.place(entry);
        build.emit(Instruction::LoadLocal(0));
        build.emit(Instruction::Push(Value::I32(2)));
        build.emit(Instruction::Arith(ArithOp::Mul));
        build.emit(Instruction::Convert(Tag::F64));
        build.emit(Instruction::LoadStatic(greeting));
        build.emit(Instruction::Pop);
        build.emit(Instruction::Ret);
        bake(&build).unwrap()
    }

    #[test]
    fn test_listing_lines() {
        let listing = disassemble(&chunk()).unwrap();
        let lines: Vec<&str> = listing.lines().collect();
        assert_eq!(lines[0], "  0000  LoadLocal   0");
        assert_eq!(lines[1], "  0003  Push        i32 2");
        assert_eq!(lines[2], "  0009  Mul");
        assert_eq!(lines[3], "  000a  Convert     f64");
        assert_eq!(lines[4], "  000c  LoadStatic  #1  ; \"hi\"");
        assert!(listing.contains("#0   function main arity 1 entry 0000"));
        assert!(listing.contains("#1   string \"hi\""));
    }

    #[test]
    fn test_decompile_reports_bad_code() {
        let broken = Artifact::new(vec![Chunk::new(bytes::Bytes::from_static(&[0xEE]), Vec::new())]);
        assert!(decompile(&broken).is_err());
    }
}
