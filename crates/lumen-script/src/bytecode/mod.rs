//! Bytecode definitions.
//!
//! Instructions exist in two forms. The compiler emits
//! `Instruction<Label>`, where jump targets are symbolic; baking
//! ([`bake`]) resolves every label and produces `Instruction<u32>` encoded
//! into a flat byte stream. Every instruction has a fixed encoded size that
//! depends only on its opcode (and, for `Push`, the operand's tag), so the
//! size of a stream is known before any label is resolved.
//!
//! # Encoding
//!
//! One opcode byte followed by little-endian operands:
//!
//! | operand            | bytes                        |
//! |--------------------|------------------------------|
//! | local slot, count  | 2                            |
//! | static id, global  | 4                            |
//! | jump target        | 4 (absolute byte offset)     |
//! | register, argc     | 1                            |
//! | `Push` value       | 1 tag + tag payload          |

mod artifact;
mod bake;
mod decompile;

pub use artifact::{Artifact, ArtifactError, Chunk, FORMAT_VERSION, MAGIC};
pub use bake::{BakeError, bake};
pub use decompile::{decompile, disassemble};

use std::fmt;

use bytes::{BufMut, BytesMut};
use thiserror::Error;

use crate::runtime::{ArithOp, CompareOp, Tag, Value};

/// A symbolic jump target, resolved when baking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub u32);

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Function descriptor flag: implemented by the host.
pub const FLAG_NATIVE: u8 = 1;
/// Function descriptor flag: a chunk's module initializer.
pub const FLAG_INIT: u8 = 2;
/// Function descriptor flag: returns no value.
pub const FLAG_VOID: u8 = 4;

/// A single instruction. `J` is the jump target representation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Instruction<J = u32> {
    /// Do nothing
    Nop,
    /// Push a scalar immediate
    Push(Value),
    /// Push a value built from a static object
    LoadStatic(u32),
    /// Discard the top value
    Pop,
    /// Discard the top `n` values
    PopN(u16),
    /// Duplicate the top value
    Dup,
    /// Duplicate the top two values
    Dup2,
    /// Push a local slot
    LoadLocal(u16),
    /// Pop into a local slot
    StoreLocal(u16),
    /// Push a global
    LoadGlobal(u32),
    /// Pop into a global
    StoreGlobal(u32),
    /// Size the chunk's global table
    InitGlobals(u32),
    /// Set a global from the host binding named by a string static
    BindGlobal {
        /// Global index
        global: u32,
        /// Static id of the binding name
        name: u32,
    },
    /// Push a register
    LoadReg(u8),
    /// Pop into a register
    StoreReg(u8),
    /// Pop two operands and push the arithmetic result
    Arith(ArithOp),
    /// Pop two operands and push the comparison result as `bool`
    Compare(CompareOp),
    /// Logical negation
    Not,
    /// Arithmetic negation
    Neg,
    /// Bitwise complement
    BitNot,
    /// Convert the top value to another scalar tag
    Convert(Tag),
    /// Replace the top value with `true` if it is zero, none or false
    TestZero,
    /// Unconditional jump
    Jump(J),
    /// Pop; jump if truthy
    JumpIfTrue(J),
    /// Pop; jump if falsy
    JumpIfFalse(J),
    /// Call the function described by a static
    Call {
        /// Static id of the function descriptor
        function: u32,
        /// Argument count
        argc: u8,
    },
    /// Call the function value below the arguments
    CallValue(u8),
    /// Return the top value
    Ret,
    /// Return without a value
    RetVoid,
    /// Pop `n` values into a new array
    NewArray(u16),
    /// Pop the members of the aggregate described by a static into a new
    /// struct
    NewStruct(u32),
    /// Replace a struct with one of its fields
    GetField(u16),
    /// Pop a struct and a value and store the field
    SetField(u16),
    /// Pop an array and an index and push the element
    GetIndex,
    /// Pop an array, an index and a value and store the element
    SetIndex,
    /// Replace an array or string with its length
    Len,
    /// Enter a try region whose handler is the label static given
    TryBegin(u32),
    /// Leave the innermost try region
    TryEnd,
    /// Pop a value and throw it
    Throw,
}

/// Opcode bytes.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Nop = 0x00,
    Push = 0x01,
    LoadStatic = 0x02,
    Pop = 0x03,
    PopN = 0x04,
    Dup = 0x05,
    Dup2 = 0x06,
    LoadLocal = 0x10,
    StoreLocal = 0x11,
    LoadGlobal = 0x12,
    StoreGlobal = 0x13,
    InitGlobals = 0x14,
    BindGlobal = 0x15,
    LoadReg = 0x16,
    StoreReg = 0x17,
    Add = 0x20,
    Sub = 0x21,
    Mul = 0x22,
    Div = 0x23,
    Rem = 0x24,
    BitAnd = 0x25,
    BitOr = 0x26,
    BitXor = 0x27,
    Shl = 0x28,
    Shr = 0x29,
    Eq = 0x2A,
    Ne = 0x2B,
    Lt = 0x2C,
    Le = 0x2D,
    Gt = 0x2E,
    Ge = 0x2F,
    Not = 0x30,
    Neg = 0x31,
    BitNot = 0x32,
    Convert = 0x33,
    TestZero = 0x34,
    Jump = 0x40,
    JumpIfTrue = 0x41,
    JumpIfFalse = 0x42,
    Call = 0x43,
    CallValue = 0x44,
    Ret = 0x45,
    RetVoid = 0x46,
    NewArray = 0x50,
    NewStruct = 0x51,
    GetField = 0x52,
    SetField = 0x53,
    GetIndex = 0x54,
    SetIndex = 0x55,
    Len = 0x56,
    TryBegin = 0x60,
    TryEnd = 0x61,
    Throw = 0x62,
}

impl Opcode {
    const ALL: [Opcode; 53] = [
        Opcode::Nop,
        Opcode::Push,
        Opcode::LoadStatic,
        Opcode::Pop,
        Opcode::PopN,
        Opcode::Dup,
        Opcode::Dup2,
        Opcode::LoadLocal,
        Opcode::StoreLocal,
        Opcode::LoadGlobal,
        Opcode::StoreGlobal,
        Opcode::InitGlobals,
        Opcode::BindGlobal,
        Opcode::LoadReg,
        Opcode::StoreReg,
        Opcode::Add,
        Opcode::Sub,
        Opcode::Mul,
        Opcode::Div,
        Opcode::Rem,
        Opcode::BitAnd,
        Opcode::BitOr,
        Opcode::BitXor,
        Opcode::Shl,
        Opcode::Shr,
        Opcode::Eq,
        Opcode::Ne,
        Opcode::Lt,
        Opcode::Le,
        Opcode::Gt,
        Opcode::Ge,
        Opcode::Not,
        Opcode::Neg,
        Opcode::BitNot,
        Opcode::Convert,
        Opcode::TestZero,
        Opcode::Jump,
        Opcode::JumpIfTrue,
        Opcode::JumpIfFalse,
        Opcode::Call,
        Opcode::CallValue,
        Opcode::Ret,
        Opcode::RetVoid,
        Opcode::NewArray,
        Opcode::NewStruct,
        Opcode::GetField,
        Opcode::SetField,
        Opcode::GetIndex,
        Opcode::SetIndex,
        Opcode::Len,
        Opcode::TryBegin,
        Opcode::TryEnd,
        Opcode::Throw,
    ];

    /// Decodes an opcode byte.
    pub fn from_u8(byte: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| *op as u8 == byte)
    }
}

const ARITH_OPS: [(ArithOp, Opcode); 10] = [
    (ArithOp::Add, Opcode::Add),
    (ArithOp::Sub, Opcode::Sub),
    (ArithOp::Mul, Opcode::Mul),
    (ArithOp::Div, Opcode::Div),
    (ArithOp::Rem, Opcode::Rem),
    (ArithOp::BitAnd, Opcode::BitAnd),
    (ArithOp::BitOr, Opcode::BitOr),
    (ArithOp::BitXor, Opcode::BitXor),
    (ArithOp::Shl, Opcode::Shl),
    (ArithOp::Shr, Opcode::Shr),
];

const COMPARE_OPS: [(CompareOp, Opcode); 6] = [
    (CompareOp::Eq, Opcode::Eq),
    (CompareOp::Ne, Opcode::Ne),
    (CompareOp::Lt, Opcode::Lt),
    (CompareOp::Le, Opcode::Le),
    (CompareOp::Gt, Opcode::Gt),
    (CompareOp::Ge, Opcode::Ge),
];

/// Errors found while decoding a byte stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The opcode byte is not assigned
    #[error("invalid opcode 0x{opcode:02x} at offset {offset}")]
    InvalidOpcode {
        /// The byte
        opcode: u8,
        /// Its offset
        offset: usize,
    },
    /// An operand is malformed
    #[error("invalid operand for {opcode:?} at offset {offset}")]
    InvalidOperand {
        /// The instruction
        opcode: Opcode,
        /// Offset of the instruction
        offset: usize,
    },
    /// The stream ends inside an instruction
    #[error("truncated instruction at offset {0}")]
    Truncated(usize),
    /// A static object's code address is not an instruction boundary
    #[error("static object {0} points outside the code")]
    InvalidStatic(usize),
}

impl<J> Instruction<J> {
    /// The opcode this instruction encodes to.
    pub fn opcode(&self) -> Opcode {
        match self {
            Instruction::Nop => Opcode::Nop,
            Instruction::Push(_) => Opcode::Push,
            Instruction::LoadStatic(_) => Opcode::LoadStatic,
            Instruction::Pop => Opcode::Pop,
            Instruction::PopN(_) => Opcode::PopN,
            Instruction::Dup => Opcode::Dup,
            Instruction::Dup2 => Opcode::Dup2,
            Instruction::LoadLocal(_) => Opcode::LoadLocal,
            Instruction::StoreLocal(_) => Opcode::StoreLocal,
            Instruction::LoadGlobal(_) => Opcode::LoadGlobal,
            Instruction::StoreGlobal(_) => Opcode::StoreGlobal,
            Instruction::InitGlobals(_) => Opcode::InitGlobals,
            Instruction::BindGlobal { .. } => Opcode::BindGlobal,
            Instruction::LoadReg(_) => Opcode::LoadReg,
            Instruction::StoreReg(_) => Opcode::StoreReg,
            Instruction::Arith(op) => ARITH_OPS
                .iter()
                .find(|(a, _)| a == op)
                .map_or(Opcode::Nop, |(_, code)| *code),
            Instruction::Compare(op) => COMPARE_OPS
                .iter()
                .find(|(c, _)| c == op)
                .map_or(Opcode::Nop, |(_, code)| *code),
            Instruction::Not => Opcode::Not,
            Instruction::Neg => Opcode::Neg,
            Instruction::BitNot => Opcode::BitNot,
            Instruction::Convert(_) => Opcode::Convert,
            Instruction::TestZero => Opcode::TestZero,
            Instruction::Jump(_) => Opcode::Jump,
            Instruction::JumpIfTrue(_) => Opcode::JumpIfTrue,
            Instruction::JumpIfFalse(_) => Opcode::JumpIfFalse,
            Instruction::Call { .. } => Opcode::Call,
            Instruction::CallValue(_) => Opcode::CallValue,
            Instruction::Ret => Opcode::Ret,
            Instruction::RetVoid => Opcode::RetVoid,
            Instruction::NewArray(_) => Opcode::NewArray,
            Instruction::NewStruct(_) => Opcode::NewStruct,
            Instruction::GetField(_) => Opcode::GetField,
            Instruction::SetField(_) => Opcode::SetField,
            Instruction::GetIndex => Opcode::GetIndex,
            Instruction::SetIndex => Opcode::SetIndex,
            Instruction::Len => Opcode::Len,
            Instruction::TryBegin(_) => Opcode::TryBegin,
            Instruction::TryEnd => Opcode::TryEnd,
            Instruction::Throw => Opcode::Throw,
        }
    }

    /// Encoded size in bytes, opcode included.
    pub fn encoded_len(&self) -> usize {
        1 + match self {
            Instruction::Push(value) => 1 + value.tag().payload_size(),
            Instruction::PopN(_)
            | Instruction::LoadLocal(_)
            | Instruction::StoreLocal(_)
            | Instruction::NewArray(_)
            | Instruction::GetField(_)
            | Instruction::SetField(_) => 2,
            Instruction::LoadStatic(_)
            | Instruction::LoadGlobal(_)
            | Instruction::StoreGlobal(_)
            | Instruction::InitGlobals(_)
            | Instruction::NewStruct(_)
            | Instruction::TryBegin(_)
            | Instruction::Jump(_)
            | Instruction::JumpIfTrue(_)
            | Instruction::JumpIfFalse(_) => 4,
            Instruction::BindGlobal { .. } => 8,
            Instruction::Call { .. } => 5,
            Instruction::LoadReg(_)
            | Instruction::StoreReg(_)
            | Instruction::CallValue(_)
            | Instruction::Convert(_) => 1,
            _ => 0,
        }
    }

    /// The jump target, for jumps.
    pub fn target(&self) -> Option<&J> {
        match self {
            Instruction::Jump(j) | Instruction::JumpIfTrue(j) | Instruction::JumpIfFalse(j) => Some(j),
            _ => None,
        }
    }

    /// Rewrites the jump targets.
    pub fn map_jump<K>(self, mut f: impl FnMut(J) -> K) -> Instruction<K> {
        match self {
            Instruction::Jump(j) => Instruction::Jump(f(j)),
            Instruction::JumpIfTrue(j) => Instruction::JumpIfTrue(f(j)),
            Instruction::JumpIfFalse(j) => Instruction::JumpIfFalse(f(j)),
            Instruction::Nop => Instruction::Nop,
            Instruction::Push(v) => Instruction::Push(v),
            Instruction::LoadStatic(id) => Instruction::LoadStatic(id),
            Instruction::Pop => Instruction::Pop,
            Instruction::PopN(n) => Instruction::PopN(n),
            Instruction::Dup => Instruction::Dup,
            Instruction::Dup2 => Instruction::Dup2,
            Instruction::LoadLocal(s) => Instruction::LoadLocal(s),
            Instruction::StoreLocal(s) => Instruction::StoreLocal(s),
            Instruction::LoadGlobal(g) => Instruction::LoadGlobal(g),
            Instruction::StoreGlobal(g) => Instruction::StoreGlobal(g),
            Instruction::InitGlobals(n) => Instruction::InitGlobals(n),
            Instruction::BindGlobal { global, name } => Instruction::BindGlobal { global, name },
            Instruction::LoadReg(r) => Instruction::LoadReg(r),
            Instruction::StoreReg(r) => Instruction::StoreReg(r),
            Instruction::Arith(op) => Instruction::Arith(op),
            Instruction::Compare(op) => Instruction::Compare(op),
            Instruction::Not => Instruction::Not,
            Instruction::Neg => Instruction::Neg,
            Instruction::BitNot => Instruction::BitNot,
            Instruction::Convert(t) => Instruction::Convert(t),
            Instruction::TestZero => Instruction::TestZero,
            Instruction::Call { function, argc } => Instruction::Call { function, argc },
            Instruction::CallValue(argc) => Instruction::CallValue(argc),
            Instruction::Ret => Instruction::Ret,
            Instruction::RetVoid => Instruction::RetVoid,
            Instruction::NewArray(n) => Instruction::NewArray(n),
            Instruction::NewStruct(id) => Instruction::NewStruct(id),
            Instruction::GetField(i) => Instruction::GetField(i),
            Instruction::SetField(i) => Instruction::SetField(i),
            Instruction::GetIndex => Instruction::GetIndex,
            Instruction::SetIndex => Instruction::SetIndex,
            Instruction::Len => Instruction::Len,
            Instruction::TryBegin(id) => Instruction::TryBegin(id),
            Instruction::TryEnd => Instruction::TryEnd,
            Instruction::Throw => Instruction::Throw,
        }
    }
}

impl Instruction<u32> {
    /// Appends the encoding of this instruction to `out`.
    pub fn encode(&self, out: &mut BytesMut) {
        out.put_u8(self.opcode() as u8);
        match *self {
            Instruction::Push(value) => {
                out.put_u8(value.tag() as u8);
                encode_payload(value, out);
            }
            Instruction::PopN(n)
            | Instruction::LoadLocal(n)
            | Instruction::StoreLocal(n)
            | Instruction::NewArray(n)
            | Instruction::GetField(n)
            | Instruction::SetField(n) => out.put_u16_le(n),
            Instruction::LoadStatic(x)
            | Instruction::LoadGlobal(x)
            | Instruction::StoreGlobal(x)
            | Instruction::InitGlobals(x)
            | Instruction::NewStruct(x)
            | Instruction::TryBegin(x)
            | Instruction::Jump(x)
            | Instruction::JumpIfTrue(x)
            | Instruction::JumpIfFalse(x) => out.put_u32_le(x),
            Instruction::BindGlobal { global, name } => {
                out.put_u32_le(global);
                out.put_u32_le(name);
            }
            Instruction::Call { function, argc } => {
                out.put_u32_le(function);
                out.put_u8(argc);
            }
            Instruction::LoadReg(r) | Instruction::StoreReg(r) | Instruction::CallValue(r) => {
                out.put_u8(r)
            }
            Instruction::Convert(tag) => out.put_u8(tag as u8),
            _ => {}
        }
    }

    /// Decodes the instruction at `offset`, returning it with the offset of
    /// the next instruction.
    pub fn decode(code: &[u8], offset: usize) -> Result<(Self, usize), DecodeError> {
        let mut reader = Reader { code, at: offset, start: offset };
        let byte = reader.u8()?;
        let opcode = Opcode::from_u8(byte).ok_or(DecodeError::InvalidOpcode {
            opcode: byte,
            offset,
        })?;
        let invalid = DecodeError::InvalidOperand { opcode, offset };

        let instruction = match opcode {
            Opcode::Nop => Instruction::Nop,
            Opcode::Push => {
                let tag = Tag::from_u8(reader.u8()?).ok_or(invalid.clone())?;
                Instruction::Push(reader.payload(tag).ok_or(invalid)?)
            }
            Opcode::LoadStatic => Instruction::LoadStatic(reader.u32()?),
            Opcode::Pop => Instruction::Pop,
            Opcode::PopN => Instruction::PopN(reader.u16()?),
            Opcode::Dup => Instruction::Dup,
            Opcode::Dup2 => Instruction::Dup2,
            Opcode::LoadLocal => Instruction::LoadLocal(reader.u16()?),
            Opcode::StoreLocal => Instruction::StoreLocal(reader.u16()?),
            Opcode::LoadGlobal => Instruction::LoadGlobal(reader.u32()?),
            Opcode::StoreGlobal => Instruction::StoreGlobal(reader.u32()?),
            Opcode::InitGlobals => Instruction::InitGlobals(reader.u32()?),
            Opcode::BindGlobal => Instruction::BindGlobal {
                global: reader.u32()?,
                name: reader.u32()?,
            },
            Opcode::LoadReg => Instruction::LoadReg(reader.register(invalid)?),
            Opcode::StoreReg => Instruction::StoreReg(reader.register(invalid)?),
            Opcode::Not => Instruction::Not,
            Opcode::Neg => Instruction::Neg,
            Opcode::BitNot => Instruction::BitNot,
            Opcode::Convert => {
                let tag = Tag::from_u8(reader.u8()?)
                    .filter(|t| t.is_numeric() || *t == Tag::Bool)
                    .ok_or(invalid)?;
                Instruction::Convert(tag)
            }
            Opcode::TestZero => Instruction::TestZero,
            Opcode::Jump => Instruction::Jump(reader.u32()?),
            Opcode::JumpIfTrue => Instruction::JumpIfTrue(reader.u32()?),
            Opcode::JumpIfFalse => Instruction::JumpIfFalse(reader.u32()?),
            Opcode::Call => Instruction::Call {
                function: reader.u32()?,
                argc: reader.u8()?,
            },
            Opcode::CallValue => Instruction::CallValue(reader.u8()?),
            Opcode::Ret => Instruction::Ret,
            Opcode::RetVoid => Instruction::RetVoid,
            Opcode::NewArray => Instruction::NewArray(reader.u16()?),
            Opcode::NewStruct => Instruction::NewStruct(reader.u32()?),
            Opcode::GetField => Instruction::GetField(reader.u16()?),
            Opcode::SetField => Instruction::SetField(reader.u16()?),
            Opcode::GetIndex => Instruction::GetIndex,
            Opcode::SetIndex => Instruction::SetIndex,
            Opcode::Len => Instruction::Len,
            Opcode::TryBegin => Instruction::TryBegin(reader.u32()?),
            Opcode::TryEnd => Instruction::TryEnd,
            Opcode::Throw => Instruction::Throw,
            arith => {
                if let Some((op, _)) = ARITH_OPS.iter().find(|(_, code)| *code == arith) {
                    Instruction::Arith(*op)
                } else if let Some((op, _)) = COMPARE_OPS.iter().find(|(_, code)| *code == arith) {
                    Instruction::Compare(*op)
                } else {
                    return Err(invalid);
                }
            }
        };
        Ok((instruction, reader.at))
    }
}

/// Number of registers in a thread's register file.
pub const REGISTER_COUNT: u8 = 8;

fn encode_payload(value: Value, out: &mut BytesMut) {
    match value {
        Value::I8(v) => out.put_i8(v),
        Value::I16(v) => out.put_i16_le(v),
        Value::I32(v) => out.put_i32_le(v),
        Value::I64(v) => out.put_i64_le(v),
        Value::U8(v) => out.put_u8(v),
        Value::U16(v) => out.put_u16_le(v),
        Value::U32(v) => out.put_u32_le(v),
        Value::U64(v) => out.put_u64_le(v),
        Value::F32(v) => out.put_f32_le(v),
        Value::F64(v) => out.put_f64_le(v),
        Value::Bool(b) => out.put_u8(b as u8),
        Value::None | Value::Ref(_) | Value::Native(_) => {}
    }
}

struct Reader<'a> {
    code: &'a [u8],
    at: usize,
    start: usize,
}

impl Reader<'_> {
    fn take<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let bytes = self
            .code
            .get(self.at..self.at + N)
            .ok_or(DecodeError::Truncated(self.start))?;
        self.at += N;
        let mut out = [0; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_le_bytes(self.take()?))
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.take()?))
    }

    fn register(&mut self, invalid: DecodeError) -> Result<u8, DecodeError> {
        let r = self.u8()?;
        if r < REGISTER_COUNT { Ok(r) } else { Err(invalid) }
    }

    /// Reads an immediate; `None` for tags that cannot be immediates.
    fn payload(&mut self, tag: Tag) -> Option<Value> {
        Some(match tag {
            Tag::None => Value::None,
            Tag::I8 => Value::I8(i8::from_le_bytes(self.take().ok()?)),
            Tag::I16 => Value::I16(i16::from_le_bytes(self.take().ok()?)),
            Tag::I32 => Value::I32(i32::from_le_bytes(self.take().ok()?)),
            Tag::I64 => Value::I64(i64::from_le_bytes(self.take().ok()?)),
            Tag::U8 => Value::U8(self.u8().ok()?),
            Tag::U16 => Value::U16(self.u16().ok()?),
            Tag::U32 => Value::U32(self.u32().ok()?),
            Tag::U64 => Value::U64(u64::from_le_bytes(self.take().ok()?)),
            Tag::F32 => Value::F32(f32::from_le_bytes(self.take().ok()?)),
            Tag::F64 => Value::F64(f64::from_le_bytes(self.take().ok()?)),
            Tag::Bool => match self.u8().ok()? {
                0 => Value::Bool(false),
                1 => Value::Bool(true),
                _ => return None,
            },
            Tag::Ref | Tag::Native => return None,
        })
    }
}

// ============================================================================
// Static objects
// ============================================================================

/// A static object as emitted by the compiler, before baking.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StaticObject {
    /// A code address
    Label(Label),
    /// A string constant
    String(String),
    /// A function descriptor; natives have no entry
    Function {
        /// Display name; for natives, the binding name
        name: String,
        /// Entry point
        entry: Option<Label>,
        /// Parameter count
        arity: u8,
        /// `FLAG_*` bits
        flags: u8,
    },
    /// A struct layout
    Aggregate {
        /// Type name
        name: String,
        /// Field names in slot order
        members: Vec<String>,
    },
}

/// A baked static object, with code addresses as byte offsets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Static {
    /// A code address
    Label(u32),
    /// A string constant
    String(String),
    /// A function descriptor
    Function {
        /// Display name; for natives, the binding name
        name: String,
        /// Entry offset; zero for natives
        entry: u32,
        /// Parameter count
        arity: u8,
        /// `FLAG_*` bits
        flags: u8,
    },
    /// A struct layout
    Aggregate {
        /// Type name
        name: String,
        /// Field names in slot order
        members: Vec<String>,
    },
}

impl Static {
    /// Returns true for a function descriptor carrying `flag`.
    pub fn has_flag(&self, flag: u8) -> bool {
        matches!(self, Static::Function { flags, .. } if flags & flag != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(instruction: Instruction) {
        let mut out = BytesMut::new();
        instruction.encode(&mut out);
        assert_eq!(out.len(), instruction.encoded_len(), "{:?}", instruction);
        let (decoded, next) = Instruction::decode(&out, 0).unwrap();
        assert_eq!(decoded, instruction);
        assert_eq!(next, out.len());
    }

    #[test]
    fn test_encoded_sizes_match() {
        for instruction in [
            Instruction::Push(Value::U8(7)),
            Instruction::Push(Value::F64(-0.5)),
            Instruction::Push(Value::None),
            Instruction::Call { function: 9, argc: 2 },
            Instruction::BindGlobal { global: 1, name: 4 },
            Instruction::Arith(ArithOp::Shr),
            Instruction::Compare(CompareOp::Ge),
            Instruction::Convert(Tag::F32),
            Instruction::JumpIfFalse(0x1234),
            Instruction::PopN(3),
        ] {
            roundtrip(instruction);
        }
    }

    #[test]
    fn test_every_opcode_byte_is_unique() {
        for (i, a) in Opcode::ALL.iter().enumerate() {
            for b in &Opcode::ALL[i + 1..] {
                assert_ne!(*a as u8, *b as u8, "{:?} and {:?}", a, b);
            }
            assert_eq!(Opcode::from_u8(*a as u8), Some(*a));
        }
    }

    #[test]
    fn test_decode_rejects_bad_input() {
        assert_eq!(
            Instruction::decode(&[0xFF], 0),
            Err(DecodeError::InvalidOpcode { opcode: 0xFF, offset: 0 })
        );
        assert_eq!(
            Instruction::decode(&[Opcode::Jump as u8, 1, 2], 0),
            Err(DecodeError::Truncated(0))
        );
        assert!(matches!(
            Instruction::decode(&[Opcode::LoadReg as u8, 8], 0),
            Err(DecodeError::InvalidOperand { .. })
        ));
        assert!(matches!(
            Instruction::decode(&[Opcode::Push as u8, Tag::Ref as u8], 0),
            Err(DecodeError::InvalidOperand { .. })
        ));
    }

    #[test]
    fn test_map_jump_preserves_other_operands() {
        let ir: Instruction<Label> = Instruction::JumpIfTrue(Label(3));
        assert_eq!(ir.map_jump(|l| l.0 * 10), Instruction::JumpIfTrue(30));
        let ir: Instruction<Label> = Instruction::LoadLocal(2);
        assert_eq!(ir.map_jump(|l| l.0), Instruction::LoadLocal(2));
    }
}
