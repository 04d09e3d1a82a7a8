//! Baked chunks and the persisted artifact layout.
//!
//! ```text
//! artifact := "LUMN" version:u16 count:u32 chunk*
//! chunk    := code_len:u32 code static_len:u32 statics
//! statics  := count:u32 (kind:u8 payload)*
//! ```
//!
//! All integers are little-endian. Strings are a `u32` byte length followed
//! by UTF-8.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use super::{DecodeError, FLAG_INIT, FLAG_NATIVE, Instruction, Static};

/// Magic bytes at the start of every artifact.
pub const MAGIC: [u8; 4] = *b"LUMN";

/// Current layout version. There is no compatibility across versions.
pub const FORMAT_VERSION: u16 = 1;

const KIND_LABEL: u8 = 0;
const KIND_STRING: u8 = 1;
const KIND_FUNCTION: u8 = 2;
const KIND_AGGREGATE: u8 = 3;

/// Errors reading a persisted artifact.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArtifactError {
    /// The data does not start with [`MAGIC`]
    #[error("not a lumen artifact")]
    BadMagic,
    /// The layout version is not [`FORMAT_VERSION`]
    #[error("unsupported artifact version {0}")]
    UnsupportedVersion(u16),
    /// The data ends early
    #[error("artifact is truncated")]
    Truncated,
    /// A static object has an unknown kind byte
    #[error("unknown static object kind {0}")]
    InvalidStatic(u8),
    /// A string is not UTF-8
    #[error("static string is not valid UTF-8")]
    InvalidUtf8,
    /// Bytes remain after the last chunk or inside a static region
    #[error("unexpected trailing bytes")]
    TrailingBytes,
}

/// One baked code region with its static object pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    code: Bytes,
    statics: Vec<Static>,
}

impl Chunk {
    /// Creates a chunk.
    pub fn new(code: Bytes, statics: Vec<Static>) -> Self {
        Self { code, statics }
    }

    /// The byte stream.
    pub fn code(&self) -> &Bytes {
        &self.code
    }

    /// The static object pool.
    pub fn statics(&self) -> &[Static] {
        &self.statics
    }

    /// Static id of the module initializer.
    pub fn init(&self) -> Option<u32> {
        self.statics
            .iter()
            .position(|s| s.has_flag(FLAG_INIT))
            .map(|id| id as u32)
    }

    /// Static id of the script function named `name`.
    pub fn function(&self, name: &str) -> Option<u32> {
        self.statics
            .iter()
            .position(|s| match s {
                Static::Function {
                    name: n, flags, ..
                } => n == name && flags & (FLAG_NATIVE | FLAG_INIT) == 0,
                _ => false,
            })
            .map(|id| id as u32)
    }

    /// Decodes the whole stream, yielding each instruction with its offset.
    pub fn instructions(&self) -> Instructions<'_> {
        Instructions {
            code: &self.code,
            at: 0,
            failed: false,
        }
    }

    fn write(&self, out: &mut BytesMut) {
        out.put_u32_le(self.code.len() as u32);
        out.put_slice(&self.code);

        let mut region = BytesMut::new();
        region.put_u32_le(self.statics.len() as u32);
        for object in &self.statics {
            match object {
                Static::Label(offset) => {
                    region.put_u8(KIND_LABEL);
                    region.put_u32_le(*offset);
                }
                Static::String(s) => {
                    region.put_u8(KIND_STRING);
                    put_str(&mut region, s);
                }
                Static::Function {
                    name,
                    entry,
                    arity,
                    flags,
                } => {
                    region.put_u8(KIND_FUNCTION);
                    region.put_u32_le(*entry);
                    region.put_u8(*arity);
                    region.put_u8(*flags);
                    put_str(&mut region, name);
                }
                Static::Aggregate { name, members } => {
                    region.put_u8(KIND_AGGREGATE);
                    put_str(&mut region, name);
                    region.put_u32_le(members.len() as u32);
                    for member in members {
                        put_str(&mut region, member);
                    }
                }
            }
        }
        out.put_u32_le(region.len() as u32);
        out.put_slice(&region);
    }

    fn read(data: &mut Bytes) -> Result<Self, ArtifactError> {
        let code_len = get_u32(data)? as usize;
        let code = take(data, code_len)?;

        let region_len = get_u32(data)? as usize;
        let mut region = take(data, region_len)?;
        let count = get_u32(&mut region)?;
        let mut statics = Vec::new();
        for _ in 0..count {
            let object = match get_u8(&mut region)? {
                KIND_LABEL => Static::Label(get_u32(&mut region)?),
                KIND_STRING => Static::String(get_str(&mut region)?),
                KIND_FUNCTION => {
                    let entry = get_u32(&mut region)?;
                    let arity = get_u8(&mut region)?;
                    let flags = get_u8(&mut region)?;
                    Static::Function {
                        name: get_str(&mut region)?,
                        entry,
                        arity,
                        flags,
                    }
                }
                KIND_AGGREGATE => {
                    let name = get_str(&mut region)?;
                    let members = (0..get_u32(&mut region)?)
                        .map(|_| get_str(&mut region))
                        .collect::<Result<_, _>>()?;
                    Static::Aggregate { name, members }
                }
                other => return Err(ArtifactError::InvalidStatic(other)),
            };
            statics.push(object);
        }
        if region.has_remaining() {
            return Err(ArtifactError::TrailingBytes);
        }
        Ok(Self { code, statics })
    }
}

/// Decoding iterator over a chunk's instructions.
pub struct Instructions<'a> {
    code: &'a [u8],
    at: usize,
    failed: bool,
}

impl Iterator for Instructions<'_> {
    type Item = Result<(usize, Instruction), DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.at >= self.code.len() {
            return None;
        }
        let offset = self.at;
        match Instruction::decode(self.code, offset) {
            Ok((instruction, next)) => {
                self.at = next;
                Some(Ok((offset, instruction)))
            }
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

/// A compiled program: one or more independently loadable chunks.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Artifact {
    chunks: Vec<Chunk>,
}

impl Artifact {
    /// Creates an artifact from chunks.
    pub fn new(chunks: Vec<Chunk>) -> Self {
        Self { chunks }
    }

    /// The chunks, in load order.
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Concatenates artifacts; each chunk keeps its own statics and globals.
    pub fn link(parts: impl IntoIterator<Item = Artifact>) -> Artifact {
        Artifact {
            chunks: parts.into_iter().flat_map(|a| a.chunks).collect(),
        }
    }

    /// Serializes the artifact.
    pub fn to_bytes(&self) -> Bytes {
        let mut out = BytesMut::new();
        out.put_slice(&MAGIC);
        out.put_u16_le(FORMAT_VERSION);
        out.put_u32_le(self.chunks.len() as u32);
        for chunk in &self.chunks {
            chunk.write(&mut out);
        }
        out.freeze()
    }

    /// Reads a serialized artifact. Code regions are shared with `data`,
    /// not copied.
    pub fn from_bytes(data: Bytes) -> Result<Self, ArtifactError> {
        let mut data = data;
        if take(&mut data, 4)?[..] != MAGIC[..] {
            return Err(ArtifactError::BadMagic);
        }
        if data.remaining() < 2 {
            return Err(ArtifactError::Truncated);
        }
        let version = data.get_u16_le();
        if version != FORMAT_VERSION {
            return Err(ArtifactError::UnsupportedVersion(version));
        }
        let count = get_u32(&mut data)?;
        let chunks = (0..count)
            .map(|_| Chunk::read(&mut data))
            .collect::<Result<_, _>>()?;
        if data.has_remaining() {
            return Err(ArtifactError::TrailingBytes);
        }
        Ok(Self { chunks })
    }
}

fn put_str(out: &mut BytesMut, s: &str) {
    out.put_u32_le(s.len() as u32);
    out.put_slice(s.as_bytes());
}

fn take(data: &mut Bytes, len: usize) -> Result<Bytes, ArtifactError> {
    if data.remaining() < len {
        return Err(ArtifactError::Truncated);
    }
    Ok(data.split_to(len))
}

fn get_u8(data: &mut Bytes) -> Result<u8, ArtifactError> {
    if !data.has_remaining() {
        return Err(ArtifactError::Truncated);
    }
    Ok(data.get_u8())
}

fn get_u32(data: &mut Bytes) -> Result<u32, ArtifactError> {
    if data.remaining() < 4 {
        return Err(ArtifactError::Truncated);
    }
    Ok(data.get_u32_le())
}

fn get_str(data: &mut Bytes) -> Result<String, ArtifactError> {
    let len = get_u32(data)? as usize;
    let bytes = take(data, len)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| ArtifactError::InvalidUtf8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::FLAG_VOID;

    fn sample() -> Artifact {
        let code = Bytes::from_static(&[0x46]);
        Artifact::new(vec![Chunk::new(
            code,
            vec![
                Static::Function {
                    name: "<init>".into(),
                    entry: 0,
                    arity: 0,
                    flags: FLAG_INIT | FLAG_VOID,
                },
                Static::String("héllo".into()),
                Static::Label(1),
                Static::Aggregate {
                    name: "Point".into(),
                    members: vec!["x".into(), "y".into()],
                },
            ],
        )])
    }

    #[test]
    fn test_layout_header() {
        let bytes = sample().to_bytes();
        assert_eq!(&bytes[..4], b"LUMN");
        assert_eq!(u16::from_le_bytes([bytes[4], bytes[5]]), FORMAT_VERSION);
        assert_eq!(u32::from_le_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]), 1);
    }

    #[test]
    fn test_read_back() {
        let artifact = sample();
        assert_eq!(Artifact::from_bytes(artifact.to_bytes()).unwrap(), artifact);
    }

    #[test]
    fn test_rejects_damaged_input() {
        let bytes = sample().to_bytes();
        assert_eq!(
            Artifact::from_bytes(bytes.slice(..bytes.len() - 1)),
            Err(ArtifactError::Truncated)
        );
        assert_eq!(
            Artifact::from_bytes(Bytes::from_static(b"NOPE\x01\x00")),
            Err(ArtifactError::BadMagic)
        );
        let mut versioned = bytes.to_vec();
        versioned[4] = 9;
        assert_eq!(
            Artifact::from_bytes(Bytes::from(versioned)),
            Err(ArtifactError::UnsupportedVersion(9))
        );
    }

    #[test]
    fn test_link_keeps_chunk_order() {
        let linked = Artifact::link([sample(), Artifact::default(), sample()]);
        assert_eq!(linked.chunks().len(), 2);
        assert_eq!(linked.chunks()[0].init(), Some(0));
    }
}
