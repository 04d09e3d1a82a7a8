//! Baking: symbolic instruction stream to byte stream.

use bytes::BytesMut;
use thiserror::Error;
use tracing::debug;

use super::{Chunk, Label, Static, StaticObject};
use crate::compiler::Buildable;

/// Errors raised while baking.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BakeError {
    /// A label is referenced but was never placed
    #[error("label {0} is referenced but never placed")]
    UnplacedLabel(Label),
    /// The code does not fit 32-bit offsets
    #[error("chunk exceeds the 4 GiB code limit")]
    TooLarge,
}

/// Bakes a buildable into a chunk.
///
/// The first pass assigns every instruction its byte offset, which fixes
/// every label's address; the second pass encodes with labels resolved.
/// Identical input always produces identical bytes.
pub fn bake(build: &Buildable) -> Result<Chunk, BakeError> {
    let instructions = build.instructions();

    let mut offsets = Vec::with_capacity(instructions.len() + 1);
    let mut at = 0usize;
    for instruction in instructions {
        offsets.push(at);
        at += instruction.encoded_len();
    }
    offsets.push(at);
    u32::try_from(at).map_err(|_| BakeError::TooLarge)?;

    let resolve = |label: Label| -> Result<u32, BakeError> {
        build
            .label_position(label)
            .map(|index| offsets[index] as u32)
            .ok_or(BakeError::UnplacedLabel(label))
    };

    let mut code = BytesMut::with_capacity(at);
    for instruction in instructions {
        let target = instruction.target().copied().map(resolve).transpose()?;
        instruction
            .map_jump(|_| target.unwrap_or_default())
            .encode(&mut code);
    }
    debug_assert_eq!(code.len(), at);

    let statics = build
        .statics()
        .iter()
        .map(|object| {
            Ok(match object {
                StaticObject::Label(label) => Static::Label(resolve(*label)?),
                StaticObject::String(s) => Static::String(s.clone()),
                StaticObject::Function {
                    name,
                    entry,
                    arity,
                    flags,
                } => Static::Function {
                    name: name.clone(),
                    entry: entry.map(resolve).transpose()?.unwrap_or(0),
                    arity: *arity,
                    flags: *flags,
                },
                StaticObject::Aggregate { name, members } => Static::Aggregate {
                    name: name.clone(),
                    members: members.clone(),
                },
            })
        })
        .collect::<Result<Vec<_>, BakeError>>()?;

    debug!(
        instructions = instructions.len(),
        bytes = at,
        statics = statics.len(),
        "baked chunk"
    );
    Ok(Chunk::new(code.freeze(), statics))
}
