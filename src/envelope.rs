//! Wire envelope: a stack of independently serialized byte blocks.
//!
//! Arguments are pushed left to right and the function name is pushed last,
//! so the name is the first block the receiver pops. The block vector as a
//! whole is serialized once more with bincode to form the transport payload.

use crate::types::Arguments;
use serde::de::DeserializeOwned;
use std::string::FromUtf8Error;
use thiserror::Error;

pub type Block = Vec<u8>;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("encoding argument {index}: {source}")]
    Argument {
        index: usize,
        #[source]
        source: bincode::Error,
    },

    #[error("encoding envelope: {0}")]
    Envelope(#[source] bincode::Error),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed envelope: {0}")]
    Envelope(#[source] bincode::Error),

    #[error("envelope carries no function name")]
    MissingName,

    #[error("function name is not UTF-8: {0}")]
    Name(#[from] FromUtf8Error),

    #[error("argument {index} missing from envelope")]
    MissingArgument { index: usize },

    #[error("decoding argument {index}: {source}")]
    Argument {
        index: usize,
        #[source]
        source: bincode::Error,
    },
}

/// Serializes a single value into a standalone block.
pub fn encode_block<T: serde::Serialize + ?Sized>(value: &T) -> Result<Block, bincode::Error> {
    bincode::serialize(value)
}

/// Encodes `name(args...)` and appends the payload to `out`.
pub fn encode_into<A>(name: &str, args: &A, out: &mut Vec<u8>) -> Result<(), EncodeError>
where
    A: Arguments + ?Sized,
{
    let mut stack = Vec::with_capacity(A::LEN + 1);
    args.encode_blocks(&mut stack)?;
    stack.push(name.as_bytes().to_vec());
    bincode::serialize_into(out, &stack).map_err(EncodeError::Envelope)
}

pub fn encode<A>(name: &str, args: &A) -> Result<Vec<u8>, EncodeError>
where
    A: Arguments + ?Sized,
{
    let mut out = Vec::new();
    encode_into(name, args, &mut out)?;
    Ok(out)
}

pub fn decode(payload: &[u8]) -> Result<Blocks, DecodeError> {
    let stack: Vec<Block> = bincode::deserialize(payload).map_err(DecodeError::Envelope)?;
    Ok(Blocks { stack, cursor: 0 })
}

/// The decoded block stack of one envelope.
///
/// [`pop_name`](Self::pop_name) removes the top block. Arguments are then
/// consumed one at a time, strictly in the order they were pushed; each
/// parameter is fully decoded before the next block is touched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Blocks {
    stack: Vec<Block>,
    cursor: usize,
}

impl Blocks {
    pub fn from_stack(stack: Vec<Block>) -> Self {
        Self { stack, cursor: 0 }
    }

    pub fn pop_name(&mut self) -> Result<String, DecodeError> {
        let block = self.stack.pop().ok_or(DecodeError::MissingName)?;
        Ok(String::from_utf8(block)?)
    }

    /// Index of the next argument block.
    pub fn position(&self) -> usize {
        self.cursor
    }

    /// Argument blocks not yet consumed.
    pub fn remaining(&self) -> usize {
        self.stack.len().saturating_sub(self.cursor)
    }

    pub fn next_block(&mut self) -> Option<&[u8]> {
        let block = self.stack.get(self.cursor)?;
        self.cursor += 1;
        Some(block)
    }

    pub fn decode_next<T: DeserializeOwned>(&mut self) -> Result<T, DecodeError> {
        let index = self.cursor;
        let block = self
            .next_block()
            .ok_or(DecodeError::MissingArgument { index })?;
        bincode::deserialize(block).map_err(|source| DecodeError::Argument { index, source })
    }
}
