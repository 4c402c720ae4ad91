//! Decode and encode error types

use serde::Serialize;
use thiserror::Error;

/// Errors that stop a packet from being decoded at all.
///
/// Everything past the main header is decoded permissively and reported as
/// [`crate::PacketAnomaly`] instead.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DecodeError {
    #[error("Truncated header: need {needed} bytes, got {available}")]
    TruncatedHeader { needed: usize, available: usize },
}

/// Values too large for the wire field that carries them
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
pub enum EncodeError {
    #[error("Segment {index} declares {size} bytes, the header holds at most {max}")]
    SegmentTooLarge {
        index: usize,
        size: usize,
        max: usize,
    },
    #[error("Segment {index} chunk {chunk} exceeds {max}")]
    ChunkOutOfRange { index: usize, chunk: u8, max: u8 },
    #[error("Object count of {words} words exceeds {max}")]
    ObjectCountTooLarge { words: usize, max: usize },
    #[error("PD message of {len} wire bytes exceeds {max}")]
    PdMessageTooLong { len: usize, max: usize },
}
