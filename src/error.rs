//! Analyzer error types

use thiserror::Error;

/// Errors raised while reading a URB trace
#[derive(Error, Debug)]
pub enum TraceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Line {line}: invalid record: {source}")]
    Json {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Line {line}: invalid payload hex: {source}")]
    Hex {
        line: usize,
        #[source]
        source: hex::FromHexError,
    },

    #[error("Line {line}: unrecognized {field} {value:?}")]
    InvalidField {
        line: usize,
        field: &'static str,
        value: String,
    },
}

/// Precondition violations detected before splitting starts
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SplitError {
    #[error("Frame {frame} at position {position} does not follow frame {previous}")]
    OutOfOrder {
        position: usize,
        previous: u64,
        frame: u64,
    },
}
