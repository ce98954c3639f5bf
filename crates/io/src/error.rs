//! Error types for the bytecode reader crate.
//!
//! Mirrors the `Malformed` error class of §7: the reader never fails a
//! process, only the particular script image it was asked to decode.

use thiserror::Error;

/// Errors raised while reading a script image or its debug symbol table.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IoError {
    /// Attempted to read past the end of the instruction stream.
    #[error("unexpected end of stream: wanted {requested} more byte(s) at offset {offset} while reading {context}")]
    EndOfStream {
        requested: usize,
        offset: usize,
        context: String,
    },

    /// `seek` was asked to move to a position outside the stream.
    #[error("seek out of bounds: position {position}, stream length {length}")]
    SeekOutOfBounds { position: usize, length: usize },

    /// The byte stream does not decode as valid UTF-8 where UTF-8 was required
    /// (script names, symbol-table strings). Bytecode string literals
    /// themselves are never subject to this — see §9 "Strings are bytes".
    #[error("invalid UTF-8 in {context}")]
    InvalidUtf8 { context: String },

    /// The symbol table or debug-symbol stream is present but malformed.
    /// Per §4.2 this is demoted to "no symbols" by the caller, not
    /// propagated as a hard failure.
    #[error("malformed symbol table: {reason}")]
    MalformedSymbolTable { reason: String },
}

impl IoError {
    pub fn end_of_stream(requested: usize, offset: usize, context: impl Into<String>) -> Self {
        Self::EndOfStream {
            requested,
            offset,
            context: context.into(),
        }
    }

    pub fn seek_out_of_bounds(position: usize, length: usize) -> Self {
        Self::SeekOutOfBounds { position, length }
    }

    pub fn invalid_utf8(context: impl Into<String>) -> Self {
        Self::InvalidUtf8 {
            context: context.into(),
        }
    }

    pub fn malformed_symbol_table(reason: impl Into<String>) -> Self {
        Self::MalformedSymbolTable {
            reason: reason.into(),
        }
    }
}

/// Result type for reader operations.
pub type IoResult<T> = std::result::Result<T, IoError>;
