//! Protocol error types.

use thiserror::Error;

/// Errors from decoding activities or applying operations to text.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// Operation offset lies beyond the end of the document.
    #[error("offset {offset} out of bounds for document of length {len}")]
    OffsetOutOfBounds {
        /// Requested offset (in chars).
        offset: usize,
        /// Document length (in chars).
        len: usize,
    },

    /// A delete expected different text than the document holds.
    #[error("delete at {offset} expected {expected:?}, found {found:?}")]
    DeleteMismatch {
        /// Offset of the delete (in chars).
        offset: usize,
        /// Text the operation carries.
        expected: String,
        /// Text actually present at that position.
        found: String,
    },

    /// CBOR encoding failed.
    #[error("encode failed: {0}")]
    Encode(String),

    /// CBOR decoding failed.
    #[error("decode failed: {0}")]
    Decode(String),
}
