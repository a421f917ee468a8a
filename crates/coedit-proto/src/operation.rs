//! Text operations.

use serde::{Deserialize, Serialize};

use crate::ProtoError;

/// An atomic mutation of a text document.
///
/// Offsets count chars. A delete carries the text it removes so replicas can
/// verify they remove what the author removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// Leaves the document unchanged.
    NoOp,

    /// Insert `text` before the char at `offset`.
    Insert {
        /// Insert position (in chars).
        offset: usize,
        /// Inserted text.
        text: String,
    },

    /// Remove `text` starting at `offset`.
    Delete {
        /// Start of the removed range (in chars).
        offset: usize,
        /// Removed text.
        text: String,
    },

    /// Apply the first operation, then the second in the coordinates the
    /// first one produced.
    Split(Box<Operation>, Box<Operation>),
}

impl Operation {
    /// Insert operation.
    pub fn insert(offset: usize, text: impl Into<String>) -> Self {
        Self::Insert { offset, text: text.into() }
    }

    /// Delete operation.
    pub fn delete(offset: usize, text: impl Into<String>) -> Self {
        Self::Delete { offset, text: text.into() }
    }

    /// Sequential composition; drops `NoOp` halves.
    pub fn split(first: Self, second: Self) -> Self {
        match (first.is_noop(), second.is_noop()) {
            (true, true) => Self::NoOp,
            (true, false) => second,
            (false, true) => first,
            (false, false) => Self::Split(Box::new(first), Box::new(second)),
        }
    }

    /// True when applying this operation changes nothing.
    pub fn is_noop(&self) -> bool {
        match self {
            Self::NoOp => true,
            Self::Insert { text, .. } | Self::Delete { text, .. } => text.is_empty(),
            Self::Split(first, second) => first.is_noop() && second.is_noop(),
        }
    }

    /// Net change of the document length in chars.
    pub fn len_delta(&self) -> i64 {
        match self {
            Self::NoOp => 0,
            Self::Insert { text, .. } => char_len(text) as i64,
            Self::Delete { text, .. } => -(char_len(text) as i64),
            Self::Split(first, second) => first.len_delta() + second.len_delta(),
        }
    }

    /// Apply the operation to `doc` in place.
    ///
    /// # Errors
    ///
    /// - `ProtoError::OffsetOutOfBounds` if an offset lies past the end
    /// - `ProtoError::DeleteMismatch` if deleted text differs from the document
    ///
    /// On error the document may hold the effect of the first half of a
    /// `Split`.
    pub fn apply(&self, doc: &mut String) -> Result<(), ProtoError> {
        match self {
            Self::NoOp => Ok(()),
            Self::Insert { offset, text } => {
                let at = byte_index(doc, *offset)?;
                doc.insert_str(at, text);
                Ok(())
            },
            Self::Delete { offset, text } => {
                let start = byte_index(doc, *offset)?;
                let end = byte_index(doc, offset + char_len(text))?;
                if &doc[start..end] != text.as_str() {
                    return Err(ProtoError::DeleteMismatch {
                        offset: *offset,
                        expected: text.clone(),
                        found: doc[start..end].to_string(),
                    });
                }
                doc.replace_range(start..end, "");
                Ok(())
            },
            Self::Split(first, second) => {
                first.apply(doc)?;
                second.apply(doc)
            },
        }
    }
}

/// Length of `text` in chars.
pub(crate) fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Byte index of char `offset`; the document end is a valid offset.
fn byte_index(doc: &str, offset: usize) -> Result<usize, ProtoError> {
    doc.char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(doc.len()))
        .nth(offset)
        .ok_or(ProtoError::OffsetOutOfBounds { offset, len: char_len(doc) })
}
