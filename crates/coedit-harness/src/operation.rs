//! Operations for model-based testing.
//!
//! Operations are generated by `arbitrary` (from proptest bytes or a fuzzer
//! corpus) and applied to a [`World`](crate::World). Indices are reduced
//! modulo the world's participant and document counts, so every generated
//! value maps to something meaningful.

use arbitrary::Arbitrary;

/// Something that can happen in a simulated session.
#[derive(Debug, Clone, Arbitrary)]
pub enum Operation {
    /// A participant types text.
    Insert {
        /// Participant index (0 is the host).
        participant: u8,
        /// Document index.
        document: u8,
        /// Position hint, reduced modulo the document length.
        position: u16,
        /// Inserted text.
        text: SmallText,
    },

    /// A participant deletes a short range.
    Delete {
        /// Participant index (0 is the host).
        participant: u8,
        /// Document index.
        document: u8,
        /// Position hint, reduced modulo the document length.
        position: u16,
        /// Length hint, at most four characters are deleted.
        len: u8,
    },

    /// Deliver the oldest message on one link.
    Deliver {
        /// Link index among links with pending messages.
        link: u8,
    },

    /// A participant publishes checksums of every document.
    PublishChecksums {
        /// Participant index (0 is the host).
        participant: u8,
    },

    /// Advance virtual time and tick every participant.
    AdvanceTime {
        /// Milliseconds to advance.
        millis: u16,
    },
}

/// Short text drawn from a small alphabet with multi-byte characters.
#[derive(Debug, Clone, Arbitrary)]
pub struct SmallText {
    /// First character.
    pub seed: u8,
    /// Length hint (0-3 maps to 1-4 characters).
    pub size_class: u8,
}

const ALPHABET: [char; 8] = ['a', 'b', 'c', 'x', 'é', 'ß', '€', '\n'];

impl SmallText {
    /// Expand to the inserted string.
    pub fn to_text(&self) -> String {
        let len = usize::from(self.size_class % 4) + 1;
        (0..len).map(|i| ALPHABET[(usize::from(self.seed) + i) % ALPHABET.len()]).collect()
    }
}
