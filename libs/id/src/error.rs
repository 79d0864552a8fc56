//! Identifier parse errors.

use thiserror::Error;

/// Why a guid or message ID was rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("identifier is empty")]
    Empty,

    /// Guids are opaque tokens and never contain whitespace.
    #[error("identifier contains whitespace: {0:?}")]
    Whitespace(String),

    #[error("identifier contains reserved key separator: {0:?}")]
    ReservedSeparator(String),

    #[error("message ID prefix must be '{expected}', found '{actual}'")]
    InvalidPrefix {
        expected: &'static str,
        actual: String,
    },

    #[error("message ID has no '_' between prefix and ULID")]
    MissingSeparator,

    #[error("message ID carries an invalid ULID: {0}")]
    InvalidUlid(String),
}

impl IdError {
    pub fn is_empty(&self) -> bool {
        matches!(self, IdError::Empty)
    }

    /// True for errors that only a prefixed message ID can produce.
    pub fn is_message_id_error(&self) -> bool {
        matches!(
            self,
            IdError::InvalidPrefix { .. } | IdError::MissingSeparator | IdError::InvalidUlid(_)
        )
    }
}
