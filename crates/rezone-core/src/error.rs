//! Typed errors raised while turning an observation into a record.

use thiserror::Error;

use crate::RecordType;

/// Reasons an incoming observation cannot become a [`crate::Record`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field was absent or blank.
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    /// The observation names a record type other than the batch it arrived in.
    #[error("record type mismatch: batch is `{expected}`, observation says `{found}`")]
    TypeMismatch {
        expected: RecordType,
        found: RecordType,
    },
}
