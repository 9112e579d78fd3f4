// error.rs - Error taxonomy for decoding, encoding and rewriting class trees
//
// Every failure is terminal for the representation it concerns. Errors raised
// deep inside a parser don't know which input they came from; the
// representation layer stamps the source identifier on them with
// `Error::in_source` before handing them to the caller.

use thiserror::Error;

/// Placeholder source identifier until the caller attaches a real one
pub const UNKNOWN_SOURCE: &str = "<memory>";

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Hex text that isn't canonical-parsable or doesn't fit the expected kind
    #[error("malformed payload '{payload}': {reason}")]
    MalformedPayload { payload: String, reason: String },

    /// An instruction node whose tag names no known operation
    #[error("unknown operation '{tag}'")]
    UnknownOperation { tag: String },

    /// An instruction node whose operands disagree with the operation's shape
    #[error("operation {operation} expects {expected}, found {found}")]
    OperandArityMismatch {
        operation: String,
        expected: String,
        found: String,
    },

    #[error("can't parse class file '{source_id}': {reason}")]
    MalformedBinary { source_id: String, reason: String },

    #[error("can't read class tree '{source_id}': {reason}")]
    MalformedTree { source_id: String, reason: String },

    /// The encoder produced bytes that fail the structural integrity check
    #[error("class '{class}' failed verification: {reason}")]
    VerificationFailed { class: String, reason: String },

    #[error("source '{0}' not found")]
    SourceNotFound(String),

    #[error("source '{source_id}' is unreadable: {reason}")]
    SourceUnreadable { source_id: String, reason: String },

    /// The method node has no `seq` child to read or replace
    #[error("method '{method}' has no instruction sequence")]
    NoInstructionSequence { method: String },
}

impl Error {
    pub(crate) fn payload(payload: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::MalformedPayload {
            payload: payload.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn binary(reason: impl Into<String>) -> Self {
        Error::MalformedBinary {
            source_id: UNKNOWN_SOURCE.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn tree(reason: impl Into<String>) -> Self {
        Error::MalformedTree {
            source_id: UNKNOWN_SOURCE.to_string(),
            reason: reason.into(),
        }
    }

    /// Attach the identifier of the input that produced this error.
    ///
    /// Only the variants that carry a source are touched; an identifier that
    /// was already attached is kept.
    pub fn in_source(self, source: &str) -> Self {
        match self {
            Error::MalformedBinary { source_id, reason } if source_id == UNKNOWN_SOURCE => {
                Error::MalformedBinary {
                    source_id: source.to_string(),
                    reason,
                }
            }
            Error::MalformedTree { source_id, reason } if source_id == UNKNOWN_SOURCE => {
                Error::MalformedTree {
                    source_id: source.to_string(),
                    reason,
                }
            }
            Error::SourceUnreadable { source_id, reason } if source_id == UNKNOWN_SOURCE => {
                Error::SourceUnreadable {
                    source_id: source.to_string(),
                    reason,
                }
            }
            other => other,
        }
    }
}
