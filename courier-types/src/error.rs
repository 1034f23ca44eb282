//! Error types for courier.

use thiserror::Error;

/// Rejections raised while validating identifiers and key material.
///
/// These fire before anything is stored.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// user_id does not match `^[A-Za-z0-9_-]{3,32}$`.
    #[error("invalid user_id format")]
    InvalidUserId,

    /// A hex field has the wrong number of characters.
    #[error("{field} must be {expected} hex characters, got {actual}")]
    HexLength {
        /// Name of the offending field.
        field: &'static str,
        /// Required number of hex characters.
        expected: usize,
        /// Number of characters supplied.
        actual: usize,
    },

    /// A hex field contains a non-hex character.
    #[error("{field} is not valid hex")]
    NotHex {
        /// Name of the offending field.
        field: &'static str,
    },

    /// The request body is not a well-formed upload document.
    #[error("malformed body: {0}")]
    MalformedBody(String),
}

/// Faults on the binary relay protocol.
///
/// Every variant is fatal to the connection it occurred on and to nothing else.
#[derive(Debug, Error)]
pub enum WireError {
    /// Command byte outside REGISTER / SEND / FETCH.
    #[error("unknown command byte 0x{0:02x}")]
    UnknownCommand(u8),

    /// The peer closed the stream in the middle of a frame.
    #[error("truncated frame: stream ended while reading {field}")]
    Truncated {
        /// Which part of the frame was being read.
        field: &'static str,
    },

    /// A reply byte the client did not expect.
    #[error("unexpected reply byte 0x{0:02x}")]
    UnexpectedReply(u8),

    /// Underlying transport error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WireError {
    /// Map an I/O error from a `read_exact` into a truncation when the stream ended early.
    pub(crate) fn from_read(err: std::io::Error, field: &'static str) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            Self::Truncated { field }
        } else {
            Self::Io(err)
        }
    }
}
