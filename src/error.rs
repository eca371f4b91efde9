//! Error types for media-probe

use std::io;

/// Result type for media-probe operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while detecting or analyzing a file
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error from the underlying byte source
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Fewer bytes available than a structure declares
    #[error("Truncated input: {0}")]
    Truncated(String),

    /// Invalid file format (malformed structure)
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Invalid structure at a known position
    #[error("Invalid segment at offset {offset}: {reason}")]
    InvalidSegment { offset: u64, reason: String },

    /// Data size exceeds maximum allowed
    #[error("Data too large: {size} bytes (max: {max})")]
    DataTooLarge { size: u64, max: u64 },

    /// A signature spec was rejected at registration time
    #[error("Invalid signature spec: {0}")]
    InvalidSpec(String),

    /// A condition that should never happen
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The byte source failed
    Io,
    /// The input ended early
    Truncated,
    /// A declared size, count or value is inconsistent
    Malformed,
    /// Defect in the detector or its registry
    Internal,
}

impl ErrorKind {
    /// Short name used in the `error` field of an info record
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Io => "io",
            ErrorKind::Truncated => "truncated",
            ErrorKind::Malformed => "bad_data",
            ErrorKind::Internal => "internal",
        }
    }
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof => ErrorKind::Truncated,
            Error::Io(_) => ErrorKind::Io,
            Error::Truncated(_) => ErrorKind::Truncated,
            Error::InvalidFormat(_) | Error::InvalidSegment { .. } | Error::DataTooLarge { .. } => {
                ErrorKind::Malformed
            }
            Error::InvalidSpec(_) | Error::Internal(_) => ErrorKind::Internal,
        }
    }

    pub(crate) fn truncated(what: impl std::fmt::Display) -> Self {
        Error::Truncated(format!("EOF in {what}"))
    }

    pub(crate) fn bad(msg: impl Into<String>) -> Self {
        Error::InvalidFormat(msg.into())
    }
}
