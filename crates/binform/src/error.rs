//! Error types for binform decoding and encoding.

use thiserror::Error;

/// Error categories from the decoder's failure taxonomy.
///
/// Contract violations (event protocol misuse) are not represented here:
/// they indicate a bug in a parser or visitor implementation and are caught
/// by debug assertions instead of error values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The input bytes are malformed or unreadable.
    Malformed,
    /// The input exceeds a configured resource limit.
    Limit,
}

/// Stable, enumerable failure kinds shared by every format parser.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ErrorKind {
    #[error("[E001] unexpected end of input while reading {context}")]
    UnexpectedEof { context: &'static str },

    #[error("[E002] unknown type marker: 0x{marker:02x}")]
    UnknownMarker { marker: u8 },

    #[error("[E003] invalid UTF-8 in {context}")]
    InvalidUtf8 { context: &'static str },

    #[error("[E004] container size mismatch: declared {declared}, found {actual}")]
    SizeMismatch { declared: u64, actual: u64 },

    #[error("[E005] object key has unsupported type marker 0x{marker:02x}")]
    InvalidKey { marker: u8 },

    #[error("[E006] chunk marker 0x{marker:02x} does not match enclosing string type")]
    IllegalChunkedString { marker: u8 },

    #[error("[E007] malformed decimal fraction")]
    InvalidDecimalFraction,

    #[error("[E008] malformed bigfloat")]
    InvalidBigfloat,

    #[error("[E009] typed container declares an element type without a count")]
    CountRequired,

    #[error("[E010] invalid declared length for {context}")]
    InvalidLength { context: &'static str },

    #[error("[E011] nesting depth exceeds maximum {max}")]
    MaxDepthExceeded { max: usize },

    #[error("[E012] container item count exceeds maximum {max}")]
    MaxItemsExceeded { max: usize },

    #[error("[E013] source read failed: {message}")]
    Io { message: String },
}

impl ErrorKind {
    /// Returns the stable error code string (e.g., "E001").
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::UnexpectedEof { .. } => "E001",
            ErrorKind::UnknownMarker { .. } => "E002",
            ErrorKind::InvalidUtf8 { .. } => "E003",
            ErrorKind::SizeMismatch { .. } => "E004",
            ErrorKind::InvalidKey { .. } => "E005",
            ErrorKind::IllegalChunkedString { .. } => "E006",
            ErrorKind::InvalidDecimalFraction => "E007",
            ErrorKind::InvalidBigfloat => "E008",
            ErrorKind::CountRequired => "E009",
            ErrorKind::InvalidLength { .. } => "E010",
            ErrorKind::MaxDepthExceeded { .. } => "E011",
            ErrorKind::MaxItemsExceeded { .. } => "E012",
            ErrorKind::Io { .. } => "E013",
        }
    }

    /// Returns the failure category for this kind.
    pub fn category(&self) -> ErrorCategory {
        match self {
            ErrorKind::MaxDepthExceeded { .. } | ErrorKind::MaxItemsExceeded { .. } => {
                ErrorCategory::Limit
            }
            _ => ErrorCategory::Malformed,
        }
    }
}

/// Error during decoding, carrying the byte offset where it was detected.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind} at offset {position}")]
pub struct DecodeError {
    kind: ErrorKind,
    position: u64,
}

impl DecodeError {
    /// Creates an error at the given source position.
    pub fn new(kind: ErrorKind, position: u64) -> Self {
        Self { kind, position }
    }

    /// Returns the failure kind.
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Returns the byte offset at which the failure was detected.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Returns the stable error code string (e.g., "E001").
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    /// Returns the failure category.
    pub fn category(&self) -> ErrorCategory {
        self.kind.category()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_stable() {
        assert_eq!(ErrorKind::UnexpectedEof { context: "x" }.code(), "E001");
        assert_eq!(ErrorKind::UnknownMarker { marker: 0xc1 }.code(), "E002");
        assert_eq!(ErrorKind::MaxDepthExceeded { max: 1024 }.code(), "E011");
        assert_eq!(
            ErrorKind::Io { message: "short".to_string() }.code(),
            "E013"
        );
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(
            ErrorKind::UnexpectedEof { context: "x" }.category(),
            ErrorCategory::Malformed
        );
        assert_eq!(
            ErrorKind::MaxDepthExceeded { max: 8 }.category(),
            ErrorCategory::Limit
        );
        assert_eq!(
            ErrorKind::MaxItemsExceeded { max: 16 }.category(),
            ErrorCategory::Limit
        );
        assert_eq!(
            ErrorKind::SizeMismatch { declared: 3, actual: 2 }.category(),
            ErrorCategory::Malformed
        );
    }

    #[test]
    fn test_decode_error_display() {
        let err = DecodeError::new(ErrorKind::UnexpectedEof { context: "array header" }, 17);
        let text = err.to_string();
        assert!(text.contains("E001"));
        assert!(text.contains("array header"));
        assert!(text.contains("offset 17"));
        assert_eq!(err.position(), 17);
        assert_eq!(err.code(), "E001");
    }
}
