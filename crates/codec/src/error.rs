use thiserror::Error;

/// Result type for codec operations
pub type Result<T> = std::result::Result<T, CodecError>;

/// Errors raised while decoding a persisted blob
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Input ended before a complete value was read
    #[error("Truncated input: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    /// Blob does not start with the expected magic bytes
    #[error("Bad magic header")]
    BadMagic,

    /// Blob was written by a newer format revision
    #[error("Unsupported format version {0}")]
    UnsupportedVersion(u16),

    /// Blob holds a different artifact than requested
    #[error("Unexpected blob kind: expected {expected}, found {found}")]
    WrongKind { expected: &'static str, found: u8 },

    /// Tag byte does not name any known value type
    #[error("Unknown value tag 0x{0:02x}")]
    UnknownTag(u8),

    /// Value type (or record class) is outside the allow-list
    #[error("Disallowed value type {kind} in {context}")]
    DisallowedType { kind: String, context: &'static str },

    /// Text payload is not valid UTF-8
    #[error("Invalid UTF-8 text")]
    InvalidUtf8,

    /// Nesting exceeds the allowed depth
    #[error("Value nesting deeper than {0}")]
    TooDeep(usize),

    /// Structurally valid bytes that do not form the expected shape
    #[error("Malformed blob: {0}")]
    Malformed(String),
}

impl CodecError {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }
}
