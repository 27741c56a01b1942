use std::io;
use thiserror::Error;

/// Errors returned while decoding a GGUF container.
///
/// Decoding fails wholly on the first error: no partially filled metadata or
/// tensor tables are ever returned.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum GgufError {
    #[error("bad magic: {0:02x?}")]
    BadMagic([u8; 4]),
    #[error("unsupported GGUF version: {0}")]
    UnsupportedVersion(u32),
    #[error("truncated read: need {needed} bytes at offset {offset}, source holds {size}")]
    Truncated { offset: u64, needed: u64, size: u64 },
    #[error("unsupported metadata value type: {0}")]
    UnsupportedValueType(u32),
    #[error("unsupported tensor type {tag} for tensor {name:?}")]
    UnsupportedTensorType { name: String, tag: u32 },
    #[error("string too large: {0} bytes")]
    StringTooLarge(u64),
    #[error("malformed GGUF data: {0}")]
    Malformed(String),
    #[error("invalid parse options: {0}")]
    InvalidOptions(String),
    #[error("network error (retryable: {retryable}): {message}")]
    Network { retryable: bool, message: String },
    #[error("operation cancelled")]
    Cancelled,
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl GgufError {
    /// `true` for the header class of failures (unrecognised magic or version).
    pub fn is_malformed_header(&self) -> bool {
        matches!(self, Self::BadMagic(_) | Self::UnsupportedVersion(_))
    }

    /// `true` when retrying the same read may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network { retryable: true, .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }
}

pub type Result<T> = std::result::Result<T, GgufError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_class_covers_magic_and_version_only() {
        assert!(GgufError::BadMagic(*b"GGML").is_malformed_header());
        assert!(GgufError::UnsupportedVersion(4).is_malformed_header());
        assert!(!GgufError::malformed("dup key").is_malformed_header());
        assert!(!GgufError::Cancelled.is_malformed_header());
    }

    #[test]
    fn only_retryable_network_errors_are_retryable() {
        let transient = GgufError::Network { retryable: true, message: "503".into() };
        let terminal = GgufError::Network { retryable: false, message: "404".into() };
        assert!(transient.is_retryable());
        assert!(!terminal.is_retryable());
        assert!(!GgufError::Cancelled.is_retryable());
    }

    #[test]
    fn truncated_message_names_offset() {
        let err = GgufError::Truncated { offset: 24, needed: 8, size: 28 };
        assert_eq!(
            err.to_string(),
            "truncated read: need 8 bytes at offset 24, source holds 28"
        );
    }
}
