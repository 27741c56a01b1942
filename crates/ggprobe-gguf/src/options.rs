use crate::error::{GgufError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How a GGUF container is read.
///
/// ```
/// use ggprobe_gguf::ParseOptions;
///
/// let opts = ParseOptions { approximate: true, ..ParseOptions::default() };
/// assert_eq!(opts.skip_threshold(), Some(ParseOptions::DEFAULT_SKIP_THRESHOLD));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParseOptions {
    /// Memory-map local files instead of reading through a buffered handle.
    pub use_mmap: bool,
    /// Skip large arrays with the default threshold and tolerate unknown
    /// tensor element types.
    pub approximate: bool,
    /// Arrays whose encoded size exceeds this many bytes are not materialized.
    pub skip_large_metadata: Option<u64>,
    /// Bytes a remote source may prefetch ahead of the decoder.
    pub remote_buffer_size: usize,
    /// Size of each ranged request issued by the prefetch task.
    pub remote_chunk_size: usize,
    /// Extra attempts for a failed ranged request.
    pub remote_retries: u32,
    /// Backoff before the first retry; doubles on every further attempt.
    pub remote_backoff: Duration,
    /// Abort the whole parse after this long.
    pub deadline: Option<Duration>,
    #[serde(skip)]
    pub cancel: Option<CancellationToken>,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            use_mmap: true,
            approximate: false,
            skip_large_metadata: None,
            remote_buffer_size: 8 << 20,
            remote_chunk_size: 1 << 20,
            remote_retries: 3,
            remote_backoff: Duration::from_millis(100),
            deadline: None,
            cancel: None,
        }
    }
}

impl ParseOptions {
    pub const DEFAULT_SKIP_THRESHOLD: u64 = 1 << 20;

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Effective array skip threshold, if any.
    pub fn skip_threshold(&self) -> Option<u64> {
        self.skip_large_metadata
            .or_else(|| self.approximate.then_some(Self::DEFAULT_SKIP_THRESHOLD))
    }

    /// Chunks the prefetch channel holds before the fetch task blocks.
    pub fn prefetch_depth(&self) -> usize {
        (self.remote_buffer_size / self.remote_chunk_size.max(1)).max(1)
    }

    pub fn validate(&self) -> Result<()> {
        if self.remote_chunk_size == 0 {
            return Err(GgufError::InvalidOptions("remote_chunk_size must be non-zero".into()));
        }
        if self.remote_buffer_size < self.remote_chunk_size {
            return Err(GgufError::InvalidOptions(format!(
                "remote_buffer_size ({}) is smaller than remote_chunk_size ({})",
                self.remote_buffer_size, self.remote_chunk_size
            )));
        }
        if self.deadline == Some(Duration::ZERO) {
            return Err(GgufError::InvalidOptions("deadline must be non-zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let opts = ParseOptions::default();
        assert!(opts.use_mmap);
        assert_eq!(opts.skip_threshold(), None);
        assert_eq!(opts.prefetch_depth(), 8);
        opts.validate().unwrap();
    }

    #[test]
    fn explicit_threshold_wins_over_approximate() {
        let opts = ParseOptions { approximate: true, skip_large_metadata: Some(64), ..Default::default() };
        assert_eq!(opts.skip_threshold(), Some(64));
    }

    #[test]
    fn rejects_zero_chunk() {
        let opts = ParseOptions { remote_chunk_size: 0, ..Default::default() };
        assert!(matches!(opts.validate(), Err(GgufError::InvalidOptions(_))));
    }

    #[test]
    fn deserializes_partial_json_with_defaults() {
        let opts: ParseOptions =
            serde_json::from_str(r#"{ "use_mmap": false, "remote_retries": 5 }"#).unwrap();
        assert!(!opts.use_mmap);
        assert_eq!(opts.remote_retries, 5);
        assert_eq!(opts.remote_chunk_size, 1 << 20);
        assert!(opts.cancel.is_none());
    }
}
