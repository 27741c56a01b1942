//! Per-architecture facts that the metadata does not carry.

/// Architectures whose blocks keep a recurrent state instead of (or next to)
/// a KV cache.
pub const RECURRENT_ARCHITECTURES: &[&str] = &[
    "mamba",
    "mamba2",
    "rwkv6",
    "rwkv6qwen2",
    "rwkv7",
    "arwkv7",
    "jamba",
    "falcon-h1",
    "granitehybrid",
    "lfm2",
    "plamo2",
    "nemotron_h",
];

/// Recurrent architectures that also have attention blocks.
pub const HYBRID_ARCHITECTURES: &[&str] =
    &["jamba", "falcon-h1", "granitehybrid", "lfm2", "plamo2", "nemotron_h"];

/// Sliding-window attention layout known for an architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlidingWindowOverride {
    /// Every `pattern`-th block uses full attention, the rest use the window.
    pub pattern: u64,
    /// Window used when the file does not declare one.
    pub default_window: Option<u64>,
    /// Ignore any declared window.
    pub disable: bool,
}

const fn swa(pattern: u64, default_window: Option<u64>) -> SlidingWindowOverride {
    SlidingWindowOverride { pattern, default_window, disable: false }
}

static SLIDING_WINDOW_OVERRIDES: &[(&str, SlidingWindowOverride)] = &[
    ("gemma2", swa(2, Some(4096))),
    ("gemma3", swa(6, Some(4096))),
    ("cohere2", swa(4, None)),
    ("llama4", swa(4, Some(8192))),
    ("gpt-oss", swa(2, Some(128))),
    ("phi3", SlidingWindowOverride { pattern: 0, default_window: None, disable: true }),
];

impl SlidingWindowOverride {
    pub fn lookup(architecture: &str) -> Option<Self> {
        SLIDING_WINDOW_OVERRIDES.iter().find(|(name, _)| *name == architecture).map(|(_, o)| *o)
    }
}

pub fn is_recurrent(architecture: &str) -> bool {
    RECURRENT_ARCHITECTURES.contains(&architecture)
}

pub fn is_hybrid(architecture: &str) -> bool {
    HYBRID_ARCHITECTURES.contains(&architecture)
}
