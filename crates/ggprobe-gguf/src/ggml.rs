//! GGML tensor element types and their storage traits.
//!
//! Every byte-size computation in the workspace (tensor sizes, KV cache rows,
//! compute buffers) goes through [`GgmlType::row_size`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Block layout of one GGML element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GgmlTypeTraits {
    /// Elements per quantization block (1 for plain scalar types).
    pub block_size: u64,
    /// Bytes occupied by one block.
    pub type_size: u64,
    pub quantized: bool,
}

const fn scalar(type_size: u64) -> GgmlTypeTraits {
    GgmlTypeTraits { block_size: 1, type_size, quantized: false }
}

const fn block(block_size: u64, type_size: u64) -> GgmlTypeTraits {
    GgmlTypeTraits { block_size, type_size, quantized: true }
}

const REMOVED: GgmlTypeTraits = GgmlTypeTraits { block_size: 0, type_size: 0, quantized: true };

/// Indexed by type tag.
#[rustfmt::skip]
static TRAITS: [GgmlTypeTraits; 40] = [
    scalar(4),        // F32
    scalar(2),        // F16
    block(32, 18),    // Q4_0
    block(32, 20),    // Q4_1
    REMOVED,          // Q4_2
    REMOVED,          // Q4_3
    block(32, 22),    // Q5_0
    block(32, 24),    // Q5_1
    block(32, 34),    // Q8_0
    block(32, 36),    // Q8_1
    block(256, 84),   // Q2_K
    block(256, 110),  // Q3_K
    block(256, 144),  // Q4_K
    block(256, 176),  // Q5_K
    block(256, 210),  // Q6_K
    block(256, 292),  // Q8_K
    block(256, 66),   // IQ2_XXS
    block(256, 74),   // IQ2_XS
    block(256, 98),   // IQ3_XXS
    block(256, 50),   // IQ1_S
    block(32, 18),    // IQ4_NL
    block(256, 110),  // IQ3_S
    block(256, 82),   // IQ2_S
    block(256, 136),  // IQ4_XS
    scalar(1),        // I8
    scalar(2),        // I16
    scalar(4),        // I32
    scalar(8),        // I64
    scalar(8),        // F64
    block(256, 56),   // IQ1_M
    scalar(2),        // BF16
    block(32, 18),    // Q4_0_4_4
    block(32, 18),    // Q4_0_4_8
    block(32, 18),    // Q4_0_8_8
    block(256, 54),   // TQ1_0
    block(256, 66),   // TQ2_0
    block(32, 18),    // IQ4_NL_4_4
    block(32, 18),    // IQ4_NL_4_8
    block(32, 18),    // IQ4_NL_8_8
    block(32, 17),    // MXFP4
];

/// Element type of a tensor, numbered by its GGUF tag.
///
/// `Unknown` only appears when decoding in approximate mode; it carries the
/// raw tag and occupies zero bytes.
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GgmlType {
    F32,
    F16,
    Q4_0,
    Q4_1,
    Q4_2,
    Q4_3,
    Q5_0,
    Q5_1,
    Q8_0,
    Q8_1,
    Q2_K,
    Q3_K,
    Q4_K,
    Q5_K,
    Q6_K,
    Q8_K,
    IQ2_XXS,
    IQ2_XS,
    IQ3_XXS,
    IQ1_S,
    IQ4_NL,
    IQ3_S,
    IQ2_S,
    IQ4_XS,
    I8,
    I16,
    I32,
    I64,
    F64,
    IQ1_M,
    BF16,
    Q4_0_4_4,
    Q4_0_4_8,
    Q4_0_8_8,
    TQ1_0,
    TQ2_0,
    IQ4_NL_4_4,
    IQ4_NL_4_8,
    IQ4_NL_8_8,
    MXFP4,
    Unknown(u32),
}

impl GgmlType {
    /// All known types in tag order.
    pub const ALL: [GgmlType; 40] = [
        Self::F32,
        Self::F16,
        Self::Q4_0,
        Self::Q4_1,
        Self::Q4_2,
        Self::Q4_3,
        Self::Q5_0,
        Self::Q5_1,
        Self::Q8_0,
        Self::Q8_1,
        Self::Q2_K,
        Self::Q3_K,
        Self::Q4_K,
        Self::Q5_K,
        Self::Q6_K,
        Self::Q8_K,
        Self::IQ2_XXS,
        Self::IQ2_XS,
        Self::IQ3_XXS,
        Self::IQ1_S,
        Self::IQ4_NL,
        Self::IQ3_S,
        Self::IQ2_S,
        Self::IQ4_XS,
        Self::I8,
        Self::I16,
        Self::I32,
        Self::I64,
        Self::F64,
        Self::IQ1_M,
        Self::BF16,
        Self::Q4_0_4_4,
        Self::Q4_0_4_8,
        Self::Q4_0_8_8,
        Self::TQ1_0,
        Self::TQ2_0,
        Self::IQ4_NL_4_4,
        Self::IQ4_NL_4_8,
        Self::IQ4_NL_8_8,
        Self::MXFP4,
    ];

    /// Look up a known type by its wire tag.
    pub fn from_tag(tag: u32) -> Option<Self> {
        Self::ALL.get(tag as usize).copied()
    }

    /// Like [`from_tag`](Self::from_tag), but keeps unknown tags as `Unknown`.
    pub fn from_tag_lossy(tag: u32) -> Self {
        Self::from_tag(tag).unwrap_or(Self::Unknown(tag))
    }

    pub fn tag(self) -> u32 {
        match self {
            Self::Unknown(tag) => tag,
            // Position in `ALL` is the tag for every known variant.
            known => Self::ALL.iter().position(|t| *t == known).map_or(u32::MAX, |i| i as u32),
        }
    }

    pub fn traits(self) -> GgmlTypeTraits {
        match self {
            Self::Unknown(_) => REMOVED,
            known => TRAITS[known.tag() as usize],
        }
    }

    pub fn block_size(self) -> u64 {
        self.traits().block_size
    }

    pub fn type_size(self) -> u64 {
        self.traits().type_size
    }

    pub fn is_quantized(self) -> bool {
        self.traits().quantized
    }

    /// Average storage bits per element; 0 for removed or unknown types.
    pub fn bits_per_element(self) -> f64 {
        let t = self.traits();
        if t.block_size == 0 {
            return 0.0;
        }
        (t.type_size * 8) as f64 / t.block_size as f64
    }

    /// Bytes needed to store a tensor of shape `dims` (ne0 first).
    ///
    /// The innermost dimension is rounded up to whole blocks; an empty shape
    /// is a single element.
    pub fn row_size(self, dims: &[u64]) -> u64 {
        let t = self.traits();
        if t.block_size == 0 {
            return 0;
        }
        let (ne0, rest) = match dims.split_first() {
            Some((first, rest)) => {
                (*first, rest.iter().fold(1u64, |acc, &d| acc.saturating_mul(d)))
            }
            None => (1, 1),
        };
        ne0.div_ceil(t.block_size).saturating_mul(t.type_size).saturating_mul(rest)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::F32 => "F32",
            Self::F16 => "F16",
            Self::Q4_0 => "Q4_0",
            Self::Q4_1 => "Q4_1",
            Self::Q4_2 => "Q4_2",
            Self::Q4_3 => "Q4_3",
            Self::Q5_0 => "Q5_0",
            Self::Q5_1 => "Q5_1",
            Self::Q8_0 => "Q8_0",
            Self::Q8_1 => "Q8_1",
            Self::Q2_K => "Q2_K",
            Self::Q3_K => "Q3_K",
            Self::Q4_K => "Q4_K",
            Self::Q5_K => "Q5_K",
            Self::Q6_K => "Q6_K",
            Self::Q8_K => "Q8_K",
            Self::IQ2_XXS => "IQ2_XXS",
            Self::IQ2_XS => "IQ2_XS",
            Self::IQ3_XXS => "IQ3_XXS",
            Self::IQ1_S => "IQ1_S",
            Self::IQ4_NL => "IQ4_NL",
            Self::IQ3_S => "IQ3_S",
            Self::IQ2_S => "IQ2_S",
            Self::IQ4_XS => "IQ4_XS",
            Self::I8 => "I8",
            Self::I16 => "I16",
            Self::I32 => "I32",
            Self::I64 => "I64",
            Self::F64 => "F64",
            Self::IQ1_M => "IQ1_M",
            Self::BF16 => "BF16",
            Self::Q4_0_4_4 => "Q4_0_4_4",
            Self::Q4_0_4_8 => "Q4_0_4_8",
            Self::Q4_0_8_8 => "Q4_0_8_8",
            Self::TQ1_0 => "TQ1_0",
            Self::TQ2_0 => "TQ2_0",
            Self::IQ4_NL_4_4 => "IQ4_NL_4_4",
            Self::IQ4_NL_4_8 => "IQ4_NL_4_8",
            Self::IQ4_NL_8_8 => "IQ4_NL_8_8",
            Self::MXFP4 => "MXFP4",
            Self::Unknown(_) => "UNKNOWN",
        }
    }
}

impl fmt::Display for GgmlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(tag) => write!(f, "UNKNOWN({tag})"),
            known => f.write_str(known.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_follow_declaration_order() {
        for (i, t) in GgmlType::ALL.iter().enumerate() {
            assert_eq!(t.tag(), i as u32, "{t}");
            assert_eq!(GgmlType::from_tag(i as u32), Some(*t));
        }
        assert_eq!(GgmlType::from_tag(40), None);
        assert_eq!(GgmlType::from_tag_lossy(77), GgmlType::Unknown(77));
        assert_eq!(GgmlType::Unknown(77).tag(), 77);
    }

    #[test]
    fn row_size_rounds_innermost_dim_to_blocks() {
        assert_eq!(GgmlType::F32.row_size(&[10, 3]), 120);
        assert_eq!(GgmlType::Q4_0.row_size(&[64]), 36);
        // 33 elements need two Q4_0 blocks.
        assert_eq!(GgmlType::Q4_0.row_size(&[33]), 36);
        assert_eq!(GgmlType::Q4_K.row_size(&[4096, 4096]), 4096 / 256 * 144 * 4096);
        assert_eq!(GgmlType::F16.row_size(&[]), 2);
        assert_eq!(GgmlType::F32.row_size(&[0, 1 << 40, 1 << 40]), 0);
        assert_eq!(GgmlType::F32.row_size(&[1, 1 << 40, 1 << 40]), u64::MAX);
    }

    #[test]
    fn removed_and_unknown_types_are_sizeless() {
        assert_eq!(GgmlType::Q4_2.row_size(&[1024]), 0);
        assert_eq!(GgmlType::Unknown(99).row_size(&[1024]), 0);
        assert_eq!(GgmlType::Q4_3.bits_per_element(), 0.0);
    }

    #[test]
    fn bits_per_element_matches_block_layout() {
        assert_eq!(GgmlType::F16.bits_per_element(), 16.0);
        assert_eq!(GgmlType::Q8_0.bits_per_element(), 8.5);
        assert_eq!(GgmlType::Q4_K.bits_per_element(), 4.5);
        assert_eq!(GgmlType::Q6_K.bits_per_element(), 6.5625);
        assert!(!GgmlType::BF16.is_quantized());
        assert!(GgmlType::MXFP4.is_quantized());
    }
}
