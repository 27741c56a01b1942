use crate::ggml::GgmlType;
use serde::{Deserialize, Serialize};

/// Most dimensions a GGML tensor may declare.
pub const MAX_DIMS: u32 = 4;

/// Tensor descriptor from the GGUF tensor index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorInfo {
    pub name: String,
    /// Dimensions, ne0 (the contiguous one) first.
    pub dims: Vec<u64>,
    pub ggml_type: GgmlType,
    /// Byte offset relative to the start of the tensor-data section.
    pub offset: u64,
}

impl TensorInfo {
    pub fn n_dims(&self) -> usize {
        self.dims.len()
    }

    pub fn elements(&self) -> u64 {
        self.dims.iter().fold(1u64, |acc, &d| acc.saturating_mul(d))
    }

    /// Payload size in bytes, rounded to the type's block size.
    pub fn bytes(&self) -> u64 {
        self.ggml_type.row_size(&self.dims)
    }

    /// Dimension `i`, or 1 when the tensor has fewer dimensions.
    pub fn ne(&self, i: usize) -> u64 {
        self.dims.get(i).copied().unwrap_or(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_sizes() {
        let t = TensorInfo {
            name: "blk.0.attn_q.weight".into(),
            dims: vec![4096, 4096],
            ggml_type: GgmlType::Q8_0,
            offset: 0,
        };
        assert_eq!(t.elements(), 4096 * 4096);
        assert_eq!(t.bytes(), 4096 / 32 * 34 * 4096);
        assert_eq!(t.ne(1), 4096);
        assert_eq!(t.ne(3), 1);
    }

    #[test]
    fn oversized_shapes_saturate() {
        let t = TensorInfo {
            name: "huge".into(),
            dims: vec![1 << 40, 1 << 40],
            ggml_type: GgmlType::F32,
            offset: 0,
        };
        assert_eq!(t.elements(), u64::MAX);
        assert_eq!(t.bytes(), u64::MAX);
    }
}
