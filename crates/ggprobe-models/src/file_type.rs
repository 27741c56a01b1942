//! Legacy `general.file_type` labels and the majority-vote guess used when a
//! file does not declare one.

use ggprobe_gguf::{GgmlType, TensorInfo};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Value of `general.file_type`, numbered as llama.cpp's `llama_ftype`.
///
/// The names follow llama.cpp's historical labels, including the
/// `MostlyQ4_1SomeF16` oddity and the two removed `Q4_2`/`Q4_3` slots.
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GgufFileType {
    AllF32,
    MostlyF16,
    MostlyQ4_0,
    MostlyQ4_1,
    MostlyQ4_1SomeF16,
    MostlyQ4_2,
    MostlyQ4_3,
    MostlyQ8_0,
    MostlyQ5_0,
    MostlyQ5_1,
    MostlyQ2_K,
    MostlyQ3_K_S,
    MostlyQ3_K_M,
    MostlyQ3_K_L,
    MostlyQ4_K_S,
    MostlyQ4_K_M,
    MostlyQ5_K_S,
    MostlyQ5_K_M,
    MostlyQ6_K,
    MostlyIQ2_XXS,
    MostlyIQ2_XS,
    MostlyQ2_K_S,
    MostlyIQ3_XS,
    MostlyIQ3_XXS,
    MostlyIQ1_S,
    MostlyIQ4_NL,
    MostlyIQ3_S,
    MostlyIQ3_M,
    MostlyIQ2_S,
    MostlyIQ2_M,
    MostlyIQ4_XS,
    MostlyIQ1_M,
    MostlyBF16,
    MostlyQ4_0_4_4,
    MostlyQ4_0_4_8,
    MostlyQ4_0_8_8,
    MostlyTQ1_0,
    MostlyTQ2_0,
    MostlyMXFP4,
    /// Declared value outside the table, or no tensors to vote with.
    Unknown,
}

impl GgufFileType {
    /// Every labelled file type in `general.file_type` order.
    pub const ALL: [GgufFileType; 39] = [
        Self::AllF32,
        Self::MostlyF16,
        Self::MostlyQ4_0,
        Self::MostlyQ4_1,
        Self::MostlyQ4_1SomeF16,
        Self::MostlyQ4_2,
        Self::MostlyQ4_3,
        Self::MostlyQ8_0,
        Self::MostlyQ5_0,
        Self::MostlyQ5_1,
        Self::MostlyQ2_K,
        Self::MostlyQ3_K_S,
        Self::MostlyQ3_K_M,
        Self::MostlyQ3_K_L,
        Self::MostlyQ4_K_S,
        Self::MostlyQ4_K_M,
        Self::MostlyQ5_K_S,
        Self::MostlyQ5_K_M,
        Self::MostlyQ6_K,
        Self::MostlyIQ2_XXS,
        Self::MostlyIQ2_XS,
        Self::MostlyQ2_K_S,
        Self::MostlyIQ3_XS,
        Self::MostlyIQ3_XXS,
        Self::MostlyIQ1_S,
        Self::MostlyIQ4_NL,
        Self::MostlyIQ3_S,
        Self::MostlyIQ3_M,
        Self::MostlyIQ2_S,
        Self::MostlyIQ2_M,
        Self::MostlyIQ4_XS,
        Self::MostlyIQ1_M,
        Self::MostlyBF16,
        Self::MostlyQ4_0_4_4,
        Self::MostlyQ4_0_4_8,
        Self::MostlyQ4_0_8_8,
        Self::MostlyTQ1_0,
        Self::MostlyTQ2_0,
        Self::MostlyMXFP4,
    ];

    /// Map a declared `general.file_type` value.
    pub fn from_declared(value: u32) -> Self {
        Self::ALL.get(value as usize).copied().unwrap_or(Self::Unknown)
    }

    /// The `general.file_type` value, `None` for [`Unknown`](Self::Unknown).
    pub fn declared(self) -> Option<u32> {
        Self::ALL.iter().position(|&t| t == self).map(|i| i as u32)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::AllF32 => "F32",
            Self::MostlyF16 => "F16",
            Self::MostlyQ4_0 => "Q4_0",
            Self::MostlyQ4_1 => "Q4_1",
            Self::MostlyQ4_1SomeF16 => "Q4_1_SOME_F16",
            Self::MostlyQ4_2 => "Q4_2",
            Self::MostlyQ4_3 => "Q4_3",
            Self::MostlyQ8_0 => "Q8_0",
            Self::MostlyQ5_0 => "Q5_0",
            Self::MostlyQ5_1 => "Q5_1",
            Self::MostlyQ2_K => "Q2_K",
            Self::MostlyQ3_K_S => "Q3_K_S",
            Self::MostlyQ3_K_M => "Q3_K_M",
            Self::MostlyQ3_K_L => "Q3_K_L",
            Self::MostlyQ4_K_S => "Q4_K_S",
            Self::MostlyQ4_K_M => "Q4_K_M",
            Self::MostlyQ5_K_S => "Q5_K_S",
            Self::MostlyQ5_K_M => "Q5_K_M",
            Self::MostlyQ6_K => "Q6_K",
            Self::MostlyIQ2_XXS => "IQ2_XXS",
            Self::MostlyIQ2_XS => "IQ2_XS",
            Self::MostlyQ2_K_S => "Q2_K_S",
            Self::MostlyIQ3_XS => "IQ3_XS",
            Self::MostlyIQ3_XXS => "IQ3_XXS",
            Self::MostlyIQ1_S => "IQ1_S",
            Self::MostlyIQ4_NL => "IQ4_NL",
            Self::MostlyIQ3_S => "IQ3_S",
            Self::MostlyIQ3_M => "IQ3_M",
            Self::MostlyIQ2_S => "IQ2_S",
            Self::MostlyIQ2_M => "IQ2_M",
            Self::MostlyIQ4_XS => "IQ4_XS",
            Self::MostlyIQ1_M => "IQ1_M",
            Self::MostlyBF16 => "BF16",
            Self::MostlyQ4_0_4_4 => "Q4_0_4_4",
            Self::MostlyQ4_0_4_8 => "Q4_0_4_8",
            Self::MostlyQ4_0_8_8 => "Q4_0_8_8",
            Self::MostlyTQ1_0 => "TQ1_0",
            Self::MostlyTQ2_0 => "TQ2_0",
            Self::MostlyMXFP4 => "MXFP4",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for GgufFileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Whether a tensor takes part in the vote.
///
/// Ordinary models vote with their repeating blocks; diffusion checkpoints
/// have no `blk.` prefix and vote with every `.weight` tensor.
pub fn is_voting_tensor(name: &str, diffusion: bool) -> bool {
    if diffusion { name.ends_with(".weight") } else { name.starts_with("blk.") }
}

/// Count tensors per element type among the voting tensors.
pub fn type_histogram<'a>(
    tensors: impl IntoIterator<Item = &'a TensorInfo>,
    diffusion: bool,
) -> BTreeMap<GgmlType, u64> {
    let mut counts = BTreeMap::new();
    for t in tensors.into_iter().filter(|t| is_voting_tensor(&t.name, diffusion)) {
        *counts.entry(t.ggml_type).or_insert(0) += 1;
    }
    counts
}

/// Guess the file type from a histogram of tensor element types.
///
/// Types are ranked by count, ties broken by ascending tag. F32 at the top
/// hands the vote to the runner-up. The secondary type consulted for the
/// `Q3_K`/`Q4_K`/`Q5_K` families is always the runner-up of the full
/// ranking, even when F32 was skipped.
pub fn classify_histogram(counts: &BTreeMap<GgmlType, u64>) -> GgufFileType {
    let mut ranked: Vec<(GgmlType, u64)> = counts.iter().map(|(&t, &n)| (t, n)).collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));

    let Some(&(top, _)) = ranked.first() else {
        return GgufFileType::Unknown;
    };
    let runner_up = ranked.get(1).map(|&(t, _)| t);
    let majority = match (top, runner_up) {
        (GgmlType::F32, None) => return GgufFileType::AllF32,
        (GgmlType::F32, Some(second)) => second,
        (t, _) => t,
    };

    use GgufFileType as F;
    match majority {
        GgmlType::F32 => F::AllF32,
        GgmlType::F16 => F::MostlyF16,
        GgmlType::Q4_0 => F::MostlyQ4_0,
        GgmlType::Q4_1 => F::MostlyQ4_1,
        GgmlType::Q4_2 => F::MostlyQ4_2,
        GgmlType::Q4_3 => F::MostlyQ4_3,
        GgmlType::Q5_0 => F::MostlyQ5_0,
        GgmlType::Q5_1 => F::MostlyQ5_1,
        GgmlType::Q8_0 => F::MostlyQ8_0,
        GgmlType::Q2_K => F::MostlyQ2_K,
        GgmlType::Q3_K => match runner_up {
            Some(GgmlType::Q4_K) => F::MostlyQ3_K_M,
            Some(GgmlType::Q5_K) => F::MostlyQ3_K_L,
            _ => F::MostlyQ3_K_S,
        },
        GgmlType::Q4_K => match runner_up {
            Some(GgmlType::Q6_K) => F::MostlyQ4_K_M,
            _ => F::MostlyQ4_K_S,
        },
        GgmlType::Q5_K => match runner_up {
            Some(GgmlType::Q6_K) => F::MostlyQ5_K_M,
            _ => F::MostlyQ5_K_S,
        },
        GgmlType::Q6_K => F::MostlyQ6_K,
        GgmlType::IQ2_XXS => F::MostlyIQ2_XXS,
        GgmlType::IQ2_XS => F::MostlyIQ2_XS,
        GgmlType::IQ3_XXS => F::MostlyIQ3_XXS,
        GgmlType::IQ1_S => F::MostlyIQ1_S,
        GgmlType::IQ4_NL => F::MostlyIQ4_NL,
        GgmlType::IQ3_S => F::MostlyIQ3_S,
        GgmlType::IQ2_S => F::MostlyIQ2_S,
        GgmlType::IQ4_XS => F::MostlyIQ4_XS,
        GgmlType::IQ1_M => F::MostlyIQ1_M,
        GgmlType::BF16 => F::MostlyBF16,
        GgmlType::Q4_0_4_4 => F::MostlyQ4_0_4_4,
        GgmlType::Q4_0_4_8 => F::MostlyQ4_0_4_8,
        GgmlType::Q4_0_8_8 => F::MostlyQ4_0_8_8,
        GgmlType::TQ1_0 => F::MostlyTQ1_0,
        GgmlType::TQ2_0 => F::MostlyTQ2_0,
        GgmlType::MXFP4 => F::MostlyMXFP4,
        _ => F::Unknown,
    }
}

/// Guess the file type of a tensor set; see [`classify_histogram`].
pub fn guess_file_type<'a>(
    tensors: impl IntoIterator<Item = &'a TensorInfo>,
    diffusion: bool,
) -> GgufFileType {
    classify_histogram(&type_histogram(tensors, diffusion))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hist(entries: &[(GgmlType, u64)]) -> BTreeMap<GgmlType, u64> {
        entries.iter().copied().collect()
    }

    #[test]
    fn declared_values_round_trip_through_the_table() {
        for (i, t) in GgufFileType::ALL.iter().enumerate() {
            assert_eq!(GgufFileType::from_declared(i as u32), *t);
            assert_eq!(t.declared(), Some(i as u32));
        }
        assert_eq!(GgufFileType::from_declared(1000), GgufFileType::Unknown);
        assert_eq!(GgufFileType::Unknown.declared(), None);
    }

    #[test]
    fn k_quant_secondaries() {
        use GgmlType::*;
        assert_eq!(classify_histogram(&hist(&[(Q3_K, 10), (Q4_K, 3)])), GgufFileType::MostlyQ3_K_M);
        assert_eq!(classify_histogram(&hist(&[(Q3_K, 10), (Q5_K, 3)])), GgufFileType::MostlyQ3_K_L);
        assert_eq!(classify_histogram(&hist(&[(Q3_K, 10), (Q6_K, 3)])), GgufFileType::MostlyQ3_K_S);
        assert_eq!(classify_histogram(&hist(&[(Q5_K, 10), (Q6_K, 1)])), GgufFileType::MostlyQ5_K_M);
        assert_eq!(classify_histogram(&hist(&[(Q5_K, 10)])), GgufFileType::MostlyQ5_K_S);
    }

    #[test]
    fn f32_majority_defers_to_runner_up() {
        use GgmlType::*;
        assert_eq!(classify_histogram(&hist(&[(F32, 9)])), GgufFileType::AllF32);
        assert_eq!(classify_histogram(&hist(&[(F32, 9), (Q8_0, 4)])), GgufFileType::MostlyQ8_0);
        // The runner-up is both the majority and its own secondary here.
        assert_eq!(
            classify_histogram(&hist(&[(F32, 65), (Q4_K, 30), (Q6_K, 5)])),
            GgufFileType::MostlyQ4_K_S
        );
    }

    #[test]
    fn ties_break_on_lower_tag() {
        use GgmlType::*;
        assert_eq!(classify_histogram(&hist(&[(Q6_K, 4), (Q4_K, 4)])), GgufFileType::MostlyQ4_K_M);
        assert_eq!(classify_histogram(&hist(&[(Q8_0, 2), (F16, 2)])), GgufFileType::MostlyF16);
    }

    #[test]
    fn types_without_a_label_are_unknown() {
        assert_eq!(classify_histogram(&hist(&[(GgmlType::Q8_K, 7)])), GgufFileType::Unknown);
        assert_eq!(classify_histogram(&BTreeMap::new()), GgufFileType::Unknown);
    }

    #[test]
    fn voting_tensors_depend_on_family() {
        assert!(is_voting_tensor("blk.3.ffn_up.weight", false));
        assert!(!is_voting_tensor("token_embd.weight", false));
        assert!(is_voting_tensor("model.diffusion_model.out.2.weight", true));
        assert!(!is_voting_tensor("model.diffusion_model.out.2.bias", true));
    }
}
