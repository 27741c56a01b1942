//! Descriptive `general.*` fields plus the computed model totals.

use crate::architecture::GgufArchitecture;
use crate::file_type::GgufFileType;
use ggprobe_gguf::{ByteOrder, GgufFile};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GgufMetadata {
    /// `model`, `projector`, `adapter` or `imatrix`.
    pub kind: String,
    pub architecture: String,
    pub quantization_version: u32,
    pub alignment: u64,
    pub name: String,
    pub basename: String,
    pub finetune: String,
    pub size_label: String,
    pub author: String,
    pub organization: String,
    pub url: String,
    pub description: String,
    pub license: String,
    pub version: String,
    pub file_type: GgufFileType,
    /// Whether `file_type` was declared rather than guessed.
    pub file_type_declared: bool,
    pub little_endian: bool,
    /// Size of the container in bytes.
    pub file_size: u64,
    /// Sum of all tensor payloads in bytes.
    pub size: u64,
    pub parameters: u64,
    pub bits_per_weight: f64,
}

impl GgufMetadata {
    pub(crate) fn new(file: &GgufFile, arch: &GgufArchitecture, file_type: GgufFileType) -> Self {
        let kv = file.metadata();
        let text = |key: &str| kv.get_string(key).unwrap_or_default().to_owned();
        Self {
            kind: kv.get_string("general.type").unwrap_or(arch.kind()).to_owned(),
            architecture: arch.name().to_owned(),
            quantization_version: kv.get_numeric("general.quantization_version").unwrap_or(0),
            alignment: file.alignment,
            name: text("general.name"),
            basename: text("general.basename"),
            finetune: text("general.finetune"),
            size_label: text("general.size_label"),
            author: text("general.author"),
            organization: text("general.organization"),
            url: text("general.url"),
            description: text("general.description"),
            license: text("general.license"),
            version: text("general.version"),
            file_type,
            file_type_declared: kv.contains("general.file_type"),
            little_endian: file.header.byte_order == ByteOrder::Little,
            file_size: file.size,
            size: file.model_size,
            parameters: file.model_parameters,
            bits_per_weight: file.model_bits_per_weight,
        }
    }

    /// Parameter count in the usual `7.24 B` / `137.00 M` notation.
    pub fn parameters_label(&self) -> String {
        const UNITS: [(f64, &str); 4] = [(1e12, "T"), (1e9, "B"), (1e6, "M"), (1e3, "K")];
        let p = self.parameters as f64;
        UNITS
            .iter()
            .find(|(scale, _)| p >= *scale)
            .map_or_else(|| format!("{}", self.parameters), |(scale, unit)| {
                format!("{:.2} {unit}", p / scale)
            })
    }
}
