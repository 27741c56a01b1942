use super::DEFAULT_ARCHITECTURE;
use crate::layers::LayerGroups;
use ggprobe_gguf::{GgufFile, MetadataKv};
use serde::{Deserialize, Serialize};

/// A LoRA adapter or control vector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdapterArchitecture {
    /// Architecture of the base model the adapter applies to.
    pub architecture: String,
    /// `lora` or `control_vector`.
    pub adapter_type: String,
    pub lora_alpha: f32,
    /// Number of `direction.N` tensors of a control vector.
    pub control_vector_layer_count: u32,
}

impl AdapterArchitecture {
    pub fn from_file(file: &GgufFile) -> Self {
        let kv = file.metadata();
        let general = kv.get_string("general.architecture").filter(|a| *a != "controlvector");
        let architecture =
            kv.get_string("controlvector.model_hint").or(general).unwrap_or(DEFAULT_ARCHITECTURE);

        let is_control_vector = kv.get_string("general.architecture") == Some("controlvector")
            || kv.get_string("adapter.type") == Some("control_vector");
        let adapter_type = if is_control_vector {
            "control_vector"
        } else {
            kv.get_string("adapter.type").unwrap_or("lora")
        };

        let control_vector_layer_count = kv
            .get_numeric("controlvector.layer_count")
            .or_else(|| {
                is_control_vector
                    .then(|| LayerGroups::from_tensors(&file.tensor_infos).block_count() as u32)
            })
            .unwrap_or(0);

        Self {
            architecture: architecture.to_owned(),
            adapter_type: adapter_type.to_owned(),
            lora_alpha: kv.get_numeric("adapter.lora.alpha").unwrap_or(0.0),
            control_vector_layer_count,
        }
    }

    pub fn is_control_vector(&self) -> bool {
        self.adapter_type == "control_vector"
    }
}

/// An importance matrix produced by `llama-imatrix`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImatrixArchitecture {
    pub architecture: String,
    pub chunk_count: u32,
    pub chunk_size: u32,
    /// Names of the calibration datasets.
    pub datasets: Vec<String>,
}

impl ImatrixArchitecture {
    pub fn from_metadata(kv: &MetadataKv) -> Self {
        Self {
            architecture: "imatrix".to_owned(),
            chunk_count: kv.get_numeric("imatrix.chunk_count").unwrap_or(0),
            chunk_size: kv.get_numeric("imatrix.chunk_size").unwrap_or(0),
            datasets: kv
                .get_array("imatrix.datasets")
                .and_then(|a| a.strings())
                .map(|s| s.into_iter().map(str::to_owned).collect())
                .unwrap_or_default(),
        }
    }
}
