//! RAM/VRAM totals of estimates and their sub-estimates.

use ggprobe_estimate::{
    ComputationUsage, DeviceUsage, KvCacheUsage, MemoryUsage, RunConfig, RunEstimate,
    WeightUsage,
};

fn estimate(kind: &str, devices: Vec<DeviceUsage>) -> RunEstimate {
    RunEstimate {
        kind: kind.to_owned(),
        architecture: "llama".to_owned(),
        context_size: 4096,
        logical_batch_size: 2048,
        physical_batch_size: 512,
        offload_layers: 1,
        full_offloaded: true,
        flash_attention: false,
        embedding_only: false,
        distributable: true,
        devices,
        config: RunConfig::default(),
        drafter: None,
        projector: None,
        adapters: Vec::new(),
    }
}

fn model() -> RunEstimate {
    let host = DeviceUsage {
        weight: WeightUsage { input: 100, compute: 0, output: 0 },
        computation: ComputationUsage { footprint: 50, input: 10, compute: 20, output: 5 },
        ..DeviceUsage::host()
    };
    let device = DeviceUsage {
        handle_layers: 1,
        handle_last_layer: Some(0),
        handle_output_layer: true,
        weight: WeightUsage { input: 0, compute: 1000, output: 0 },
        kv_cache: KvCacheUsage { key: 100, value: 100 },
        computation: ComputationUsage { footprint: 0, input: 10, compute: 300, output: 40 },
        ..DeviceUsage::default()
    };
    estimate("model", vec![host, device])
}

#[test]
fn summary_without_mmap() {
    let summary = model().summarize(false, 0, 0);
    assert_eq!(summary.ram, MemoryUsage { uma: 180, non_uma: 180 });
    assert_eq!(summary.vrams, [MemoryUsage { uma: 1200, non_uma: 1510 }]);
}

#[test]
fn mmap_does_not_count_mapped_weights_as_resident() {
    let summary = model().summarize(true, 0, 0);
    assert_eq!(summary.ram.uma, 80);
    assert_eq!(summary.vrams[0].uma, 200);
    assert_eq!(summary.vrams[0].non_uma, 1510);
}

#[test]
fn extras_only_affect_discrete_totals() {
    let summary = model().summarize(false, 7, 11);
    assert_eq!(summary.ram, MemoryUsage { uma: 180, non_uma: 187 });
    assert_eq!(summary.vrams, [MemoryUsage { uma: 1200, non_uma: 1521 }]);
}

#[test]
fn extra_vram_is_charged_to_every_device() {
    let mut two_devices = model();
    two_devices.devices.push(DeviceUsage { position: 1, ..DeviceUsage::default() });
    let summary = two_devices.summarize(false, 7, 11);
    assert_eq!(summary.ram.non_uma, 187);
    assert_eq!(
        summary.vrams,
        [MemoryUsage { uma: 1200, non_uma: 1521 }, MemoryUsage { uma: 0, non_uma: 11 }]
    );
}

#[test]
fn sub_estimates_are_summed_per_device() {
    let projector = estimate(
        "projector",
        vec![
            DeviceUsage::host(),
            DeviceUsage {
                weight: WeightUsage { input: 500, compute: 0, output: 0 },
                ..DeviceUsage::default()
            },
        ],
    );
    let adapter = estimate(
        "adapter",
        vec![
            DeviceUsage {
                weight: WeightUsage { input: 3, ..WeightUsage::default() },
                ..DeviceUsage::host()
            },
            DeviceUsage::default(),
        ],
    );
    let drafter = model();

    let combined = model().with_projector(projector).with_adapters([adapter]).with_drafter(drafter);
    assert_eq!(combined.parts().len(), 4);
    let kinds: Vec<_> = combined.parts().iter().map(|p| p.kind.as_str()).collect();
    assert_eq!(kinds, ["model", "model", "projector", "adapter"]);

    let summary = combined.summarize(false, 0, 0);
    assert_eq!(summary.ram.uma, 180 + 180 + 3);
    assert_eq!(summary.vrams[0].uma, 1200 + 1200 + 500);
    assert_eq!(summary.vrams[0].non_uma, 1510 + 1510 + 500);
}

#[test]
fn estimates_serialize_with_nested_parts() {
    let value = serde_json::to_value(model().with_projector(model())).unwrap();
    assert_eq!(value["kind"], "model");
    assert_eq!(value["devices"][1]["kv_cache"]["key"], 100);
    assert_eq!(value["devices"][1]["handle_last_layer"], 0);
    assert_eq!(value["devices"][0]["handle_last_layer"], serde_json::Value::Null);
    assert_eq!(value["projector"]["kind"], "model");
    assert_eq!(value["drafter"], serde_json::Value::Null);
    assert_eq!(value["config"]["split_mode"], "layer");
    assert_eq!(value["config"]["cache_key_type"], "F16");
}
