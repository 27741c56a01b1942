//! Collapsing an estimate into RAM and VRAM totals.

use crate::estimate::RunEstimate;
use crate::placement::HOST;
use crate::usage::DeviceUsage;
use serde::Serialize;

/// Bytes needed on a unified-memory system and on a discrete one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemoryUsage {
    pub uma: u64,
    pub non_uma: u64,
}

impl MemoryUsage {
    fn add(&mut self, other: MemoryUsage) {
        self.uma = self.uma.saturating_add(other.uma);
        self.non_uma = self.non_uma.saturating_add(other.non_uma);
    }
}

/// Per-device totals of an estimate and all of its sub-estimates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub ram: MemoryUsage,
    /// One entry per non-host device.
    pub vrams: Vec<MemoryUsage>,
}

fn ram_of(host: &DeviceUsage, use_mmap: bool) -> MemoryUsage {
    let footprint = host.computation.footprint;
    let weight = host.weight.sum();
    let kv = host.kv_cache.sum();
    let compute = host.computation.sum().saturating_sub(footprint);
    let mut uma = footprint.saturating_add(weight).saturating_add(kv).saturating_add(compute);
    if use_mmap {
        uma = uma.saturating_sub(weight);
    }
    MemoryUsage { uma, non_uma: uma }
}

fn vram_of(device: &DeviceUsage, use_mmap: bool) -> MemoryUsage {
    let footprint = device.computation.footprint;
    let weight = device.weight.sum();
    let kv = device.kv_cache.sum();
    let compute = device.computation.sum().saturating_sub(footprint);
    let resident = footprint.saturating_add(weight).saturating_add(kv);
    let uma = if use_mmap { resident.saturating_sub(weight) } else { resident };
    MemoryUsage { uma, non_uma: resident.saturating_add(compute) }
}

impl RunEstimate {
    /// Add every part's usage per device.
    ///
    /// With `use_mmap` the weights are paged in from the file and not
    /// counted as resident. `extra_ram` (runtime overhead) is added once to
    /// the discrete RAM total and `extra_vram` (driver overhead) to the
    /// discrete total of every device.
    pub fn summarize(&self, use_mmap: bool, extra_ram: u64, extra_vram: u64) -> RunSummary {
        let mut summary = RunSummary {
            ram: MemoryUsage { uma: 0, non_uma: extra_ram },
            vrams: vec![
                MemoryUsage { uma: 0, non_uma: extra_vram };
                self.devices.len().saturating_sub(1)
            ],
        };
        for part in self.parts() {
            for (index, device) in part.devices.iter().enumerate() {
                if index == HOST {
                    summary.ram.add(ram_of(device, use_mmap));
                } else if let Some(vram) = summary.vrams.get_mut(index - 1) {
                    vram.add(vram_of(device, use_mmap));
                }
            }
        }
        summary
    }
}
