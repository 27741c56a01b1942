//! Assignment of blocks and weights to devices.

use crate::config::{RunConfig, SplitMode};
use crate::usage::DeviceUsage;

/// Device index of the host in every estimate.
pub const HOST: usize = 0;

/// Where each block of a model runs under a [`RunConfig`].
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Placement {
    pub n_offload: u64,
    pub full_offloaded: bool,
    block_devices: Vec<usize>,
    output_device: usize,
    main_device: usize,
    split_mode: SplitMode,
    fractions: Vec<f64>,
}

impl Placement {
    pub fn new(block_count: u64, config: &RunConfig) -> Self {
        let n_offload = config.offload_layers().map_or(block_count, |n| n.min(block_count));
        let n_load = block_count - n_offload;
        let full_offloaded = n_load == 0 && config.offload_layers() != Some(0);
        let main_device = 1 + config.main_gpu_index();
        let fractions = config.tensor_split_fraction().to_vec();

        let block_devices: Vec<usize> = (0..block_count)
            .map(|i| {
                if i < n_load {
                    return HOST;
                }
                match config.split_mode() {
                    SplitMode::None | SplitMode::Row => main_device,
                    SplitMode::Layer => {
                        let position = (i - n_load) as f64 / n_offload as f64;
                        1 + fractions.partition_point(|&f| f <= position).min(fractions.len() - 1)
                    }
                }
            })
            .collect();

        let output_device = match block_devices.last() {
            Some(&last) if full_offloaded => last,
            None if full_offloaded => main_device,
            _ => HOST,
        };

        Self {
            n_offload,
            full_offloaded,
            block_devices,
            output_device,
            main_device,
            split_mode: config.split_mode(),
            fractions,
        }
    }

    /// Fresh usage entries: the host, then one per tensor-split fraction.
    pub fn devices(config: &RunConfig) -> Vec<DeviceUsage> {
        let mut devices = vec![DeviceUsage::host()];
        devices.extend((0..config.device_count()).map(|position| {
            let endpoint = config.rpc_servers().get(position).cloned();
            DeviceUsage { remote: endpoint.is_some(), position, endpoint, ..DeviceUsage::default() }
        }));
        devices
    }

    pub fn block_device(&self, block: usize) -> usize {
        self.block_devices.get(block).copied().unwrap_or(HOST)
    }

    pub fn output_device(&self) -> usize {
        self.output_device
    }

    pub fn main_device(&self) -> usize {
        self.main_device
    }

    /// Spread `bytes` of block weights over the devices.
    ///
    /// Row split gives each device its fraction delta and the main device
    /// whatever rounding leaves over; other modes charge the block's device.
    pub fn place_block_weight(&self, block: usize, bytes: u64, devices: &mut [DeviceUsage]) {
        let device = self.block_device(block);
        if device == HOST || self.split_mode != SplitMode::Row {
            let weight = &mut devices[device].weight;
            weight.compute = weight.compute.saturating_add(bytes);
            return;
        }
        let mut placed: u64 = 0;
        let mut previous = 0.0;
        for (k, &fraction) in self.fractions.iter().enumerate() {
            let share = (bytes as f64 * (fraction - previous)) as u64;
            previous = fraction;
            if 1 + k != self.main_device {
                let weight = &mut devices[1 + k].weight;
                weight.compute = weight.compute.saturating_add(share);
                placed = placed.saturating_add(share);
            }
        }
        let main = &mut devices[self.main_device].weight;
        main.compute = main.compute.saturating_add(bytes.saturating_sub(placed));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn placement(blocks: u64, config: RunConfig) -> Placement {
        Placement::new(blocks, &config)
    }

    #[test]
    fn partial_offload_keeps_leading_blocks_on_host() {
        let p = placement(4, RunConfig::builder().offload_layers(2).build().unwrap());
        let devices: Vec<_> = (0..4).map(|i| p.block_device(i)).collect();
        assert_eq!(devices, [HOST, HOST, 1, 1]);
        assert!(!p.full_offloaded);
        assert_eq!(p.output_device(), HOST);
    }

    #[test]
    fn layer_split_follows_fractions() {
        let config = RunConfig::builder().tensor_split(&[1.0, 1.0]).build().unwrap();
        let p = placement(4, config);
        let devices: Vec<_> = (0..4).map(|i| p.block_device(i)).collect();
        assert_eq!(devices, [1, 1, 2, 2]);
        assert_eq!(p.output_device(), 2);
    }

    #[test]
    fn zero_offload_is_never_full() {
        let p = placement(0, RunConfig::builder().offload_layers(0).build().unwrap());
        assert!(!p.full_offloaded);
        assert_eq!(p.output_device(), HOST);
    }

    #[test]
    fn row_split_divides_weights() {
        let config = RunConfig::builder()
            .tensor_split(&[1.0, 3.0])
            .split_mode(SplitMode::Row)
            .build()
            .unwrap();
        let p = placement(1, config.clone());
        let mut devices = Placement::devices(&config);
        p.place_block_weight(0, 1000, &mut devices);
        assert_eq!(devices[1].weight.compute, 250);
        assert_eq!(devices[2].weight.compute, 750);
        assert_eq!(p.block_device(0), 1);
    }
}
