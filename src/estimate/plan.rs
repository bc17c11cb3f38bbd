//! Offload plans: which transformer blocks sit on the device.

/// Resolved placement of a model's layers.
///
/// The output layer rides along only when every block is offloaded, so
/// a full plan is reported as "L+1" layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffloadPlan {
    pub total_blocks: u64,
    pub offloaded_blocks: u64,
    pub output_on_device: bool,
}

impl OffloadPlan {
    /// `-1` offloads all blocks plus the output layer, `0` nothing, and
    /// `k` the first `k` blocks (earlier blocks win ties).
    pub fn resolve(gpu_layers: i64, total_blocks: u64) -> Self {
        if gpu_layers < 0 {
            return Self {
                total_blocks,
                offloaded_blocks: total_blocks,
                output_on_device: true,
            };
        }
        let offloaded = (gpu_layers as u64).min(total_blocks);
        Self {
            total_blocks,
            offloaded_blocks: offloaded,
            output_on_device: offloaded == total_blocks && total_blocks > 0,
        }
    }

    /// Layer count as reported: blocks plus the output layer if offloaded.
    pub fn offloaded_layers(&self) -> u64 {
        self.offloaded_blocks + self.output_on_device as u64
    }

    pub fn is_full(&self) -> bool {
        self.offloaded_blocks == self.total_blocks && self.output_on_device
    }

    /// Share of the graph that runs on the device.
    pub fn device_ratio(&self) -> f64 {
        if self.total_blocks == 0 {
            return if self.output_on_device { 1.0 } else { 0.0 };
        }
        self.offloaded_blocks as f64 / self.total_blocks as f64
    }

    pub fn device_participates(&self) -> bool {
        self.offloaded_blocks > 0 || self.output_on_device
    }
}

/// gpu-layers values for a sweep: 0, step, 2·step, …, then full.
pub fn sweep_values(step: u64, total_blocks: u64) -> Vec<i64> {
    let step = step.max(1);
    let mut values: Vec<i64> = (0..total_blocks).step_by(step as usize).map(|v| v as i64).collect();
    values.push(total_blocks as i64);
    values
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_all() {
        let plan = OffloadPlan::resolve(-1, 32);
        assert_eq!(plan.offloaded_blocks, 32);
        assert!(plan.output_on_device);
        assert!(plan.is_full());
        assert_eq!(plan.offloaded_layers(), 33);
    }

    #[test]
    fn test_resolve_none() {
        let plan = OffloadPlan::resolve(0, 32);
        assert_eq!(plan.offloaded_layers(), 0);
        assert!(!plan.device_participates());
        assert_eq!(plan.device_ratio(), 0.0);
    }

    #[test]
    fn test_resolve_partial_keeps_output_on_host() {
        let plan = OffloadPlan::resolve(10, 32);
        assert_eq!(plan.offloaded_blocks, 10);
        assert!(!plan.output_on_device);
        assert!(!plan.is_full());
    }

    #[test]
    fn test_resolve_exact_block_count_is_full() {
        let plan = OffloadPlan::resolve(32, 32);
        assert!(plan.is_full());
        assert_eq!(plan.offloaded_layers(), 33);
    }

    #[test]
    fn test_oversized_request_clamps() {
        let plan = OffloadPlan::resolve(100, 32);
        assert_eq!(plan.offloaded_blocks, 32);
        assert!(plan.is_full());
    }

    #[test]
    fn test_sweep_values() {
        assert_eq!(sweep_values(8, 32), vec![0, 8, 16, 24, 32]);
        assert_eq!(sweep_values(10, 32), vec![0, 10, 20, 30, 32]);
        assert_eq!(sweep_values(64, 32), vec![0, 32]);
    }
}
