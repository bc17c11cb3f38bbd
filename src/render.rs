//! Report assembly and byte humanization.
//!
//! The JSON field names here (and in the structs they serialize) are an
//! external contract for downstream tooling; renaming them is a
//! breaking change.

use serde::Serialize;

use crate::estimate::memory::MemoryUsage;
use crate::view::architecture::ArchitectureView;
use crate::view::model::ModelView;
use crate::view::tokenizer::TokenizerView;

#[derive(Debug, Serialize)]
pub struct Report {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub architecture: Option<ArchitectureView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokenizer: Option<TokenizerView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimate: Option<EstimateReport>,
}

/// A single estimate, or one row per gpu-layers sweep step.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum EstimateReport {
    Single(Box<MemoryUsage>),
    Sweep(Vec<MemoryUsage>),
}

impl Report {
    pub fn to_json(&self, compact: bool) -> serde_json::Result<String> {
        if compact {
            serde_json::to_string(self)
        } else {
            serde_json::to_string_pretty(self)
        }
    }
}

/// "4.09 GiB", "238.39 MiB", "512 B".
pub fn human_bytes(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    const MIB: f64 = 1024.0 * 1024.0;
    const GIB: f64 = 1024.0 * 1024.0 * 1024.0;
    let b = bytes as f64;
    if b >= GIB {
        format!("{:.2} GiB", b / GIB)
    } else if b >= MIB {
        format!("{:.2} MiB", b / MIB)
    } else if b >= KIB {
        format!("{:.2} KiB", b / KIB)
    } else {
        format!("{bytes} B")
    }
}

/// "33 (32 + 1)" when the output layer rides along, else the block count.
pub fn offload_label(usage: &MemoryUsage) -> String {
    if usage.offloaded_layers > usage.total_layers {
        format!(
            "{} ({} + 1)",
            usage.offloaded_layers, usage.total_layers
        )
    } else {
        usage.offloaded_layers.to_string()
    }
}
