//! Runtime configuration for gguf-probe.
//!
//! Command-line arguments map onto an [`EstimateConfig`]; the estimator
//! consumes a [`ResolvedConfig`] produced per architecture, where the
//! context size is defaulted/clamped and quantized KV caches force
//! flash attention on.

use std::path::PathBuf;

use clap::Parser;
use serde::Serialize;

use crate::format::ggml::GgmlType;
use crate::view::architecture::ArchitectureView;

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "gguf-probe",
    about = "Inspect GGUF model files and estimate serving memory"
)]
pub struct Cli {
    /// Path to a local GGUF file.
    #[arg(long)]
    pub path: Option<PathBuf>,

    /// URL of a remote GGUF file, read via byte-range requests.
    #[arg(long)]
    pub url: Option<String>,

    /// HuggingFace repository, e.g. "TheBloke/Llama-2-7B-GGUF".
    #[arg(long, requires = "hf_file")]
    pub hf_repo: Option<String>,

    /// File within --hf-repo.
    #[arg(long)]
    pub hf_file: Option<String>,

    /// ModelScope repository.
    #[arg(long, requires = "ms_file")]
    pub ms_repo: Option<String>,

    /// File within --ms-repo.
    #[arg(long)]
    pub ms_file: Option<String>,

    /// Ollama model reference, e.g. "llama3:8b".
    #[arg(long)]
    pub ol_model: Option<String>,

    /// Ollama registry base URL.
    #[arg(long, default_value = "https://registry.ollama.ai")]
    pub ol_base_url: String,

    /// Apply context/batch/offload overrides from the Ollama params layer.
    #[arg(long)]
    pub ol_usage: bool,

    /// Bearer token for remote endpoints.
    #[arg(long)]
    pub token: Option<String>,

    /// Draft model (speculative decoding): local path.
    #[arg(long)]
    pub draft_path: Option<PathBuf>,

    /// Draft model: remote URL.
    #[arg(long)]
    pub draft_url: Option<String>,

    /// Multimodal projector: local path.
    #[arg(long)]
    pub mmproj_path: Option<PathBuf>,

    /// Multimodal projector: remote URL.
    #[arg(long)]
    pub mmproj_url: Option<String>,

    /// Context size in tokens; defaults to the model's trained maximum.
    #[arg(long)]
    pub ctx_size: Option<u64>,

    /// Clamp --ctx-size to the model's trained maximum.
    #[arg(long)]
    pub in_max_ctx_size: bool,

    /// Logical batch size in tokens.
    #[arg(long, default_value_t = 2048)]
    pub batch_size: u64,

    /// Physical (micro) batch size in tokens.
    #[arg(long, default_value_t = 512)]
    pub ubatch_size: u64,

    /// Number of parallel sequences.
    #[arg(long, default_value_t = 1)]
    pub parallel_size: u64,

    /// Assume flash attention.
    #[arg(long)]
    pub flash_attention: bool,

    /// Assume weights are fully loaded instead of memory-mapped.
    #[arg(long)]
    pub no_mmap: bool,

    /// Transformer blocks to offload; -1 offloads everything.
    #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
    pub gpu_layers: i64,

    /// Blocks of the draft model to offload; -1 offloads everything.
    #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
    pub gpu_layers_draft: i64,

    /// Emit one estimate row per step of offloaded layers.
    #[arg(long)]
    pub gpu_layers_step: Option<u64>,

    /// KV cache type for keys.
    #[arg(long, default_value = "f16", value_parser = parse_cache_type)]
    pub cache_type_k: GgmlType,

    /// KV cache type for values.
    #[arg(long, default_value = "f16", value_parser = parse_cache_type)]
    pub cache_type_v: GgmlType,

    /// Keep the KV cache in host memory.
    #[arg(long)]
    pub no_kv_offload: bool,

    /// Host-side platform footprint in MiB.
    #[arg(long, default_value_t = 150)]
    pub platform_ram: u64,

    /// Device-side platform footprint in MiB.
    #[arg(long, default_value_t = 250)]
    pub platform_vram: u64,

    /// Omit the model section from the report.
    #[arg(long)]
    pub skip_model: bool,

    /// Omit the architecture section from the report.
    #[arg(long)]
    pub skip_architecture: bool,

    /// Omit the tokenizer section from the report.
    #[arg(long)]
    pub skip_tokenizer: bool,

    /// Omit the estimate section from the report.
    #[arg(long)]
    pub skip_estimate: bool,

    /// Trust that the endpoint honors byte ranges instead of probing.
    #[arg(long)]
    pub skip_range_probe: bool,

    /// Skip TLS certificate verification.
    #[arg(long)]
    pub insecure: bool,

    /// Emit compact JSON instead of pretty-printed.
    #[arg(long)]
    pub json_compact: bool,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,
}

/// KV cache types a runtime will actually accept.
pub fn parse_cache_type(s: &str) -> Result<GgmlType, String> {
    match s.to_lowercase().as_str() {
        "f32" => Ok(GgmlType::F32),
        "f16" => Ok(GgmlType::F16),
        "q8_0" => Ok(GgmlType::Q8_0),
        "q4_0" => Ok(GgmlType::Q4_0),
        "q4_1" => Ok(GgmlType::Q4_1),
        "iq4_nl" => Ok(GgmlType::IQ4_NL),
        "q5_0" => Ok(GgmlType::Q5_0),
        "q5_1" => Ok(GgmlType::Q5_1),
        other => Err(format!(
            "unsupported cache type '{other}' (expected one of: f32, f16, q8_0, q4_0, q4_1, iq4_nl, q5_0, q5_1)"
        )),
    }
}

/// Estimation knobs, decoupled from the CLI so presets (e.g. an Ollama
/// params layer) can override fields before resolution.
#[derive(Debug, Clone, Serialize)]
pub struct EstimateConfig {
    /// Requested context size; None means the model's trained maximum.
    pub context_size: Option<u64>,
    pub in_max_ctx_size: bool,
    pub logical_batch_size: u64,
    pub physical_batch_size: u64,
    pub parallel_sequences: u64,
    pub flash_attention: bool,
    pub mmap: bool,
    pub gpu_layers_main: i64,
    pub gpu_layers_draft: i64,
    pub gpu_layers_step: Option<u64>,
    pub cache_type_k: GgmlType,
    pub cache_type_v: GgmlType,
    pub no_kv_offload: bool,
    pub platform_ram_mib: u64,
    pub platform_vram_mib: u64,
}

impl Default for EstimateConfig {
    fn default() -> Self {
        Self {
            context_size: None,
            in_max_ctx_size: false,
            logical_batch_size: 2048,
            physical_batch_size: 512,
            parallel_sequences: 1,
            flash_attention: false,
            mmap: true,
            gpu_layers_main: -1,
            gpu_layers_draft: -1,
            gpu_layers_step: None,
            cache_type_k: GgmlType::F16,
            cache_type_v: GgmlType::F16,
            no_kv_offload: false,
            platform_ram_mib: 150,
            platform_vram_mib: 250,
        }
    }
}

impl EstimateConfig {
    pub fn from_cli(cli: &Cli) -> Self {
        Self {
            context_size: cli.ctx_size,
            in_max_ctx_size: cli.in_max_ctx_size,
            logical_batch_size: cli.batch_size,
            physical_batch_size: cli.ubatch_size,
            parallel_sequences: cli.parallel_size.max(1),
            flash_attention: cli.flash_attention,
            mmap: !cli.no_mmap,
            gpu_layers_main: cli.gpu_layers,
            gpu_layers_draft: cli.gpu_layers_draft,
            gpu_layers_step: cli.gpu_layers_step,
            cache_type_k: cli.cache_type_k,
            cache_type_v: cli.cache_type_v,
            no_kv_offload: cli.no_kv_offload,
            platform_ram_mib: cli.platform_ram,
            platform_vram_mib: cli.platform_vram,
        }
    }

    /// Normalize against one architecture: default/clamp the context,
    /// pin batches for embedding-only models, and force flash attention
    /// when either cache type is quantized (runtimes require it).
    pub fn resolve(&self, arch: &ArchitectureView) -> ResolvedConfig {
        let max_ctx = arch.max_context_length;
        let mut context_size = self.context_size.unwrap_or(max_ctx).max(1);
        if self.in_max_ctx_size && max_ctx > 0 {
            context_size = context_size.min(max_ctx);
        }

        let (logical_batch, physical_batch) = if arch.embedding_only {
            (context_size, context_size)
        } else {
            let logical = self.logical_batch_size.clamp(1, context_size.max(1));
            (logical, self.physical_batch_size.clamp(1, logical))
        };

        let quantized_cache =
            self.cache_type_k.is_quantized() || self.cache_type_v.is_quantized();

        ResolvedConfig {
            context_size,
            logical_batch,
            physical_batch,
            parallel_sequences: self.parallel_sequences.max(1),
            flash_attention: self.flash_attention || quantized_cache,
            mmap: self.mmap,
            cache_type_k: self.cache_type_k,
            cache_type_v: self.cache_type_v,
            no_kv_offload: self.no_kv_offload,
            platform_ram_mib: self.platform_ram_mib,
            platform_vram_mib: self.platform_vram_mib,
        }
    }
}

/// Effective per-architecture settings the estimator computes with.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ResolvedConfig {
    pub context_size: u64,
    pub logical_batch: u64,
    pub physical_batch: u64,
    pub parallel_sequences: u64,
    pub flash_attention: bool,
    pub mmap: bool,
    pub cache_type_k: GgmlType,
    pub cache_type_v: GgmlType,
    pub no_kv_offload: bool,
    pub platform_ram_mib: u64,
    pub platform_vram_mib: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::architecture::ArchitectureView;

    fn arch(max_ctx: u64, embedding_only: bool) -> ArchitectureView {
        ArchitectureView {
            architecture: "llama".into(),
            max_context_length: max_ctx,
            embedding_length: 4096,
            block_count: 32,
            feed_forward_length: 14336,
            attention_head_count: 32,
            attention_head_count_kv: 8,
            embedding_gqa: 4,
            embedding_key_gqa: 1024,
            embedding_value_gqa: 1024,
            rope_dimension_count: 128,
            expert_count: 0,
            expert_used_count: 0,
            vocabulary_length: 32000,
            causal_attention: !embedding_only,
            embedding_only,
            ssm: None,
            encoder_kind: None,
            projector_kind: None,
        }
    }

    #[test]
    fn test_defaults() {
        let cfg = EstimateConfig::default();
        assert_eq!(cfg.logical_batch_size, 2048);
        assert_eq!(cfg.physical_batch_size, 512);
        assert_eq!(cfg.platform_ram_mib, 150);
        assert_eq!(cfg.platform_vram_mib, 250);
        assert!(cfg.mmap);
    }

    #[test]
    fn test_ctx_defaults_to_arch_max() {
        let cfg = EstimateConfig::default();
        let resolved = cfg.resolve(&arch(32768, false));
        assert_eq!(resolved.context_size, 32768);
    }

    #[test]
    fn test_in_max_ctx_size_clamps() {
        let cfg = EstimateConfig {
            context_size: Some(100_000),
            in_max_ctx_size: true,
            ..Default::default()
        };
        assert_eq!(cfg.resolve(&arch(32768, false)).context_size, 32768);

        let unclamped = EstimateConfig {
            context_size: Some(100_000),
            ..Default::default()
        };
        assert_eq!(unclamped.resolve(&arch(32768, false)).context_size, 100_000);
    }

    #[test]
    fn test_quantized_cache_forces_flash_attention() {
        let cfg = EstimateConfig {
            cache_type_k: GgmlType::Q8_0,
            ..Default::default()
        };
        assert!(cfg.resolve(&arch(4096, false)).flash_attention);
        assert!(!EstimateConfig::default()
            .resolve(&arch(4096, false))
            .flash_attention);
    }

    #[test]
    fn test_embedding_only_pins_batches_to_ctx() {
        let cfg = EstimateConfig::default();
        let resolved = cfg.resolve(&arch(2048, true));
        assert_eq!(resolved.logical_batch, 2048);
        assert_eq!(resolved.physical_batch, 2048);
    }

    #[test]
    fn test_cache_type_parsing() {
        assert_eq!(parse_cache_type("Q8_0").unwrap(), GgmlType::Q8_0);
        assert_eq!(parse_cache_type("iq4_nl").unwrap(), GgmlType::IQ4_NL);
        assert!(parse_cache_type("q6_k").is_err());
    }
}
