//! Architecture hyperparameters projected from `<arch>.*` metadata.

use serde::Serialize;

use super::ViewError;
use crate::format::file::GgufFile;
use crate::format::metadata::Metadata;

/// Architectures the estimator knows how to cost.
pub const RECOGNIZED: &[&str] = &[
    "llama", "qwen2", "qwen2moe", "gemma", "gemma2", "phi3", "mixtral", "grok", "stablelm",
    "bert", "nomic-bert", "mamba", "clip",
];

/// Architectures that produce embeddings only: no KV cache, non-causal
/// attention, batch pinned to the context size.
const EMBEDDING_ONLY: &[&str] = &["bert", "nomic-bert"];

/// Recurrent state sizes for SSM architectures; their per-layer cache
/// does not grow with context length.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SsmParams {
    pub conv_kernel: u64,
    pub inner_size: u64,
    pub state_size: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArchitectureView {
    pub architecture: String,
    pub max_context_length: u64,
    pub embedding_length: u64,
    pub block_count: u64,
    pub feed_forward_length: u64,
    pub attention_head_count: u64,
    pub attention_head_count_kv: u64,
    /// Query heads per KV head.
    pub embedding_gqa: u64,
    /// Key vector width shared by all KV heads of one layer.
    pub embedding_key_gqa: u64,
    pub embedding_value_gqa: u64,
    pub rope_dimension_count: u64,
    pub expert_count: u64,
    pub expert_used_count: u64,
    pub vocabulary_length: u64,
    pub causal_attention: bool,
    pub embedding_only: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssm: Option<SsmParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoder_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub projector_kind: Option<String>,
}

impl ArchitectureView {
    pub fn is_recognized(&self) -> bool {
        RECOGNIZED.contains(&self.architecture.as_str())
    }
}

/// Keyed accessors over `<arch>.<suffix>` entries that tell a missing
/// key apart from a mistyped one.
struct Keys<'a> {
    md: &'a Metadata,
    arch: &'a str,
}

impl<'a> Keys<'a> {
    fn key(&self, suffix: &str) -> String {
        format!("{}.{}", self.arch, suffix)
    }

    fn req_u64(&self, suffix: &str) -> Result<u64, ViewError> {
        let key = self.key(suffix);
        match self.md.get(&key) {
            None => Err(ViewError::MissingMetadata {
                arch: self.arch.to_string(),
                key,
            }),
            Some(v) => v.to_u64().ok_or(ViewError::TypeMismatch { key }),
        }
    }

    fn opt_u64(&self, suffix: &str) -> Result<Option<u64>, ViewError> {
        let key = self.key(suffix);
        match self.md.get(&key) {
            None => Ok(None),
            Some(v) => v.to_u64().map(Some).ok_or(ViewError::TypeMismatch { key }),
        }
    }

    fn opt_bool(&self, suffix: &str) -> Result<Option<bool>, ViewError> {
        let key = self.key(suffix);
        match self.md.get(&key) {
            None => Ok(None),
            Some(v) => v.as_bool().map(Some).ok_or(ViewError::TypeMismatch { key }),
        }
    }
}

/// Project the architecture view from a parsed file.
pub fn project(file: &GgufFile) -> Result<ArchitectureView, ViewError> {
    let md = &file.metadata;
    let arch = md
        .get_str("general.architecture")
        .ok_or_else(|| ViewError::MissingMetadata {
            arch: "general".into(),
            key: "general.architecture".into(),
        })?
        .into_owned();

    if arch == "clip" {
        return project_clip(md);
    }

    let keys = Keys { md, arch: &arch };

    let block_count = keys.req_u64("block_count")?;
    let embedding_length = keys.req_u64("embedding_length")?;
    let max_context_length = keys.req_u64("context_length")?;
    let feed_forward_length = keys.opt_u64("feed_forward_length")?.unwrap_or(0);

    let is_ssm = arch == "mamba";
    let (head_count, head_count_kv) = if is_ssm {
        (0, 0)
    } else {
        let heads = keys.req_u64("attention.head_count")?;
        let kv = keys
            .opt_u64("attention.head_count_kv")?
            .filter(|&kv| kv > 0)
            .unwrap_or(heads);
        (heads, kv)
    };

    let key_length = keys
        .opt_u64("attention.key_length")?
        .unwrap_or(if head_count > 0 {
            embedding_length / head_count
        } else {
            0
        });
    let value_length = keys
        .opt_u64("attention.value_length")?
        .unwrap_or(if head_count > 0 {
            embedding_length / head_count
        } else {
            0
        });

    let embedding_gqa = if head_count_kv > 0 {
        head_count / head_count_kv
    } else {
        0
    };
    let embedding_key_gqa = key_length * head_count_kv;
    let embedding_value_gqa = value_length * head_count_kv;

    let rope_dimension_count = keys.opt_u64("rope.dimension_count")?.unwrap_or(key_length);
    let expert_count = keys.opt_u64("expert_count")?.unwrap_or(0);
    let expert_used_count = keys.opt_u64("expert_used_count")?.unwrap_or(0);

    let vocabulary_length = match keys.opt_u64("vocab_size")? {
        Some(v) => v,
        None => md
            .get("tokenizer.ggml.tokens")
            .and_then(|v| v.as_array())
            .map(|a| a.values.len() as u64)
            .unwrap_or(0),
    };

    let embedding_only = EMBEDDING_ONLY.contains(&arch.as_str());
    let causal_attention = keys
        .opt_bool("attention.causal")?
        .unwrap_or(!embedding_only);

    let ssm = if is_ssm {
        Some(SsmParams {
            conv_kernel: keys.req_u64("ssm.conv_kernel")?,
            inner_size: keys.req_u64("ssm.inner_size")?,
            state_size: keys.req_u64("ssm.state_size")?,
        })
    } else {
        None
    };

    Ok(ArchitectureView {
        architecture: arch,
        max_context_length,
        embedding_length,
        block_count,
        feed_forward_length,
        attention_head_count: head_count,
        attention_head_count_kv: head_count_kv,
        embedding_gqa,
        embedding_key_gqa,
        embedding_value_gqa,
        rope_dimension_count,
        expert_count,
        expert_used_count,
        vocabulary_length,
        causal_attention,
        embedding_only,
        ssm,
        encoder_kind: None,
        projector_kind: None,
    })
}

/// CLIP / multimodal projector files: no context length; the view
/// carries the encoder and projector kinds instead.
fn project_clip(md: &Metadata) -> Result<ArchitectureView, ViewError> {
    let vision = md.get_bool("clip.has_vision_encoder").unwrap_or(false)
        || md.contains("clip.vision.embedding_length");
    let prefix = if vision { "clip.vision" } else { "clip.text" };

    let get = |suffix: &str| -> Result<u64, ViewError> {
        let key = format!("{prefix}.{suffix}");
        match md.get(&key) {
            None => Err(ViewError::MissingMetadata {
                arch: "clip".into(),
                key,
            }),
            Some(v) => v.to_u64().ok_or(ViewError::TypeMismatch { key }),
        }
    };

    let embedding_length = get("embedding_length")?;
    let block_count = get("block_count")?;
    let feed_forward_length = get("feed_forward_length").unwrap_or(0);
    let head_count = get("attention.head_count").unwrap_or(1);

    Ok(ArchitectureView {
        architecture: "clip".into(),
        max_context_length: 0,
        embedding_length,
        block_count,
        feed_forward_length,
        attention_head_count: head_count,
        attention_head_count_kv: head_count,
        embedding_gqa: 1,
        embedding_key_gqa: if head_count > 0 {
            embedding_length
        } else {
            0
        },
        embedding_value_gqa: if head_count > 0 {
            embedding_length
        } else {
            0
        },
        rope_dimension_count: 0,
        expert_count: 0,
        expert_used_count: 0,
        vocabulary_length: 0,
        causal_attention: false,
        embedding_only: false,
        ssm: None,
        encoder_kind: Some(if vision { "vision" } else { "text" }.into()),
        projector_kind: md.get_str("clip.projector_type").map(|s| s.into_owned()),
    })
}
