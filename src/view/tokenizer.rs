//! Tokenizer summary from `tokenizer.ggml.*` metadata.

use serde::Serialize;

use crate::format::metadata::{Metadata, MetadataValue};

#[derive(Debug, Clone, Serialize)]
pub struct TokenizerView {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub tokens: u64,
    pub added_tokens: u64,
    /// Approximate bytes the token list occupies in metadata.
    pub tokens_size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bos_token_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eos_token_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eot_token_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eom_token_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unknown_token_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub separator_token_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub padding_token_id: Option<i64>,
}

/// Everything here is optional: files without a tokenizer still project.
pub fn project(md: &Metadata) -> TokenizerView {
    let (tokens, tokens_size_bytes) = match md.get("tokenizer.ggml.tokens") {
        Some(MetadataValue::Array(a)) => {
            let bytes: u64 = a
                .values
                .iter()
                .filter_map(|v| match v {
                    MetadataValue::String(s) => Some(s.as_bytes().len() as u64),
                    _ => None,
                })
                .sum();
            (a.values.len() as u64, bytes)
        }
        _ => (0, 0),
    };

    let added_tokens = md
        .get("tokenizer.ggml.added_tokens")
        .and_then(|v| v.as_array())
        .map(|a| a.values.len() as u64)
        .unwrap_or(0);

    let id = |key: &str| md.get(key).and_then(|v| v.to_i64());

    TokenizerView {
        model: md.get_str("tokenizer.ggml.model").map(|s| s.into_owned()),
        tokens,
        added_tokens,
        tokens_size_bytes,
        bos_token_id: id("tokenizer.ggml.bos_token_id"),
        eos_token_id: id("tokenizer.ggml.eos_token_id"),
        eot_token_id: id("tokenizer.ggml.eot_token_id"),
        eom_token_id: id("tokenizer.ggml.eom_token_id"),
        unknown_token_id: id("tokenizer.ggml.unknown_token_id"),
        // llama.cpp spells this key "seperator".
        separator_token_id: id("tokenizer.ggml.seperator_token_id"),
        padding_token_id: id("tokenizer.ggml.padding_token_id"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::metadata::{MetadataArray, ValueType};

    #[test]
    fn test_token_counts_and_sizes() {
        let mut md = Metadata::default();
        md.push(
            "tokenizer.ggml.model".into(),
            MetadataValue::String("gpt2".into()),
        );
        md.push(
            "tokenizer.ggml.tokens".into(),
            MetadataValue::Array(MetadataArray {
                elem_type: ValueType::String,
                values: vec![
                    MetadataValue::String("<s>".into()),
                    MetadataValue::String("hello".into()),
                ],
            }),
        );
        md.push("tokenizer.ggml.bos_token_id".into(), MetadataValue::U32(1));

        let view = project(&md);
        assert_eq!(view.model.as_deref(), Some("gpt2"));
        assert_eq!(view.tokens, 2);
        assert_eq!(view.tokens_size_bytes, 8);
        assert_eq!(view.bos_token_id, Some(1));
        assert_eq!(view.eos_token_id, None);
    }
}
