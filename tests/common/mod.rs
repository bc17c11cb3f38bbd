//! Shared fixture builder: writes well-formed GGUF files byte by byte.

// Each test binary uses its own subset of these helpers.
#![allow(dead_code)]

use gguf_probe::format::file::{DEFAULT_ALIGNMENT, GGUF_MAGIC};
use gguf_probe::format::ggml::GgmlType;
use gguf_probe::format::metadata::{encode_kv, encode_len, MetadataValue};

pub struct TensorSpec {
    pub name: String,
    pub dims: Vec<u64>,
    pub ggml_type: GgmlType,
}

pub struct GgufBuilder {
    version: u32,
    metadata: Vec<(String, MetadataValue)>,
    tensors: Vec<TensorSpec>,
}

impl GgufBuilder {
    pub fn new(version: u32) -> Self {
        Self {
            version,
            metadata: Vec::new(),
            tensors: Vec::new(),
        }
    }

    pub fn kv(mut self, key: &str, value: MetadataValue) -> Self {
        self.metadata.push((key.to_string(), value));
        self
    }

    pub fn tensor(mut self, name: &str, dims: &[u64], ggml_type: GgmlType) -> Self {
        self.tensors.push(TensorSpec {
            name: name.to_string(),
            dims: dims.to_vec(),
            ggml_type,
        });
        self
    }

    fn alignment(&self) -> u64 {
        self.metadata
            .iter()
            .find(|(k, _)| k == "general.alignment")
            .and_then(|(_, v)| v.to_u64())
            .unwrap_or(DEFAULT_ALIGNMENT)
    }

    /// Serialize: header, metadata, descriptors with packed aligned
    /// offsets, padding, then zero-filled tensor data.
    pub fn build(self) -> Vec<u8> {
        let v1 = self.version == 1;
        let alignment = self.alignment();

        let mut out = Vec::new();
        out.extend_from_slice(&GGUF_MAGIC);
        out.extend_from_slice(&self.version.to_le_bytes());
        encode_len(self.tensors.len() as u64, v1, &mut out);
        encode_len(self.metadata.len() as u64, v1, &mut out);

        for (key, value) in &self.metadata {
            encode_kv(key, value, v1, &mut out);
        }

        // Descriptors: offsets are packed end to end, aligned up.
        let mut rel_offset = 0u64;
        let mut data_len = 0u64;
        for t in &self.tensors {
            let elements: u64 = t.dims.iter().product();
            let size = t
                .ggml_type
                .bytes_for(elements)
                .expect("fixture tensor dims must fill whole blocks");

            encode_len(t.name.len() as u64, v1, &mut out);
            out.extend_from_slice(t.name.as_bytes());
            out.extend_from_slice(&(t.dims.len() as u32).to_le_bytes());
            for d in &t.dims {
                encode_len(*d, v1, &mut out);
            }
            out.extend_from_slice(&t.ggml_type.code().to_le_bytes());
            out.extend_from_slice(&rel_offset.to_le_bytes());

            data_len = rel_offset + size;
            rel_offset = align_up(data_len, alignment);
        }

        while out.len() as u64 % alignment != 0 {
            out.push(0);
        }
        out.extend(std::iter::repeat(0u8).take(data_len as usize));
        out
    }
}

fn align_up(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}

/// A small llama-shaped model: 4 blocks, GQA 4:1, Q8_0 attention and
/// Q4_0 feed-forward weights.
pub fn llama_fixture(version: u32) -> GgufBuilder {
    let mut b = GgufBuilder::new(version)
        .kv(
            "general.architecture",
            MetadataValue::String("llama".into()),
        )
        .kv("general.name", MetadataValue::String("test-llama".into()))
        .kv("general.file_type", MetadataValue::U32(7))
        .kv("llama.context_length", MetadataValue::U32(4096))
        .kv("llama.embedding_length", MetadataValue::U32(64))
        .kv("llama.block_count", MetadataValue::U32(4))
        .kv("llama.feed_forward_length", MetadataValue::U32(128))
        .kv("llama.attention.head_count", MetadataValue::U32(8))
        .kv("llama.attention.head_count_kv", MetadataValue::U32(2))
        .kv("llama.vocab_size", MetadataValue::U32(100))
        .tensor("token_embd.weight", &[64, 100], GgmlType::F16);
    for i in 0..4 {
        b = b
            .tensor(
                &format!("blk.{i}.attn_q.weight"),
                &[64, 64],
                GgmlType::Q8_0,
            )
            .tensor(
                &format!("blk.{i}.ffn_up.weight"),
                &[64, 128],
                GgmlType::Q4_0,
            );
    }
    b.tensor("output_norm.weight", &[64], GgmlType::F32)
        .tensor("output.weight", &[64, 100], GgmlType::F16)
}

/// A BERT-shaped embedding model.
pub fn bert_fixture() -> GgufBuilder {
    GgufBuilder::new(3)
        .kv("general.architecture", MetadataValue::String("bert".into()))
        .kv("bert.context_length", MetadataValue::U32(512))
        .kv("bert.embedding_length", MetadataValue::U32(64))
        .kv("bert.block_count", MetadataValue::U32(2))
        .kv("bert.feed_forward_length", MetadataValue::U32(128))
        .kv("bert.attention.head_count", MetadataValue::U32(8))
        .tensor("token_embd.weight", &[64, 100], GgmlType::F16)
        .tensor("blk.0.attn_q.weight", &[64, 64], GgmlType::F16)
        .tensor("blk.1.attn_q.weight", &[64, 64], GgmlType::F16)
}
