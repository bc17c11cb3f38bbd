//! The parsed GGUF file: header, metadata dictionary, tensor directory.

use std::borrow::Cow;

use tracing::info;

use super::decode::Decoder;
use super::ggml::GgmlType;
use super::metadata::Metadata;
use super::tensor::TensorDescriptor;
use super::ParseError;
use crate::reader::ByteSource;

pub const GGUF_MAGIC: [u8; 4] = *b"GGUF";
pub const DEFAULT_ALIGNMENT: u64 = 32;

/// Everything the header region of a GGUF file describes. Immutable
/// after parse; tensor data itself is never read.
#[derive(Debug, Clone)]
pub struct GgufFile {
    pub version: u32,
    pub alignment: u64,
    /// Absolute offset where the aligned tensor segment begins.
    pub tensor_data_offset: u64,
    /// Total file size in bytes.
    pub size: u64,
    pub metadata: Metadata,
    pub tensors: Vec<TensorDescriptor>,
}

impl GgufFile {
    /// Parse the header, metadata and tensor directory from any source,
    /// touching only the bytes those regions occupy.
    pub async fn parse<S: ByteSource>(source: &mut S) -> Result<Self, ParseError> {
        let size = source.len();
        let mut dec = Decoder::new(source);

        let magic = dec.read_bytes(4).await?;
        if magic != GGUF_MAGIC {
            return Err(ParseError::InvalidMagic);
        }

        let version = dec.read_u32().await?;
        if !(1..=3).contains(&version) {
            return Err(ParseError::UnsupportedVersion(version));
        }
        dec.set_v1(version == 1);

        let tensor_count = dec.read_len().await?;
        let metadata_count = dec.read_len().await?;

        let metadata = dec.read_metadata(metadata_count).await?;

        let alignment = metadata
            .get_u64("general.alignment")
            .unwrap_or(DEFAULT_ALIGNMENT)
            .max(1);

        let mut tensors = Vec::with_capacity(tensor_count.min(4096) as usize);
        for index in 0..tensor_count as usize {
            tensors.push(read_descriptor(&mut dec, index).await?);
        }

        dec.align_to(alignment);
        let tensor_data_offset = dec.pos();

        validate_directory(&tensors, alignment, tensor_data_offset, size)?;

        info!(
            version,
            tensors = tensors.len(),
            metadata_entries = metadata.len(),
            tensor_data_offset,
            "Parsed GGUF header"
        );

        Ok(Self {
            version,
            alignment,
            tensor_data_offset,
            size,
            metadata,
            tensors,
        })
    }

    pub fn architecture(&self) -> Option<Cow<'_, str>> {
        self.metadata.get_str("general.architecture")
    }

    /// Absolute byte range a tensor's data occupies in the file.
    pub fn tensor_range(&self, tensor: &TensorDescriptor) -> (u64, u64) {
        (
            self.tensor_data_offset + tensor.relative_offset,
            tensor.size_bytes,
        )
    }

    pub fn total_tensor_bytes(&self) -> u64 {
        self.tensors.iter().map(|t| t.size_bytes).sum()
    }

    pub fn parameter_count(&self) -> u64 {
        self.tensors.iter().map(|t| t.elements()).sum()
    }
}

async fn read_descriptor<S: ByteSource>(
    dec: &mut Decoder<'_, S>,
    index: usize,
) -> Result<TensorDescriptor, ParseError> {
    let name = dec.read_string().await?.text().into_owned();

    let n_dims = dec.read_u32().await?;
    if !(1..=4).contains(&n_dims) {
        return Err(ParseError::InvalidTensorShape { index });
    }

    let mut dims = Vec::with_capacity(n_dims as usize);
    for _ in 0..n_dims {
        dims.push(dec.read_len().await?);
    }

    let ggml_type = GgmlType::from_u32(dec.read_u32().await?)?;
    let relative_offset = dec.read_u64().await?;

    let elements = dims
        .iter()
        .try_fold(1u64, |acc, &d| acc.checked_mul(d))
        .ok_or(ParseError::InvalidTensorShape { index })?;
    let size_bytes = ggml_type
        .bytes_for(elements)
        .ok_or(ParseError::InvalidTensorShape { index })?;

    Ok(TensorDescriptor {
        name,
        dims,
        ggml_type,
        relative_offset,
        size_bytes,
    })
}

fn validate_directory(
    tensors: &[TensorDescriptor],
    alignment: u64,
    tensor_data_offset: u64,
    file_size: u64,
) -> Result<(), ParseError> {
    let mut prev_offset = 0u64;
    for (index, t) in tensors.iter().enumerate() {
        if t.relative_offset % alignment != 0 {
            return Err(ParseError::AlignmentViolation { index });
        }
        if index > 0 && t.relative_offset < prev_offset {
            return Err(ParseError::DescriptorOrder { index });
        }
        prev_offset = t.relative_offset;

        let end = t
            .relative_offset
            .checked_add(t.size_bytes)
            .and_then(|end| end.checked_add(tensor_data_offset))
            .ok_or(ParseError::TensorOutOfFile { index })?;
        if end > file_size {
            return Err(ParseError::TensorOutOfFile { index });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::metadata::{encode_kv, encode_len, MetadataValue};
    use crate::reader::MemSource;

    fn minimal_file(version: u32, alignment: Option<u64>) -> Vec<u8> {
        let v1 = version == 1;
        let mut out = Vec::new();
        out.extend_from_slice(&GGUF_MAGIC);
        out.extend_from_slice(&version.to_le_bytes());
        encode_len(1, v1, &mut out); // tensor count
        let meta_count = 1 + alignment.is_some() as u64;
        encode_len(meta_count, v1, &mut out);
        encode_kv(
            "general.architecture",
            &MetadataValue::String("llama".into()),
            v1,
            &mut out,
        );
        if let Some(a) = alignment {
            encode_kv("general.alignment", &MetadataValue::U32(a as u32), v1, &mut out);
        }
        // one tensor: token_embd.weight, F32 [8, 4], offset 0
        encode_len(17, v1, &mut out);
        out.extend_from_slice(b"token_embd.weight");
        out.extend_from_slice(&2u32.to_le_bytes());
        encode_len(8, v1, &mut out);
        encode_len(4, v1, &mut out);
        out.extend_from_slice(&0u32.to_le_bytes()); // F32
        out.extend_from_slice(&0u64.to_le_bytes()); // offset
        // pad + data
        let align = alignment.unwrap_or(DEFAULT_ALIGNMENT);
        while out.len() as u64 % align != 0 {
            out.push(0);
        }
        out.extend_from_slice(&vec![0u8; 8 * 4 * 4]);
        out
    }

    #[tokio::test]
    async fn test_parse_minimal() {
        let mut src = MemSource::new(minimal_file(3, None));
        let file = GgufFile::parse(&mut src).await.unwrap();
        assert_eq!(file.version, 3);
        assert_eq!(file.alignment, 32);
        assert_eq!(file.tensors.len(), 1);
        assert_eq!(file.tensors[0].elements(), 32);
        assert_eq!(file.total_tensor_bytes(), 128);
        assert_eq!(file.architecture().unwrap(), "llama");
        assert_eq!(file.tensor_data_offset % 32, 0);
    }

    #[tokio::test]
    async fn test_v1_parses_like_v3() {
        let mut v1 = MemSource::new(minimal_file(1, None));
        let mut v3 = MemSource::new(minimal_file(3, None));
        let a = GgufFile::parse(&mut v1).await.unwrap();
        let b = GgufFile::parse(&mut v3).await.unwrap();
        assert_eq!(a.tensors[0].name, b.tensors[0].name);
        assert_eq!(a.tensors[0].dims, b.tensors[0].dims);
        assert_eq!(a.parameter_count(), b.parameter_count());
    }

    #[tokio::test]
    async fn test_alignment_override() {
        let mut src = MemSource::new(minimal_file(3, Some(64)));
        let file = GgufFile::parse(&mut src).await.unwrap();
        assert_eq!(file.alignment, 64);
        assert_eq!(file.tensor_data_offset % 64, 0);
    }

    #[tokio::test]
    async fn test_bad_magic() {
        let mut data = minimal_file(3, None);
        data[0] = b'X';
        let mut src = MemSource::new(data);
        assert!(matches!(
            GgufFile::parse(&mut src).await,
            Err(ParseError::InvalidMagic)
        ));
    }

    #[tokio::test]
    async fn test_unsupported_version() {
        let mut data = minimal_file(3, None);
        data[4..8].copy_from_slice(&9u32.to_le_bytes());
        let mut src = MemSource::new(data);
        assert!(matches!(
            GgufFile::parse(&mut src).await,
            Err(ParseError::UnsupportedVersion(9))
        ));
    }

    #[tokio::test]
    async fn test_truncated_tensor_segment() {
        let mut data = minimal_file(3, None);
        data.truncate(data.len() - 16);
        let mut src = MemSource::new(data);
        assert!(matches!(
            GgufFile::parse(&mut src).await,
            Err(ParseError::TensorOutOfFile { index: 0 })
        ));
    }
}
