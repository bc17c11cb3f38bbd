//! The GGUF container format.
//!
//! - [`decode`]: little-endian primitive cursor over a byte source
//! - [`metadata`]: typed metadata values and the ordered dictionary
//! - [`ggml`]: quantization schemes and their block geometry
//! - [`tensor`]: tensor descriptors
//! - [`file`]: the parsed file: header, metadata, tensor directory

pub mod decode;
pub mod file;
pub mod ggml;
pub mod metadata;
pub mod tensor;

use thiserror::Error;

use crate::reader::ReaderError;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error(transparent)]
    Io(#[from] ReaderError),

    #[error("not a GGUF file (bad magic)")]
    InvalidMagic,

    #[error("unsupported GGUF version {0}")]
    UnsupportedVersion(u32),

    #[error("unexpected end of file at offset {0}")]
    UnexpectedEof(u64),

    #[error("length field overflows at offset {0}")]
    LengthOverflow(u64),

    #[error("string of {len} bytes at offset {offset} exceeds the {limit}-byte guard")]
    OversizedString { offset: u64, len: u64, limit: u64 },

    #[error("unknown metadata value type {0}")]
    UnknownMetadataType(u32),

    #[error("unknown ggml tensor type {0}")]
    UnknownGgmlType(u32),

    #[error("tensor {index} has invalid shape")]
    InvalidTensorShape { index: usize },

    #[error("tensor {index} offset violates alignment")]
    AlignmentViolation { index: usize },

    #[error("tensor {index} descriptors are not ordered by offset")]
    DescriptorOrder { index: usize },

    #[error("tensor {index} data runs past the end of the file")]
    TensorOutOfFile { index: usize },
}
