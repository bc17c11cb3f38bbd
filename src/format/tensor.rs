//! Tensor descriptors from the GGUF directory.

use serde::Serialize;

use super::ggml::GgmlType;

/// One entry of the tensor directory. Offsets are relative to the start
/// of the aligned tensor-data segment.
#[derive(Debug, Clone, Serialize)]
pub struct TensorDescriptor {
    pub name: String,
    pub dims: Vec<u64>,
    #[serde(rename = "type")]
    pub ggml_type: GgmlType,
    pub relative_offset: u64,
    pub size_bytes: u64,
}

impl TensorDescriptor {
    /// Element count: the product of all dimensions.
    pub fn elements(&self) -> u64 {
        self.dims.iter().product()
    }

    /// End of this tensor's data, relative to the tensor segment.
    pub fn relative_end(&self) -> u64 {
        self.relative_offset + self.size_bytes
    }
}
