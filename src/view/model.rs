//! The model card: identity, quantization label, size, parameter count.

use serde::Serialize;

use super::ViewError;
use crate::format::file::GgufFile;

#[derive(Debug, Clone, Serialize)]
pub struct ModelView {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub architecture: String,
    pub quantization: String,
    pub little_endian: bool,
    pub size_bytes: u64,
    pub parameters: u64,
    /// `8 * size_bytes / parameters`, rounded to two decimals.
    pub bits_per_weight: f64,
}

pub fn project(file: &GgufFile) -> Result<ModelView, ViewError> {
    let architecture = file
        .architecture()
        .ok_or_else(|| ViewError::MissingMetadata {
            arch: "general".into(),
            key: "general.architecture".into(),
        })?
        .into_owned();

    let quantization = match file.metadata.get_u64("general.file_type") {
        Some(ft) => file_type_label(ft).to_string(),
        None => dominant_tensor_type(file),
    };

    let size_bytes = file.total_tensor_bytes();
    let parameters = file.parameter_count();
    let bits_per_weight = if parameters > 0 {
        (8.0 * size_bytes as f64 / parameters as f64 * 100.0).round() / 100.0
    } else {
        0.0
    };

    Ok(ModelView {
        name: file.metadata.get_str("general.name").map(|s| s.into_owned()),
        architecture,
        quantization,
        little_endian: true,
        size_bytes,
        parameters,
        bits_per_weight,
    })
}

/// `general.file_type` codes, following the llama.cpp ftype table.
fn file_type_label(code: u64) -> &'static str {
    match code {
        0 => "F32",
        1 => "F16",
        2 => "Q4_0",
        3 => "Q4_1",
        7 => "Q8_0",
        8 => "Q5_0",
        9 => "Q5_1",
        10 => "Q2_K",
        11 => "Q3_K_S",
        12 => "Q3_K_M",
        13 => "Q3_K_L",
        14 => "Q4_K_S",
        15 => "Q4_K_M",
        16 => "Q5_K_S",
        17 => "Q5_K_M",
        18 => "Q6_K",
        19 => "IQ2_XXS",
        20 => "IQ2_XS",
        21 => "Q2_K_S",
        22 => "IQ3_XS",
        23 => "IQ3_XXS",
        24 => "IQ1_S",
        25 => "IQ4_NL",
        26 => "IQ3_S",
        27 => "IQ3_M",
        28 => "IQ2_S",
        29 => "IQ2_M",
        30 => "IQ4_XS",
        31 => "IQ1_M",
        32 => "BF16",
        36 => "TQ1_0",
        37 => "TQ2_0",
        _ => "Unknown",
    }
}

/// Fallback when `general.file_type` is absent: the quantized type that
/// covers the most bytes, or the most common plain type.
fn dominant_tensor_type(file: &GgufFile) -> String {
    let mut by_type: std::collections::HashMap<String, u64> = std::collections::HashMap::new();
    for t in &file.tensors {
        *by_type.entry(t.ggml_type.to_string()).or_default() += t.size_bytes;
    }
    by_type
        .into_iter()
        .max_by_key(|(_, bytes)| *bytes)
        .map(|(name, _)| name)
        .unwrap_or_else(|| "Unknown".into())
}
