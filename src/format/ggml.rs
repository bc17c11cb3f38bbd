//! ggml tensor types and their block geometry.
//!
//! Every quantization scheme stores elements in fixed-size blocks; the
//! (elements-per-block, bytes-per-block) pair fully determines the byte
//! cost of a tensor. The table below is part of the on-disk contract and
//! must not drift from the ggml reference values.

use serde::Serialize;

use super::ParseError;

/// Per-tensor storage scheme, identified by the u32 in the descriptor.
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum GgmlType {
    F32,
    F16,
    Q4_0,
    Q4_1,
    Q5_0,
    Q5_1,
    Q8_0,
    Q8_1,
    Q2_K,
    Q3_K,
    Q4_K,
    Q5_K,
    Q6_K,
    Q8_K,
    IQ2_XXS,
    IQ2_XS,
    IQ3_XXS,
    IQ1_S,
    IQ4_NL,
    IQ3_S,
    IQ2_S,
    IQ4_XS,
    I8,
    I16,
    I32,
    I64,
    F64,
    IQ1_M,
    BF16,
    TQ1_0,
    TQ2_0,
}

/// Block geometry: elements per block, bytes per block, and whether the
/// scheme is a quantization (vs. a plain numeric type).
#[derive(Debug, Clone, Copy)]
pub struct BlockInfo {
    pub block_elems: u64,
    pub block_bytes: u64,
    pub quantized: bool,
}

impl GgmlType {
    pub fn from_u32(id: u32) -> Result<Self, ParseError> {
        Ok(match id {
            0 => GgmlType::F32,
            1 => GgmlType::F16,
            2 => GgmlType::Q4_0,
            3 => GgmlType::Q4_1,
            // 4 and 5 (Q4_2 / Q4_3) were removed from ggml.
            6 => GgmlType::Q5_0,
            7 => GgmlType::Q5_1,
            8 => GgmlType::Q8_0,
            9 => GgmlType::Q8_1,
            10 => GgmlType::Q2_K,
            11 => GgmlType::Q3_K,
            12 => GgmlType::Q4_K,
            13 => GgmlType::Q5_K,
            14 => GgmlType::Q6_K,
            15 => GgmlType::Q8_K,
            16 => GgmlType::IQ2_XXS,
            17 => GgmlType::IQ2_XS,
            18 => GgmlType::IQ3_XXS,
            19 => GgmlType::IQ1_S,
            20 => GgmlType::IQ4_NL,
            21 => GgmlType::IQ3_S,
            22 => GgmlType::IQ2_S,
            23 => GgmlType::IQ4_XS,
            24 => GgmlType::I8,
            25 => GgmlType::I16,
            26 => GgmlType::I32,
            27 => GgmlType::I64,
            28 => GgmlType::F64,
            29 => GgmlType::IQ1_M,
            30 => GgmlType::BF16,
            34 => GgmlType::TQ1_0,
            35 => GgmlType::TQ2_0,
            other => return Err(ParseError::UnknownGgmlType(other)),
        })
    }

    /// The on-disk u32 for this type; inverse of [`GgmlType::from_u32`].
    pub fn code(&self) -> u32 {
        match self {
            GgmlType::F32 => 0,
            GgmlType::F16 => 1,
            GgmlType::Q4_0 => 2,
            GgmlType::Q4_1 => 3,
            GgmlType::Q5_0 => 6,
            GgmlType::Q5_1 => 7,
            GgmlType::Q8_0 => 8,
            GgmlType::Q8_1 => 9,
            GgmlType::Q2_K => 10,
            GgmlType::Q3_K => 11,
            GgmlType::Q4_K => 12,
            GgmlType::Q5_K => 13,
            GgmlType::Q6_K => 14,
            GgmlType::Q8_K => 15,
            GgmlType::IQ2_XXS => 16,
            GgmlType::IQ2_XS => 17,
            GgmlType::IQ3_XXS => 18,
            GgmlType::IQ1_S => 19,
            GgmlType::IQ4_NL => 20,
            GgmlType::IQ3_S => 21,
            GgmlType::IQ2_S => 22,
            GgmlType::IQ4_XS => 23,
            GgmlType::I8 => 24,
            GgmlType::I16 => 25,
            GgmlType::I32 => 26,
            GgmlType::I64 => 27,
            GgmlType::F64 => 28,
            GgmlType::IQ1_M => 29,
            GgmlType::BF16 => 30,
            GgmlType::TQ1_0 => 34,
            GgmlType::TQ2_0 => 35,
        }
    }

    pub fn block_info(&self) -> BlockInfo {
        let (block_elems, block_bytes, quantized) = match self {
            GgmlType::F32 => (1, 4, false),
            GgmlType::F16 => (1, 2, false),
            GgmlType::BF16 => (1, 2, false),
            GgmlType::F64 => (1, 8, false),
            GgmlType::I8 => (1, 1, false),
            GgmlType::I16 => (1, 2, false),
            GgmlType::I32 => (1, 4, false),
            GgmlType::I64 => (1, 8, false),
            GgmlType::Q4_0 => (32, 18, true),
            GgmlType::Q4_1 => (32, 20, true),
            GgmlType::Q5_0 => (32, 22, true),
            GgmlType::Q5_1 => (32, 24, true),
            GgmlType::Q8_0 => (32, 34, true),
            GgmlType::Q8_1 => (32, 36, true),
            GgmlType::IQ4_NL => (32, 18, true),
            GgmlType::Q2_K => (256, 82, true),
            GgmlType::Q3_K => (256, 110, true),
            GgmlType::Q4_K => (256, 144, true),
            GgmlType::Q5_K => (256, 176, true),
            GgmlType::Q6_K => (256, 210, true),
            GgmlType::Q8_K => (256, 292, true),
            GgmlType::IQ2_XXS => (256, 66, true),
            GgmlType::IQ2_XS => (256, 74, true),
            GgmlType::IQ3_XXS => (256, 98, true),
            GgmlType::IQ1_S => (256, 50, true),
            GgmlType::IQ1_M => (256, 56, true),
            GgmlType::IQ3_S => (256, 110, true),
            GgmlType::IQ2_S => (256, 82, true),
            GgmlType::IQ4_XS => (256, 136, true),
            GgmlType::TQ1_0 => (256, 54, true),
            GgmlType::TQ2_0 => (256, 66, true),
        };
        BlockInfo {
            block_elems,
            block_bytes,
            quantized,
        }
    }

    pub fn is_quantized(&self) -> bool {
        self.block_info().quantized
    }

    /// Exact byte cost of `n_elems` elements, or None when the count is
    /// not a whole number of blocks.
    pub fn bytes_for(&self, n_elems: u64) -> Option<u64> {
        let info = self.block_info();
        if n_elems % info.block_elems != 0 {
            return None;
        }
        Some(n_elems / info.block_elems * info.block_bytes)
    }

    /// Average storage cost per element; fractional for quantized types.
    pub fn bytes_per_element(&self) -> f64 {
        let info = self.block_info();
        info.block_bytes as f64 / info.block_elems as f64
    }

    /// Bits of storage per weight.
    pub fn bits_per_weight(&self) -> f64 {
        self.bytes_per_element() * 8.0
    }
}

impl std::fmt::Display for GgmlType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}
