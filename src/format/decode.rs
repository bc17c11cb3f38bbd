//! Little-endian primitive decoding over a byte source.
//!
//! A `Decoder` is a cursor: every read advances `pos`. Length fields are
//! 64-bit except in GGUF v1, which used 32-bit lengths everywhere; the
//! cursor carries that mode so string and array reads pick the right
//! width. Length guards run before any allocation.

use super::metadata::{GgufString, Metadata, MetadataArray, MetadataValue, ValueType};
use super::ParseError;
use crate::reader::{ByteSource, ByteSourceExt, ReaderError};

/// Upper bound on a single string, guarding runaway length fields.
pub const DEFAULT_STRING_GUARD: u64 = 64 * 1024 * 1024;

pub struct Decoder<'a, S: ByteSource> {
    source: &'a mut S,
    pos: u64,
    v1: bool,
    string_guard: u64,
}

impl<'a, S: ByteSource> Decoder<'a, S> {
    pub fn new(source: &'a mut S) -> Self {
        Self {
            source,
            pos: 0,
            v1: false,
            string_guard: DEFAULT_STRING_GUARD,
        }
    }

    /// Switch to 32-bit length fields (GGUF v1).
    pub fn set_v1(&mut self, v1: bool) {
        self.v1 = v1;
    }

    /// Override the per-string size guard (default 64 MiB).
    pub fn set_string_guard(&mut self, limit: u64) {
        self.string_guard = limit;
    }

    pub fn pos(&self) -> u64 {
        self.pos
    }

    pub fn source_len(&self) -> u64 {
        self.source.len()
    }

    fn remaining(&self) -> u64 {
        self.source.len().saturating_sub(self.pos)
    }

    /// Advance to the next multiple of `alignment`.
    pub fn align_to(&mut self, alignment: u64) {
        if alignment > 1 {
            let rem = self.pos % alignment;
            if rem != 0 {
                self.pos += alignment - rem;
            }
        }
    }

    pub async fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>, ParseError> {
        let mut buf = vec![0u8; n];
        self.source
            .read_exact_at(self.pos, &mut buf)
            .await
            .map_err(eof_to_parse)?;
        self.pos += n as u64;
        Ok(buf)
    }

    async fn read_array_buf<const N: usize>(&mut self) -> Result<[u8; N], ParseError> {
        let mut buf = [0u8; N];
        self.source
            .read_exact_at(self.pos, &mut buf)
            .await
            .map_err(eof_to_parse)?;
        self.pos += N as u64;
        Ok(buf)
    }

    pub async fn read_u8(&mut self) -> Result<u8, ParseError> {
        Ok(self.read_array_buf::<1>().await?[0])
    }

    pub async fn read_i8(&mut self) -> Result<i8, ParseError> {
        Ok(self.read_u8().await? as i8)
    }

    pub async fn read_u16(&mut self) -> Result<u16, ParseError> {
        Ok(u16::from_le_bytes(self.read_array_buf().await?))
    }

    pub async fn read_i16(&mut self) -> Result<i16, ParseError> {
        Ok(i16::from_le_bytes(self.read_array_buf().await?))
    }

    pub async fn read_u32(&mut self) -> Result<u32, ParseError> {
        Ok(u32::from_le_bytes(self.read_array_buf().await?))
    }

    pub async fn read_i32(&mut self) -> Result<i32, ParseError> {
        Ok(i32::from_le_bytes(self.read_array_buf().await?))
    }

    pub async fn read_u64(&mut self) -> Result<u64, ParseError> {
        Ok(u64::from_le_bytes(self.read_array_buf().await?))
    }

    pub async fn read_i64(&mut self) -> Result<i64, ParseError> {
        Ok(i64::from_le_bytes(self.read_array_buf().await?))
    }

    pub async fn read_f32(&mut self) -> Result<f32, ParseError> {
        Ok(f32::from_le_bytes(self.read_array_buf().await?))
    }

    pub async fn read_f64(&mut self) -> Result<f64, ParseError> {
        Ok(f64::from_le_bytes(self.read_array_buf().await?))
    }

    pub async fn read_bool(&mut self) -> Result<bool, ParseError> {
        Ok(self.read_u8().await? != 0)
    }

    /// A length/count field: u64, or u32 in v1 mode.
    pub async fn read_len(&mut self) -> Result<u64, ParseError> {
        if self.v1 {
            Ok(self.read_u32().await? as u64)
        } else {
            self.read_u64().await
        }
    }

    pub async fn read_string(&mut self) -> Result<GgufString, ParseError> {
        let at = self.pos;
        let len = self.read_len().await?;
        if len > self.string_guard {
            return Err(ParseError::OversizedString {
                offset: at,
                len,
                limit: self.string_guard,
            });
        }
        if len > self.remaining() {
            return Err(ParseError::LengthOverflow(at));
        }
        Ok(GgufString::new(self.read_bytes(len as usize).await?))
    }

    /// One metadata value of the given type. Arrays recurse.
    pub async fn read_value(&mut self, vt: ValueType) -> Result<MetadataValue, ParseError> {
        Ok(match vt {
            ValueType::U8 => MetadataValue::U8(self.read_u8().await?),
            ValueType::I8 => MetadataValue::I8(self.read_i8().await?),
            ValueType::U16 => MetadataValue::U16(self.read_u16().await?),
            ValueType::I16 => MetadataValue::I16(self.read_i16().await?),
            ValueType::U32 => MetadataValue::U32(self.read_u32().await?),
            ValueType::I32 => MetadataValue::I32(self.read_i32().await?),
            ValueType::F32 => MetadataValue::F32(self.read_f32().await?),
            ValueType::Bool => MetadataValue::Bool(self.read_bool().await?),
            ValueType::U64 => MetadataValue::U64(self.read_u64().await?),
            ValueType::I64 => MetadataValue::I64(self.read_i64().await?),
            ValueType::F64 => MetadataValue::F64(self.read_f64().await?),
            ValueType::String => MetadataValue::String(self.read_string().await?),
            ValueType::Array => MetadataValue::Array(self.read_array().await?),
        })
    }

    async fn read_array(&mut self) -> Result<MetadataArray, ParseError> {
        let at = self.pos;
        let elem_type = ValueType::from_u32(self.read_u32().await?)?;
        let count = self.read_len().await?;

        // A count that cannot possibly fit the remaining bytes is a
        // corrupt length field; fail before allocating.
        let floor = min_encoded_size(elem_type, self.v1);
        match count.checked_mul(floor) {
            Some(need) if need <= self.remaining() => {}
            _ => return Err(ParseError::LengthOverflow(at)),
        }

        let mut values = Vec::with_capacity(count.min(1 << 16) as usize);
        for _ in 0..count {
            // Recursion depth is bounded: arrays of arrays do not occur
            // in practice and each level consumes at least one byte.
            values.push(Box::pin(self.read_value(elem_type)).await?);
        }
        Ok(MetadataArray { elem_type, values })
    }

    /// One `{key, type, value}` metadata entry.
    pub async fn read_kv(&mut self) -> Result<(String, MetadataValue), ParseError> {
        let key = self.read_string().await?.text().into_owned();
        let vt = ValueType::from_u32(self.read_u32().await?)?;
        let value = self.read_value(vt).await?;
        Ok((key, value))
    }

    /// Read `count` metadata entries into an ordered dictionary.
    pub async fn read_metadata(&mut self, count: u64) -> Result<Metadata, ParseError> {
        let mut md = Metadata::default();
        for _ in 0..count {
            let (key, value) = self.read_kv().await?;
            md.push(key, value);
        }
        Ok(md)
    }
}

/// A short fill mid-field is a malformed file, not a transport failure;
/// report it as the parse-level EOF with the offset it happened at.
fn eof_to_parse(err: ReaderError) -> ParseError {
    match err {
        ReaderError::UnexpectedEof(at) => ParseError::UnexpectedEof(at),
        other => ParseError::Io(other),
    }
}

/// Smallest possible encoding of one value of `vt`, used to reject
/// impossible array counts up front.
fn min_encoded_size(vt: ValueType, v1: bool) -> u64 {
    let len_width = if v1 { 4 } else { 8 };
    match vt {
        ValueType::U8 | ValueType::I8 | ValueType::Bool => 1,
        ValueType::U16 | ValueType::I16 => 2,
        ValueType::U32 | ValueType::I32 | ValueType::F32 => 4,
        ValueType::U64 | ValueType::I64 | ValueType::F64 => 8,
        ValueType::String => len_width,
        ValueType::Array => 4 + len_width,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::metadata::encode_kv;
    use crate::reader::MemSource;

    #[tokio::test]
    async fn test_primitives_little_endian() {
        let mut data = Vec::new();
        data.extend_from_slice(&0x01020304u32.to_le_bytes());
        data.extend_from_slice(&(-5i64).to_le_bytes());
        data.extend_from_slice(&1.25f32.to_le_bytes());
        let mut src = MemSource::new(data);
        let mut dec = Decoder::new(&mut src);
        assert_eq!(dec.read_u32().await.unwrap(), 0x01020304);
        assert_eq!(dec.read_i64().await.unwrap(), -5);
        assert_eq!(dec.read_f32().await.unwrap(), 1.25);
        assert_eq!(dec.pos(), 16);
    }

    #[tokio::test]
    async fn test_kv_round_trip() {
        let value = MetadataValue::Array(MetadataArray {
            elem_type: ValueType::String,
            values: vec![
                MetadataValue::String("hello".into()),
                MetadataValue::String("world".into()),
            ],
        });
        let mut encoded = Vec::new();
        encode_kv("general.tags", &value, false, &mut encoded);

        let mut src = MemSource::new(encoded.clone());
        let mut dec = Decoder::new(&mut src);
        let (key, parsed) = dec.read_kv().await.unwrap();
        assert_eq!(key, "general.tags");
        assert_eq!(parsed, value);

        // And back out byte-identically.
        let mut out = Vec::new();
        encode_kv(&key, &parsed, false, &mut out);
        assert_eq!(out, encoded);
    }

    #[tokio::test]
    async fn test_absurd_array_count_rejected() {
        let mut data = Vec::new();
        data.extend_from_slice(&4u32.to_le_bytes()); // elem type: U32
        data.extend_from_slice(&u64::MAX.to_le_bytes()); // count
        let mut src = MemSource::new(data);
        let mut dec = Decoder::new(&mut src);
        let err = dec.read_value(ValueType::Array).await.unwrap_err();
        assert!(matches!(err, ParseError::LengthOverflow(_)));
    }

    #[tokio::test]
    async fn test_string_guard() {
        let mut data = Vec::new();
        data.extend_from_slice(&(DEFAULT_STRING_GUARD + 1).to_le_bytes());
        data.resize(64, 0);
        let mut src = MemSource::new(data);
        let mut dec = Decoder::new(&mut src);
        let err = dec.read_string().await.unwrap_err();
        assert!(matches!(err, ParseError::OversizedString { .. }));
    }

    #[tokio::test]
    async fn test_short_read_is_parse_level_eof() {
        let mut src = MemSource::new(vec![1, 2]);
        let mut dec = Decoder::new(&mut src);
        let err = dec.read_u32().await.unwrap_err();
        assert!(matches!(err, ParseError::UnexpectedEof(2)));
    }

    #[tokio::test]
    async fn test_v1_lengths() {
        let mut data = Vec::new();
        data.extend_from_slice(&3u32.to_le_bytes());
        data.extend_from_slice(b"abc");
        let mut src = MemSource::new(data);
        let mut dec = Decoder::new(&mut src);
        dec.set_v1(true);
        assert_eq!(dec.read_string().await.unwrap().text(), "abc");
    }
}
