//! BlockCodec — compress/decompress one block.
//!
//! Three compressors Qeltrix's metadata `compression` field permits:
//! `lz4`, `zstd`, `none`. A codec is selected once per container (the
//! `compression` metadata field), not per block — there is no per-block
//! codec tag to carry.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("compression error: {0}")]
    Compression(String),
    #[error("decompression error: {0}")]
    Decompression(String),
    #[error("decompressed output exceeds block_size ({actual} > {max})")]
    OversizedOutput { actual: usize, max: usize },
}

/// Selects which codec a container uses. Mirrors `metadata.compression`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Lz4,
    Zstd,
    None,
}

impl Compression {
    pub fn name(self) -> &'static str {
        match self {
            Compression::Lz4 => "lz4",
            Compression::Zstd => "zstd",
            Compression::None => "none",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "lz4" => Some(Compression::Lz4),
            "zstd" => Some(Compression::Zstd),
            "none" => Some(Compression::None),
            _ => None,
        }
    }
}

pub trait BlockCodec: Send + Sync {
    fn compress(&self, raw: &[u8]) -> Result<Vec<u8>, CodecError>;
    /// `max_raw_len` is `block_size`; decompression output longer than this
    /// is malformed data, not a valid block.
    fn decompress(&self, compressed: &[u8], max_raw_len: usize) -> Result<Vec<u8>, CodecError>;
}

pub struct NoneCodec;
impl BlockCodec for NoneCodec {
    fn compress(&self, raw: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(raw.to_vec())
    }
    fn decompress(&self, compressed: &[u8], max_raw_len: usize) -> Result<Vec<u8>, CodecError> {
        if compressed.len() > max_raw_len {
            return Err(CodecError::OversizedOutput {
                actual: compressed.len(),
                max: max_raw_len,
            });
        }
        Ok(compressed.to_vec())
    }
}

pub struct Lz4BlockCodec;
impl BlockCodec for Lz4BlockCodec {
    fn compress(&self, raw: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(lz4_flex::compress_prepend_size(raw))
    }
    fn decompress(&self, compressed: &[u8], max_raw_len: usize) -> Result<Vec<u8>, CodecError> {
        let out = lz4_flex::decompress_size_prepended(compressed)
            .map_err(|e| CodecError::Decompression(e.to_string()))?;
        if out.len() > max_raw_len {
            return Err(CodecError::OversizedOutput {
                actual: out.len(),
                max: max_raw_len,
            });
        }
        Ok(out)
    }
}

pub struct ZstdBlockCodec;
impl BlockCodec for ZstdBlockCodec {
    fn compress(&self, raw: &[u8]) -> Result<Vec<u8>, CodecError> {
        zstd::encode_all(raw, 0).map_err(|e| CodecError::Compression(e.to_string()))
    }
    fn decompress(&self, compressed: &[u8], max_raw_len: usize) -> Result<Vec<u8>, CodecError> {
        let out =
            zstd::decode_all(compressed).map_err(|e| CodecError::Decompression(e.to_string()))?;
        if out.len() > max_raw_len {
            return Err(CodecError::OversizedOutput {
                actual: out.len(),
                max: max_raw_len,
            });
        }
        Ok(out)
    }
}

pub fn get_codec(c: Compression) -> Box<dyn BlockCodec> {
    match c {
        Compression::Lz4 => Box::new(Lz4BlockCodec),
        Compression::Zstd => Box::new(ZstdBlockCodec),
        Compression::None => Box::new(NoneCodec),
    }
}
