//! Framer — on-disk layout, metadata/footer (de)serialization, footer search.
//!
//! Variable-length header+metadata+delimiter+footer layout. There is no
//! per-block header — block framing lives entirely in the
//! footer's block index, since every `SealedBlock` is bound to the
//! container by the AEAD's associated data rather than by a
//! self-describing on-disk record.

use std::io::{Read, Seek, SeekFrom, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MAGIC: &[u8; 4] = b"QLTX";

/// The written literal `QDELIMITERQ` is authoritative here, and it is
/// **11 bytes**, not 9.
pub const DELIMITER: &[u8] = b"QDELIMITERQ";
pub const DELIMITER_LEN: usize = 11;

pub const HEADER_PREFIX_LEN: usize = 4 + 1 + 3 + 4; // magic + version + reserved + meta_len

#[derive(Error, Debug)]
pub enum FormatError {
    #[error("invalid magic — not a .qltx container")]
    InvalidMagic,
    #[error("unsupported format version {0}")]
    UnsupportedVersion(u8),
    #[error("delimiter not found at expected footer offset")]
    MissingDelimiter,
    #[error("footer/metadata length mismatch: {0}")]
    LengthMismatch(String),
    #[error("metadata JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ── Metadata ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ModeTag {
    #[serde(rename = "two_pass")]
    TwoPass,
    #[serde(rename = "single_pass_firstN")]
    SinglePassFirstN,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    pub version: u8,
    /// base64 of 16 random bytes.
    pub salt: String,
    pub block_size: u32,
    pub mode: ModeTag,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head_bytes: Option<u64>,
    pub compression: String,
    pub algo: String,
    pub permute: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wrapped_dek: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata_signature: Option<String>,
}

impl Metadata {
    pub fn salt_bytes(&self) -> Result<[u8; 16], FormatError> {
        let raw = base64_decode(&self.salt)?;
        raw.try_into().map_err(|_| FormatError::LengthMismatch("salt must be 16 bytes".into()))
    }

    /// Canonical on-disk bytes — used verbatim as the AEAD associated data
    /// for every block (invariant (d)).
    pub fn to_canonical_bytes(&self) -> Result<Vec<u8>, FormatError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Same struct with `metadata_signature` cleared, for the bytes that
    /// were actually signed: RSA-PSS over the metadata sans signature field.
    pub fn signing_bytes(&self) -> Result<Vec<u8>, FormatError> {
        let mut unsigned = self.clone();
        unsigned.metadata_signature = None;
        Ok(serde_json::to_vec(&unsigned)?)
    }
}

fn base64_decode(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.decode(s)
}

pub fn base64_encode(bytes: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

// ── Footer ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FooterBlockEntry {
    pub offset: u64,
    /// base64 of 12 bytes.
    pub nonce: String,
    pub length: u64,
}

impl FooterBlockEntry {
    pub fn nonce_bytes(&self) -> Result<[u8; 12], FormatError> {
        let raw = base64_decode(&self.nonce)?;
        raw.try_into().map_err(|_| FormatError::LengthMismatch("nonce must be 12 bytes".into()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Footer {
    pub blocks: Vec<FooterBlockEntry>,
    /// Hex-encoded, 64 characters.
    pub global_ciphertext_sha256: String,
}

impl Footer {
    pub fn to_bytes(&self) -> Result<Vec<u8>, FormatError> {
        Ok(serde_json::to_vec(self)?)
    }
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FormatError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

// ── Header write/read ────────────────────────────────────────────────────────

/// Writes `magic | version | reserved(3) | meta_len(BE u32) | metadata`.
pub fn write_header<W: Write>(mut w: W, version: u8, metadata_bytes: &[u8]) -> Result<(), FormatError> {
    w.write_all(MAGIC)?;
    w.write_u8(version)?;
    w.write_all(&[0u8; 3])?;
    w.write_u32::<BigEndian>(metadata_bytes.len() as u32)?;
    w.write_all(metadata_bytes)?;
    Ok(())
}

/// Reads and validates the header, returning `(version, metadata_bytes)`.
pub fn read_header<R: Read>(mut r: R) -> Result<(u8, Vec<u8>), FormatError> {
    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(FormatError::InvalidMagic);
    }
    let version = r.read_u8()?;
    if !(1..=4).contains(&version) {
        return Err(FormatError::UnsupportedVersion(version));
    }
    let mut reserved = [0u8; 3];
    r.read_exact(&mut reserved)?;
    let meta_len = r.read_u32::<BigEndian>()? as usize;
    let mut metadata_bytes = vec![0u8; meta_len];
    r.read_exact(&mut metadata_bytes)?;
    Ok((version, metadata_bytes))
}

/// Writes `delimiter | footer_json | footer_len(BE u32)` at the current
/// stream position (immediately after the last sealed block).
pub fn write_footer<W: Write>(mut w: W, footer: &Footer) -> Result<(), FormatError> {
    let footer_bytes = footer.to_bytes()?;
    w.write_all(DELIMITER)?;
    w.write_all(&footer_bytes)?;
    w.write_u32::<BigEndian>(footer_bytes.len() as u32)?;
    Ok(())
}

/// Locates and parses the footer by reading the trailing length, backing up
/// `footer_len + DELIMITER_LEN` bytes, and validating the delimiter.
///
/// Returns `(footer, sealed_blocks_end_offset)` — the byte offset one past
/// the last sealed block, i.e. where the delimiter begins.
pub fn locate_footer<R: Read + Seek>(mut r: R) -> Result<(Footer, u64), FormatError> {
    let file_len = r.seek(SeekFrom::End(0))?;
    if file_len < 4 {
        return Err(FormatError::LengthMismatch("file too short for a footer length".into()));
    }
    r.seek(SeekFrom::End(-4))?;
    let footer_len = r.read_u32::<BigEndian>()? as u64;

    let back = footer_len
        .checked_add(DELIMITER_LEN as u64)
        .and_then(|v| v.checked_add(4))
        .ok_or_else(|| FormatError::LengthMismatch("footer length overflow".into()))?;
    if back > file_len {
        return Err(FormatError::LengthMismatch("declared footer length exceeds file size".into()));
    }
    let delimiter_start = file_len - back;
    r.seek(SeekFrom::Start(delimiter_start))?;

    let mut delimiter = [0u8; DELIMITER_LEN];
    r.read_exact(&mut delimiter)?;
    if delimiter != *DELIMITER {
        return Err(FormatError::MissingDelimiter);
    }

    let mut footer_bytes = vec![0u8; footer_len as usize];
    r.read_exact(&mut footer_bytes)?;
    let footer = Footer::from_bytes(&footer_bytes)?;

    Ok((footer, delimiter_start))
}
