//! Seeker — random-access reads into a `.qltx` container without decrypting
//! the whole thing.
//!
//! `first = offset / block_size`, `last = (offset + length - 1) / block_size`.
//! Only that block range is decrypted, unpermuted, and
//! decompressed; the result is concatenated and sliced to the caller's
//! exact `[offset, offset+length)` window. A wholly out-of-range request
//! (`first >= footer.blocks.len()`) is a [`EngineError::Range`]; a request
//! that overruns the end of the last block is satisfied up to EOF, same as
//! a short read.

use std::io::{Read, Seek, SeekFrom};

use crate::aead::{get_sealer, AeadAlgo};
use crate::codec::{get_codec, Compression};
use crate::error::EngineError;
use crate::format::{self, Metadata};
use crate::permute::unpermute;
use crate::transport::{Dek, KeyTransport};
use crate::unpack::SourceHint;
use crate::version::descriptor_for;

pub struct Seeker<'a> {
    pub transport: &'a dyn KeyTransport,
}

impl<'a> Seeker<'a> {
    pub fn new(transport: &'a dyn KeyTransport) -> Self {
        Self { transport }
    }

    pub fn read_range<R: Read + Seek>(
        &self,
        reader: &mut R,
        offset: u64,
        length: u64,
        source: SourceHint,
    ) -> Result<Vec<u8>, EngineError> {
        let (version, metadata_bytes) = format::read_header(&mut *reader)?;
        let metadata: Metadata = serde_json::from_slice(&metadata_bytes)?;
        let descriptor = descriptor_for(version)
            .ok_or_else(|| EngineError::Format(format!("unsupported version {version}")))?;
        let (footer, _sealed_end) = format::locate_footer(&mut *reader)?;

        let block_size = metadata.block_size as u64;

        // A zero-length read is vacuously satisfied regardless of offset —
        // including exactly at end-of-stream, which would otherwise land on
        // a block index one past the last valid one.
        if length == 0 {
            return Ok(Vec::new());
        }

        if footer.blocks.is_empty() {
            return Err(EngineError::Range("container has no blocks".into()));
        }

        let first = offset / block_size;
        if first >= footer.blocks.len() as u64 {
            return Err(EngineError::Range(format!(
                "offset {offset} is beyond the container's {} blocks",
                footer.blocks.len()
            )));
        }
        let last_wanted = (offset + length - 1) / block_size;
        let last = last_wanted.min(footer.blocks.len() as u64 - 1);

        let algo = AeadAlgo::from_name(&metadata.algo)
            .ok_or_else(|| EngineError::Format(format!("unknown algo {}", metadata.algo)))?;
        let compression = Compression::from_name(&metadata.compression)
            .ok_or_else(|| EngineError::Format(format!("unknown compression {}", metadata.compression)))?;
        let sealer = get_sealer(algo);
        let codec = get_codec(compression);

        let dek: Dek = if let Some(wrapped_b64) = &metadata.wrapped_dek {
            let wrapped = base64_decode(wrapped_b64)?;
            zeroize::Zeroizing::new(self.transport.unwrap(&wrapped)?)
        } else {
            let salt = metadata.salt_bytes()?;
            let ikm = crate::unpack::recover_ikm(&metadata, &source, codec.as_ref())?;
            let data_key = crate::kdf::derive_key(&salt, &ikm, descriptor.info_label)
                .map_err(|e| EngineError::Crypto(e.to_string()))?;
            zeroize::Zeroizing::new(data_key)
        };

        let mut plaintext_window = Vec::new();
        for index in first..=last {
            let entry = &footer.blocks[index as usize];
            reader.seek(SeekFrom::Start(entry.offset))?;
            let mut ciphertext = vec![0u8; entry.length as usize];
            reader.read_exact(&mut ciphertext)?;

            let opened = sealer
                .open(&dek, &entry.nonce_bytes()?, &ciphertext, &metadata_bytes)
                .map_err(|_| EngineError::Auth("block authentication failed".into()))?;
            let depermuted = if metadata.permute {
                unpermute(&opened, &dek, index)
            } else {
                opened
            };
            let raw = codec.decompress(&depermuted, metadata.block_size as usize)?;
            plaintext_window.extend_from_slice(&raw);
        }

        let window_start_offset = first * block_size;
        let slice_start = (offset - window_start_offset) as usize;
        let slice_start = slice_start.min(plaintext_window.len());
        let slice_end = (slice_start + length as usize).min(plaintext_window.len());
        Ok(plaintext_window[slice_start..slice_end].to_vec())
    }
}

fn base64_decode(s: &str) -> Result<Vec<u8>, EngineError> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD
        .decode(s)
        .map_err(|e| EngineError::Format(format!("base64 decode error: {e}")))
}
