//! Unpacker — verify and open a `.qltx` container back into raw bytes.
//!
//! Mirrors [`crate::pack::Packer`]'s write path in reverse: read header,
//! recover the data key, verify the metadata signature if present, open
//! every sealed block in parallel, unpermute, decompress, and concatenate
//! in order. Optionally verifies the footer's global ciphertext hash first
//! — the `--no-verify` escape hatch in the CLI skips that pass for speed.
//!
//! Content-derived containers (no `wrapped_dek`) are convergent: the bulk
//! key was never transmitted, so recovering it requires the same content
//! the packer saw. `two_pass` needs the whole original input (to
//! recompute identical compressed blocks and re-hash them in order);
//! `single_pass_firstN` needs only its first `head_bytes`, which is the
//! point of that mode — the recipient can start decrypting once it holds
//! just the head of the content, not the whole thing. Containers using the
//! `RsaOaep` transport need neither: the DEK comes back from
//! `KeyTransport::unwrap`.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::{info, instrument, warn};

use crate::aead::{get_sealer, AeadAlgo, NONCE_LEN};
use crate::codec::{get_codec, Compression};
use crate::error::EngineError;
use crate::format::{self, Footer, Metadata};
use crate::kdf::derive_key;
use crate::permute::unpermute;
use crate::transport::{Dek, KeyTransport};
use crate::version::descriptor_for;
use crate::worker::{run_batched, CancellationToken};

/// What the unpacker needs to recover a content-derived key. Unnecessary
/// when the container carries a `wrapped_dek` (asymmetric transport).
pub enum SourceHint<'a> {
    /// The full original input — required for `two_pass` containers.
    Full(&'a [u8]),
    /// Just the first `head_bytes` of the original input — sufficient for
    /// `single_pass_firstN` containers.
    Head(&'a [u8]),
    None,
}

pub struct Unpacker<'a> {
    pub transport: &'a dyn KeyTransport,
    pub verifying_key: Option<&'a rsa::RsaPublicKey>,
    pub verify_global_hash: bool,
    pub workers: usize,
    pub token: CancellationToken,
}

impl<'a> Unpacker<'a> {
    pub fn new(transport: &'a dyn KeyTransport) -> Self {
        Self {
            transport,
            verifying_key: None,
            verify_global_hash: true,
            workers: num_cpus(),
            token: CancellationToken::new(),
        }
    }

    #[instrument(skip_all)]
    pub fn unpack_file(
        &self,
        input_path: &Path,
        output_path: &Path,
        source: SourceHint,
    ) -> Result<(), EngineError> {
        let mut input = File::open(input_path)?;
        let raw = self.unpack_reader(&mut input, source)?;
        let mut out = File::create(output_path)?;
        out.write_all(&raw)?;
        Ok(())
    }

    pub fn unpack_reader<R: Read + Seek>(
        &self,
        reader: &mut R,
        source: SourceHint,
    ) -> Result<Vec<u8>, EngineError> {
        let (version, metadata_bytes) = format::read_header(&mut *reader)?;
        let metadata: Metadata = serde_json::from_slice(&metadata_bytes)?;
        if metadata.version != version {
            return Err(EngineError::Format(
                "header version does not match metadata version".into(),
            ));
        }
        let descriptor = descriptor_for(version)
            .ok_or_else(|| EngineError::Format(format!("unsupported version {version}")))?;

        if let Some(verifying_key) = self.verifying_key {
            let signature_b64 = metadata.metadata_signature.as_ref().ok_or_else(|| {
                EngineError::Auth("metadata signature required but absent".into())
            })?;
            let signature = base64_decode(signature_b64)?;
            let signing_bytes = metadata.signing_bytes()?;
            crate::transport::verify_metadata(verifying_key, &signing_bytes, &signature)
                .map_err(|_| EngineError::Auth("metadata signature verification failed".into()))?;
        }

        let (footer, _sealed_end) = format::locate_footer(&mut *reader)?;

        if self.verify_global_hash {
            self.verify_blocks_hash(reader, &footer)?;
        } else {
            warn!("skipping global ciphertext hash verification");
        }

        let compression = Compression::from_name(&metadata.compression)
            .ok_or_else(|| EngineError::Format(format!("unknown compression {}", metadata.compression)))?;
        let codec = get_codec(compression);

        let dek: Dek = if let Some(wrapped_b64) = &metadata.wrapped_dek {
            let wrapped = base64_decode(wrapped_b64)?;
            zeroize::Zeroizing::new(self.transport.unwrap(&wrapped)?)
        } else {
            let salt = metadata.salt_bytes()?;
            let ikm = recover_ikm(&metadata, &source, codec.as_ref())?;
            let data_key = derive_key(&salt, &ikm, descriptor.info_label)
                .map_err(|e| EngineError::Crypto(e.to_string()))?;
            zeroize::Zeroizing::new(data_key)
        };

        let algo = AeadAlgo::from_name(&metadata.algo)
            .ok_or_else(|| EngineError::Format(format!("unknown algo {}", metadata.algo)))?;
        let sealer = get_sealer(algo);

        let mut ciphertexts = Vec::with_capacity(footer.blocks.len());
        for entry in &footer.blocks {
            reader.seek(SeekFrom::Start(entry.offset))?;
            let mut buf = vec![0u8; entry.length as usize];
            reader.read_exact(&mut buf)?;
            ciphertexts.push((buf, entry.nonce_bytes()?));
        }

        let plain_blocks: Vec<Vec<u8>> = run_batched(
            ciphertexts.into_iter().enumerate().collect(),
            self.workers,
            &self.token,
            |_i, (index, (ciphertext, nonce)): (usize, (Vec<u8>, [u8; NONCE_LEN]))| {
                let opened = sealer
                    .open(&dek, &nonce, &ciphertext, &metadata_bytes)
                    .map_err(|_| EngineError::Auth("block authentication failed".into()))?;
                let depermuted = if metadata.permute {
                    unpermute(&opened, &dek, index as u64)
                } else {
                    opened
                };
                codec
                    .decompress(&depermuted, metadata.block_size as usize)
                    .map_err(EngineError::from)
            },
        )?;

        let total_len: usize = plain_blocks.iter().map(|b| b.len()).sum();
        let mut out = Vec::with_capacity(total_len);
        for block in plain_blocks {
            out.extend_from_slice(&block);
        }

        info!(blocks = footer.blocks.len(), bytes = out.len(), "container unpacked");
        Ok(out)
    }

    fn verify_blocks_hash<R: Read + Seek>(&self, reader: &mut R, footer: &Footer) -> Result<(), EngineError> {
        let mut hasher = Sha256::new();
        for entry in &footer.blocks {
            reader.seek(SeekFrom::Start(entry.offset))?;
            let mut buf = vec![0u8; entry.length as usize];
            reader.read_exact(&mut buf)?;
            hasher.update(&buf);
        }
        let actual = hex::encode(hasher.finalize());
        if actual != footer.global_ciphertext_sha256 {
            return Err(EngineError::Integrity {
                expected: footer.global_ciphertext_sha256.clone(),
                actual,
            });
        }
        Ok(())
    }
}

pub(crate) fn recover_ikm(
    metadata: &Metadata,
    source: &SourceHint,
    codec: &dyn crate::codec::BlockCodec,
) -> Result<Vec<u8>, EngineError> {
    match metadata.mode {
        format::ModeTag::TwoPass => {
            let full = match source {
                SourceHint::Full(bytes) => *bytes,
                _ => {
                    return Err(EngineError::Usage(
                        "two_pass content-derived containers require the full original input".into(),
                    ))
                }
            };
            let block_size = metadata.block_size as usize;
            let mut hasher = Sha256::new();
            if full.is_empty() {
                return Ok(hasher.finalize().to_vec());
            }
            for raw_block in full.chunks(block_size) {
                let compressed = codec.compress(raw_block)?;
                hasher.update(&compressed);
            }
            Ok(hasher.finalize().to_vec())
        }
        format::ModeTag::SinglePassFirstN => {
            let head_bytes = metadata.head_bytes.ok_or_else(|| {
                EngineError::Format("single_pass_firstN metadata missing head_bytes".into())
            })? as usize;
            let bytes: &[u8] = match source {
                SourceHint::Full(bytes) => *bytes,
                SourceHint::Head(bytes) => *bytes,
                SourceHint::None => {
                    return Err(EngineError::Usage(
                        "single_pass_firstN content-derived containers require the head of the original input".into(),
                    ))
                }
            };
            if bytes.len() < head_bytes {
                return Err(EngineError::Usage(format!(
                    "source hint has {} bytes, need at least {head_bytes}",
                    bytes.len()
                )));
            }
            Ok(Sha256::digest(&bytes[..head_bytes]).to_vec())
        }
    }
}

fn base64_decode(s: &str) -> Result<Vec<u8>, EngineError> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD
        .decode(s)
        .map_err(|e| EngineError::Format(format!("base64 decode error: {e}")))
}

fn num_cpus() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}
