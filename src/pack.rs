//! Packer — raw bytes in, a `.qltx` container out.
//!
//! Drives the write path through Qeltrix's two key-derivation strategies:
//!
//! * `two_pass` — every block is read, compressed, and staged to its own
//!   temp file (keyed by index) while a running hash of the compressed
//!   bytes accumulates in strict index order. Once every block is staged
//!   the hash yields the IKM, the key is derived, and a second pass reads
//!   each staged block back, permutes, seals, and streams it straight to
//!   the output file. Only one batch of blocks (raw/compressed in the
//!   first pass, compressed/sealed in the second) is ever resident at
//!   once — the temp files carry the rest, bounding peak memory to
//!   `O(workers * block_size)` regardless of input size.
//! * `single_pass_firstN` — only the first `head_bytes` of input is read
//!   up front to compute the IKM; once the key is derived, the whole
//!   input (head included) is compressed, permuted, sealed, and streamed
//!   straight to the output in one pass, with no staging step needed.

use std::fs::File;
use std::io::{BufReader, BufWriter, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};

use crate::aead::{get_sealer, random_nonce, AeadAlgo, Sealer, NONCE_LEN};
use crate::codec::{get_codec, Compression};
use crate::error::EngineError;
use crate::format::{self, Footer, FooterBlockEntry, Metadata, ModeTag};
use crate::kdf::derive_key;
use crate::permute::permute;
use crate::transport::{Dek, KeyTransport};
use crate::version::VersionDescriptor;
use crate::worker::{run_batch, CancellationToken};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    TwoPass,
    SinglePassFirstN { head_bytes: u64 },
}

pub struct PackConfig {
    pub version: VersionDescriptor,
    pub block_size: u32,
    pub compression: Compression,
    pub algo: AeadAlgo,
    pub permute: bool,
    pub mode: Mode,
    pub workers: usize,
    /// Directory the two-pass pipeline stages its per-block temp files in.
    /// `None` uses the platform temp directory.
    pub tempdir: Option<PathBuf>,
}

pub struct Packer<'a> {
    pub config: PackConfig,
    pub transport: &'a dyn KeyTransport,
    /// Set to sign the metadata with RSA-PSS (V3 asymmetric transport only).
    pub signing_key: Option<&'a rsa::RsaPrivateKey>,
    /// Fixes the salt instead of drawing it from the OS RNG. Exists so tests
    /// can exercise key-material determinism; never set this in production.
    pub salt_override: Option<[u8; 16]>,
    pub token: CancellationToken,
}

/// Shared, already-derived state the first and second passes both need.
struct PackKeying {
    metadata: Metadata,
    metadata_bytes: Vec<u8>,
    dek: Dek,
}

impl<'a> Packer<'a> {
    pub fn new(config: PackConfig, transport: &'a dyn KeyTransport) -> Self {
        Self {
            config,
            transport,
            signing_key: None,
            salt_override: None,
            token: CancellationToken::new(),
        }
    }

    #[instrument(skip_all, fields(version = self.config.version.version))]
    pub fn pack_file(&self, input_path: &Path, output_path: &Path) -> Result<(), EngineError> {
        let input = File::open(input_path)?;
        self.pack_reader(BufReader::new(input), output_path)
    }

    pub fn pack_bytes(&self, raw: &[u8], output_path: &Path) -> Result<(), EngineError> {
        self.pack_reader(Cursor::new(raw), output_path)
    }

    fn pack_reader<R: Read>(&self, mut reader: R, output_path: &Path) -> Result<(), EngineError> {
        if !self.config.version.allows_compression(self.config.compression) {
            return Err(EngineError::Usage(format!(
                "version {} does not permit compression {}",
                self.config.version.version,
                self.config.compression.name()
            )));
        }
        if !self.config.version.allows_algo(self.config.algo) {
            return Err(EngineError::Usage(format!(
                "version {} does not permit algo {}",
                self.config.version.version,
                self.config.algo.name()
            )));
        }
        if self.transport.requires_random_dek() && !self.config.version.allows_asymmetric_transport
        {
            return Err(EngineError::Usage(format!(
                "version {} does not permit an asymmetric key transport",
                self.config.version.version
            )));
        }

        let result = match self.config.mode {
            Mode::TwoPass => self.pack_two_pass(&mut reader, output_path),
            Mode::SinglePassFirstN { head_bytes } => {
                self.pack_single_pass(&mut reader, output_path, head_bytes)
            }
        };
        if result.is_err() {
            let _ = std::fs::remove_file(output_path);
        }
        result
    }

    fn tempdir(&self) -> PathBuf {
        self.config.tempdir.clone().unwrap_or_else(std::env::temp_dir)
    }

    fn batch_size(&self) -> usize {
        2 * self.config.workers.max(1)
    }

    /// Derives the salt, data key, DEK, and metadata from an already-computed
    /// IKM. Shared by both modes once each has its own way of getting `ikm`.
    fn derive_keying(&self, ikm: &[u8], mode_tag: ModeTag, head_bytes: Option<u64>) -> Result<PackKeying, EngineError> {
        let salt = self.salt_override.unwrap_or_else(|| {
            let mut s = [0u8; 16];
            rand::rngs::OsRng.fill_bytes(&mut s);
            s
        });

        let data_key = derive_key(&salt, ikm, self.config.version.info_label)
            .map_err(|e| EngineError::Crypto(e.to_string()))?;

        let dek: Dek = zeroize::Zeroizing::new(if self.transport.requires_random_dek() {
            let mut d = [0u8; 32];
            rand::rngs::OsRng.fill_bytes(&mut d);
            d
        } else {
            data_key
        });

        let wrapped_dek = self.transport.wrap(&dek)?;

        let mut metadata = Metadata {
            version: self.config.version.version,
            salt: format::base64_encode(&salt),
            block_size: self.config.block_size,
            mode: mode_tag,
            head_bytes,
            compression: self.config.compression.name().to_string(),
            algo: self.config.algo.name().to_string(),
            permute: self.config.permute,
            wrapped_dek: wrapped_dek.map(|w| format::base64_encode(&w)),
            metadata_signature: None,
        };

        if let Some(signing_key) = self.signing_key {
            let signing_bytes = metadata.signing_bytes()?;
            let sig = crate::transport::sign_metadata(signing_key, &signing_bytes)
                .map_err(|e| EngineError::Crypto(e.to_string()))?;
            metadata.metadata_signature = Some(format::base64_encode(&sig));
        }

        let metadata_bytes = metadata.to_canonical_bytes()?;
        Ok(PackKeying { metadata, metadata_bytes, dek })
    }

    fn pack_two_pass<R: Read>(&self, reader: &mut R, output_path: &Path) -> Result<(), EngineError> {
        let block_size = self.config.block_size as usize;
        let codec = get_codec(self.config.compression);
        let tempdir = self.tempdir();

        let mut hasher = Sha256::new();
        let mut staged: Vec<(tempfile::NamedTempFile, u64)> = Vec::new();

        loop {
            if self.token.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            let mut raw_batch = Vec::with_capacity(self.batch_size());
            for _ in 0..self.batch_size() {
                match read_block(reader, block_size)? {
                    Some(block) => raw_batch.push(block),
                    None => break,
                }
            }
            if raw_batch.is_empty() {
                break;
            }
            let base_index = staged.len();
            let compressed_batch = run_batch(raw_batch, &self.token, base_index, |_i, raw| {
                codec.compress(&raw).map_err(EngineError::from)
            })?;
            for (offset, compressed) in compressed_batch.into_iter().enumerate() {
                hasher.update(&compressed);
                let mut tmp = tempfile::Builder::new()
                    .prefix(&format!("qeltrix-block-{:08}-", base_index + offset))
                    .tempfile_in(&tempdir)?;
                tmp.write_all(&compressed)?;
                tmp.flush()?;
                staged.push((tmp, compressed.len() as u64));
            }
        }
        debug!(blocks = staged.len(), "staged compressed blocks to temp files");

        let ikm = hasher.finalize().to_vec();
        let keying = self.derive_keying(&ikm, ModeTag::TwoPass, None)?;

        let sealer = get_sealer(self.config.algo);
        let mut out = File::create(output_path)?;
        format::write_header(&mut out, keying.metadata.version, &keying.metadata_bytes)?;

        let mut writer = BufWriter::new(out);
        let mut global_hasher = Sha256::new();
        let mut footer_blocks = Vec::with_capacity(staged.len());
        let mut offset = (format::HEADER_PREFIX_LEN + keying.metadata_bytes.len()) as u64;

        let total = staged.len();
        let mut cursor = 0usize;
        while cursor < total {
            if self.token.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            let take = self.batch_size().min(total - cursor);
            let mut compressed_batch = Vec::with_capacity(take);
            for (tmp, len) in &mut staged[cursor..cursor + take] {
                tmp.seek(SeekFrom::Start(0))?;
                let mut buf = vec![0u8; *len as usize];
                tmp.read_exact(&mut buf)?;
                compressed_batch.push(buf);
            }
            let sealed_batch = seal_batch(
                compressed_batch,
                &self.token,
                cursor,
                sealer.as_ref(),
                &keying.dek,
                &keying.metadata_bytes,
                self.config.permute,
            )?;
            write_sealed_batch(&mut writer, &sealed_batch, &mut offset, &mut global_hasher, &mut footer_blocks)?;
            cursor += take;
        }
        drop(staged); // removes the temp files

        let footer = Footer {
            blocks: footer_blocks,
            global_ciphertext_sha256: hex::encode(global_hasher.finalize()),
        };
        format::write_footer(&mut writer, &footer)?;
        writer.flush()?;

        info!(output = %output_path.display(), blocks = total, "container written");
        Ok(())
    }

    fn pack_single_pass<R: Read>(
        &self,
        reader: &mut R,
        output_path: &Path,
        head_bytes: u64,
    ) -> Result<(), EngineError> {
        let n = head_bytes as usize;
        let mut head = vec![0u8; n];
        let mut filled = 0;
        while filled < n {
            let r = reader.read(&mut head[filled..])?;
            if r == 0 {
                break;
            }
            filled += r;
        }
        head.truncate(filled);
        let ikm = Sha256::digest(&head).to_vec();

        // If the input is shorter than head_bytes, the whole input is the
        // head — record what was actually hashed so unpacking re-derives
        // the same IKM instead of demanding head_bytes out of a shorter source.
        let keying = self.derive_keying(&ikm, ModeTag::SinglePassFirstN, Some(filled as u64))?;

        let block_size = self.config.block_size as usize;
        let codec = get_codec(self.config.compression);
        let sealer = get_sealer(self.config.algo);

        let mut out = File::create(output_path)?;
        format::write_header(&mut out, keying.metadata.version, &keying.metadata_bytes)?;
        let mut writer = BufWriter::new(out);

        let mut global_hasher = Sha256::new();
        let mut footer_blocks = Vec::new();
        let mut offset = (format::HEADER_PREFIX_LEN + keying.metadata_bytes.len()) as u64;

        let mut combined = Cursor::new(head).chain(&mut *reader);
        let mut index = 0usize;
        loop {
            if self.token.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            let mut raw_batch = Vec::with_capacity(self.batch_size());
            for _ in 0..self.batch_size() {
                match read_block(&mut combined, block_size)? {
                    Some(block) => raw_batch.push(block),
                    None => break,
                }
            }
            if raw_batch.is_empty() {
                break;
            }
            let compressed_batch = run_batch(raw_batch, &self.token, index, |_i, raw| {
                codec.compress(&raw).map_err(EngineError::from)
            })?;
            let batch_len = compressed_batch.len();
            let sealed_batch = seal_batch(
                compressed_batch,
                &self.token,
                index,
                sealer.as_ref(),
                &keying.dek,
                &keying.metadata_bytes,
                self.config.permute,
            )?;
            write_sealed_batch(&mut writer, &sealed_batch, &mut offset, &mut global_hasher, &mut footer_blocks)?;
            index += batch_len;
        }

        let footer = Footer {
            blocks: footer_blocks,
            global_ciphertext_sha256: hex::encode(global_hasher.finalize()),
        };
        format::write_footer(&mut writer, &footer)?;
        writer.flush()?;

        info!(output = %output_path.display(), blocks = index, "container written (single-pass)");
        Ok(())
    }
}

/// Reads up to `block_size` bytes, returning `None` only at true EOF (zero
/// bytes read on the first call). A short final read returns the partial
/// block — the last block of a container is commonly shorter than `block_size`.
fn read_block<R: Read>(reader: &mut R, block_size: usize) -> std::io::Result<Option<Vec<u8>>> {
    let mut buf = vec![0u8; block_size];
    let mut filled = 0;
    while filled < block_size {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    if filled == 0 {
        Ok(None)
    } else {
        buf.truncate(filled);
        Ok(Some(buf))
    }
}

#[allow(clippy::too_many_arguments)]
fn seal_batch(
    compressed_batch: Vec<Vec<u8>>,
    token: &CancellationToken,
    base_index: usize,
    sealer: &dyn Sealer,
    dek: &Dek,
    metadata_bytes: &[u8],
    permute_blocks: bool,
) -> Result<Vec<(Vec<u8>, [u8; NONCE_LEN])>, EngineError> {
    run_batch(compressed_batch, token, base_index, move |index, compressed| {
        let nonce = random_nonce();
        let permuted = if permute_blocks {
            permute(&compressed, dek, index as u64)
        } else {
            compressed
        };
        let ciphertext = sealer
            .seal(dek, &nonce, &permuted, metadata_bytes)
            .map_err(|e| EngineError::Crypto(e.to_string()))?;
        Ok((ciphertext, nonce))
    })
}

fn write_sealed_batch<W: Write>(
    writer: &mut W,
    sealed: &[(Vec<u8>, [u8; NONCE_LEN])],
    offset: &mut u64,
    global_hasher: &mut Sha256,
    footer_blocks: &mut Vec<FooterBlockEntry>,
) -> Result<(), EngineError> {
    for (ciphertext, nonce) in sealed {
        writer.write_all(ciphertext)?;
        global_hasher.update(ciphertext);
        footer_blocks.push(FooterBlockEntry {
            offset: *offset,
            nonce: format::base64_encode(nonce),
            length: ciphertext.len() as u64,
        });
        *offset += ciphertext.len() as u64;
    }
    Ok(())
}
