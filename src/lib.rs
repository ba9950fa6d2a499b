//! # qeltrix — content-derived-keying container format
//!
//! Format guarantees:
//! - The bulk encryption key is never stored or transmitted: it is a
//!   deterministic function of the input content (HKDF-SHA256 over either
//!   the full set of compressed blocks, or just the first `head_bytes` of
//!   raw input), unless the optional RSA-OAEP transport is used to wrap a
//!   random DEK for an arbitrary recipient (V3 only).
//! - Every sealed block is bound to its container via AEAD associated
//!   data: the exact on-disk metadata bytes. Tampering with metadata
//!   invalidates every block's authentication tag.
//! - Block framing lives entirely in the trailing footer (offset, nonce,
//!   length per block) plus a global ciphertext hash; there is no
//!   per-block on-disk header.
//! - One engine serves four format versions (V1-V4); a version differs
//!   from another only in which AEAD algorithms, compressions, and key
//!   transports it permits (see [`version`]).

pub mod aead;
pub mod codec;
pub mod error;
pub mod format;
pub mod kdf;
pub mod pack;
pub mod permute;
pub mod seek;
pub mod transport;
pub mod unpack;
pub mod version;
pub mod worker;

pub use aead::{AeadAlgo, Sealer};
pub use codec::{BlockCodec, Compression};
pub use error::EngineError;
pub use format::{Footer, FooterBlockEntry, Metadata, ModeTag};
pub use pack::{Mode, PackConfig, Packer};
pub use seek::Seeker;
pub use transport::{ContentDerived, Dek, KeyTransport, RsaOaep};
pub use unpack::{SourceHint, Unpacker};
pub use version::{descriptor_for, VersionDescriptor};
pub use worker::CancellationToken;
