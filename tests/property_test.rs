//! Property-based coverage for invariants that a handful of fixed examples
//! can't pin down: nonce uniqueness, footer offset monotonicity, AD binding
//! at the container level, salt-pinned determinism, and key sensitivity to
//! the content actually packed.

use std::collections::HashSet;

use proptest::prelude::*;
use qeltrix::version::V2;
use qeltrix::{AeadAlgo, Compression, ContentDerived, Mode, PackConfig, Packer, SourceHint, Unpacker};
use tempfile::NamedTempFile;

fn pack_to_tempfile(data: &[u8], salt: Option<[u8; 16]>) -> NamedTempFile {
    let config = PackConfig {
        version: V2,
        block_size: 48,
        compression: Compression::Lz4,
        algo: AeadAlgo::ChaCha20,
        permute: true,
        mode: Mode::TwoPass,
        workers: 2,
        tempdir: None,
    };
    let transport = ContentDerived;
    let mut packer = Packer::new(config, &transport);
    packer.salt_override = salt;
    let tmp = NamedTempFile::new().unwrap();
    packer.pack_bytes(data, tmp.path()).unwrap();
    tmp
}

fn read_footer(path: &std::path::Path) -> qeltrix::Footer {
    let mut f = std::fs::File::open(path).unwrap();
    let (_version, _metadata) = qeltrix::format::read_header(&mut f).unwrap();
    let (footer, _sealed_end) = qeltrix::format::locate_footer(&mut f).unwrap();
    footer
}

proptest! {
    /// Every nonce in a container's footer is unique, regardless of how many
    /// blocks the content splits into or what it contains.
    #[test]
    fn nonces_are_unique_across_all_blocks(
        data in proptest::collection::vec(any::<u8>(), 0..4000)
    ) {
        let tmp = pack_to_tempfile(&data, None);
        let footer = read_footer(tmp.path());
        let nonces: HashSet<_> = footer.blocks.iter().map(|b| b.nonce.clone()).collect();
        prop_assert_eq!(nonces.len(), footer.blocks.len());
    }

    /// Footer block offsets strictly increase with index and never overlap —
    /// each entry starts exactly where the previous one's ciphertext ended.
    #[test]
    fn footer_offsets_are_strictly_monotonic(
        data in proptest::collection::vec(any::<u8>(), 1..4000)
    ) {
        let tmp = pack_to_tempfile(&data, None);
        let footer = read_footer(tmp.path());
        for window in footer.blocks.windows(2) {
            let (a, b) = (&window[0], &window[1]);
            prop_assert_eq!(a.offset + a.length, b.offset);
        }
    }

    /// Tampering with the on-disk metadata (the AEAD associated data every
    /// block is bound to) invalidates every block, not just one.
    #[test]
    fn tampering_with_metadata_breaks_every_block(
        data in proptest::collection::vec(any::<u8>(), 16..2000)
    ) {
        let tmp = pack_to_tempfile(&data, None);
        let (_version, metadata_bytes) = {
            let mut f = std::fs::File::open(tmp.path()).unwrap();
            qeltrix::format::read_header(&mut f).unwrap()
        };
        let mut bytes = std::fs::read(tmp.path()).unwrap();

        // The metadata JSON sits right after the 12-byte header prefix;
        // flipping a byte in its middle changes the AD every block was
        // sealed against without touching any ciphertext or the footer.
        let meta_byte_offset = 12 + metadata_bytes.len() / 2;
        bytes[meta_byte_offset] ^= 0x01;
        std::fs::write(tmp.path(), &bytes).unwrap();

        let transport = ContentDerived;
        let unpacker = Unpacker::new(&transport);
        let mut f = std::fs::File::open(tmp.path()).unwrap();
        let result = unpacker.unpack_reader(&mut f, SourceHint::Full(&data));
        prop_assert!(result.is_err());
    }

    /// Pinning the salt makes the derived key (and therefore the whole
    /// container) a deterministic function of the content: packing the same
    /// bytes twice with the same salt round-trips identically both times.
    #[test]
    fn fixed_salt_is_deterministic_across_runs(
        data in proptest::collection::vec(any::<u8>(), 0..2000)
    ) {
        let salt = [0x7eu8; 16];
        let tmp_a = pack_to_tempfile(&data, Some(salt));
        let tmp_b = pack_to_tempfile(&data, Some(salt));

        let transport = ContentDerived;
        let unpacker = Unpacker::new(&transport);

        let mut fa = std::fs::File::open(tmp_a.path()).unwrap();
        let mut fb = std::fs::File::open(tmp_b.path()).unwrap();
        let a = unpacker.unpack_reader(&mut fa, SourceHint::Full(&data)).unwrap();
        let b = unpacker.unpack_reader(&mut fb, SourceHint::Full(&data)).unwrap();
        prop_assert_eq!(a, data.clone());
        prop_assert_eq!(b, data);
    }

    /// Two distinct payloads packed with the same fixed salt derive distinct
    /// keys — unpacking one container against the other's content must fail.
    #[test]
    fn content_sensitivity_rejects_wrong_source(
        a in proptest::collection::vec(any::<u8>(), 16..1000),
        b in proptest::collection::vec(any::<u8>(), 16..1000),
    ) {
        prop_assume!(a != b);
        let salt = [0x11u8; 16];
        let tmp = pack_to_tempfile(&a, Some(salt));

        let transport = ContentDerived;
        let unpacker = Unpacker::new(&transport);
        let mut f = std::fs::File::open(tmp.path()).unwrap();
        let result = unpacker.unpack_reader(&mut f, SourceHint::Full(&b));
        prop_assert!(result.is_err());
    }
}
