//! VersionDescriptor — the small per-version policy table that lets one
//! engine serve formats V1-V4.
//!
//! Nothing about the pipeline itself changes between versions; only which
//! algorithms, compressions, and transports are permitted.

use crate::aead::AeadAlgo;
use crate::codec::Compression;

#[derive(Debug, Clone, Copy)]
pub struct VersionDescriptor {
    pub version: u8,
    pub info_label: &'static [u8],
    pub allowed_algos: &'static [AeadAlgo],
    pub allowed_compressions: &'static [Compression],
    pub allows_asymmetric_transport: bool,
}

pub const V1: VersionDescriptor = VersionDescriptor {
    version: 1,
    info_label: b"QLTX-KEY-V1",
    allowed_algos: &[AeadAlgo::ChaCha20],
    allowed_compressions: &[Compression::Lz4],
    allows_asymmetric_transport: false,
};

pub const V2: VersionDescriptor = VersionDescriptor {
    version: 2,
    info_label: b"QLTX-KEY-V2",
    allowed_algos: &[AeadAlgo::ChaCha20],
    allowed_compressions: &[Compression::Lz4, Compression::Zstd, Compression::None],
    allows_asymmetric_transport: false,
};

pub const V3: VersionDescriptor = VersionDescriptor {
    version: 3,
    info_label: b"QLTX-KEY-V3",
    allowed_algos: &[AeadAlgo::ChaCha20, AeadAlgo::Aes256],
    allowed_compressions: &[Compression::Lz4, Compression::Zstd, Compression::None],
    allows_asymmetric_transport: true,
};

pub const V4: VersionDescriptor = VersionDescriptor {
    version: 4,
    info_label: b"QLTX-KEY-V4",
    allowed_algos: &[AeadAlgo::Aes256],
    allowed_compressions: &[Compression::Lz4, Compression::Zstd, Compression::None],
    allows_asymmetric_transport: false,
};

pub fn descriptor_for(version: u8) -> Option<VersionDescriptor> {
    match version {
        1 => Some(V1),
        2 => Some(V2),
        3 => Some(V3),
        4 => Some(V4),
        _ => None,
    }
}

impl VersionDescriptor {
    pub fn allows_algo(&self, algo: AeadAlgo) -> bool {
        self.allowed_algos.contains(&algo)
    }

    pub fn allows_compression(&self, compression: Compression) -> bool {
        self.allowed_compressions.contains(&compression)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_v3_allows_asymmetric_transport() {
        assert!(!V1.allows_asymmetric_transport);
        assert!(!V2.allows_asymmetric_transport);
        assert!(V3.allows_asymmetric_transport);
        assert!(!V4.allows_asymmetric_transport);
    }

    #[test]
    fn v1_only_allows_lz4_and_chacha20() {
        assert!(V1.allows_compression(Compression::Lz4));
        assert!(!V1.allows_compression(Compression::Zstd));
        assert!(V1.allows_algo(AeadAlgo::ChaCha20));
        assert!(!V1.allows_algo(AeadAlgo::Aes256));
    }

    #[test]
    fn v4_only_allows_aes256() {
        assert!(V4.allows_algo(AeadAlgo::Aes256));
        assert!(!V4.allows_algo(AeadAlgo::ChaCha20));
    }

    #[test]
    fn descriptor_for_unknown_version_is_none() {
        assert!(descriptor_for(0).is_none());
        assert!(descriptor_for(5).is_none());
    }

    #[test]
    fn info_labels_are_all_distinct() {
        let labels: Vec<&[u8]> = [V1, V2, V3, V4].iter().map(|d| d.info_label).collect();
        for i in 0..labels.len() {
            for j in (i + 1)..labels.len() {
                assert_ne!(labels[i], labels[j]);
            }
        }
    }
}
