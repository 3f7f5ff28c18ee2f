use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// ArchiveKind is the format of a content-addressed source archive.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArchiveKind {
    #[default]
    #[serde(rename = "tar.gz")]
    TarGzip,
}

impl fmt::Display for ArchiveKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::TarGzip => f.write_str("tar.gz"),
        }
    }
}

/// SourceDescriptor identifies a content-addressed source archive held
/// in blob storage. Its wire form, embedded into configuration by the
/// source packer, is `"<lenHex>:<auxHashBase64>:<digestHex>"`.
///
/// A descriptor belongs to exactly one resource; a resource may carry
/// any number of them.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub kind: ArchiveKind,
    /// Hex digest of the archive contents. Also the blob storage key.
    pub digest: String,
    /// Base64 secondary hash, covering the pre-compression file tree.
    pub aux_hash: String,
    /// Size of the archive in bytes.
    pub byte_len: u64,
}

#[derive(thiserror::Error, Debug)]
pub enum ParseDescriptorError {
    #[error("source string has {found} parts, expected 3 (\"<len>:<auxHash>:<digest>\")")]
    PartCount { found: usize },
    #[error("source length {part:?} is not a hexadecimal number")]
    Length {
        part: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("source auxiliary hash {part:?} is not base64")]
    AuxHash {
        part: String,
        #[source]
        source: base64::DecodeError,
    },
    #[error("source digest {part:?} is not hexadecimal")]
    Digest {
        part: String,
        #[source]
        source: hex::FromHexError,
    },
}

impl FromStr for SourceDescriptor {
    type Err = ParseDescriptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        let [len, aux_hash, digest] = parts.as_slice() else {
            return Err(ParseDescriptorError::PartCount { found: parts.len() });
        };

        let byte_len = u64::from_str_radix(len, 16).map_err(|source| {
            ParseDescriptorError::Length {
                part: len.to_string(),
                source,
            }
        })?;
        base64::decode(aux_hash).map_err(|source| ParseDescriptorError::AuxHash {
            part: aux_hash.to_string(),
            source,
        })?;
        hex::decode(digest).map_err(|source| ParseDescriptorError::Digest {
            part: digest.to_string(),
            source,
        })?;

        Ok(Self {
            kind: ArchiveKind::default(),
            digest: digest.to_string(),
            aux_hash: aux_hash.to_string(),
            byte_len,
        })
    }
}

impl fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:x}:{}:{}", self.byte_len, self.aux_hash, self.digest)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const WIRE: &str = "ff:c2FsdA==:deadbeef";

    #[test]
    fn wire_form_round_trips() {
        let desc: SourceDescriptor = WIRE.parse().unwrap();
        assert_eq!(desc.byte_len, 255);
        assert_eq!(desc.aux_hash, "c2FsdA==");
        assert_eq!(desc.digest, "deadbeef");
        assert_eq!(desc.to_string(), WIRE);
    }

    #[test]
    fn wrong_part_count_is_rejected() {
        let err = "ff:c2FsdA==".parse::<SourceDescriptor>().unwrap_err();
        assert_eq!(
            err.to_string(),
            "source string has 2 parts, expected 3 (\"<len>:<auxHash>:<digest>\")"
        );
    }

    #[test]
    fn malformed_parts_are_rejected() {
        assert!(matches!(
            "zz:c2FsdA==:deadbeef".parse::<SourceDescriptor>(),
            Err(ParseDescriptorError::Length { .. })
        ));
        assert!(matches!(
            "ff:!!!:deadbeef".parse::<SourceDescriptor>(),
            Err(ParseDescriptorError::AuxHash { .. })
        ));
        assert!(matches!(
            "ff:c2FsdA==:nothex".parse::<SourceDescriptor>(),
            Err(ParseDescriptorError::Digest { .. })
        ));
    }
}
