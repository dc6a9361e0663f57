//! Checksum declarations
//!
//! PDRs declare per-file checksums as `FILE_CKSUM_TYPE` / `FILE_CKSUM_VALUE`
//! pairs. Two algorithms are in use: POSIX `cksum` (CRC-32, decimal value)
//! and MD5 (hex value). Values are carried as declared text.

use crate::error::PdrError;
use serde::{Deserialize, Serialize};

/// Checksum algorithm declared in a PDR FILE_SPEC object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChecksumType {
    /// POSIX `cksum` CRC-32
    #[serde(rename = "CKSUM")]
    Cksum,
    /// MD5 digest
    #[serde(rename = "MD5")]
    Md5,
}

impl ChecksumType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChecksumType::Cksum => "CKSUM",
            ChecksumType::Md5 => "MD5",
        }
    }
}

impl std::str::FromStr for ChecksumType {
    type Err = PdrError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "CKSUM" => Ok(ChecksumType::Cksum),
            "MD5" => Ok(ChecksumType::Md5),
            other => Err(PdrError::UnsupportedChecksum(other.to_string())),
        }
    }
}

impl std::fmt::Display for ChecksumType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_type_serde_names() {
        assert_eq!(serde_json::to_string(&ChecksumType::Cksum).unwrap(), "\"CKSUM\"");
        let md5: ChecksumType = serde_json::from_str("\"MD5\"").unwrap();
        assert_eq!(md5, ChecksumType::Md5);
        assert_eq!(md5.to_string(), "MD5");
    }

    #[test]
    fn test_checksum_type_from_str() {
        assert_eq!("CKSUM".parse::<ChecksumType>().unwrap(), ChecksumType::Cksum);
        assert_eq!("md5".parse::<ChecksumType>().unwrap(), ChecksumType::Md5);
        assert!(matches!(
            "SHA1".parse::<ChecksumType>(),
            Err(PdrError::UnsupportedChecksum(_))
        ));
    }
}
