//! Source image hashing
//!
//! Digests are computed over the real input bytes as they are scanned, so a
//! converted image can be tied back to the raw file it came from.

use md5::{Digest, Md5};
use serde::Serialize;
use sha1::Sha1;
use sha2::Sha256;
use std::io::Read;
use std::str::FromStr;

/// Supported hash algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// MD5 (128-bit)
    Md5,
    /// SHA-1 (160-bit)
    Sha1,
    /// SHA-256 (256-bit)
    Sha256,
}

impl HashAlgorithm {
    /// Get the output size in bytes
    pub fn output_size(&self) -> usize {
        match self {
            HashAlgorithm::Md5 => 16,
            HashAlgorithm::Sha1 => 20,
            HashAlgorithm::Sha256 => 32,
        }
    }

    /// Get the algorithm name
    pub fn name(&self) -> &'static str {
        match self {
            HashAlgorithm::Md5 => "MD5",
            HashAlgorithm::Sha1 => "SHA1",
            HashAlgorithm::Sha256 => "SHA256",
        }
    }
}

impl FromStr for HashAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "md5" => Ok(HashAlgorithm::Md5),
            "sha1" | "sha-1" => Ok(HashAlgorithm::Sha1),
            "sha256" | "sha-256" => Ok(HashAlgorithm::Sha256),
            other => Err(format!("unknown hash algorithm '{}'", other)),
        }
    }
}

/// Hash computation result
#[derive(Debug, Clone, Serialize)]
pub struct HashResult {
    /// Algorithm used
    pub algorithm: HashAlgorithm,
    /// Hash bytes
    #[serde(skip)]
    pub hash: Vec<u8>,
    /// Hex string representation
    pub hex: String,
}

impl HashResult {
    /// Create a new hash result
    pub fn new(algorithm: HashAlgorithm, hash: Vec<u8>) -> Self {
        let hex = hex::encode(&hash);
        Self { algorithm, hash, hex }
    }
}

/// Multi-algorithm hasher fed block by block during conversion
#[derive(Default)]
pub struct Hasher {
    md5: Option<Md5>,
    sha1: Option<Sha1>,
    sha256: Option<Sha256>,
}

impl Hasher {
    /// Create a new hasher with specified algorithms
    pub fn new(algorithms: &[HashAlgorithm]) -> Self {
        Self {
            md5: algorithms.contains(&HashAlgorithm::Md5).then(Md5::new),
            sha1: algorithms.contains(&HashAlgorithm::Sha1).then(Sha1::new),
            sha256: algorithms.contains(&HashAlgorithm::Sha256).then(Sha256::new),
        }
    }

    /// True when no algorithm is enabled
    pub fn is_noop(&self) -> bool {
        self.md5.is_none() && self.sha1.is_none() && self.sha256.is_none()
    }

    /// Update the hasher with data
    pub fn update(&mut self, data: &[u8]) {
        if let Some(ref mut h) = self.md5 {
            h.update(data);
        }
        if let Some(ref mut h) = self.sha1 {
            h.update(data);
        }
        if let Some(ref mut h) = self.sha256 {
            h.update(data);
        }
    }

    /// Finalize and return all hash results
    pub fn finalize(self) -> Vec<HashResult> {
        let mut results = Vec::new();

        if let Some(h) = self.md5 {
            results.push(HashResult::new(HashAlgorithm::Md5, h.finalize().to_vec()));
        }
        if let Some(h) = self.sha1 {
            results.push(HashResult::new(HashAlgorithm::Sha1, h.finalize().to_vec()));
        }
        if let Some(h) = self.sha256 {
            results.push(HashResult::new(HashAlgorithm::Sha256, h.finalize().to_vec()));
        }

        results
    }
}

/// Compute hashes of everything a reader yields
pub fn hash_reader<R: Read>(
    reader: &mut R,
    algorithms: &[HashAlgorithm],
) -> std::io::Result<Vec<HashResult>> {
    let mut hasher = Hasher::new(algorithms);
    let mut buffer = vec![0u8; 1024 * 1024];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_md5_hash() {
        let mut reader = Cursor::new(b"Hello, World!");
        let results = hash_reader(&mut reader, &[HashAlgorithm::Md5]).unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].algorithm, HashAlgorithm::Md5);
        assert_eq!(results[0].hex, "65a8e27d8879283831b664bd8b7f0ad4");
    }

    #[test]
    fn test_sha256_hash() {
        let mut reader = Cursor::new(b"Hello, World!");
        let results = hash_reader(&mut reader, &[HashAlgorithm::Sha256]).unwrap();

        assert_eq!(
            results[0].hex,
            "dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f"
        );
        assert_eq!(results[0].hash.len(), HashAlgorithm::Sha256.output_size());
    }

    #[test]
    fn test_hasher_incremental() {
        let mut hasher = Hasher::new(&[HashAlgorithm::Md5, HashAlgorithm::Sha1]);
        hasher.update(b"Hello, ");
        hasher.update(b"World!");
        assert!(!hasher.is_noop());

        let results = hasher.finalize();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].hex, "65a8e27d8879283831b664bd8b7f0ad4");
        assert_eq!(results[1].algorithm, HashAlgorithm::Sha1);
    }

    #[test]
    fn test_noop_hasher() {
        let mut hasher = Hasher::new(&[]);
        assert!(hasher.is_noop());
        hasher.update(b"ignored");
        assert!(hasher.finalize().is_empty());
    }

    #[test]
    fn test_parse_algorithm() {
        assert_eq!("md5".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Md5);
        assert_eq!("SHA-256".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha256);
        assert!("crc32".parse::<HashAlgorithm>().is_err());
    }
}
