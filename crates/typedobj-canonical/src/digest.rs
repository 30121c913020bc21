use std::fmt;
use std::io::{self, Write};

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest as Sha2Digest, Sha256};

use crate::errors::ValidationError;

/// Supported digest algorithms for canonical checksums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DigestAlg {
    /// SHA-256, the only algorithm currently emitted.
    #[serde(rename = "sha-256")]
    Sha256,
}

/// Content checksum of canonical bytes, rendered as lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum {
    /// Digest algorithm (currently always `sha-256`).
    pub alg: DigestAlg,
    /// Lowercase hex digest.
    pub hex: String,
}

impl Checksum {
    /// Constructs a validated checksum from its hex form.
    pub fn new(alg: DigestAlg, hex: impl Into<String>) -> Result<Self, ValidationError> {
        let hex = hex.into();
        let re = Regex::new(r"^[0-9a-f]{64}$").expect("invalid regex");
        if !re.is_match(&hex) {
            return Err(ValidationError::PatternMismatch {
                field: "checksum",
                value: hex,
            });
        }
        Ok(Checksum { alg, hex })
    }

    /// Computes the checksum of `bytes` in one call.
    pub fn of(bytes: &[u8]) -> Self {
        Self::from_hasher(Sha256::new_with_prefix(bytes))
    }

    fn from_hasher(hasher: Sha256) -> Self {
        Checksum {
            alg: DigestAlg::Sha256,
            hex: hex::encode(hasher.finalize()),
        }
    }

    /// The hex digest.
    pub fn as_str(&self) -> &str {
        &self.hex
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hex)
    }
}

/// Writer adapter that hashes and counts every byte passed through it.
pub struct DigestWriter<W> {
    inner: W,
    hasher: Sha256,
    written: u64,
}

impl<W: Write> DigestWriter<W> {
    /// Wraps `inner`.
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            written: 0,
        }
    }

    /// Bytes written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Returns the wrapped writer, the checksum and the byte count.
    pub fn finish(self) -> (W, Checksum, u64) {
        (self.inner, Checksum::from_hasher(self.hasher), self.written)
    }
}

impl<W: Write> Write for DigestWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vector() {
        let sum = Checksum::of(b"abc");
        assert_eq!(
            sum.as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(sum.alg, DigestAlg::Sha256);
    }

    #[test]
    fn test_writer_matches_one_shot() {
        let mut writer = DigestWriter::new(Vec::new());
        writer.write_all(b"{\"a\":").unwrap();
        writer.write_all(b"1}").unwrap();
        let (bytes, sum, size) = writer.finish();
        assert_eq!(size, 7);
        assert_eq!(sum, Checksum::of(&bytes));
    }

    #[test]
    fn test_new_validates_hex() {
        assert!(Checksum::new(DigestAlg::Sha256, "abc").is_err());
        let hex = Checksum::of(b"").hex;
        assert_eq!(Checksum::new(DigestAlg::Sha256, hex.clone()).unwrap().hex, hex);
    }

    #[test]
    fn test_serializes_with_algorithm_tag() {
        let sum = Checksum::of(b"x");
        let value = serde_json::to_value(&sum).unwrap();
        assert_eq!(value["alg"], "sha-256");
        assert_eq!(value["hex"], sum.hex);
    }
}
