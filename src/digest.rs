//! Content digests in `<algorithm>:<hex>` form.
//!
//! A [`Digest`] is carried around exactly as the caller supplied it.  Anything that derives an
//! archive path from a digest must go through [`Digest::encoded()`], which validates the value
//! first: slicing the hex part out of a malformed digest could silently produce an unexpected or
//! colliding path.

use std::{fmt, str::FromStr};

use oci_spec::image::DigestAlgorithm;
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use crate::error::{Error, Result};

/// The digest algorithms accepted in archive paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    Sha256,
    Sha384,
    Sha512,
}

impl Algorithm {
    /// The algorithm used for all digests computed by this crate.
    pub const CANONICAL: Algorithm = Algorithm::Sha256;

    pub fn name(self) -> &'static str {
        match self {
            Algorithm::Sha256 => "sha256",
            Algorithm::Sha384 => "sha384",
            Algorithm::Sha512 => "sha512",
        }
    }

    /// Maps a parsed OCI digest algorithm, rejecting the ones not accepted in archive paths.
    fn from_oci(algorithm: &DigestAlgorithm) -> Option<Self> {
        match algorithm {
            DigestAlgorithm::Sha256 => Some(Algorithm::Sha256),
            DigestAlgorithm::Sha384 => Some(Algorithm::Sha384),
            DigestAlgorithm::Sha512 => Some(Algorithm::Sha512),
            _ => None,
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A content digest such as `sha256:9f86d0...`.
///
/// Construction through [`Digest::new()`] does not validate; [`Digest::parse()`] and the
/// [`FromStr`] impl do.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Digest(String);

impl Digest {
    /// Wraps a caller-supplied digest string as-is.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Wraps and validates a digest string.
    pub fn parse(value: impl Into<String>) -> Result<Self> {
        let digest = Self::new(value);
        digest.validate()?;
        Ok(digest)
    }

    /// Computes the canonical (SHA-256) digest of `data`.
    pub fn from_bytes(data: impl AsRef<[u8]>) -> Self {
        let hash = Sha256::digest(data.as_ref());
        Self(format!("{}:{}", Algorithm::CANONICAL, hex::encode(hash)))
    }

    /// Builds a canonical digest from a finished SHA-256 hasher.
    pub fn from_sha256(hasher: Sha256) -> Self {
        Self(format!(
            "{}:{}",
            Algorithm::CANONICAL,
            hex::encode(hasher.finalize())
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Checks that the digest is `<algorithm>:<hex>` for a supported algorithm, with a lowercase
    /// hex value of the right length.
    pub fn validate(&self) -> Result<()> {
        self.split().map(|_| ())
    }

    pub fn algorithm(&self) -> Result<Algorithm> {
        self.split().map(|(algorithm, _)| algorithm)
    }

    /// Returns the hex-encoded hash value, after validating the whole digest.
    pub fn encoded(&self) -> Result<&str> {
        self.split().map(|(_, encoded)| encoded)
    }

    fn split(&self) -> Result<(Algorithm, &str)> {
        let invalid = |reason: String| Error::InvalidDigest {
            digest: self.0.clone(),
            reason,
        };

        // Checks the syntax, and the length and hex encoding for the SHA-2 algorithms.
        let parsed = self
            .0
            .parse::<oci_spec::image::Digest>()
            .map_err(|e| invalid(e.to_string()))?;
        let algorithm = Algorithm::from_oci(parsed.algorithm())
            .ok_or_else(|| invalid("unsupported digest algorithm".to_owned()))?;
        let encoded = &self.0[self.0.len() - parsed.digest().len()..];
        Ok((algorithm, encoded))
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Digest {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl AsRef<str> for Digest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
