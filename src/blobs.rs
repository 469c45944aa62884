use std::collections::HashMap;

use oci_spec::image::Descriptor;
use serde::{Deserialize, Serialize};

use crate::{
    digest::Digest,
    error::{Error, Result},
};

/// Metadata of a blob: its digest and size in bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobInfo {
    pub digest: Digest,
    pub size: u64,
}

impl BlobInfo {
    pub fn new(digest: Digest, size: u64) -> Self {
        Self { digest, size }
    }
}

/// What a blob is used for; this decides where it is stored in the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobKind {
    Config,
    Layer,
}

/// One layer of an image, in root-to-top order within the image's layer chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerDescriptor {
    pub digest: Digest,
    pub size: u64,
}

impl LayerDescriptor {
    pub fn new(digest: Digest, size: u64) -> Self {
        Self { digest, size }
    }
}

impl From<&LayerDescriptor> for BlobInfo {
    fn from(layer: &LayerDescriptor) -> Self {
        BlobInfo::new(layer.digest.clone(), layer.size)
    }
}

impl TryFrom<&Descriptor> for LayerDescriptor {
    type Error = Error;

    fn try_from(descriptor: &Descriptor) -> Result<Self> {
        Ok(Self {
            digest: Digest::parse(descriptor.digest().to_string())?,
            size: descriptor.size(),
        })
    }
}

/// The set of blobs already recorded in an archive.
#[derive(Debug, Default)]
pub struct BlobRegistry {
    blobs: HashMap<Digest, BlobInfo>,
}

impl BlobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks whether the archive already contains a blob, and if so, returns its metadata.
    ///
    /// Returns `Ok(None)` if the blob has not been recorded; an error is returned only if `digest`
    /// is empty.
    pub fn try_reuse(&self, digest: &Digest) -> Result<Option<BlobInfo>> {
        if digest.is_empty() {
            return Err(Error::MissingDigest);
        }
        Ok(self.blobs.get(digest).map(|blob| BlobInfo {
            digest: digest.clone(),
            size: blob.size,
        }))
    }

    /// Records metadata of a blob written to the archive.
    pub fn record(&mut self, info: BlobInfo) {
        self.blobs.insert(info.digest.clone(), info);
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

#[cfg(test)]
mod test {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn test_reuse_and_record() {
        let mut registry = BlobRegistry::new();
        let d = Digest::from_bytes(b"layer");

        assert_eq!(registry.try_reuse(&d).unwrap(), None);

        registry.record(BlobInfo::new(d.clone(), 5));
        assert_eq!(
            registry.try_reuse(&d).unwrap(),
            Some(BlobInfo::new(d.clone(), 5))
        );

        // recording again overwrites rather than duplicating
        registry.record(BlobInfo::new(d.clone(), 6));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.try_reuse(&d).unwrap().unwrap().size, 6);
    }

    #[test]
    fn test_layer_from_oci_descriptor() {
        let descriptor: Descriptor = serde_json::from_str(
            r#"{
                "mediaType": "application/vnd.oci.image.layer.v1.tar",
                "digest": "sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824",
                "size": 5
            }"#,
        )
        .unwrap();
        let layer = LayerDescriptor::try_from(&descriptor).unwrap();
        assert_eq!(layer.digest, Digest::from_bytes(b"hello"));
        assert_eq!(layer.size, 5);
        assert_eq!(BlobInfo::from(&layer), BlobInfo::new(layer.digest.clone(), 5));
    }

    #[test]
    fn test_missing_digest() {
        let registry = BlobRegistry::new();
        assert!(matches!(
            registry.try_reuse(&Digest::new("")),
            Err(Error::MissingDigest)
        ));
    }
}
