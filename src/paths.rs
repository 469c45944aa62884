//! Archive paths chosen for blobs.
//!
//! NOTE: These are implementation details of this writer, not properties of the format; readers
//! find blobs through `manifest.json` and the legacy symlinks.

use crate::{digest::Digest, error::Result};

/// Returns the path used for storing a config with the specified digest.
pub fn config_path(config_digest: &Digest) -> Result<String> {
    Ok(format!("{}.json", config_digest.encoded()?))
}

/// Returns the path used for storing a layer with the specified digest: the actual regular file,
/// not the symlink used by the legacy format.
///
/// Layers live in the root of the archive.  Legacy layer IDs are not derived from layer digests,
/// so nesting payloads as `<digest>/layer.tar` would leave most of those directories without any
/// metadata, and `docker load` tries to load every subdirectory as an image.
pub fn physical_layer_path(layer_digest: &Digest) -> Result<String> {
    Ok(format!("{}.tar", layer_digest.encoded()?))
}

#[cfg(test)]
mod test {
    use similar_asserts::assert_eq;

    use super::*;
    use crate::error::Error;

    const D: &str = "sha256:00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff";

    #[test]
    fn test_paths() {
        let d = Digest::new(D);
        assert_eq!(
            config_path(&d).unwrap(),
            "00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff.json"
        );
        assert_eq!(
            physical_layer_path(&d).unwrap(),
            "00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff.tar"
        );
    }

    #[test]
    fn test_paths_are_pure() {
        let a = Digest::new(D);
        let b = Digest::from_bytes(b"other");
        let first = physical_layer_path(&a).unwrap();
        physical_layer_path(&b).unwrap();
        assert_eq!(physical_layer_path(&a).unwrap(), first);
        assert_eq!(physical_layer_path(&a.clone()).unwrap(), first);
    }

    #[test]
    fn test_invalid_digests_rejected() {
        for bad in ["", "sha256:", "../../etc/passwd", "sha256:../../etc/passwd"] {
            let d = Digest::new(bad);
            assert!(matches!(config_path(&d), Err(Error::InvalidDigest { .. })));
            assert!(matches!(
                physical_layer_path(&d),
                Err(Error::InvalidDigest { .. })
            ));
        }
    }
}
