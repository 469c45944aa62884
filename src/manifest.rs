//! The top-level `manifest.json` of an archive.

use std::collections::{BTreeMap, HashMap, HashSet};

use oci_spec::image::Descriptor;
use serde::{Deserialize, Serialize};

use crate::{
    blobs::LayerDescriptor,
    digest::Digest,
    error::{Error, Result},
    paths::{config_path, physical_layer_path},
    reference::RepoTag,
};

/// One image in `manifest.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ManifestItem {
    pub config: String,
    pub repo_tags: Vec<String>,
    pub layers: Vec<String>,
    /// Never set by this writer.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub parent: String,
    /// Never set by this writer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer_sources: Option<BTreeMap<Digest, Descriptor>>,
}

/// Checks that `a` and `b` describe the same image.  This should never fail.
fn check_items_match(a: &ManifestItem, b: &ManifestItem) -> Result<()> {
    if a.config != b.config {
        return Err(Error::InternalInconsistency(format!(
            "trying to reuse manifest items with configs {:?} vs. {:?}",
            a.config, b.config
        )));
    }
    if a.layers != b.layers {
        return Err(Error::InternalInconsistency(format!(
            "trying to reuse manifest items with layers {:?} vs. {:?}",
            a.layers, b.layers
        )));
    }
    // RepoTags are merged by the caller; Parent and LayerSources are never meaningful.
    Ok(())
}

/// The list of images in an archive, at most one per config digest.
#[derive(Debug, Default)]
pub struct ManifestAccumulator {
    items: Vec<ManifestItem>,
    by_config: HashMap<Digest, usize>,
}

impl ManifestAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensures there is a manifest item for (`layers`, `config_digest`) carrying `repo_tags`.
    ///
    /// An existing item for the same config digest is reused if it has the same config and layer
    /// paths, and the tags are appended to it in first-seen order without duplicates.
    pub fn ensure_entry(
        &mut self,
        layers: &[LayerDescriptor],
        config_digest: &Digest,
        repo_tags: &[RepoTag],
    ) -> Result<()> {
        let layer_paths = layers
            .iter()
            .map(|l| physical_layer_path(&l.digest))
            .collect::<Result<Vec<_>>>()?;

        let new_item = ManifestItem {
            config: config_path(config_digest)?,
            repo_tags: vec![],
            layers: layer_paths,
            parent: String::new(),
            layer_sources: None,
        };

        let index = match self.by_config.get(config_digest) {
            Some(&index) => {
                check_items_match(&self.items[index], &new_item)?;
                index
            }
            None => {
                let index = self.items.len();
                self.by_config.insert(config_digest.clone(), index);
                self.items.push(new_item);
                index
            }
        };

        let item = &mut self.items[index];
        let mut known_repo_tags: HashSet<String> = item.repo_tags.iter().cloned().collect();
        for tag in repo_tags {
            // Keep the fully-qualified name: consumers that treat hostname-qualified references
            // differently then see the same thing as after a pull.
            let ref_string = tag.to_string();
            if known_repo_tags.insert(ref_string.clone()) {
                item.repo_tags.push(ref_string);
            }
        }

        Ok(())
    }

    pub fn items(&self) -> &[ManifestItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Serializes the items as the contents of `manifest.json`.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.items).map_err(Error::serialization("marshaling manifest"))
    }
}
