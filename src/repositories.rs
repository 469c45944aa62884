use std::collections::BTreeMap;

use serde::Serialize;

/// The legacy `repositories` table: repository name → tag → topmost legacy layer ID.
#[derive(Debug, Default, Serialize)]
#[serde(transparent)]
pub struct RepositoriesTable(BTreeMap<String, BTreeMap<String, String>>);

impl RepositoriesTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Points `name:tag` at `legacy_layer_id`; the last writer wins.
    ///
    /// An empty ID (an image without layers) leaves the table untouched.
    pub fn set_tag(&mut self, name: &str, tag: &str, legacy_layer_id: &str) {
        if legacy_layer_id.is_empty() {
            return;
        }
        self.0
            .entry(name.to_owned())
            .or_default()
            .insert(tag.to_owned(), legacy_layer_id.to_owned());
    }

    pub fn get(&self, name: &str, tag: &str) -> Option<&str> {
        self.0.get(name)?.get(tag).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
