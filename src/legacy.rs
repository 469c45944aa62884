//! Metadata for consumers of the pre-manifest archive format.
//!
//! Old consumers expect one directory per layer ("image") containing a `VERSION` file, a `json`
//! config and the `layer.tar` payload.  The directory names are synthetic legacy layer IDs:
//!
//! 1. Each layer gets a chain ID folding its digest with the digests of all layers below it,
//!    matching docker's `layer.CreateChainID`: the root layer's chain ID is its own digest, and
//!    every other layer's is `sha256(<parent chain ID> + " " + <layer digest>)`.
//! 2. A per-layer config is built: `parent` (the legacy ID of the layer below, absent for the
//!    root), plus a fixed set of fields copied from the image config on the topmost layer only.
//! 3. The config is serialized with a temporary `layer_id` field holding the chain ID; the hex
//!    SHA-256 of that serialization is the legacy layer ID.
//! 4. The stored config replaces `layer_id` with `id`, the legacy layer ID itself.
//!
//! Copied fields that are missing from the image config are written as `null` rather than
//! omitted: the IDs hash those bytes, and docker's encoder writes `null` for them.
//!
//! The IDs do not match `docker save` exactly, since the configs differ in details, but they are
//! stable: the same chain of layer digests and the same image config always produce the same IDs,
//! so images sharing a chain prefix share their legacy layer directories.

use std::{
    collections::{HashMap, HashSet},
    fmt::Write as _,
    io::Write,
};

use log::{debug, trace};
use serde::Serialize;
use serde_json::value::RawValue;

use crate::{
    blobs::LayerDescriptor,
    digest::Digest,
    emit::ArchiveEmitter,
    error::{Error, Result},
    paths::physical_layer_path,
};

pub const LEGACY_LAYER_FILE_NAME: &str = "layer.tar";
pub const LEGACY_VERSION_FILE_NAME: &str = "VERSION";
pub const LEGACY_CONFIG_FILE_NAME: &str = "json";

const LEGACY_VERSION: &[u8] = b"1.0";

/// Image config fields copied onto the topmost legacy layer.  This list is part of the format;
/// changing it changes every legacy layer ID.
pub const TOP_LAYER_CONFIG_FIELDS: [&str; 7] = [
    "architecture",
    "config",
    "container",
    "container_config",
    "created",
    "docker_version",
    "os",
];

/// IDs of legacy layers whose directories have already been written.
#[derive(Debug, Default)]
pub struct LegacyLayerTracker {
    seen: HashSet<String>,
}

impl LegacyLayerTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, layer_id: &str) -> bool {
        self.seen.contains(layer_id)
    }

    pub fn add(&mut self, layer_id: impl Into<String>) {
        self.seen.insert(layer_id.into());
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Computes the chain ID of a layer on top of `parent`.
pub fn chain_id(parent: Option<&Digest>, layer_digest: &Digest) -> Result<Digest> {
    // make sure the concatenation below is unambiguous
    layer_digest.validate()?;
    Ok(match parent {
        None => layer_digest.clone(),
        Some(parent) => Digest::from_bytes(format!("{parent} {layer_digest}")),
    })
}

/// Compacts a JSON value the way the legacy format's reference encoder does: insignificant
/// whitespace is dropped, and `<`, `>`, `&`, U+2028 and U+2029 are written as `\uXXXX` escapes.
/// Object keys and number literals are kept exactly as written.
pub fn compact_json(src: &str) -> String {
    let mut out = String::with_capacity(src.len());
    let mut in_string = false;
    let mut escaped = false;

    for c in src.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
        } else if matches!(c, ' ' | '\t' | '\n' | '\r') {
            continue;
        } else if c == '"' {
            in_string = true;
        }

        match c {
            '<' | '>' | '&' | '\u{2028}' | '\u{2029}' => {
                // writing into a String can't fail
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            _ => out.push(c),
        }
    }
    out
}

/// The [`TOP_LAYER_CONFIG_FIELDS`] of an image config, compacted.
///
/// Fields missing from the image config stay `None` and are written as JSON `null`.
#[derive(Debug, Default)]
struct ImageFields([Option<Box<RawValue>>; 7]);

impl ImageFields {
    fn from_config(config_bytes: &[u8]) -> Result<Self> {
        let mut config: HashMap<String, Option<Box<RawValue>>> =
            serde_json::from_slice(config_bytes)
                .map_err(Error::serialization("unmarshaling config"))?;

        let mut fields = Self::default();
        for (slot, name) in fields.0.iter_mut().zip(TOP_LAYER_CONFIG_FIELDS) {
            if let Some(raw) = config.remove(name).flatten() {
                let compacted = RawValue::from_string(compact_json(raw.get()))
                    .map_err(Error::serialization("marshaling layer config"))?;
                *slot = Some(compacted);
            }
        }
        Ok(fields)
    }

    fn get(&self, index: usize) -> Option<&RawValue> {
        self.0[index].as_deref()
    }
}

/// A per-layer legacy config.  Fields are declared in lexicographic order so the serialization
/// matches the reference encoder, which sorts object keys.
#[derive(Debug, Serialize)]
struct LegacyLayerConfig<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    architecture: Option<Option<&'a RawValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    config: Option<Option<&'a RawValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    container: Option<Option<&'a RawValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    container_config: Option<Option<&'a RawValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    created: Option<Option<&'a RawValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    docker_version: Option<Option<&'a RawValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    layer_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    os: Option<Option<&'a RawValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent: Option<&'a str>,
}

impl<'a> LegacyLayerConfig<'a> {
    fn new(parent: Option<&'a str>, top: Option<&'a ImageFields>) -> Self {
        let field = |index| top.map(|fields| fields.get(index));
        Self {
            architecture: field(0),
            config: field(1),
            container: field(2),
            container_config: field(3),
            created: field(4),
            docker_version: field(5),
            id: None,
            layer_id: None,
            os: field(6),
            parent,
        }
    }
}

/// A legacy layer derived from one entry of an image's layer chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyLayer {
    /// The synthetic legacy layer ID (lowercase hex, no algorithm prefix).
    pub id: String,
    /// The chain ID that went into `id`; not stored in the archive.
    pub chain_id: Digest,
    /// Contents of the layer's `json` file.
    pub config: Vec<u8>,
}

/// Walks an image's layer chain from the root up, deriving legacy layers.
#[derive(Debug, Default)]
struct LegacyChain {
    chain_id: Option<Digest>,
    last_layer_id: Option<String>,
}

impl LegacyChain {
    fn next(&mut self, layer_digest: &Digest, top: Option<&ImageFields>) -> Result<LegacyLayer> {
        let chain_id = chain_id(self.chain_id.as_ref(), layer_digest)?;
        trace!("chain ID of layer {layer_digest} is {chain_id}");

        let mut layer_config = LegacyLayerConfig::new(self.last_layer_id.as_deref(), top);

        // The chain ID only takes part in generating the layer ID.
        layer_config.layer_id = Some(chain_id.as_str());
        let b = serde_json::to_vec(&layer_config)
            .map_err(Error::serialization("marshaling layer config"))?;
        let id = Digest::from_bytes(&b).encoded()?.to_owned();

        layer_config.layer_id = None;
        layer_config.id = Some(id.as_str());
        let config = serde_json::to_vec(&layer_config)
            .map_err(Error::serialization("marshaling layer config"))?;

        self.chain_id = Some(chain_id.clone());
        self.last_layer_id = Some(id.clone());
        Ok(LegacyLayer {
            id,
            chain_id,
            config,
        })
    }
}

/// Walks an image's layers from the root up, passing each derived legacy layer to `f` along with
/// the layer it was derived from.  Returns the topmost legacy layer ID, if any.
fn walk_legacy_layers(
    layers: &[LayerDescriptor],
    config_bytes: &[u8],
    mut f: impl FnMut(LegacyLayer, &LayerDescriptor) -> Result<()>,
) -> Result<Option<String>> {
    let mut chain = LegacyChain::default();
    for (i, layer) in layers.iter().enumerate() {
        // The top layer configuration is generated from a subset of the image configuration.
        let top = if i == layers.len() - 1 {
            Some(ImageFields::from_config(config_bytes)?)
        } else {
            None
        };
        f(chain.next(&layer.digest, top.as_ref())?, layer)?;
    }
    Ok(chain.last_layer_id)
}

/// Derives the legacy layers for an image without writing anything.
pub fn legacy_layers(
    layers: &[LayerDescriptor],
    config_bytes: &[u8],
) -> Result<Vec<LegacyLayer>> {
    let mut result = Vec::with_capacity(layers.len());
    walk_legacy_layers(layers, config_bytes, |legacy, _| {
        result.push(legacy);
        Ok(())
    })?;
    Ok(result)
}

/// Writes the legacy layer directories of an image into an archive, skipping the ones already
/// present.
pub struct LegacyMetadataBuilder<'a, W: Write> {
    emitter: &'a mut ArchiveEmitter<W>,
    tracker: &'a mut LegacyLayerTracker,
}

impl<'a, W: Write> LegacyMetadataBuilder<'a, W> {
    pub fn new(emitter: &'a mut ArchiveEmitter<W>, tracker: &'a mut LegacyLayerTracker) -> Self {
        Self { emitter, tracker }
    }

    /// Materializes the legacy layers of an image and returns the ID of the topmost one, or
    /// `None` if the image has no layers.
    ///
    /// On failure, layers written before the failing one stay in the archive.
    pub fn materialize(
        &mut self,
        layers: &[LayerDescriptor],
        config_bytes: &[u8],
    ) -> Result<Option<String>> {
        walk_legacy_layers(layers, config_bytes, |legacy, layer| {
            self.ensure_single_layer(&legacy, &layer.digest)
        })
    }

    fn ensure_single_layer(&mut self, legacy: &LegacyLayer, layer_digest: &Digest) -> Result<()> {
        if self.tracker.contains(&legacy.id) {
            debug!("Legacy layer {} already written", legacy.id);
            return Ok(());
        }

        // The symlink points at the physical layer in the root of the archive.
        let physical_layer_path = physical_layer_path(layer_digest)?;
        self.emitter.send_symlink(
            &format!("{}/{LEGACY_LAYER_FILE_NAME}", legacy.id),
            &format!("../{physical_layer_path}"),
        )?;
        self.emitter.send_bytes(
            &format!("{}/{LEGACY_VERSION_FILE_NAME}", legacy.id),
            LEGACY_VERSION,
        )?;
        self.emitter.send_bytes(
            &format!("{}/{LEGACY_CONFIG_FILE_NAME}", legacy.id),
            &legacy.config,
        )?;

        self.tracker.add(legacy.id.clone());
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::io::Read;

    use similar_asserts::assert_eq;

    use super::*;

    // sha256 of "layer-0", "layer-1", "layer-2"
    const L0: &str = "sha256:ff5eba71a8188ea1e1d463b58f6ad20fb3736ae6e2fe50bc84a5a2c672c95e35";
    const L1: &str = "sha256:922badbaf192e1a4a5af64df422de6d73e96e70d0ab52245bd3d692bcea9cfad";
    const L2: &str = "sha256:6bdb18f83935f1d97220ee8035e6ccd7e764c32102587be4488f940f943ebda6";

    const CONFIG: &[u8] = br#"{"architecture":"amd64","os":"linux","config":{"Env":["PATH=/usr/bin"]},"created":"2024-01-01T00:00:00Z","rootfs":{"type":"layers","diff_ids":[]}}"#;

    fn layers(digests: &[&str]) -> Vec<LayerDescriptor> {
        digests
            .iter()
            .map(|d| LayerDescriptor::new(Digest::new(*d), 7))
            .collect()
    }

    #[test]
    fn test_layer_digests() {
        assert_eq!(Digest::from_bytes(b"layer-0").as_str(), L0);
        assert_eq!(Digest::from_bytes(b"layer-1").as_str(), L1);
        assert_eq!(Digest::from_bytes(b"layer-2").as_str(), L2);
    }

    #[test]
    fn test_chain_id() {
        let d0 = Digest::new(L0);
        let d1 = Digest::new(L1);
        assert_eq!(chain_id(None, &d0).unwrap(), d0);
        assert_eq!(
            chain_id(Some(&d0), &d1).unwrap(),
            Digest::from_bytes(format!("{L0} {L1}"))
        );
        assert!(matches!(
            chain_id(Some(&d0), &Digest::new("sha256:bogus")),
            Err(Error::InvalidDigest { .. })
        ));
    }

    #[test]
    fn test_known_vector() {
        let result = legacy_layers(&layers(&[L0, L1, L2]), CONFIG).unwrap();
        let ids: Vec<_> = result.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(
            ids,
            [
                "e2fc2e3a07e39f612dad7572c0d3bdad18974b1bd43dde752ff592781a34e45d",
                "9a96ecda66752103db3badfdc09e4966796f7174f69dec69e3ce42ad4118b12b",
                "e44a8dbf170fe4edae62ca1de1ad601bd5827759648b5fc454b49cb404ee882b",
            ]
        );

        assert_eq!(
            String::from_utf8_lossy(&result[0].config),
            r#"{"id":"e2fc2e3a07e39f612dad7572c0d3bdad18974b1bd43dde752ff592781a34e45d"}"#
        );
        assert_eq!(
            String::from_utf8_lossy(&result[1].config),
            concat!(
                r#"{"id":"9a96ecda66752103db3badfdc09e4966796f7174f69dec69e3ce42ad4118b12b","#,
                r#""parent":"e2fc2e3a07e39f612dad7572c0d3bdad18974b1bd43dde752ff592781a34e45d"}"#
            )
        );
        assert_eq!(
            String::from_utf8_lossy(&result[2].config),
            concat!(
                r#"{"architecture":"amd64","config":{"Env":["PATH=/usr/bin"]},"#,
                r#""container":null,"container_config":null,"created":"2024-01-01T00:00:00Z","#,
                r#""docker_version":null,"#,
                r#""id":"e44a8dbf170fe4edae62ca1de1ad601bd5827759648b5fc454b49cb404ee882b","#,
                r#""os":"linux","#,
                r#""parent":"9a96ecda66752103db3badfdc09e4966796f7174f69dec69e3ce42ad4118b12b"}"#
            )
        );
        assert_eq!(
            result[2].chain_id,
            Digest::from_bytes(format!("{} {L2}", Digest::from_bytes(format!("{L0} {L1}"))))
        );
    }

    #[test]
    fn test_deterministic() {
        let a = legacy_layers(&layers(&[L0, L1, L2]), CONFIG).unwrap();
        let b = legacy_layers(&layers(&[L0, L1, L2]), CONFIG).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_shared_prefix_converges() {
        let a = legacy_layers(&layers(&[L0, L1, L2]), CONFIG).unwrap();
        let b = legacy_layers(&layers(&[L0, L1]), CONFIG).unwrap();
        assert_eq!(a[0].id, b[0].id);
        // the top layer carries the image config, so it differs from an intermediate layer
        assert_eq!(b[1].id, "929974fbf64242add388aaaa2953765b565155cdb8139461a8bf5dc2a8920241");
        assert!(a[1].id != b[1].id);
    }

    #[test]
    fn test_single_layer_without_image_fields() {
        let result = legacy_layers(&layers(&[L0]), b"{}").unwrap();
        assert_eq!(
            result[0].id,
            "d2cb74cf970e0a7e8b1689fcbd64549d702089ac4fff2303016f7f401c5a26ae"
        );
        assert_eq!(
            String::from_utf8_lossy(&result[0].config),
            concat!(
                r#"{"architecture":null,"config":null,"container":null,"container_config":null,"#,
                r#""created":null,"docker_version":null,"#,
                r#""id":"d2cb74cf970e0a7e8b1689fcbd64549d702089ac4fff2303016f7f401c5a26ae","#,
                r#""os":null}"#
            )
        );
    }

    #[test]
    fn test_whitespace_in_config_is_irrelevant() {
        let pretty = br#"{
            "architecture": "amd64",
            "os": "linux",
            "config": { "Env": [ "PATH=/usr/bin" ] },
            "created": "2024-01-01T00:00:00Z"
        }"#;
        let a = legacy_layers(&layers(&[L0, L1, L2]), CONFIG).unwrap();
        let b = legacy_layers(&layers(&[L0, L1, L2]), pretty).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_compact_json() {
        assert_eq!(compact_json(r#" { "a" : [ 1 , 2.50 ] } "#), r#"{"a":[1,2.50]}"#);
        assert_eq!(compact_json(r#""keep  spaces""#), r#""keep  spaces""#);
        assert_eq!(compact_json(r#""a\"b c""#), r#""a\"b c""#);
        assert_eq!(compact_json(r#""a\\" "#), r#""a\\""#);
        assert_eq!(
            compact_json("\"<tag> & \u{2028}\""),
            r#""\u003ctag\u003e \u0026 \u2028""#
        );
        assert_eq!(compact_json(r#"{"z":1,"a":2}"#), r#"{"z":1,"a":2}"#);
    }

    #[test]
    fn test_bad_config() {
        for bad in [&b"not json"[..], b"[1,2]", b""] {
            assert!(matches!(
                legacy_layers(&layers(&[L0]), bad),
                Err(Error::Serialization { .. })
            ));
        }
        // the config is only consulted for the top layer
        assert!(legacy_layers(&[], b"not json").unwrap().is_empty());
    }

    #[test]
    fn test_materialize() {
        let mut emitter = ArchiveEmitter::new(vec![]);
        let mut tracker = LegacyLayerTracker::new();

        let top = LegacyMetadataBuilder::new(&mut emitter, &mut tracker)
            .materialize(&layers(&[L0, L1]), CONFIG)
            .unwrap();
        assert_eq!(
            top.as_deref(),
            Some("929974fbf64242add388aaaa2953765b565155cdb8139461a8bf5dc2a8920241")
        );
        // a second image sharing the root layer only adds two new layers
        LegacyMetadataBuilder::new(&mut emitter, &mut tracker)
            .materialize(&layers(&[L0, L1, L2]), CONFIG)
            .unwrap();
        assert_eq!(tracker.len(), 4);

        let out = emitter.finish().unwrap();
        let mut archive = tar::Archive::new(&out[..]);
        let mut paths = vec![];
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let path = entry.path().unwrap().to_string_lossy().into_owned();
            if path.ends_with("/layer.tar") {
                let target = entry.link_name().unwrap().unwrap();
                assert!(target.to_string_lossy().starts_with("../"));
            } else if path.ends_with("/VERSION") {
                let mut content = String::new();
                entry.read_to_string(&mut content).unwrap();
                assert_eq!(content, "1.0");
            }
            paths.push(path);
        }
        assert_eq!(paths.len(), 12);
        let root = "e2fc2e3a07e39f612dad7572c0d3bdad18974b1bd43dde752ff592781a34e45d";
        assert_eq!(
            paths[..3].to_vec(),
            vec![
                format!("{root}/layer.tar"),
                format!("{root}/VERSION"),
                format!("{root}/json"),
            ]
        );
        assert_eq!(paths.iter().filter(|p| p.starts_with(root)).count(), 3);
    }

    #[test]
    fn test_materialize_empty() {
        let mut emitter = ArchiveEmitter::new(vec![]);
        let mut tracker = LegacyLayerTracker::new();
        let top = LegacyMetadataBuilder::new(&mut emitter, &mut tracker)
            .materialize(&[], CONFIG)
            .unwrap();
        assert_eq!(top, None);
        assert!(tracker.is_empty());
    }
}
