//! Writing container images into `docker save`-compatible tar archives.
//!
//! An archive written by [`Writer`] has this layout, with no directory entries:
//!
//! ```text
//! <config digest hex>.json         image configuration, once per config
//! <layer digest hex>.tar           layer payload, once per layer
//! <legacy layer ID>/layer.tar      symlink to ../<layer digest hex>.tar
//! <legacy layer ID>/VERSION        "1.0"
//! <legacy layer ID>/json           legacy per-layer config
//! manifest.json                    one item per image config
//! repositories                     name -> tag -> legacy layer ID
//! ```
//!
//! Several images can share one archive; blobs and legacy layer directories they have in common
//! are written once.

pub mod blobs;
pub mod digest;
pub mod emit;
pub mod error;
pub mod legacy;
pub mod manifest;
pub mod paths;
pub mod reference;
pub mod repositories;
pub mod writer;

pub use blobs::{BlobInfo, BlobKind, LayerDescriptor};
pub use digest::Digest;
pub use error::{Error, Result};
pub use manifest::ManifestItem;
pub use reference::RepoTag;
pub use writer::Writer;
