//! The archive writer: shared state for writing one or more images into one archive.
//!
//! The output is a single sequential stream, so every operation runs with one mutex held for its
//! full duration, including any entries it sends.  Callers on different threads are serialized;
//! the order of their operations is the order of entries in the archive.

use std::{
    io::{Read, Write},
    sync::{Mutex, MutexGuard},
};

use log::debug;

use crate::{
    blobs::{BlobInfo, BlobKind, BlobRegistry, LayerDescriptor},
    digest::Digest,
    emit::ArchiveEmitter,
    error::{Error, Result},
    legacy::{LegacyLayerTracker, LegacyMetadataBuilder},
    manifest::ManifestAccumulator,
    paths::{config_path, physical_layer_path},
    reference::RepoTag,
    repositories::RepositoriesTable,
};

pub const MANIFEST_FILE_NAME: &str = "manifest.json";
pub const LEGACY_REPOSITORIES_FILE_NAME: &str = "repositories";

struct State<W: Write> {
    /// `None` once the writer has been closed.
    emitter: Option<ArchiveEmitter<W>>,
    /// Set after a failure that may have left partial output in the archive.
    poisoned: bool,
    blobs: BlobRegistry,
    legacy_layers: LegacyLayerTracker,
    manifest: ManifestAccumulator,
    repositories: RepositoriesTable,
}

impl<W: Write> State<W> {
    fn emitter(&mut self) -> Result<&mut ArchiveEmitter<W>> {
        self.emitter.as_mut().ok_or(Error::AlreadyClosed)
    }

    fn set_repo_tags(&mut self, repo_tags: &[RepoTag], legacy_layer_id: &str) {
        for tag in repo_tags {
            self.repositories
                .set_tag(tag.name(), tag.tag(), legacy_layer_id);
        }
    }
}

/// Creates a (docker save)-formatted tar archive containing one or more images.
///
/// The caller must eventually call [`Writer::close()`] to produce a valid archive.
pub struct Writer<W: Write> {
    state: Mutex<State<W>>,
}

impl<W: Write> std::fmt::Debug for Writer<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // the sink doesn't impl Debug
        f.debug_struct("Writer").finish_non_exhaustive()
    }
}

impl<W: Write> Writer<W> {
    /// Returns a writer producing an archive into `sink`.
    pub fn new(sink: W) -> Self {
        Self {
            state: Mutex::new(State {
                emitter: Some(ArchiveEmitter::new(sink)),
                poisoned: false,
                blobs: BlobRegistry::new(),
                legacy_layers: LegacyLayerTracker::new(),
                manifest: ManifestAccumulator::new(),
                repositories: RepositoriesTable::new(),
            }),
        }
    }

    /// Locks the writer, after checking that it is still usable.
    fn lock(&self) -> Result<MutexGuard<'_, State<W>>> {
        let state = self.state.lock().map_err(|_| Error::Poisoned)?;
        if state.emitter.is_none() {
            return Err(Error::AlreadyClosed);
        }
        if state.poisoned {
            return Err(Error::Poisoned);
        }
        Ok(state)
    }

    /// Runs `f` with the writer locked.  Failures that may have written partial output make the
    /// writer refuse any further work.
    fn with_state<T>(&self, f: impl FnOnce(&mut State<W>) -> Result<T>) -> Result<T> {
        let mut state = self.lock()?;
        let result = f(&mut *state);
        if let Err(err) = &result {
            if err.corrupts_output() {
                state.poisoned = true;
            }
        }
        result
    }

    /// Checks whether the archive already contains a blob, and if so, returns its metadata.
    ///
    /// Returns `Ok(None)` if the blob can not be reused; `digest` must not be empty.
    pub fn try_reuse_blob(&self, digest: &Digest) -> Result<Option<BlobInfo>> {
        self.with_state(|state| state.blobs.try_reuse(digest))
    }

    /// Records metadata of a blob written to the archive, which must contain a digest and size.
    pub fn record_blob(&self, info: BlobInfo) -> Result<()> {
        self.with_state(|state| {
            state.blobs.record(info);
            Ok(())
        })
    }

    /// Writes a blob into the archive unless a blob with the same digest is already there.
    ///
    /// Configs are stored at [`config_path()`], layers at [`physical_layer_path()`].  Returns
    /// `true` if the blob was already present and `stream` was not read.
    pub fn put_blob(&self, info: &BlobInfo, kind: BlobKind, stream: impl Read) -> Result<bool> {
        self.with_state(|state| {
            if let Some(existing) = state.blobs.try_reuse(&info.digest)? {
                debug!("Reusing blob {} ({} bytes)", existing.digest, existing.size);
                return Ok(true);
            }
            let path = match kind {
                BlobKind::Config => config_path(&info.digest)?,
                BlobKind::Layer => physical_layer_path(&info.digest)?,
            };
            state.emitter()?.send_file(&path, info.size, stream)?;
            state.blobs.record(info.clone());
            Ok(false)
        })
    }

    /// Writes the legacy layer directories for an image and returns the topmost legacy layer ID,
    /// or `None` if the image has no layers.
    pub fn ensure_legacy_metadata(
        &self,
        layers: &[LayerDescriptor],
        config_bytes: &[u8],
    ) -> Result<Option<String>> {
        self.with_state(|state| {
            let emitter = state.emitter.as_mut().ok_or(Error::AlreadyClosed)?;
            LegacyMetadataBuilder::new(emitter, &mut state.legacy_layers)
                .materialize(layers, config_bytes)
        })
    }

    /// Points `repo_tag` at a legacy layer in the `repositories` file.  An empty ID is ignored.
    pub fn set_repo_tag(&self, repo_tag: &RepoTag, legacy_layer_id: &str) -> Result<()> {
        self.with_state(|state| {
            state.set_repo_tags(std::slice::from_ref(repo_tag), legacy_layer_id);
            Ok(())
        })
    }

    /// Writes legacy layer metadata and records tags for a single image, as one operation.
    pub fn write_legacy_metadata(
        &self,
        layers: &[LayerDescriptor],
        config_bytes: &[u8],
        repo_tags: &[RepoTag],
    ) -> Result<Option<String>> {
        self.with_state(|state| {
            let emitter = state.emitter.as_mut().ok_or(Error::AlreadyClosed)?;
            let top = LegacyMetadataBuilder::new(emitter, &mut state.legacy_layers)
                .materialize(layers, config_bytes)?;
            if let Some(top) = &top {
                state.set_repo_tags(repo_tags, top);
            }
            Ok(top)
        })
    }

    /// Ensures that there is a manifest item pointing to (`layers`, `config_digest`) with
    /// `repo_tags`.
    pub fn ensure_manifest_entry(
        &self,
        layers: &[LayerDescriptor],
        config_digest: &Digest,
        repo_tags: &[RepoTag],
    ) -> Result<()> {
        self.with_state(|state| state.manifest.ensure_entry(layers, config_digest, repo_tags))
    }

    /// Sends a regular file into the archive.  `stream` must yield exactly `size` bytes.
    pub fn send_file(&self, path: &str, size: u64, stream: impl Read) -> Result<()> {
        self.with_state(|state| state.emitter()?.send_file(path, size, stream))
    }

    pub fn send_bytes(&self, path: &str, data: &[u8]) -> Result<()> {
        self.with_state(|state| state.emitter()?.send_bytes(path, data))
    }

    pub fn send_symlink(&self, path: &str, target: &str) -> Result<()> {
        self.with_state(|state| state.emitter()?.send_symlink(path, target))
    }

    /// Writes all outstanding data about images to the archive and finishes the tar stream.
    ///
    /// No more images can be added after this is called.  Returns the flushed sink.
    pub fn close(&self) -> Result<W> {
        self.with_state(|state| {
            let manifest = state.manifest.to_json()?;
            let repositories = serde_json::to_vec(&state.repositories)
                .map_err(Error::serialization("marshaling repositories"))?;

            let emitter = state.emitter()?;
            emitter.send_bytes(MANIFEST_FILE_NAME, &manifest)?;
            emitter.send_bytes(LEGACY_REPOSITORIES_FILE_NAME, &repositories)?;

            // Mark the writer as closed.
            let emitter = state.emitter.take().ok_or(Error::AlreadyClosed)?;
            emitter.finish()
        })
    }
}
