//! Error types for the archive writer.
//!
//! Every fallible operation returns [`Result<T>`], an alias for `Result<T, Error>`.
//!
//! # Error Categories
//!
//! - **Input errors**: [`InvalidDigest`], [`MissingDigest`], [`InvalidReference`]
//! - **Encoding errors**: [`Serialization`]
//! - **Output errors**: [`SizeMismatch`], [`Io`]
//! - **State errors**: [`InternalInconsistency`], [`AlreadyClosed`], [`Poisoned`]
//!
//! Output errors leave the archive in an undefined state; the writer refuses any further work
//! after one of them (see [`Poisoned`]).
//!
//! [`InvalidDigest`]: Error::InvalidDigest
//! [`MissingDigest`]: Error::MissingDigest
//! [`InvalidReference`]: Error::InvalidReference
//! [`Serialization`]: Error::Serialization
//! [`SizeMismatch`]: Error::SizeMismatch
//! [`Io`]: Error::Io
//! [`InternalInconsistency`]: Error::InternalInconsistency
//! [`AlreadyClosed`]: Error::AlreadyClosed
//! [`Poisoned`]: Error::Poisoned

/// Result type alias for archive writer operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for archive writer operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A digest was malformed where a canonical digest is required.
    #[error("invalid digest {digest:?}: {reason}")]
    InvalidDigest {
        digest: String,
        reason: String,
    },

    /// A blob lookup was attempted without a digest.
    #[error("can not check for a blob with unknown digest")]
    MissingDigest,

    /// A repository tag reference could not be parsed.
    #[error("invalid reference {0:?}: expected NAME:TAG")]
    InvalidReference(String),

    /// Structured data could not be encoded or the image config could not be decoded.
    #[error("{what}: {source}")]
    Serialization {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// The body streamed into an entry did not match its declared size.
    #[error("size mismatch when copying {path}, expected {expected}, got {actual}")]
    SizeMismatch {
        path: String,
        expected: u64,
        /// For an overlong body this is `expected + 1`: reading stops at the first excess byte.
        actual: u64,
    },

    /// Two images presented the same config digest with different contents.
    #[error("internal error: {0}")]
    InternalInconsistency(String),

    /// The writer has already been closed.
    #[error("internal error: trying to use an already closed archive writer")]
    AlreadyClosed,

    /// An earlier failure left the archive in an undefined state.
    #[error("archive writer is unusable after an earlier write failure")]
    Poisoned,

    /// I/O error from the underlying sink or a blob stream.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn serialization(what: &'static str) -> impl FnOnce(serde_json::Error) -> Self {
        move |source| Error::Serialization { what, source }
    }

    /// Whether this error was raised after output may have been partially written.
    pub(crate) fn corrupts_output(&self) -> bool {
        matches!(self, Error::Io(_) | Error::SizeMismatch { .. })
    }
}
