//! Storage backend trait definition.

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;

use backsync_common::Result;

use crate::file::StorageFile;

/// Read buffer size used when the caller gives no chunk-size hint.
pub const DEFAULT_READ_CHUNK: usize = 64 * 1024;

/// Byte stream type for moving file contents between backends.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// A forward-only, finite sequence of file batches.
///
/// A listing cannot be rewound; asking the backend for a new listing starts
/// over from the beginning. Batch sizes are a backend tuning detail.
#[async_trait]
pub trait BatchListing: Send {
    /// Fetch the next batch, or `None` once the backend is exhausted.
    async fn next_batch(&mut self) -> Result<Option<Vec<StorageFile>>>;
}

/// Storage backend trait.
///
/// Implementations are shared across concurrent file pipelines and must only
/// hold state that is safe for concurrent use (client handles, settings).
#[async_trait]
pub trait Storage: Send + Sync {
    /// Unique name of this backend within a run.
    fn name(&self) -> &str;

    /// Start a new listing of every file this backend holds.
    fn list_batches(&self) -> Box<dyn BatchListing + '_>;

    /// Check whether this backend already holds an equal copy of `file`.
    ///
    /// # Errors
    /// Anything other than an explicit "not found" is returned to the caller.
    async fn has_file(&self, file: &StorageFile) -> Result<bool>;

    /// Copy `file` from its owning backend into this one at the same path.
    ///
    /// The source is resolved through the run's registry using
    /// `file.storage_name()`. Intermediate structure is created as needed.
    async fn put_file(&self, file: &StorageFile) -> Result<()>;

    /// Open a byte stream over a file this backend owns.
    ///
    /// `chunk_size` is a read-size hint for callers that consume the stream
    /// in fixed-size pieces.
    async fn open_read_stream(
        &self,
        file: &StorageFile,
        chunk_size: Option<usize>,
    ) -> Result<ByteStream>;
}
