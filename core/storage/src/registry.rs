//! Run-scoped registry of storage backends.
//!
//! Backends receive a [`RegistryHandle`] at construction so that a target's
//! `put_file` can open a read stream on the source named by a descriptor,
//! without descriptors carrying live stream handles across backends.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, Weak};

use backsync_common::{Error, Result};

use crate::file::StorageFile;
use crate::provider::{ByteStream, Storage};

/// Anything that names a registered backend.
pub trait StorageKey {
    /// The storage name to resolve.
    fn storage_key(&self) -> &str;
}

impl StorageKey for str {
    fn storage_key(&self) -> &str {
        self
    }
}

impl StorageKey for String {
    fn storage_key(&self) -> &str {
        self
    }
}

impl StorageKey for StorageFile {
    fn storage_key(&self) -> &str {
        self.storage_name()
    }
}

impl StorageKey for dyn Storage {
    fn storage_key(&self) -> &str {
        self.name()
    }
}

/// Registry mapping storage names to backend instances for one run.
///
/// Populated before the pipeline starts and only read afterwards.
pub struct StorageRegistry {
    storages: RwLock<HashMap<String, Arc<dyn Storage>>>,
}

impl StorageRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            storages: RwLock::new(HashMap::new()),
        }
    }

    /// Handle given to backends so they can reach other backends.
    pub fn handle(self: &Arc<Self>) -> RegistryHandle {
        RegistryHandle(Arc::downgrade(self))
    }

    /// Register a backend under its own name.
    ///
    /// Registering the same instance twice is a no-op.
    ///
    /// # Errors
    /// - `DuplicateName` if a different instance already uses the name
    pub fn register(&self, storage: Arc<dyn Storage>) -> Result<()> {
        let mut storages = self
            .storages
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = storages.get(storage.name()) {
            if std::ptr::addr_eq(Arc::as_ptr(existing), Arc::as_ptr(&storage)) {
                return Ok(());
            }
            return Err(Error::DuplicateName(storage.name().to_string()));
        }

        storages.insert(storage.name().to_string(), storage);
        Ok(())
    }

    /// Resolve a name, a descriptor's owner, or a backend's own name.
    pub fn lookup<K: StorageKey + ?Sized>(&self, key: &K) -> Option<Arc<dyn Storage>> {
        self.storages
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key.storage_key())
            .cloned()
    }

    /// Like [`lookup`](Self::lookup), but a missing backend is an error.
    pub fn lookup_or_fail<K: StorageKey + ?Sized>(&self, key: &K) -> Result<Arc<dyn Storage>> {
        self.lookup(key)
            .ok_or_else(|| Error::Lookup(key.storage_key().to_string()))
    }

    /// Get list of registered storage names.
    pub fn names(&self) -> Vec<String> {
        self.storages
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

impl Default for StorageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Non-owning reference from a backend back to its run's registry.
///
/// The registry owns the backends, so backends only keep a weak link.
#[derive(Clone)]
pub struct RegistryHandle(Weak<StorageRegistry>);

impl RegistryHandle {
    /// Resolve a backend, failing if it or the registry is gone.
    pub fn lookup_or_fail<K: StorageKey + ?Sized>(&self, key: &K) -> Result<Arc<dyn Storage>> {
        let registry = self.0.upgrade().ok_or_else(|| {
            Error::Lookup(format!(
                "{} (registry no longer available)",
                key.storage_key()
            ))
        })?;
        registry.lookup_or_fail(key)
    }

    /// Open a read stream on the backend that owns `file`.
    pub async fn open_source(
        &self,
        file: &StorageFile,
        chunk_size: Option<usize>,
    ) -> Result<ByteStream> {
        let source = self.lookup_or_fail(file)?;
        source.open_read_stream(file, chunk_size).await
    }
}
