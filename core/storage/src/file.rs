//! File descriptors produced by backend listings.

use std::path::{Path, PathBuf};
use tokio::sync::OnceCell;

use backsync_common::{Error, Result};

/// Where a descriptor's bytes live, and what is needed to learn their size.
#[derive(Debug, Clone)]
enum Location {
    /// A regular file under a disk backend's root. Size is stat'ed at most once.
    Disk {
        absolute: PathBuf,
        size: OnceCell<u64>,
    },
    /// An object whose size came with the listing page or the metadata request.
    /// `key` is the key exactly as the store reported it.
    Object { key: String, size: u64 },
}

/// A file known to one backend: owning storage name, relative path and size.
///
/// `storage_name` is only used to find the owning backend through the
/// registry; the descriptor never holds a handle to it.
#[derive(Debug, Clone)]
pub struct StorageFile {
    storage_name: String,
    path: String,
    location: Location,
}

impl StorageFile {
    /// Describe a disk file whose size will be resolved on first access.
    pub fn disk(
        storage_name: impl Into<String>,
        path: impl AsRef<str>,
        absolute: impl Into<PathBuf>,
    ) -> Self {
        Self {
            storage_name: storage_name.into(),
            path: normalize_path(path.as_ref()),
            location: Location::Disk {
                absolute: absolute.into(),
                size: OnceCell::new(),
            },
        }
    }

    /// Describe a disk file whose size is already known from a stat call.
    pub fn disk_with_size(
        storage_name: impl Into<String>,
        path: impl AsRef<str>,
        absolute: impl Into<PathBuf>,
        size: u64,
    ) -> Self {
        Self {
            storage_name: storage_name.into(),
            path: normalize_path(path.as_ref()),
            location: Location::Disk {
                absolute: absolute.into(),
                size: OnceCell::new_with(Some(size)),
            },
        }
    }

    /// Describe an object-store object.
    ///
    /// The path is the normalized key; the raw key is kept for reading the
    /// object back from its own store.
    pub fn object(storage_name: impl Into<String>, key: impl Into<String>, size: u64) -> Self {
        let key = key.into();
        Self {
            storage_name: storage_name.into(),
            path: normalize_path(&key),
            location: Location::Object { key, size },
        }
    }

    /// Name of the backend that owns this file.
    pub fn storage_name(&self) -> &str {
        &self.storage_name
    }

    /// Relative, `/`-separated path without a leading slash.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Absolute filesystem path, for disk files.
    pub fn absolute_path(&self) -> Option<&Path> {
        match &self.location {
            Location::Disk { absolute, .. } => Some(absolute),
            Location::Object { .. } => None,
        }
    }

    /// Key in the owning object store, for objects.
    pub fn object_key(&self) -> Option<&str> {
        match &self.location {
            Location::Disk { .. } => None,
            Location::Object { key, .. } => Some(key),
        }
    }

    /// Size in bytes, resolved once and cached.
    pub async fn size(&self) -> Result<u64> {
        match &self.location {
            Location::Disk { absolute, size } => size
                .get_or_try_init(|| async {
                    let meta = tokio::fs::metadata(absolute).await?;
                    Ok::<u64, Error>(meta.len())
                })
                .await
                .copied(),
            Location::Object { size, .. } => Ok(*size),
        }
    }

    /// Whether both descriptors name the same relative path with the same size.
    ///
    /// This is the only "already backed up" test; contents are not hashed.
    pub async fn is_same_as(&self, other: &StorageFile) -> Result<bool> {
        if self.path != other.path {
            return Ok(false);
        }
        Ok(self.size().await? == other.size().await?)
    }
}

/// Normalize a path to `/` separators, no empty or `.` segments and no
/// leading slash. `..` segments are kept; disk backends refuse them.
pub fn normalize_path(raw: &str) -> String {
    raw.split(['/', '\\'])
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}
