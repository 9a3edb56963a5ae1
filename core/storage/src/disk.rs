//! Local filesystem storage backend.

use async_trait::async_trait;
use futures::StreamExt;
use std::collections::VecDeque;
use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use backsync_common::{Error, Result};

use crate::file::StorageFile;
use crate::provider::{BatchListing, ByteStream, Storage, DEFAULT_READ_CHUNK};
use crate::registry::RegistryHandle;

/// Files accumulated before a listing batch is handed out.
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Local filesystem storage backend.
///
/// Files are addressed by their path relative to `root`.
pub struct DiskStorage {
    name: String,
    root: PathBuf,
    batch_size: usize,
    registry: RegistryHandle,
}

impl DiskStorage {
    /// Create a disk backend rooted at `root`.
    ///
    /// The root is not created here; a target root is created by the first
    /// `put_file`, a missing source root fails the listing.
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>, registry: RegistryHandle) -> Self {
        Self {
            name: name.into(),
            root: root.as_ref().to_path_buf(),
            batch_size: DEFAULT_BATCH_SIZE,
            registry,
        }
    }

    /// Set how many files a listing batch accumulates before it is emitted.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Root directory of this backend.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Describe the file at a relative path; its size is resolved lazily.
    pub fn describe(&self, path: &str) -> StorageFile {
        let mut absolute = self.root.clone();
        absolute.extend(path.split('/').filter(|c| !c.is_empty()));
        StorageFile::disk(&self.name, path, absolute)
    }

    /// Convert a relative `/`-separated path to a filesystem path below the
    /// root. Segments that would leave the root (`..`, prefixes) are refused.
    fn to_fs_path(&self, path: &str) -> Result<PathBuf> {
        let mut fs_path = self.root.clone();
        for segment in path.split('/').filter(|c| !c.is_empty()) {
            let mut components = Path::new(segment).components();
            match (components.next(), components.next()) {
                (Some(Component::Normal(_)), None) => fs_path.push(segment),
                (Some(Component::CurDir), None) => {}
                _ => {
                    return Err(Error::Transfer(format!(
                        "path {} escapes the root of '{}'",
                        path, self.name
                    )))
                }
            }
        }
        if fs_path == self.root {
            return Err(Error::Transfer(format!(
                "path '{}' does not name a file below '{}'",
                path, self.name
            )));
        }
        Ok(fs_path)
    }

    /// Filesystem path of a file this backend listed itself, or of the same
    /// relative path below the root.
    ///
    /// Listed files keep their exact absolute path, which matters for names
    /// that are not valid UTF-8.
    fn source_path(&self, file: &StorageFile) -> Result<PathBuf> {
        match file.absolute_path() {
            Some(absolute) if file.storage_name() == self.name => Ok(absolute.to_path_buf()),
            _ => self.to_fs_path(file.path()),
        }
    }

    /// Write `source` to `partial`, returning the byte count.
    async fn write_partial(
        &self,
        partial: &Path,
        mut source: ByteStream,
        file: &StorageFile,
    ) -> Result<u64> {
        let mut output = fs::File::create(partial).await?;
        let mut written = 0u64;
        while let Some(chunk) = source.next().await {
            let chunk = chunk?;
            output
                .write_all(&chunk)
                .await
                .map_err(|e| Error::Transfer(format!("writing {}: {}", file.path(), e)))?;
            written += chunk.len() as u64;
        }
        output
            .flush()
            .await
            .map_err(|e| Error::Transfer(format!("flushing {}: {}", file.path(), e)))?;
        Ok(written)
    }

    /// Relative `/`-separated path of an entry below the root.
    fn to_relative(&self, fs_path: &Path) -> String {
        fs_path
            .strip_prefix(&self.root)
            .unwrap_or(fs_path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }
}

#[async_trait]
impl Storage for DiskStorage {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_batches(&self) -> Box<dyn BatchListing + '_> {
        Box::new(DiskListing::new(self))
    }

    async fn has_file(&self, file: &StorageFile) -> Result<bool> {
        let fs_path = self.to_fs_path(file.path())?;

        let meta = match fs::metadata(&fs_path).await {
            Ok(meta) => meta,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(err.into()),
        };
        if !meta.is_file() {
            return Ok(false);
        }

        let local = StorageFile::disk_with_size(&self.name, file.path(), fs_path, meta.len());
        local.is_same_as(file).await
    }

    async fn put_file(&self, file: &StorageFile) -> Result<()> {
        let fs_path = self.to_fs_path(file.path())?;
        let file_name = fs_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| Error::Transfer(format!("{} has no file name", file.path())))?;

        let source = self.registry.open_source(file, None).await?;
        if let Some(parent) = fs_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Hidden sibling, so listings skip it and a failed copy leaves the
        // previous version (or nothing) in place.
        let partial =
            fs_path.with_file_name(format!(".{}.{}.partial", file_name, Uuid::new_v4()));
        let written = match self.write_partial(&partial, source, file).await {
            Ok(written) => written,
            Err(err) => {
                match fs::remove_file(&partial).await {
                    Err(cleanup) if cleanup.kind() != io::ErrorKind::NotFound => {
                        warn!("failed to remove {}: {}", partial.display(), cleanup)
                    }
                    _ => {}
                }
                return Err(err);
            }
        };
        fs::rename(&partial, &fs_path).await?;

        trace!("wrote {} bytes to {}", written, fs_path.display());
        Ok(())
    }

    async fn open_read_stream(
        &self,
        file: &StorageFile,
        chunk_size: Option<usize>,
    ) -> Result<ByteStream> {
        let fs_path = self.source_path(file)?;
        let input = fs::File::open(&fs_path).await?;

        let path = file.path().to_string();
        let stream = ReaderStream::with_capacity(input, chunk_size.unwrap_or(DEFAULT_READ_CHUNK))
            .map(move |chunk| {
                chunk.map_err(|e| Error::Transfer(format!("reading {}: {}", path, e)))
            });
        Ok(Box::pin(stream))
    }
}

/// Breadth-first listing state: directories still to scan and files not yet
/// handed out.
pub struct DiskListing<'a> {
    storage: &'a DiskStorage,
    pending_dirs: VecDeque<PathBuf>,
    batch: Vec<StorageFile>,
}

impl<'a> DiskListing<'a> {
    fn new(storage: &'a DiskStorage) -> Self {
        let mut pending_dirs = VecDeque::new();
        pending_dirs.push_back(storage.root.clone());
        Self {
            storage,
            pending_dirs,
            batch: Vec::new(),
        }
    }

    /// Read one directory, queueing subdirectories and collecting files.
    async fn scan_dir(&mut self, dir: &Path) -> Result<()> {
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            // Removed since it was queued.
            Err(err) if err.kind() == io::ErrorKind::NotFound && dir != self.storage.root => {
                debug!("directory {} vanished during listing", dir.display());
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_name().to_string_lossy().starts_with('.') {
                trace!("skipping hidden entry {}", entry.path().display());
                continue;
            }

            let entry_path = entry.path();
            let file_type = match entry.file_type().await {
                Ok(file_type) => file_type,
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };

            // Symlinks to files are followed; symlinked directories are not,
            // so a link back to an ancestor cannot loop the listing.
            let meta = if file_type.is_symlink() {
                match fs::metadata(&entry_path).await {
                    Ok(meta) if meta.is_dir() => {
                        debug!("skipping symlinked directory {}", entry_path.display());
                        continue;
                    }
                    Ok(meta) => meta,
                    Err(err) => {
                        warn!("skipping unresolvable symlink {}: {}", entry_path.display(), err);
                        continue;
                    }
                }
            } else {
                match entry.metadata().await {
                    Ok(meta) => meta,
                    // Removed mid-listing.
                    Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                    Err(err) => return Err(err.into()),
                }
            };

            if meta.is_dir() {
                self.pending_dirs.push_back(entry_path);
            } else if meta.is_file() {
                let relative = self.storage.to_relative(&entry_path);
                self.batch.push(StorageFile::disk_with_size(
                    &self.storage.name,
                    relative,
                    entry_path,
                    meta.len(),
                ));
            } else {
                trace!("skipping special file {}", entry_path.display());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl BatchListing for DiskListing<'_> {
    async fn next_batch(&mut self) -> Result<Option<Vec<StorageFile>>> {
        while self.batch.len() < self.storage.batch_size {
            let Some(dir) = self.pending_dirs.pop_front() else {
                break;
            };
            trace!("scanning {}", dir.display());
            self.scan_dir(&dir).await?;
        }

        if self.batch.is_empty() {
            debug!("listing of '{}' exhausted", self.storage.name);
            return Ok(None);
        }

        let batch = std::mem::take(&mut self.batch);
        debug!("listed {} files from '{}'", batch.len(), self.storage.name);
        Ok(Some(batch))
    }
}
