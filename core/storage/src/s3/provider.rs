//! Object-store storage backend.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, trace};

use backsync_common::Result;

use super::client::ObjectClient;
use super::multipart::{upload_multipart, MultipartConfig};
use crate::file::StorageFile;
use crate::provider::{BatchListing, ByteStream, Storage};
use crate::registry::RegistryHandle;

/// S3-compatible storage backend.
///
/// Object keys are the relative file paths. Files below
/// [`MultipartConfig::threshold`] are stored with one streaming put, larger
/// ones through a sequential multipart upload.
pub struct S3Storage {
    name: String,
    client: Arc<dyn ObjectClient>,
    multipart: MultipartConfig,
    registry: RegistryHandle,
}

impl S3Storage {
    /// Create a new object-store backend over `client`.
    pub fn new(
        name: impl Into<String>,
        client: Arc<dyn ObjectClient>,
        registry: RegistryHandle,
    ) -> Self {
        Self {
            name: name.into(),
            client,
            multipart: MultipartConfig::default(),
            registry,
        }
    }

    /// Override the multipart threshold and part size.
    pub fn with_multipart(mut self, multipart: MultipartConfig) -> Self {
        self.multipart = multipart;
        self
    }

    pub fn client(&self) -> &Arc<dyn ObjectClient> {
        &self.client
    }

    /// Key under which this store holds `file`.
    ///
    /// Objects listed from this store keep their raw key, which may differ
    /// from the normalized path (leading slash, doubled separators).
    fn key_of<'f>(&self, file: &'f StorageFile) -> &'f str {
        match file.object_key() {
            Some(key) if file.storage_name() == self.name => key,
            _ => file.path(),
        }
    }
}

#[async_trait]
impl Storage for S3Storage {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_batches(&self) -> Box<dyn BatchListing + '_> {
        Box::new(ObjectListing {
            storage: self,
            marker: None,
            exhausted: false,
        })
    }

    async fn has_file(&self, file: &StorageFile) -> Result<bool> {
        match self.client.head_object(file.path()).await {
            Ok(size) => Ok(size == file.size().await?),
            Err(err) if err.is_not_found() => {
                trace!("{} not found in bucket {}", file.path(), self.client.bucket());
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    async fn put_file(&self, file: &StorageFile) -> Result<()> {
        let size = file.size().await?;

        if size < self.multipart.threshold {
            debug!("uploading {} ({} bytes)", file.path(), size);
            let source = self.registry.open_source(file, None).await?;
            return self.client.put_object(file.path(), source, size).await;
        }

        debug!(
            "uploading {} ({} bytes) in parts of {} bytes",
            file.path(),
            size,
            self.multipart.part_size
        );
        let source = self
            .registry
            .open_source(file, Some(self.multipart.part_size))
            .await?;
        let parts = upload_multipart(
            self.client.as_ref(),
            file.path(),
            source,
            self.multipart.part_size,
        )
        .await?;
        debug!("{} stored in {} parts", file.path(), parts);
        Ok(())
    }

    async fn open_read_stream(
        &self,
        file: &StorageFile,
        _chunk_size: Option<usize>,
    ) -> Result<ByteStream> {
        self.client.get_object(self.key_of(file)).await
    }
}

/// Marker-based listing state: each page is one batch, and the next page
/// starts after the last key of the previous one.
pub struct ObjectListing<'a> {
    storage: &'a S3Storage,
    marker: Option<String>,
    exhausted: bool,
}

#[async_trait]
impl BatchListing for ObjectListing<'_> {
    async fn next_batch(&mut self) -> Result<Option<Vec<StorageFile>>> {
        if self.exhausted {
            return Ok(None);
        }

        let page = self
            .storage
            .client
            .list_objects(self.marker.as_deref())
            .await?;
        let Some(last) = page.last() else {
            debug!("listing of '{}' exhausted", self.storage.name);
            self.exhausted = true;
            return Ok(None);
        };
        self.marker = Some(last.key.clone());

        let batch: Vec<StorageFile> = page
            .into_iter()
            // Zero-byte "folder" placeholders.
            .filter(|object| !object.key.ends_with('/'))
            .map(|object| StorageFile::object(&self.storage.name, object.key, object.size))
            .collect();
        debug!(
            "listed {} objects from '{}' (marker {:?})",
            batch.len(),
            self.storage.name,
            self.marker
        );
        Ok(Some(batch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::DiskStorage;
    use crate::memory::{MemoryObjectClient, MultipartEvent};
    use crate::registry::StorageRegistry;
    use backsync_common::Error;
    use bytes::Bytes;
    use futures::StreamExt;
    use tempfile::TempDir;

    fn s3(registry: &Arc<StorageRegistry>, client: Arc<MemoryObjectClient>) -> Arc<S3Storage> {
        let storage = Arc::new(S3Storage::new("offsite", client, registry.handle()));
        registry.register(storage.clone()).unwrap();
        storage
    }

    #[tokio::test]
    async fn test_listing_follows_marker_pages() {
        let registry = Arc::new(StorageRegistry::new());
        let client = Arc::new(MemoryObjectClient::new("bucket").with_page_size(2));
        for key in ["a.txt", "b/", "b/c.txt", "d.txt", "e.txt"] {
            client.insert(key, Bytes::from_static(b"12345"));
        }
        let storage = s3(&registry, client);

        let mut listing = storage.list_batches();
        let mut batches = Vec::new();
        while let Some(batch) = listing.next_batch().await.unwrap() {
            batches.push(batch.iter().map(|f| f.path().to_string()).collect::<Vec<_>>());
        }

        assert_eq!(
            batches,
            vec![
                vec!["a.txt".to_string()],
                vec!["b/c.txt".to_string(), "d.txt".to_string()],
                vec!["e.txt".to_string()],
            ]
        );
        // Exhausted listings stay exhausted.
        assert!(listing.next_batch().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_has_file_maps_not_found_to_false() {
        let registry = Arc::new(StorageRegistry::new());
        let client = Arc::new(MemoryObjectClient::new("bucket"));
        client.insert("a.txt", Bytes::from_static(b"0123456789"));
        let storage = s3(&registry, client);

        assert!(storage
            .has_file(&StorageFile::object("local", "a.txt", 10))
            .await
            .unwrap());
        assert!(!storage
            .has_file(&StorageFile::object("local", "a.txt", 9))
            .await
            .unwrap());
        assert!(!storage
            .has_file(&StorageFile::object("local", "missing.txt", 10))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_small_file_single_put() {
        let source_dir = TempDir::new().unwrap();
        std::fs::write(source_dir.path().join("a.txt"), b"0123456789").unwrap();

        let registry = Arc::new(StorageRegistry::new());
        let source = Arc::new(DiskStorage::new("local", source_dir.path(), registry.handle()));
        registry.register(source.clone()).unwrap();
        let client = Arc::new(MemoryObjectClient::new("bucket"));
        let target = s3(&registry, client.clone());

        target.put_file(&source.describe("a.txt")).await.unwrap();

        assert_eq!(client.object("a.txt").unwrap(), Bytes::from_static(b"0123456789"));
        assert_eq!(client.completed_puts(), 1);
        assert!(client.multipart_events().is_empty());
    }

    #[tokio::test]
    async fn test_large_file_goes_multipart() {
        let source_dir = TempDir::new().unwrap();
        let data: Vec<u8> = (0..451u32).map(|i| (i % 256) as u8).collect();
        std::fs::write(source_dir.path().join("big.bin"), &data).unwrap();

        let registry = Arc::new(StorageRegistry::new());
        let source = Arc::new(DiskStorage::new("local", source_dir.path(), registry.handle()));
        registry.register(source.clone()).unwrap();
        let client = Arc::new(MemoryObjectClient::new("bucket"));
        let target = Arc::new(
            S3Storage::new("offsite", client.clone(), registry.handle()).with_multipart(
                MultipartConfig {
                    threshold: 400,
                    part_size: 10,
                },
            ),
        );
        registry.register(target.clone()).unwrap();

        target.put_file(&source.describe("big.bin")).await.unwrap();

        assert_eq!(client.object("big.bin").unwrap(), Bytes::from(data));
        assert_eq!(client.completed_puts(), 0);
        let events = client.multipart_events();
        let parts = events
            .iter()
            .filter(|e| matches!(e, MultipartEvent::Part { .. }))
            .count();
        assert_eq!(parts, 46);
        assert!(matches!(
            events.last(),
            Some(MultipartEvent::Completed { parts, .. }) if parts.len() == 46
        ));
    }

    #[tokio::test]
    async fn test_read_stream_of_missing_object() {
        let registry = Arc::new(StorageRegistry::new());
        let storage = s3(&registry, Arc::new(MemoryObjectClient::new("bucket")));

        let result = storage
            .open_read_stream(&StorageFile::object("offsite", "nope", 1), None)
            .await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_unnormalized_keys_are_read_back() {
        let target_dir = TempDir::new().unwrap();
        let registry = Arc::new(StorageRegistry::new());
        let client = Arc::new(MemoryObjectClient::new("bucket"));
        client.insert("/docs/a.txt", Bytes::from_static(b"leading"));
        client.insert("x//y.txt", Bytes::from_static(b"doubled"));
        let source = s3(&registry, client);
        let target = Arc::new(DiskStorage::new("local", target_dir.path(), registry.handle()));
        registry.register(target.clone()).unwrap();

        let mut listing = source.list_batches();
        let batch = listing.next_batch().await.unwrap().unwrap();
        let paths: Vec<&str> = batch.iter().map(|f| f.path()).collect();
        assert_eq!(paths, vec!["docs/a.txt", "x/y.txt"]);

        for file in &batch {
            target.put_file(file).await.unwrap();
            assert!(target.has_file(file).await.unwrap());
        }
        assert_eq!(
            std::fs::read(target_dir.path().join("docs/a.txt")).unwrap(),
            b"leading"
        );
        assert_eq!(
            std::fs::read(target_dir.path().join("x/y.txt")).unwrap(),
            b"doubled"
        );
    }

    #[tokio::test]
    async fn test_object_to_disk_round_trip() {
        let target_dir = TempDir::new().unwrap();
        let registry = Arc::new(StorageRegistry::new());
        let client = Arc::new(MemoryObjectClient::new("bucket"));
        client.insert("docs/report.pdf", Bytes::from(vec![9u8; 200_000]));
        let source = s3(&registry, client);
        let target = Arc::new(DiskStorage::new("local", target_dir.path(), registry.handle()));
        registry.register(target.clone()).unwrap();

        let mut listing = source.list_batches();
        let batch = listing.next_batch().await.unwrap().unwrap();
        target.put_file(&batch[0]).await.unwrap();

        let copied = std::fs::read(target_dir.path().join("docs/report.pdf")).unwrap();
        assert_eq!(copied.len(), 200_000);
        assert!(target.has_file(&batch[0]).await.unwrap());

        let mut stream = source.open_read_stream(&batch[0], None).await.unwrap();
        let mut total = 0;
        while let Some(chunk) = stream.next().await {
            total += chunk.unwrap().len();
        }
        assert_eq!(total, 200_000);
    }
}
