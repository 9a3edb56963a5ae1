//! End-to-end backup and diff runs over disk and in-memory object stores.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, StreamExt};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use backsync_common::{Error, Result};
use backsync_storage::{
    BatchListing, ByteStream, DiskStorage, MemoryObjectClient, S3Storage, Storage, StorageFile,
    StorageRegistry,
};
use backsync_sync::{SyncConfig, SyncEngine};

/// Disk source whose read stream for one path breaks after the first chunk.
struct BrokenReadSource {
    inner: DiskStorage,
    broken_path: String,
}

#[async_trait]
impl Storage for BrokenReadSource {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn list_batches(&self) -> Box<dyn BatchListing + '_> {
        self.inner.list_batches()
    }

    async fn has_file(&self, file: &StorageFile) -> Result<bool> {
        self.inner.has_file(file).await
    }

    async fn put_file(&self, file: &StorageFile) -> Result<()> {
        self.inner.put_file(file).await
    }

    async fn open_read_stream(
        &self,
        file: &StorageFile,
        _chunk_size: Option<usize>,
    ) -> Result<ByteStream> {
        let stream = self.inner.open_read_stream(file, Some(4)).await?;
        if file.path() != self.broken_path {
            return Ok(stream);
        }
        let broken = stream.take(1).chain(stream::once(async {
            Err(Error::Transfer("connection reset while reading".into()))
        }));
        Ok(Box::pin(broken))
    }
}

fn broken_source(registry: &Arc<StorageRegistry>, root: &Path) -> Arc<dyn Storage> {
    Arc::new(BrokenReadSource {
        inner: DiskStorage::new("local", root, registry.handle()),
        broken_path: "file03.txt".to_string(),
    })
}

fn ten_files(root: &Path) {
    for i in 1..=10 {
        write(root, &format!("file{:02}.txt", i), b"contents of a numbered file");
    }
}

fn write(root: &Path, path: &str, contents: &[u8]) {
    let full = root.join(path);
    std::fs::create_dir_all(full.parent().unwrap()).unwrap();
    std::fs::write(full, contents).unwrap();
}

fn disk_to_disk(source: &TempDir, target: &TempDir, config: SyncConfig) -> SyncEngine {
    let registry = Arc::new(StorageRegistry::new());
    let source = Arc::new(DiskStorage::new("local", source.path(), registry.handle()));
    let target = Arc::new(DiskStorage::new("mirror", target.path(), registry.handle()));
    SyncEngine::new(registry, source, target, config).unwrap()
}

fn disk_to_bucket(
    source: &TempDir,
    client: Arc<MemoryObjectClient>,
    config: SyncConfig,
) -> SyncEngine {
    let registry = Arc::new(StorageRegistry::new());
    let source = Arc::new(DiskStorage::new("local", source.path(), registry.handle()));
    let target: Arc<dyn Storage> =
        Arc::new(S3Storage::new("offsite", client, registry.handle()));
    SyncEngine::new(registry, source, target, config).unwrap()
}

#[tokio::test]
async fn test_convergence_disk_to_disk() {
    let source = TempDir::new().unwrap();
    let target = TempDir::new().unwrap();
    write(source.path(), "a.txt", b"0123456789");
    write(source.path(), "one/two/three/deep.bin", &[7u8; 4096]);

    let report = disk_to_disk(&source, &target, SyncConfig::default())
        .backup()
        .await
        .unwrap();

    assert_eq!(report.transferred, 2);
    assert_eq!(report.failed, 0);
    let copied = std::fs::read(target.path().join("a.txt")).unwrap();
    assert_eq!(copied, b"0123456789");
    let deep = std::fs::read(target.path().join("one/two/three/deep.bin")).unwrap();
    assert_eq!(deep, vec![7u8; 4096]);
}

#[tokio::test]
async fn test_convergence_disk_to_bucket() {
    let source = TempDir::new().unwrap();
    write(source.path(), "a.txt", b"0123456789");
    write(source.path(), "photos/2024/cat.jpg", &[1u8; 300]);
    let client = Arc::new(MemoryObjectClient::new("backups"));

    let report = disk_to_bucket(&source, client.clone(), SyncConfig::default())
        .backup()
        .await
        .unwrap();

    assert_eq!(report.transferred, 2);
    assert_eq!(client.keys(), vec!["a.txt", "photos/2024/cat.jpg"]);
    assert_eq!(client.object("a.txt").unwrap(), Bytes::from_static(b"0123456789"));
}

#[tokio::test]
async fn test_second_run_transfers_nothing() {
    let source = TempDir::new().unwrap();
    for i in 0..5 {
        write(source.path(), &format!("dir{}/file.txt", i), b"payload");
    }
    let client = Arc::new(MemoryObjectClient::new("backups"));
    let engine = disk_to_bucket(&source, client.clone(), SyncConfig::default());

    let first = engine.backup().await.unwrap();
    assert_eq!(first.transferred, 5);

    let second = engine.backup().await.unwrap();
    assert_eq!(second.transferred, 0);
    assert_eq!(second.skipped, 5);
    assert_eq!(client.completed_puts(), 5);
}

#[tokio::test]
async fn test_exclusion_is_substring_based() {
    let source = TempDir::new().unwrap();
    let target = TempDir::new().unwrap();
    write(source.path(), "logs/app.log", b"noise");
    write(source.path(), "data/logs-note.txt", b"keep me");

    let config = SyncConfig {
        exclude: vec!["logs/".to_string()],
        ..Default::default()
    };
    let report = disk_to_disk(&source, &target, config).backup().await.unwrap();

    assert_eq!(report.excluded, 1);
    assert_eq!(report.transferred, 1);
    assert!(!target.path().join("logs/app.log").exists());
    assert!(target.path().join("data/logs-note.txt").exists());
}

#[tokio::test]
async fn test_one_failed_file_does_not_stop_the_run() {
    let source = TempDir::new().unwrap();
    for i in 1..=10 {
        write(source.path(), &format!("file{:02}.txt", i), b"contents");
    }
    let client = Arc::new(MemoryObjectClient::new("backups"));
    client.fail_writes_to("file03.txt");

    let report = disk_to_bucket(&source, client.clone(), SyncConfig::default())
        .backup()
        .await
        .unwrap();

    assert_eq!(report.transferred, 9);
    assert_eq!(report.failed, 1);
    let keys = client.keys();
    assert_eq!(keys.len(), 9);
    assert!(!keys.iter().any(|key| key == "file03.txt"));
}

#[tokio::test]
async fn test_broken_source_stream_to_disk_is_isolated() {
    let source = TempDir::new().unwrap();
    let target = TempDir::new().unwrap();
    ten_files(source.path());

    let registry = Arc::new(StorageRegistry::new());
    let source_storage = broken_source(&registry, source.path());
    let target_storage: Arc<dyn Storage> =
        Arc::new(DiskStorage::new("mirror", target.path(), registry.handle()));
    let engine =
        SyncEngine::new(registry, source_storage, target_storage, SyncConfig::default()).unwrap();

    let report = engine.backup().await.unwrap();

    assert_eq!(report.transferred, 9);
    assert_eq!(report.failed, 1);
    assert!(!target.path().join("file03.txt").exists());
    // No half-written leftovers either.
    assert_eq!(std::fs::read_dir(target.path()).unwrap().count(), 9);
    assert_eq!(
        std::fs::read(target.path().join("file04.txt")).unwrap(),
        b"contents of a numbered file"
    );
}

#[tokio::test]
async fn test_broken_source_stream_to_bucket_is_isolated() {
    let source = TempDir::new().unwrap();
    ten_files(source.path());
    let client = Arc::new(MemoryObjectClient::new("backups"));

    let registry = Arc::new(StorageRegistry::new());
    let source_storage = broken_source(&registry, source.path());
    let target_storage: Arc<dyn Storage> =
        Arc::new(S3Storage::new("offsite", client.clone(), registry.handle()));
    let engine =
        SyncEngine::new(registry, source_storage, target_storage, SyncConfig::default()).unwrap();

    let report = engine.backup().await.unwrap();

    assert_eq!(report.transferred, 9);
    assert_eq!(report.failed, 1);
    assert!(client.object("file03.txt").is_none());
    assert_eq!(client.keys().len(), 9);
}

#[tokio::test]
async fn test_bucket_keys_with_leading_slash_restore() {
    let target = TempDir::new().unwrap();
    let client = Arc::new(MemoryObjectClient::new("backups"));
    client.insert("/docs/a.txt", Bytes::from_static(b"first"));
    client.insert("x//y.txt", Bytes::from_static(b"second"));

    let registry = Arc::new(StorageRegistry::new());
    let source: Arc<dyn Storage> =
        Arc::new(S3Storage::new("offsite", client, registry.handle()));
    let target_storage = Arc::new(DiskStorage::new("local", target.path(), registry.handle()));
    let engine =
        SyncEngine::new(registry, source, target_storage, SyncConfig::default()).unwrap();

    let report = engine.backup().await.unwrap();

    assert_eq!(report.transferred, 2);
    assert_eq!(report.failed, 0);
    assert_eq!(std::fs::read(target.path().join("docs/a.txt")).unwrap(), b"first");
    assert_eq!(std::fs::read(target.path().join("x/y.txt")).unwrap(), b"second");

    let again = engine.backup().await.unwrap();
    assert_eq!(again.skipped, 2);
}

#[tokio::test]
async fn test_bucket_key_cannot_escape_restore_root() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("root");
    let client = Arc::new(MemoryObjectClient::new("backups"));
    client.insert("../escaped.txt", Bytes::from_static(b"nope"));
    client.insert("kept.txt", Bytes::from_static(b"yes"));

    let registry = Arc::new(StorageRegistry::new());
    let source: Arc<dyn Storage> =
        Arc::new(S3Storage::new("offsite", client, registry.handle()));
    let target_storage = Arc::new(DiskStorage::new("local", &root, registry.handle()));
    let engine =
        SyncEngine::new(registry, source, target_storage, SyncConfig::default()).unwrap();

    let report = engine.backup().await.unwrap();

    assert_eq!(report.transferred, 1);
    assert_eq!(report.failed, 1);
    assert!(!temp.path().join("escaped.txt").exists());
    assert!(root.join("kept.txt").exists());
}

#[tokio::test]
async fn test_concurrent_puts_stay_within_cap() {
    let source = TempDir::new().unwrap();
    for i in 0..45 {
        write(source.path(), &format!("f{:02}.dat", i), &[0u8; 64]);
    }
    let client = Arc::new(
        MemoryObjectClient::new("backups").with_put_delay(Duration::from_millis(20)),
    );

    let report = disk_to_bucket(&source, client.clone(), SyncConfig::default())
        .backup()
        .await
        .unwrap();

    assert_eq!(report.transferred, 45);
    let peak = client.peak_concurrent_puts();
    assert!(peak <= 20, "peak of {} concurrent puts", peak);
    assert!(peak > 1, "puts never overlapped");
}

#[tokio::test]
async fn test_lower_cap_is_honoured() {
    let source = TempDir::new().unwrap();
    for i in 0..12 {
        write(source.path(), &format!("f{:02}.dat", i), b"x");
    }
    let client = Arc::new(
        MemoryObjectClient::new("backups").with_put_delay(Duration::from_millis(10)),
    );
    let config = SyncConfig {
        backup_concurrency: 3,
        ..Default::default()
    };

    disk_to_bucket(&source, client.clone(), config)
        .backup()
        .await
        .unwrap();

    assert!(client.peak_concurrent_puts() <= 3);
    assert_eq!(client.keys().len(), 12);
}

#[tokio::test]
async fn test_diff_from_bucket_in_listing_order() {
    let target = TempDir::new().unwrap();
    write(target.path(), "b.txt", b"bb");
    write(target.path(), "d.txt", b"stale");

    let client = Arc::new(MemoryObjectClient::new("backups").with_page_size(2));
    client.insert("a.txt", Bytes::from_static(b"a"));
    client.insert("b.txt", Bytes::from_static(b"bb"));
    client.insert("c/inner.txt", Bytes::from_static(b"c"));
    client.insert("d.txt", Bytes::from_static(b"dddd"));
    client.insert("tmp/e.txt", Bytes::from_static(b"e"));

    let registry = Arc::new(StorageRegistry::new());
    let source: Arc<dyn Storage> =
        Arc::new(S3Storage::new("offsite", client, registry.handle()));
    let target_storage = Arc::new(DiskStorage::new("local", target.path(), registry.handle()));
    let config = SyncConfig {
        exclude: vec!["tmp/".to_string()],
        ..Default::default()
    };
    let engine = SyncEngine::new(registry, source, target_storage, config).unwrap();

    let mut output = Vec::new();
    let report = engine.diff(&mut output).await.unwrap();

    assert_eq!(
        String::from_utf8(output).unwrap(),
        "a.txt\nc/inner.txt\nd.txt\n"
    );
    assert_eq!(report.missing, 3);
    assert_eq!(report.excluded, 1);
    assert_eq!(report.failed, 0);
}

#[tokio::test]
async fn test_restore_from_bucket_to_disk() {
    let target = TempDir::new().unwrap();
    let client = Arc::new(MemoryObjectClient::new("backups"));
    client.insert("docs/report.txt", Bytes::from_static(b"quarterly"));

    let registry = Arc::new(StorageRegistry::new());
    let source: Arc<dyn Storage> =
        Arc::new(S3Storage::new("offsite", client, registry.handle()));
    let target_storage = Arc::new(DiskStorage::new("local", target.path(), registry.handle()));
    let engine =
        SyncEngine::new(registry, source, target_storage, SyncConfig::default()).unwrap();

    let report = engine.backup().await.unwrap();

    assert_eq!(report.transferred, 1);
    assert_eq!(
        std::fs::read(target.path().join("docs/report.txt")).unwrap(),
        b"quarterly"
    );
}
