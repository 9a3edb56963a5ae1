//! In-memory object store client for testing.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use uuid::Uuid;

use backsync_common::{Error, Result};

use crate::provider::{ByteStream, DEFAULT_READ_CHUNK};
use crate::s3::client::{ObjectClient, UploadedPart};
use crate::s3::ObjectSummary;

/// Keys per listing page when none is configured (S3's own default).
const DEFAULT_PAGE_SIZE: usize = 1000;

/// Multipart calls observed by a [`MemoryObjectClient`], in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MultipartEvent {
    Created { key: String },
    Part { key: String, part_number: i32, size: usize },
    Completed { key: String, parts: Vec<i32> },
    Aborted { key: String },
}

#[derive(Debug, Default)]
struct PendingUpload {
    key: String,
    parts: BTreeMap<i32, (String, Bytes)>,
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<String, Bytes>,
    uploads: HashMap<String, PendingUpload>,
    failing_keys: HashSet<String>,
    events: Vec<MultipartEvent>,
}

/// In-memory object store.
///
/// Behaves like a single bucket: marker-paginated listing, "not found" on
/// missing keys, and multipart uploads that only become visible once
/// completed. It also records multipart calls and the peak number of
/// concurrent `put_object` calls so tests can assert on them.
pub struct MemoryObjectClient {
    bucket: String,
    page_size: usize,
    put_delay: Option<Duration>,
    state: Mutex<State>,
    puts_in_flight: AtomicUsize,
    peak_puts: AtomicUsize,
    completed_puts: AtomicUsize,
}

impl MemoryObjectClient {
    /// Create a new empty bucket.
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            page_size: DEFAULT_PAGE_SIZE,
            put_delay: None,
            state: Mutex::new(State::default()),
            puts_in_flight: AtomicUsize::new(0),
            peak_puts: AtomicUsize::new(0),
            completed_puts: AtomicUsize::new(0),
        }
    }

    /// Limit how many keys a listing page returns.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Hold every `put_object` open for `delay`, so overlapping puts are observable.
    pub fn with_put_delay(mut self, delay: Duration) -> Self {
        self.put_delay = Some(delay);
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store an object directly.
    pub fn insert(&self, key: impl Into<String>, data: impl Into<Bytes>) {
        self.state().objects.insert(key.into(), data.into());
    }

    /// Contents of a stored object.
    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.state().objects.get(key).cloned()
    }

    /// All stored keys in lexical order.
    pub fn keys(&self) -> Vec<String> {
        self.state().objects.keys().cloned().collect()
    }

    /// Make every write to `key` (put or part upload) fail.
    pub fn fail_writes_to(&self, key: impl Into<String>) {
        self.state().failing_keys.insert(key.into());
    }

    /// Multipart calls seen so far.
    pub fn multipart_events(&self) -> Vec<MultipartEvent> {
        self.state().events.clone()
    }

    /// Highest number of `put_object` calls that were in flight at once.
    pub fn peak_concurrent_puts(&self) -> usize {
        self.peak_puts.load(Ordering::SeqCst)
    }

    /// Number of `put_object` calls that stored an object.
    pub fn completed_puts(&self) -> usize {
        self.completed_puts.load(Ordering::SeqCst)
    }

    fn check_writable(&self, key: &str) -> Result<()> {
        if self.state().failing_keys.contains(key) {
            return Err(Error::ObjectStore(format!(
                "write to {} rejected (injected failure)",
                key
            )));
        }
        Ok(())
    }

    async fn receive_body(&self, key: &str, mut body: ByteStream, content_length: u64) -> Result<()> {
        if let Some(delay) = self.put_delay {
            tokio::time::sleep(delay).await;
        } else {
            tokio::task::yield_now().await;
        }

        let mut data = BytesMut::new();
        while let Some(chunk) = body.next().await {
            data.extend_from_slice(&chunk?);
        }
        if data.len() as u64 != content_length {
            return Err(Error::ObjectStore(format!(
                "put {}: expected {} bytes, received {}",
                key,
                content_length,
                data.len()
            )));
        }
        self.check_writable(key)?;

        self.state().objects.insert(key.to_string(), data.freeze());
        Ok(())
    }
}

/// Decrements the in-flight counter however the put ends.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectClient for MemoryObjectClient {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn list_objects(&self, marker: Option<&str>) -> Result<Vec<ObjectSummary>> {
        let state = self.state();
        let lower = match marker {
            Some(marker) => Bound::Excluded(marker.to_string()),
            None => Bound::Unbounded,
        };
        Ok(state
            .objects
            .range((lower, Bound::Unbounded))
            .take(self.page_size)
            .map(|(key, data)| ObjectSummary {
                key: key.clone(),
                size: data.len() as u64,
            })
            .collect())
    }

    async fn head_object(&self, key: &str) -> Result<u64> {
        self.state()
            .objects
            .get(key)
            .map(|data| data.len() as u64)
            .ok_or_else(|| Error::NotFound(key.to_string()))
    }

    async fn get_object(&self, key: &str) -> Result<ByteStream> {
        let data = self
            .object(key)
            .ok_or_else(|| Error::NotFound(key.to_string()))?;

        let chunks: Vec<Result<Bytes>> = (0..data.len())
            .step_by(DEFAULT_READ_CHUNK)
            .map(|start| Ok(data.slice(start..(start + DEFAULT_READ_CHUNK).min(data.len()))))
            .collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    async fn put_object(&self, key: &str, body: ByteStream, content_length: u64) -> Result<()> {
        let now = self.puts_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.puts_in_flight);
        self.peak_puts.fetch_max(now, Ordering::SeqCst);

        self.receive_body(key, body, content_length).await?;
        self.completed_puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn create_multipart_upload(&self, key: &str) -> Result<String> {
        let upload_id = Uuid::new_v4().to_string();
        let mut state = self.state();
        state.uploads.insert(
            upload_id.clone(),
            PendingUpload {
                key: key.to_string(),
                parts: BTreeMap::new(),
            },
        );
        state.events.push(MultipartEvent::Created {
            key: key.to_string(),
        });
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<String> {
        self.check_writable(key)?;
        tokio::task::yield_now().await;

        let mut state = self.state();
        let upload = state
            .uploads
            .get_mut(upload_id)
            .filter(|upload| upload.key == key)
            .ok_or_else(|| Error::NotFound(format!("upload {} for {}", upload_id, key)))?;

        let e_tag = format!("\"{}-{}\"", part_number, body.len());
        let size = body.len();
        upload.parts.insert(part_number, (e_tag.clone(), body));
        state.events.push(MultipartEvent::Part {
            key: key.to_string(),
            part_number,
            size,
        });
        Ok(e_tag)
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> Result<()> {
        let mut state = self.state();
        let upload = state
            .uploads
            .remove(upload_id)
            .filter(|upload| upload.key == key)
            .ok_or_else(|| Error::NotFound(format!("upload {} for {}", upload_id, key)))?;

        let mut data = BytesMut::new();
        for (index, part) in parts.iter().enumerate() {
            if part.part_number != index as i32 + 1 {
                return Err(Error::ObjectStore(format!(
                    "complete {}: part {} listed at position {}",
                    key,
                    part.part_number,
                    index + 1
                )));
            }
            match upload.parts.get(&part.part_number) {
                Some((e_tag, body)) if *e_tag == part.e_tag => data.extend_from_slice(body),
                _ => {
                    return Err(Error::ObjectStore(format!(
                        "complete {}: invalid part {}",
                        key, part.part_number
                    )))
                }
            }
        }

        state.objects.insert(key.to_string(), data.freeze());
        state.events.push(MultipartEvent::Completed {
            key: key.to_string(),
            parts: parts.iter().map(|p| p.part_number).collect(),
        });
        Ok(())
    }

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<()> {
        let mut state = self.state();
        state.uploads.remove(upload_id);
        state.events.push(MultipartEvent::Aborted {
            key: key.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pagination_with_marker() {
        let client = MemoryObjectClient::new("bucket").with_page_size(2);
        for key in ["a", "b", "c", "d", "e"] {
            client.insert(key, Bytes::from_static(b"x"));
        }

        let first = client.list_objects(None).await.unwrap();
        assert_eq!(first.len(), 2);
        let second = client
            .list_objects(Some(first[1].key.as_str()))
            .await
            .unwrap();
        assert_eq!(second[0].key, "c");
        let last = client.list_objects(Some("e")).await.unwrap();
        assert!(last.is_empty());
    }

    #[tokio::test]
    async fn test_head_missing_is_not_found() {
        let client = MemoryObjectClient::new("bucket");
        let err = client.head_object("nope").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_put_checks_length() {
        let client = MemoryObjectClient::new("bucket");
        let body: ByteStream = Box::pin(futures::stream::iter(vec![Ok(Bytes::from_static(b"abc"))]));
        assert!(client.put_object("k", body, 4).await.is_err());
        assert!(client.object("k").is_none());
    }

    #[tokio::test]
    async fn test_incomplete_upload_is_invisible() {
        let client = MemoryObjectClient::new("bucket");
        let upload_id = client.create_multipart_upload("k").await.unwrap();
        client
            .upload_part("k", &upload_id, 1, Bytes::from_static(b"abc"))
            .await
            .unwrap();

        assert!(client.object("k").is_none());
        client.abort_multipart_upload("k", &upload_id).await.unwrap();
        assert!(client.keys().is_empty());
    }
}
