//! Sequential multipart upload of large objects.
//!
//! A session moves `Created -> Uploading(n) -> Completed`, or to `Aborted`
//! when a part fails. Parts are sent one at a time, numbered `1..=N` without
//! gaps, and the upload is completed exactly once after the last part.

use bytes::BytesMut;
use futures::StreamExt;
use tracing::{debug, warn};

use backsync_common::{Error, Result};

use super::client::{ObjectClient, UploadedPart};
use crate::provider::ByteStream;

/// Objects at least this large are uploaded in parts (400 MiB).
pub const MULTIPART_THRESHOLD: u64 = 400 * 1024 * 1024;

/// Size of every part except the last (10 MiB).
pub const PART_SIZE: usize = 10 * 1024 * 1024;

/// When to switch to multipart uploads and how large parts are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultipartConfig {
    pub threshold: u64,
    pub part_size: usize,
}

impl Default for MultipartConfig {
    fn default() -> Self {
        Self {
            threshold: MULTIPART_THRESHOLD,
            part_size: PART_SIZE,
        }
    }
}

/// Lifecycle of one multipart session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    /// Upload id obtained, no part sent yet.
    Created,
    /// Parts `1..n` accepted; `n` is the next part number.
    Uploading(i32),
    /// Completion call succeeded.
    Completed,
    /// Session discarded.
    Aborted,
}

/// One multipart session against a single key.
pub struct MultipartUpload<'a> {
    client: &'a dyn ObjectClient,
    key: &'a str,
    upload_id: String,
    parts: Vec<UploadedPart>,
    state: UploadState,
}

impl<'a> MultipartUpload<'a> {
    /// Open a session with a create-multipart-upload call.
    pub async fn create(client: &'a dyn ObjectClient, key: &'a str) -> Result<Self> {
        let upload_id = client.create_multipart_upload(key).await?;
        debug!("created multipart upload {} ({})", upload_id, key);
        Ok(Self {
            client,
            key,
            upload_id,
            parts: Vec::new(),
            state: UploadState::Created,
        })
    }

    pub fn state(&self) -> UploadState {
        self.state
    }

    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    /// Parts accepted so far, in part-number order.
    pub fn parts(&self) -> &[UploadedPart] {
        &self.parts
    }

    /// Send the next part and record its ETag at index `part_number - 1`.
    pub async fn upload_part(&mut self, body: bytes::Bytes) -> Result<()> {
        let part_number = match self.state {
            UploadState::Created => 1,
            UploadState::Uploading(next) => next,
            state => {
                return Err(Error::Transfer(format!(
                    "cannot upload a part of {} in state {:?}",
                    self.key, state
                )))
            }
        };

        debug!(
            "sending multipart chunk {} ({} bytes, {})",
            part_number,
            body.len(),
            self.key
        );
        let e_tag = self
            .client
            .upload_part(self.key, &self.upload_id, part_number, body)
            .await?;
        debug!("multipart chunk {} uploaded ({})", part_number, self.key);

        self.parts.push(UploadedPart {
            part_number,
            e_tag,
        });
        self.state = UploadState::Uploading(part_number + 1);
        Ok(())
    }

    /// Issue the single completion call over the contiguous parts list.
    pub async fn complete(&mut self) -> Result<usize> {
        let UploadState::Uploading(_) = self.state else {
            return Err(Error::Transfer(format!(
                "cannot complete upload of {} in state {:?}",
                self.key, self.state
            )));
        };
        debug_assert!(self
            .parts
            .iter()
            .enumerate()
            .all(|(index, part)| part.part_number == index as i32 + 1));

        self.client
            .complete_multipart_upload(self.key, &self.upload_id, &self.parts)
            .await?;
        self.state = UploadState::Completed;
        debug!(
            "multipart upload of {} completed with {} parts",
            self.key,
            self.parts.len()
        );
        Ok(self.parts.len())
    }

    /// Discard the session. An abort failure is logged, not returned.
    pub async fn abort(&mut self) {
        if matches!(self.state, UploadState::Completed | UploadState::Aborted) {
            return;
        }
        if let Err(err) = self
            .client
            .abort_multipart_upload(self.key, &self.upload_id)
            .await
        {
            warn!("failed to abort multipart upload of {}: {}", self.key, err);
        }
        self.state = UploadState::Aborted;
    }

    /// Re-chunk `source` into `part_size` pieces and send them in order.
    async fn send_parts(&mut self, source: &mut ByteStream, part_size: usize) -> Result<()> {
        let mut buffer = BytesMut::with_capacity(part_size);

        while let Some(chunk) = source.next().await {
            buffer.extend_from_slice(&chunk?);

            while buffer.len() >= part_size {
                let part = buffer.split_to(part_size).freeze();
                self.upload_part(part).await?;
            }
        }

        if !buffer.is_empty() {
            self.upload_part(buffer.freeze()).await?;
        }
        Ok(())
    }
}

/// Upload `source` to `key` in `part_size` parts; returns the part count.
///
/// Any failure aborts the session so no partial object becomes visible.
pub async fn upload_multipart(
    client: &dyn ObjectClient,
    key: &str,
    mut source: ByteStream,
    part_size: usize,
) -> Result<usize> {
    let mut upload = MultipartUpload::create(client, key).await?;

    let result = match upload.send_parts(&mut source, part_size.max(1)).await {
        Ok(()) if upload.parts().is_empty() => Err(Error::Transfer(format!(
            "source for {} produced no data",
            key
        ))),
        Ok(()) => upload.complete().await,
        Err(err) => Err(err),
    };

    if result.is_err() {
        upload.abort().await;
    }
    result
}
