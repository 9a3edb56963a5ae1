//! Object store client seam and its aws-sdk-s3 implementation.

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::operation::head_object::HeadObjectError;
use aws_sdk_s3::primitives::ByteStream as SdkByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use aws_smithy_types::body::SdkBody;
use bytes::Bytes;
use futures::channel::mpsc;
use futures::StreamExt;
use http_body::Frame;
use http_body_util::StreamBody;

use backsync_common::{Error, Result};

use crate::config::{S3Config, DEFAULT_REGION};
use crate::provider::ByteStream;

/// Chunks buffered between a source stream and an in-flight put request.
const PUT_BODY_BUFFER: usize = 4;

/// One entry of a listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
}

/// A part accepted by the store, as referenced by the completion call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedPart {
    pub part_number: i32,
    pub e_tag: String,
}

/// The object store operations used by [`S3Storage`](super::S3Storage).
///
/// Every method addresses the client's own bucket. Implementations must be
/// safe to share between concurrent file pipelines.
#[async_trait]
pub trait ObjectClient: Send + Sync {
    /// Bucket this client addresses.
    fn bucket(&self) -> &str;

    /// Fetch one listing page of objects whose keys sort after `marker`.
    ///
    /// An empty page means the listing is complete.
    async fn list_objects(&self, marker: Option<&str>) -> Result<Vec<ObjectSummary>>;

    /// Metadata-only request returning the object's size.
    ///
    /// # Errors
    /// - `NotFound` if the key does not exist
    async fn head_object(&self, key: &str) -> Result<u64>;

    /// Stream the object's contents.
    async fn get_object(&self, key: &str) -> Result<ByteStream>;

    /// Store a whole object in one request, streaming `body`.
    async fn put_object(&self, key: &str, body: ByteStream, content_length: u64) -> Result<()>;

    /// Start a multipart upload and return its upload id.
    async fn create_multipart_upload(&self, key: &str) -> Result<String>;

    /// Upload one part and return its ETag.
    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<String>;

    /// Assemble the uploaded parts into the final object.
    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> Result<()>;

    /// Discard an unfinished upload and its parts.
    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<()>;
}

/// aws-sdk-s3 backed client for AWS S3 and S3-compatible services
/// (MinIO, Cloudflare R2, DigitalOcean Spaces, ...).
pub struct AwsObjectClient {
    client: Client,
    bucket: String,
}

impl AwsObjectClient {
    /// Build a client for the configured endpoint with static credentials.
    pub async fn connect(config: &S3Config) -> Self {
        let region = config
            .region
            .clone()
            .unwrap_or_else(|| DEFAULT_REGION.to_string());

        let shared_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region))
            .endpoint_url(&config.endpoint)
            .load()
            .await;

        let s3_config = aws_sdk_s3::config::Builder::from(&shared_config)
            .credentials_provider(Credentials::new(
                &config.credentials.access_key_id,
                &config.credentials.secret_access_key,
                None,
                None,
                "backsync-static",
            ))
            .force_path_style(config.force_path_style)
            .build();

        Self {
            client: Client::from_conf(s3_config),
            bucket: config.bucket.clone(),
        }
    }

    /// Wrap an already configured SDK client.
    pub fn from_client(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }
}

fn store_error(action: &str, key: &str, err: impl std::error::Error) -> Error {
    Error::ObjectStore(format!("{} {}: {}", action, key, DisplayErrorContext(err)))
}

fn non_negative(value: Option<i64>) -> u64 {
    value.unwrap_or(0).max(0) as u64
}

#[async_trait]
impl ObjectClient for AwsObjectClient {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn list_objects(&self, marker: Option<&str>) -> Result<Vec<ObjectSummary>> {
        let output = self
            .client
            .list_objects()
            .bucket(&self.bucket)
            .set_marker(marker.map(str::to_string))
            .send()
            .await
            .map_err(|err| store_error("list", &self.bucket, err))?;

        Ok(output
            .contents()
            .iter()
            .filter_map(|object| {
                Some(ObjectSummary {
                    key: object.key()?.to_string(),
                    size: non_negative(object.size()),
                })
            })
            .collect())
    }

    async fn head_object(&self, key: &str) -> Result<u64> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => Ok(non_negative(output.content_length())),
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(HeadObjectError::is_not_found) =>
            {
                Err(Error::NotFound(key.to_string()))
            }
            Err(err) => Err(store_error("head", key, err)),
        }
    }

    async fn get_object(&self, key: &str) -> Result<ByteStream> {
        let output = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => output,
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(GetObjectError::is_no_such_key) =>
            {
                return Err(Error::NotFound(key.to_string()));
            }
            Err(err) => return Err(store_error("get", key, err)),
        };

        let key = key.to_string();
        let stream = futures::stream::try_unfold(output.body, move |mut body| {
            let key = key.clone();
            async move {
                let chunk = body
                    .try_next()
                    .await
                    .map_err(|e| Error::Transfer(format!("reading {}: {}", key, e)))?;
                Ok::<_, Error>(chunk.map(|bytes| (bytes, body)))
            }
        });
        Ok(Box::pin(stream))
    }

    async fn put_object(&self, key: &str, body: ByteStream, content_length: u64) -> Result<()> {
        // The SDK needs a Sync body, so the source is pumped through a channel
        // while the request reads from the other end.
        let (sender, receiver) = mpsc::channel::<Result<Frame<Bytes>>>(PUT_BODY_BUFFER);
        let request_body = SdkByteStream::new(SdkBody::from_body_1_x(StreamBody::new(receiver)));

        let upload = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_length(content_length as i64)
            .body(request_body)
            .send();
        let pump = body
            .map(|chunk| Ok::<_, mpsc::SendError>(chunk.map(Frame::data)))
            .forward(sender);

        let (uploaded, pumped) = futures::join!(upload, pump);
        uploaded.map_err(|err| store_error("put", key, err))?;
        pumped.map_err(|_| Error::Transfer(format!("request body for {} closed early", key)))?;
        Ok(())
    }

    async fn create_multipart_upload(&self, key: &str) -> Result<String> {
        let output = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| store_error("create multipart upload", key, err))?;

        output
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| Error::ObjectStore(format!("no upload id returned for {}", key)))
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<String> {
        let output = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .content_length(body.len() as i64)
            .body(SdkByteStream::from(body))
            .send()
            .await
            .map_err(|err| store_error(&format!("upload part {} of", part_number), key, err))?;

        output.e_tag().map(str::to_string).ok_or_else(|| {
            Error::ObjectStore(format!("no ETag returned for part {} of {}", part_number, key))
        })
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> Result<()> {
        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(
                parts
                    .iter()
                    .map(|part| {
                        CompletedPart::builder()
                            .part_number(part.part_number)
                            .e_tag(&part.e_tag)
                            .build()
                    })
                    .collect(),
            ))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(|err| store_error("complete multipart upload", key, err))?;
        Ok(())
    }

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|err| store_error("abort multipart upload", key, err))?;
        Ok(())
    }
}
