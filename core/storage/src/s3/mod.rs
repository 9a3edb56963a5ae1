//! S3-compatible object storage backend.
//!
//! This module provides:
//! - An [`ObjectClient`] seam over the handful of S3 calls the backend needs
//! - An aws-sdk-s3 implementation of that seam
//! - Marker-paginated listing and size-aware existence checks
//! - A sequential multipart uploader for large objects

pub mod client;
pub mod multipart;
pub mod provider;

pub use client::{AwsObjectClient, ObjectClient, ObjectSummary, UploadedPart};
pub use multipart::{upload_multipart, MultipartConfig, MultipartUpload, UploadState};
pub use provider::{ObjectListing, S3Storage};
