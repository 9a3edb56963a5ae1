//! Storage backends for backsync.
//!
//! Every backend implements the [`Storage`] trait: batched listing, an
//! existence check, a streaming copy-in from another backend, and a read
//! stream. Backends of one run share a [`StorageRegistry`] so a backend
//! receiving a file can resolve the backend that owns it.
//!
//! # Backends
//! - [`DiskStorage`]: a directory tree on the local filesystem
//! - [`S3Storage`]: a bucket on an S3-compatible object store
//! - [`MemoryObjectClient`]: an in-memory bucket for tests

pub mod config;
pub mod disk;
pub mod factory;
pub mod file;
pub mod memory;
pub mod provider;
pub mod registry;
pub mod s3;

pub use config::{BackendConfig, DiskConfig, S3Config, S3Credentials, DEFAULT_REGION};
pub use disk::DiskStorage;
pub use factory::create_storage;
pub use file::{normalize_path, StorageFile};
pub use memory::{MemoryObjectClient, MultipartEvent};
pub use provider::{BatchListing, ByteStream, Storage, DEFAULT_READ_CHUNK};
pub use registry::{RegistryHandle, StorageKey, StorageRegistry};
pub use s3::{
    AwsObjectClient, MultipartConfig, ObjectClient, ObjectSummary, S3Storage, UploadedPart,
};
