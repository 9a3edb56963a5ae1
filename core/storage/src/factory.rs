//! Build backends from configuration and register them for the run.

use std::sync::Arc;
use tracing::debug;

use backsync_common::Result;

use crate::config::BackendConfig;
use crate::disk::DiskStorage;
use crate::provider::Storage;
use crate::registry::StorageRegistry;
use crate::s3::{AwsObjectClient, S3Storage};

/// Validate `config`, build the matching backend and register it.
///
/// # Errors
/// - `Config` if the configuration is incomplete
/// - `DuplicateName` if another backend already uses the name
pub async fn create_storage(
    config: &BackendConfig,
    registry: &Arc<StorageRegistry>,
) -> Result<Arc<dyn Storage>> {
    config.validate()?;
    debug!("creating {} storage '{}'", config.kind(), config.name());

    let storage: Arc<dyn Storage> = match config {
        BackendConfig::Disk(disk) => Arc::new(DiskStorage::new(
            &disk.name,
            &disk.base_path,
            registry.handle(),
        )),
        BackendConfig::S3(s3) => {
            let client = AwsObjectClient::connect(s3).await;
            Arc::new(S3Storage::new(&s3.name, Arc::new(client), registry.handle()))
        }
    };

    registry.register(storage.clone())?;
    Ok(storage)
}
