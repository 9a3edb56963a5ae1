//! Backend configuration records.
//!
//! Configs are parsed by the caller (the CLI reads them from YAML); this
//! module only defines their shape and validates them before any backend is
//! built.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use backsync_common::{Error, Result};

/// Region used when an S3 config does not name one.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Configuration for one backend, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    /// Local filesystem tree.
    Disk(DiskConfig),
    /// S3-compatible object store.
    S3(S3Config),
}

/// Filesystem backend settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskConfig {
    pub name: String,
    #[serde(default)]
    pub exclude: Option<Vec<String>>,
    pub base_path: PathBuf,
}

/// Object-store backend settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S3Config {
    pub name: String,
    #[serde(default)]
    pub exclude: Option<Vec<String>>,
    pub bucket: String,
    pub endpoint: String,
    pub credentials: S3Credentials,
    #[serde(default)]
    pub region: Option<String>,
    /// Address buckets as `endpoint/bucket` rather than `bucket.endpoint`.
    #[serde(default)]
    pub force_path_style: bool,
}

/// Static access keys for an object store.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S3Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl fmt::Debug for S3Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .finish()
    }
}

impl BackendConfig {
    /// Backend name, unique within a run.
    pub fn name(&self) -> &str {
        match self {
            BackendConfig::Disk(disk) => &disk.name,
            BackendConfig::S3(s3) => &s3.name,
        }
    }

    /// Substring patterns excluding files from a sync.
    pub fn exclude(&self) -> &[String] {
        let exclude = match self {
            BackendConfig::Disk(disk) => &disk.exclude,
            BackendConfig::S3(s3) => &s3.exclude,
        };
        exclude.as_deref().unwrap_or(&[])
    }

    /// The `type` tag as written in configuration files.
    pub fn kind(&self) -> &'static str {
        match self {
            BackendConfig::Disk(_) => "disk",
            BackendConfig::S3(_) => "s3",
        }
    }

    /// Check that every required field is present and usable.
    ///
    /// # Errors
    /// - `Config` naming the first offending field
    pub fn validate(&self) -> Result<()> {
        require(self.name(), "name")?;
        if self.exclude().iter().any(|pattern| pattern.is_empty()) {
            return Err(Error::Config(format!(
                "{}: exclude patterns cannot be empty",
                self.name()
            )));
        }

        match self {
            BackendConfig::Disk(disk) => {
                if disk.base_path.as_os_str().is_empty() {
                    return Err(Error::Config(format!("{}: basePath is required", disk.name)));
                }
            }
            BackendConfig::S3(s3) => {
                let prefixed = |field: &str| format!("{}: {}", s3.name, field);
                require(&s3.bucket, &prefixed("bucket"))?;
                require(&s3.endpoint, &prefixed("endpoint"))?;
                require(
                    &s3.credentials.access_key_id,
                    &prefixed("credentials.accessKeyId"),
                )?;
                require(
                    &s3.credentials.secret_access_key,
                    &prefixed("credentials.secretAccessKey"),
                )?;
                if let Some(region) = &s3.region {
                    require(region, &prefixed("region"))?;
                }
            }
        }
        Ok(())
    }
}

fn require(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::Config(format!("{} is required", field)));
    }
    Ok(())
}
