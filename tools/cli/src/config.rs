//! YAML run configuration.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use backsync_common::Error;
use backsync_storage::BackendConfig;
use backsync_sync::SyncConfig;

/// Default config file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config.yml";

/// Everything one run needs: the two backends and optional engine tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub source: BackendConfig,
    pub target: BackendConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

impl AppConfig {
    /// Read and validate the config file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        let config: AppConfig = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> backsync_common::Result<()> {
        self.source.validate()?;
        self.target.validate()?;
        if self.source.name() == self.target.name() {
            return Err(Error::Config(format!(
                "source and target must have different names, both are '{}'",
                self.source.name()
            )));
        }
        if self.sync.backup_concurrency == 0 || self.sync.diff_concurrency == 0 {
            return Err(Error::Config("concurrency limits must be at least 1".into()));
        }
        Ok(())
    }

    /// Engine settings with the source's exclusion patterns applied.
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            exclude: self.source.exclude().to_vec(),
            ..self.sync.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const DISK_TO_S3: &str = r#"
source:
  type: disk
  name: local
  basePath: /srv/data
  exclude:
    - logs/
    - .cache
target:
  type: s3
  name: offsite
  bucket: backups
  endpoint: https://s3.example.com
  forcePathStyle: true
  credentials:
    accessKeyId: AKIA
    secretAccessKey: secret
"#;

    #[test]
    fn test_parse_defaults() {
        let config = AppConfig::parse(DISK_TO_S3).unwrap();

        assert_eq!(config.source.name(), "local");
        assert_eq!(config.target.name(), "offsite");
        assert_eq!(config.sync.backup_concurrency, 20);
        assert_eq!(config.sync.diff_concurrency, 100);

        let sync = config.sync_config();
        assert_eq!(sync.exclude, vec!["logs/".to_string(), ".cache".to_string()]);
        match config.target {
            BackendConfig::S3(s3) => {
                assert!(s3.force_path_style);
                assert_eq!(s3.region, None);
            }
            other => panic!("expected s3 target, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_sync_overrides() {
        let text = format!("{}sync:\n  backupConcurrency: 4\n", DISK_TO_S3);
        let config = AppConfig::parse(&text).unwrap();

        assert_eq!(config.sync.backup_concurrency, 4);
        assert_eq!(config.sync.diff_concurrency, 100);
    }

    #[test]
    fn test_same_names_rejected() {
        let text = r#"
source:
  type: disk
  name: local
  basePath: /a
target:
  type: disk
  name: local
  basePath: /b
"#;
        let err = AppConfig::parse(text).unwrap_err();
        assert!(err.to_string().contains("different names"));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let text = r#"
source:
  type: ftp
  name: local
target:
  type: disk
  name: copy
  basePath: /b
"#;
        assert!(AppConfig::parse(text).is_err());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let text = format!("{}sync:\n  diffConcurrency: 0\n", DISK_TO_S3);
        assert!(AppConfig::parse(&text).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(DISK_TO_S3.as_bytes()).unwrap();

        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.source.kind(), "disk");

        let missing = AppConfig::load(Path::new("/nonexistent/config.yml"));
        assert!(missing.is_err());
    }
}
