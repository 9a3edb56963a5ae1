//! Sync engine driving backup and diff runs between two backends.

use futures::{future, stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, info, trace};

use backsync_common::{Error, Result};
use backsync_storage::{BatchListing, Storage, StorageFile, StorageRegistry};

use crate::filter::ExclusionFilter;
use crate::report::{DiffReport, SyncReport};

/// Default number of files checked or copied at once during a backup.
pub const DEFAULT_BACKUP_CONCURRENCY: usize = 20;

/// Default number of existence checks in flight during a diff.
pub const DEFAULT_DIFF_CONCURRENCY: usize = 100;

/// Configuration for the sync engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncConfig {
    /// Maximum file pipelines in the check/copy stage per batch.
    pub backup_concurrency: usize,
    /// Maximum existence checks in flight per batch in diff mode.
    pub diff_concurrency: usize,
    /// Substring patterns; taken from the source backend config.
    #[serde(skip)]
    pub exclude: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            backup_concurrency: DEFAULT_BACKUP_CONCURRENCY,
            diff_concurrency: DEFAULT_DIFF_CONCURRENCY,
            exclude: Vec::new(),
        }
    }
}

/// What happened to one file during a backup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileOutcome {
    Transferred,
    Skipped,
    Failed,
}

/// Copies every file the target lacks from the source to the target.
pub struct SyncEngine {
    registry: Arc<StorageRegistry>,
    source: Arc<dyn Storage>,
    target: Arc<dyn Storage>,
    filter: ExclusionFilter,
    config: SyncConfig,
}

impl SyncEngine {
    /// Create an engine for one run, registering both backends.
    ///
    /// # Errors
    /// - `Config` if source and target share a name
    /// - `DuplicateName` if another backend is registered under either name
    pub fn new(
        registry: Arc<StorageRegistry>,
        source: Arc<dyn Storage>,
        target: Arc<dyn Storage>,
        config: SyncConfig,
    ) -> Result<Self> {
        if source.name() == target.name() {
            return Err(Error::Config(format!(
                "source and target are both named '{}'",
                source.name()
            )));
        }
        registry.register(source.clone())?;
        registry.register(target.clone())?;

        Ok(Self {
            registry,
            source,
            target,
            filter: ExclusionFilter::new(config.exclude.iter().cloned()),
            config,
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<StorageRegistry> {
        &self.registry
    }

    /// Copy every non-excluded source file the target does not hold.
    ///
    /// Per-file failures are logged and counted; they never stop the run.
    ///
    /// # Errors
    /// - `Fatal` if the source listing fails
    pub async fn backup(&self) -> Result<SyncReport> {
        let started = Instant::now();
        let mut report = SyncReport::default();
        let concurrency = self.config.backup_concurrency.max(1);

        info!(
            "starting backup from '{}' to '{}'",
            self.source.name(),
            self.target.name()
        );

        let mut listing = self.source.list_batches();
        let mut batch_number = 0usize;
        while let Some(batch) = self.next_batch(listing.as_mut(), batch_number).await? {
            batch_number += 1;
            let candidates = self.apply_filter(batch, &mut report.excluded);

            stream::iter(candidates)
                .map(|file| self.backup_file(file))
                .buffer_unordered(concurrency)
                .for_each(|outcome| {
                    match outcome {
                        FileOutcome::Transferred => report.transferred += 1,
                        FileOutcome::Skipped => report.skipped += 1,
                        FileOutcome::Failed => report.failed += 1,
                    }
                    future::ready(())
                })
                .await;
        }

        report.elapsed = started.elapsed();
        info!(
            "backup completed in {}: {} transferred, {} skipped, {} excluded, {} failed",
            report.elapsed_clock(),
            report.transferred,
            report.skipped,
            report.excluded,
            report.failed
        );
        Ok(report)
    }

    /// Write the path of every non-excluded source file the target lacks to
    /// `sink`, one per line, in listing order.
    ///
    /// The sink is flushed and shut down after the last batch.
    ///
    /// # Errors
    /// - `Fatal` if the source listing fails or the sink cannot be written
    pub async fn diff<W>(&self, sink: &mut W) -> Result<DiffReport>
    where
        W: AsyncWrite + Unpin,
    {
        let started = Instant::now();
        let mut report = DiffReport::default();
        let concurrency = self.config.diff_concurrency.max(1);

        info!(
            "comparing '{}' against '{}'",
            self.source.name(),
            self.target.name()
        );

        let mut listing = self.source.list_batches();
        let mut batch_number = 0usize;
        while let Some(batch) = self.next_batch(listing.as_mut(), batch_number).await? {
            batch_number += 1;
            let candidates = self.apply_filter(batch, &mut report.excluded);

            let mut checks = stream::iter(candidates)
                .map(|file| async move {
                    let present = self.target.has_file(&file).await;
                    (file, present)
                })
                .buffered(concurrency);

            while let Some((file, present)) = checks.next().await {
                match present {
                    Ok(true) => trace!("{} present on '{}'", file.path(), self.target.name()),
                    Ok(false) => {
                        debug!("{} missing from '{}'", file.path(), self.target.name());
                        let line = format!("{}\n", file.path());
                        sink.write_all(line.as_bytes()).await.map_err(|err| {
                            Error::Fatal(format!("cannot write diff output: {}", err))
                        })?;
                        report.missing += 1;
                    }
                    Err(err) => {
                        error!(error = ?err, "failed to check {}: {:#}", file.path(), err);
                        report.failed += 1;
                    }
                }
            }
        }

        sink.flush()
            .await
            .map_err(|err| Error::Fatal(format!("cannot flush diff output: {}", err)))?;
        sink.shutdown()
            .await
            .map_err(|err| Error::Fatal(format!("cannot close diff output: {}", err)))?;

        report.elapsed = started.elapsed();
        info!(
            "differences completed in {}: {} missing, {} excluded, {} failed",
            report.elapsed_clock(),
            report.missing,
            report.excluded,
            report.failed
        );
        Ok(report)
    }

    async fn next_batch(
        &self,
        listing: &mut (dyn BatchListing + '_),
        batch_number: usize,
    ) -> Result<Option<Vec<StorageFile>>> {
        match listing.next_batch().await {
            Ok(Some(batch)) => {
                debug!(
                    "batch {} from '{}': {} files",
                    batch_number + 1,
                    self.source.name(),
                    batch.len()
                );
                Ok(Some(batch))
            }
            Ok(None) => {
                debug!(
                    "listing of '{}' finished after {} batches",
                    self.source.name(),
                    batch_number
                );
                Ok(None)
            }
            Err(err) => {
                error!(error = ?err, "listing '{}' failed: {:#}", self.source.name(), err);
                Err(Error::Fatal(format!(
                    "listing '{}' failed: {}",
                    self.source.name(),
                    err
                )))
            }
        }
    }

    fn apply_filter(&self, batch: Vec<StorageFile>, excluded: &mut usize) -> Vec<StorageFile> {
        batch
            .into_iter()
            .filter(|file| match self.filter.matching_pattern(file.path()) {
                Some(pattern) => {
                    debug!("excluding {} (matches '{}')", file.path(), pattern);
                    *excluded += 1;
                    false
                }
                None => true,
            })
            .collect()
    }

    async fn backup_file(&self, file: StorageFile) -> FileOutcome {
        match self.transfer(&file).await {
            Ok(true) => {
                info!("uploaded {} to '{}'", file.path(), self.target.name());
                FileOutcome::Transferred
            }
            Ok(false) => {
                trace!("{} already on '{}'", file.path(), self.target.name());
                FileOutcome::Skipped
            }
            Err(err) => {
                error!(error = ?err, "failed to back up {}: {:#}", file.path(), err);
                FileOutcome::Failed
            }
        }
    }

    /// Check the target and copy `file` if needed; `Ok(true)` if copied.
    async fn transfer(&self, file: &StorageFile) -> Result<bool> {
        debug!("checking {} on '{}'", file.path(), self.target.name());
        if self.target.has_file(file).await? {
            return Ok(false);
        }
        debug!("uploading {} to '{}'", file.path(), self.target.name());
        self.target.put_file(file).await?;
        Ok(true)
    }
}
