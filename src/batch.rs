//! Offline bulk migration from a source collection to a destination.
//!
//! For every registered version the source is scanned for documents stamped
//! below it. Each hit runs through the full chain and is queued as a
//! full-document upsert; queued upserts are flushed to the destination in
//! batches. Flushes are idempotent, so an interrupted or failed run can simply
//! be started again.

use std::collections::HashSet;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::BatchConfig;
use crate::document::Document;
use crate::error::Result;
use crate::migrations::{DocumentMigrator, MigrationRegistry};
use crate::store::{DocumentStore, Filter, ScanCursor, SqliteDatabase, WriteQueueHandle};

/// Counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Documents yielded by the scans, across all passes.
    pub scanned: usize,
    /// Documents migrated and queued for writing.
    pub migrated: usize,
    /// Distinct documents skipped because a migration step failed.
    pub failed: usize,
    /// Documents acknowledged by the destination.
    pub written: usize,
    /// Bulk writes issued.
    pub batches: usize,
    /// True when the run stopped early on cancellation.
    pub interrupted: bool,
}

pub struct BatchMigrator {
    migrator: Arc<DocumentMigrator>,
    batch_size: usize,
    page_size: usize,
    cancel: CancellationToken,
}

impl BatchMigrator {
    pub fn new(migrator: Arc<DocumentMigrator>, config: &BatchConfig) -> Self {
        Self {
            migrator,
            batch_size: config.batch_size.max(1),
            page_size: config.page_size.max(1),
            cancel: CancellationToken::new(),
        }
    }

    /// Stops the run at the next document boundary once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Sweeps `source` and writes migrated documents through `destination`.
    ///
    /// Documents whose migration fails are logged and skipped. Storage
    /// errors abort the run; batches flushed before the error stay written.
    /// The partial batch is flushed at the end of every pass and on
    /// cancellation.
    pub async fn run<S>(&self, source: &S, destination: &WriteQueueHandle) -> Result<BatchReport>
    where
        S: DocumentStore + ?Sized,
    {
        let mut report = BatchReport::default();
        let mut batch: Vec<Document> = Vec::with_capacity(self.batch_size);
        let mut failed_ids: HashSet<String> = HashSet::new();
        let versions: Vec<u64> = self.migrator.registry().versions().collect();

        'passes: for version in versions {
            let scanned_before = report.scanned;
            let cursor =
                ScanCursor::with_page_size(source, Filter::below_version(version), self.page_size);

            for document in cursor {
                let document = document?;
                report.scanned += 1;

                if failed_ids.contains(document.id()) {
                    continue;
                }

                match self.migrator.migrate(&document) {
                    Ok(outcome) => {
                        report.migrated += 1;
                        batch.push(outcome.into_document());
                    }
                    Err(e) if e.is_step_failure() => {
                        tracing::warn!(document = %document.id(), "Skipping document: {}", e);
                        failed_ids.insert(document.id().to_string());
                    }
                    Err(e) => return Err(e),
                }

                if batch.len() >= self.batch_size {
                    self.flush(destination, &mut batch, &mut report).await?;
                }

                if self.cancel.is_cancelled() {
                    report.interrupted = true;
                    break 'passes;
                }
            }

            // Next pass must see this pass's writes
            self.flush(destination, &mut batch, &mut report).await?;
            tracing::info!(
                version,
                scanned = report.scanned - scanned_before,
                "Finished migration pass"
            );
        }

        self.flush(destination, &mut batch, &mut report).await?;
        report.failed = failed_ids.len();

        if report.interrupted {
            tracing::warn!(written = report.written, "Batch migration interrupted");
        }
        tracing::info!(
            scanned = report.scanned,
            migrated = report.migrated,
            failed = report.failed,
            written = report.written,
            batches = report.batches,
            "Batch migration finished"
        );

        Ok(report)
    }

    async fn flush(
        &self,
        destination: &WriteQueueHandle,
        batch: &mut Vec<Document>,
        report: &mut BatchReport,
    ) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let documents = std::mem::take(batch);
        let count = documents.len();
        let written = destination.bulk_write(documents).await?;
        report.written += written;
        report.batches += 1;
        tracing::debug!(documents = count, "Flushed batch");
        Ok(())
    }
}

/// Runs a complete batch job against one SQLite database: validates the
/// configuration, opens both collections, migrates, and shuts the write queue
/// down whether or not the run succeeded.
pub async fn run_batch_job(
    database: &SqliteDatabase,
    config: &BatchConfig,
    registry: Arc<MigrationRegistry>,
    cancel: CancellationToken,
) -> Result<BatchReport> {
    config.validate()?;

    let source = database.collection(&config.source_collection)?;
    let destination: Arc<dyn DocumentStore> =
        Arc::new(database.collection(&config.destination_collection)?);
    source.ping()?;
    destination.ping()?;

    tracing::info!(
        source = %config.source_collection,
        destination = %config.destination_collection,
        batch_size = config.batch_size,
        latest_version = ?registry.latest_version(),
        "Starting batch migration"
    );

    let queue = WriteQueueHandle::new(destination);
    let migrator = BatchMigrator::new(Arc::new(DocumentMigrator::new(registry)), config)
        .with_cancellation(cancel);

    let result = migrator.run(&source, &queue).await;
    if let Err(e) = queue.shutdown().await {
        tracing::debug!("Write queue already stopped: {}", e);
    }
    result
}
