//! Write Queue for single-writer serialization of batch flushes.
//!
//! SQLite WAL mode allows only one writer at a time. The batch job sends every
//! bulk write aimed at its destination collection through a single worker
//! task using tokio mpsc channels, and each flush awaits its acknowledgement
//! before the scan continues.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use crate::document::Document;
use crate::error::{MigrateError, Result};
use crate::store::DocumentStore;

/// Commands that can be sent to the write queue worker.
#[derive(Debug)]
enum WriteCommand {
    /// Upsert a batch of documents in one write
    BulkWrite {
        documents: Vec<Document>,
        respond: oneshot::Sender<Result<usize>>,
    },
    /// Shutdown the write queue worker
    Shutdown,
}

/// Handle for sending write commands to the queue.
/// This is cheaply cloneable and can be shared across tasks.
#[derive(Clone)]
pub struct WriteQueueHandle {
    sender: mpsc::Sender<WriteCommand>,
}

impl WriteQueueHandle {
    /// Default channel buffer size
    const DEFAULT_BUFFER_SIZE: usize = 256;

    /// Creates a new write queue handle and spawns the worker task.
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        let (sender, receiver) = mpsc::channel(Self::DEFAULT_BUFFER_SIZE);
        let worker = WriteQueueWorker::new(receiver, store);

        // Spawn the worker task
        tokio::spawn(async move {
            worker.run().await;
        });

        Self { sender }
    }

    /// Upserts a batch of documents. Returns the number written.
    pub async fn bulk_write(&self, documents: Vec<Document>) -> Result<usize> {
        let (respond, rx) = oneshot::channel();
        self.sender
            .send(WriteCommand::BulkWrite { documents, respond })
            .await
            .map_err(|_| MigrateError::WriteQueue("Write queue closed".into()))?;
        rx.await
            .map_err(|_| MigrateError::WriteQueue("Write response channel closed".into()))?
    }

    /// Shuts down the write queue worker.
    /// Commands already queued are processed first; later writes fail.
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(WriteCommand::Shutdown)
            .await
            .map_err(|_| MigrateError::WriteQueue("Write queue already closed".into()))?;
        Ok(())
    }
}

/// Worker that processes write commands sequentially.
struct WriteQueueWorker {
    receiver: mpsc::Receiver<WriteCommand>,
    store: Arc<dyn DocumentStore>,
}

impl WriteQueueWorker {
    /// Creates a new write queue worker.
    fn new(receiver: mpsc::Receiver<WriteCommand>, store: Arc<dyn DocumentStore>) -> Self {
        Self { receiver, store }
    }

    /// Runs the worker loop, processing commands until shutdown.
    async fn run(mut self) {
        tracing::debug!("WriteQueue worker started");

        while let Some(command) = self.receiver.recv().await {
            match command {
                WriteCommand::BulkWrite { documents, respond } => {
                    let count = documents.len();
                    let result = self.store.bulk_write(documents);
                    if let Err(e) = &result {
                        tracing::warn!(documents = count, "Bulk write failed: {}", e);
                    }
                    let _ = respond.send(result);
                }
                WriteCommand::Shutdown => {
                    tracing::debug!("WriteQueue worker shutting down");
                    break;
                }
            }
        }

        tracing::debug!("WriteQueue worker stopped");
    }
}
