//! Store client: typed operations batched through the working queue.
//!
//! Every call becomes a task keyed by the blob key; the caller reads one
//! tagged outcome stream instead of juggling per-operation channels, so a
//! single collector loop suffices.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use sbx_core::{SbxError, SbxResult};
use sbx_queue::{AtomicCounter, QueueStreams, WorkingQueue};

use crate::backend::{BlobBackend, RequestCtx};

/// What a finished operation produced.
#[derive(Debug)]
pub enum OpOutcome {
    Uploaded { key: String },
    Downloaded { key: String, data: Vec<u8> },
    Deleted { key: String },
}

/// One message on the client's outcome stream, tagged with its key.
#[derive(Debug)]
pub struct OpResult {
    pub key: String,
    pub outcome: SbxResult<OpOutcome>,
}

/// Knobs for the embedded queue and the retry budget.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub workers: usize,
    pub queue_size: usize,
    /// Additional attempts after the first, spent on `Transient` errors only.
    pub max_retries: u32,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_size: 64,
            max_retries: 3,
        }
    }
}

/// Retry `op` while it keeps failing transiently, up to `budget` extra
/// attempts with linear backoff.
async fn with_retries<T, F, Fut>(budget: u32, mut op: F) -> SbxResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = SbxResult<T>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < budget => {
                attempt += 1;
                debug!(attempt, "transient backend error, retrying: {e}");
                tokio::time::sleep(Duration::from_millis(50 * attempt as u64)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

pub struct StoreClient {
    queue: WorkingQueue<OpOutcome>,
    backend: Arc<dyn BlobBackend>,
    ctx: RequestCtx,
    max_retries: u32,
    submitted: AtomicCounter,
    completed: AtomicCounter,
    forwarders: Vec<JoinHandle<()>>,
}

impl StoreClient {
    /// Build a client and hand back its outcome stream. The stream must be
    /// consumed from the start; it is bounded like the queue itself.
    pub fn new(
        backend: Arc<dyn BlobBackend>,
        ctx: RequestCtx,
        opts: ClientOptions,
    ) -> SbxResult<(Self, mpsc::Receiver<OpResult>)> {
        Self::with_counters(backend, ctx, opts, AtomicCounter::new(), AtomicCounter::new())
    }

    /// Same as [`StoreClient::new`], but feeding externally shared progress
    /// counters, so another task can watch an operation live.
    pub fn with_counters(
        backend: Arc<dyn BlobBackend>,
        ctx: RequestCtx,
        opts: ClientOptions,
        submitted: AtomicCounter,
        completed: AtomicCounter,
    ) -> SbxResult<(Self, mpsc::Receiver<OpResult>)> {
        let (queue, streams) = WorkingQueue::new(opts.workers, opts.queue_size)?;
        let QueueStreams {
            mut results,
            mut errors,
            mut completions,
        } = streams;

        let (out_tx, out_rx) = mpsc::channel(opts.queue_size);

        let ok_tx = out_tx.clone();
        let forward_results = tokio::spawn(async move {
            while let Some((key, outcome)) = results.recv().await {
                let _ = ok_tx
                    .send(OpResult {
                        key,
                        outcome: Ok(outcome),
                    })
                    .await;
            }
        });
        let forward_errors = tokio::spawn(async move {
            while let Some(task_err) = errors.recv().await {
                let _ = out_tx
                    .send(OpResult {
                        key: task_err.tag,
                        outcome: Err(task_err.error),
                    })
                    .await;
            }
        });
        let count_completions = {
            let completed = completed.clone();
            tokio::spawn(async move {
                while completions.recv().await.is_some() {
                    completed.add(1);
                }
            })
        };

        Ok((
            Self {
                queue,
                backend,
                ctx,
                max_retries: opts.max_retries,
                submitted,
                completed,
                forwarders: vec![forward_results, forward_errors, count_completions],
            },
            out_rx,
        ))
    }

    /// Queue an upload. At-most-once per key: re-uploading an occupied key
    /// surfaces `AlreadyExists` on the outcome stream.
    pub async fn upload(
        &self,
        key: &str,
        data: Vec<u8>,
        meta: Option<HashMap<String, String>>,
    ) -> SbxResult<()> {
        let backend = self.backend.clone();
        let ctx = self.ctx.clone();
        let key_owned = key.to_string();
        let budget = self.max_retries;
        self.submitted.add(1);
        self.queue
            .submit(key, async move {
                with_retries(budget, || {
                    backend.put(&ctx, &key_owned, data.clone(), meta.clone())
                })
                .await?;
                Ok(OpOutcome::Uploaded { key: key_owned })
            })
            .await
    }

    /// Queue a download; bytes arrive on the outcome stream.
    pub async fn download(&self, key: &str) -> SbxResult<()> {
        let backend = self.backend.clone();
        let ctx = self.ctx.clone();
        let key_owned = key.to_string();
        let budget = self.max_retries;
        self.submitted.add(1);
        self.queue
            .submit(key, async move {
                let data = with_retries(budget, || backend.get(&ctx, &key_owned)).await?;
                Ok(OpOutcome::Downloaded {
                    key: key_owned,
                    data,
                })
            })
            .await
    }

    /// Queue a delete. Missing keys count as deleted.
    pub async fn delete(&self, key: &str) -> SbxResult<()> {
        let backend = self.backend.clone();
        let ctx = self.ctx.clone();
        let key_owned = key.to_string();
        let budget = self.max_retries;
        self.submitted.add(1);
        self.queue
            .submit(key, async move {
                with_retries(budget, || backend.remove(&ctx, &key_owned)).await?;
                Ok(OpOutcome::Deleted { key: key_owned })
            })
            .await
    }

    /// (completed, submitted) operation counts.
    pub fn progress(&self) -> (i64, i64) {
        (self.completed.value(), self.submitted.value())
    }

    /// Refuse further submissions; queued work still runs.
    pub fn abort(&self) {
        self.queue.close();
    }

    /// Drain pending work and release the pool.
    pub async fn close(self) {
        self.queue.join().await;
        for handle in self.forwarders {
            let _ = handle.await;
        }
    }
}
