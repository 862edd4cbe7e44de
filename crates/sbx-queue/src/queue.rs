//! The working queue proper: bounded admission, fixed worker pool,
//! tagged completion streams.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

use sbx_core::{SbxError, SbxResult};

/// A classified failure carrying the tag of the task that produced it.
#[derive(Debug)]
pub struct TaskError {
    pub tag: String,
    pub error: SbxError,
}

type TaskFuture<R> = Pin<Box<dyn Future<Output = SbxResult<R>> + Send + 'static>>;

struct Task<R> {
    tag: String,
    fut: TaskFuture<R>,
}

/// Consumer ends of the queue's three streams.
///
/// All three are handed out at construction and must be drained from the
/// start: the channels are bounded, so a worker whose consumer never reads
/// will eventually block on delivery.
pub struct QueueStreams<R> {
    /// Successful task outputs, tagged.
    pub results: mpsc::Receiver<(String, R)>,
    /// Failed task outputs, tagged.
    pub errors: mpsc::Receiver<TaskError>,
    /// Tag of every finished task, success or failure, in completion order.
    pub completions: mpsc::Receiver<String>,
}

/// Fixed pool of workers draining a bounded FIFO queue.
///
/// Tasks run in parallel across workers; each worker executes its tasks
/// sequentially. No ordering is guaranteed between tasks picked up by
/// different workers.
pub struct WorkingQueue<R> {
    tasks_tx: async_channel::Sender<Task<R>>,
    workers: Vec<JoinHandle<()>>,
}

impl<R: Send + 'static> WorkingQueue<R> {
    /// Start `workers_count` workers over a queue of `queue_size` slots.
    pub fn new(workers_count: usize, queue_size: usize) -> SbxResult<(Self, QueueStreams<R>)> {
        if workers_count < 1 {
            return Err(SbxError::InvalidArgument(
                "workers_count must be at least 1".into(),
            ));
        }
        if queue_size < 1 {
            return Err(SbxError::InvalidArgument(
                "queue_size must be at least 1".into(),
            ));
        }

        let (tasks_tx, tasks_rx) = async_channel::bounded::<Task<R>>(queue_size);
        let (results_tx, results_rx) = mpsc::channel(queue_size);
        let (errors_tx, errors_rx) = mpsc::channel(queue_size);
        let (completions_tx, completions_rx) = mpsc::channel(queue_size);

        let workers = (0..workers_count)
            .map(|worker| {
                let tasks_rx = tasks_rx.clone();
                let results_tx = results_tx.clone();
                let errors_tx = errors_tx.clone();
                let completions_tx = completions_tx.clone();
                tokio::spawn(async move {
                    while let Ok(task) = tasks_rx.recv().await {
                        trace!(worker, tag = %task.tag, "task picked up");
                        match task.fut.await {
                            Ok(result) => {
                                let _ = results_tx.send((task.tag.clone(), result)).await;
                            }
                            Err(error) => {
                                let _ = errors_tx
                                    .send(TaskError {
                                        tag: task.tag.clone(),
                                        error,
                                    })
                                    .await;
                            }
                        }
                        let _ = completions_tx.send(task.tag).await;
                    }
                    trace!(worker, "queue closed, worker exiting");
                })
            })
            .collect();

        Ok((
            Self { tasks_tx, workers },
            QueueStreams {
                results: results_rx,
                errors: errors_rx,
                completions: completions_rx,
            },
        ))
    }

    /// Enqueue a task. Blocks while the queue is full; fails with
    /// `Permanent` once the queue has been closed.
    pub async fn submit<F>(&self, tag: impl Into<String>, fut: F) -> SbxResult<()>
    where
        F: Future<Output = SbxResult<R>> + Send + 'static,
    {
        let task = Task {
            tag: tag.into(),
            fut: Box::pin(fut),
        };
        self.tasks_tx
            .send(task)
            .await
            .map_err(|_| SbxError::Permanent("working queue is closed".into()))
    }

    /// Number of tasks sitting in the queue (not yet picked up).
    pub fn pending(&self) -> usize {
        self.tasks_tx.len()
    }

    /// Refuse further submissions. Queued tasks are still drained; calling
    /// this more than once is a no-op.
    pub fn close(&self) {
        self.tasks_tx.close();
    }

    /// Close the queue and wait for every worker to finish its in-flight
    /// and queued tasks.
    pub async fn join(mut self) {
        self.close();
        for handle in self.workers.drain(..) {
            let _ = handle.await;
        }
    }
}
