// Bounded pool of N persistent worker tasks, each bound to a stable
// on-disk object cache directory. Jobs are delivered FIFO to whichever
// worker is next free via a single shared receiver end; there's no
// priority and no work stealing beyond "next free worker takes the next
// job".

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Context as _;
use futures::future::BoxFuture;
use log::{debug, warn};
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio::task::JoinSet;

use crate::util::IoResultExt as _;

type BoxedJob = Box<dyn FnOnce(usize) -> BoxFuture<'static, ()> + Send>;

/// Read-only point-in-time snapshot of pool occupancy. Computed from
/// in-memory counters only; there is no metrics backend behind this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub workers: usize,
    pub busy: usize,
    pub idle: usize,
}

pub struct WorkerPool {
    sender: mpsc::Sender<BoxedJob>,
    busy: Arc<AtomicUsize>,
    workers: usize,
    tasks: AsyncMutex<JoinSet<()>>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers)
            .field("busy", &self.busy.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    pub fn new(
        workers: usize,
        cache_root: impl Into<PathBuf>,
        tmp_root: impl Into<PathBuf>,
    ) -> anyhow::Result<Self> {
        assert!(workers >= 1, "a worker pool needs at least one worker");
        let cache_root = cache_root.into();
        let tmp_root = tmp_root.into();

        if let Err(e) = std::fs::remove_dir_all(&tmp_root).ignore(std::io::ErrorKind::NotFound) {
            warn!("couldn't clean up stale workspace root {tmp_root:?}: {e}");
        }
        std::fs::create_dir_all(&tmp_root)
            .with_context(|| format!("creating workspace root {tmp_root:?}"))?;
        std::fs::create_dir_all(&cache_root)
            .with_context(|| format!("creating cache root {cache_root:?}"))?;

        let (sender, receiver) = mpsc::channel::<BoxedJob>(workers);
        let receiver = Arc::new(AsyncMutex::new(receiver));
        let busy = Arc::new(AtomicUsize::new(0));

        let mut tasks = JoinSet::new();
        for idx in 0..workers {
            let receiver = receiver.clone();
            let busy = busy.clone();
            tasks.spawn(async move {
                loop {
                    let job = {
                        let mut receiver = receiver.lock().await;
                        receiver.recv().await
                    };
                    let Some(job) = job else {
                        debug!("worker {idx} shutting down, submission channel closed");
                        break;
                    };
                    busy.fetch_add(1, Ordering::SeqCst);
                    job(idx).await;
                    busy.fetch_sub(1, Ordering::SeqCst);
                }
            });
        }

        Ok(Self {
            sender,
            busy,
            workers,
            tasks: AsyncMutex::new(tasks),
        })
    }

    pub fn stats(&self) -> PoolStats {
        let busy = self.busy.load(Ordering::SeqCst);
        PoolStats {
            workers: self.workers,
            busy,
            idle: self.workers.saturating_sub(busy),
        }
    }

    /// Runs `job(worker_index)` on exactly one worker and returns its
    /// result. Blocks until that worker is free and the job has finished.
    /// Submission order is FIFO; execution order across workers is not.
    pub async fn submit<T, F>(&self, job: F) -> anyhow::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(usize) -> BoxFuture<'static, T> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let boxed: BoxedJob = Box::new(move |idx| {
            Box::pin(async move {
                let result = job(idx).await;
                let _ = tx.send(result);
            })
        });
        self.sender
            .send(boxed)
            .await
            .map_err(|_| anyhow::anyhow!("worker pool is closed"))?;
        rx.await.context("worker dropped the job before replying")
    }

    /// Signals no more submissions and waits for in-flight jobs to drain.
    /// Submitting after `close()` is a programmer error.
    pub async fn close(self) -> anyhow::Result<()> {
        drop(self.sender);
        let mut tasks = self.tasks.into_inner();
        while let Some(res) = tasks.join_next().await {
            res.context("worker task panicked")?;
        }
        Ok(())
    }
}
