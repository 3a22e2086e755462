// Coalescing handle over a single RepoState: at most one sync ever runs,
// and every do_with() submitted before close() observes the same
// outcome. Bypasses WorkspaceManager::with_workspace's one-shot
// contract deliberately -- the worker here must stay held across many
// do_with() calls rather than for a single fn invocation, so this talks
// to the pool and sync driver directly instead of layering on C3.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, OnceCell};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::checkout::Checkout;
use crate::error::{CoreError, SyncError};
use crate::repo_state::RepoState;
use crate::util::ResultExt as _;
use crate::workspace_manager::{alloc_temp_dir, WorkspaceManager};

type ConsumerJob = Box<dyn FnOnce(Arc<Checkout>) -> futures::future::BoxFuture<'static, ()> + Send>;

#[derive(Clone, Debug)]
enum SyncOutcome {
    Cancelled,
    Failed(SyncError),
}

impl SyncOutcome {
    fn into_core_error(self) -> CoreError {
        match self {
            SyncOutcome::Cancelled => CoreError::Cancelled,
            SyncOutcome::Failed(e) => CoreError::Sync(e),
        }
    }
}

pub struct LazyRepo {
    rs: RepoState,
    manager: WorkspaceManager,
    inner: OnceCell<Result<mpsc::UnboundedSender<ConsumerJob>, SyncOutcome>>,
    task: OnceCell<JoinHandle<()>>,
}

impl LazyRepo {
    pub(crate) fn new(rs: RepoState, manager: WorkspaceManager) -> Self {
        Self {
            rs,
            manager,
            inner: OnceCell::new(),
            task: OnceCell::new(),
        }
    }

    // Starts the single underlying sync on first call; every later call
    // (including concurrent ones) awaits that same attempt instead of
    // starting another.
    async fn ensure_started(
        &self,
        ct: &CancellationToken,
    ) -> Result<mpsc::UnboundedSender<ConsumerJob>, SyncOutcome> {
        self.inner
            .get_or_init(|| async {
                let (req_tx, req_rx) = mpsc::unbounded_channel::<ConsumerJob>();
                let (ready_tx, ready_rx) =
                    oneshot::channel::<Result<(), SyncOutcome>>();

                let pool = self.manager.pool().clone();
                let sync_driver = self.manager.sync_driver().clone();
                let cache_root = self.manager.cache_root().to_path_buf();
                let workdir = self.manager.workdir().to_path_buf();
                let rs = self.rs.clone();
                let ct = CancellationToken::clone(ct);

                let handle = tokio::spawn(async move {
                    let mut req_rx = req_rx;
                    let submit_result = pool
                        .submit(move |idx| {
                            Box::pin(async move {
                                let temp_dir = match alloc_temp_dir(&workdir) {
                                    Ok(d) => d,
                                    Err(e) => {
                                        let _ = ready_tx.send(Err(SyncOutcome::Failed(
                                            SyncError::Env {
                                                detail: e.to_string(),
                                            },
                                        )));
                                        return;
                                    }
                                };
                                let worker_cache = cache_root.join(idx.to_string());
                                match sync_driver
                                    .sync(&ct, &rs, &worker_cache, temp_dir.path())
                                    .await
                                {
                                    Err(core_err) => {
                                        let outcome = match core_err {
                                            CoreError::Cancelled => SyncOutcome::Cancelled,
                                            CoreError::Sync(se) => SyncOutcome::Failed(se),
                                            CoreError::Consumer(_) => {
                                                unreachable!(
                                                    "the held checkout's serving loop never returns a consumer error"
                                                )
                                            }
                                        };
                                        let _ = ready_tx.send(Err(outcome));
                                    }
                                    Ok(checkout) => {
                                        let _ = ready_tx.send(Ok(()));
                                        let checkout = Arc::new(checkout);
                                        while let Some(job) = req_rx.recv().await {
                                            job(checkout.clone()).await;
                                        }
                                    }
                                }
                                // temp_dir drops here, deleting the checkout.
                            })
                        })
                        .await;
                    submit_result.or_log_error("lazy repo worker job never ran");
                });

                let _ = self.task.set(handle);

                match ready_rx.await {
                    Ok(Ok(())) => Ok(req_tx),
                    Ok(Err(outcome)) => Err(outcome),
                    Err(_) => Err(SyncOutcome::Failed(SyncError::Env {
                        detail: "lazy repo worker ended without reporting a sync outcome".into(),
                    })),
                }
            })
            .await
            .clone()
    }

    /// Runs `f` against the shared checkout. Blocks until the (shared)
    /// sync has either failed -- in which case `f` is not called and the
    /// sync error is returned -- or succeeded and `f` has finished.
    pub async fn do_with<T, F, Fut>(&self, ct: &CancellationToken, f: F) -> Result<T, CoreError>
    where
        T: Send + 'static,
        F: FnOnce(Arc<Checkout>) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let sender = match self.ensure_started(ct).await {
            Ok(s) => s,
            Err(outcome) => return Err(outcome.into_core_error()),
        };

        let (tx, rx) = oneshot::channel::<anyhow::Result<T>>();
        let job: ConsumerJob = Box::new(move |checkout| {
            Box::pin(async move {
                let result = f(checkout).await;
                let _ = tx.send(result);
            })
        });

        if sender.send(job).is_err() {
            return Err(CoreError::env_error(
                "lazy repo worker is no longer accepting consumers",
            ));
        }

        tokio::select! {
            biased;
            _ = ct.cancelled() => Err(CoreError::Cancelled),
            res = rx => match res {
                Ok(r) => r.map_err(CoreError::Consumer),
                Err(_) => Err(CoreError::env_error("consumer function dropped without a result")),
            },
        }
    }

    /// Consumes the handle, releasing the underlying worker. Must be
    /// called exactly once, after the last `do_with()`.
    pub async fn close(self) -> Result<(), CoreError> {
        drop(self.inner);
        if let Some(handle) = self.task.into_inner() {
            handle
                .await
                .map_err(|e| CoreError::env_error(format!("lazy repo worker task panicked: {e}")))?;
        }
        Ok(())
    }
}
