// Public facade: allocates a temp directory per call, drives a sync
// through the worker pool, hands the caller a ready Checkout, and
// guarantees the temp directory is gone by the time the call returns.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::checkout::Checkout;
use crate::error::CoreError;
use crate::lazy_repo::LazyRepo;
use crate::repo_state::RepoState;
use crate::sync_driver::SyncDriver;
use crate::worker_pool::{PoolStats, WorkerPool};

/// External collaborator: mapping from repo URL to opaque metadata used
/// upstream to pick revisions. The core itself never needs more than
/// existence out of it; everything else happens before a `RepoState`
/// reaches this crate.
pub trait RepoGraph: Send + Sync {
    fn exists(&self, repo: &str) -> bool;
}

pub(crate) fn alloc_temp_dir(workdir: &Path) -> anyhow::Result<TempDir> {
    tempfile::Builder::new()
        .prefix("workspace-")
        .tempdir_in(workdir)
        .with_context(|| format!("allocating temp workspace dir under {workdir:?}"))
}

#[derive(Clone)]
pub struct WorkspaceManager {
    pool: Arc<WorkerPool>,
    sync_driver: SyncDriver,
    cache_root: PathBuf,
    workdir: PathBuf,
    #[allow(dead_code)]
    repos: Arc<dyn RepoGraph>,
}

impl WorkspaceManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repos: Arc<dyn RepoGraph>,
        helper_dir: impl Into<PathBuf>,
        workdir: impl Into<PathBuf>,
        workers: usize,
        cache_root: impl Into<PathBuf>,
        sync_timeout: Duration,
        git_binary: impl Into<PathBuf>,
    ) -> Result<Self, CoreError> {
        let helper_dir = helper_dir.into();
        let workdir = workdir.into();
        let cache_root = cache_root.into();

        let pool = WorkerPool::new(workers, &cache_root, &workdir)
            .map_err(|e| CoreError::env_error(format!("starting worker pool: {e}")))?;
        let sync_driver = SyncDriver::new(helper_dir.clone(), helper_dir, git_binary, sync_timeout);

        Ok(Self {
            pool: Arc::new(pool),
            sync_driver,
            cache_root,
            workdir,
            repos,
        })
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub(crate) fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    pub(crate) fn sync_driver(&self) -> &SyncDriver {
        &self.sync_driver
    }

    pub(crate) fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    pub(crate) fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Allocates a fresh temp dir, syncs `rs` into it on a pool worker, and
    /// runs `f` against the resulting checkout. The temp dir (and whatever
    /// `f` left in it) is removed before this returns, on every path.
    pub async fn with_workspace<T, F, Fut>(
        &self,
        ct: &CancellationToken,
        rs: RepoState,
        f: F,
    ) -> Result<T, CoreError>
    where
        T: Send + 'static,
        F: FnOnce(Checkout) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        if ct.is_cancelled() {
            return Err(CoreError::Cancelled);
        }

        let cache_root = self.cache_root.clone();
        let workdir = self.workdir.clone();
        let sync_driver = self.sync_driver.clone();
        let ct = CancellationToken::clone(ct);

        self.pool
            .submit(move |idx| {
                Box::pin(async move {
                    let temp_dir = alloc_temp_dir(&workdir)
                        .map_err(|e| CoreError::env_error(e.to_string()))?;
                    let worker_cache = cache_root.join(idx.to_string());
                    let checkout = sync_driver
                        .sync(&ct, &rs, &worker_cache, temp_dir.path())
                        .await?;
                    f(checkout).await.map_err(CoreError::Consumer)
                    // temp_dir drops here regardless of the branch taken above.
                })
            })
            .await
            .map_err(|e| CoreError::env_error(format!("worker pool error: {e}")))?
    }

    pub fn lazy_repo(&self, rs: RepoState) -> LazyRepo {
        LazyRepo::new(rs, self.clone())
    }

    /// Consumes the manager, refusing to proceed if any `LazyRepo` handle
    /// is still holding a worker (those must be `close()`d first).
    pub async fn close(self) -> Result<(), CoreError> {
        let pool = Arc::try_unwrap(self.pool).map_err(|_| {
            CoreError::env_error(
                "workspace manager closed while a LazyRepo handle is still open; close() it first",
            )
        })?;
        pool.close()
            .await
            .map_err(|e| CoreError::env_error(format!("closing worker pool: {e}")))
    }
}
