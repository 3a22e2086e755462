//! Core of a task-scheduler subsystem that prepares ephemeral,
//! revision-pinned source checkouts at scale: given a [`RepoState`], it
//! produces a synced [`Checkout`] in a fresh directory, hands it to a
//! caller-supplied function, and guarantees cleanup. [`LazyRepo`] lets
//! many callers share one in-progress sync and its outcome.
//!
//! Out of scope: choosing *which* `RepoState`s to build, a CLI, a config
//! file loader, auth, and metrics/tracing backends -- those live above
//! this crate.

mod checkout;
mod config;
mod error;
mod git;
mod lazy_repo;
mod process;
mod repo_state;
mod sync_driver;
#[cfg(test)]
mod test_support;
mod util;
mod worker_pool;
mod workspace_manager;

pub use checkout::Checkout;
pub use config::WorkspacePoolConfig;
pub use error::{CoreError, SyncError};
pub use git::{CommitHash, Commit, TreeHash};
pub use lazy_repo::LazyRepo;
pub use repo_state::{PatchSet, RepoState};
pub use sync_driver::SyncDriver;
pub use worker_pool::{PoolStats, WorkerPool};
pub use workspace_manager::{RepoGraph, WorkspaceManager};

/// Initialises logging for tests. The core crate itself never does this --
/// wiring up a logging sink is a binary's job -- but tests need *some*
/// output when run with `--nocapture`, so they opt into it explicitly.
#[cfg(test)]
pub(crate) fn init_test_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = flexi_logger::Logger::try_with_env_or_str("warn")
            .expect("valid log spec")
            .start();
    });
}

impl WorkspaceManager {
    /// Convenience constructor building a [`WorkspaceManager`] from a
    /// [`WorkspacePoolConfig`] instead of its individual fields.
    pub fn from_config(
        repos: std::sync::Arc<dyn RepoGraph>,
        config: &WorkspacePoolConfig,
    ) -> Result<Self, CoreError> {
        Self::new(
            repos,
            config.helper_dir.clone(),
            config.workdir.clone(),
            config.workers,
            config.cache_root.clone(),
            config.sync_timeout(),
            config.git_binary.clone(),
        )
    }
}
