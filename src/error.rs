use crate::git::CommitHash;

/// The subset of failures that happen during the sync phase itself (as
/// opposed to inside a caller's consumer function). These are the only
/// failures a [`crate::LazyRepo`] ever needs to replay to more than one
/// caller, so they get their own small `Clone` type rather than living as
/// non-cloneable variants buried in [`CoreError`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum SyncError {
    #[error("sync of {revision} timed out")]
    Timeout { revision: String },

    #[error("sync of {revision} failed: {reason}")]
    Failed { revision: String, reason: String },

    #[error("revision mismatch: wanted {want}, got {got}")]
    RevisionMismatch { want: CommitHash, got: CommitHash },

    #[error("environment error: {detail}")]
    Env { detail: String },
}

/// Errors that can cross the public API boundary of this crate.
///
/// Internally, helper functions lean on `anyhow::Result` with
/// `.context(...)` for plumbing (process execution, filesystem prep), the
/// same way the rest of this crate's lineage does it. Everything that a
/// caller of [`crate::WorkspaceManager`] or [`crate::LazyRepo`] can observe
/// is funnelled through this enum at the boundary, so callers can match on
/// *kind* rather than grep log messages for a string prefix.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// The cancellation token fired before or during the work.
    #[error("cancelled")]
    Cancelled,

    /// A sync-phase failure. See [`SyncError`] for the specific kinds.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// The caller-supplied function returned an error. Propagated verbatim;
    /// the core never inspects or recategorises it.
    #[error(transparent)]
    Consumer(#[from] anyhow::Error),
}

impl CoreError {
    pub fn timeout(revision: impl Into<String>) -> Self {
        SyncError::Timeout {
            revision: revision.into(),
        }
        .into()
    }

    pub fn sync_failed(revision: impl Into<String>, reason: impl Into<String>) -> Self {
        SyncError::Failed {
            revision: revision.into(),
            reason: reason.into(),
        }
        .into()
    }

    pub fn revision_mismatch(want: CommitHash, got: CommitHash) -> Self {
        SyncError::RevisionMismatch { want, got }.into()
    }

    pub fn env_error(detail: impl std::fmt::Display) -> Self {
        SyncError::Env {
            detail: detail.to_string(),
        }
        .into()
    }

    /// If this is a sync-phase error, the cloneable inner value that a
    /// [`crate::LazyRepo`] can stash and hand out to every pending consumer.
    pub fn as_sync_error(&self) -> Option<&SyncError> {
        match self {
            Self::Sync(e) => Some(e),
            _ => None,
        }
    }
}
