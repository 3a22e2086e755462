use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Context as _;

use crate::git::{CommitHash, Worktree};
use crate::util::IoResultExt as _;

/// A directory on local disk holding a synced, revision-pinned tree.
///
/// Produced by [`crate::SyncDriver::sync`], handed to the caller's function
/// for the duration of a [`crate::WorkspaceManager::with_workspace`] call or
/// a [`crate::LazyRepo::do_with`] call, and deleted when that call returns.
#[derive(Debug)]
pub struct Checkout {
    dir: PathBuf,
    git_binary: PathBuf,
}

impl Checkout {
    pub(crate) fn new(dir: PathBuf, git_binary: PathBuf) -> Self {
        Self { dir, git_binary }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Resolves the tree's current `HEAD`. After a successful sync this must
    /// equal the `RepoState`'s `revision`.
    pub async fn revision(&self) -> anyhow::Result<CommitHash> {
        self.rev_parse("HEAD")
            .await?
            .map(CommitHash::from)
            .context("no HEAD in checkout")
    }

    /// Runs an arbitrary VCS subcommand scoped to this checkout's directory
    /// and returns its captured stdout.
    pub async fn run<S>(&self, args: impl IntoIterator<Item = S> + Send) -> anyhow::Result<Vec<u8>>
    where
        S: AsRef<OsStr> + Send,
    {
        self.run_git(args).await
    }

    /// True if the working tree has any uncommitted difference against
    /// `HEAD` — used to check the tryjob/non-tryjob cleanliness invariant.
    pub async fn is_dirty(&self) -> anyhow::Result<bool> {
        let out = self.run(["diff", "--quiet", "HEAD"]).await;
        // `git diff --quiet` exits 1 when there is a difference; our execute()
        // wrapper turns that into an Err, so absence of an error means clean.
        match out {
            Ok(_) => Ok(false),
            Err(_) => Ok(true),
        }
    }

    /// Idempotent removal of the tree. The surrounding temp directory
    /// allocated by the manager is cleaned up separately.
    pub fn delete(self) -> anyhow::Result<()> {
        std::fs::remove_dir_all(&self.dir)
            .ignore(std::io::ErrorKind::NotFound)
            .with_context(|| format!("deleting checkout at {:?}", self.dir))
    }
}

impl Worktree for Checkout {
    fn path(&self) -> &Path {
        &self.dir
    }

    fn git_binary(&self) -> &Path {
        &self.git_binary
    }
}

impl fmt::Display for Checkout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.dir)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use crate::git::test_utils::{TempRepo, WorktreeExt as _};

    use super::*;

    #[tokio::test]
    async fn revision_matches_head_after_commit() {
        let repo = TempRepo::new().await.unwrap();
        let commit = repo.commit("hello").await.unwrap();

        let checkout = Checkout::new(repo.path().to_path_buf(), PathBuf::from("/usr/bin/git"));
        assert_eq!(checkout.revision().await.unwrap(), commit.hash);
    }

    #[tokio::test]
    async fn clean_checkout_is_not_dirty() {
        let repo = TempRepo::new().await.unwrap();
        repo.commit("hello").await.unwrap();

        let checkout = Checkout::new(repo.path().to_path_buf(), PathBuf::from("/usr/bin/git"));
        assert!(!checkout.is_dirty().await.unwrap());
    }

    #[tokio::test]
    async fn dirty_checkout_is_detected() {
        let repo = TempRepo::new().await.unwrap();
        repo.commit("hello").await.unwrap();
        std::fs::write(repo.path().join("new_file.txt"), "stuff").unwrap();
        repo.run_git(["add", "new_file.txt"]).await.unwrap();

        let checkout = Checkout::new(repo.path().to_path_buf(), PathBuf::from("/usr/bin/git"));
        assert!(checkout.is_dirty().await.unwrap());
    }
}
