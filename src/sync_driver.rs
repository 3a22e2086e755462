// Drives the external dependency-tree sync tool for a single RepoState.
//
// The tool is invoked as two subcommands ("config", "sync") of a helper
// script run through an interpreter. This module owns environment
// isolation, timeout enforcement and the post-sync revision self-check;
// it knows nothing about the worker pool or temp-directory lifecycle
// above it.

use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::warn;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::checkout::Checkout;
use crate::error::CoreError;
use crate::git::{CommitHash, Worktree as _};
use crate::process::CommandExt as _;
use crate::repo_state::RepoState;

/// Soft threshold past which a successful sync still gets a warning log.
const WARN_AFTER: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
pub struct SyncDriver {
    helper_dir: PathBuf,
    interpreter_dir: PathBuf,
    helper_bin: PathBuf,
    git_binary: PathBuf,
    sync_timeout: Duration,
    skip_topics_download: bool,
}

impl SyncDriver {
    pub fn new(
        helper_dir: impl Into<PathBuf>,
        interpreter_dir: impl Into<PathBuf>,
        git_binary: impl Into<PathBuf>,
        sync_timeout: Duration,
    ) -> Self {
        let helper_dir = helper_dir.into();
        let helper_bin = helper_dir.join("sync_helper");
        Self {
            helper_dir,
            interpreter_dir: interpreter_dir.into(),
            helper_bin,
            git_binary: git_binary.into(),
            sync_timeout,
            skip_topics_download: false,
        }
    }

    /// Suppresses the "download topics" sync flag. Used against local
    /// `file://` fixtures that have no topics server and would otherwise
    /// fail trying to reach the network.
    pub fn skip_topics_download(mut self, skip: bool) -> Self {
        self.skip_topics_download = skip;
        self
    }

    pub async fn sync(
        &self,
        ct: &CancellationToken,
        rs: &RepoState,
        worker_cache: &Path,
        workspace_root: &Path,
    ) -> Result<Checkout, CoreError> {
        if ct.is_cancelled() {
            return Err(CoreError::Cancelled);
        }

        let home = workspace_root.join("home");
        let wrapper_home = workspace_root.join("wrapper_home");
        std::fs::create_dir_all(&home)
            .map_err(|e| CoreError::env_error(format!("creating private HOME {home:?}: {e}")))?;
        std::fs::create_dir_all(&wrapper_home).map_err(|e| {
            CoreError::env_error(format!("creating wrapper home {wrapper_home:?}: {e}"))
        })?;
        self.copy_global_config(&home);

        let envs = self.build_env(&home, &wrapper_home, worker_cache)?;

        let project_name = rs.project_name().to_string();
        let configure = self.run_helper(
            envs.clone(),
            workspace_root,
            vec![
                "config".to_string(),
                "--project".to_string(),
                project_name,
                "--url".to_string(),
                rs.repo.clone(),
            ],
        );
        tokio::select! {
            biased;
            _ = ct.cancelled() => return Err(CoreError::Cancelled),
            res = configure => res.map_err(|e| CoreError::sync_failed(rs.revision.clone(), e.to_string()))?,
        }

        let sync_args = self.sync_args(rs)?;
        let start = Instant::now();
        let sync_fut = self.run_helper(envs, workspace_root, sync_args);
        tokio::select! {
            biased;
            _ = ct.cancelled() => return Err(CoreError::Cancelled),
            res = tokio::time::timeout(self.sync_timeout, sync_fut) => match res {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(CoreError::sync_failed(rs.revision.clone(), e.to_string())),
                Err(_) => return Err(CoreError::timeout(rs.revision.clone())),
            },
        }
        let elapsed = start.elapsed();
        if elapsed > WARN_AFTER {
            warn!("sync of {rs} took {elapsed:?}, past the {WARN_AFTER:?} soft limit");
        }

        let checkout = Checkout::new(workspace_root.to_path_buf(), self.git_binary.clone());
        checkout
            .set_remote_url("origin", &rs.repo)
            .await
            .map_err(|e| CoreError::sync_failed(rs.revision.clone(), e.to_string()))?;

        let want = CommitHash::new(rs.revision.clone());
        let got = checkout
            .revision()
            .await
            .map_err(|e| CoreError::sync_failed(rs.revision.clone(), e.to_string()))?;
        if got != want {
            return Err(CoreError::revision_mismatch(want, got));
        }

        Ok(checkout)
    }

    fn sync_args(&self, rs: &RepoState) -> Result<Vec<String>, CoreError> {
        let mut args = vec![
            "sync".to_string(),
            "--revision".to_string(),
            rs.revision.clone(),
            "--no-hooks".to_string(),
            "--shallow".to_string(),
        ];
        if !self.skip_topics_download {
            args.push("--download-topics".to_string());
        }
        if rs.is_tryjob() {
            let patch = rs.patch.as_ref().expect("is_tryjob implies patch is set");
            let patch_ref = patch
                .patch_ref()
                .map_err(|e| CoreError::env_error(e.to_string()))?;
            args.push("--patch-ref".to_string());
            args.push(patch_ref);
            args.push("--patch-repo".to_string());
            args.push(patch.patch_repo(&rs.repo).to_string());
            args.push("--patch-revision".to_string());
            args.push(rs.revision.clone());
        }
        Ok(args)
    }

    /// `PATH` prepended with the helper and interpreter directories; a
    /// private `HOME`/wrapper-home redirected into `workspace_root`; the
    /// per-worker object cache path; and flags disabling the helper's own
    /// self-update and metrics upload. Everything else is inherited.
    fn build_env(
        &self,
        home: &Path,
        wrapper_home: &Path,
        worker_cache: &Path,
    ) -> Result<Vec<(&'static str, OsString)>, CoreError> {
        let path = env::join_paths(
            [self.helper_dir.clone(), self.interpreter_dir.clone()]
                .into_iter()
                .chain(env::split_paths(&env::var_os("PATH").unwrap_or_default())),
        )
        .map_err(|e| CoreError::env_error(format!("building PATH: {e}")))?;

        Ok(vec![
            ("PATH", path),
            ("HOME", home.as_os_str().to_os_string()),
            ("SYNC_WRAPPER_HOME", wrapper_home.as_os_str().to_os_string()),
            (
                "SYNC_OBJECT_CACHE",
                worker_cache.as_os_str().to_os_string(),
            ),
            ("SYNC_DISABLE_SELF_UPDATE", "1".into()),
            ("SYNC_DISABLE_METRICS_UPLOAD", "1".into()),
        ])
    }

    // Best-effort: absence of a global config is normal, not an error.
    fn copy_global_config(&self, private_home: &Path) {
        let Some(real_home) = env::var_os("HOME").map(PathBuf::from) else {
            return;
        };
        let src = real_home.join(".gitconfig");
        let dst = private_home.join(".gitconfig");
        match std::fs::copy(&src, &dst) {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("couldn't copy global git config from {src:?}: {e}"),
        }
    }

    async fn run_helper(
        &self,
        envs: Vec<(&'static str, OsString)>,
        cwd: &Path,
        args: Vec<String>,
    ) -> anyhow::Result<()> {
        let mut cmd = tokio::process::Command::new(&self.helper_bin);
        cmd.current_dir(cwd).args(&args).envs(envs).kill_on_drop(true);
        cmd.execute().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::git::test_utils::{TempRepo, WorktreeExt as _};
    use crate::repo_state::PatchSet;
    use crate::test_support::write_fake_sync_helper;

    #[test]
    fn sync_args_include_download_topics_by_default() {
        let driver = SyncDriver::new("/helper", "/interp", "/usr/bin/git", Duration::from_secs(1));
        let rs = RepoState::new("https://example.com/repo.git", "deadbeef");
        let args = driver.sync_args(&rs).unwrap();
        assert!(args.contains(&"--download-topics".to_string()));
        assert!(!args.iter().any(|a| a == "--patch-ref"));
    }

    #[test]
    fn skip_topics_download_omits_flag() {
        let driver = SyncDriver::new("/helper", "/interp", "/usr/bin/git", Duration::from_secs(1))
            .skip_topics_download(true);
        let rs = RepoState::new("https://example.com/repo.git", "deadbeef");
        let args = driver.sync_args(&rs).unwrap();
        assert!(!args.contains(&"--download-topics".to_string()));
    }

    #[test]
    fn tryjob_adds_patch_ref_args() {
        let driver = SyncDriver::new("/helper", "/interp", "/usr/bin/git", Duration::from_secs(1));
        let rs = RepoState::new("https://example.com/repo.git", "deadbeef").with_patch(PatchSet {
            issue: "12345".into(),
            patchset: "3".into(),
            server: "https://review.example.com".into(),
            patch_repo: None,
        });
        let args = driver.sync_args(&rs).unwrap();
        let idx = args.iter().position(|a| a == "--patch-ref").unwrap();
        assert_eq!(args[idx + 1], "refs/changes/45/12345/3");
        let idx = args.iter().position(|a| a == "--patch-repo").unwrap();
        assert_eq!(args[idx + 1], "https://example.com/repo.git");
    }

    #[tokio::test]
    async fn successful_sync_checks_out_the_pinned_revision() {
        let origin = TempRepo::new().await.unwrap();
        let commit = origin.commit("first").await.unwrap();

        let helper_dir = TempDir::new().unwrap();
        write_fake_sync_helper(helper_dir.path(), origin.path());

        let driver = SyncDriver::new(
            helper_dir.path(),
            helper_dir.path(),
            "/usr/bin/git",
            Duration::from_secs(10),
        );
        let workspace_root = TempDir::new().unwrap();
        let worker_cache = TempDir::new().unwrap();
        let rs = RepoState::new(origin.path().display().to_string(), commit.hash.to_string());
        let ct = CancellationToken::new();

        let checkout = driver
            .sync(&ct, &rs, worker_cache.path(), workspace_root.path())
            .await
            .unwrap();

        assert_eq!(checkout.revision().await.unwrap(), commit.hash);
        assert!(!checkout.is_dirty().await.unwrap());
    }

    #[tokio::test]
    async fn tryjob_sync_leaves_the_tree_dirty_while_plain_sync_does_not() {
        let origin = TempRepo::new().await.unwrap();
        std::fs::write(origin.path().join("tracked.txt"), "hello\n").unwrap();
        origin.run_git(["add", "tracked.txt"]).await.unwrap();
        let commit = origin.commit("add tracked file").await.unwrap();

        let helper_dir = TempDir::new().unwrap();
        write_fake_sync_helper(helper_dir.path(), origin.path());
        let driver = SyncDriver::new(
            helper_dir.path(),
            helper_dir.path(),
            "/usr/bin/git",
            Duration::from_secs(10),
        );
        let worker_cache = TempDir::new().unwrap();
        let ct = CancellationToken::new();
        let rs = RepoState::new(origin.path().display().to_string(), commit.hash.to_string());

        let clean_root = TempDir::new().unwrap();
        let checkout = driver
            .sync(&ct, &rs, worker_cache.path(), clean_root.path())
            .await
            .unwrap();
        assert!(!checkout.is_dirty().await.unwrap(), "plain sync must leave a clean tree");

        let tryjob_root = TempDir::new().unwrap();
        let rs = rs.with_patch(PatchSet {
            issue: "12345".into(),
            patchset: "3".into(),
            server: "https://review.example.com".into(),
            patch_repo: None,
        });
        let checkout = driver
            .sync(&ct, &rs, worker_cache.path(), tryjob_root.path())
            .await
            .unwrap();
        assert!(
            checkout.is_dirty().await.unwrap(),
            "tryjob sync must leave the patched file dirty relative to HEAD"
        );
    }
}
