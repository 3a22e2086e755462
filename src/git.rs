use core::fmt;
use core::fmt::{Debug, Display};
use std::ffi::OsStr;
use std::ops::Deref;
use std::os::unix::ffi::OsStrExt as _;
use std::path::Path;
use std::process;
use std::sync::LazyLock;
use std::io;

use anyhow::anyhow;
use anyhow::{bail, Context};
use futures::future::BoxFuture;
use futures::FutureExt;
#[allow(unused_imports)]
use log::{debug, error, info, warn};
use tokio::process::Command;
use tokio::sync::{Semaphore, SemaphorePermit};

use crate::process::CommandExt;
use crate::process::OutputExt;

#[derive(Clone, PartialEq, Eq, Debug, Hash)]
pub struct Hash(String);

// My attempt at newtypery for Git IDs. Why is this so damned verbose?
// The answer is that Deref lets you do some stuff on the inner type via
// expressions of the outer type, but it doesn't actually make the outer type
// implement the traits of the inner type. So we have to manually forward all
// those traits.

// A Hash is an ID for referring to an object in a git repository, I think the
// proper name would be ObjectId but... whatever.
impl Hash {
    // Note that this is infallible. That's because having a Hash doesn't
    // guarantee you that the ID refers to an object in an actual repo. Even if
    // we checked that at construction time, it's not possible to enforce that
    // variant going forward. So, you'll just have to do error handling whenever
    // you are dealing with Git objects, like you would with any mutable
    // database.
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn abbrev(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl AsRef<OsStr> for Hash {
    fn as_ref(&self) -> &OsStr {
        OsStr::from_bytes(self.0.as_bytes())
    }
}

impl AsRef<str> for Hash {
    fn as_ref(&self) -> &str {
        self.0.as_ref()
    }
}

impl Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, PartialEq, Eq, Debug, Hash)]
pub struct CommitHash(Hash);

impl CommitHash {
    pub fn new(s: impl Into<String>) -> Self {
        Self(Hash::new(s))
    }
}

impl From<CommitHash> for Hash {
    fn from(h: CommitHash) -> Hash {
        h.0
    }
}

impl Deref for CommitHash {
    type Target = Hash;

    fn deref(&self) -> &Hash {
        &self.0
    }
}

impl AsRef<OsStr> for CommitHash {
    fn as_ref(&self) -> &OsStr {
        self.0.as_ref()
    }
}

impl AsRef<str> for CommitHash {
    fn as_ref(&self) -> &str {
        self.0.as_ref()
    }
}

impl Display for CommitHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, PartialEq, Eq, Debug, Hash)]
pub struct TreeHash(Hash);

impl TreeHash {
    pub fn new(s: impl Into<String>) -> Self {
        Self(Hash::new(s))
    }
}

impl Deref for TreeHash {
    type Target = Hash;

    fn deref(&self) -> &Hash {
        &self.0
    }
}

impl From<TreeHash> for Hash {
    fn from(h: TreeHash) -> Hash {
        h.0
    }
}

impl AsRef<OsStr> for TreeHash {
    fn as_ref(&self) -> &OsStr {
        self.0.as_ref()
    }
}

impl Display for TreeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct Commit {
    pub hash: CommitHash,
    pub tree: TreeHash,
}

impl Commit {
    #[cfg(test)]
    pub fn arbitrary() -> Self {
        Self {
            hash: CommitHash::new("080b8ecbad3e34e55c5a035af80100f73b742a8d"),
            tree: TreeHash::new("6366d790125291272542a6b40f6fd3400e080821"),
        }
    }
}

impl From<Commit> for CommitHash {
    fn from(val: Commit) -> Self {
        val.hash
    }
}

static COMMAND_SEM: LazyLock<Semaphore> = LazyLock::new(|| Semaphore::new(64));

// Wrapper for a Command, that holds a semaphore for as long as the process
// exists. Just delegates enough methods to allow you to use it without
// letting you drop the semaphore until the process has terminated (which
// hopefully implies the stdio pipes have been closed...).
// This exists to try and avoid running into file descriptor exhaustion, without
// needing any retry logic that would risk creating livelocks.
#[derive(Debug)]
struct GitCommand {
    _permit: SemaphorePermit<'static>,
    command: Command,
}

impl GitCommand {
    fn arg(&mut self, arg: impl AsRef<OsStr>) -> &mut GitCommand {
        self.command.arg(arg);
        self
    }

    fn args(&mut self, args: impl IntoIterator<Item = impl AsRef<OsStr>>) -> &mut GitCommand {
        self.command.args(args);
        self
    }

    async fn execute(&mut self) -> anyhow::Result<process::Output> {
        self.command.execute().await
    }

    pub async fn output(&mut self) -> io::Result<process::Output> {
        self.command.output().await
    }
}

// Trait's can't have private methods, this is one reason why my
// inheritance-brained idea to use this Worktree kinda like a superclass was not
// a very good one.  This trait is a workaround for that, to avoid linter
// warnings from having a public method return a private type.
trait WorktreePriv: Worktree {
    // Convenience function to create a git command with some pre-filled args.
    // Returns a BoxFuture as an utterly mysterious workaround for what I
    // believe is a compiler bug:
    // https://stackoverflow.com/questions/79350718/one-type-is-more-general-than-the-other-for-osstr-and-tokiospawn?noredirect=1#comment139931420_79350718
    fn git<'a, I, S>(&'a self, args: I) -> BoxFuture<'a, GitCommand>
    where
        I: IntoIterator<Item = S> + Send + 'a,
        S: AsRef<OsStr>,
    {
        (async {
            let mut cmd = Command::new(self.git_binary());
            cmd.current_dir(self.path());
            cmd.args(args);
            GitCommand {
                _permit: COMMAND_SEM.acquire().await.unwrap(),
                command: cmd,
            }
        })
        .boxed()
    }
}

impl<W: Worktree + ?Sized> WorktreePriv for W {}

// This is a weird kinda inheritance type thing to enable different types of worktree (with
// different fields and drop behaviours) to share the functionality that users actually care about.
// Not really sure if this is the Rust Way or not.
pub trait Worktree: Debug + Sync {
    // Directory where git commands should be run.
    fn path(&self) -> &Path;
    // Path to Git binary.
    fn git_binary(&self) -> &Path;

    async fn lookup_git_dir(&self, rev_parse_arg: &str) -> anyhow::Result<std::path::PathBuf> {
        let output = self
            .git(["rev-parse", rev_parse_arg])
            .await
            .execute()
            .await
            .map_err(|e| anyhow!("'git rev-parse {rev_parse_arg}' failed: {e}"))?;
        let mut bytes = output.stdout;
        while bytes.last() == Some(&b'\n') {
            bytes.pop();
        }
        Ok(OsStr::from_bytes(&bytes).into())
    }

    // Directory where the main git database lives, shared by all worktrees.
    async fn git_common_dir(&self) -> anyhow::Result<std::path::PathBuf> {
        self.lookup_git_dir("--git-common-dir").await
    }

    // Directory where this workrtee's local git database lives.
    // See https://git-scm.com/docs/git-worktree#_details (I haven't read this properly lmao).
    async fn git_dir(&self) -> anyhow::Result<std::path::PathBuf> {
        self.lookup_git_dir("--absolute-git-dir").await
    }

    // None means we successfully looked it up but it didn't exist.
    async fn rev_parse<S>(&self, rev_spec: S) -> anyhow::Result<Option<Commit>>
    where
        S: AsRef<OsStr>,
    {
        // We don't use log_n1 here because we want to check the exit code,
        // that API is designed for users who assume the revision exists.
        let mut cmd = self.git(["log", "-n1", "--format=%H %T"]).await;
        let cmd = cmd.arg(rev_spec);
        let output = cmd.output().await.context("failed to run 'git log -n1'")?;
        // Hack: empirically, git returns 128 when the range is invalid, it's not documented
        // but hopefully this is stable behaviour that we're supposed to be able to rely on for
        // this...?
        let exit_code = output.code_not_killed()?;
        if exit_code == 128 {
            return Ok(None);
        }
        if exit_code != 0 {
            bail!("'git log -n1' failed with code {exit_code}");
        }
        let out_string =
            String::from_utf8(output.stdout).context("reading git rev-parse output")?;
        let parts: Vec<&str> = out_string.trim().splitn(2, " ").collect();
        if parts.len() != 2 {
            bail!(
                "Failed to parse result of {cmd:?} - {out_string:?}\nstderr: {:?}",
                String::from_utf8_lossy(&output.stderr)
            );
        }
        Ok(Some(Commit {
            hash: CommitHash::new(parts[0]),
            tree: TreeHash::new(parts[1]),
        }))
    }

    /// Runs an arbitrary git subcommand scoped to this worktree and returns
    /// its captured stdout. Used by [`crate::Checkout::run`].
    async fn run_git<S>(&self, args: impl IntoIterator<Item = S> + Send) -> anyhow::Result<Vec<u8>>
    where
        S: AsRef<OsStr> + Send,
    {
        Ok(self.git(args).await.execute().await?.stdout)
    }

    /// Sets the given remote to the given URL, creating it if necessary.
    async fn set_remote_url(&self, remote: &str, url: &str) -> anyhow::Result<()> {
        self.git(["remote", "set-url", remote, url])
            .await
            .execute()
            .await
            .with_context(|| format!("setting remote {remote} to {url}"))?;
        Ok(())
    }

    async fn checkout(&self, commit: &CommitHash) -> anyhow::Result<()> {
        self.git(["checkout"])
            .await
            .arg(commit)
            .output()
            .await?
            .ok()
            .context(format!(
                "checking out revision {:?} in {:?}",
                commit,
                self.path()
            ))
    }
}

#[cfg(test)]
pub mod test_utils {
    use std::path::PathBuf;

    use tempfile::TempDir;

    use super::*;

    #[derive(Debug)]
    pub struct TempRepo {
        temp_dir: TempDir,
        git_binary: PathBuf,
    }

    // Empty repository in a temporary directory, torn down on drop.
    impl TempRepo {
        pub async fn new() -> anyhow::Result<Self> {
            // https://www.youtube.com/watch?v=_MwboA5NIVA
            let zelf = Self {
                temp_dir: TempDir::with_prefix("fixture-").expect("couldn't make tempdir"),
                git_binary: PathBuf::from("/usr/bin/git"),
            };
            zelf.git(["init"]).await.execute().await?;
            zelf.git(["config", "user.email", "test@example.com"])
                .await
                .execute()
                .await?;
            zelf.git(["config", "user.name", "test"])
                .await
                .execute()
                .await?;
            Ok(zelf)
        }

        pub fn path(&self) -> &Path {
            self.temp_dir.path()
        }
    }

    impl Worktree for TempRepo {
        fn path(&self) -> &Path {
            self.temp_dir.path()
        }

        fn git_binary(&self) -> &Path {
            &self.git_binary
        }
    }

    pub trait WorktreeExt: Worktree {
        // timestamp is used for both committer and author. This ought to make
        // commit hashes deterministic.
        async fn commit<S>(&self, message: S) -> anyhow::Result<Commit>
        where
            S: AsRef<OsStr>,
        {
            self.git(["commit", "-m"])
                .await
                .arg(message)
                .arg("--allow-empty")
                .execute()
                .await
                .context("'git commit' failed")?;
            // Doesn't seem like there's a safer way to do this than commit and then retroactively parse
            // HEAD and hope nobody else is messing with us.
            self.rev_parse("HEAD")
                .await?
                .ok_or(anyhow!("no HEAD after committing"))
        }
    }

    impl<W: Worktree> WorktreeExt for W {}
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use tempfile::TempDir;

    use super::*;

    #[derive(Debug)]
    struct PersistentWorktree {
        path: PathBuf,
        git_binary: PathBuf,
    }

    impl Worktree for PersistentWorktree {
        fn path(&self) -> &Path {
            &self.path
        }

        fn git_binary(&self) -> &Path {
            &self.git_binary
        }
    }

    #[tokio::test]
    async fn test_new_gitdir_notgit() {
        let tmp_dir = TempDir::new().expect("couldn't make tempdir");
        let wt = PersistentWorktree {
            path: tmp_dir.path().to_path_buf(),
            git_binary: PathBuf::from("/usr/bin/git"),
        };
        assert!(
            wt.git_common_dir().await.is_err(),
            "opening repo with no .git didn't fail"
        );
    }

    #[tokio::test]
    async fn test_rev_parse_nonexistent() {
        use test_utils::TempRepo;
        let repo = TempRepo::new().await.unwrap();
        assert!(repo
            .rev_parse("nonexistent-branch")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_rev_parse_head() {
        use test_utils::{TempRepo, WorktreeExt as _};
        let repo = TempRepo::new().await.unwrap();
        let commit = repo.commit("first commit").await.unwrap();
        let found = repo.rev_parse("HEAD").await.unwrap().unwrap();
        assert_eq!(found.hash, commit.hash);
    }
}
