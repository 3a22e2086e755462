// Small extension traits over `std`/`tokio` process types, split out of
// git.rs because the sync driver needs to run a non-git helper binary too.

use std::process::{self, Command as SyncCommand};

use anyhow::{bail, Context};
use tokio::process::Command;

pub trait OutputExt {
    /// The process exit code, or an error if the process was killed by a
    /// signal rather than exiting normally.
    fn code_not_killed(&self) -> anyhow::Result<i32>;

    /// Turns a non-zero exit status into an error carrying the captured
    /// stdout/stderr, so callers don't have to repeat that boilerplate at
    /// every call site.
    fn ok(&self) -> anyhow::Result<()>;
}

impl OutputExt for process::Output {
    fn code_not_killed(&self) -> anyhow::Result<i32> {
        self.status
            .code()
            .ok_or_else(|| anyhow::anyhow!("process was killed by a signal ({:?})", self.status))
    }

    fn ok(&self) -> anyhow::Result<()> {
        if self.status.success() {
            return Ok(());
        }
        bail!(
            "exited with {:?}\nstdout:\n{}\nstderr:\n{}",
            self.status,
            String::from_utf8_lossy(&self.stdout),
            String::from_utf8_lossy(&self.stderr),
        );
    }
}

pub trait CommandExt {
    // Run the command and check its exit status, returning the captured
    // output either way so the caller can inspect stdout on success.
    async fn execute(&mut self) -> anyhow::Result<process::Output>;
}

impl CommandExt for Command {
    async fn execute(&mut self) -> anyhow::Result<process::Output> {
        let output = self
            .output()
            .await
            .with_context(|| format!("spawning {:?}", self.as_std()))?;
        output
            .ok()
            .with_context(|| format!("running {:?}", self.as_std()))?;
        Ok(output)
    }
}

pub trait SyncCommandExt {
    fn execute(&mut self) -> anyhow::Result<process::Output>;
}

impl SyncCommandExt for SyncCommand {
    fn execute(&mut self) -> anyhow::Result<process::Output> {
        let output = self.output().with_context(|| format!("spawning {self:?}"))?;
        output.ok().with_context(|| format!("running {self:?}"))?;
        Ok(output)
    }
}
