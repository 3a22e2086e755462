// In-process configuration knobs owned by this crate. Constructed
// directly by a caller, or deserialized from whatever TOML/JSON a host
// binary loaded -- loading that file (or parsing CLI flags) is the
// host's job, not this crate's.

use std::path::PathBuf;
use std::time::Duration;

use schemars::JsonSchema;
use serde::Deserialize;

fn default_workers() -> usize {
    10
}

fn default_sync_timeout_secs() -> u64 {
    900
}

fn default_git_binary() -> PathBuf {
    PathBuf::from("git")
}

#[derive(Deserialize, JsonSchema, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct WorkspacePoolConfig {
    /// Size of the bounded worker pool.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Persistent object-cache parent; per-worker subdirectories live here.
    pub cache_root: PathBuf,

    /// Parent of transient workspace directories; cleaned on startup.
    pub workdir: PathBuf,

    /// Directory containing the external sync helper; prepended to `PATH`
    /// along with the interpreter directory.
    pub helper_dir: PathBuf,

    /// Hard per-sync wall-clock bound, in seconds.
    #[serde(default = "default_sync_timeout_secs")]
    pub sync_timeout_secs: u64,

    /// `git` binary used to inspect and repoint checkouts after a sync.
    #[serde(default = "default_git_binary")]
    pub git_binary: PathBuf,
}

impl WorkspacePoolConfig {
    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_secs)
    }
}
