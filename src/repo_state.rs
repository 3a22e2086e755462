use std::fmt;

/// A pending patch against a review server: an issue/patchset pair, the
/// server that hosts it, and (optionally) the repository the patch applies
/// to, if different from the repo being synced.
#[derive(Clone, PartialEq, Eq, Debug, Hash)]
pub struct PatchSet {
    pub issue: String,
    pub patchset: String,
    pub server: String,
    pub patch_repo: Option<String>,
}

impl PatchSet {
    /// The ref name the sync tool fetches and applies, e.g.
    /// `refs/changes/45/12345/3` for issue 12345, patchset 3, or
    /// `refs/changes/07/7/1` for issue 7, patchset 1 -- the shard is always
    /// zero-padded to width 2, matching the convention `depot_tools`'
    /// `gclient_scm.py` uses (`issue[-2:].zfill(2)`).
    pub fn patch_ref(&self) -> anyhow::Result<String> {
        if self.issue.is_empty() {
            anyhow::bail!("empty issue number, can't derive a patch ref");
        }
        let last_two = self
            .issue
            .chars()
            .rev()
            .take(2)
            .collect::<String>()
            .chars()
            .rev()
            .collect::<String>();
        Ok(format!(
            "refs/changes/{last_two:0>2}/{}/{}",
            self.issue, self.patchset
        ))
    }

    /// The repo this patch must be fetched from, defaulting to `repo` when
    /// `patch_repo` is unset.
    pub fn patch_repo<'a>(&'a self, repo: &'a str) -> &'a str {
        self.patch_repo.as_deref().filter(|s| !s.is_empty()).unwrap_or(repo)
    }
}

/// Identifies one target tree: a repository, a pinned revision, and
/// optionally a pending patch to apply on top. Immutable once constructed.
#[derive(Clone, PartialEq, Eq, Debug, Hash)]
pub struct RepoState {
    pub repo: String,
    pub revision: String,
    pub patch: Option<PatchSet>,
}

impl RepoState {
    pub fn new(repo: impl Into<String>, revision: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            revision: revision.into(),
            patch: None,
        }
    }

    pub fn with_patch(mut self, patch: PatchSet) -> Self {
        self.patch = Some(patch);
        self
    }

    /// A `RepoState` is a tryjob iff it carries a patch whose issue,
    /// patchset and server are all non-empty.
    pub fn is_tryjob(&self) -> bool {
        self.patch.as_ref().is_some_and(|p| {
            !p.issue.is_empty() && !p.patchset.is_empty() && !p.server.is_empty()
        })
    }

    /// The sync tool's project name: the basename of `repo`, with any
    /// trailing `.git` stripped.
    pub fn project_name(&self) -> &str {
        let basename = self
            .repo
            .rsplit('/')
            .next()
            .unwrap_or(self.repo.as_str());
        basename.strip_suffix(".git").unwrap_or(basename)
    }
}

impl fmt::Display for RepoState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.repo, self.revision)?;
        if let Some(patch) = &self.patch {
            write!(f, " (patch {}/{})", patch.issue, patch.patchset)?;
        }
        Ok(())
    }
}
