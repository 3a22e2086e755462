// Shared fixtures for tests that need a real, successful sync without the
// actual sync tool available in this environment: a tiny shell script that
// plays the part of `sync_helper`, checking out a local `TempRepo` fixture
// instead of talking to a review server or a real dependency-tree tool.

use std::path::Path;

/// Writes an executable `sync_helper` into `helper_dir` that answers
/// `config` with success and answers `sync` by fetching `origin` (expected
/// to be a local repo, e.g. a [`crate::git::test_utils::TempRepo`]'s path)
/// and checking out whatever `--revision` it was given. If invoked with
/// `--patch-ref`, it also appends to `tracked.txt` so the resulting tree is
/// dirty relative to `HEAD` -- standing in for a tryjob's applied patch.
pub(crate) fn write_fake_sync_helper(helper_dir: &Path, origin: &Path) {
    use std::os::unix::fs::PermissionsExt as _;

    let script = format!(
        r#"#!/bin/sh
set -e
case "$1" in
  config) exit 0 ;;
  sync)
    shift
    revision=""
    patch=0
    while [ $# -gt 0 ]; do
      case "$1" in
        --revision) revision="$2"; shift 2 ;;
        --patch-ref) patch=1; shift 2 ;;
        --patch-repo) shift 2 ;;
        --patch-revision) shift 2 ;;
        --no-hooks|--shallow|--download-topics) shift ;;
        *) shift ;;
      esac
    done
    git init --quiet .
    git remote add origin "{origin}"
    git fetch --quiet origin
    git checkout --quiet "$revision"
    if [ "$patch" = "1" ]; then echo patched >> tracked.txt; fi
    ;;
esac
"#,
        origin = origin.display(),
    );

    let path = helper_dir.join("sync_helper");
    std::fs::write(&path, script).expect("writing fake sync_helper");
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).expect("marking fake sync_helper executable");
}
