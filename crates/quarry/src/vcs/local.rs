use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use super::Driver;
use crate::config::Repo;

/// A directory already on disk. The "revision" is the modification time of
/// the symlink-resolved target, so touching the tree triggers a reindex on
/// the next poll. Cloning is not supported: absence is a permanent error.
pub struct Local;

impl Driver for Local {
    fn working_dir(&self, _db_root: &Path, _name: &str, repo: &Repo) -> PathBuf {
        PathBuf::from(repo.url.trim_start_matches("file://"))
    }

    fn pull_or_clone(&self, dir: &Path, url: &str) -> Result<String> {
        let real = dir
            .canonicalize()
            .with_context(|| format!("location {} not found", url))?;
        let meta = std::fs::metadata(&real)
            .with_context(|| format!("could not stat {}", real.display()))?;
        let mtime = meta
            .modified()
            .with_context(|| format!("no modification time for {}", real.display()))?;
        let d = mtime.duration_since(UNIX_EPOCH).unwrap_or_default();
        Ok(format!("{}.{:09}", d.as_secs(), d.subsec_nanos()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_target_is_a_permanent_error() {
        let err = Local
            .pull_or_clone(Path::new("/no/such/dir"), "file:///no/such/dir")
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn revision_tracks_mtime() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let rev = Local.pull_or_clone(dir.path(), "file:///x")?;
        assert!(!rev.is_empty());
        // Unchanged directory, unchanged revision.
        assert_eq!(Local.pull_or_clone(dir.path(), "file:///x")?, rev);
        Ok(())
    }

    #[test]
    fn working_dir_strips_file_scheme() {
        let repo: Repo = serde_json::from_value(
            serde_json::json!({ "url": "file:///tmp/tree", "vcs": "local" }),
        )
        .unwrap();
        assert_eq!(
            Local.working_dir(Path::new("/db"), "a", &repo),
            PathBuf::from("/tmp/tree")
        );
    }
}
