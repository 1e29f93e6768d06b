//! Version-control drivers: materialize the latest revision of a repository
//! into a working directory and report an opaque revision string.
//!
//! All backends shell out to their command-line client; the calls run on the
//! blocking pool, never on the async runtime threads.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::Repo;

mod git;
mod local;
mod mercurial;
mod subversion;

/// Directory names (VCS metadata) the indexer must never descend into,
/// regardless of which backend produced the checkout.
pub const SPECIAL_FILES: &[&str] = &[".bzr", ".git", ".hg", ".svn"];

pub trait Driver: Send + Sync {
    /// Filesystem location where this backend materializes the repository.
    /// A pure function of its inputs.
    fn working_dir(&self, db_root: &Path, name: &str, repo: &Repo) -> PathBuf;

    /// Clone when `dir` is absent, pull otherwise; returns the revision now
    /// checked out.
    fn pull_or_clone(&self, dir: &Path, url: &str) -> Result<String>;

    /// Metadata directory names the indexer must skip.
    fn special_files(&self) -> &[&str] {
        SPECIAL_FILES
    }
}

/// Construct the driver for a backend kind. `cfg` is the opaque
/// `vcs-config` object from the repository descriptor.
pub fn create(kind: &str, cfg: Option<&serde_json::Value>) -> Result<Box<dyn Driver>> {
    match kind {
        "git" | "" => Ok(Box::new(git::Git::from_config(cfg))),
        "hg" => Ok(Box::new(mercurial::Mercurial)),
        "svn" => Ok(Box::new(subversion::Subversion)),
        "local" => Ok(Box::new(local::Local)),
        other => bail!("unknown vcs backend: {}", other),
    }
}

/// Run a command, returning trimmed stdout; a non-zero exit becomes an error
/// carrying the trimmed stderr.
pub(crate) fn run(mut cmd: Command) -> Result<String> {
    let program = cmd.get_program().to_string_lossy().to_string();
    let out = cmd
        .output()
        .with_context(|| format!("failed to spawn {}", program))?;
    if !out.status.success() {
        bail!(
            "{} failed: {}",
            program,
            String::from_utf8_lossy(&out.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_backend_is_rejected() {
        assert!(create("cvs", None).is_err());
        assert!(create("local", None).is_ok());
        assert!(create("git", None).is_ok());
        assert!(create("hg", None).is_ok());
        assert!(create("svn", None).is_ok());
    }

    #[test]
    fn failing_command_reports_stderr() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(">&2 echo boom; exit 3");
        let err = run(cmd).unwrap_err();
        assert!(err.to_string().contains("boom"));
    }
}
