use anyhow::Result;
use std::path::{Path, PathBuf};
use std::process::Command;

use super::{run, Driver};
use crate::config::Repo;

pub struct Subversion;

impl Driver for Subversion {
    fn working_dir(&self, db_root: &Path, name: &str, _repo: &Repo) -> PathBuf {
        db_root.join(format!("vcs-{}", name.replace('/', "_")))
    }

    fn pull_or_clone(&self, dir: &Path, url: &str) -> Result<String> {
        if !dir.join(".svn").exists() {
            let mut cmd = Command::new("svn");
            cmd.arg("checkout")
                .arg("--non-interactive")
                .arg(url)
                .arg(dir);
            run(cmd)?;
        } else {
            let mut cmd = Command::new("svn");
            cmd.arg("update").arg("--non-interactive").arg(dir);
            run(cmd)?;
        }
        let mut rev = Command::new("svn");
        rev.arg("info").arg("--show-item").arg("revision").arg(dir);
        run(rev)
    }
}
