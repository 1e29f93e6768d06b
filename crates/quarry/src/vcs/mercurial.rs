use anyhow::Result;
use std::path::{Path, PathBuf};
use std::process::Command;

use super::{run, Driver};
use crate::config::Repo;

pub struct Mercurial;

impl Driver for Mercurial {
    fn working_dir(&self, db_root: &Path, name: &str, _repo: &Repo) -> PathBuf {
        db_root.join(format!("vcs-{}", name.replace('/', "_")))
    }

    fn pull_or_clone(&self, dir: &Path, url: &str) -> Result<String> {
        if !dir.join(".hg").exists() {
            let mut cmd = Command::new("hg");
            cmd.arg("clone").arg(url).arg(dir);
            run(cmd)?;
        } else {
            let mut cmd = Command::new("hg");
            cmd.arg("pull").arg("-u").arg("-R").arg(dir);
            run(cmd)?;
        }
        let mut rev = Command::new("hg");
        rev.arg("id").arg("-i").arg("-R").arg(dir);
        run(rev)
    }
}
