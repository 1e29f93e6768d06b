use anyhow::Result;
use std::path::{Path, PathBuf};
use std::process::Command;

use super::{run, Driver};
use crate::config::Repo;

pub struct Git {
    /// Optional branch or tag to track instead of the remote HEAD.
    refspec: Option<String>,
    username: Option<String>,
    password: Option<String>,
}

impl Git {
    pub fn from_config(cfg: Option<&serde_json::Value>) -> Self {
        let get = |key: &str| {
            cfg.and_then(|v| v.get(key))
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
        };
        Self {
            refspec: get("ref"),
            username: get("username"),
            password: get("password"),
        }
    }

    /// Inject configured credentials into an https URL. SSH and already
    /// authenticated URLs pass through untouched.
    fn authenticated_url(&self, url: &str) -> String {
        let (Some(user), Some(pass)) = (&self.username, &self.password) else {
            return url.to_string();
        };
        let Some(rest) = url.strip_prefix("https://") else {
            return url.to_string();
        };
        if rest.contains('@') {
            return url.to_string();
        }
        format!("https://{}:{}@{}", user, pass, rest)
    }

    fn base_cmd(&self) -> Command {
        let mut cmd = Command::new("git");
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        cmd.env("GIT_SSH_COMMAND", "ssh -o BatchMode=yes");
        cmd
    }
}

impl Driver for Git {
    fn working_dir(&self, db_root: &Path, name: &str, _repo: &Repo) -> PathBuf {
        db_root.join(format!("vcs-{}", sanitize(name)))
    }

    fn pull_or_clone(&self, dir: &Path, url: &str) -> Result<String> {
        let url = self.authenticated_url(url);
        if !dir.join(".git").exists() {
            let mut cmd = self.base_cmd();
            cmd.arg("clone").arg("--depth").arg("1");
            if let Some(r) = &self.refspec {
                cmd.arg("--branch").arg(r);
            }
            cmd.arg(&url).arg(dir);
            run(cmd)?;
        } else {
            let mut fetch = self.base_cmd();
            fetch.arg("-C").arg(dir).arg("fetch").arg("--depth").arg("1").arg("-q").arg("origin");
            if let Some(r) = &self.refspec {
                fetch.arg(r);
            }
            run(fetch)?;
            let mut reset = self.base_cmd();
            reset
                .arg("-C")
                .arg(dir)
                .arg("reset")
                .arg("--hard")
                .arg("-q")
                .arg("FETCH_HEAD");
            run(reset)?;
        }
        let mut rev = self.base_cmd();
        rev.arg("-C").arg(dir).arg("rev-parse").arg("HEAD");
        run(rev)
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_only_apply_to_bare_https_urls() {
        let g = Git {
            refspec: None,
            username: Some("u".into()),
            password: Some("p".into()),
        };
        assert_eq!(
            g.authenticated_url("https://example.com/r.git"),
            "https://u:p@example.com/r.git"
        );
        assert_eq!(
            g.authenticated_url("https://x:y@example.com/r.git"),
            "https://x:y@example.com/r.git"
        );
        assert_eq!(
            g.authenticated_url("git@example.com:o/r.git"),
            "git@example.com:o/r.git"
        );
    }

    #[test]
    fn working_dir_is_deterministic_and_sanitized() {
        let g = Git::from_config(None);
        let repo: Repo =
            serde_json::from_value(serde_json::json!({ "url": "https://example.com/r.git" }))
                .unwrap();
        let a = g.working_dir(Path::new("/db"), "org/repo", &repo);
        let b = g.working_dir(Path::new("/db"), "org/repo", &repo);
        assert_eq!(a, b);
        assert_eq!(a, PathBuf::from("/db/vcs-org_repo"));
    }
}
