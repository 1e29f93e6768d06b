//! Configuration file loading and hot-reload diffing.
//!
//! The config is a JSON object: `max-concurrent-indexers`, `dbpath`, and a
//! `repos` map from repository name to descriptor. Descriptors are compared
//! by their canonical serialized form, so the hot-reload diff is insensitive
//! to in-memory representation.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub const DEFAULT_POLL_MS: u64 = 300_000;
pub const DEFAULT_MAX_CONCURRENT_INDEXERS: usize = 2;
pub const DEFAULT_DB_PATH: &str = "data";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(rename = "max-concurrent-indexers", default = "default_max_indexers")]
    pub max_concurrent_indexers: usize,
    #[serde(default = "default_dbpath")]
    pub dbpath: String,
    #[serde(default)]
    pub repos: BTreeMap<String, Repo>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrent_indexers: DEFAULT_MAX_CONCURRENT_INDEXERS,
            dbpath: DEFAULT_DB_PATH.to_string(),
            repos: BTreeMap::new(),
        }
    }
}

/// One configured repository. Unknown keys are rejected so a typo does not
/// silently disable a flag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Repo {
    pub url: String,
    #[serde(default = "default_vcs")]
    pub vcs: String,
    #[serde(rename = "vcs-config", default, skip_serializing_if = "Option::is_none")]
    pub vcs_config: Option<serde_json::Value>,
    /// Zero means the default poll interval.
    #[serde(rename = "ms-between-poll", default)]
    pub ms_between_poll: u64,
    #[serde(rename = "exclude-dot-files", default)]
    pub exclude_dot_files: bool,
    #[serde(rename = "enable-poll-updates", default = "default_true")]
    pub enable_poll_updates: bool,
    #[serde(rename = "enable-push-updates", default)]
    pub enable_push_updates: bool,
    #[serde(default)]
    pub hidden: bool,
    #[serde(rename = "url-pattern", default, skip_serializing_if = "Option::is_none")]
    pub url_pattern: Option<UrlPattern>,
}

/// Template for per-file deep links in the UI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UrlPattern {
    #[serde(rename = "base-url", default)]
    pub base_url: String,
    #[serde(default)]
    pub anchor: String,
}

impl UrlPattern {
    /// Expand the deep-link template for one file location. Recognized
    /// placeholders: `{url}`, `{path}`, `{line}`, `{filename}`, `{anchor}`.
    pub fn render(&self, repo_url: &str, path: &str, line: usize) -> String {
        let filename = path.rsplit('/').next().unwrap_or(path);
        let line_s = line.to_string();
        let anchor = self
            .anchor
            .replace("{line}", &line_s)
            .replace("{filename}", filename);
        self.base_url
            .replace("{url}", repo_url)
            .replace("{path}", path)
            .replace("{line}", &line_s)
            .replace("{filename}", filename)
            .replace("{anchor}", &anchor)
    }
}

impl Repo {
    pub fn poll_interval_ms(&self) -> u64 {
        if self.ms_between_poll == 0 {
            DEFAULT_POLL_MS
        } else {
            self.ms_between_poll
        }
    }

    /// Canonical serialized form used for hot-reload comparison.
    pub fn canonical(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Config> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read configuration {}", path.display()))?;
        let cfg: Config = serde_json::from_str(&text)
            .with_context(|| format!("parse configuration {}", path.display()))?;
        Ok(cfg)
    }
}

/// Outcome of diffing the running repo set against a freshly loaded one.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ConfigDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
}

impl ConfigDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

pub fn diff_repos(old: &BTreeMap<String, Repo>, new: &BTreeMap<String, Repo>) -> ConfigDiff {
    let mut diff = ConfigDiff::default();
    for (name, repo) in old {
        match new.get(name) {
            None => diff.removed.push(name.clone()),
            Some(next) if next.canonical() != repo.canonical() => diff.changed.push(name.clone()),
            Some(_) => {}
        }
    }
    for name in new.keys() {
        if !old.contains_key(name) {
            diff.added.push(name.clone());
        }
    }
    diff
}

fn default_max_indexers() -> usize {
    DEFAULT_MAX_CONCURRENT_INDEXERS
}

fn default_dbpath() -> String {
    DEFAULT_DB_PATH.to_string()
}

fn default_vcs() -> String {
    "git".to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_repo(url: &str) -> Repo {
        serde_json::from_value(serde_json::json!({ "url": url, "vcs": "local" })).unwrap()
    }

    #[test]
    fn defaults_apply_to_sparse_descriptors() {
        let cfg: Config = serde_json::from_str(
            r#"{ "repos": { "a": { "url": "file:///tmp/a", "vcs": "local" } } }"#,
        )
        .unwrap();
        assert_eq!(cfg.max_concurrent_indexers, 2);
        assert_eq!(cfg.dbpath, "data");
        let a = &cfg.repos["a"];
        assert_eq!(a.poll_interval_ms(), DEFAULT_POLL_MS);
        assert!(a.enable_poll_updates);
        assert!(!a.enable_push_updates);
        assert!(!a.hidden);
    }

    #[test]
    fn unknown_repo_keys_are_rejected() {
        let res: std::result::Result<Config, _> = serde_json::from_str(
            r#"{ "repos": { "a": { "url": "x", "enable-push-update": true } } }"#,
        );
        assert!(res.is_err());
    }

    #[test]
    fn diff_classifies_add_remove_change() {
        let mut old = BTreeMap::new();
        old.insert("same".to_string(), local_repo("file:///tmp/same"));
        old.insert("gone".to_string(), local_repo("file:///tmp/gone"));
        old.insert("moved".to_string(), local_repo("file:///tmp/old"));

        let mut new = BTreeMap::new();
        new.insert("same".to_string(), local_repo("file:///tmp/same"));
        new.insert("moved".to_string(), local_repo("file:///tmp/new"));
        new.insert("fresh".to_string(), local_repo("file:///tmp/fresh"));

        let diff = diff_repos(&old, &new);
        assert_eq!(diff.added, vec!["fresh"]);
        assert_eq!(diff.removed, vec!["gone"]);
        assert_eq!(diff.changed, vec!["moved"]);
    }

    #[test]
    fn identical_descriptors_do_not_diff() {
        let mut old = BTreeMap::new();
        old.insert("a".to_string(), local_repo("file:///tmp/a"));
        let new = old.clone();
        assert!(diff_repos(&old, &new).is_empty());
    }

    #[test]
    fn url_pattern_substitutes_placeholders() {
        let p = UrlPattern {
            base_url: "{url}/blob/main/{path}{anchor}".to_string(),
            anchor: "#L{line}".to_string(),
        };
        assert_eq!(
            p.render("https://example.com/r", "src/a.rs", 7),
            "https://example.com/r/blob/main/src/a.rs#L7"
        );
    }
}
