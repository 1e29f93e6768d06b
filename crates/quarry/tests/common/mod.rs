#![allow(dead_code)]

use quarry::config::{Config, Repo};
use std::collections::BTreeMap;
use std::path::Path;

pub fn write_file(root: &Path, rel: &str, body: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, body).unwrap();
}

pub fn local_repo(dir: &Path) -> Repo {
    repo_json(serde_json::json!({
        "url": format!("file://{}", dir.display()),
        "vcs": "local",
    }))
}

pub fn repo_json(v: serde_json::Value) -> Repo {
    serde_json::from_value(v).unwrap()
}

pub fn config(dbpath: &Path, repos: BTreeMap<String, Repo>) -> Config {
    serde_json::from_value(serde_json::json!({
        "dbpath": dbpath.display().to_string(),
        "repos": serde_json::to_value(&repos).unwrap(),
    }))
    .unwrap()
}

/// Count the `idx-*` directories under a database root.
pub fn index_dir_count(db: &Path) -> usize {
    std::fs::read_dir(db)
        .map(|rd| {
            rd.flatten()
                .filter(|e| e.file_name().to_string_lossy().starts_with("idx-"))
                .count()
        })
        .unwrap_or(0)
}
