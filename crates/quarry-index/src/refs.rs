//! Index-directory discovery, claiming, and garbage collection.
//!
//! At process start every `idx-*` entry under the database root is read as an
//! index reference (manifest header only). Searchers claim references whose
//! (url, revision) match their checkout; once startup settles, everything
//! unclaimed is swept.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::store::MANIFEST_FILE;
use crate::Index;

/// A persisted index directory pinned to the (url, revision) it was built
/// for. Existence of a reference implies existence of its directory.
#[derive(Debug, Clone)]
pub struct IndexRef {
    pub url: String,
    pub rev: String,
    dir: PathBuf,
}

/// Only the header fields matter when scanning; the file table is skipped.
#[derive(Deserialize)]
struct ManifestHead {
    url: String,
    rev: String,
}

impl IndexRef {
    pub fn read(dir: impl AsRef<Path>) -> Result<IndexRef> {
        let dir = dir.as_ref().to_path_buf();
        let path = dir.join(MANIFEST_FILE);
        let head: ManifestHead = serde_json::from_str(
            &std::fs::read_to_string(&path)
                .with_context(|| format!("read manifest {}", path.display()))?,
        )
        .with_context(|| format!("parse manifest {}", path.display()))?;
        Ok(IndexRef {
            url: head.url,
            rev: head.rev,
            dir,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn open(&self) -> Result<Index> {
        Index::open(&self.dir)
    }

    pub fn remove(&self) -> std::io::Result<()> {
        std::fs::remove_dir_all(&self.dir)
    }
}

/// The set of index references found in the database root at startup.
#[derive(Debug, Default)]
pub struct FoundRefs {
    refs: Vec<IndexRef>,
    claimed: HashSet<PathBuf>,
    /// Every `idx-*` entry seen, readable or not; the sweep covers both.
    all_dirs: Vec<PathBuf>,
}

impl FoundRefs {
    /// Find a reference for (url, rev); None when no such index exists.
    pub fn find(&self, url: &str, rev: &str) -> Option<IndexRef> {
        self.refs
            .iter()
            .find(|r| r.url == url && r.rev == rev && !self.claimed.contains(&r.dir))
            .cloned()
    }

    /// Claim a reference so the sweep leaves its directory alone.
    pub fn claim(&mut self, r: &IndexRef) {
        self.claimed.insert(r.dir.clone());
    }

    /// Delete every found directory that was not claimed, including entries
    /// that were unreadable at scan time.
    pub fn remove_unclaimed(&self) -> std::io::Result<()> {
        for dir in &self.all_dirs {
            if self.claimed.contains(dir) {
                continue;
            }
            tracing::info!(dir = %dir.display(), "removing stale index directory");
            std::fs::remove_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }
}

/// Scan the database root for `idx-*` directories. Unreadable entries are
/// dropped from the claimable set but still recorded for the sweep.
pub fn scan_refs(db_root: impl AsRef<Path>) -> Result<FoundRefs> {
    let db_root = db_root.as_ref();
    let mut found = FoundRefs::default();
    let entries = match std::fs::read_dir(db_root) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(found),
        Err(e) => {
            return Err(e).with_context(|| format!("read database root {}", db_root.display()))
        }
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with("idx-") {
            continue;
        }
        let dir = entry.path();
        found.all_dirs.push(dir.clone());
        match IndexRef::read(&dir) {
            Ok(r) => found.refs.push(r),
            Err(e) => tracing::debug!(dir = %dir.display(), error = %e, "skipping unreadable index directory"),
        }
    }
    Ok(found)
}

/// A fresh index directory name under the database root.
pub fn next_index_dir(db_root: impl AsRef<Path>) -> PathBuf {
    db_root
        .as_ref()
        .join(format!("idx-{:016x}", rand::random::<u64>()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_index_dir_names_are_unique() {
        let a = next_index_dir("/tmp");
        let b = next_index_dir("/tmp");
        assert_ne!(a, b);
        assert!(a.file_name().unwrap().to_string_lossy().starts_with("idx-"));
    }

    #[test]
    fn scan_of_missing_root_is_empty() {
        let found = scan_refs("/definitely/not/a/real/path").unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn claimed_refs_survive_the_sweep() -> Result<()> {
        let db = tempfile::tempdir()?;
        for name in ["idx-aaaa", "idx-bbbb"] {
            let dir = db.path().join(name);
            std::fs::create_dir(&dir)?;
            std::fs::write(
                dir.join(MANIFEST_FILE),
                format!(
                    r#"{{"url":"file:///{n}","rev":"1","built_at_ms":0,"version":1,"files":[]}}"#,
                    n = name
                ),
            )?;
        }
        // An unreadable directory is swept even though it is not claimable.
        std::fs::create_dir(db.path().join("idx-broken"))?;

        let mut found = scan_refs(db.path())?;
        assert_eq!(found.len(), 2);
        let r = found.find("file:///idx-aaaa", "1").expect("ref should exist");
        found.claim(&r);
        found.remove_unclaimed()?;

        assert!(db.path().join("idx-aaaa").exists());
        assert!(!db.path().join("idx-bbbb").exists());
        assert!(!db.path().join("idx-broken").exists());
        Ok(())
    }
}
