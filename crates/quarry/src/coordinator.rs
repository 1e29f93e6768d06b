//! Multi-repo coordinator: builds every configured searcher at startup with
//! bounded concurrency, garbage-collects stale index directories, publishes
//! the live searcher map, and applies configuration hot reload.

use anyhow::{Context, Result};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};

use quarry_index::FoundRefs;

use crate::config::{diff_repos, Config, Repo};
use crate::searcher::Searcher;

pub type SearcherMap = HashMap<String, Arc<Searcher>>;

/// Read-only view of the live searchers. The coordinator is the only writer;
/// the query dispatcher takes per-request snapshots.
#[derive(Clone, Default)]
pub struct Live {
    searchers: Arc<RwLock<SearcherMap>>,
    ready: Arc<AtomicBool>,
}

impl Live {
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> SearcherMap {
        self.searchers.read().clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<Searcher>> {
        self.searchers.read().get(name).cloned()
    }
}

pub struct Coordinator {
    conf_path: PathBuf,
    db_root: PathBuf,
    limiter: Arc<Semaphore>,
    /// The running configuration; repos that failed to build are dropped so
    /// the next reload pass treats a fixed entry as an addition.
    cfg: Mutex<Config>,
    live: Live,
}

impl Coordinator {
    pub fn new(conf_path: PathBuf, cfg: Config) -> Coordinator {
        let limiter = Arc::new(Semaphore::new(cfg.max_concurrent_indexers.max(1)));
        let db_root = PathBuf::from(&cfg.dbpath);
        Coordinator {
            conf_path,
            db_root,
            limiter,
            cfg: Mutex::new(cfg),
            live: Live::default(),
        }
    }

    pub fn live(&self) -> &Live {
        &self.live
    }

    /// Build every configured searcher, sweep unclaimed index directories,
    /// release the refresh loops, and publish the live map.
    pub async fn start(&self) -> Result<()> {
        std::fs::create_dir_all(&self.db_root).with_context(|| {
            format!("could not create database root {}", self.db_root.display())
        })?;
        let repos = self.cfg.lock().repos.clone();
        let refs = Arc::new(Mutex::new(
            quarry_index::scan_refs(&self.db_root).context("scan for existing indexes")?,
        ));

        let (searchers, errs) = self.build_searchers(&repos, refs.clone()).await;
        for (name, e) in &errs {
            tracing::error!(repo = %name, error = %e, "repository failed to start");
        }
        refs.lock()
            .remove_unclaimed()
            .context("failed to remove stale index directories")?;

        {
            let mut cfg = self.cfg.lock();
            for name in errs.keys() {
                cfg.repos.remove(name);
            }
        }
        for s in searchers.values() {
            s.begin().await;
        }
        *self.live.searchers.write() = searchers;
        self.live.ready.store(true, Ordering::SeqCst);
        if errs.is_empty() {
            tracing::info!("all indexes built");
        } else {
            tracing::warn!(failed = errs.len(), "startup finished with failed repositories");
        }
        Ok(())
    }

    /// Stop every live searcher and wait for the refresh loops to exit.
    pub async fn stop_all(&self) {
        let searchers: Vec<Arc<Searcher>> =
            self.live.searchers.read().values().cloned().collect();
        for s in &searchers {
            s.stop();
        }
        for s in &searchers {
            s.wait().await;
        }
    }

    /// Spawn one build task per repo, bounded by the indexer semaphore, and
    /// fan the results back in.
    async fn build_searchers(
        &self,
        repos: &BTreeMap<String, Repo>,
        refs: Arc<Mutex<FoundRefs>>,
    ) -> (SearcherMap, HashMap<String, String>) {
        let n = repos.len();
        let (tx, mut rx) = mpsc::channel::<(String, Result<Arc<Searcher>>)>(n.max(1));
        for (name, repo) in repos {
            let tx = tx.clone();
            let limiter = self.limiter.clone();
            let refs = refs.clone();
            let db = self.db_root.clone();
            let name = name.clone();
            let repo = repo.clone();
            tokio::spawn(async move {
                let res = match limiter.clone().acquire_owned().await {
                    Ok(_permit) => {
                        Searcher::new(db, name.clone(), repo, refs, limiter).await
                    }
                    Err(e) => Err(anyhow::anyhow!(e)),
                };
                let _ = tx.send((name, res)).await;
            });
        }
        drop(tx);

        let mut searchers = SearcherMap::new();
        let mut errs = HashMap::new();
        for _ in 0..n {
            match rx.recv().await {
                Some((name, Ok(s))) => {
                    searchers.insert(name, s);
                }
                Some((name, Err(e))) => {
                    errs.insert(name, format!("{:#}", e));
                }
                None => break,
            }
        }
        (searchers, errs)
    }

    /// Poll the configuration file's mtime and apply changes to the live
    /// searcher set.
    pub fn spawn_config_watcher(self: &Arc<Self>) {
        let me = self.clone();
        tokio::spawn(async move {
            let mut last = std::fs::metadata(&me.conf_path)
                .and_then(|m| m.modified())
                .ok();
            loop {
                tokio::time::sleep(Duration::from_millis(500)).await;
                let cur = match std::fs::metadata(&me.conf_path).and_then(|m| m.modified()) {
                    Ok(t) => Some(t),
                    Err(_) => continue,
                };
                if cur == last {
                    continue;
                }
                last = cur;
                if let Err(e) = me.reload().await {
                    tracing::error!(error = %e, "configuration reload failed");
                }
            }
        });
    }

    /// Diff the on-disk configuration against the running state: unchanged
    /// repos keep their searcher instance, changed ones restart, removed
    /// ones stop, new ones start.
    pub async fn reload(&self) -> Result<()> {
        let new_cfg = Config::load(&self.conf_path)?;
        let old_repos = self.cfg.lock().repos.clone();
        let diff = diff_repos(&old_repos, &new_cfg.repos);
        if diff.is_empty() {
            return Ok(());
        }
        tracing::info!(
            added = diff.added.len(),
            removed = diff.removed.len(),
            changed = diff.changed.len(),
            "configuration changed"
        );

        // Stop removed and changed searchers before their replacements
        // build, so claimable index directories are settled.
        let mut stopping = Vec::new();
        {
            let mut map = self.live.searchers.write();
            for name in diff.removed.iter().chain(diff.changed.iter()) {
                if let Some(s) = map.remove(name) {
                    stopping.push(s);
                }
            }
        }
        for s in &stopping {
            s.stop();
        }
        for s in &stopping {
            s.wait().await;
        }

        let mut wanted = BTreeMap::new();
        for name in diff.added.iter().chain(diff.changed.iter()) {
            if let Some(r) = new_cfg.repos.get(name) {
                wanted.insert(name.clone(), r.clone());
            }
        }
        let refs = Arc::new(Mutex::new(
            quarry_index::scan_refs(&self.db_root).context("scan for existing indexes")?,
        ));
        let (built, errs) = self.build_searchers(&wanted, refs).await;
        for (name, e) in &errs {
            tracing::error!(repo = %name, error = %e, "repository failed to restart");
        }
        for s in built.values() {
            s.begin().await;
        }
        {
            let mut map = self.live.searchers.write();
            for (name, s) in built {
                map.insert(name, s);
            }
        }

        let mut cfg = new_cfg;
        for name in errs.keys() {
            cfg.repos.remove(name);
        }
        *self.cfg.lock() = cfg;
        Ok(())
    }
}
