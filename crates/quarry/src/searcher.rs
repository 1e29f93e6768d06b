//! Per-repository searcher: owns the live index, serves searches against it,
//! and runs the refresh loop that keeps it current.
//!
//! The refresh loop starts paused; the coordinator releases it with a single
//! "begin" event once every searcher's working directory exists and the
//! stale-index sweep has run. Update requests coalesce through a capacity-1
//! mailbox, and index swaps happen under an exclusive lock so in-flight
//! searches always observe exactly one snapshot.

use anyhow::{Context, Result};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Semaphore};

use quarry_index::{
    build, next_index_dir, FoundRefs, Index, IndexError, IndexOptions, SearchOptions,
    SearchResponse,
};

use crate::config::Repo;
use crate::vcs;

pub struct Searcher {
    name: String,
    repo: Repo,
    rev: RwLock<String>,
    idx: RwLock<Index>,
    vrepos: RwLock<BTreeMap<String, String>>,
    update_tx: mpsc::Sender<()>,
    shutdown_tx: mpsc::Sender<()>,
    done_rx: watch::Receiver<bool>,
}

/// Everything the refresh loop owns that the public handle does not.
struct RefreshCtx {
    db_root: PathBuf,
    work_dir: PathBuf,
    driver: Arc<dyn vcs::Driver>,
    opts: IndexOptions,
    limiter: Arc<Semaphore>,
    update_rx: mpsc::Receiver<()>,
    shutdown_rx: mpsc::Receiver<()>,
    done_tx: watch::Sender<bool>,
}

impl Searcher {
    /// Materialize the working directory, build or reuse the index, and
    /// start the (paused) refresh loop. Callers hold the indexer semaphore
    /// around this whole constructor.
    pub async fn new(
        db_root: PathBuf,
        name: String,
        repo: Repo,
        refs: Arc<Mutex<FoundRefs>>,
        limiter: Arc<Semaphore>,
    ) -> Result<Arc<Searcher>> {
        tracing::info!(repo = %name, "starting searcher");
        let driver: Arc<dyn vcs::Driver> =
            vcs::create(&repo.vcs, repo.vcs_config.as_ref())?.into();
        let opts = IndexOptions {
            exclude_dot_files: repo.exclude_dot_files,
            hidden: repo.hidden,
            special_files: driver
                .special_files()
                .iter()
                .map(|s| s.to_string())
                .collect(),
        };
        let work_dir = driver.working_dir(&db_root, &name, &repo);

        let (idx, rev) = {
            let driver = driver.clone();
            let work_dir = work_dir.clone();
            let url = repo.url.clone();
            let db = db_root.clone();
            let opts = opts.clone();
            let name = name.clone();
            tokio::task::spawn_blocking(move || -> Result<(Index, String)> {
                let rev = driver.pull_or_clone(&work_dir, &url)?;
                let claimed = {
                    let mut found = refs.lock();
                    found.find(&url, &rev).map(|r| {
                        found.claim(&r);
                        r
                    })
                };
                let idx = match claimed {
                    Some(r) => {
                        tracing::info!(repo = %name, rev = %rev, "reusing existing index");
                        r.open()?
                    }
                    None => {
                        tracing::info!(repo = %name, rev = %rev, "building index");
                        build(&opts, &next_index_dir(&db), &work_dir, &url, &rev)
                            .map_err(anyhow::Error::from)?
                    }
                };
                Ok((idx, rev))
            })
            .await
            .context("index build task panicked")??
        };

        let (update_tx, update_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let (done_tx, done_rx) = watch::channel(false);

        let s = Arc::new(Searcher {
            name,
            repo,
            rev: RwLock::new(rev),
            idx: RwLock::new(idx),
            vrepos: RwLock::new(BTreeMap::new()),
            update_tx,
            shutdown_tx,
            done_rx,
        });
        s.refresh_vrepos(&work_dir);

        tokio::spawn(refresh_loop(
            s.clone(),
            RefreshCtx {
                db_root,
                work_dir,
                driver,
                opts,
                limiter,
                update_rx,
                shutdown_rx,
                done_tx,
            },
        ));
        Ok(s)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn repo(&self) -> &Repo {
        &self.repo
    }

    pub fn is_hidden(&self) -> bool {
        self.repo.hidden
    }

    pub fn revision(&self) -> String {
        self.rev.read().clone()
    }

    /// Search the live index. Takes the shared read lock; never blocks on
    /// the refresh loop.
    pub fn search(
        &self,
        pattern: &str,
        opt: &SearchOptions,
        vsel: &[String],
    ) -> std::result::Result<SearchResponse, IndexError> {
        self.idx.read().search(pattern, opt, vsel)
    }

    /// Request an immediate poll. Returns false iff push updates are
    /// disabled for this repository. Concurrent requests coalesce: the
    /// mailbox holds at most one pending event.
    pub fn update(&self) -> bool {
        if !self.repo.enable_push_updates {
            return false;
        }
        let _ = self.update_tx.try_send(());
        true
    }

    /// Idempotent, asynchronous shutdown request; observe completion with
    /// [`Searcher::wait`]. In-flight searches complete normally.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.try_send(());
    }

    /// Block until the refresh loop has exited.
    pub async fn wait(&self) {
        let mut rx = self.done_rx.clone();
        let _ = rx.wait_for(|done| *done).await;
    }

    /// Release the refresh loop. Sent once by the coordinator after the
    /// stale-index sweep; until then the searcher serves searches but never
    /// polls.
    pub async fn begin(&self) {
        let _ = self.update_tx.send(()).await;
    }

    /// Names of the virtual repositories inside this (hidden) searcher.
    pub fn vrepos(&self) -> Vec<String> {
        self.vrepos.read().keys().cloned().collect()
    }

    pub fn vrepo_rev(&self, vrepo: &str) -> Option<String> {
        self.vrepos.read().get(vrepo).cloned()
    }

    pub fn has_vrepo(&self, vrepo: &str) -> bool {
        self.vrepos.read().contains_key(vrepo)
    }

    /// The excluded-files log as a JSON string. A nonempty `scope` selects a
    /// virtual subtree and rewrites paths relative to it.
    pub fn excluded_files(&self, scope: &str) -> String {
        let raw = match self.idx.read().excluded_files_json() {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(repo = %self.name, error = %e, "could not read excluded-files log");
                return "[]".to_string();
            }
        };
        if scope.is_empty() {
            return raw;
        }
        let base = scope.rsplit('/').next().unwrap_or(scope);
        let entries: Vec<quarry_index::ExcludedFile> =
            serde_json::from_str(&raw).unwrap_or_default();
        let scoped: Vec<quarry_index::ExcludedFile> = entries
            .into_iter()
            .filter_map(|mut e| {
                // Stored names follow <org>/<branch>/<path>; keep only the
                // selected org and strip down to the subtree-relative path.
                let mut parts = e.filename.splitn(3, '/');
                if parts.next() != Some(base) {
                    return None;
                }
                parts.next()?;
                let rest = parts.next()?;
                e.filename = rest.to_string();
                Some(e)
            })
            .collect();
        serde_json::to_string(&scoped).unwrap_or_else(|_| "[]".to_string())
    }

    /// Rebuild the virtual-repo map from the working tree layout
    /// `<root>/<org>/<branch>`. No-op for ordinary repositories.
    fn refresh_vrepos(&self, work_dir: &Path) {
        if !self.repo.hidden {
            return;
        }
        let root = work_dir
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let mut map = BTreeMap::new();
        if let Ok(orgs) = std::fs::read_dir(work_dir) {
            for org in orgs.flatten() {
                if !org.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                    continue;
                }
                let org_name = org.file_name().to_string_lossy().to_string();
                if org_name.starts_with('.') {
                    continue;
                }
                if let Ok(branches) = std::fs::read_dir(org.path()) {
                    for br in branches.flatten() {
                        if br.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                            map.insert(
                                format!("{}/{}", root, org_name),
                                br.file_name().to_string_lossy().to_string(),
                            );
                        }
                    }
                }
            }
        }
        *self.vrepos.write() = map;
    }

    /// Make `new_idx` live and destroy the previous index. Readers holding
    /// the shared lock finish against the old snapshot first; destruction
    /// stays inside the critical section so it cannot race them.
    fn swap_index(&self, new_idx: Index) {
        let mut guard = self.idx.write();
        let old = std::mem::replace(&mut *guard, new_idx);
        if let Err(e) = old.destroy() {
            tracing::warn!(repo = %self.name, error = %e, "failed to remove replaced index");
        }
    }
}

async fn refresh_loop(s: Arc<Searcher>, mut ctx: RefreshCtx) {
    // Held until the coordinator's begin event so the stale-index sweep can
    // never race a rebuild.
    if ctx.update_rx.recv().await.is_none() {
        let _ = ctx.done_tx.send(true);
        return;
    }

    let poll = s.repo.enable_poll_updates;
    if !poll && !s.repo.enable_push_updates {
        let _ = ctx.done_tx.send(true);
        return;
    }
    let delay = Duration::from_millis(s.repo.poll_interval_ms());

    loop {
        tokio::select! {
            _ = ctx.shutdown_rx.recv() => break,
            _ = ctx.update_rx.recv() => {}
            _ = tokio::time::sleep(delay), if poll => {}
        }
        if let Err(e) = run_cycle(&s, &ctx).await {
            tracing::warn!(repo = %s.name, error = %e, "refresh cycle failed");
        }
    }

    // Shutdown requested: tear down the live index before signalling done.
    if let Err(e) = s.idx.read().destroy() {
        tracing::warn!(repo = %s.name, error = %e, "failed to remove index on shutdown");
    }
    let _ = ctx.done_tx.send(true);
    tracing::info!(repo = %s.name, "searcher stopped");
}

/// One refresh cycle: pull, and when the revision moved, rebuild and swap.
/// Failures leave the current index and revision untouched.
async fn run_cycle(s: &Arc<Searcher>, ctx: &RefreshCtx) -> Result<()> {
    let _permit = ctx
        .limiter
        .acquire()
        .await
        .context("indexer limiter closed")?;

    let driver = ctx.driver.clone();
    let work_dir = ctx.work_dir.clone();
    let url = s.repo.url.clone();
    let old_rev = s.revision();
    let db = ctx.db_root.clone();
    let opts = ctx.opts.clone();
    let name = s.name.clone();

    let built = tokio::task::spawn_blocking(move || -> Result<Option<(Index, String)>> {
        let new_rev = driver
            .pull_or_clone(&work_dir, &url)
            .with_context(|| format!("vcs pull failed for {}", url))?;
        if new_rev == old_rev {
            return Ok(None);
        }
        tracing::info!(repo = %name, rev = %new_rev, "rebuilding index");
        let idx = build(&opts, &next_index_dir(&db), &work_dir, &url, &new_rev)
            .map_err(|e| anyhow::anyhow!("index build failed: {}", e))?;
        Ok(Some((idx, new_rev)))
    })
    .await
    .context("rebuild task panicked")??;

    if let Some((idx, new_rev)) = built {
        s.refresh_vrepos(&ctx.work_dir);
        s.swap_index(idx);
        *s.rev.write() = new_rev;
    }
    Ok(())
}
