mod common;

use anyhow::Result;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use quarry::searcher::Searcher;
use quarry_index::{FoundRefs, SearchOptions};

async fn new_searcher(
    db: &std::path::Path,
    name: &str,
    repo: quarry::config::Repo,
) -> Result<Arc<Searcher>> {
    Searcher::new(
        db.to_path_buf(),
        name.to_string(),
        repo,
        Arc::new(Mutex::new(FoundRefs::default())),
        Arc::new(Semaphore::new(2)),
    )
    .await
}

#[tokio::test]
async fn serves_searches_while_paused() -> Result<()> {
    let src = tempfile::tempdir()?;
    let db = tempfile::tempdir()?;
    common::write_file(src.path(), "hello.txt", "hello world\n");

    let s = new_searcher(db.path(), "a", common::local_repo(src.path())).await?;
    let res = s.search("hello", &SearchOptions::default(), &[])?;
    assert_eq!(res.files_with_match, 1);
    assert_eq!(res.matches[0].matches[0].line_number, 1);
    assert!(!s.revision().is_empty());
    Ok(())
}

#[tokio::test]
async fn update_respects_the_push_flag() -> Result<()> {
    let src = tempfile::tempdir()?;
    let db = tempfile::tempdir()?;
    common::write_file(src.path(), "hello.txt", "hello\n");

    let disabled = new_searcher(db.path(), "a", common::local_repo(src.path())).await?;
    assert!(!disabled.update());

    let mut repo = common::local_repo(src.path());
    repo.enable_push_updates = true;
    let enabled = new_searcher(db.path(), "b", repo).await?;
    // Coalescing: repeated requests are all accepted, at most one queues.
    assert!(enabled.update());
    assert!(enabled.update());
    assert!(enabled.update());
    Ok(())
}

#[tokio::test]
async fn stop_destroys_the_live_index() -> Result<()> {
    let src = tempfile::tempdir()?;
    let db = tempfile::tempdir()?;
    common::write_file(src.path(), "hello.txt", "hello\n");

    let s = new_searcher(db.path(), "a", common::local_repo(src.path())).await?;
    assert_eq!(common::index_dir_count(db.path()), 1);

    s.begin().await;
    s.stop();
    s.stop(); // idempotent
    s.wait().await;
    assert_eq!(common::index_dir_count(db.path()), 0);
    Ok(())
}

#[tokio::test]
async fn disabled_updates_finish_the_loop_after_begin() -> Result<()> {
    let src = tempfile::tempdir()?;
    let db = tempfile::tempdir()?;
    common::write_file(src.path(), "hello.txt", "hello\n");

    let mut repo = common::local_repo(src.path());
    repo.enable_poll_updates = false;
    let s = new_searcher(db.path(), "a", repo).await?;
    s.begin().await;
    // No poll, no push: the loop exits on its own and keeps the index.
    s.wait().await;
    assert_eq!(common::index_dir_count(db.path()), 1);
    assert_eq!(
        s.search("hello", &SearchOptions::default(), &[])?.files_with_match,
        1
    );
    Ok(())
}

#[tokio::test]
async fn push_update_triggers_a_rebuild() -> Result<()> {
    let src = tempfile::tempdir()?;
    let db = tempfile::tempdir()?;
    common::write_file(src.path(), "hello.txt", "hello\n");

    let mut repo = common::local_repo(src.path());
    repo.enable_poll_updates = false;
    repo.enable_push_updates = true;
    let s = new_searcher(db.path(), "a", repo).await?;
    s.begin().await;

    let before = s.revision();
    // Give the directory a new mtime and poke the mailbox.
    tokio::time::sleep(Duration::from_millis(20)).await;
    common::write_file(src.path(), "fresh.txt", "completely new needle\n");
    assert!(s.update());

    let mut found = false;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        if s.search("needle", &SearchOptions::default(), &[])?.files_with_match == 1 {
            found = true;
            break;
        }
    }
    assert!(found, "push update should have triggered a reindex");
    assert_ne!(s.revision(), before);
    // The replaced index was destroyed during the swap.
    assert_eq!(common::index_dir_count(db.path()), 1);

    s.stop();
    s.wait().await;
    Ok(())
}

#[tokio::test]
async fn polling_picks_up_changes() -> Result<()> {
    let src = tempfile::tempdir()?;
    let db = tempfile::tempdir()?;
    common::write_file(src.path(), "hello.txt", "hello\n");

    let mut repo = common::local_repo(src.path());
    repo.ms_between_poll = 50;
    let s = new_searcher(db.path(), "a", repo).await?;
    s.begin().await;

    tokio::time::sleep(Duration::from_millis(20)).await;
    common::write_file(src.path(), "fresh.txt", "polled needle\n");

    let mut found = false;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        if s.search("needle", &SearchOptions::default(), &[])?.files_with_match == 1 {
            found = true;
            break;
        }
    }
    assert!(found, "poll cycle should have triggered a reindex");

    s.stop();
    s.wait().await;
    Ok(())
}
