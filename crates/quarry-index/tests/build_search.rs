use anyhow::Result;
use std::path::Path;

use quarry_index::{build, IndexError, IndexOptions, SearchOptions};

fn write_file(root: &Path, rel: &str, body: &[u8]) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, body).unwrap();
}

fn build_at(src: &Path, db: &Path, opts: &IndexOptions) -> quarry_index::Index {
    build(
        opts,
        &quarry_index::next_index_dir(db),
        src,
        "file:///src",
        "rev-1",
    )
    .expect("build should succeed")
}

#[test]
fn finds_literal_with_line_numbers_and_context() -> Result<()> {
    let src = tempfile::tempdir()?;
    let db = tempfile::tempdir()?;
    write_file(
        src.path(),
        "a.txt",
        b"line one\nline two\nhello world\nline four\nline five\n",
    );

    let idx = build_at(src.path(), db.path(), &IndexOptions::default());
    let res = idx.search("hello", &SearchOptions::default(), &[])?;

    assert_eq!(res.files_with_match, 1);
    assert_eq!(res.files_opened, 1);
    assert_eq!(res.revision, "rev-1");
    let fm = &res.matches[0];
    assert_eq!(fm.filename, "a.txt");
    assert_eq!(fm.matches.len(), 1);
    let m = &fm.matches[0];
    assert_eq!(m.line_number, 3);
    assert_eq!(m.line, "hello world");
    assert_eq!(m.before, vec!["line one", "line two"]);
    assert_eq!(m.after, vec!["line four", "line five"]);
    Ok(())
}

#[test]
fn context_is_capped_by_option() -> Result<()> {
    let src = tempfile::tempdir()?;
    let db = tempfile::tempdir()?;
    write_file(src.path(), "a.txt", b"one\ntwo\nneedle\nthree\nfour\n");

    let idx = build_at(src.path(), db.path(), &IndexOptions::default());
    let opt = SearchOptions {
        lines_of_context: 1,
        ..Default::default()
    };
    let res = idx.search("needle", &opt, &[])?;
    let m = &res.matches[0].matches[0];
    assert_eq!(m.before, vec!["two"]);
    assert_eq!(m.after, vec!["three"]);
    Ok(())
}

#[test]
fn results_come_out_in_path_then_line_order() -> Result<()> {
    let src = tempfile::tempdir()?;
    let db = tempfile::tempdir()?;
    write_file(src.path(), "z.txt", b"needle\n");
    write_file(src.path(), "a.txt", b"x\nneedle\nneedle\n");
    write_file(src.path(), "m/n.txt", b"needle\n");

    let idx = build_at(src.path(), db.path(), &IndexOptions::default());
    let res = idx.search("needle", &SearchOptions::default(), &[])?;
    let paths: Vec<&str> = res.matches.iter().map(|f| f.filename.as_str()).collect();
    assert_eq!(paths, vec!["a.txt", "m/n.txt", "z.txt"]);
    let lines: Vec<usize> = res.matches[0].matches.iter().map(|m| m.line_number).collect();
    assert_eq!(lines, vec![2, 3]);
    Ok(())
}

#[test]
fn case_insensitive_is_a_superset() -> Result<()> {
    let src = tempfile::tempdir()?;
    let db = tempfile::tempdir()?;
    write_file(src.path(), "a.txt", b"say HeLLo there\n");
    write_file(src.path(), "b.txt", b"say hello there\n");

    let idx = build_at(src.path(), db.path(), &IndexOptions::default());

    let sensitive = idx.search("hello", &SearchOptions::default(), &[])?;
    assert_eq!(sensitive.files_with_match, 1);
    assert_eq!(sensitive.matches[0].filename, "b.txt");

    let opt = SearchOptions {
        ignore_case: true,
        ..Default::default()
    };
    let insensitive = idx.search("hello", &opt, &[])?;
    assert_eq!(insensitive.files_with_match, 2);
    Ok(())
}

#[test]
fn file_path_filter_restricts_results() -> Result<()> {
    let src = tempfile::tempdir()?;
    let db = tempfile::tempdir()?;
    write_file(src.path(), "src/main.rs", b"let needle = 1;\n");
    write_file(src.path(), "docs/guide.md", b"the needle\n");

    let idx = build_at(src.path(), db.path(), &IndexOptions::default());
    let opt = SearchOptions {
        file_regexp: r"\.rs$".to_string(),
        ..Default::default()
    };
    let res = idx.search("needle", &opt, &[])?;
    assert_eq!(res.files_with_match, 1);
    assert_eq!(res.matches[0].filename, "src/main.rs");
    Ok(())
}

#[test]
fn offset_and_limit_page_over_matching_files() -> Result<()> {
    let src = tempfile::tempdir()?;
    let db = tempfile::tempdir()?;
    for name in ["a.txt", "b.txt", "c.txt", "d.txt"] {
        write_file(src.path(), name, b"needle\n");
    }

    let idx = build_at(src.path(), db.path(), &IndexOptions::default());
    let opt = SearchOptions {
        offset: 1,
        limit: 2,
        ..Default::default()
    };
    let res = idx.search("needle", &opt, &[])?;
    let paths: Vec<&str> = res.matches.iter().map(|f| f.filename.as_str()).collect();
    assert_eq!(paths, vec!["b.txt", "c.txt"]);
    Ok(())
}

#[test]
fn patterns_without_prefilter_still_match() -> Result<()> {
    let src = tempfile::tempdir()?;
    let db = tempfile::tempdir()?;
    write_file(src.path(), "a.txt", b"axb\n");
    write_file(src.path(), "b.txt", b"nothing here\n");

    let idx = build_at(src.path(), db.path(), &IndexOptions::default());
    // "a.b" derives no trigrams, so every file is scanned.
    let res = idx.search("a.b", &SearchOptions::default(), &[])?;
    assert_eq!(res.files_with_match, 1);
    assert_eq!(res.files_opened, 2);
    assert_eq!(res.matches[0].filename, "a.txt");
    Ok(())
}

#[test]
fn malformed_regex_is_a_user_error() -> Result<()> {
    let src = tempfile::tempdir()?;
    let db = tempfile::tempdir()?;
    write_file(src.path(), "a.txt", b"hello\n");

    let idx = build_at(src.path(), db.path(), &IndexOptions::default());
    let err = idx
        .search("(unclosed", &SearchOptions::default(), &[])
        .unwrap_err();
    assert!(matches!(err, IndexError::BadRegex(_)));
    Ok(())
}

#[test]
fn quality_filters_reject_and_log() -> Result<()> {
    let src = tempfile::tempdir()?;
    let db = tempfile::tempdir()?;
    write_file(src.path(), "good.txt", b"hello good file\n");
    write_file(src.path(), "binary.bin", &[0u8, 159, 146, 150, 0, 1, 2, 3]);
    write_file(src.path(), "huge.txt", &vec![b'a'; (1 << 20) + 1]);
    let mut long = vec![b'x'; 3000];
    long.push(b'\n');
    write_file(src.path(), "minified.js", &long);

    let idx = build_at(src.path(), db.path(), &IndexOptions::default());
    assert_eq!(idx.file_count(), 1);

    let log: Vec<quarry_index::ExcludedFile> =
        serde_json::from_str(&idx.excluded_files_json()?)?;
    let reason_of = |name: &str| {
        log.iter()
            .find(|e| e.filename == name)
            .map(|e| e.reason.clone())
            .unwrap_or_default()
    };
    assert!(reason_of("binary.bin").contains("UTF-8") || reason_of("binary.bin").contains("binary"));
    assert_eq!(reason_of("huge.txt"), "Exceeds maximum file size");
    assert_eq!(reason_of("minified.js"), "Contains very long lines");

    // Rejected files never show up in results.
    let res = idx.search("aaa", &SearchOptions::default(), &[])?;
    assert_eq!(res.files_with_match, 0);
    Ok(())
}

#[test]
fn dot_files_are_excluded_only_when_asked() -> Result<()> {
    let src = tempfile::tempdir()?;
    let db = tempfile::tempdir()?;
    write_file(src.path(), ".env", b"secret needle\n");
    write_file(src.path(), "open.txt", b"public needle\n");

    let idx = build_at(src.path(), db.path(), &IndexOptions::default());
    assert_eq!(
        idx.search("needle", &SearchOptions::default(), &[])?.files_with_match,
        2
    );

    let opts = IndexOptions {
        exclude_dot_files: true,
        ..Default::default()
    };
    let idx = build_at(src.path(), db.path(), &opts);
    let res = idx.search("needle", &SearchOptions::default(), &[])?;
    assert_eq!(res.files_with_match, 1);
    assert_eq!(res.matches[0].filename, "open.txt");

    let log: Vec<quarry_index::ExcludedFile> =
        serde_json::from_str(&idx.excluded_files_json()?)?;
    assert!(log
        .iter()
        .any(|e| e.filename == ".env" && e.reason == "Dot files excluded"));
    Ok(())
}

#[test]
fn exclude_list_is_honored() -> Result<()> {
    let src = tempfile::tempdir()?;
    let db = tempfile::tempdir()?;
    write_file(src.path(), ".quarry_exclude", b"# generated output\n^gen/\n");
    write_file(src.path(), "gen/out.txt", b"needle\n");
    write_file(src.path(), "src/in.txt", b"needle\n");

    let idx = build_at(src.path(), db.path(), &IndexOptions::default());
    let res = idx.search("needle", &SearchOptions::default(), &[])?;
    assert_eq!(res.files_with_match, 1);
    assert_eq!(res.matches[0].filename, "src/in.txt");

    let log: Vec<quarry_index::ExcludedFile> =
        serde_json::from_str(&idx.excluded_files_json()?)?;
    assert!(log
        .iter()
        .any(|e| e.filename == "gen/out.txt" && e.reason.contains(".quarry_exclude")));
    Ok(())
}

#[test]
fn vcs_metadata_directories_are_skipped() -> Result<()> {
    let src = tempfile::tempdir()?;
    let db = tempfile::tempdir()?;
    write_file(src.path(), ".git/config", b"needle\n");
    write_file(src.path(), "a.txt", b"needle\n");

    let opts = IndexOptions {
        special_files: vec![".git".to_string()],
        ..Default::default()
    };
    let idx = build_at(src.path(), db.path(), &opts);
    let res = idx.search("needle", &SearchOptions::default(), &[])?;
    assert_eq!(res.files_with_match, 1);
    assert_eq!(res.matches[0].filename, "a.txt");
    Ok(())
}

#[test]
fn hidden_index_shards_matches_per_virtual_repo() -> Result<()> {
    let src = tempfile::tempdir()?;
    let db = tempfile::tempdir()?;
    // Layout: <root>/<org>/<branch>/...
    write_file(src.path(), "proj1/main/src/a.go", b"package a // needle\n");
    write_file(src.path(), "proj2/dev/b.go", b"package b // needle\n");

    let opts = IndexOptions {
        hidden: true,
        ..Default::default()
    };
    let idx = build_at(src.path(), db.path(), &opts);
    let root = src
        .path()
        .file_name()
        .unwrap()
        .to_string_lossy()
        .to_string();

    // Unselected: both virtual repos report their matches.
    let res = idx.search("needle", &SearchOptions::default(), &[])?;
    assert!(res.matches.is_empty());
    assert_eq!(res.vmatches.len(), 2);
    assert_eq!(res.vrevision[&format!("{}/proj1", root)], "main");
    assert_eq!(res.vrevision[&format!("{}/proj2", root)], "dev");

    // Selected: only the chosen subtree is scanned.
    let sel = vec![format!("{}/proj1", root)];
    let res = idx.search("needle", &SearchOptions::default(), &sel)?;
    assert_eq!(res.vmatches.len(), 1);
    assert_eq!(res.files_opened, 1);
    let fms = &res.vmatches[&format!("{}/proj1", root)];
    assert_eq!(fms[0].filename, "proj1/main/src/a.go");
    Ok(())
}
