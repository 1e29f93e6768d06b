//! Index construction: walk a working directory, admit files through the
//! quality filters, and write the on-disk index artifact.
//!
//! Trigram postings are accumulated as packed `tri24 << 32 | doc` keys; when
//! the buffer grows past the spill threshold it is sorted and written to a
//! run file, and at end-of-walk all runs are k-way merged into the final
//! delta-encoded posting stream.

use anyhow::{Context, Result};
use rayon::prelude::*;
use sha1::{Digest, Sha1};
use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::IndexError;
use crate::store::{self, PostingsWriter};
use crate::trigram::unique_trigrams;
use crate::types::{
    ExcludedFile, FileEntry, IndexOptions, Manifest, MAX_CONTROL_RATIO, MAX_FILE_SIZE,
    MAX_LINE_LEN,
};
use crate::Index;

/// Per-repo exclusion list: newline-separated regexes over relative paths,
/// `#` comments allowed.
pub const EXCLUDE_LIST_FILE: &str = ".quarry_exclude";

/// Buffered posting keys before a spill to a sorted run file.
const SPILL_KEYS: usize = 4 << 20;

/// Build a new index for `src_dir` into `idx_dir`. On failure the directory
/// is torn down so a half-written build never survives.
pub fn build(
    opts: &IndexOptions,
    idx_dir: &Path,
    src_dir: &Path,
    url: &str,
    rev: &str,
) -> std::result::Result<Index, IndexError> {
    match build_inner(opts, idx_dir, src_dir, url, rev) {
        Ok(idx) => Ok(idx),
        Err(e) => {
            let _ = std::fs::remove_dir_all(idx_dir);
            Err(IndexError::Other(format!("{:#}", e)))
        }
    }
}

fn build_inner(
    opts: &IndexOptions,
    idx_dir: &Path,
    src_dir: &Path,
    url: &str,
    rev: &str,
) -> Result<Index> {
    let started = std::time::Instant::now();
    std::fs::create_dir_all(idx_dir)
        .with_context(|| format!("create index directory {}", idx_dir.display()))?;

    let excludes = load_exclude_list(src_dir);
    let entries = walk_tree(src_dir, &opts.special_files)?;

    let classified: Vec<Classified> = entries
        .par_iter()
        .map(|(rel, abs, size)| classify(rel, abs, *size, opts, &excludes))
        .collect();

    let mut excluded: Vec<ExcludedFile> = Vec::new();
    let mut admitted: Vec<(String, u64, String, String)> = Vec::new();
    for c in classified {
        match c.outcome {
            Outcome::Admit { sha1, body } => admitted.push((c.rel, c.size, sha1, body)),
            Outcome::Exclude(reason) => excluded.push(ExcludedFile {
                filename: c.rel,
                reason,
            }),
        }
    }
    // The walk output is path-sorted, so file IDs follow path order and
    // search results come out sorted for free.

    let mut content = BufWriter::new(
        File::create(idx_dir.join(store::CONTENT_FILE)).context("create content store")?,
    );
    let mut runs = RunSet::new(idx_dir);
    let mut names: BTreeMap<[u8; 3], Vec<u32>> = BTreeMap::new();
    let mut files = Vec::with_capacity(admitted.len());
    let mut offset = 0u64;
    for (doc, (rel, size, sha1, body)) in admitted.into_iter().enumerate() {
        let doc = doc as u32;
        content.write_all(body.as_bytes())?;
        let len = body.len() as u64;
        files.push(FileEntry {
            path: rel.clone(),
            size,
            sha1,
            offset,
            len,
        });
        offset += len;
        runs.push_doc(doc, &body)?;
        for tri in unique_trigrams(rel.as_bytes()) {
            names.entry(tri).or_default().push(doc);
        }
    }
    content.flush()?;

    let mut pw = PostingsWriter::create(&idx_dir.join(store::POSTINGS_FILE))?;
    runs.merge_into(&mut pw)?;
    pw.finish()?;

    let mut nw = PostingsWriter::create(&idx_dir.join(store::NAMES_FILE))?;
    for (tri, docs) in &names {
        nw.write_term(*tri, docs)?;
    }
    nw.finish()?;

    let mut ew = BufWriter::new(
        File::create(idx_dir.join(store::EXCLUDED_FILE)).context("create excluded-files log")?,
    );
    serde_json::to_writer(&mut ew, &excluded)?;
    ew.flush()?;

    tracing::debug!(
        dir = %idx_dir.display(),
        files = files.len(),
        excluded = excluded.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "index build complete"
    );

    let manifest = Manifest {
        url: url.to_string(),
        rev: rev.to_string(),
        built_at_ms: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64,
        version: store::VERSION,
        hidden: opts.hidden,
        file_repo: src_dir
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default(),
        files,
    };
    // The manifest goes last: its presence marks the directory complete.
    let mut mw = BufWriter::new(
        File::create(idx_dir.join(store::MANIFEST_FILE)).context("create manifest")?,
    );
    serde_json::to_writer(&mut mw, &manifest)?;
    mw.flush()?;

    Index::open(idx_dir)
}

enum Outcome {
    Admit { sha1: String, body: String },
    Exclude(String),
}

struct Classified {
    rel: String,
    size: u64,
    outcome: Outcome,
}

fn classify(
    rel: &str,
    abs: &Path,
    size: u64,
    opts: &IndexOptions,
    excludes: &[regex::Regex],
) -> Classified {
    let excluded = |reason: String| Classified {
        rel: rel.to_string(),
        size,
        outcome: Outcome::Exclude(reason),
    };
    if rel == EXCLUDE_LIST_FILE {
        return excluded("Exclude list".to_string());
    }
    if excludes.iter().any(|re| re.is_match(rel)) {
        return excluded(format!("Excluded by {}", EXCLUDE_LIST_FILE));
    }
    if opts.exclude_dot_files && rel.split('/').any(|c| c.starts_with('.')) {
        return excluded("Dot files excluded".to_string());
    }
    if size > MAX_FILE_SIZE {
        return excluded("Exceeds maximum file size".to_string());
    }
    let bytes = match std::fs::read(abs) {
        Ok(b) => b,
        Err(e) => return excluded(format!("Could not read file: {}", e)),
    };
    let body = match String::from_utf8(bytes) {
        Ok(s) => s,
        Err(_) => return excluded("Not valid UTF-8 text".to_string()),
    };
    if control_ratio(body.as_bytes()) >= MAX_CONTROL_RATIO {
        return excluded("Contains binary content".to_string());
    }
    if body.lines().any(|l| l.len() > MAX_LINE_LEN) {
        return excluded("Contains very long lines".to_string());
    }
    let mut hasher = Sha1::new();
    hasher.update(body.as_bytes());
    let sha1 = hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<String>();
    Classified {
        rel: rel.to_string(),
        size,
        outcome: Outcome::Admit { sha1, body },
    }
}

fn control_ratio(bytes: &[u8]) -> f64 {
    if bytes.is_empty() {
        return 0.0;
    }
    let ctrl = bytes
        .iter()
        .filter(|&&b| b < 0x20 && b != b'\n' && b != b'\r' && b != b'\t')
        .count();
    ctrl as f64 / bytes.len() as f64
}

/// Walk the working directory, skipping VCS metadata directories. The
/// standard ignore-file filters stay off: which files to skip is the
/// indexer's own policy, recorded in the excluded-files log.
fn walk_tree(src_dir: &Path, special_files: &[String]) -> Result<Vec<(String, PathBuf, u64)>> {
    let special: HashSet<String> = special_files.iter().cloned().collect();
    let mut wb = ignore::WalkBuilder::new(src_dir);
    wb.hidden(false)
        .parents(false)
        .ignore(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .follow_links(false);
    wb.filter_entry(move |e| {
        let is_dir = e.file_type().map(|t| t.is_dir()).unwrap_or(false);
        !(is_dir && special.contains(e.file_name().to_string_lossy().as_ref()))
    });

    let mut out = Vec::new();
    for entry in wb.build() {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::debug!(error = %e, "walk error");
                continue;
            }
        };
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        let abs = entry.into_path();
        let rel = match abs.strip_prefix(src_dir) {
            Ok(r) => r.to_string_lossy().replace('\\', "/"),
            Err(_) => continue,
        };
        out.push((rel, abs, size));
    }
    out.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(out)
}

fn load_exclude_list(src_dir: &Path) -> Vec<regex::Regex> {
    let Ok(text) = std::fs::read_to_string(src_dir.join(EXCLUDE_LIST_FILE)) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for line in text.lines() {
        let pat = line.trim();
        if pat.is_empty() || pat.starts_with('#') {
            continue;
        }
        match regex::Regex::new(pat) {
            Ok(re) => out.push(re),
            Err(e) => tracing::warn!(pattern = %pat, error = %e, "invalid exclude pattern skipped"),
        }
    }
    out
}

/// Posting-key accumulator with spill-to-disk runs.
struct RunSet {
    dir: PathBuf,
    buf: Vec<u64>,
    runs: Vec<PathBuf>,
}

impl RunSet {
    fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            buf: Vec::new(),
            runs: Vec::new(),
        }
    }

    fn push_doc(&mut self, doc: u32, text: &str) -> Result<()> {
        let bytes = text.as_bytes();
        if bytes.len() >= 3 {
            for w in bytes.windows(3) {
                let tri24 = ((w[0] as u64) << 16) | ((w[1] as u64) << 8) | (w[2] as u64);
                self.buf.push((tri24 << 32) | doc as u64);
            }
        }
        if self.buf.len() >= SPILL_KEYS {
            self.spill()?;
        }
        Ok(())
    }

    fn spill(&mut self) -> Result<()> {
        self.buf.sort_unstable();
        self.buf.dedup();
        let path = self.dir.join(format!(".run-{}.tmp", self.runs.len()));
        let mut w = BufWriter::new(
            File::create(&path).with_context(|| format!("create run file {}", path.display()))?,
        );
        for k in &self.buf {
            w.write_all(&k.to_le_bytes())?;
        }
        w.flush()?;
        self.runs.push(path);
        self.buf.clear();
        Ok(())
    }

    /// K-way merge of all spilled runs plus the residual buffer into the
    /// posting writer, grouping keys by trigram and dropping duplicates.
    fn merge_into(mut self, pw: &mut PostingsWriter) -> Result<()> {
        use std::cmp::Reverse;
        use std::collections::BinaryHeap;

        self.buf.sort_unstable();
        self.buf.dedup();

        enum Source {
            Mem(std::vec::IntoIter<u64>),
            Run(BufReader<File>),
        }
        impl Source {
            fn next_key(&mut self) -> Result<Option<u64>> {
                match self {
                    Source::Mem(it) => Ok(it.next()),
                    Source::Run(r) => {
                        let mut b = [0u8; 8];
                        match r.read_exact(&mut b) {
                            Ok(()) => Ok(Some(u64::from_le_bytes(b))),
                            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
                            Err(e) => Err(e.into()),
                        }
                    }
                }
            }
        }

        let mut sources: Vec<Source> = Vec::with_capacity(self.runs.len() + 1);
        for path in &self.runs {
            sources.push(Source::Run(BufReader::new(
                File::open(path).with_context(|| format!("open run file {}", path.display()))?,
            )));
        }
        sources.push(Source::Mem(std::mem::take(&mut self.buf).into_iter()));

        let mut heap: BinaryHeap<Reverse<(u64, usize)>> = BinaryHeap::new();
        for (i, s) in sources.iter_mut().enumerate() {
            if let Some(k) = s.next_key()? {
                heap.push(Reverse((k, i)));
            }
        }

        let mut cur_tri: Option<u32> = None;
        let mut docs: Vec<u32> = Vec::new();
        let mut last: Option<u64> = None;
        while let Some(Reverse((key, i))) = heap.pop() {
            if let Some(k) = sources[i].next_key()? {
                heap.push(Reverse((k, i)));
            }
            if last == Some(key) {
                continue;
            }
            last = Some(key);
            let tri = (key >> 32) as u32;
            let doc = key as u32;
            if cur_tri != Some(tri) {
                if let Some(t) = cur_tri {
                    pw.write_term(unpack_tri(t), &docs)?;
                }
                cur_tri = Some(tri);
                docs.clear();
            }
            docs.push(doc);
        }
        if let Some(t) = cur_tri {
            pw.write_term(unpack_tri(t), &docs)?;
        }

        for path in &self.runs {
            let _ = std::fs::remove_file(path);
        }
        Ok(())
    }
}

fn unpack_tri(t: u32) -> [u8; 3] {
    [(t >> 16) as u8, (t >> 8) as u8, t as u8]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_ratio_ignores_whitespace() {
        assert_eq!(control_ratio(b"hello\nworld\t\r\n"), 0.0);
        assert!(control_ratio(&[0u8, 1, 2, b'a']) > MAX_CONTROL_RATIO);
    }

    #[test]
    fn spill_and_merge_preserve_postings() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut runs = RunSet::new(dir.path());
        runs.push_doc(0, "abcabc")?;
        runs.spill()?;
        runs.push_doc(1, "abc")?;
        runs.push_doc(2, "xyz")?;

        let path = dir.path().join("postings.dat");
        let mut pw = PostingsWriter::create(&path)?;
        runs.merge_into(&mut pw)?;
        pw.finish()?;

        let p = crate::store::Postings::open(&path)?;
        assert_eq!(p.docs(b"abc"), Some(vec![0, 1]));
        assert_eq!(p.docs(b"xyz"), Some(vec![2]));
        assert_eq!(p.docs(b"zzz"), None);
        // Run files are cleaned up after the merge.
        assert!(!dir.path().join(".run-0.tmp").exists());
        Ok(())
    }
}
