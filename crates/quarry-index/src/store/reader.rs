use anyhow::{bail, Context, Result};
use memmap2::Mmap;
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use super::varint::read_var_u32_from_mmap;
use super::{CONTENT_FILE, EXCLUDED_FILE, MAGIC, MANIFEST_FILE, NAMES_FILE, POSTINGS_FILE, VERSION};
use crate::types::{FileEntry, Manifest};

#[derive(Clone, Copy, Debug)]
struct TermEntry {
    off: usize,
    n_docs: u32,
}

/// Mmap-backed posting file. The term directory (trigram → offset) is parsed
/// once at open; doc lists are decoded on demand.
#[derive(Debug)]
pub(crate) struct Postings {
    mmap: Mmap,
    terms: HashMap<[u8; 3], TermEntry>,
}

impl Postings {
    pub fn open(path: &Path) -> Result<Self> {
        let f = File::open(path)
            .with_context(|| format!("open posting file {}", path.display()))?;
        let mmap = unsafe { Mmap::map(&f)? };
        if mmap.len() < 12 {
            bail!("posting file too small ({})", path.display());
        }
        let magic = u32::from_le_bytes(mmap[0..4].try_into().unwrap());
        let ver = u32::from_le_bytes(mmap[4..8].try_into().unwrap());
        if magic != MAGIC || ver != VERSION {
            bail!("bad posting file header ({})", path.display());
        }
        let term_count = u32::from_le_bytes(mmap[8..12].try_into().unwrap()) as usize;

        let mut terms = HashMap::with_capacity(term_count);
        let mut off = 12usize;
        for _ in 0..term_count {
            if off + 7 > mmap.len() {
                bail!("posting file truncated while reading term directory (off={})", off);
            }
            let tri: [u8; 3] = mmap[off..off + 3].try_into().unwrap();
            off += 3;
            let n_docs = u32::from_le_bytes(mmap[off..off + 4].try_into().unwrap());
            off += 4;
            let entry_off = off;
            for _ in 0..n_docs {
                let _ = read_var_u32_from_mmap(&mmap, &mut off)
                    .with_context(|| format!("posting file truncated inside doc list (off={})", off))?;
            }
            terms.insert(
                tri,
                TermEntry {
                    off: entry_off,
                    n_docs,
                },
            );
        }
        Ok(Self { mmap, terms })
    }

    /// The sorted doc-ID list for one trigram, or None when the trigram does
    /// not occur in the corpus.
    pub fn docs(&self, tri: &[u8; 3]) -> Option<Vec<u32>> {
        let entry = self.terms.get(tri)?;
        let mut off = entry.off;
        let mut out = Vec::with_capacity(entry.n_docs as usize);
        let mut prev = 0u32;
        for _ in 0..entry.n_docs {
            let delta = read_var_u32_from_mmap(&self.mmap, &mut off).ok()?;
            let doc = prev.wrapping_add(delta);
            prev = doc;
            out.push(doc);
        }
        Some(out)
    }
}

/// An open, immutable index directory.
#[derive(Debug)]
pub struct Index {
    dir: PathBuf,
    manifest: Manifest,
    content: Mmap,
    postings: Postings,
    names: Postings,
}

impl Index {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let manifest_path = dir.join(MANIFEST_FILE);
        let manifest: Manifest = serde_json::from_str(
            &std::fs::read_to_string(&manifest_path)
                .with_context(|| format!("read manifest {}", manifest_path.display()))?,
        )
        .with_context(|| format!("parse manifest {}", manifest_path.display()))?;
        if manifest.version != VERSION {
            bail!(
                "unsupported index format version {} in {}",
                manifest.version,
                dir.display()
            );
        }
        let content_file = File::open(dir.join(CONTENT_FILE))
            .with_context(|| format!("open content store in {}", dir.display()))?;
        let content = unsafe { Mmap::map(&content_file)? };
        let postings = Postings::open(&dir.join(POSTINGS_FILE))?;
        let names = Postings::open(&dir.join(NAMES_FILE))?;
        Ok(Self {
            dir,
            manifest,
            content,
            postings,
            names,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn url(&self) -> &str {
        &self.manifest.url
    }

    pub fn rev(&self) -> &str {
        &self.manifest.rev
    }

    pub fn file_count(&self) -> usize {
        self.manifest.files.len()
    }

    pub(crate) fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub(crate) fn postings(&self) -> &Postings {
        &self.postings
    }

    pub(crate) fn names(&self) -> &Postings {
        &self.names
    }

    /// The stored body of one manifest entry. None when the recorded offsets
    /// do not address valid UTF-8 inside the content store.
    pub(crate) fn content_of(&self, entry: &FileEntry) -> Option<&str> {
        let beg = entry.offset as usize;
        let end = beg.checked_add(entry.len as usize)?;
        if end > self.content.len() {
            return None;
        }
        std::str::from_utf8(&self.content[beg..end]).ok()
    }

    /// The raw excluded-files log, as written by the build.
    pub fn excluded_files_json(&self) -> std::io::Result<String> {
        std::fs::read_to_string(self.dir.join(EXCLUDED_FILE))
    }

    /// Remove this index's directory. Callers serialize destruction with the
    /// searcher's swap lock; the mmaps stay valid until drop.
    pub fn destroy(&self) -> std::io::Result<()> {
        std::fs::remove_dir_all(&self.dir)
    }
}
