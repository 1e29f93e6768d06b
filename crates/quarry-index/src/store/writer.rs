use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

use super::varint::write_var_u32;
use super::{MAGIC, VERSION};

/// Streams one posting file: magic, version, term count, then per trigram the
/// sorted doc-ID list as delta-encoded varints.
///
/// The term count is not known until the merged key stream is exhausted, so a
/// placeholder is written up front and patched in [`PostingsWriter::finish`].
pub(crate) struct PostingsWriter {
    w: BufWriter<File>,
    terms: u32,
}

impl PostingsWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let f = File::create(path)
            .with_context(|| format!("create posting file {}", path.display()))?;
        let mut w = BufWriter::new(f);
        w.write_all(&MAGIC.to_le_bytes())?;
        w.write_all(&VERSION.to_le_bytes())?;
        w.write_all(&0u32.to_le_bytes())?; // term count, patched later
        Ok(Self { w, terms: 0 })
    }

    /// Append one term. `docs` must be sorted ascending and deduplicated.
    pub fn write_term(&mut self, tri: [u8; 3], docs: &[u32]) -> Result<()> {
        self.w.write_all(&tri)?;
        self.w.write_all(&(docs.len() as u32).to_le_bytes())?;
        let mut prev = 0u32;
        for &doc in docs {
            write_var_u32(&mut self.w, doc.wrapping_sub(prev))?;
            prev = doc;
        }
        self.terms += 1;
        Ok(())
    }

    pub fn finish(mut self) -> Result<()> {
        self.w.flush()?;
        self.w.seek(SeekFrom::Start(8))?;
        self.w.write_all(&self.terms.to_le_bytes())?;
        self.w.flush()?;
        Ok(())
    }
}
