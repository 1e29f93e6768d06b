use anyhow::{bail, Result};
use memmap2::Mmap;
use std::io::Write;

/// Write a u32 as a LEB128-style varint.
pub(crate) fn write_var_u32<W: Write>(w: &mut W, mut v: u32) -> Result<()> {
    let mut buf = [0u8; 5];
    let mut i = 0;
    while v >= 0x80 {
        buf[i] = (v as u8 & 0x7F) | 0x80;
        v >>= 7;
        i += 1;
    }
    buf[i] = v as u8;
    i += 1;
    w.write_all(&buf[..i])?;
    Ok(())
}

/// Read a LEB128-style u32 varint from an mmap buffer, advancing `off`.
pub(crate) fn read_var_u32_from_mmap(mmap: &Mmap, off: &mut usize) -> Result<u32> {
    let mut shift = 0u32;
    let mut out: u32 = 0;
    loop {
        if *off >= mmap.len() {
            bail!("unexpected EOF while reading varint");
        }
        let b = mmap[*off];
        *off += 1;
        out |= ((b & 0x7F) as u32) << shift;
        if (b & 0x80) == 0 {
            return Ok(out);
        }
        shift += 7;
        if shift >= 35 {
            bail!("varint too long");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_boundary_values() {
        let mut buf = Vec::new();
        let values = [0u32, 1, 127, 128, 300, 16_383, 16_384, u32::MAX];
        for v in values {
            write_var_u32(&mut buf, v).unwrap();
        }
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), &buf).unwrap();
        let f = std::fs::File::open(tmp.path()).unwrap();
        let mmap = unsafe { Mmap::map(&f).unwrap() };
        let mut off = 0usize;
        for v in values {
            assert_eq!(read_var_u32_from_mmap(&mmap, &mut off).unwrap(), v);
        }
        assert_eq!(off, mmap.len());
    }
}
