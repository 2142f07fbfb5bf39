//! Module `leaf` implement the leaf payload formats.
//!
//! A leaf payload is selected by its first 16-bit word: values below
//! `0x8000` are a plain row count, the three tag values select one of
//! the RLE encodings. These tag values are a compatibility contract.
//!
//! * plain, single-column: `[u16 n][n x key][n x inc1]..[n x incK]`,
//!   column-major so that every INCLUDE column has an O(1) base pointer.
//! * key-RLE v1 `0x8001`: `[tag][u16 nitems][u16 nruns][nruns x (key, u16 count)]`.
//! * key-RLE v2 `0x8002`: as v1, with one `u8` continues byte before the
//!   runs; bit 0 tells whether the first run continues a run from the
//!   left sibling.
//! * include-RLE `0x8003`: `[tag][u16 nitems][u16 nruns]
//!   [nruns x (key, u16 count, inc1, .., incK)]`, INCLUDE values stored
//!   once per run.
//!
//! Two-column leaves use a single row-major layout
//! `[u16 nrows][nrows x (k1, k2, inc..)]`.

use crate::{
    page::{read_u16_le, write_u16_le, Meta},
    types::{IndexDescr, INCLUDE_MAX},
    Error, Result,
};

pub const TAG_KEY_RLE_V1: u16 = 0x8001;
pub const TAG_KEY_RLE_V2: u16 = 0x8002;
pub const TAG_INCLUDE_RLE: u16 = 0x8003;

/// Plain row counts must stay below the tag space.
pub const PLAIN_MAX_ITEMS: usize = 0x7FFF;

/// Largest run count a single RLE entry can encode.
pub const RUN_MAX: usize = 65_535;

/// Fixed-width shape of the rows stored on a leaf.
#[derive(Clone, Copy, Debug)]
pub struct LeafLayout {
    pub nkeyatts: usize,
    pub key1_len: usize,
    pub key2_len: usize,
    pub ninclude: usize,
    pub inc_len: [usize; INCLUDE_MAX],
}

impl LeafLayout {
    pub fn new(descr: &IndexDescr) -> LeafLayout {
        let mut inc_len = [0_usize; INCLUDE_MAX];
        for (i, inc) in descr.includes.iter().enumerate() {
            inc_len[i] = inc.ty.width();
        }
        LeafLayout {
            nkeyatts: descr.nkeyatts(),
            key1_len: descr.key_len(0),
            key2_len: if descr.nkeyatts() == 2 { descr.key_len(1) } else { 0 },
            ninclude: descr.includes.len(),
            inc_len,
        }
    }

    pub fn from_meta(meta: &Meta) -> LeafLayout {
        let mut inc_len = [0_usize; INCLUDE_MAX];
        for (i, len) in meta.inc_len.iter().enumerate() {
            inc_len[i] = *len as usize;
        }
        LeafLayout {
            nkeyatts: meta.nkeyatts as usize,
            key1_len: meta.key_len[0] as usize,
            key2_len: meta.key_len[1] as usize,
            ninclude: meta.inc_len.len(),
            inc_len,
        }
    }

    pub fn inc_total(&self) -> usize {
        self.inc_len[..self.ninclude].iter().sum()
    }

    pub fn row_len(&self) -> usize {
        self.key1_len + self.key2_len + self.inc_total()
    }
}

/// Decoded leaf format, cached by the scan for the pinned leaf.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LeafFormat {
    Plain,
    /// `continues` is None for v1, Some(bit) for v2.
    KeyRle { continues: Option<bool> },
    IncludeRle,
}

impl LeafFormat {
    pub fn is_plain(&self) -> bool {
        matches!(self, LeafFormat::Plain)
    }
}

/// Scan-side cache of the active run, invalidated on leaf advance.
/// Plain rows are their own run; detecting that per row is the hot-path
/// overhead this cache exists to avoid.
#[derive(Clone, Copy, Debug)]
pub enum RunCache {
    None,
    PlainRow { off: u32 },
    RleRun { run: u16, start: u32, end: u32 },
}

impl RunCache {
    pub fn clear(&mut self) {
        *self = RunCache::None;
    }
}

/// Borrowed, parsed view over one leaf payload.
pub struct LeafView<'a> {
    payload: &'a [u8],
    layout: LeafLayout,
    pub fmt: LeafFormat,
    pub nitems: u16,
    pub nruns: u16,
    data_off: usize,
}

impl<'a> LeafView<'a> {
    /// Item count of a leaf payload, recognising the tag vs plain-count
    /// discriminator in the first word.
    pub fn count(payload: &[u8]) -> Result<u16> {
        if payload.len() < 2 {
            err_at!(CorruptPage, msg: "leaf payload {} bytes", payload.len())?
        }
        let word = read_u16_le(payload, 0);
        if word < 0x8000 {
            Ok(word)
        } else {
            match word {
                TAG_KEY_RLE_V1 | TAG_KEY_RLE_V2 | TAG_INCLUDE_RLE => {
                    if payload.len() < 6 {
                        err_at!(CorruptPage, msg: "rle leaf payload {} bytes", payload.len())?
                    }
                    Ok(read_u16_le(payload, 2))
                }
                tag => err_at!(CorruptPage, msg: "unrecognised leaf tag {:#06x}", tag),
            }
        }
    }

    pub fn parse(payload: &'a [u8], layout: LeafLayout) -> Result<LeafView<'a>> {
        if payload.len() < 2 {
            err_at!(CorruptPage, msg: "leaf payload {} bytes", payload.len())?
        }
        let word = read_u16_le(payload, 0);
        let view = if word < 0x8000 {
            let nitems = word;
            let want = 2 + (nitems as usize) * layout.row_len();
            if payload.len() != want {
                err_at!(
                    CorruptPage,
                    msg: "plain leaf {} bytes, expected {} for {} items",
                    payload.len(), want, nitems
                )?
            }
            LeafView {
                payload,
                layout,
                fmt: LeafFormat::Plain,
                nitems,
                nruns: 0,
                data_off: 2,
            }
        } else {
            if layout.nkeyatts != 1 {
                err_at!(CorruptPage, msg: "rle tag {:#06x} on a two-column leaf", word)?
            }
            let (fmt, data_off) = match word {
                TAG_KEY_RLE_V1 => (LeafFormat::KeyRle { continues: None }, 6),
                TAG_KEY_RLE_V2 => {
                    if payload.len() < 7 {
                        err_at!(CorruptPage, msg: "rle-v2 leaf payload {} bytes", payload.len())?
                    }
                    let continues = (payload[6] & 0x01) != 0;
                    (LeafFormat::KeyRle { continues: Some(continues) }, 7)
                }
                TAG_INCLUDE_RLE => (LeafFormat::IncludeRle, 6),
                tag => return err_at!(CorruptPage, msg: "unrecognised leaf tag {:#06x}", tag),
            };
            let nitems = read_u16_le(payload, 2);
            let nruns = read_u16_le(payload, 4);
            let stride = match fmt {
                LeafFormat::IncludeRle => layout.key1_len + 2 + layout.inc_total(),
                _ => layout.key1_len + 2,
            };
            let want = data_off + (nruns as usize) * stride;
            if payload.len() != want {
                err_at!(
                    CorruptPage,
                    msg: "rle leaf {} bytes, expected {} for {} runs",
                    payload.len(), want, nruns
                )?
            }
            if nruns > nitems {
                err_at!(CorruptPage, msg: "rle leaf {} runs over {} items", nruns, nitems)?
            }
            LeafView {
                payload,
                layout,
                fmt,
                nitems,
                nruns,
                data_off,
            }
        };
        Ok(view)
    }

    /// Expensive structural re-validation: run counts in range and summing
    /// to the declared item count. Used by index validation and forced into
    /// the access path by the `test_force_page_bounds_check` tunable.
    pub fn check_structure(&self) -> Result<()> {
        if self.fmt.is_plain() {
            return Ok(());
        }
        let mut total = 0_u64;
        for run in 0..self.nruns {
            let (_, count) = self.run_entry(run);
            if count == 0 {
                err_at!(CorruptPage, msg: "run {} has zero count", run)?
            }
            total += u64::from(count);
        }
        if total != u64::from(self.nitems) {
            err_at!(
                CorruptPage,
                msg: "run counts sum to {}, leaf declares {} items", total, self.nitems
            )?
        }
        Ok(())
    }

    pub fn continues_left(&self) -> bool {
        matches!(self.fmt, LeafFormat::KeyRle { continues: Some(true) })
    }

    fn run_stride(&self) -> usize {
        match self.fmt {
            LeafFormat::IncludeRle => self.layout.key1_len + 2 + self.layout.inc_total(),
            _ => self.layout.key1_len + 2,
        }
    }

    /// Key bytes and run count of run `run` (0-based). RLE formats only.
    pub fn run_entry(&self, run: u16) -> (&'a [u8], u16) {
        let off = self.data_off + (run as usize) * self.run_stride();
        let key = &self.payload[off..off + self.layout.key1_len];
        let count = read_u16_le(self.payload, off + self.layout.key1_len);
        (key, count)
    }

    /// INCLUDE bytes of column `col` within run `run`. Include-RLE only.
    pub fn run_include(&self, run: u16, col: usize) -> &'a [u8] {
        let base = self.data_off + (run as usize) * self.run_stride() + self.layout.key1_len + 2;
        let skip: usize = self.layout.inc_len[..col].iter().sum();
        &self.payload[base + skip..base + skip + self.layout.inc_len[col]]
    }

    /// Byte offset where plain column `col` starts; col 0 is the key,
    /// col 1..=K are the INCLUDE columns. Plain single-column only.
    pub fn column_base(&self, col: usize) -> usize {
        let n = self.nitems as usize;
        if col == 0 {
            self.data_off
        } else {
            let skip: usize = self.layout.inc_len[..col - 1].iter().sum();
            self.data_off + n * self.layout.key1_len + n * skip
        }
    }

    /// Key bytes at 1-based `off` on a plain single-column leaf.
    fn plain_key(&self, off: u32) -> &'a [u8] {
        let base = self.data_off + ((off - 1) as usize) * self.layout.key1_len;
        &self.payload[base..base + self.layout.key1_len]
    }

    /// INCLUDE bytes of column `col` at 1-based `off` on a plain leaf.
    pub fn plain_include(&self, off: u32, col: usize) -> &'a [u8] {
        let len = self.layout.inc_len[col];
        let base = self.column_base(col + 1) + ((off - 1) as usize) * len;
        &self.payload[base..base + len]
    }

    /// Full row bytes at 1-based `off` on a two-column leaf.
    pub fn row(&self, off: u32) -> &'a [u8] {
        let len = self.layout.row_len();
        let base = self.data_off + ((off - 1) as usize) * len;
        &self.payload[base..base + len]
    }

    fn check_offset(&self, off: u32) -> Result<()> {
        if off == 0 || off > u32::from(self.nitems) {
            err_at!(
                CorruptPage,
                msg: "offset {} beyond leaf item count {}", off, self.nitems
            )?
        }
        Ok(())
    }

    // Map a 1-based item offset to its run, walking from the cached run
    // when possible so forward and backward leaf walks stay O(1) per item.
    fn run_for(&self, off: u32, cache: &mut RunCache) -> Result<u16> {
        if let RunCache::RleRun { run, start, end } = *cache {
            if off >= start && off <= end {
                return Ok(run);
            }
            if off == end + 1 && run + 1 < self.nruns {
                let (_, count) = self.run_entry(run + 1);
                let nstart = end + 1;
                *cache = RunCache::RleRun {
                    run: run + 1,
                    start: nstart,
                    end: nstart + u32::from(count) - 1,
                };
                return Ok(run + 1);
            }
            if run > 0 && off + 1 == start {
                let (_, count) = self.run_entry(run - 1);
                *cache = RunCache::RleRun {
                    run: run - 1,
                    start: start - u32::from(count),
                    end: start - 1,
                };
                return Ok(run - 1);
            }
        }
        // cold path, accumulate from the first run.
        let mut start = 1_u32;
        for run in 0..self.nruns {
            let (_, count) = self.run_entry(run);
            let end = start + u32::from(count) - 1;
            if off >= start && off <= end {
                *cache = RunCache::RleRun { run, start, end };
                return Ok(run);
            }
            start = end + 1;
        }
        err_at!(CorruptPage, msg: "offset {} not covered by {} runs", off, self.nruns)
    }

    /// Leading-key bytes at 1-based `off`, through the run cache.
    pub fn locate_key(&self, off: u32, cache: &mut RunCache) -> Result<&'a [u8]> {
        self.check_offset(off)?;
        match self.fmt {
            LeafFormat::Plain if self.layout.nkeyatts == 2 => {
                *cache = RunCache::PlainRow { off };
                Ok(&self.row(off)[..self.layout.key1_len])
            }
            LeafFormat::Plain => {
                *cache = RunCache::PlainRow { off };
                Ok(self.plain_key(off))
            }
            _ => {
                let run = self.run_for(off, cache)?;
                Ok(self.run_entry(run).0)
            }
        }
    }

    /// 1-based inclusive bounds of the run containing `off`; None on
    /// plain pages where every row is its own run.
    pub fn run_bounds(&self, off: u32, cache: &mut RunCache) -> Result<Option<(u32, u32)>> {
        self.check_offset(off)?;
        if self.fmt.is_plain() {
            return Ok(None);
        }
        self.run_for(off, cache)?;
        match *cache {
            RunCache::RleRun { start, end, .. } => Ok(Some((start, end))),
            _ => err_at!(Fatal, msg: "run cache not primed for offset {}", off),
        }
    }
}

/// Encode a plain leaf payload. Single-column rows go column-major,
/// two-column rows go row-major. `rows` are full fixed-width row images.
pub fn encode_plain(layout: &LeafLayout, rows: &[&[u8]]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(2 + rows.len() * layout.row_len());
    buf.resize(2, 0);
    write_u16_le(&mut buf, 0, rows.len() as u16);
    if layout.nkeyatts == 2 {
        for row in rows {
            buf.extend_from_slice(row);
        }
    } else {
        for row in rows {
            buf.extend_from_slice(&row[..layout.key1_len]);
        }
        let mut skip = layout.key1_len;
        for col in 0..layout.ninclude {
            let len = layout.inc_len[col];
            for row in rows {
                buf.extend_from_slice(&row[skip..skip + len]);
            }
            skip += len;
        }
    }
    buf
}

/// Encode a key-RLE leaf payload; v2 with the continues byte when
/// `continues` is set, v1 otherwise.
pub fn encode_key_rle(
    layout: &LeafLayout,
    runs: &[(&[u8], u16)],
    continues: Option<bool>,
) -> Vec<u8> {
    let nitems: u32 = runs.iter().map(|(_, c)| u32::from(*c)).sum();
    let hdr = if continues.is_some() { 7 } else { 6 };
    let mut buf = Vec::with_capacity(hdr + runs.len() * (layout.key1_len + 2));
    buf.resize(hdr, 0);
    let tag = match continues {
        Some(_) => TAG_KEY_RLE_V2,
        None => TAG_KEY_RLE_V1,
    };
    write_u16_le(&mut buf, 0, tag);
    write_u16_le(&mut buf, 2, nitems as u16);
    write_u16_le(&mut buf, 4, runs.len() as u16);
    if let Some(cont) = continues {
        buf[6] = u8::from(cont);
    }
    for (key, count) in runs {
        buf.extend_from_slice(&key[..layout.key1_len]);
        buf.extend_from_slice(&count.to_le_bytes());
    }
    buf
}

/// Encode an include-RLE leaf payload. Each run carries one full row
/// image whose INCLUDE bytes are constant across the run.
pub fn encode_include_rle(layout: &LeafLayout, runs: &[(&[u8], u16)]) -> Vec<u8> {
    let nitems: u32 = runs.iter().map(|(_, c)| u32::from(*c)).sum();
    let stride = layout.key1_len + 2 + layout.inc_total();
    let mut buf = Vec::with_capacity(6 + runs.len() * stride);
    buf.resize(6, 0);
    write_u16_le(&mut buf, 0, TAG_INCLUDE_RLE);
    write_u16_le(&mut buf, 2, nitems as u16);
    write_u16_le(&mut buf, 4, runs.len() as u16);
    for (row, count) in runs {
        buf.extend_from_slice(&row[..layout.key1_len]);
        buf.extend_from_slice(&count.to_le_bytes());
        buf.extend_from_slice(&row[layout.key1_len..]);
    }
    buf
}

#[cfg(test)]
#[path = "leaf_test.rs"]
mod leaf_test;
