//! Module `build` implement the bulk build pipeline.
//!
//! collect -> sort -> encode leaves -> build internal levels -> zone
//! maps and bloom filters -> metapage. The index is built once by a
//! single worker; write entry points on the finished index fail with
//! `ReadOnly`.

use log::debug;

use std::{
    cell::RefCell,
    cmp,
    convert::TryFrom,
    rc::Rc,
    time,
};

use crate::{
    bloom::{FilterBuilder, SubtreeFilter},
    config::{Config, Stats},
    flush::Flusher,
    leaf::{self, LeafLayout, PLAIN_MAX_ITEMS, RUN_MAX},
    meta::{self, ZoneSpan},
    node,
    page::{Meta, Page, INVALID_BLOCK, PAGE_SIZE, PAYLOAD_BUDGET},
    sort,
    types::Row,
    util, Error, Result,
};

/// Build an immutable, ordered, index-only secondary index from a row
/// stream.
///
/// ```ignore
/// let mut config = Config::new(dir, "events", descr);
/// let mut builder = Builder::initial(config)?;
/// builder.build_index(rows.into_iter().map(Ok))?;
/// let index = Index::open(dir, "events")?;
/// ```
pub struct Builder {
    config: Config,
    layout: LeafLayout,
    iflush: Rc<RefCell<Flusher>>,
    stats: Stats,
    start: time::SystemTime,
}

impl Builder {
    /// Create a fresh index file and its flusher. The descriptor is
    /// validated here, before anything touches the disk.
    pub fn initial(config: Config) -> Result<Builder> {
        config.descr.validate()?;

        let layout = LeafLayout::new(&config.descr);
        if layout.row_len() + 2 > PAYLOAD_BUDGET {
            err_at!(
                RowTooLarge,
                msg: "row of {} bytes cannot fit an empty leaf", layout.row_len()
            )?
        }

        let iflush = {
            let loc = config.to_index_location();
            Rc::new(RefCell::new(Flusher::new(&loc, config.flush_queue_size)?))
        };
        debug!(
            target: "ordix",
            "build {:?}: created {:?}", config.name, iflush.borrow().to_location()
        );
        // reserve block 0 for the metapage, rewritten in place on commit.
        iflush.borrow_mut().flush(vec![0_u8; PAGE_SIZE])?;

        let stats = Stats {
            name: config.name.clone(),
            key_types: config.descr.keys.iter().map(|k| k.ty.clone()).collect(),
            collations: config.descr.keys.iter().map(|k| k.collation.clone()).collect(),
            include_types: config.descr.includes.iter().map(|i| i.ty.clone()).collect(),
            bloom_enabled: config.bloom_enabled,
            bloom_nhash: config.bloom_nhash as usize,
            root_block: u64::from(INVALID_BLOCK),
            ..Stats::default()
        };

        Ok(Builder {
            config,
            layout,
            iflush,
            stats,
            start: time::SystemTime::now(),
        })
    }

    /// Consume the row stream and commit the index. On any error the
    /// partial file is removed, leaving the index in its pre-existence
    /// state.
    pub fn build_index<I>(mut self, iter: I) -> Result<Stats>
    where
        I: IntoIterator<Item = Result<Row>>,
    {
        match self.do_build(iter) {
            Ok(stats) => Ok(stats),
            Err(err) => {
                self.iflush.borrow_mut().close().ok();
                let loc = self.config.to_index_location();
                std::fs::remove_file(&loc).ok();
                Err(err)
            }
        }
    }

    fn do_build<I>(&mut self, iter: I) -> Result<Stats>
    where
        I: IntoIterator<Item = Result<Row>>,
    {
        let arena = self.collect(iter)?;
        debug!(target: "ordix", "build {:?}: collected {} rows", self.config.name, arena.n_rows);

        let order = sort::sort_rows(&arena.data, arena.row_len, arena.n_rows, &self.config.descr)?;
        let rows = SortedRows {
            arena: &arena,
            order: &order,
            key1_len: self.layout.key1_len,
        };

        let fanout = cmp::max(
            2,
            self.config.fanout.unwrap_or_else(|| node::fanout(self.layout.key1_len)),
        );
        let (leaves, filters) = self.write_leaves(&rows, fanout)?;
        debug!(target: "ordix", "build {:?}: wrote {} leaves", self.config.name, leaves.len());

        let next_block = match leaves.last() {
            Some(info) => info.block + 1,
            None => 1,
        };
        let (root_block, height, zones, blooms) =
            self.build_levels(leaves, filters, fanout, next_block)?;

        self.finalize(root_block, height, zones, blooms)
    }

    // Append each incoming row into the arena, validating as we go.
    fn collect<I>(&mut self, iter: I) -> Result<Arena>
    where
        I: IntoIterator<Item = Result<Row>>,
    {
        let descr = &self.config.descr;
        let nkeys = descr.nkeyatts();
        let mut arena = Arena::new(self.layout.row_len());
        let mut scratch = vec![0_u8; self.layout.row_len()];

        for row in iter {
            let row = row?;
            if row.values.len() != descr.nattrs() || row.isnull.len() != descr.nattrs() {
                err_at!(
                    InvalidInput,
                    msg: "row has {} attributes, index wants {}",
                    row.values.len(),
                    descr.nattrs()
                )?
            }
            let mut off = 0;
            for (i, key) in descr.keys.iter().enumerate() {
                if row.isnull[i] {
                    err_at!(NullKey, msg: "key attribute {} is null", i + 1)?
                }
                let width = key.ty.width();
                row.values[i].encode_into(&key.ty, &mut scratch[off..off + width])?;
                off += width;
            }
            for (j, inc) in descr.includes.iter().enumerate() {
                if row.isnull[nkeys + j] {
                    err_at!(NullKey, msg: "INCLUDE attribute {} is null", nkeys + j + 1)?
                }
                let width = inc.ty.width();
                row.values[nkeys + j].encode_into(&inc.ty, &mut scratch[off..off + width])?;
                off += width;
            }
            arena.push_row(&scratch);
        }
        Ok(arena)
    }

    // Emit sorted rows into chained leaf pages, deciding the payload
    // format per leaf. Returns per-leaf bookkeeping and, when blooms are
    // enabled, one filter builder per level-1 subtree.
    fn write_leaves(
        &mut self,
        rows: &SortedRows,
        fanout: usize,
    ) -> Result<(Vec<LeafInfo>, Vec<FilterBuilder>)> {
        let mut chain = ChainWriter::new(Rc::clone(&self.iflush), 1);
        let mut infos: Vec<LeafInfo> = vec![];
        let mut filters: Vec<FilterBuilder> = vec![];

        let mut i = 0;
        while i < rows.len() {
            let prev_high = infos.last().map(|info| info.high_key.clone());
            let plan = self.plan_leaf(rows, i, prev_high.as_deref())?;

            let mut page = Page::new(0);
            page.set_payload(&plan.payload)?;
            let block = chain.append(page)?;

            if self.config.bloom_enabled {
                let subtree = infos.len() / fanout;
                if subtree == filters.len() {
                    filters.push(FilterBuilder::new(self.config.bloom_nhash));
                }
                for r in i..i + plan.consumed {
                    filters[subtree].add(rows.key1(r));
                }
            }

            infos.push(LeafInfo {
                block,
                first_key: rows.key1(i).to_vec(),
                high_key: rows.key1(i + plan.consumed - 1).to_vec(),
            });
            match plan.fmt {
                PlanFmt::Plain => self.stats.n_plain_leaves += 1,
                PlanFmt::KeyRle => self.stats.n_rle_leaves += 1,
                PlanFmt::IncludeRle => self.stats.n_include_rle_leaves += 1,
            }
            i += plan.consumed;
        }
        chain.finish()?;

        self.stats.n_count = rows.len() as u64;
        self.stats.n_leaves = infos.len() as u64;
        self.stats.first_leaf = infos.first().map(|l| u64::from(l.block)).unwrap_or(0);
        self.stats.last_leaf = infos.last().map(|l| u64::from(l.block)).unwrap_or(0);
        Ok((infos, filters))
    }

    // Decide the format for the next leaf and encode it.
    fn plan_leaf(
        &self,
        rows: &SortedRows,
        start: usize,
        prev_high: Option<&[u8]>,
    ) -> Result<LeafPlan> {
        let layout = &self.layout;
        let remaining = rows.len() - start;
        let row_len = layout.row_len();
        let plain_fit = cmp::min(
            cmp::min(remaining, (PAYLOAD_BUDGET - 2) / row_len),
            PLAIN_MAX_ITEMS,
        );
        if plain_fit == 0 {
            err_at!(RowTooLarge, msg: "row of {} bytes cannot fit an empty leaf", row_len)?
        }

        if layout.nkeyatts == 2 {
            return Ok(self.encode_plain_plan(rows, start, plain_fit));
        }

        // gather candidate runs for the RLE formats.
        let by_full_row = layout.ninclude > 0;
        let stride = match by_full_row {
            true => layout.key1_len + 2 + layout.inc_total(),
            false => layout.key1_len + 2,
        };
        let continues = match prev_high {
            Some(high) => Some(high == rows.key1(start)),
            None => None,
        };
        let hdr = match by_full_row {
            true => 6,
            // v2 carries the continues byte.
            false => match continues {
                Some(true) => 7,
                _ => 6,
            },
        };

        let max_run_bytes = PAYLOAD_BUDGET - hdr;
        let mut runs: Vec<(usize, u16)> = vec![];
        let mut covered = 0_usize;
        let mut has_long_run = false;
        let mut i = start;
        while i < rows.len() && (runs.len() + 1) * stride <= max_run_bytes && covered < RUN_MAX {
            let probe: &[u8] = match by_full_row {
                true => rows.row(i),
                false => rows.key1(i),
            };
            let mut j = i + 1;
            while j < rows.len()
                && j - i < RUN_MAX
                && covered + (j - i) < RUN_MAX
                && probe
                    == match by_full_row {
                        true => rows.row(j),
                        false => rows.key1(j),
                    }
            {
                j += 1;
            }
            let count = j - i;
            runs.push((i, count as u16));
            covered += count;
            if count > 1 {
                has_long_run = true;
            }
            i = j;
        }

        // key-RLE only pays off when at least one real run exists and it
        // packs more keys than plain would.
        let rle_wins = has_long_run && covered > plain_fit;
        if !rle_wins {
            return Ok(self.encode_plain_plan(rows, start, plain_fit));
        }

        let payload = if by_full_row {
            let entries: Vec<(&[u8], u16)> =
                runs.iter().map(|(r, c)| (rows.row(*r), *c)).collect();
            leaf::encode_include_rle(layout, &entries)
        } else {
            let entries: Vec<(&[u8], u16)> =
                runs.iter().map(|(r, c)| (rows.key1(*r), *c)).collect();
            let continues = match continues {
                Some(true) => Some(true),
                _ => None,
            };
            leaf::encode_key_rle(layout, &entries, continues)
        };
        if payload.len() > PAYLOAD_BUDGET {
            // capacity misjudged; fall back to plain.
            return Ok(self.encode_plain_plan(rows, start, plain_fit));
        }
        Ok(LeafPlan {
            consumed: covered,
            payload,
            fmt: match by_full_row {
                true => PlanFmt::IncludeRle,
                false => PlanFmt::KeyRle,
            },
        })
    }

    fn encode_plain_plan(&self, rows: &SortedRows, start: usize, fit: usize) -> LeafPlan {
        let slices: Vec<&[u8]> = (start..start + fit).map(|i| rows.row(i)).collect();
        LeafPlan {
            consumed: fit,
            payload: leaf::encode_plain(&self.layout, &slices),
            fmt: PlanFmt::Plain,
        }
    }

    // Build internal levels bottom-up from the leaf high keys. Returns
    // the root block, tree height, zone maps and frozen bloom filters.
    //
    // Every level is encoded in full before any of it is flushed; a
    // fanout that over-estimates what one node page holds is caught
    // while nothing of the level is on disk, and the tree degrades to a
    // single internal level over all the leaves. No orphaned level can
    // reach the file.
    fn build_levels(
        &mut self,
        leaves: Vec<LeafInfo>,
        filters: Vec<FilterBuilder>,
        mut fanout: usize,
        mut next_block: u32,
    ) -> Result<(u32, usize, Vec<ZoneSpan>, Vec<SubtreeFilter>)> {
        let key1_len = self.layout.key1_len;

        match leaves.len() {
            0 => return Ok((INVALID_BLOCK, 0, vec![], vec![])),
            1 => return Ok((leaves[0].block, 0, vec![], vec![])),
            _ => (),
        }

        let mut entries = leaves;
        let mut height = 0_usize;
        let mut zones: Vec<ZoneSpan> = vec![];
        let mut blooms: Vec<SubtreeFilter> = vec![];
        let mut filters = Some(filters);

        loop {
            height += 1;
            let level = err_at!(FailConvert, u8::try_from(height))?;

            let mut planned: Vec<(Vec<u8>, Vec<u8>, Vec<u8>)> = vec![];
            let mut overflow = false;
            for chunk in entries.chunks(fanout) {
                let node_entries: Vec<(u32, &[u8])> = chunk
                    .iter()
                    .map(|e| (e.block, e.high_key.as_slice()))
                    .collect();
                let payload = node::encode_node(key1_len, &node_entries);
                if payload.len() > PAYLOAD_BUDGET {
                    overflow = true;
                    break;
                }
                planned.push((
                    payload,
                    chunk[0].first_key.clone(),
                    chunk[chunk.len() - 1].high_key.clone(),
                ));
            }

            if overflow {
                if height > 1 {
                    // lower levels are already on disk and must not be
                    // orphaned. Unreachable with fixed-width entries: an
                    // upper level is always narrower than the one below
                    // it, which was verified against the same capacity.
                    err_at!(
                        Fatal,
                        msg: "fanout {} overflows a node page at level {}", fanout, height
                    )?
                }
                // fall back to height 1, the root routing every leaf.
                if !node::entries_fit(key1_len, entries.len()) {
                    err_at!(
                        Fatal,
                        msg: "fanout {} over-estimates a node page and {} leaves cannot fit a single root",
                        fanout,
                        entries.len()
                    )?
                }
                debug!(
                    target: "ordix",
                    "build {:?}: fanout {} over-estimates, degrading to one root over {} leaves",
                    self.config.name, fanout, entries.len()
                );
                fanout = entries.len();
                // the single subtree covers every leaf; its filter is
                // the union of the per-subtree builders.
                if let Some(list) = filters.take() {
                    let mut iter = list.into_iter();
                    let merged = match iter.next() {
                        Some(mut merged) => {
                            for other in iter {
                                merged.absorb(other);
                            }
                            vec![merged]
                        }
                        None => vec![],
                    };
                    filters = Some(merged);
                }
                height -= 1;
                continue;
            }

            let mut chain = ChainWriter::new(Rc::clone(&self.iflush), next_block);
            let mut next_entries: Vec<LeafInfo> = vec![];
            for (payload, first_key, high_key) in planned {
                let mut page = Page::new(level);
                page.set_payload(&payload)?;
                let block = chain.append(page)?;
                self.stats.n_internals += 1;

                if height == 1 {
                    zones.push(ZoneSpan {
                        child: u64::from(block),
                        min_key: first_key.clone(),
                        max_key: high_key.clone(),
                    });
                }
                next_entries.push(LeafInfo {
                    block,
                    first_key,
                    high_key,
                });
            }
            chain.finish()?;
            next_block = chain.next_block;

            if height == 1 {
                if let Some(filters) = filters.take() {
                    for (i, builder) in filters.into_iter().enumerate() {
                        let mut filter = builder.build();
                        filter.child = zones[i].child;
                        blooms.push(filter);
                    }
                }
            }

            entries = next_entries;
            if entries.len() == 1 {
                return Ok((entries[0].block, height, zones, blooms));
            }
        }
    }

    // Metadata region, flusher shutdown, in-place metapage rewrite and
    // the host's all-visible signal.
    fn finalize(
        &mut self,
        root_block: u32,
        height: usize,
        zones: Vec<ZoneSpan>,
        blooms: Vec<SubtreeFilter>,
    ) -> Result<Stats> {
        let zone_offset = {
            let fpos = self.iflush.borrow().to_fpos();
            err_at!(FailConvert, u32::try_from(fpos / (PAGE_SIZE as u64)))?
        };

        self.stats.height = height;
        self.stats.root_block = u64::from(root_block);
        self.stats.build_time = {
            let elapsed = err_at!(Fatal, self.start.elapsed())?;
            err_at!(FailConvert, u64::try_from(elapsed.as_nanos()))?
        };
        self.stats.epoch = {
            let elapsed = err_at!(Fatal, time::UNIX_EPOCH.elapsed())?;
            err_at!(FailConvert, u64::try_from(elapsed.as_nanos()))?
        };

        let region = meta::encode_meta_region(&self.stats, &zones, &blooms)?;
        self.iflush.borrow_mut().flush(region)?;
        self.iflush.borrow_mut().close()?;

        let meta = Meta {
            nkeyatts: self.layout.nkeyatts as u16,
            key_len: [self.layout.key1_len as u16, self.layout.key2_len as u16],
            inc_len: self.layout.inc_len[..self.layout.ninclude]
                .iter()
                .map(|len| *len as u16)
                .collect(),
            bloom_enabled: self.config.bloom_enabled,
            bloom_nhash: self.config.bloom_nhash,
            root_block,
            height: height as u16,
            zone_offset,
        };
        let page = meta.encode()?;

        let loc = self.config.to_index_location();
        let mut fd = util::open_index_file(&loc, true)?;
        util::write_at(&mut fd, 0, page.as_bytes())?;

        // the host must never route emitted tuples through a heap fetch.
        self.config.hooks.mark_all_visible(&self.config.name);

        Ok(self.stats.clone())
    }
}

enum PlanFmt {
    Plain,
    KeyRle,
    IncludeRle,
}

struct LeafPlan {
    consumed: usize,
    payload: Vec<u8>,
    fmt: PlanFmt,
}

struct LeafInfo {
    block: u32,
    first_key: Vec<u8>,
    high_key: Vec<u8>,
}

// Growable byte arena holding collected rows back to back. Growth is
// geometric; the first growth allocates fresh storage rather than
// reallocating a zero-capacity buffer.
struct Arena {
    data: Vec<u8>,
    row_len: usize,
    n_rows: usize,
}

impl Arena {
    const INITIAL: usize = 64 * 1024;

    fn new(row_len: usize) -> Arena {
        Arena {
            data: Vec::new(),
            row_len,
            n_rows: 0,
        }
    }

    fn push_row(&mut self, row: &[u8]) {
        if self.data.capacity() < self.data.len() + row.len() {
            let ncap = cmp::max(self.data.capacity() * 2, Self::INITIAL);
            let ncap = cmp::max(ncap, self.data.len() + row.len());
            let mut ndata = Vec::with_capacity(ncap);
            ndata.extend_from_slice(&self.data);
            self.data = ndata;
        }
        self.data.extend_from_slice(row);
        self.n_rows += 1;
    }
}

// Sorted access into the arena through the order permutation. The
// leading key sits at the front of every row image.
struct SortedRows<'a> {
    arena: &'a Arena,
    order: &'a [u32],
    key1_len: usize,
}

impl<'a> SortedRows<'a> {
    fn len(&self) -> usize {
        self.order.len()
    }

    fn row(&self, i: usize) -> &'a [u8] {
        let id = self.order[i] as usize;
        &self.arena.data[id * self.arena.row_len..(id + 1) * self.arena.row_len]
    }

    fn key1(&self, i: usize) -> &'a [u8] {
        &self.row(i)[..self.key1_len]
    }
}

// Chains sibling pages within one level: a page is held back until its
// successor's block id is known, then flushed with both links set.
struct ChainWriter {
    iflush: Rc<RefCell<Flusher>>,
    next_block: u32,
    pending: Option<(u32, Page)>,
}

impl ChainWriter {
    fn new(iflush: Rc<RefCell<Flusher>>, next_block: u32) -> ChainWriter {
        ChainWriter {
            iflush,
            next_block,
            pending: None,
        }
    }

    fn append(&mut self, mut page: Page) -> Result<u32> {
        let block = self.next_block;
        self.next_block += 1;
        if let Some((pblock, mut prev)) = self.pending.take() {
            prev.set_rightlink(block);
            page.set_leftlink(pblock);
            self.iflush.borrow_mut().flush(prev.to_vec())?;
        }
        self.pending = Some((block, page));
        Ok(block)
    }

    fn finish(&mut self) -> Result<()> {
        if let Some((_, prev)) = self.pending.take() {
            self.iflush.borrow_mut().flush(prev.to_vec())?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "build_test.rs"]
mod build_test;
