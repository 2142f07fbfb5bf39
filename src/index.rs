//! Module `index` implement the read side: opening a built index,
//! its planner-facing surface and full-structure validation.

use fs2::FileExt;

use std::{convert::TryFrom, ffi, fs, sync::Arc};

use crate::{
    bloom::SubtreeFilter,
    compare::KeyCmp,
    config::{index_name_of, to_index_location, Stats},
    leaf::{LeafLayout, LeafView, RunCache},
    meta::{decode_meta_region, ZoneSpan},
    node::NodeView,
    page::{Meta, Page, INVALID_BLOCK, PAGE_SIZE},
    scan::{Scan, ScanOpts},
    types::{CmpProc, Collation, IndexDescr, InclAttr, KeyAttr, Row},
    util, Error, Result,
};

/// Strategy numbers for the five order relations, as exported to the
/// host planner.
pub const STRATEGY_LT: u16 = 1;
pub const STRATEGY_LE: u16 = 2;
pub const STRATEGY_EQ: u16 = 3;
pub const STRATEGY_GE: u16 = 4;
pub const STRATEGY_GT: u16 = 5;

/// Support proc number of the attribute comparator.
pub const CMP_SUPPORT_PROC: u16 = 1;

/// Capability flags the host planner reads.
#[derive(Clone, Copy, Debug)]
pub struct Capabilities {
    pub ordered: bool,
    pub backward: bool,
    pub parallel: bool,
    /// Scans must be index-only; there is nothing to re-fetch from.
    pub index_only_required: bool,
    pub bitmap_scan: bool,
    pub can_insert: bool,
    pub include_with_two_columns: bool,
    pub nulls: bool,
    pub n_strategies: u16,
    pub cmp_support_proc: u16,
}

/// Simple cost estimate for the host planner.
#[derive(Clone, Copy, Debug)]
pub struct CostEstimate {
    pub height: usize,
    pub n_pages: u64,
    pub leaf_pages: u64,
    /// Selectivity-scaled page estimate: the descent plus the fraction
    /// of the leaf level the predicate is expected to touch.
    pub pages_fetched: u64,
}

/// Index type, immutable, fully packed, lockless reads.
pub struct Index {
    dir: ffi::OsString,
    name: String,

    pub(crate) fd: fs::File,
    pub(crate) meta: Meta,
    pub(crate) stats: Stats,
    pub(crate) descr: IndexDescr,
    pub(crate) zones: Arc<Vec<ZoneSpan>>,
    pub(crate) blooms: Arc<Vec<SubtreeFilter>>,
}

impl Drop for Index {
    fn drop(&mut self) {
        self.fd.unlock().ok();
    }
}

impl Index {
    /// Open an existing index for read-only access.
    pub fn open(dir: &ffi::OsStr, name: &str) -> Result<Index> {
        Index::open_with(dir, name, None)
    }

    /// Open an existing index, re-plugging the comparator proc for
    /// locale-collated text. Indexes built over locale text cannot be
    /// opened without their proc.
    pub fn open_with(dir: &ffi::OsStr, name: &str, proc: Option<CmpProc>) -> Result<Index> {
        let file = match find_index_file(dir, name) {
            Some(file) => file,
            None => err_at!(InvalidInput, msg: "no index file {:?}/{}", dir, name)?,
        };

        let mut fd = util::open_index_file(&file, false)?;
        err_at!(IOError, fd.lock_shared())?;

        let meta = {
            let page = Page::read(&mut fd, 0)?;
            Meta::decode(&page)?
        };
        let (stats, zones, blooms) = decode_meta_region(&mut fd, meta.zone_offset)?;

        let descr = descr_from_stats(&stats, proc)?;
        let layout = LeafLayout::new(&descr);
        if layout.key1_len != meta.key_len[0] as usize
            || layout.key2_len != meta.key_len[1] as usize
            || layout.nkeyatts != meta.nkeyatts as usize
        {
            err_at!(
                InvalidFile,
                msg: "metapage widths disagree with stats for {:?}", file
            )?
        }

        let val = Index {
            dir: dir.to_os_string(),
            name: name.to_string(),
            fd,
            meta,
            stats,
            descr,
            zones: Arc::new(zones),
            blooms: Arc::new(blooms),
        };
        Ok(val)
    }

    /// Clone this index instance for another reader. Metadata is shared,
    /// the file descriptor is not.
    pub fn try_clone(&self) -> Result<Index> {
        let file = match find_index_file(&self.dir, &self.name) {
            Some(file) => file,
            None => err_at!(InvalidFile, msg: "bad file {:?}/{}", self.dir, self.name)?,
        };
        let fd = util::open_index_file(&file, false)?;
        err_at!(IOError, fd.lock_shared())?;

        Ok(Index {
            dir: self.dir.clone(),
            name: self.name.clone(),
            fd,
            meta: self.meta.clone(),
            stats: self.stats.clone(),
            descr: self.descr.clone(),
            zones: Arc::clone(&self.zones),
            blooms: Arc::clone(&self.blooms),
        })
    }

    /// Close this index, releasing OS resources. To purge, call `purge()`.
    pub fn close(self) -> Result<()> {
        Ok(())
    }

    /// Purge this index from disk.
    pub fn purge(self) -> Result<()> {
        let loc = to_index_location(&self.dir, &self.name);
        std::mem::drop(self);

        let fd = util::open_index_file(&loc, false)?;
        match fd.try_lock_exclusive() {
            Ok(_) => {
                err_at!(IOError, fs::remove_file(&loc), "remove file {:?}", loc)?;
                err_at!(IOError, fd.unlock(), "fail unlock {:?}", loc)
            }
            Err(_) => err_at!(InvalidFile, msg: "file {:?} locked by a reader", loc),
        }
    }

    pub fn to_name(&self) -> String {
        self.name.clone()
    }

    pub fn to_stats(&self) -> Stats {
        self.stats.clone()
    }

    pub fn len(&self) -> usize {
        usize::try_from(self.stats.n_count).unwrap_or(usize::MAX)
    }

    pub fn is_empty(&self) -> bool {
        self.stats.n_count == 0
    }

    /// Number of internal levels; 0 means the root is the only leaf.
    pub fn height(&self) -> usize {
        self.stats.height
    }

    /// Total pages in the index file.
    pub fn n_pages(&self) -> Result<u64> {
        let md = err_at!(IOError, self.fd.metadata())?;
        Ok(md.len() / (PAGE_SIZE as u64))
    }

    /// Capability flags exported to the host planner.
    pub fn capabilities() -> Capabilities {
        Capabilities {
            ordered: true,
            backward: true,
            parallel: true,
            index_only_required: true,
            bitmap_scan: false,
            can_insert: false,
            include_with_two_columns: false,
            nulls: false,
            n_strategies: STRATEGY_GT,
            cmp_support_proc: CMP_SUPPORT_PROC,
        }
    }

    /// Attribute numbers a scan can hand back without a heap visit;
    /// for this engine that is every key and INCLUDE attribute.
    pub fn returnable_attrs(&self) -> Vec<u16> {
        (1..=self.descr.nattrs() as u16).collect()
    }

    /// Selectivity-scaled cost estimate.
    pub fn cost_estimate(&self, selectivity: f64) -> Result<CostEstimate> {
        let leaf_pages = self.stats.n_leaves;
        let sel = selectivity.max(0.0).min(1.0);
        let scanned = (leaf_pages as f64 * sel).ceil() as u64;
        Ok(CostEstimate {
            height: self.stats.height,
            n_pages: self.n_pages()?,
            leaf_pages,
            pages_fetched: self.stats.height as u64 + scanned,
        })
    }

    /// The engine is a read-only prototype; inserts are rejected.
    pub fn insert(&mut self, _row: Row) -> Result<()> {
        err_at!(
            ReadOnly,
            msg: "ordix index {:?} is read-only, insert is not supported", self.name
        )
    }

    /// Begin a scan over this index.
    pub fn begin_scan(&self, opts: ScanOpts) -> Result<Scan> {
        Scan::new(self, opts)
    }

    /// Audit the whole structure: leaf-chain closure and ordering, run
    /// totals, high-key bounds and the stats counters.
    pub fn validate(&mut self) -> Result<Stats> {
        let layout = LeafLayout::from_meta(&self.meta);
        let cmp1 = KeyCmp::new(&self.descr.keys[0]);

        let mut n_count = 0_u64;
        let mut n_leaves = 0_u64;
        let mut prev_block = INVALID_BLOCK;
        let mut prev_high: Option<Vec<u8>> = None;

        let mut block = match self.stats.first_leaf {
            0 => INVALID_BLOCK,
            b => err_at!(FailConvert, u32::try_from(b))?,
        };
        while block != INVALID_BLOCK {
            let page = Page::read(&mut self.fd, block)?;
            if !page.is_leaf() {
                err_at!(CorruptPage, msg: "block {} in leaf chain at level {}", block, page.level())?
            }
            if page.leftlink() != prev_block {
                err_at!(
                    CorruptPage,
                    msg: "block {} leftlink {} expected {}", block, page.leftlink(), prev_block
                )?
            }
            let payload = page.payload()?;
            let view = LeafView::parse(payload, layout)?;
            if LeafView::count(payload)? != view.nitems {
                err_at!(CorruptPage, msg: "block {} count disagrees with its tag", block)?
            }
            view.check_structure()?;

            let mut cache = RunCache::None;
            for off in 1..=u32::from(view.nitems) {
                let key = view.locate_key(off, &mut cache)?;
                match view.run_bounds(off, &mut cache)? {
                    Some((start, end)) if off < start || off > end => err_at!(
                        CorruptPage,
                        msg: "block {} offset {} outside its run [{}, {}]", block, off, start, end
                    )?,
                    _ => (),
                }
                if let Some(prev) = prev_high.as_deref() {
                    if cmp1.compare(prev, key)? == std::cmp::Ordering::Greater {
                        err_at!(
                            CorruptPage,
                            msg: "block {} offset {} breaks key order", block, off
                        )?
                    }
                }
                prev_high = Some(key.to_vec());
            }

            n_count += u64::from(view.nitems);
            n_leaves += 1;
            prev_block = block;
            block = page.rightlink();
        }

        if n_count != self.stats.n_count {
            err_at!(Fatal, msg: "validate, n_count {} != {}", n_count, self.stats.n_count)?
        }
        if n_leaves != self.stats.n_leaves {
            err_at!(Fatal, msg: "validate, n_leaves {} != {}", n_leaves, self.stats.n_leaves)?
        }

        if self.meta.root_block != INVALID_BLOCK && self.meta.height > 0 {
            let root = self.meta.root_block;
            let height = self.meta.height;
            self.check_node(root, height, &cmp1, &layout)?;
        }

        Ok(self.to_stats())
    }

    // TODO: take traversal arguments, tree dumps get big fast.
    pub fn print(&mut self) -> Result<()> {
        println!("name              : {}", self.to_name());
        println!("root block at     : {}", self.meta.root_block);
        println!("height            : {}", self.meta.height);
        println!("zone region at    : {}", self.meta.zone_offset);
        let stats = self.to_stats();
        println!("stats         :");
        println!("  n_count      : {}", stats.n_count);
        println!("  n_leaves     : {}", stats.n_leaves);
        println!("  n_internals  : {}", stats.n_internals);
        println!("  plain/rle/inc: {}/{}/{}",
            stats.n_plain_leaves, stats.n_rle_leaves, stats.n_include_rle_leaves);
        println!("  bloom        : {} nhash {}", stats.bloom_enabled, stats.bloom_nhash);
        println!("  build_time   : {}", stats.build_time);
        println!("  epoch        : {}", stats.epoch);
        println!();

        let layout = LeafLayout::from_meta(&self.meta);
        let mut block = match self.stats.first_leaf {
            0 => INVALID_BLOCK,
            b => err_at!(FailConvert, u32::try_from(b))?,
        };
        while block != INVALID_BLOCK {
            let page = Page::read(&mut self.fd, block)?;
            let view = LeafView::parse(page.payload()?, layout)?;
            println!(
                "leaf {:6} items {:5} runs {:5} right {}",
                block, view.nitems, view.nruns, page.rightlink()
            );
            block = page.rightlink();
        }
        Ok(())
    }

    // Recursively verify one internal node: entry high-keys are
    // non-decreasing and every child's largest key stays within its
    // entry's high-key.
    fn check_node(
        &mut self,
        block: u32,
        level: u16,
        cmp1: &KeyCmp,
        layout: &LeafLayout,
    ) -> Result<Vec<u8>> {
        let page = Page::read(&mut self.fd, block)?;
        if u16::from(page.level()) != level {
            err_at!(
                CorruptPage,
                msg: "block {} at level {}, expected {}", block, page.level(), level
            )?
        }
        let payload = page.payload()?;
        let node = NodeView::parse(payload, layout.key1_len)?;

        let mut prev: Option<Vec<u8>> = None;
        let mut last_high = vec![];
        for i in 0..node.nentries {
            let (child, high_key) = node.entry(i);
            if let Some(prev) = prev.as_deref() {
                if cmp1.compare(prev, high_key)? == std::cmp::Ordering::Greater {
                    err_at!(
                        CorruptPage,
                        msg: "block {} entry {} breaks high-key order", block, i
                    )?
                }
            }
            let child_max = if level == 1 {
                self.leaf_max_key(child, layout)?
            } else {
                self.check_node(child, level - 1, cmp1, layout)?
            };
            if cmp1.compare(&child_max, high_key)? == std::cmp::Ordering::Greater {
                err_at!(
                    CorruptPage,
                    msg: "block {} child {} exceeds its high-key", block, child
                )?
            }
            prev = Some(high_key.to_vec());
            last_high = high_key.to_vec();
        }
        Ok(last_high)
    }

    fn leaf_max_key(&mut self, block: u32, layout: &LeafLayout) -> Result<Vec<u8>> {
        let page = Page::read(&mut self.fd, block)?;
        if !page.is_leaf() {
            err_at!(CorruptPage, msg: "block {} expected leaf, level {}", block, page.level())?
        }
        let view = LeafView::parse(page.payload()?, *layout)?;
        let mut cache = RunCache::None;
        let key = view.locate_key(u32::from(view.nitems), &mut cache)?;
        Ok(key.to_vec())
    }
}

fn descr_from_stats(stats: &Stats, proc: Option<CmpProc>) -> Result<IndexDescr> {
    let mut keys = vec![];
    for (i, ty) in stats.key_types.iter().enumerate() {
        let collation = stats
            .collations
            .get(i)
            .cloned()
            .unwrap_or(Collation::C);
        let proc = match &collation {
            Collation::Locale(name) => match &proc {
                Some(proc) => Some(Arc::clone(proc)),
                None => err_at!(
                    InvalidInput,
                    msg: "index needs a comparator proc for locale {:?}", name
                )?,
            },
            Collation::C => None,
        };
        keys.push(KeyAttr {
            ty: ty.clone(),
            collation,
            proc,
        });
    }
    let includes = stats
        .include_types
        .iter()
        .map(|ty| InclAttr { ty: ty.clone() })
        .collect();
    Ok(IndexDescr { keys, includes })
}

fn find_index_file(dir: &ffi::OsStr, name: &str) -> Option<ffi::OsString> {
    for entry in fs::read_dir(dir).ok()?.filter_map(|entry| entry.ok()) {
        match index_name_of(&entry.file_name()) {
            Some(nm) if nm == name => return Some(entry.path().into_os_string()),
            _ => (),
        }
    }
    None
}

#[cfg(test)]
#[path = "index_test.rs"]
mod index_test;
