//! Module `scan` implement the scan engine.
//!
//! A scan seeks its first leaf by bound-driven descent (with zone-map
//! and bloom pruning), then walks sibling links in the requested
//! direction, emitting one materialized index tuple per `gettuple`
//! call. Plain leaves skip run detection entirely; RLE leaves reuse the
//! active-run cache. Parallel workers claim whole leaves through a
//! single CAS word.

use log::{debug, info};

use std::{cmp, cmp::Ordering, fs, sync::Arc};

use crate::{
    bloom::SubtreeFilter,
    compare::{BoundVal, KeyCmp},
    config::{tunables, HostHooks, NoHost, Tunables},
    index::Index,
    leaf::{LeafFormat, LeafLayout, LeafView, RunCache},
    meta::ZoneSpan,
    node::NodeView,
    page::{Page, INVALID_BLOCK},
    parallel::ParallelScanState,
    tuple::{IndexTuple, TupleShape, SYNTHETIC_TID},
    types::{Datum, IndexDescr},
    Error, Result,
};

/// Scan direction, as requested per `gettuple` call. The first call
/// after `rescan` establishes the direction for the whole cycle.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScanDir {
    Forward,
    Backward,
}

/// The five order relations the index answers natively on attribute 1,
/// numbered 1..=5 for the host planner.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StrategyOp {
    Lt,
    Le,
    Eq,
    Ge,
    Gt,
}

impl StrategyOp {
    pub fn strategy_number(&self) -> u16 {
        match self {
            StrategyOp::Lt => 1,
            StrategyOp::Le => 2,
            StrategyOp::Eq => 3,
            StrategyOp::Ge => 4,
            StrategyOp::Gt => 5,
        }
    }
}

/// One scan predicate. `value` of None encodes an IS NULL probe, which
/// the engine rejects: the index holds no nulls.
#[derive(Clone, Debug)]
pub struct ScanKey {
    pub attno: u16,
    pub op: StrategyOp,
    pub value: Option<Datum>,
}

impl ScanKey {
    pub fn new(attno: u16, op: StrategyOp, value: Datum) -> ScanKey {
        ScanKey {
            attno,
            op,
            value: Some(value),
        }
    }

    pub fn is_null(attno: u16) -> ScanKey {
        ScanKey {
            attno,
            op: StrategyOp::Eq,
            value: None,
        }
    }
}

/// Options for `begin_scan`.
#[derive(Clone)]
pub struct ScanOpts {
    /// The caller wants materialized index tuples. This engine cannot
    /// serve anything else; scans with `false` fail at `gettuple`.
    pub want_itup: bool,
    pub hooks: Arc<dyn HostHooks>,
    pub parallel: Option<Arc<ParallelScanState>>,
    /// Scoped tunables for this scan; None snapshots the globals.
    pub tunables: Option<Tunables>,
}

impl Default for ScanOpts {
    fn default() -> ScanOpts {
        ScanOpts {
            want_itup: true,
            hooks: Arc::new(NoHost),
            parallel: None,
            tunables: None,
        }
    }
}

impl ScanOpts {
    pub fn set_want_itup(mut self, want: bool) -> ScanOpts {
        self.want_itup = want;
        self
    }

    pub fn set_hooks(mut self, hooks: Arc<dyn HostHooks>) -> ScanOpts {
        self.hooks = hooks;
        self
    }

    pub fn set_parallel(mut self, state: Arc<ParallelScanState>) -> ScanOpts {
        self.parallel = Some(state);
        self
    }

    pub fn set_tunables(mut self, tun: Tunables) -> ScanOpts {
        self.tunables = Some(tun);
        self
    }
}

// one side of the attribute-1 bound.
#[derive(Clone, Debug)]
struct AttrBound {
    val: BoundVal,
    strict: bool,
}

// the leaf the scan keeps pinned between gettuple calls.
struct Pinned {
    block: u32,
    page: Page,
    fmt: LeafFormat,
    nitems: u16,
}

// batch of pre-materialized tuples popped without touching the leaf.
#[derive(Default)]
struct Slab {
    data: Vec<u8>,
    tlen: usize,
    n: usize,
    pos: usize,
    ends_scan: bool,
}

impl Slab {
    fn reset(&mut self) {
        self.n = 0;
        self.pos = 0;
        self.ends_scan = false;
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct ScanProfile {
    pages_read: u64,
    leaves_scanned: u64,
    tuples_emitted: u64,
    runs_decoded: u64,
    zone_skips: u64,
    bloom_skips: u64,
}

/// Scan state. Exclusively owns its output tuple, its pinned leaf and
/// its run cache; in a parallel scan the only shared datum is the claim
/// word inside [ParallelScanState].
pub struct Scan {
    fd: fs::File,
    name: String,
    root_block: u32,
    height: u16,
    layout: LeafLayout,
    descr: IndexDescr,
    shape: TupleShape,
    cmp1: KeyCmp,
    cmp2: Option<KeyCmp>,
    zones: Arc<Vec<ZoneSpan>>,
    blooms: Arc<Vec<SubtreeFilter>>,
    bloom_enabled: bool,
    tun: Tunables,
    opts: ScanOpts,

    // parsed scan keys
    lower: Option<AttrBound>,
    upper: Option<AttrBound>,
    eq: Option<BoundVal>,
    k2_eq: Option<BoundVal>,
    rechecks: Vec<(StrategyOp, BoundVal)>,
    need_recheck: bool,

    // cursor
    primed: bool,
    positioned: bool,
    done: bool,
    dir: Option<ScanDir>,
    cur: Option<Pinned>,
    offset: u32,
    group_idx: u64,
    run: RunCache,
    k1_verdict: Option<(Vec<u8>, bool, bool)>, // (k1, lower_ok, beyond_upper)

    out: IndexTuple,
    slab: Slab,
    prefetched: Vec<(u32, Page)>,
    pages_scanned: u64,
    prof: ScanProfile,
}

impl Drop for Scan {
    fn drop(&mut self) {
        self.release_pin();
    }
}

impl Scan {
    pub(crate) fn new(index: &Index, opts: ScanOpts) -> Result<Scan> {
        let fd = err_at!(IOError, index.fd.try_clone())?;
        let layout = LeafLayout::from_meta(&index.meta);
        let shape = TupleShape::new(&index.descr);
        let tun = opts.tunables.clone().unwrap_or_else(tunables);

        let root_block = index.meta.root_block;
        let bloom_enabled = index.meta.bloom_enabled && tun.bloom_filters_enabled;

        Ok(Scan {
            fd,
            name: index.to_name(),
            root_block,
            height: index.meta.height,
            layout,
            descr: index.descr.clone(),
            shape: shape.clone(),
            cmp1: KeyCmp::new(&index.descr.keys[0]),
            cmp2: index.descr.keys.get(1).map(KeyCmp::new),
            zones: Arc::clone(&index.zones),
            blooms: Arc::clone(&index.blooms),
            bloom_enabled,
            tun,
            opts,

            lower: None,
            upper: None,
            eq: None,
            k2_eq: None,
            rechecks: vec![],
            need_recheck: false,

            primed: false,
            positioned: false,
            done: false,
            dir: None,
            cur: None,
            offset: 0,
            group_idx: 0,
            run: RunCache::None,
            k1_verdict: None,

            out: IndexTuple::new(&shape),
            slab: Slab::default(),
            prefetched: vec![],
            pages_scanned: 0,
            prof: ScanProfile::default(),
        })
    }

    /// Install a fresh set of scan keys and reset the cursor. Legal to
    /// call repeatedly without an intervening `end_scan`; a parallel
    /// scan additionally needs `ParallelScanState::parallel_rescan`
    /// between iterations.
    pub fn rescan(&mut self, keys: &[ScanKey]) -> Result<()> {
        self.release_pin();
        self.lower = None;
        self.upper = None;
        self.eq = None;
        self.k2_eq = None;
        self.rechecks.clear();
        self.slab.reset();
        self.positioned = false;
        self.done = false;
        self.dir = None;
        self.offset = 0;
        self.group_idx = 0;
        self.run.clear();
        self.k1_verdict = None;
        self.pages_scanned = 0;
        self.prefetched.clear();

        for key in keys {
            let datum = match &key.value {
                Some(datum) => datum,
                None => err_at!(
                    NullKey,
                    msg: "IS NULL predicate on attribute {}: the index holds no nulls", key.attno
                )?,
            };
            match key.attno {
                1 => {
                    let bound = BoundVal::new(&self.descr.keys[0].ty, datum)?;
                    match key.op {
                        StrategyOp::Ge => self.tighten_lower(bound, false)?,
                        StrategyOp::Gt => self.tighten_lower(bound, true)?,
                        StrategyOp::Le => self.tighten_upper(bound, false)?,
                        StrategyOp::Lt => self.tighten_upper(bound, true)?,
                        StrategyOp::Eq => {
                            self.tighten_lower(bound.clone(), false)?;
                            self.tighten_upper(bound.clone(), false)?;
                            self.eq = Some(bound);
                        }
                    }
                }
                2 if self.layout.nkeyatts == 2 => {
                    let bound = BoundVal::new(&self.descr.keys[1].ty, datum)?;
                    match key.op {
                        StrategyOp::Eq => self.k2_eq = Some(bound),
                        op => self.rechecks.push((op, bound)),
                    }
                }
                attno => err_at!(
                    InvalidInput,
                    msg: "scan key on attribute {} of a {}-key index", attno, self.layout.nkeyatts
                )?,
            }
        }
        self.need_recheck = !self.rechecks.is_empty();
        self.primed = true;
        Ok(())
    }

    fn tighten_lower(&mut self, val: BoundVal, strict: bool) -> Result<()> {
        let replace = match &self.lower {
            None => true,
            Some(cur) => match self.cmp1.compare(&val.bytes, &cur.val.bytes)? {
                Ordering::Greater => true,
                Ordering::Equal => strict && !cur.strict,
                Ordering::Less => false,
            },
        };
        if replace {
            self.lower = Some(AttrBound { val, strict });
        }
        Ok(())
    }

    fn tighten_upper(&mut self, val: BoundVal, strict: bool) -> Result<()> {
        let replace = match &self.upper {
            None => true,
            Some(cur) => match self.cmp1.compare(&val.bytes, &cur.val.bytes)? {
                Ordering::Less => true,
                Ordering::Equal => strict && !cur.strict,
                Ordering::Greater => false,
            },
        };
        if replace {
            self.upper = Some(AttrBound { val, strict });
        }
        Ok(())
    }

    /// Produce the next tuple in `dir`, or None when the scan is done.
    pub fn gettuple(&mut self, dir: ScanDir) -> Result<Option<&IndexTuple>> {
        if !self.primed {
            err_at!(Internal, msg: "gettuple before rescan on index {:?}", self.name)?
        }
        if !self.opts.want_itup {
            err_at!(
                NonIndexOnly,
                msg: "ordix is index-only; caller did not request index tuples"
            )?
        }
        if self.done {
            return Ok(None);
        }
        match self.dir {
            None => self.dir = Some(dir),
            Some(d) if d != dir => {
                err_at!(Internal, msg: "scan direction changed mid-cycle on {:?}", self.name)?
            }
            Some(_) => (),
        }
        if !self.positioned {
            self.first_position(dir)?;
            self.positioned = true;
            if self.done {
                return Ok(None);
            }
        }

        loop {
            // drain the tuple buffer first.
            if self.slab.n > 0 {
                if self.slab.pos < self.slab.n {
                    let src = &self.slab.data[self.slab.pos * self.slab.tlen..];
                    self.out.data.copy_from_slice(&src[..self.slab.tlen]);
                    self.out.tid = SYNTHETIC_TID;
                    self.slab.pos += 1;
                    self.prof.tuples_emitted += 1;
                    return Ok(Some(&self.out));
                }
                let ends = self.slab.ends_scan;
                self.slab.reset();
                if ends {
                    self.done = true;
                    return Ok(None);
                }
            }

            let (nitems, fmt) = match &self.cur {
                Some(pinned) => (u32::from(pinned.nitems), pinned.fmt),
                None => {
                    self.done = true;
                    return Ok(None);
                }
            };
            let exhausted = match dir {
                ScanDir::Forward => self.offset > nitems,
                ScanDir::Backward => self.offset < 1,
            };
            if exhausted {
                if !self.advance_leaf(dir)? {
                    self.done = true;
                    return Ok(None);
                }
                continue;
            }

            if self.layout.nkeyatts == 2 {
                match self.step_two_column(dir)? {
                    Step::Emit => {
                        self.prof.tuples_emitted += 1;
                        return Ok(Some(&self.out));
                    }
                    Step::Skip => continue,
                    Step::End => {
                        self.done = true;
                        return Ok(None);
                    }
                }
            }

            // single column. batch-materialize plain fixed-width leaves.
            if fmt.is_plain()
                && dir == ScanDir::Forward
                && self.tun.use_tuple_buffering
                && self.tun.tuple_buffer_size > 1
                && !self.descr.keys[0].ty.is_varwidth()
            {
                self.fill_slab()?;
                if self.slab.n == 0 {
                    let ends = self.slab.ends_scan;
                    self.slab.reset();
                    if ends {
                        self.done = true;
                        return Ok(None);
                    }
                }
                continue;
            }

            match self.step_single_column(dir)? {
                Step::Emit => {
                    self.prof.tuples_emitted += 1;
                    return Ok(Some(&self.out));
                }
                Step::Skip => continue,
                Step::End => {
                    self.done = true;
                    return Ok(None);
                }
            }
        }
    }

    /// Finish the scan, releasing the pin and, with the `profile`
    /// tunable set, logging the per-scan counters.
    pub fn end_scan(mut self) -> Result<()> {
        self.release_pin();
        if self.tun.profile {
            info!(
                target: "ordix",
                "scan {:?} profile: {} pages, {} leaves, {} tuples, {} runs, {} groups, {} zone skips, {} bloom skips",
                self.name,
                self.prof.pages_read,
                self.prof.leaves_scanned,
                self.prof.tuples_emitted,
                self.prof.runs_decoded,
                self.group_idx,
                self.prof.zone_skips,
                self.prof.bloom_skips
            );
        }
        Ok(())
    }

    fn release_pin(&mut self) {
        self.cur = None;
        self.run.clear();
        self.k1_verdict = None;
    }

    // one emit step over a single-column leaf.
    fn step_single_column(&mut self, dir: ScanDir) -> Result<Step> {
        let pinned = match &self.cur {
            Some(pinned) => pinned,
            None => return Ok(Step::End),
        };
        let view = LeafView::parse(pinned.page.payload()?, self.layout)?;

        let prev_run = matches!(self.run, RunCache::RleRun { .. });
        let key = view.locate_key(self.offset, &mut self.run)?;
        if !prev_run && matches!(self.run, RunCache::RleRun { .. }) {
            self.prof.runs_decoded += 1;
        }

        // bound checks flip with direction.
        match dir {
            ScanDir::Forward => {
                if let Some(eq) = &self.eq {
                    if self.cmp1.cmp_key_to_upper_bound(key, eq)? != Ordering::Equal {
                        return Ok(Step::End);
                    }
                } else if beyond_upper(&self.cmp1, key, self.upper.as_ref())? {
                    return Ok(Step::End);
                }
            }
            ScanDir::Backward => {
                if let Some(eq) = &self.eq {
                    if self.cmp1.cmp_key_to_lower_bound(key, eq)? != Ordering::Equal {
                        return Ok(Step::End);
                    }
                } else if below_lower(&self.cmp1, key, self.lower.as_ref())? {
                    return Ok(Step::End);
                }
            }
        }

        // materialize the key, then the INCLUDE columns from either the
        // plain column bases or the cached run entry.
        if self.descr.keys[0].ty.is_varwidth() {
            self.out.store_text(&self.shape, 0, key);
        } else {
            self.out.store_fixed(&self.shape, 0, key);
        }
        match view.fmt {
            LeafFormat::IncludeRle => {
                let run = match self.run {
                    RunCache::RleRun { run, .. } => run,
                    _ => err_at!(Fatal, msg: "run cache lost on include-rle leaf")?,
                };
                for col in 0..self.layout.ninclude {
                    let src = view.run_include(run, col);
                    self.out.store_fixed(&self.shape, 1 + col, src);
                }
            }
            LeafFormat::Plain => {
                for col in 0..self.layout.ninclude {
                    let src = view.plain_include(self.offset, col);
                    self.out.store_fixed(&self.shape, 1 + col, src);
                }
            }
            // key-RLE leaves are only written for include-less indexes.
            LeafFormat::KeyRle { .. } => (),
        }
        self.out.tid = SYNTHETIC_TID;

        match dir {
            ScanDir::Forward => self.offset += 1,
            ScanDir::Backward => self.offset -= 1,
        }
        Ok(Step::Emit)
    }

    // one emit step over a two-column leaf, row-major.
    fn step_two_column(&mut self, dir: ScanDir) -> Result<Step> {
        let pinned = match &self.cur {
            Some(pinned) => pinned,
            None => return Ok(Step::End),
        };
        let view = LeafView::parse(pinned.page.payload()?, self.layout)?;
        let row = view.row(self.offset);
        let k1 = &row[..self.layout.key1_len];
        let k2 = &row[self.layout.key1_len..self.layout.key1_len + self.layout.key2_len];

        // leading-key verdicts are constant within a k1 group; recompute
        // only when the group changes.
        let (lower_ok, beyond) = match &self.k1_verdict {
            Some((cached, lower_ok, beyond)) if cached.as_slice() == k1 => (*lower_ok, *beyond),
            _ => {
                let lower_ok = !below_lower(&self.cmp1, k1, self.lower.as_ref())?;
                let beyond = beyond_upper(&self.cmp1, k1, self.upper.as_ref())?;
                self.group_idx += 1;
                self.k1_verdict = Some((k1.to_vec(), lower_ok, beyond));
                (lower_ok, beyond)
            }
        };

        match dir {
            ScanDir::Forward => {
                if beyond {
                    return Ok(Step::End);
                }
                if !lower_ok {
                    // the in-leaf positioning landed short; walk up to the bound.
                    self.offset += 1;
                    return Ok(Step::Skip);
                }
            }
            ScanDir::Backward => {
                if !lower_ok {
                    return Ok(Step::End);
                }
                if beyond {
                    self.offset -= 1;
                    return Ok(Step::Skip);
                }
            }
        }

        let cmp2 = match &self.cmp2 {
            Some(cmp2) => cmp2,
            None => err_at!(Fatal, msg: "two-column leaf without a second comparator")?,
        };
        if let Some(k2eq) = &self.k2_eq {
            if cmp2.compare(k2, &k2eq.bytes)? != Ordering::Equal {
                match dir {
                    ScanDir::Forward => self.offset += 1,
                    ScanDir::Backward => self.offset -= 1,
                }
                return Ok(Step::Skip);
            }
        }
        if self.need_recheck {
            for (op, bound) in self.rechecks.iter() {
                let ord = cmp2.compare(k2, &bound.bytes)?;
                let pass = match op {
                    StrategyOp::Lt => ord == Ordering::Less,
                    StrategyOp::Le => ord != Ordering::Greater,
                    StrategyOp::Eq => ord == Ordering::Equal,
                    StrategyOp::Ge => ord != Ordering::Less,
                    StrategyOp::Gt => ord == Ordering::Greater,
                };
                if !pass {
                    match dir {
                        ScanDir::Forward => self.offset += 1,
                        ScanDir::Backward => self.offset -= 1,
                    }
                    return Ok(Step::Skip);
                }
            }
        }

        self.out.store_fixed(&self.shape, 0, k1);
        self.out.store_fixed(&self.shape, 1, k2);
        let inc_base = self.layout.key1_len + self.layout.key2_len;
        let mut skip = inc_base;
        for col in 0..self.layout.ninclude {
            let len = self.layout.inc_len[col];
            self.out
                .store_fixed(&self.shape, 2 + col, &row[skip..skip + len]);
            skip += len;
        }
        self.out.tid = SYNTHETIC_TID;

        match dir {
            ScanDir::Forward => self.offset += 1,
            ScanDir::Backward => self.offset -= 1,
        }
        Ok(Step::Emit)
    }

    // batch-materialize qualifying rows from the pinned plain leaf into
    // the slab; bound checks happen while filling.
    fn fill_slab(&mut self) -> Result<()> {
        let pinned = match &self.cur {
            Some(pinned) => pinned,
            None => return Ok(()),
        };
        let view = LeafView::parse(pinned.page.payload()?, self.layout)?;
        let nitems = u32::from(view.nitems);
        let batch = self.tun.tuple_buffer_size;

        self.slab.tlen = self.shape.len;
        if self.slab.data.len() < batch * self.slab.tlen {
            self.slab.data.resize(batch * self.slab.tlen, 0);
        }
        self.slab.n = 0;
        self.slab.pos = 0;
        self.slab.ends_scan = false;

        let mut cache = RunCache::None;
        while self.slab.n < batch && self.offset <= nitems {
            let key = view.locate_key(self.offset, &mut cache)?;
            let qualifies = match &self.eq {
                Some(eq) => self.cmp1.cmp_key_to_upper_bound(key, eq)? == Ordering::Equal,
                None => !beyond_upper(&self.cmp1, key, self.upper.as_ref())?,
            };
            if !qualifies {
                self.slab.ends_scan = true;
                break;
            }
            let dst = &mut self.slab.data[self.slab.n * self.slab.tlen..];
            let slot0 = self.shape.slots[0];
            crate::tuple::copy_sized(&mut dst[slot0.off..slot0.off + slot0.len], key);
            for col in 0..self.layout.ninclude {
                let src = view.plain_include(self.offset, col);
                let slot = self.shape.slots[1 + col];
                crate::tuple::copy_sized(&mut dst[slot.off..slot.off + slot.len], src);
            }
            self.slab.n += 1;
            self.offset += 1;
        }
        Ok(())
    }

    // Seek the first leaf and in-leaf offset for this scan cycle.
    fn first_position(&mut self, dir: ScanDir) -> Result<()> {
        self.pages_scanned = 0;
        let parallel = self.opts.parallel.is_some();
        match (parallel, dir) {
            (true, ScanDir::Backward) => {
                err_at!(Internal, msg: "parallel scans claim leaves forward only")?
            }
            (true, ScanDir::Forward) => {
                let claim = self.parallel_claim()?;
                match claim {
                    None => self.done = true,
                    Some((block, seeded)) => {
                        self.pin_leaf(block, None)?;
                        self.offset = match seeded {
                            true => self.position_forward()?,
                            false => 1,
                        };
                    }
                }
            }
            (false, ScanDir::Forward) => match self.descend(false)? {
                None => self.done = true,
                Some(block) => {
                    self.pin_leaf(block, None)?;
                    self.offset = self.position_forward()?;
                }
            },
            (false, ScanDir::Backward) => match self.descend(true)? {
                None => self.done = true,
                Some(block) => {
                    self.pin_leaf(block, None)?;
                    self.offset = self.position_backward()?;
                }
            },
        }
        Ok(())
    }

    // Root-to-leaf descent. Forward descents steer by the lower bound,
    // backward descents by the upper bound; zone maps and bloom filters
    // prune level-1 subtrees on the way down.
    fn descend(&mut self, backward: bool) -> Result<Option<u32>> {
        if self.root_block == INVALID_BLOCK {
            return Ok(None);
        }
        let mut block = self.root_block;
        let mut level = self.height;

        while level > 0 {
            let page = Page::read(&mut self.fd, block)?;
            self.prof.pages_read += 1;
            if u16::from(page.level()) != level {
                err_at!(
                    CorruptPage,
                    msg: "block {} at level {}, descent expected {}", block, page.level(), level
                )?
            }
            let node = NodeView::parse(page.payload()?, self.layout.key1_len)?;

            let target = match backward {
                false => self.lower.clone(),
                true => self.upper.clone(),
            };
            let mut chosen: Option<u32> = None;
            let mut high_qualified = false;
            for i in 0..node.nentries {
                let (child, high_key) = node.entry(i);
                let qualifies = match &target {
                    None if backward => i + 1 == node.nentries, // rightmost
                    None => true,
                    Some(bound) => {
                        let ord = self.cmp1.compare(high_key, &bound.val.bytes)?;
                        match (backward, bound.strict) {
                            // forward, strict lower: keys > bound live past
                            // a subtree whose high-key equals the bound.
                            (false, true) => ord == Ordering::Greater,
                            (false, false) => ord != Ordering::Less,
                            // backward, strict upper: keys < bound end in
                            // the first subtree reaching the bound.
                            (true, true) => ord != Ordering::Less,
                            // backward, inclusive upper: copies of the
                            // bound itself can spill right, into a subtree
                            // whose high-key exceeds it. Start there and
                            // walk left.
                            (true, false) => ord == Ordering::Greater,
                        }
                    }
                };
                if !qualifies {
                    continue;
                }
                high_qualified = true;

                // children of a level-2 node are the level-1 subtrees the
                // zone maps and bloom filters describe.
                if level == 2 {
                    if let Some(zone) = self.zone_for(child) {
                        if backward {
                            if let Some(lower) = &self.lower {
                                let ord =
                                    self.cmp1.compare(&zone.max_key, &lower.val.bytes)?;
                                let below = ord == Ordering::Less
                                    || (lower.strict && ord == Ordering::Equal);
                                if below {
                                    // the boundary subtree tops out under
                                    // the lower bound; everything further
                                    // left is smaller still.
                                    self.prof.zone_skips += 1;
                                    return Ok(None);
                                }
                            }
                        } else {
                            if let Some(upper) = &self.upper {
                                let ord =
                                    self.cmp1.compare(&zone.min_key, &upper.val.bytes)?;
                                let past = ord == Ordering::Greater
                                    || (upper.strict && ord == Ordering::Equal);
                                if past {
                                    // every subtree from here on starts
                                    // beyond the upper bound.
                                    self.prof.zone_skips += 1;
                                    return Ok(None);
                                }
                            }
                            if let (Some(eq), true) = (&self.eq, self.bloom_enabled) {
                                if let Some(filter) = self.bloom_for(child) {
                                    if !filter.contains(&eq.bytes) {
                                        self.prof.bloom_skips += 1;
                                        continue;
                                    }
                                }
                            }
                        }
                    }
                }
                chosen = Some(child);
                break;
            }

            block = match chosen {
                Some(child) => child,
                None if !high_qualified => node.entry(node.nentries - 1).0,
                // every candidate subtree was pruned away.
                None => return Ok(None),
            };
            level -= 1;
        }
        Ok(Some(block))
    }

    // In-leaf offset of the first qualifying row for a forward scan.
    fn position_forward(&mut self) -> Result<u32> {
        let pinned = match &self.cur {
            Some(pinned) => pinned,
            None => return Ok(1),
        };
        let bound = match &self.lower {
            Some(bound) => bound,
            None => return Ok(1),
        };
        let view = LeafView::parse(pinned.page.payload()?, self.layout)?;
        let n = u32::from(view.nitems);

        if !view.fmt.is_plain() {
            // walk the run entries; their keys are the distinct keys of
            // the leaf in order.
            let mut start = 1_u32;
            for run in 0..view.nruns {
                let (key, count) = view.run_entry(run);
                if qualifies_lower(&self.cmp1, key, bound)? {
                    return Ok(start);
                }
                start += u32::from(count);
            }
            return Ok(n + 1);
        }

        if !self.tun.use_position_scan {
            let mut cache = RunCache::None;
            let mut off = 1_u32;
            while off <= n {
                let key = view.locate_key(off, &mut cache)?;
                if qualifies_lower(&self.cmp1, key, bound)? {
                    break;
                }
                off += 1;
            }
            return Ok(off);
        }

        // binary search for the first offset at or past the bound.
        let mut cache = RunCache::None;
        let mut lo = 1_u32;
        let mut hi = n + 1;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let key = view.locate_key(mid, &mut cache)?;
            if qualifies_lower(&self.cmp1, key, bound)? {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        Ok(lo)
    }

    // In-leaf offset of the last qualifying row for a backward scan;
    // 0 when every row on the leaf is beyond the upper bound.
    fn position_backward(&mut self) -> Result<u32> {
        let pinned = match &self.cur {
            Some(pinned) => pinned,
            None => return Ok(0),
        };
        let view = LeafView::parse(pinned.page.payload()?, self.layout)?;
        let n = u32::from(view.nitems);
        let bound = match &self.upper {
            Some(bound) => bound.clone(),
            None => return Ok(n),
        };

        let mut cache = RunCache::None;
        if !self.tun.use_position_scan {
            let mut off = n;
            while off >= 1 {
                let key = view.locate_key(off, &mut cache)?;
                if !beyond_upper(&self.cmp1, key, Some(&bound))? {
                    break;
                }
                off -= 1;
            }
            return Ok(off);
        }

        // first offset beyond the bound; position right before it.
        let mut lo = 1_u32;
        let mut hi = n + 1;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let key = view.locate_key(mid, &mut cache)?;
            if beyond_upper(&self.cmp1, key, Some(&bound))? {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        Ok(lo - 1)
    }

    // Move to the next leaf in `dir`, through the sibling links or the
    // parallel claim word. Returns false when the scan ran out of
    // leaves. The interrupt flag is polled here, once per leaf.
    fn advance_leaf(&mut self, dir: ScanDir) -> Result<bool> {
        if self.opts.hooks.interrupt_requested() {
            self.release_pin();
            err_at!(Interrupted, msg: "host interrupt during scan of {:?}", self.name)?
        }

        let (old_block, rightlink, leftlink) = match &self.cur {
            Some(pinned) => (pinned.block, pinned.page.rightlink(), pinned.page.leftlink()),
            None => return Ok(false),
        };
        self.release_pin();

        let parallel = self.opts.parallel.is_some();
        let next = match (parallel, dir) {
            (true, ScanDir::Forward) => match self.parallel_claim()? {
                Some((block, _)) => Some((block, None)),
                None => None,
            },
            (true, ScanDir::Backward) => {
                err_at!(Internal, msg: "parallel scans claim leaves forward only")?
            }
            (false, ScanDir::Forward) => match rightlink {
                INVALID_BLOCK => None,
                block => Some((block, Some(old_block))),
            },
            (false, ScanDir::Backward) => match leftlink {
                INVALID_BLOCK => None,
                block => Some((block, None)),
            },
        };

        match next {
            None => Ok(false),
            Some((block, check_left)) => {
                self.pin_leaf(block, check_left)?;
                if dir == ScanDir::Forward && self.opts.parallel.is_none() {
                    self.prefetch_ahead()?;
                }
                self.offset = match dir {
                    ScanDir::Forward => 1,
                    ScanDir::Backward => match &self.cur {
                        Some(pinned) => u32::from(pinned.nitems),
                        None => 0,
                    },
                };
                Ok(true)
            }
        }
    }

    // Pin `block` as the current leaf, optionally verifying the sibling
    // chain through its left-link.
    fn pin_leaf(&mut self, block: u32, check_left: Option<u32>) -> Result<()> {
        let page = match self.prefetched.iter().position(|(b, _)| *b == block) {
            Some(i) => self.prefetched.remove(i).1,
            None => {
                self.prof.pages_read += 1;
                Page::read(&mut self.fd, block)?
            }
        };
        if !page.is_leaf() {
            err_at!(
                CorruptPage,
                msg: "block {} pinned as leaf but is level {}", block, page.level()
            )?
        }
        if let Some(prev) = check_left {
            if page.leftlink() != prev {
                err_at!(
                    CorruptPage,
                    msg: "block {} leftlink {} does not close the chain from {}",
                    block,
                    page.leftlink(),
                    prev
                )?
            }
        }
        let view = LeafView::parse(page.payload()?, self.layout)?;
        if self.tun.test_force_page_bounds_check {
            view.check_structure()?;
        }
        let (fmt, nitems) = (view.fmt, view.nitems);
        if self.tun.debug_log {
            debug!(
                target: "ordix",
                "scan {:?}: pinned leaf {} fmt {:?} nitems {}", self.name, block, fmt, nitems
            );
        }
        self.cur = Some(Pinned {
            block,
            page,
            fmt,
            nitems,
        });
        self.run.clear();
        self.k1_verdict = None;
        self.pages_scanned += 1;
        self.prof.leaves_scanned += 1;
        Ok(())
    }

    // Claim the next leaf from the shared word; the first worker to see
    // the uninitialised state seeds the scan from the bound descent.
    // Returns the claimed block and whether this claim seeded the scan.
    fn parallel_claim(&mut self) -> Result<Option<(u32, bool)>> {
        let state = match &self.opts.parallel {
            Some(state) => Arc::clone(state),
            None => err_at!(Fatal, msg: "parallel claim without shared state")?,
        };
        loop {
            match state.load() {
                0 => {
                    let start = self.descend(false)?;
                    let next = match start {
                        Some(block) => self.read_rightlink(block)?,
                        None => INVALID_BLOCK,
                    };
                    if state.publish(0, next) {
                        return Ok(start.map(|block| (block, true)));
                    }
                }
                INVALID_BLOCK => return Ok(None),
                claimed => {
                    let next = self.read_rightlink(claimed)?;
                    if state.publish(claimed, next) {
                        return Ok(Some((claimed, false)));
                    }
                }
            }
        }
    }

    // Read a leaf's right-link, keeping the page around for the pin that
    // usually follows.
    fn read_rightlink(&mut self, block: u32) -> Result<u32> {
        if let Some((_, page)) = self.prefetched.iter().find(|(b, _)| *b == block) {
            return Ok(page.rightlink());
        }
        let page = Page::read(&mut self.fd, block)?;
        self.prof.pages_read += 1;
        let rightlink = page.rightlink();
        self.prefetched.push((block, page));
        if self.prefetched.len() > PREFETCH_CACHE_MAX {
            self.prefetched.remove(0);
        }
        Ok(rightlink)
    }

    // Read ahead along the right-links with an adaptive depth: equality
    // probes hold off for their first pages, bounded ranges ramp up
    // slow-start, unbounded ranges go straight to the configured depth.
    fn prefetch_ahead(&mut self) -> Result<()> {
        let depth = self.adaptive_depth();
        if depth == 0 {
            return Ok(());
        }
        let mut block = match &self.cur {
            Some(pinned) => pinned.page.rightlink(),
            None => return Ok(()),
        };
        let mut got = 0;
        while got < depth && block != INVALID_BLOCK {
            if self.prefetched.iter().any(|(b, _)| *b == block) {
                break;
            }
            let page = Page::read(&mut self.fd, block)?;
            self.prof.pages_read += 1;
            let next = page.rightlink();
            self.prefetched.push((block, page));
            if self.prefetched.len() > PREFETCH_CACHE_MAX {
                self.prefetched.remove(0);
            }
            block = next;
            got += 1;
        }
        Ok(())
    }

    fn adaptive_depth(&self) -> usize {
        let configured = self.tun.prefetch_depth;
        if configured == 0 {
            return 0;
        }
        // single-row equality lookups should not pay for read-ahead.
        if self.eq.is_some() && self.pages_scanned < 3 {
            return 0;
        }
        if self.upper.is_some() || self.eq.is_some() {
            let ramp = 1_usize << cmp::min(self.pages_scanned, 6);
            cmp::min(configured, ramp)
        } else {
            configured
        }
    }

    fn zone_for(&self, child: u32) -> Option<&ZoneSpan> {
        let child = u64::from(child);
        self.zones
            .binary_search_by_key(&child, |z| z.child)
            .ok()
            .map(|i| &self.zones[i])
    }

    fn bloom_for(&self, child: u32) -> Option<&SubtreeFilter> {
        let child = u64::from(child);
        self.blooms
            .binary_search_by_key(&child, |f| f.child)
            .ok()
            .map(|i| &self.blooms[i])
    }
}

enum Step {
    Emit,
    Skip,
    End,
}

const PREFETCH_CACHE_MAX: usize = 16;

fn qualifies_lower(cmp: &KeyCmp, key: &[u8], bound: &AttrBound) -> Result<bool> {
    let ord = cmp.cmp_key_to_lower_bound(key, &bound.val)?;
    Ok(match bound.strict {
        true => ord == Ordering::Greater,
        false => ord != Ordering::Less,
    })
}

fn below_lower(cmp: &KeyCmp, key: &[u8], bound: Option<&AttrBound>) -> Result<bool> {
    match bound {
        None => Ok(false),
        Some(bound) => Ok(!qualifies_lower(cmp, key, bound)?),
    }
}

fn beyond_upper(cmp: &KeyCmp, key: &[u8], bound: Option<&AttrBound>) -> Result<bool> {
    match bound {
        None => Ok(false),
        Some(bound) => {
            let ord = cmp.cmp_key_to_upper_bound(key, &bound.val)?;
            Ok(match bound.strict {
                true => ord != Ordering::Less,
                false => ord == Ordering::Greater,
            })
        }
    }
}

#[cfg(test)]
#[path = "scan_test.rs"]
mod scan_test;
