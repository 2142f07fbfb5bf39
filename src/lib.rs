//! Package implement `ordix`, a read-only ordered secondary index for
//! index-only scans.
//!
//! The index stores only the indexed key bytes (and optional INCLUDE
//! payload) in a compact, RLE-compressed, B+-tree shaped file and hands
//! key bytes straight back to the executor; the base table is never
//! touched. Build once with [Builder] from a host row stream, then open
//! any number of concurrent readers with [Index]. There is no mutation
//! path: write entry points fail with [Error::ReadOnly].
//!
//! **Inventory of features**
//!
//! * One or two key attributes (int2/int4/int8, uuid, date, timestamp,
//!   short fixed-budget text), plus fixed-width INCLUDE payload columns.
//! * Four leaf payload formats: plain, key-RLE v1/v2, include-RLE;
//!   chosen per leaf by the build pipeline.
//! * Stable radix sort for integer keys, comparator sort elsewhere.
//! * Bound-driven descent with zone-map and bloom-filter subtree
//!   pruning, forward and backward scans, lock-free parallel leaf
//!   claims over a single shared atomic word.
//! * A prebuilt output tuple per scan with zero per-row allocations.
//!
//! Typical work-flow:
//!
//! ```ignore
//! let descr = IndexDescr::single(KeyAttr::new(KeyType::Int4));
//! let config = Config::new(dir, "events", descr);
//! Builder::initial(config)?.build_index(rows)?;
//!
//! let index = Index::open(dir, "events")?;
//! let mut scan = index.begin_scan(ScanOpts::default())?;
//! scan.rescan(&[ScanKey::new(1, StrategyOp::Ge, Datum::Int4(42))])?;
//! while let Some(tuple) = scan.gettuple(ScanDir::Forward)? {
//!     // consume tuple.data
//! }
//! ```

#[macro_use]
mod error;
pub mod util;

mod bloom;
mod build;
mod compare;
mod config;
mod flush;
mod index;
mod leaf;
mod meta;
mod node;
mod page;
mod parallel;
mod scan;
mod sort;
mod tuple;
mod types;

pub use crate::build::Builder;
pub use crate::compare::{BoundVal, KeyCmp};
pub use crate::config::{
    index_name_of, set_tunables, to_index_location, tunables, Config, HostHooks, NoHost, Stats,
    Tunables, BLOOM_NHASH, FLUSH_QUEUE_SIZE,
};
pub use crate::error::{Error, Result};
pub use crate::index::{
    Capabilities, CostEstimate, Index, CMP_SUPPORT_PROC, STRATEGY_EQ, STRATEGY_GE, STRATEGY_GT,
    STRATEGY_LE, STRATEGY_LT,
};
pub use crate::page::{INVALID_BLOCK, PAGE_SIZE};
pub use crate::parallel::{default_workers, ParallelScanState};
pub use crate::scan::{Scan, ScanDir, ScanKey, ScanOpts, StrategyOp};
pub use crate::tuple::{IndexTuple, Tid, TupleShape, SYNTHETIC_TID};
pub use crate::types::{
    CmpProc, Collation, Datum, IndexDescr, InclAttr, KeyAttr, KeyType, Row, INCLUDE_MAX,
    TEXT_BUDGET_MAX,
};
