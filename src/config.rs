//! Module `config` implement build configuration, runtime tunables and
//! index statistics.

use cbordata::Cborize;
use lazy_static::lazy_static;
use serde::Deserialize;

use std::{ffi, path, sync::Arc};

use crate::{
    types::{Collation, IndexDescr, KeyType},
    util::Spinlock,
    Error, Result,
};

/// Default value for flush queue size, channel queue size holding
/// index blocks on their way to disk.
pub const FLUSH_QUEUE_SIZE: usize = 64;

/// Default number of bloom hash probes.
pub const BLOOM_NHASH: u8 = 4;

/// Index files are named `{name}-ordix.indx` under the index directory.
const INDEX_FILE_SUFFIX: &str = "-ordix.indx";

const STATS_VER: u32 = 0x00010001;

/// Compose a path to index file identified by unique `name` under `dir`.
pub fn to_index_location(dir: &ffi::OsStr, name: &str) -> ffi::OsString {
    let mut loc = path::PathBuf::from(dir);
    loc.push(format!("{}{}", name, INDEX_FILE_SUFFIX));
    loc.into_os_string()
}

/// Recover the index name from a file path. None when the file does not
/// carry this engine's suffix, so directory scans skip foreign files.
pub fn index_name_of(file: &ffi::OsStr) -> Option<String> {
    let fname = path::Path::new(file).file_name()?.to_str()?;
    match fname.strip_suffix(INDEX_FILE_SUFFIX)? {
        "" => None,
        name => Some(name.to_string()),
    }
}

/// Host integration hooks.
///
/// The engine is index-only: a successful build signals the host, once,
/// that its visibility machinery must treat the index as never needing a
/// heap lookup. Scans poll the interrupt flag once per leaf advance.
pub trait HostHooks: Send + Sync {
    fn mark_all_visible(&self, _name: &str) {}

    fn interrupt_requested(&self) -> bool {
        false
    }
}

/// Default no-op host.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoHost;

impl HostHooks for NoHost {}

/// Configuration to build an index. Configuration is used only while
/// building; everything a reader needs is persisted with the index.
#[derive(Clone)]
pub struct Config {
    /// Location path where the index file is created.
    pub dir: ffi::OsString,
    /// Name of the index.
    pub name: String,
    /// Key and INCLUDE attributes, as declared by the host.
    pub descr: IndexDescr,
    /// Build per-subtree bloom filters over the leading key.
    ///
    /// Default: taken from [Tunables::bloom_filters_enabled].
    pub bloom_enabled: bool,
    /// Number of bloom hash probes.
    ///
    /// Default: [BLOOM_NHASH]
    pub bloom_nhash: u8,
    /// Internal-node fanout; None computes it from the page capacity.
    /// An over-estimate is detected before any internal level reaches
    /// the disk and degrades the tree to a single internal level.
    ///
    /// Default: None
    pub fanout: Option<usize>,
    /// Flush queue size.
    ///
    /// Default: [FLUSH_QUEUE_SIZE]
    pub flush_queue_size: usize,
    pub(crate) hooks: Arc<dyn HostHooks>,
}

impl Config {
    /// Create a new configuration value, use the `set_*` methods to add
    /// more configuration.
    pub fn new(dir: &ffi::OsStr, name: &str, descr: IndexDescr) -> Config {
        Config {
            dir: dir.to_os_string(),
            name: name.to_string(),
            descr,
            bloom_enabled: tunables().bloom_filters_enabled,
            bloom_nhash: BLOOM_NHASH,
            fanout: None,
            flush_queue_size: FLUSH_QUEUE_SIZE,
            hooks: Arc::new(NoHost),
        }
    }

    /// Enable or disable per-subtree bloom filters.
    pub fn set_bloom(&mut self, enabled: bool, nhash: u8) -> &mut Self {
        self.bloom_enabled = enabled;
        self.bloom_nhash = nhash;
        self
    }

    /// Override the internal-node fanout, a fill-factor style knob.
    /// Values below 2 are clamped; over-estimates degrade to a single
    /// internal level at build time.
    pub fn set_fanout(&mut self, fanout: usize) -> &mut Self {
        self.fanout = Some(fanout.max(2));
        self
    }

    /// Set flush queue size, increasing the queue size will improve batch
    /// flushing.
    pub fn set_flush_queue_size(&mut self, size: usize) -> &mut Self {
        self.flush_queue_size = size;
        self
    }

    /// Plug the host integration hooks.
    pub fn set_hooks(&mut self, hooks: Arc<dyn HostHooks>) -> &mut Self {
        self.hooks = hooks;
        self
    }

    pub fn to_index_location(&self) -> ffi::OsString {
        to_index_location(&self.dir, &self.name)
    }
}

/// Runtime tunables, read-mostly. Populated at engine init, snapshotted
/// once per `begin_scan`; individual knobs are never threaded through
/// call chains.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Tunables {
    /// Emit per-leaf debug logging from the scan hot path.
    pub debug_log: bool,
    /// Log per-scan counters at `end_scan`.
    pub profile: bool,
    /// Upper bound for the adaptive read-ahead on leaf advance; 0
    /// disables prefetch.
    pub prefetch_depth: usize,
    /// Consult per-subtree bloom filters on equality descent, and build
    /// them by default.
    pub bloom_filters_enabled: bool,
    /// Binary-search leaves to the scan bound; linear walk when off.
    pub use_position_scan: bool,
    /// Batch-materialize output tuples from plain fixed-width leaves.
    pub use_tuple_buffering: bool,
    /// How many output tuples one batch holds.
    pub tuple_buffer_size: usize,
    /// Force the structural page checks in the access path. Coverage
    /// testing only.
    pub test_force_page_bounds_check: bool,
}

impl Default for Tunables {
    fn default() -> Tunables {
        Tunables {
            debug_log: false,
            profile: false,
            prefetch_depth: 8,
            bloom_filters_enabled: true,
            use_position_scan: true,
            use_tuple_buffering: true,
            tuple_buffer_size: 64,
            test_force_page_bounds_check: false,
        }
    }
}

impl Tunables {
    /// Parse tunables from TOML text, typically a fragment of the host's
    /// settings file. Missing keys keep their defaults.
    pub fn from_toml(text: &str) -> Result<Tunables> {
        err_at!(InvalidInput, toml::from_str(text))
    }
}

lazy_static! {
    static ref TUNABLES: Spinlock<Tunables> = Spinlock::new(Tunables::default());
}

/// Install new runtime tunables, effective for scans that begin after
/// this call.
pub fn set_tunables(tun: Tunables) {
    *TUNABLES.write() = tun;
}

/// Snapshot the current runtime tunables.
pub fn tunables() -> Tunables {
    TUNABLES.read().clone()
}

/// Statistics for an index, persisted in the metadata region and
/// available to readers via `Index::to_stats`.
#[derive(Clone, Default, Debug, Cborize)]
pub struct Stats {
    /// Name of the index.
    pub name: String,
    /// Key attribute types, in order.
    pub key_types: Vec<KeyType>,
    /// Key attribute collations, in order.
    pub collations: Vec<Collation>,
    /// INCLUDE attribute types, in order.
    pub include_types: Vec<KeyType>,
    /// Whether per-subtree bloom filters were built.
    pub bloom_enabled: bool,
    /// Number of bloom hash probes.
    pub bloom_nhash: usize,

    /// Number of rows indexed.
    pub n_count: u64,
    /// Number of leaf pages.
    pub n_leaves: u64,
    /// Number of internal pages.
    pub n_internals: u64,
    /// Leaves encoded plain.
    pub n_plain_leaves: u64,
    /// Leaves encoded key-RLE (v1 or v2).
    pub n_rle_leaves: u64,
    /// Leaves encoded include-RLE.
    pub n_include_rle_leaves: u64,
    /// Number of internal levels; 0 means the root is the only leaf.
    pub height: usize,
    /// Block id of the root page; INVALID_BLOCK for an empty index.
    pub root_block: u64,
    /// Leftmost and rightmost leaf blocks; 0 for an empty index.
    pub first_leaf: u64,
    pub last_leaf: u64,

    /// Time taken to build this index, in nanoseconds.
    pub build_time: u64,
    /// Timestamp when this index was built, from UNIX EPOCH, in nanos.
    pub epoch: u64,
}

impl Stats {
    const ID: u32 = STATS_VER;
}

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;
