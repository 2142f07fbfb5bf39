//! Module `bloom` implement the per-subtree bloom filters.
//!
//! One small bitset per level-1 subtree, built over the leading-key
//! values reachable through it, probed during descent on equality
//! predicates. "Definitely not present" answers let the scan skip whole
//! subtrees; false positives only cost the descent.

use cbordata::Cborize;

use std::collections::HashSet;

const FILTER_VER: u32 = 0x00010001;

// target bits per distinct key; ~10 gives a false positive rate around 1%.
const BITS_PER_KEY: usize = 10;
const MIN_BITS: usize = 64;

/// Bloom filter over one subtree's leading keys. Serialized into the
/// metadata region alongside the zone maps.
#[derive(Clone, Debug, Default, Cborize)]
pub struct SubtreeFilter {
    /// Block id of the level-1 node this filter covers. Filled in when
    /// the internal levels are built.
    pub child: u64,
    pub nbits: u64,
    pub nhash: usize,
    pub bits: Vec<u8>,
}

impl SubtreeFilter {
    const ID: u32 = FILTER_VER;

    pub fn new(distinct: usize, nhash: u8) -> SubtreeFilter {
        let nbits = (distinct * BITS_PER_KEY).max(MIN_BITS);
        let nbits = ((nbits + 7) / 8) * 8;
        SubtreeFilter {
            child: u64::from(crate::page::INVALID_BLOCK),
            nbits: nbits as u64,
            nhash: nhash as usize,
            bits: vec![0_u8; nbits / 8],
        }
    }

    pub fn add(&mut self, key: &[u8]) {
        let (h1, h2) = digests(key);
        for i in 0..self.nhash {
            let bit = (h1.wrapping_add((i as u64).wrapping_mul(h2)) % self.nbits) as usize;
            self.bits[bit / 8] |= 1 << (bit % 8);
        }
    }

    /// False means the key is definitely absent from the subtree.
    pub fn contains(&self, key: &[u8]) -> bool {
        let (h1, h2) = digests(key);
        for i in 0..self.nhash {
            let bit = (h1.wrapping_add((i as u64).wrapping_mul(h2)) % self.nbits) as usize;
            if self.bits[bit / 8] & (1 << (bit % 8)) == 0 {
                return false;
            }
        }
        true
    }
}

/// Accumulates the distinct leading keys of one subtree while its leaves
/// are being written, then freezes into a sized [SubtreeFilter].
pub struct FilterBuilder {
    nhash: u8,
    keys: HashSet<Vec<u8>>,
}

impl FilterBuilder {
    pub fn new(nhash: u8) -> FilterBuilder {
        FilterBuilder {
            nhash,
            keys: HashSet::new(),
        }
    }

    pub fn add(&mut self, key: &[u8]) {
        if !self.keys.contains(key) {
            self.keys.insert(key.to_vec());
        }
    }

    /// Union another subtree's keys into this builder; used when the
    /// level builder degrades the tree to a single subtree over all
    /// leaves.
    pub fn absorb(&mut self, other: FilterBuilder) {
        self.keys.extend(other.keys);
    }

    pub fn build(self) -> SubtreeFilter {
        let mut filter = SubtreeFilter::new(self.keys.len(), self.nhash);
        for key in self.keys.iter() {
            filter.add(key);
        }
        filter
    }
}

// one city-hash digest per key, split and recombined for k independent
// probe positions (double hashing).
fn digests(key: &[u8]) -> (u64, u64) {
    let d = cityhash_rs::cityhash_110_128(key);
    let h1 = (d >> 64) as u64;
    let h2 = (d & 0xFFFF_FFFF_FFFF_FFFF) as u64 | 1;
    (h1, h2)
}

#[cfg(test)]
#[path = "bloom_test.rs"]
mod bloom_test;
