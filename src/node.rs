//! Module `node` implement the fixed-layout internal node payload.
//!
//! `[u16 nentries][nentries x (child: u32, high_key)]` where the
//! high-key is the leading-key bytes of the largest key reachable
//! through that child. High-keys are non-decreasing left to right.

use crate::{
    page::{read_u16_le, read_u32_le, write_u16_le, PAYLOAD_BUDGET},
    Error, Result,
};

/// How many children an internal node can route, given the leading-key
/// width. Drives the bottom-up level builder.
pub fn fanout(key1_len: usize) -> usize {
    (PAYLOAD_BUDGET - 2) / (4 + key1_len)
}

/// Whether `n` entries actually encode within one node page. The level
/// builder verifies every planned node against this before flushing a
/// level, so a fanout over-estimate is caught while nothing is written.
pub fn entries_fit(key1_len: usize, n: usize) -> bool {
    2 + n * (4 + key1_len) <= PAYLOAD_BUDGET
}

/// Encode an internal node payload from `(child, high_key)` entries.
pub fn encode_node(key1_len: usize, entries: &[(u32, &[u8])]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(2 + entries.len() * (4 + key1_len));
    buf.resize(2, 0);
    write_u16_le(&mut buf, 0, entries.len() as u16);
    for (child, high_key) in entries {
        buf.extend_from_slice(&child.to_le_bytes());
        buf.extend_from_slice(&high_key[..key1_len]);
    }
    buf
}

/// Borrowed, parsed view over one internal node payload.
pub struct NodeView<'a> {
    payload: &'a [u8],
    key1_len: usize,
    pub nentries: u16,
}

impl<'a> NodeView<'a> {
    pub fn parse(payload: &'a [u8], key1_len: usize) -> Result<NodeView<'a>> {
        if payload.len() < 2 {
            err_at!(CorruptPage, msg: "internal payload {} bytes", payload.len())?
        }
        let nentries = read_u16_le(payload, 0);
        let want = 2 + (nentries as usize) * (4 + key1_len);
        if payload.len() != want {
            err_at!(
                CorruptPage,
                msg: "internal payload {} bytes, expected {} for {} entries",
                payload.len(), want, nentries
            )?
        }
        if nentries == 0 {
            err_at!(CorruptPage, msg: "internal node with zero entries")?
        }
        Ok(NodeView {
            payload,
            key1_len,
            nentries,
        })
    }

    /// `(child-block, high-key-bytes)` of entry `i` (0-based).
    pub fn entry(&self, i: u16) -> (u32, &'a [u8]) {
        let off = 2 + (i as usize) * (4 + self.key1_len);
        let child = read_u32_le(self.payload, off);
        let high_key = &self.payload[off + 4..off + 4 + self.key1_len];
        (child, high_key)
    }
}

#[cfg(test)]
#[path = "node_test.rs"]
mod node_test;
