//! Module `compare` implement the bound comparator.
//!
//! A comparator compares raw, fixed-width key bytes against a bound
//! value encoded into the same byte form. The ordering produced here is
//! the total order used by the build-time sort; divergence between the
//! two is corruption.

use std::cmp::Ordering;

use crate::{
    types::{CmpProc, Collation, Datum, KeyAttr, KeyType},
    Error, Result,
};

/// A scan bound, encoded once into fixed-width key-byte form at
/// `rescan` so the per-row hot path only touches bytes.
#[derive(Clone, Debug)]
pub struct BoundVal {
    pub bytes: Vec<u8>,
}

impl BoundVal {
    pub fn new(ty: &KeyType, datum: &Datum) -> Result<BoundVal> {
        let mut bytes = vec![0_u8; ty.width()];
        datum.encode_into(ty, &mut bytes)?;
        Ok(BoundVal { bytes })
    }
}

/// Per-attribute comparator, assembled once per scan (and once per
/// build for the sort).
#[derive(Clone)]
pub struct KeyCmp {
    ty: KeyType,
    collation: Collation,
    proc: Option<CmpProc>,
}

impl KeyCmp {
    pub fn new(attr: &KeyAttr) -> KeyCmp {
        KeyCmp {
            ty: attr.ty.clone(),
            collation: attr.collation.clone(),
            proc: attr.proc.clone(),
        }
    }

    /// Whether this comparator can order values without a plugged proc.
    pub fn is_native(&self) -> bool {
        match (&self.ty, &self.collation) {
            (KeyType::Text(_), Collation::Locale(_)) => false,
            (_, _) => true,
        }
    }

    /// Compare key bytes `a` against key bytes `b`; both operands are in
    /// the attribute's fixed-width form.
    pub fn compare(&self, a: &[u8], b: &[u8]) -> Result<Ordering> {
        let ord = match &self.ty {
            KeyType::Int2 => {
                let x = i16::from_le_bytes([a[0], a[1]]);
                let y = i16::from_le_bytes([b[0], b[1]]);
                x.cmp(&y)
            }
            KeyType::Int4 | KeyType::Date => {
                let x = i32::from_le_bytes([a[0], a[1], a[2], a[3]]);
                let y = i32::from_le_bytes([b[0], b[1], b[2], b[3]]);
                x.cmp(&y)
            }
            KeyType::Int8 | KeyType::Timestamp => {
                let x = i64::from_le_bytes([a[0], a[1], a[2], a[3], a[4], a[5], a[6], a[7]]);
                let y = i64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]);
                x.cmp(&y)
            }
            KeyType::Uuid => a[..16].cmp(&b[..16]),
            KeyType::Text(_) => {
                let x = strip_text(a);
                let y = strip_text(b);
                match &self.collation {
                    Collation::C => cmp_text_c(x, y),
                    Collation::Locale(name) => match &self.proc {
                        Some(proc) => proc(x, y),
                        None => err_at!(
                            Internal,
                            msg: "no comparator proc plugged for locale {:?}", name
                        )?,
                    },
                }
            }
        };
        Ok(ord)
    }

    /// Compare `key` against a scan lower bound. Equality means the key
    /// sits exactly on the bound.
    pub fn cmp_key_to_lower_bound(&self, key: &[u8], bound: &BoundVal) -> Result<Ordering> {
        self.compare(key, &bound.bytes)
    }

    /// Compare `key` against a scan upper bound.
    pub fn cmp_key_to_upper_bound(&self, key: &[u8], bound: &BoundVal) -> Result<Ordering> {
        self.compare(key, &bound.bytes)
    }
}

/// Text keys are padded to their budget with trailing zero bytes; the
/// logical value ends at the first zero.
fn strip_text(buf: &[u8]) -> &[u8] {
    match buf.iter().position(|b| *b == 0) {
        Some(n) => &buf[..n],
        None => buf,
    }
}

// memcmp over the common prefix, ties broken by length.
fn cmp_text_c(a: &[u8], b: &[u8]) -> Ordering {
    let n = a.len().min(b.len());
    match a[..n].cmp(&b[..n]) {
        Ordering::Equal => a.len().cmp(&b.len()),
        ord => ord,
    }
}

#[cfg(test)]
#[path = "compare_test.rs"]
mod compare_test;
