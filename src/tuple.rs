//! Module `tuple` implement the output tuple materializer.
//!
//! A scan prebuilds one output tuple shaped to the index descriptor and
//! reuses it for every row; the hot path performs size-specialised
//! copies into precomputed slots and never allocates.

use crate::{
    types::{Datum, IndexDescr},
    Error, Result,
};

/// Tuple identifier attached to emitted tuples. The engine is
/// index-only; every output carries the same synthetic TID so the
/// host's machinery never falls back to a heap fetch.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Tid {
    pub block: u32,
    pub offnum: u16,
}

/// The synthetic `(block 0, offset 1)` TID.
pub const SYNTHETIC_TID: Tid = Tid { block: 0, offnum: 1 };

/// One attribute slot inside the output tuple.
#[derive(Clone, Copy, Debug)]
pub struct Slot {
    pub off: usize,
    pub len: usize,
    /// Varwidth slots carry a one-byte length header followed by up to
    /// `len - 1` text bytes.
    pub varwidth: bool,
}

/// Precomputed shape of the output tuple: key attributes first, INCLUDE
/// attributes after, at fixed offsets.
#[derive(Clone, Debug)]
pub struct TupleShape {
    pub slots: Vec<Slot>,
    pub len: usize,
}

impl TupleShape {
    pub fn new(descr: &IndexDescr) -> TupleShape {
        let mut slots = vec![];
        let mut off = 0;
        for key in descr.keys.iter() {
            let varwidth = key.ty.is_varwidth();
            let len = if varwidth { key.ty.width() + 1 } else { key.ty.width() };
            slots.push(Slot { off, len, varwidth });
            off += len;
        }
        for inc in descr.includes.iter() {
            slots.push(Slot {
                off,
                len: inc.ty.width(),
                varwidth: false,
            });
            off += inc.ty.width();
        }
        TupleShape { slots, len: off }
    }
}

/// The reusable output tuple.
pub struct IndexTuple {
    pub data: Vec<u8>,
    pub tid: Tid,
}

impl IndexTuple {
    pub fn new(shape: &TupleShape) -> IndexTuple {
        IndexTuple {
            data: vec![0_u8; shape.len],
            tid: SYNTHETIC_TID,
        }
    }

    /// Raw bytes of attribute `i` (0-based, keys then INCLUDEs). For
    /// varwidth slots this is the logical value, header stripped.
    pub fn attr<'a>(&'a self, shape: &TupleShape, i: usize) -> &'a [u8] {
        let slot = &shape.slots[i];
        if slot.varwidth {
            let n = self.data[slot.off] as usize;
            &self.data[slot.off + 1..slot.off + 1 + n]
        } else {
            &self.data[slot.off..slot.off + slot.len]
        }
    }

    /// Store fixed-width bytes into slot `i`.
    #[inline]
    pub fn store_fixed(&mut self, shape: &TupleShape, i: usize, src: &[u8]) {
        let slot = &shape.slots[i];
        copy_sized(&mut self.data[slot.off..slot.off + slot.len], src);
    }

    /// Store a padded text value into varwidth slot `i`, computing the
    /// one-byte header by scanning for the zero terminator within the
    /// fixed budget.
    #[inline]
    pub fn store_text(&mut self, shape: &TupleShape, i: usize, src: &[u8]) {
        let slot = &shape.slots[i];
        let n = match src.iter().position(|b| *b == 0) {
            Some(n) => n,
            None => src.len(),
        };
        self.data[slot.off] = n as u8;
        self.data[slot.off + 1..slot.off + 1 + n].copy_from_slice(&src[..n]);
        for b in self.data[slot.off + 1 + n..slot.off + slot.len].iter_mut() {
            *b = 0;
        }
    }

    /// Decode every attribute back into datum values. Not used by the
    /// hot path; rechecks and tests deform through this.
    pub fn deform(&self, shape: &TupleShape, descr: &IndexDescr) -> Result<Vec<Datum>> {
        let mut values = Vec::with_capacity(descr.nattrs());
        for (i, key) in descr.keys.iter().enumerate() {
            if key.ty.is_varwidth() {
                let bytes = self.attr(shape, i);
                let text = err_at!(FailConvert, std::str::from_utf8(bytes))?;
                values.push(Datum::Text(text.to_string()));
            } else {
                values.push(Datum::decode(&key.ty, self.attr(shape, i))?);
            }
        }
        for (j, inc) in descr.includes.iter().enumerate() {
            let i = descr.keys.len() + j;
            values.push(Datum::decode(&inc.ty, self.attr(shape, i))?);
        }
        Ok(values)
    }
}

/// Size-specialised copy for the fixed widths this engine stores;
/// lengths outside the jump table fall back to a generic copy.
#[inline]
pub fn copy_sized(dst: &mut [u8], src: &[u8]) {
    match dst.len() {
        1 => dst[0] = src[0],
        2 => dst[..2].copy_from_slice(&src[..2]),
        4 => dst[..4].copy_from_slice(&src[..4]),
        8 => dst[..8].copy_from_slice(&src[..8]),
        16 => dst[..16].copy_from_slice(&src[..16]),
        n => dst[..n].copy_from_slice(&src[..n]),
    }
}

#[cfg(test)]
#[path = "tuple_test.rs"]
mod tuple_test;
