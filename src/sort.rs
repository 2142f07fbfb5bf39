//! Module `sort` implement the build-time sort over collected rows.
//!
//! Integer keys go through a stable 8-bit-per-pass LSD radix sort over
//! the sign-flipped unsigned representation; everything else goes
//! through a stable comparison sort driven by the attribute comparator.
//! Two-column indexes order `(k1, k2)` lexicographic.

use std::convert::TryFrom;

use crate::{
    compare::KeyCmp,
    types::{IndexDescr, KeyType},
    Error, Result,
};

/// Which sort strategy a descriptor gets.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SortKind {
    RadixI16,
    RadixI32,
    RadixI64,
    /// Composite two-int8 key, radix on k2 then k1.
    RadixI64Pair,
    Comparator,
}

pub fn pick_sort_kind(descr: &IndexDescr) -> SortKind {
    match descr.nkeyatts() {
        1 => match descr.keys[0].ty {
            KeyType::Int2 => SortKind::RadixI16,
            KeyType::Int4 => SortKind::RadixI32,
            KeyType::Int8 => SortKind::RadixI64,
            _ => SortKind::Comparator,
        },
        _ => match (&descr.keys[0].ty, &descr.keys[1].ty) {
            (KeyType::Int8, KeyType::Int8) => SortKind::RadixI64Pair,
            (_, _) => SortKind::Comparator,
        },
    }
}

/// Stable-sort the `n` fixed-width rows in `arena` and return their
/// ordinals in ascending key order.
pub fn sort_rows(
    arena: &[u8],
    row_len: usize,
    n: usize,
    descr: &IndexDescr,
) -> Result<Vec<u32>> {
    let mut ids: Vec<u32> = (0..err_at!(FailConvert, u32::try_from(n))?).collect();
    if n <= 1 {
        return Ok(ids);
    }

    let key1_len = descr.key_len(0);
    match pick_sort_kind(descr) {
        SortKind::RadixI16 => {
            let keys = norm_keys(arena, row_len, n, 0, 2);
            radix_sort(&mut ids, &keys, 2);
        }
        SortKind::RadixI32 => {
            let keys = norm_keys(arena, row_len, n, 0, 4);
            radix_sort(&mut ids, &keys, 4);
        }
        SortKind::RadixI64 => {
            let keys = norm_keys(arena, row_len, n, 0, 8);
            radix_sort(&mut ids, &keys, 8);
        }
        SortKind::RadixI64Pair => {
            // radix is stable, so sorting by k2 first and k1 after
            // leaves the ids in (k1, k2) lexicographic order.
            let keys2 = norm_keys(arena, row_len, n, key1_len, 8);
            radix_sort(&mut ids, &keys2, 8);
            let keys1 = norm_keys(arena, row_len, n, 0, 8);
            radix_sort(&mut ids, &keys1, 8);
        }
        SortKind::Comparator => {
            let cmp1 = KeyCmp::new(&descr.keys[0]);
            let cmp2 = descr.keys.get(1).map(KeyCmp::new);
            if !cmp1.is_native() && descr.keys[0].proc.is_none() {
                err_at!(Internal, msg: "sorting locale text without a comparator proc")?
            }
            let key2_len = cmp2.as_ref().map(|_| descr.key_len(1)).unwrap_or(0);
            ids.sort_by(|x, y| {
                let a = &arena[(*x as usize) * row_len..];
                let b = &arena[(*y as usize) * row_len..];
                // proc presence is checked above, compare cannot fail here.
                let ord = cmp1
                    .compare(&a[..key1_len], &b[..key1_len])
                    .unwrap_or(std::cmp::Ordering::Equal);
                match (ord, &cmp2) {
                    (std::cmp::Ordering::Equal, Some(cmp2)) => cmp2
                        .compare(
                            &a[key1_len..key1_len + key2_len],
                            &b[key1_len..key1_len + key2_len],
                        )
                        .unwrap_or(std::cmp::Ordering::Equal),
                    (ord, _) => ord,
                }
            });
        }
    }
    Ok(ids)
}

// Sign-flipped unsigned image of the `width`-byte little-endian signed
// integer at `key_off` of every row.
fn norm_keys(arena: &[u8], row_len: usize, n: usize, key_off: usize, width: usize) -> Vec<u64> {
    let mut keys = Vec::with_capacity(n);
    for i in 0..n {
        let off = i * row_len + key_off;
        let norm = match width {
            2 => {
                let v = i16::from_le_bytes([arena[off], arena[off + 1]]);
                u64::from((v as u16) ^ 0x8000)
            }
            4 => {
                let v = i32::from_le_bytes([
                    arena[off],
                    arena[off + 1],
                    arena[off + 2],
                    arena[off + 3],
                ]);
                u64::from((v as u32) ^ 0x8000_0000)
            }
            _ => {
                let mut bytes = [0_u8; 8];
                bytes.copy_from_slice(&arena[off..off + 8]);
                (i64::from_le_bytes(bytes) as u64) ^ 0x8000_0000_0000_0000
            }
        };
        keys.push(norm);
    }
    keys
}

// LSD counting passes over the low `width` bytes of `keys`, permuting
// `ids`. Each pass is stable; passes whose byte is constant are skipped.
fn radix_sort(ids: &mut Vec<u32>, keys: &[u64], width: usize) {
    let mut src = std::mem::take(ids);
    let mut dst = vec![0_u32; src.len()];

    for pass in 0..width {
        let shift = pass * 8;
        let mut counts = [0_usize; 256];
        for id in src.iter() {
            let byte = ((keys[*id as usize] >> shift) & 0xFF) as usize;
            counts[byte] += 1;
        }
        if counts.iter().any(|c| *c == src.len()) {
            continue; // every key shares this byte
        }
        let mut starts = [0_usize; 256];
        let mut acc = 0;
        for (byte, count) in counts.iter().enumerate() {
            starts[byte] = acc;
            acc += count;
        }
        for id in src.iter() {
            let byte = ((keys[*id as usize] >> shift) & 0xFF) as usize;
            dst[starts[byte]] = *id;
            starts[byte] += 1;
        }
        std::mem::swap(&mut src, &mut dst);
    }

    *ids = src;
}

#[cfg(test)]
#[path = "sort_test.rs"]
mod sort_test;
