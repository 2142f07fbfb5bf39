//! Module `meta` implement the metadata region of the index file.
//!
//! The region starts at the block recorded in the metapage's
//! `zone_offset` field and holds, CBOR-serialized behind an 8-byte
//! length prefix: the build statistics, the zone maps over level-1
//! subtrees, the optional per-subtree bloom filters and a marker.

use cbordata::{Cbor, Cborize, FromCbor, IntoCbor};
use lazy_static::lazy_static;

use std::{
    convert::{TryFrom, TryInto},
    fs,
};

use crate::{bloom::SubtreeFilter, config::Stats, page::PAGE_SIZE, util, Error, Result};

const ZONE_SPAN_VER: u32 = 0x00010001;

lazy_static! {
    /// Fingerprint closing the metadata region.
    pub static ref ROOT_MARKER: Vec<u8> = "ordix-root-marker".as_bytes().to_vec();
}

/// Enumeration of meta items persisted in the metadata region.
#[derive(Clone, Debug, Cborize)]
pub enum MetaItem {
    /// Contains index statistics along with descriptor types.
    Stats(Vec<u8>),
    /// Zone maps, one [ZoneSpan] per level-1 subtree.
    Zones(Vec<u8>),
    /// Bloom filters, one [SubtreeFilter] per level-1 subtree.
    Blooms(Vec<u8>),
    /// Finger print for ordix.
    Marker(Vec<u8>),
}

impl MetaItem {
    const ID: &'static str = "ordix/metaitem/0.1.0";
}

/// Inclusive `[min, max]` leading-key range of one level-1 subtree.
/// Consulted during descent to skip subtrees wholesale.
#[derive(Clone, Debug, Default, Cborize)]
pub struct ZoneSpan {
    /// Block id of the level-1 node this span covers.
    pub child: u64,
    pub min_key: Vec<u8>,
    pub max_key: Vec<u8>,
}

impl ZoneSpan {
    const ID: u32 = ZONE_SPAN_VER;
}

// serialize one meta value, cross-checking the encoder's byte count.
pub(crate) fn to_cbor<T: IntoCbor>(val: T) -> Result<Vec<u8>> {
    let mut data: Vec<u8> = vec![];
    let n = err_at!(FailCbor, err_at!(FailCbor, val.into_cbor())?.encode(&mut data))?;
    match n == data.len() {
        true => Ok(data),
        false => err_at!(Fatal, msg: "meta encoder wrote {} of {} bytes", n, data.len()),
    }
}

// deserialize one meta value back from its byte form.
pub(crate) fn from_cbor<T: FromCbor>(mut data: &[u8]) -> Result<T> {
    let (val, _) = err_at!(FailCbor, Cbor::decode(&mut data))?;
    err_at!(FailCbor, T::from_cbor(val))
}

/// Serialize the metadata region, padded to a whole number of pages.
pub fn encode_meta_region(
    stats: &Stats,
    zones: &[ZoneSpan],
    blooms: &[SubtreeFilter],
) -> Result<Vec<u8>> {
    let metas = vec![
        MetaItem::Stats(to_cbor(stats.clone())?),
        MetaItem::Zones(to_cbor(zones.to_vec())?),
        MetaItem::Blooms(to_cbor(blooms.to_vec())?),
        MetaItem::Marker(ROOT_MARKER.clone()),
    ];

    let body = to_cbor(metas)?;
    let len = err_at!(FailConvert, u64::try_from(body.len()))?;

    let mut block = Vec::with_capacity(8 + body.len());
    block.extend_from_slice(&len.to_be_bytes());
    block.extend_from_slice(&body);
    let n = match block.len() % PAGE_SIZE {
        0 => block.len(),
        r => block.len() + (PAGE_SIZE - r),
    };
    block.resize(n, 0);
    Ok(block)
}

/// Read the metadata region back, verifying the marker.
pub fn decode_meta_region(
    fd: &mut fs::File,
    zone_offset: u32,
) -> Result<(Stats, Vec<ZoneSpan>, Vec<SubtreeFilter>)> {
    let fpos = u64::from(zone_offset) * (PAGE_SIZE as u64);
    let len = {
        let data = util::read_exact_at(fd, fpos, 8, "meta length")?;
        u64::from_be_bytes(data.try_into().unwrap())
    };
    let body = {
        let len = err_at!(FailConvert, usize::try_from(len))?;
        util::read_exact_at(fd, fpos + 8, len, "meta region")?
    };
    let metas: Vec<MetaItem> = from_cbor(&body)?;
    if metas.len() != 4 {
        err_at!(InvalidFile, msg: "expected 4 meta items, got {}", metas.len())?
    }

    let stats: Stats = match &metas[0] {
        MetaItem::Stats(data) => from_cbor(data)?,
        item => err_at!(InvalidFile, msg: "unexpected meta item {:?}", item)?,
    };
    let zones: Vec<ZoneSpan> = match &metas[1] {
        MetaItem::Zones(data) => from_cbor(data)?,
        item => err_at!(InvalidFile, msg: "unexpected meta item {:?}", item)?,
    };
    let blooms: Vec<SubtreeFilter> = match &metas[2] {
        MetaItem::Blooms(data) => from_cbor(data)?,
        item => err_at!(InvalidFile, msg: "unexpected meta item {:?}", item)?,
    };
    match &metas[3] {
        MetaItem::Marker(mrkr) if mrkr.as_slice() == ROOT_MARKER.as_slice() => (),
        item => err_at!(InvalidFile, msg: "invalid marker {:?}", item)?,
    }

    Ok((stats, zones, blooms))
}

#[cfg(test)]
#[path = "meta_test.rs"]
mod meta_test;
