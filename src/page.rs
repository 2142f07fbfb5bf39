//! Module `page` implement the on-disk page frame and the metapage.
//!
//! Every data page carries an 8-byte header, an item-id table with a
//! single entry locating the payload, the payload itself and a fixed
//! opaque tail holding the tree level and the sibling links. All
//! multi-byte fields go through the explicit little-endian helpers
//! below; nothing in this crate casts page bytes to structs.

use std::fs;

use crate::{util, Error, Result};

/// Size of every page in the index file.
pub const PAGE_SIZE: usize = 8192;

/// Block number that marks "no block", used to terminate sibling chains.
pub const INVALID_BLOCK: u32 = u32::MAX;

/// Magic tag at offset 0 of the metapage.
pub const META_MAGIC: u32 = 0x4F52_4458; // "ORDX"

/// On-disk format version.
pub const META_VERSION: u16 = 1;

pub const HEADER_SIZE: usize = 8;
pub const ITEMID_SIZE: usize = 4;
pub const OPAQUE_SIZE: usize = 10;
pub const SPECIAL_OFF: usize = PAGE_SIZE - OPAQUE_SIZE;

/// Largest payload a single data page can carry.
pub const PAYLOAD_BUDGET: usize = SPECIAL_OFF - HEADER_SIZE - ITEMID_SIZE;

// header field offsets
const OFF_LOWER: usize = 0;
const OFF_UPPER: usize = 2;
const OFF_SPECIAL: usize = 4;

// opaque field offsets, relative to SPECIAL_OFF
const OPQ_LEVEL: usize = 0;
const OPQ_RIGHTLINK: usize = 2;
const OPQ_LEFTLINK: usize = 6;

#[inline]
pub fn read_u16_le(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([buf[off], buf[off + 1]])
}

#[inline]
pub fn write_u16_le(buf: &mut [u8], off: usize, val: u16) {
    buf[off..off + 2].copy_from_slice(&val.to_le_bytes());
}

#[inline]
pub fn read_u32_le(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

#[inline]
pub fn write_u32_le(buf: &mut [u8], off: usize, val: u32) {
    buf[off..off + 4].copy_from_slice(&val.to_le_bytes());
}

/// One page worth of bytes, owned. Scans keep at most one leaf pinned as
/// a [Page] at a time; the build keeps the previous leaf pinned until its
/// right-link is known.
pub struct Page {
    data: Box<[u8]>,
}

impl Page {
    /// Fresh page at tree `level`, empty payload, both sibling links invalid.
    pub fn new(level: u8) -> Page {
        let mut data = vec![0_u8; PAGE_SIZE].into_boxed_slice();
        write_u16_le(&mut data, OFF_LOWER, HEADER_SIZE as u16);
        write_u16_le(&mut data, OFF_UPPER, SPECIAL_OFF as u16);
        write_u16_le(&mut data, OFF_SPECIAL, SPECIAL_OFF as u16);
        data[SPECIAL_OFF + OPQ_LEVEL] = level;
        write_u32_le(&mut data, SPECIAL_OFF + OPQ_RIGHTLINK, INVALID_BLOCK);
        write_u32_le(&mut data, SPECIAL_OFF + OPQ_LEFTLINK, INVALID_BLOCK);
        Page { data }
    }

    pub fn from_bytes(data: Vec<u8>) -> Result<Page> {
        if data.len() != PAGE_SIZE {
            err_at!(CorruptPage, msg: "page is {} bytes, expected {}", data.len(), PAGE_SIZE)?
        }
        Ok(Page {
            data: data.into_boxed_slice(),
        })
    }

    /// Read block `block` from the index file.
    pub fn read(fd: &mut fs::File, block: u32) -> Result<Page> {
        let fpos = u64::from(block) * (PAGE_SIZE as u64);
        let data = util::read_exact_at(fd, fpos, PAGE_SIZE, "index block")?;
        Page::from_bytes(data)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.data.to_vec()
    }

    /// Install `payload` as the page's single line-pointer item.
    pub fn set_payload(&mut self, payload: &[u8]) -> Result<()> {
        if payload.len() > PAYLOAD_BUDGET {
            err_at!(
                Internal,
                msg: "payload {} bytes over page budget {}", payload.len(), PAYLOAD_BUDGET
            )?
        }
        let upper = SPECIAL_OFF - payload.len();
        self.data[upper..SPECIAL_OFF].copy_from_slice(payload);
        write_u16_le(&mut self.data, OFF_UPPER, upper as u16);
        write_u16_le(&mut self.data, OFF_LOWER, (HEADER_SIZE + ITEMID_SIZE) as u16);
        // single item-id right after the header: (offset, length)
        write_u16_le(&mut self.data, HEADER_SIZE, upper as u16);
        write_u16_le(&mut self.data, HEADER_SIZE + 2, payload.len() as u16);
        Ok(())
    }

    /// Locate the payload through the item-id table.
    pub fn payload(&self) -> Result<&[u8]> {
        let lower = read_u16_le(&self.data, OFF_LOWER) as usize;
        if lower < HEADER_SIZE + ITEMID_SIZE {
            err_at!(CorruptPage, msg: "page has no payload item, lower {}", lower)?
        }
        let off = read_u16_le(&self.data, HEADER_SIZE) as usize;
        let len = read_u16_le(&self.data, HEADER_SIZE + 2) as usize;
        let special = read_u16_le(&self.data, OFF_SPECIAL) as usize;
        if off < HEADER_SIZE + ITEMID_SIZE || off + len > special || special > PAGE_SIZE {
            err_at!(
                CorruptPage,
                msg: "payload item ({}, {}) outside page bounds, special {}", off, len, special
            )?
        }
        Ok(&self.data[off..off + len])
    }

    pub fn level(&self) -> u8 {
        self.data[SPECIAL_OFF + OPQ_LEVEL]
    }

    pub fn is_leaf(&self) -> bool {
        self.level() == 0
    }

    pub fn rightlink(&self) -> u32 {
        read_u32_le(&self.data, SPECIAL_OFF + OPQ_RIGHTLINK)
    }

    pub fn set_rightlink(&mut self, block: u32) {
        write_u32_le(&mut self.data, SPECIAL_OFF + OPQ_RIGHTLINK, block)
    }

    pub fn leftlink(&self) -> u32 {
        read_u32_le(&self.data, SPECIAL_OFF + OPQ_LEFTLINK)
    }

    pub fn set_leftlink(&mut self, block: u32) {
        write_u32_le(&mut self.data, SPECIAL_OFF + OPQ_LEFTLINK, block)
    }
}

/// Decoded metapage, block 0 of the index file. Written once when the
/// build commits, read-only thereafter.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Meta {
    pub nkeyatts: u16,
    pub key_len: [u16; 2],
    pub inc_len: Vec<u16>,
    pub bloom_enabled: bool,
    pub bloom_nhash: u8,
    pub root_block: u32,
    pub height: u16,
    pub zone_offset: u32,
}

impl Meta {
    pub fn encode(&self) -> Result<Page> {
        // fixed fields are 26 bytes, plus one u16 per INCLUDE width.
        let mut buf = vec![0_u8; 26 + 2 * self.inc_len.len()];
        let mut off = 0;
        write_u32_le(&mut buf, off, META_MAGIC);
        off += 4;
        write_u16_le(&mut buf, off, META_VERSION);
        off += 2;
        write_u16_le(&mut buf, off, self.nkeyatts);
        off += 2;
        write_u16_le(&mut buf, off, self.key_len[0]);
        off += 2;
        write_u16_le(&mut buf, off, self.key_len[1]);
        off += 2;
        write_u16_le(&mut buf, off, self.inc_len.len() as u16);
        off += 2;
        for len in self.inc_len.iter() {
            write_u16_le(&mut buf, off, *len);
            off += 2;
        }
        buf[off] = u8::from(self.bloom_enabled);
        off += 1;
        buf[off] = self.bloom_nhash;
        off += 1;
        write_u32_le(&mut buf, off, self.root_block);
        off += 4;
        write_u16_le(&mut buf, off, self.height);
        off += 2;
        write_u32_le(&mut buf, off, self.zone_offset);

        let mut page = Page::new(0);
        page.set_payload(&buf)?;
        Ok(page)
    }

    pub fn decode(page: &Page) -> Result<Meta> {
        let buf = page.payload()?;
        if buf.len() < 26 {
            err_at!(InvalidFile, msg: "metapage payload too short, {} bytes", buf.len())?
        }
        let magic = read_u32_le(buf, 0);
        if magic != META_MAGIC {
            err_at!(InvalidFile, msg: "bad magic {:x}, expected {:x}", magic, META_MAGIC)?
        }
        let version = read_u16_le(buf, 4);
        if version != META_VERSION {
            err_at!(InvalidFile, msg: "format version {}, supported {}", version, META_VERSION)?
        }
        let nkeyatts = read_u16_le(buf, 6);
        let key_len = [read_u16_le(buf, 8), read_u16_le(buf, 10)];
        let ninclude = read_u16_le(buf, 12) as usize;
        if buf.len() < 26 + 2 * ninclude {
            err_at!(InvalidFile, msg: "metapage truncated for {} includes", ninclude)?
        }
        let mut off = 14;
        let mut inc_len = Vec::with_capacity(ninclude);
        for _ in 0..ninclude {
            inc_len.push(read_u16_le(buf, off));
            off += 2;
        }
        let bloom_enabled = buf[off] != 0;
        off += 1;
        let bloom_nhash = buf[off];
        off += 1;
        let root_block = read_u32_le(buf, off);
        off += 4;
        let height = read_u16_le(buf, off);
        off += 2;
        let zone_offset = read_u32_le(buf, off);

        Ok(Meta {
            nkeyatts,
            key_len,
            inc_len,
            bloom_enabled,
            bloom_nhash,
            root_block,
            height,
            zone_offset,
        })
    }
}

#[cfg(test)]
#[path = "page_test.rs"]
mod page_test;
