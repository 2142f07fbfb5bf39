//! Type vocabulary for the index: key types, datum values, descriptors.
//!
//! Keys and INCLUDE payloads are stored as fixed-width byte strings; the
//! [KeyType] of an attribute fixes both the byte width and the total order
//! used by the build-time sort and the scan-time bound comparator.

use cbordata::Cborize;
use chrono::{NaiveDate, NaiveDateTime};
use uuid::Uuid;

use std::{cmp::Ordering, convert::TryFrom, sync::Arc};

use crate::{Error, Result};

/// Maximum byte budget for a text key, attribute 1 only.
pub const TEXT_BUDGET_MAX: usize = 32;

/// Maximum number of INCLUDE columns per index.
pub const INCLUDE_MAX: usize = 8;

const KEY_TYPE_VER: u32 = 0x00010001;
const COLLATION_VER: u32 = 0x00010001;

/// Supported attribute types. All of them are fixed-width on disk; text
/// is padded with trailing zero bytes to its declared budget.
#[derive(Clone, Debug, Eq, PartialEq, Cborize)]
pub enum KeyType {
    Int2,
    Int4,
    Int8,
    Uuid,
    Date,
    Timestamp,
    /// Fixed-budget text, budget in bytes, must be <= [TEXT_BUDGET_MAX].
    Text(usize),
}

impl KeyType {
    const ID: u32 = KEY_TYPE_VER;

    /// On-disk width of a value of this type, in bytes.
    pub fn width(&self) -> usize {
        match self {
            KeyType::Int2 => 2,
            KeyType::Int4 => 4,
            KeyType::Int8 => 8,
            KeyType::Uuid => 16,
            KeyType::Date => 4,
            KeyType::Timestamp => 8,
            KeyType::Text(budget) => *budget,
        }
    }

    /// Text is stored fixed-width but read back variable length.
    pub fn is_varwidth(&self) -> bool {
        matches!(self, KeyType::Text(_))
    }
}

/// Collation for text attributes. Non-text attributes ignore collation.
#[derive(Clone, Debug, Eq, PartialEq, Cborize)]
pub enum Collation {
    /// Byte-wise ordering, compare with memcmp up to the first zero byte.
    C,
    /// Named locale ordering, dispatched to the plugged comparator proc.
    Locale(String),
}

impl Collation {
    const ID: u32 = COLLATION_VER;
}

/// Comparator proc plugged in by the host for locale-collated text.
/// Receives raw, zero-stripped key bytes for both operands.
pub type CmpProc = Arc<dyn Fn(&[u8], &[u8]) -> Ordering + Send + Sync>;

/// A single typed value, as supplied by the host row stream or a scan bound.
#[derive(Clone, Debug, PartialEq)]
pub enum Datum {
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Uuid(Uuid),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    Text(String),
}

impl Datum {
    /// Encode this value into its fixed-width byte form. `buf` must be
    /// exactly `ty.width()` bytes.
    pub fn encode_into(&self, ty: &KeyType, buf: &mut [u8]) -> Result<()> {
        if buf.len() != ty.width() {
            return err_at!(Internal, msg: "datum buf {} != width {}", buf.len(), ty.width());
        }
        match (self, ty) {
            (Datum::Int2(v), KeyType::Int2) => buf.copy_from_slice(&v.to_le_bytes()),
            (Datum::Int4(v), KeyType::Int4) => buf.copy_from_slice(&v.to_le_bytes()),
            (Datum::Int8(v), KeyType::Int8) => buf.copy_from_slice(&v.to_le_bytes()),
            (Datum::Uuid(v), KeyType::Uuid) => buf.copy_from_slice(v.as_bytes()),
            (Datum::Date(v), KeyType::Date) => {
                let days = days_since_epoch(v)?;
                buf.copy_from_slice(&days.to_le_bytes())
            }
            (Datum::Timestamp(v), KeyType::Timestamp) => {
                let micros = micros_since_epoch(v);
                buf.copy_from_slice(&micros.to_le_bytes())
            }
            (Datum::Text(v), KeyType::Text(budget)) => {
                let bytes = v.as_bytes();
                if bytes.len() > *budget {
                    err_at!(
                        UnsupportedType,
                        msg: "text value {} bytes over budget {}", bytes.len(), budget
                    )?
                }
                buf[..bytes.len()].copy_from_slice(bytes);
                for b in buf[bytes.len()..].iter_mut() {
                    *b = 0
                }
            }
            (_, _) => err_at!(
                UnsupportedType, msg: "datum {:?} does not match column type {:?}", self, ty
            )?,
        }
        Ok(())
    }

    /// Decode a fixed-width byte form back into a value. For text, trailing
    /// zero bytes are stripped.
    pub fn decode(ty: &KeyType, buf: &[u8]) -> Result<Datum> {
        if buf.len() != ty.width() {
            return err_at!(Internal, msg: "datum buf {} != width {}", buf.len(), ty.width());
        }
        let val = match ty {
            KeyType::Int2 => Datum::Int2(i16::from_le_bytes(take_2(buf)?)),
            KeyType::Int4 => Datum::Int4(i32::from_le_bytes(take_4(buf)?)),
            KeyType::Int8 => Datum::Int8(i64::from_le_bytes(take_8(buf)?)),
            KeyType::Uuid => {
                let mut bytes = [0_u8; 16];
                bytes.copy_from_slice(buf);
                Datum::Uuid(Uuid::from_bytes(bytes))
            }
            KeyType::Date => {
                let days = i32::from_le_bytes(take_4(buf)?);
                Datum::Date(date_from_epoch_days(days)?)
            }
            KeyType::Timestamp => {
                let micros = i64::from_le_bytes(take_8(buf)?);
                Datum::Timestamp(timestamp_from_micros(micros)?)
            }
            KeyType::Text(_) => {
                let n = buf.iter().position(|b| *b == 0).unwrap_or(buf.len());
                let text = err_at!(FailConvert, std::str::from_utf8(&buf[..n]))?;
                Datum::Text(text.to_string())
            }
        };
        Ok(val)
    }
}

fn take_2(buf: &[u8]) -> Result<[u8; 2]> {
    err_at!(FailConvert, <[u8; 2]>::try_from(buf))
}

fn take_4(buf: &[u8]) -> Result<[u8; 4]> {
    err_at!(FailConvert, <[u8; 4]>::try_from(buf))
}

fn take_8(buf: &[u8]) -> Result<[u8; 8]> {
    err_at!(FailConvert, <[u8; 8]>::try_from(buf))
}

fn epoch_date() -> NaiveDate {
    NaiveDate::from_ymd(1970, 1, 1)
}

fn days_since_epoch(d: &NaiveDate) -> Result<i32> {
    let days = d.signed_duration_since(epoch_date()).num_days();
    err_at!(FailConvert, i32::try_from(days))
}

fn date_from_epoch_days(days: i32) -> Result<NaiveDate> {
    match epoch_date().checked_add_signed(chrono::Duration::days(i64::from(days))) {
        Some(d) => Ok(d),
        None => err_at!(CorruptPage, msg: "date {} days out of range", days),
    }
}

fn micros_since_epoch(t: &NaiveDateTime) -> i64 {
    t.timestamp() * 1_000_000 + i64::from(t.timestamp_subsec_micros())
}

fn timestamp_from_micros(micros: i64) -> Result<NaiveDateTime> {
    let secs = micros.div_euclid(1_000_000);
    let nsecs = (micros.rem_euclid(1_000_000) * 1_000) as u32;
    match NaiveDateTime::from_timestamp_opt(secs, nsecs) {
        Some(t) => Ok(t),
        None => err_at!(CorruptPage, msg: "timestamp {} micros out of range", micros),
    }
}

/// One incoming row from the host table: values with their null flags,
/// key attributes first, INCLUDE attributes after.
#[derive(Clone, Debug)]
pub struct Row {
    pub values: Vec<Datum>,
    pub isnull: Vec<bool>,
}

impl Row {
    pub fn new(values: Vec<Datum>) -> Row {
        let isnull = vec![false; values.len()];
        Row { values, isnull }
    }

    /// Mark attribute `attno` (1-based) as null. Builds over such rows fail.
    pub fn set_null(mut self, attno: usize) -> Row {
        self.isnull[attno - 1] = true;
        self
    }
}

/// One key attribute of the index descriptor.
#[derive(Clone)]
pub struct KeyAttr {
    pub ty: KeyType,
    pub collation: Collation,
    /// Comparator proc for [Collation::Locale] text; ignored otherwise.
    pub proc: Option<CmpProc>,
}

impl KeyAttr {
    pub fn new(ty: KeyType) -> KeyAttr {
        KeyAttr {
            ty,
            collation: Collation::C,
            proc: None,
        }
    }

    pub fn set_collation(mut self, collation: Collation, proc: Option<CmpProc>) -> KeyAttr {
        self.collation = collation;
        self.proc = proc;
        self
    }
}

/// One INCLUDE attribute of the index descriptor.
#[derive(Clone)]
pub struct InclAttr {
    pub ty: KeyType,
}

/// Index descriptor: one or two key attributes plus INCLUDE payload
/// attributes, as handed over by the host's DDL surface.
#[derive(Clone)]
pub struct IndexDescr {
    pub keys: Vec<KeyAttr>,
    pub includes: Vec<InclAttr>,
}

impl IndexDescr {
    /// Single-column descriptor.
    pub fn single(key: KeyAttr) -> IndexDescr {
        IndexDescr {
            keys: vec![key],
            includes: vec![],
        }
    }

    /// Two-column descriptor. INCLUDE columns are not supported with two
    /// key attributes.
    pub fn pair(k1: KeyAttr, k2: KeyAttr) -> IndexDescr {
        IndexDescr {
            keys: vec![k1, k2],
            includes: vec![],
        }
    }

    /// Add an INCLUDE attribute.
    pub fn set_include(&mut self, ty: KeyType) -> &mut Self {
        self.includes.push(InclAttr { ty });
        self
    }

    pub fn nkeyatts(&self) -> usize {
        self.keys.len()
    }

    pub fn nattrs(&self) -> usize {
        self.keys.len() + self.includes.len()
    }

    pub fn key_len(&self, i: usize) -> usize {
        self.keys[i].ty.width()
    }

    pub fn inc_len(&self, i: usize) -> usize {
        self.includes[i].ty.width()
    }

    /// Total fixed-width byte length of one stored row.
    pub fn row_len(&self) -> usize {
        let keys: usize = self.keys.iter().map(|k| k.ty.width()).sum();
        let incs: usize = self.includes.iter().map(|i| i.ty.width()).sum();
        keys + incs
    }

    /// Check the descriptor against what the engine supports.
    pub fn validate(&self) -> Result<()> {
        match self.keys.len() {
            1 | 2 => (),
            n => err_at!(InvalidInput, msg: "ordix supports 1 or 2 key attributes, got {}", n)?,
        }
        if let KeyType::Text(budget) = &self.keys[0].ty {
            if *budget == 0 || *budget > TEXT_BUDGET_MAX {
                err_at!(
                    UnsupportedType,
                    msg: "attribute 1 text budget {} outside 1..={}", budget, TEXT_BUDGET_MAX
                )?
            }
        }
        for (i, key) in self.keys.iter().enumerate().skip(1) {
            if key.ty.is_varwidth() {
                err_at!(
                    UnsupportedType,
                    msg: "key attribute {} must be fixed-width, got {:?}", i + 1, key.ty
                )?
            }
        }
        if self.keys.len() == 2 && !self.includes.is_empty() {
            err_at!(
                UnsupportedType,
                msg: "INCLUDE columns are not supported on two-column indexes"
            )?
        }
        if self.includes.len() > INCLUDE_MAX {
            err_at!(
                UnsupportedType,
                msg: "{} INCLUDE columns over the limit {}", self.includes.len(), INCLUDE_MAX
            )?
        }
        for (i, inc) in self.includes.iter().enumerate() {
            if inc.ty.is_varwidth() {
                err_at!(
                    UnsupportedType,
                    msg: "INCLUDE attribute {} must be fixed-width, got {:?}",
                    self.keys.len() + i + 1,
                    inc.ty
                )?
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "types_test.rs"]
mod types_test;
