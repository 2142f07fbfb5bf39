//! Module implement common utility functions and types.

use std::{ffi, fs, path};

use crate::{Error, Result};

pub mod spinlock;

pub use spinlock::Spinlock;

/// Read exactly `n` bytes at absolute file position `fpos`, typically
/// one page frame or the metadata region. The index file is written
/// once and never truncated, so a short read here is corruption rather
/// than an end-of-file condition.
pub fn read_exact_at(fd: &mut fs::File, fpos: u64, n: usize, what: &str) -> Result<Vec<u8>> {
    use std::io::{Read, Seek, SeekFrom};

    err_at!(IOError, fd.seek(SeekFrom::Start(fpos)))?;
    let mut buf = vec![0; n];
    err_at!(CorruptPage, fd.read_exact(&mut buf), "{} truncated at fpos {}", what, fpos)?;
    Ok(buf)
}

/// Open an existing index file, read-only for scans and metadata,
/// writable for the build's in-place metapage commit.
pub fn open_index_file(file: &ffi::OsStr, writable: bool) -> Result<fs::File> {
    let mut opts = fs::OpenOptions::new();
    opts.read(true).write(writable);
    err_at!(IOError, opts.open(path::Path::new(file)), "opening {:?}", file)
}

/// Write `data` at absolute position `fpos` and sync the file to disk.
pub fn write_at(file: &mut fs::File, fpos: u64, data: &[u8]) -> Result<usize> {
    use std::io::{Seek, SeekFrom, Write};

    err_at!(IOError, file.seek(SeekFrom::Start(fpos)))?;
    let n = err_at!(IOError, file.write(data))?;
    if n != data.len() {
        err_at!(IOError, msg: "partial write to file {} {}", n, data.len())?
    }
    err_at!(IOError, file.sync_all())?;
    Ok(n)
}
