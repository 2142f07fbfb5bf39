//! Module `flush` implement the append-only block writer.

use fs2::FileExt;

use std::{convert::TryFrom, ffi, fs, io::Write, path, sync::mpsc, thread};

use crate::{Error, Result};

// one queued write: a block image and a channel to acknowledge the new
// end-of-file position.
type WriteReq = (Vec<u8>, mpsc::Sender<u64>);

/// Append-only writer for the index file. Blocks queue over a bounded
/// channel to a dedicated thread so the build keeps encoding while
/// earlier blocks drain to disk. An index is written exactly once,
/// front to back; there is nothing to resume or append to.
pub struct Flusher {
    loc: ffi::OsString,
    fpos: u64,
    tx: Option<mpsc::SyncSender<WriteReq>>,
    handle: Option<thread::JoinHandle<Result<u64>>>,
}

impl Flusher {
    /// Start the index file fresh, replacing any previous build, and
    /// spawn the writer thread over it.
    pub fn new(loc: &ffi::OsStr, queue_size: usize) -> Result<Flusher> {
        let fd = {
            let p = path::Path::new(loc);
            fs::remove_file(p).ok(); // NOTE: ignore remove errors.
            if let Some(parent) = p.parent() {
                if !parent.as_os_str().is_empty() {
                    err_at!(IOError, fs::create_dir_all(parent))?;
                }
            }
            let mut opts = fs::OpenOptions::new();
            err_at!(
                IOError,
                opts.append(true).create_new(true).open(p),
                "creating {:?}",
                loc
            )?
        };

        let (tx, rx) = mpsc::sync_channel(queue_size);
        let thread_loc = loc.to_os_string();
        let handle = thread::spawn(move || write_loop(thread_loc, fd, rx));

        Ok(Flusher {
            loc: loc.to_os_string(),
            fpos: 0,
            tx: Some(tx),
            handle: Some(handle),
        })
    }

    pub fn to_location(&self) -> ffi::OsString {
        self.loc.clone()
    }

    // file position after everything flushed so far.
    pub fn to_fpos(&self) -> u64 {
        self.fpos
    }

    /// Queue one block and wait for the writer's acknowledgement, which
    /// carries the file position the next block will land at.
    pub fn flush(&mut self, block: Vec<u8>) -> Result<()> {
        let tx = match &self.tx {
            Some(tx) => tx,
            None => err_at!(Internal, msg: "flush on a closed flusher for {:?}", self.loc)?,
        };
        let (ack_tx, ack_rx) = mpsc::channel();
        err_at!(IPCFail, tx.send((block, ack_tx)))?;
        self.fpos = err_at!(IPCFail, ack_rx.recv())?;
        Ok(())
    }

    /// Disconnect the queue, let the writer drain and sync, and return
    /// the final file length.
    pub fn close(&mut self) -> Result<u64> {
        self.tx.take();
        match self.handle.take() {
            Some(handle) => match handle.join() {
                Ok(res) => res,
                Err(err) => err_at!(ThreadFail, msg: "writer thread panicked {:?}", err),
            },
            None => Ok(self.fpos),
        }
    }
}

impl Drop for Flusher {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            handle.join().ok();
        }
    }
}

// the writer thread: append blocks until the queue disconnects, then
// sync everything to disk. The shared lock keeps a concurrent purge
// from deleting the file mid-build.
fn write_loop(loc: ffi::OsString, mut fd: fs::File, rx: mpsc::Receiver<WriteReq>) -> Result<u64> {
    err_at!(IOError, fd.lock_shared(), "locking {:?}", loc)?;

    let mut fpos = 0_u64;
    for (block, ack) in rx {
        let n = err_at!(IOError, fd.write(&block), "appending to {:?}", loc)?;
        if n != block.len() {
            err_at!(IOError, msg: "partial append {}/{} to {:?}", n, block.len(), loc)?
        }
        fpos += err_at!(FailConvert, u64::try_from(n))?;
        ack.send(fpos).ok();
    }

    err_at!(IOError, fd.sync_all(), "syncing {:?}", loc)?;
    err_at!(IOError, fd.unlock(), "unlocking {:?}", loc)?;
    Ok(fpos)
}

#[cfg(test)]
#[path = "flush_test.rs"]
mod flush_test;
