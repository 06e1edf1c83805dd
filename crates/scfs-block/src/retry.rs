//! Whole-transfer wrappers around [`BackingStore`] positional I/O.
//!
//! Partial transfers are accumulated. `Interrupted`, `WouldBlock` and
//! zero-length transfers count as a stall; any progress resets the stall
//! counter. `retry_limit` consecutive stalls fail the transfer with
//! [`ScfsError::TooManyRetries`]. Every other I/O error is returned at once.

use crate::BackingStore;
use scfs_error::{Result, ScfsError};
use std::io;
use tracing::{trace, warn};

/// Consecutive stalled attempts tolerated before giving up.
pub const DEFAULT_RETRY_LIMIT: u32 = 32;

enum Step {
    Progress(usize),
    Stall,
}

fn classify(result: io::Result<usize>) -> Result<Step> {
    match result {
        Ok(0) => Ok(Step::Stall),
        Ok(n) => Ok(Step::Progress(n)),
        Err(err)
            if matches!(
                err.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
            ) =>
        {
            Ok(Step::Stall)
        }
        Err(err) => Err(ScfsError::Io(err)),
    }
}

fn transfer(
    op: &'static str,
    offset: u64,
    len: usize,
    retry_limit: u32,
    mut attempt: impl FnMut(u64, usize) -> io::Result<usize>,
) -> Result<()> {
    let mut done = 0_usize;
    let mut stalls = 0_u32;
    while done < len {
        let pos = offset + done as u64;
        match classify(attempt(pos, done))? {
            Step::Progress(n) => {
                done += n;
                stalls = 0;
            }
            Step::Stall => {
                stalls += 1;
                trace!(target: "scfs::io", op, offset = pos, stalls, "transfer_stalled");
                if stalls >= retry_limit {
                    warn!(
                        target: "scfs::io",
                        op,
                        offset = pos,
                        done,
                        len,
                        attempts = stalls,
                        "transfer gave up after repeated stalls"
                    );
                    return Err(ScfsError::TooManyRetries {
                        op,
                        offset: pos,
                        attempts: stalls,
                    });
                }
                std::thread::yield_now();
            }
        }
    }
    Ok(())
}

/// Read exactly `buf.len()` bytes at `offset`.
pub fn read_exact_at<S: BackingStore + ?Sized>(
    store: &S,
    offset: u64,
    buf: &mut [u8],
    retry_limit: u32,
) -> Result<()> {
    let len = buf.len();
    transfer("read", offset, len, retry_limit, |pos, done| {
        store.read_at(pos, &mut buf[done..])
    })
}

/// Write all of `buf` at `offset`.
pub fn write_all_at<S: BackingStore + ?Sized>(
    store: &S,
    offset: u64,
    buf: &[u8],
    retry_limit: u32,
) -> Result<()> {
    transfer("write", offset, buf.len(), retry_limit, |pos, done| {
        store.write_at(pos, &buf[done..])
    })
}
