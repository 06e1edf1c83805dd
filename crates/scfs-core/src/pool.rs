//! Bounded pool of per-file scratch buffer pairs.
//!
//! Each pair holds one plaintext region (the buffered cluster) and one
//! compressed region (codec output), both allocated once with a fixed
//! capacity. At most `capacity` pairs exist; `acquire` blocks on a condvar
//! until another file returns its pair.

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

#[derive(Debug)]
struct ScratchPair {
    plain: Vec<u8>,
    comp: Vec<u8>,
}

#[derive(Debug)]
struct PoolState {
    free: Vec<ScratchPair>,
    /// Pairs ever allocated (free + handed out).
    created: usize,
    handed_out: usize,
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub capacity: usize,
    pub in_use: usize,
    /// Pairs that can be handed out without blocking.
    pub available: usize,
    /// Number of `acquire` calls that had to block.
    pub waits: u64,
}

pub struct BufferPool {
    state: Mutex<PoolState>,
    returned: Condvar,
    capacity: usize,
    plain_capacity: usize,
    comp_capacity: usize,
    waits: AtomicU64,
}

impl BufferPool {
    #[must_use]
    pub fn new(capacity: usize, plain_capacity: usize, comp_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(PoolState {
                free: Vec::with_capacity(capacity),
                created: 0,
                handed_out: 0,
            }),
            returned: Condvar::new(),
            capacity: capacity.max(1),
            plain_capacity,
            comp_capacity,
            waits: AtomicU64::new(0),
        })
    }

    /// Take a buffer pair, blocking while the pool is exhausted.
    #[must_use]
    pub fn acquire(self: &Arc<Self>) -> PooledBuffers {
        let mut state = self.state.lock();
        let mut counted = false;
        loop {
            if let Some(pair) = self.take_locked(&mut state) {
                drop(state);
                return PooledBuffers {
                    pair: Some(pair),
                    pool: Arc::clone(self),
                };
            }
            if !counted {
                self.waits.fetch_add(1, Ordering::Relaxed);
                counted = true;
                trace!(target: "scfs::pool", capacity = self.capacity, "buffer_pool_exhausted");
            }
            self.returned.wait(&mut state);
        }
    }

    /// Take a buffer pair if one is available right now.
    #[must_use]
    pub fn try_acquire(self: &Arc<Self>) -> Option<PooledBuffers> {
        let mut state = self.state.lock();
        let pair = self.take_locked(&mut state)?;
        drop(state);
        Some(PooledBuffers {
            pair: Some(pair),
            pool: Arc::clone(self),
        })
    }

    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            capacity: self.capacity,
            in_use: state.handed_out,
            available: self.capacity - state.handed_out,
            waits: self.waits.load(Ordering::Relaxed),
        }
    }

    fn take_locked(&self, state: &mut PoolState) -> Option<ScratchPair> {
        let pair = if let Some(pair) = state.free.pop() {
            pair
        } else if state.created < self.capacity {
            state.created += 1;
            ScratchPair {
                plain: Vec::with_capacity(self.plain_capacity),
                comp: Vec::with_capacity(self.comp_capacity),
            }
        } else {
            return None;
        };
        state.handed_out += 1;
        Some(pair)
    }

    fn give_back(&self, mut pair: ScratchPair) {
        pair.plain.clear();
        pair.comp.clear();
        let mut state = self.state.lock();
        state.handed_out -= 1;
        state.free.push(pair);
        drop(state);
        self.returned.notify_one();
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("stats", &self.stats())
            .field("plain_capacity", &self.plain_capacity)
            .field("comp_capacity", &self.comp_capacity)
            .finish_non_exhaustive()
    }
}

/// A plaintext/compressed scratch pair on loan from a [`BufferPool`].
///
/// Returned to the pool (cleared) on drop.
pub struct PooledBuffers {
    pair: Option<ScratchPair>,
    pool: Arc<BufferPool>,
}

impl PooledBuffers {
    fn pair(&self) -> &ScratchPair {
        // Only `Drop` takes the pair out.
        self.pair.as_ref().unwrap_or_else(|| unreachable!("pooled pair taken before drop"))
    }

    fn pair_mut(&mut self) -> &mut ScratchPair {
        self.pair.as_mut().unwrap_or_else(|| unreachable!("pooled pair taken before drop"))
    }

    #[must_use]
    pub fn plain(&self) -> &[u8] {
        &self.pair().plain
    }

    pub fn plain_mut(&mut self) -> &mut Vec<u8> {
        &mut self.pair_mut().plain
    }

    /// Both regions at once: `(plaintext, compressed)`.
    pub fn split_mut(&mut self) -> (&mut Vec<u8>, &mut Vec<u8>) {
        let pair = self.pair_mut();
        (&mut pair.plain, &mut pair.comp)
    }
}

impl Drop for PooledBuffers {
    fn drop(&mut self) {
        if let Some(pair) = self.pair.take() {
            self.pool.give_back(pair);
        }
    }
}

impl fmt::Debug for PooledBuffers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffers")
            .field("plain_len", &self.plain().len())
            .finish_non_exhaustive()
    }
}
