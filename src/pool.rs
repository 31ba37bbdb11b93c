//! The message pool: a bounded, fixed-block allocator bounding dory's total
//! memory footprint (spec section 4.A).
//!
//! Blocks are handed out from a lock-free free-list, the same `coco::Stack`
//! the teacher uses for its self-telemetry queue in `source/internal.rs`.
//! Acquiring a block never allocates or blocks; when the free-list is
//! empty, callers see `None` and must discard the message they were about
//! to copy in, rather than growing memory without bound.

use coco::Stack;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// A fixed-capacity arena divided into equal-sized blocks.
pub struct Pool {
    arena: *mut u8,
    block_size: usize,
    num_blocks: usize,
    free: Stack<u32>,
    in_use: Vec<AtomicBool>,
    free_count: AtomicUsize,
}

// `arena` is a raw pointer into a `Box<[u8]>` we own for the lifetime of
// the `Pool`; blocks handed out via `BlockHandle` never overlap, so
// concurrent access from multiple threads to disjoint blocks is sound.
unsafe impl Send for Pool {}
unsafe impl Sync for Pool {}

impl Pool {
    /// Build a new pool with `capacity_bytes` total space divided into
    /// blocks of `block_size` bytes. `capacity_bytes` is rounded down to a
    /// whole number of blocks.
    pub fn new(capacity_bytes: usize, block_size: usize) -> Arc<Pool> {
        assert!(block_size > 0, "pool block size must be non-zero");
        let num_blocks = capacity_bytes / block_size;
        let mut storage = vec![0u8; num_blocks * block_size].into_boxed_slice();
        let arena = storage.as_mut_ptr();
        ::std::mem::forget(storage);

        let free = Stack::new();
        let mut in_use = Vec::with_capacity(num_blocks);
        for i in 0..num_blocks {
            free.push(i as u32);
            in_use.push(AtomicBool::new(false));
        }

        Arc::new(Pool {
            arena,
            block_size,
            num_blocks,
            free,
            in_use,
            free_count: AtomicUsize::new(num_blocks),
        })
    }

    /// Size, in bytes, of a single block.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Total capacity of the pool, in bytes.
    pub fn capacity_bytes(&self) -> usize {
        self.num_blocks * self.block_size
    }

    /// Free capacity remaining, in bytes. Approximate under concurrent
    /// acquire/release -- useful for status reporting, not for correctness.
    pub fn free_bytes(&self) -> usize {
        self.free_count.load(Ordering::Relaxed) * self.block_size
    }

    /// Try to acquire a block large enough to hold `needed` bytes. Returns
    /// `None` if `needed` exceeds the pool's block size, or if the
    /// free-list is currently empty.
    pub fn try_acquire(self: &Arc<Self>, needed: usize) -> Option<BlockHandle> {
        if needed > self.block_size {
            return None;
        }
        let index = self.free.pop()?;
        self.free_count.fetch_sub(1, Ordering::Relaxed);
        let was_free = !self.in_use[index as usize].swap(true, Ordering::AcqRel);
        debug_assert!(was_free, "pool handed out a block already marked in-use");
        Some(BlockHandle {
            pool: Arc::clone(self),
            index,
            len: needed,
        })
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        unsafe {
            let len = self.num_blocks * self.block_size;
            drop(Box::from_raw(::std::slice::from_raw_parts_mut(
                self.arena, len,
            )));
        }
    }
}

/// An owned handle to one acquired block. The block is returned to the
/// pool's free-list when the handle is dropped.
pub struct BlockHandle {
    pool: Arc<Pool>,
    index: u32,
    len: usize,
}

impl BlockHandle {
    /// Number of bytes actually in use within this block.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if this handle currently wraps zero used bytes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// View the used portion of the block.
    pub fn as_slice(&self) -> &[u8] {
        unsafe {
            let base = self.pool.arena.add(self.index as usize * self.pool.block_size);
            ::std::slice::from_raw_parts(base, self.len)
        }
    }

    /// Mutably view the used portion of the block.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe {
            let base = self.pool.arena.add(self.index as usize * self.pool.block_size);
            ::std::slice::from_raw_parts_mut(base, self.len)
        }
    }

    /// Copy `data` into the block, growing the handle's reported length.
    /// Panics if `data` does not fit in the block's capacity -- callers
    /// must check against `pool.block_size()` before acquiring.
    pub fn copy_from(&mut self, data: &[u8]) {
        assert!(data.len() <= self.pool.block_size);
        unsafe {
            let base = self.pool.arena.add(self.index as usize * self.pool.block_size);
            ptr::copy_nonoverlapping(data.as_ptr(), base, data.len());
        }
        self.len = data.len();
    }
}

impl Drop for BlockHandle {
    fn drop(&mut self) {
        let was_in_use = self.pool.in_use[self.index as usize].swap(false, Ordering::AcqRel);
        debug_assert!(was_in_use, "double free of pool block {}", self.index);
        self.pool.free.push(self.index);
        self.pool.free_count.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_and_release_round_trips_capacity() {
        let pool = Pool::new(4 * 1024, 1024);
        assert_eq!(pool.capacity_bytes(), 4096);
        assert_eq!(pool.free_bytes(), 4096);

        let handle = pool.try_acquire(100).expect("pool should have free blocks");
        assert_eq!(pool.free_bytes(), 3072);
        drop(handle);
        assert_eq!(pool.free_bytes(), 4096);
    }

    #[test]
    fn exhausted_pool_returns_none() {
        let pool = Pool::new(2 * 1024, 1024);
        let _a = pool.try_acquire(10).unwrap();
        let _b = pool.try_acquire(10).unwrap();
        assert!(pool.try_acquire(10).is_none());
    }

    #[test]
    fn oversized_request_is_rejected() {
        let pool = Pool::new(4 * 1024, 1024);
        assert!(pool.try_acquire(2048).is_none());
    }

    #[test]
    fn copy_from_and_as_slice_round_trip() {
        let pool = Pool::new(4 * 1024, 1024);
        let mut handle = pool.try_acquire(5).unwrap();
        handle.copy_from(b"hello");
        assert_eq!(handle.as_slice(), b"hello");
        assert_eq!(handle.len(), 5);
    }
}
