//! Caller-supplied memory pool for instance and scratch buffers
//!
//! The runtime performs exactly two allocations per session lifetime: one
//! block sized to the backend-reported instance size and, when the backend
//! reports a non-zero requirement, one block sized to the scratch size.
//! Size queries never allocate. The pool owns the backing storage; the
//! session exclusively owns the blocks between `allocate` and `release`.
//!
//! Blocks are word-aligned so engine state structs can be overlaid on them
//! with `bytemuck` without copying.

use std::sync::atomic::{AtomicUsize, Ordering};

/// A word-aligned block of pool storage.
///
/// The block remembers the byte size it was requested with; the backing
/// length is rounded up to whole 32-bit words.
#[derive(Debug)]
pub struct PoolBlock {
    words: Box<[u32]>,
    size: usize,
}

impl PoolBlock {
    /// Create a zeroed block of at least `size` bytes.
    pub fn new_zeroed(size: usize) -> Self {
        let words = vec![0u32; size.div_ceil(4)].into_boxed_slice();
        Self { words, size }
    }

    /// Requested size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// The block contents as bytes (word-aligned).
    pub fn bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.words)
    }

    /// The block contents as mutable bytes (word-aligned).
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        bytemuck::cast_slice_mut(&mut self.words)
    }

    /// Zero the block contents.
    pub fn clear(&mut self) {
        self.words.fill(0);
    }
}

/// Memory pool supplied by the caller.
///
/// `allocate` returns `None` on exhaustion; the session surfaces that as a
/// runtime error. `release` hands a block back to the pool. Each block is
/// released at most once — the session guards against double release — and
/// a block is never touched after release.
pub trait MemoryPool: Send + Sync {
    /// Allocate a zeroed block of at least `size` bytes.
    fn allocate(&self, size: usize) -> Option<PoolBlock>;

    /// Return a block to the pool.
    fn release(&self, block: PoolBlock);
}

/// Heap-backed pool with allocation counters.
///
/// The default pool for callers without a dedicated arena. The counters
/// exist so resource-discipline tests (and callers) can observe that the
/// two-allocation contract holds.
#[derive(Debug, Default)]
pub struct HeapPool {
    allocated: AtomicUsize,
    released: AtomicUsize,
}

impl HeapPool {
    /// Create a new heap pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blocks handed out so far.
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Number of blocks returned so far.
    pub fn released(&self) -> usize {
        self.released.load(Ordering::Relaxed)
    }

    /// Number of blocks currently owned by sessions.
    pub fn outstanding(&self) -> usize {
        self.allocated() - self.released()
    }
}

impl MemoryPool for HeapPool {
    fn allocate(&self, size: usize) -> Option<PoolBlock> {
        if size == 0 {
            return None;
        }
        self.allocated.fetch_add(1, Ordering::Relaxed);
        Some(PoolBlock::new_zeroed(size))
    }

    fn release(&self, block: PoolBlock) {
        self.released.fetch_add(1, Ordering::Relaxed);
        drop(block);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_rounds_up_to_words() {
        let mut block = PoolBlock::new_zeroed(10);
        assert_eq!(block.size(), 10);
        assert_eq!(block.bytes_mut().len(), 12);
        assert!(block.bytes_mut().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_block_alignment() {
        let mut block = PoolBlock::new_zeroed(64);
        let ptr = block.bytes_mut().as_ptr() as usize;
        assert_eq!(ptr % 4, 0);
    }

    #[test]
    fn test_heap_pool_counters() {
        let pool = HeapPool::new();
        let a = pool.allocate(128).unwrap();
        let b = pool.allocate(256).unwrap();
        assert_eq!(pool.allocated(), 2);
        assert_eq!(pool.outstanding(), 2);

        pool.release(a);
        pool.release(b);
        assert_eq!(pool.released(), 2);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_zero_size_allocation_refused() {
        let pool = HeapPool::new();
        assert!(pool.allocate(0).is_none());
        assert_eq!(pool.allocated(), 0);
    }
}
