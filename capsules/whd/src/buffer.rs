// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2026.

//! Packet buffers shared between the radio driver and the network stack.
//!
//! A [`PacketBuffer`] owns its backing storage and presents a movable window
//! over it, in the spirit of a leasable buffer: the radio driver can reserve
//! header room in front of the payload and later hand the same allocation to a
//! lower layer which reclaims that room for its own headers, without copying.
//!
//! ```text
//!  0           offset          offset + size       capacity
//!  |-- headroom --|---- visible ----|---- tailroom ----|
//! ```
//!
//! Buffers come from one of two backing stores:
//!
//! - the general heap, for TX buffers and for RX buffers when no native pool
//!   is configured. Heap allocation never blocks and never panics on
//!   exhaustion, it returns [`ErrorCode::NOMEM`].
//! - a [`PacketPool`] of fixed-size blocks, for RX buffers. RX buffers are
//!   consumed by the network stack, so they are carved from a pool whose
//!   lifecycle the stack understands.
//!
//! Which store owns a buffer is part of its type ([`PacketBuffer::is_pooled`]),
//! and the storage goes back to its origin exactly once: either through
//! [`BufferManager::release`], which takes the buffer by value, or when the
//! buffer is dropped.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use log::{trace, warn};

use crate::ErrorCode;

/// Direction of a buffer relative to the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Received from the radio, travelling towards the network stack.
    Rx,
    /// Produced by the host, travelling towards the radio.
    Tx,
}

/// A fixed-size block pool standing in for the network stack's native packet
/// buffers.
pub struct PacketPool {
    block_size: usize,
    count: usize,
    free: Mutex<Vec<Box<[u8]>>>,
}

impl PacketPool {
    pub fn new(block_size: usize, count: usize) -> Arc<PacketPool> {
        let free = (0..count)
            .map(|_| vec![0u8; block_size].into_boxed_slice())
            .collect();
        Arc::new(PacketPool {
            block_size,
            count,
            free: Mutex::new(free),
        })
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Total number of blocks owned by the pool.
    pub fn capacity(&self) -> usize {
        self.count
    }

    /// Number of blocks currently free.
    pub fn available(&self) -> usize {
        self.free.lock().map(|free| free.len()).unwrap_or(0)
    }

    fn take(&self, size: usize) -> Result<Box<[u8]>, ErrorCode> {
        if size > self.block_size {
            return Err(ErrorCode::NOMEM);
        }
        let mut free = self.free.lock().map_err(|_| ErrorCode::FAIL)?;
        free.pop().ok_or(ErrorCode::NOMEM)
    }

    fn give(&self, block: Box<[u8]>) {
        match self.free.lock() {
            Ok(mut free) => free.push(block),
            // A poisoned pool cannot be handed blocks back safely; the block
            // is freed instead.
            Err(_) => warn!("packet pool poisoned, dropping block"),
        }
    }
}

/// Allocation counters shared by a manager and every buffer it hands out.
struct Ledger {
    allocations: AtomicUsize,
    releases: AtomicUsize,
    heap_in_use: AtomicUsize,
    heap_limit: Option<usize>,
}

impl Ledger {
    fn reserve_heap(&self, bytes: usize) -> Result<(), ErrorCode> {
        let previous = self.heap_in_use.fetch_add(bytes, Ordering::AcqRel);
        if let Some(limit) = self.heap_limit {
            if previous + bytes > limit {
                self.heap_in_use.fetch_sub(bytes, Ordering::AcqRel);
                return Err(ErrorCode::NOMEM);
            }
        }
        Ok(())
    }
}

enum Storage {
    Heap(Box<[u8]>),
    Pool {
        block: Box<[u8]>,
        pool: Arc<PacketPool>,
    },
}

impl Storage {
    fn bytes(&self) -> &[u8] {
        match self {
            Storage::Heap(block) => block,
            Storage::Pool { block, .. } => block,
        }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        match self {
            Storage::Heap(block) => block,
            Storage::Pool { block, .. } => block,
        }
    }
}

/// An owned packet buffer with a movable visible window.
pub struct PacketBuffer {
    storage: Storage,
    offset: usize,
    size: usize,
    ledger: Arc<Ledger>,
}

impl PacketBuffer {
    /// The visible bytes.
    pub fn data(&self) -> &[u8] {
        &self.storage.bytes()[self.offset..self.offset + self.size]
    }

    /// The visible bytes, mutably.
    pub fn data_mut(&mut self) -> &mut [u8] {
        let (offset, size) = (self.offset, self.size);
        &mut self.storage.bytes_mut()[offset..offset + size]
    }

    /// Length of the visible window.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Bytes of the allocation, headroom and tailroom included.
    pub fn capacity(&self) -> usize {
        self.storage.bytes().len()
    }

    /// Bytes currently hidden in front of the visible window.
    pub fn front_offset(&self) -> usize {
        self.offset
    }

    /// Whether the buffer was carved from a native packet pool.
    pub fn is_pooled(&self) -> bool {
        matches!(self.storage, Storage::Pool { .. })
    }

    /// Grow or shrink the visible window at its end.
    ///
    /// Fails with [`ErrorCode::SIZE`] if the window would extend past the
    /// allocation. The buffer is not modified on failure.
    pub fn set_size(&mut self, size: usize) -> Result<(), ErrorCode> {
        if self.offset + size > self.capacity() {
            return Err(ErrorCode::SIZE);
        }
        self.size = size;
        Ok(())
    }

    /// Move the start of the visible window by `delta` bytes.
    ///
    /// A positive `delta` hides bytes at the front (consuming the payload
    /// into headroom), a negative `delta` exposes previously hidden headroom.
    /// The visible size changes by `-delta`. Fails with
    /// [`ErrorCode::UNDERFLOW`] if either the offset or the size would become
    /// negative; the buffer is not modified on failure.
    pub fn add_remove_at_front(&mut self, delta: isize) -> Result<(), ErrorCode> {
        let amount = delta.unsigned_abs();
        if delta >= 0 {
            if amount > self.size {
                return Err(ErrorCode::UNDERFLOW);
            }
            self.offset += amount;
            self.size -= amount;
        } else {
            if amount > self.offset {
                return Err(ErrorCode::UNDERFLOW);
            }
            self.offset -= amount;
            self.size += amount;
        }
        Ok(())
    }
}

impl Drop for PacketBuffer {
    fn drop(&mut self) {
        match core::mem::replace(&mut self.storage, Storage::Heap(Box::default())) {
            Storage::Heap(block) => {
                self.ledger
                    .heap_in_use
                    .fetch_sub(block.len(), Ordering::AcqRel);
            }
            Storage::Pool { block, pool } => pool.give(block),
        }
        self.ledger.releases.fetch_add(1, Ordering::AcqRel);
    }
}

impl core::fmt::Debug for PacketBuffer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PacketBuffer")
            .field("pooled", &self.is_pooled())
            .field("offset", &self.offset)
            .field("size", &self.size)
            .field("capacity", &self.capacity())
            .finish()
    }
}

/// Direction-aware buffer allocator used by the bus, the downloader and the
/// EMAC glue.
pub struct BufferManager {
    ledger: Arc<Ledger>,
    rx_pool: Option<Arc<PacketPool>>,
}

impl BufferManager {
    /// A manager backed by an unbounded heap and no RX pool.
    pub fn new() -> BufferManager {
        BufferManager::with_ledger(None)
    }

    /// A manager whose heap allocations may not exceed `bytes` in total.
    pub fn with_heap_limit(bytes: usize) -> BufferManager {
        BufferManager::with_ledger(Some(bytes))
    }

    fn with_ledger(heap_limit: Option<usize>) -> BufferManager {
        BufferManager {
            ledger: Arc::new(Ledger {
                allocations: AtomicUsize::new(0),
                releases: AtomicUsize::new(0),
                heap_in_use: AtomicUsize::new(0),
                heap_limit,
            }),
            rx_pool: None,
        }
    }

    /// Serve RX allocations from `pool` instead of the heap.
    pub fn with_rx_pool(mut self, pool: Arc<PacketPool>) -> BufferManager {
        self.rx_pool = Some(pool);
        self
    }

    /// Allocate a buffer whose visible window is `size` bytes.
    ///
    /// `_timeout_ms` is accepted for symmetry with the radio driver's buffer
    /// interface; allocation never waits. Exhaustion is reported as
    /// [`ErrorCode::NOMEM`], which callers must treat as permanent.
    pub fn allocate(
        &self,
        direction: Direction,
        size: usize,
        _timeout_ms: u32,
    ) -> Result<PacketBuffer, ErrorCode> {
        let storage = match (direction, &self.rx_pool) {
            (Direction::Rx, Some(pool)) => Storage::Pool {
                block: pool.take(size)?,
                pool: pool.clone(),
            },
            _ => Storage::Heap(self.heap_block(size)?),
        };
        self.ledger.allocations.fetch_add(1, Ordering::AcqRel);
        trace!("allocated {:?} buffer of {} bytes", direction, size);
        Ok(PacketBuffer {
            storage,
            offset: 0,
            size,
            ledger: self.ledger.clone(),
        })
    }

    fn heap_block(&self, size: usize) -> Result<Box<[u8]>, ErrorCode> {
        self.ledger.reserve_heap(size)?;
        let mut block = Vec::new();
        if block.try_reserve_exact(size).is_err() {
            self.ledger.heap_in_use.fetch_sub(size, Ordering::AcqRel);
            return Err(ErrorCode::NOMEM);
        }
        block.resize(size, 0);
        Ok(block.into_boxed_slice())
    }

    /// Return a buffer to the store it was allocated from.
    pub fn release(&self, buffer: PacketBuffer, direction: Direction) {
        if buffer.is_pooled() && direction == Direction::Tx {
            warn!("pool buffer released as TX, returning it to its pool");
        }
        trace!("released {:?} buffer of {} bytes", direction, buffer.size());
        drop(buffer);
    }

    /// Number of successful allocations so far.
    pub fn allocations(&self) -> usize {
        self.ledger.allocations.load(Ordering::Acquire)
    }

    /// Number of buffers returned so far.
    pub fn releases(&self) -> usize {
        self.ledger.releases.load(Ordering::Acquire)
    }

    /// Buffers allocated and not yet returned.
    pub fn outstanding(&self) -> usize {
        self.allocations().saturating_sub(self.releases())
    }

    /// Heap bytes held by live buffers.
    pub fn heap_in_use(&self) -> usize {
        self.ledger.heap_in_use.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::quickcheck;

    #[test]
    fn allocate_and_release_balance() {
        let manager = BufferManager::new();
        let mut buffer = manager.allocate(Direction::Tx, 128, 0).unwrap();
        assert_eq!(buffer.size(), 128);
        assert_eq!(buffer.capacity(), 128);
        assert!(!buffer.is_pooled());
        buffer.data_mut()[0] = 0xa5;
        assert_eq!(buffer.data()[0], 0xa5);
        assert_eq!(manager.heap_in_use(), 128);

        manager.release(buffer, Direction::Tx);
        assert_eq!(manager.allocations(), 1);
        assert_eq!(manager.releases(), 1);
        assert_eq!(manager.outstanding(), 0);
        assert_eq!(manager.heap_in_use(), 0);
    }

    #[test]
    fn heap_limit_is_permanent_nomem() {
        let manager = BufferManager::with_heap_limit(100);
        let first = manager.allocate(Direction::Tx, 80, 1000).unwrap();
        assert_eq!(
            manager.allocate(Direction::Tx, 40, 1000).unwrap_err(),
            ErrorCode::NOMEM
        );
        // A failed allocation is not counted and leaves the budget intact.
        assert_eq!(manager.allocations(), 1);
        assert_eq!(manager.heap_in_use(), 80);
        drop(first);
        assert!(manager.allocate(Direction::Tx, 40, 0).is_ok());
    }

    #[test]
    fn rx_comes_from_pool_and_goes_back() {
        let pool = PacketPool::new(256, 2);
        let manager = BufferManager::new().with_rx_pool(pool.clone());

        let a = manager.allocate(Direction::Rx, 100, 0).unwrap();
        let b = manager.allocate(Direction::Rx, 256, 0).unwrap();
        assert!(a.is_pooled());
        assert_eq!(a.size(), 100);
        assert_eq!(a.capacity(), 256);
        assert_eq!(pool.available(), 0);
        assert_eq!(
            manager.allocate(Direction::Rx, 10, 0).unwrap_err(),
            ErrorCode::NOMEM
        );

        // TX never touches the pool.
        let tx = manager.allocate(Direction::Tx, 10, 0).unwrap();
        assert!(!tx.is_pooled());

        manager.release(a, Direction::Rx);
        assert_eq!(pool.available(), 1);
        drop(b);
        assert_eq!(pool.available(), 2);
        assert_eq!(manager.outstanding(), 1);
        assert_eq!(manager.heap_in_use(), 10);
    }

    #[test]
    fn pool_rejects_oversized_requests() {
        let manager = BufferManager::new().with_rx_pool(PacketPool::new(64, 4));
        assert_eq!(
            manager.allocate(Direction::Rx, 65, 0).unwrap_err(),
            ErrorCode::NOMEM
        );
    }

    #[test]
    fn set_size_is_bounds_checked() {
        let manager = BufferManager::new();
        let mut buffer = manager.allocate(Direction::Tx, 64, 0).unwrap();
        buffer.set_size(10).unwrap();
        assert_eq!(buffer.data().len(), 10);
        buffer.set_size(64).unwrap();
        assert_eq!(buffer.set_size(65), Err(ErrorCode::SIZE));

        buffer.add_remove_at_front(16).unwrap();
        assert_eq!(buffer.size(), 48);
        assert_eq!(buffer.set_size(49), Err(ErrorCode::SIZE));
        assert_eq!(buffer.size(), 48);
    }

    #[test]
    fn front_adjustment_reserves_headroom() {
        let manager = BufferManager::new();
        let mut buffer = manager.allocate(Direction::Tx, 32, 0).unwrap();
        buffer.add_remove_at_front(4).unwrap();
        buffer.data_mut().copy_from_slice(&[7; 28]);
        buffer.add_remove_at_front(-4).unwrap();
        assert_eq!(&buffer.data()[..4], &[0, 0, 0, 0]);
        assert_eq!(&buffer.data()[4..], &[7; 28]);

        assert_eq!(buffer.add_remove_at_front(-1), Err(ErrorCode::UNDERFLOW));
        assert_eq!(buffer.add_remove_at_front(33), Err(ErrorCode::UNDERFLOW));
        assert_eq!(buffer.front_offset(), 0);
        assert_eq!(buffer.size(), 32);
    }

    quickcheck! {
        fn front_adjustments_track_deltas(deltas: Vec<i16>) -> bool {
            let manager = BufferManager::new();
            let mut buffer = match manager.allocate(Direction::Tx, 512, 0) {
                Ok(buffer) => buffer,
                Err(_) => return false,
            };
            let mut size: isize = 512;
            let mut offset: isize = 0;
            for delta in deltas {
                let delta = (delta % 600) as isize;
                let res = buffer.add_remove_at_front(delta);
                if offset + delta >= 0 && size - delta >= 0 {
                    if res.is_err() {
                        return false;
                    }
                    offset += delta;
                    size -= delta;
                } else if res != Err(ErrorCode::UNDERFLOW) {
                    return false;
                }
                if buffer.size() as isize != size || buffer.front_offset() as isize != offset {
                    return false;
                }
            }
            buffer.front_offset() + buffer.size() == 512
        }
    }
}
