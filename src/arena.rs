//! The heap arena. All small requests are served from one contiguous run of
//! memory grown by pushing the program break forward, managed as a singly
//! linked list of blocks laid out back to back:
//!
//! ```text
//! head                                               tail
//!  |                                                  |
//!  v                                                  v
//! +--------+---------+--------+---------+--------+---------+
//! | Header | Payload | Header | Payload | Header | Payload |
//! +--------+---------+--------+---------+--------+---------+
//!  <- first break extension -> <- further extensions ... ->
//! ```
//!
//! Released heap blocks stay in the list marked free and are recycled by a
//! best-fit search, which coalesces adjacent free blocks first and splits
//! oversized winners afterwards. Requests at or past [`MMAP_THRESHOLD`] get
//! an independent anonymous mapping instead; those blocks are never linked
//! into the list and vanish when released.

use std::ptr::{self, NonNull};

use crate::{
    align::align8,
    block::{slot_size, BlockHeader, BlockStatus, BLOCK_HEADER_SIZE},
    platform::{fatal, PlatformMemory},
    Pointer,
};

/// Requests whose aligned footprint reaches this boundary are served by an
/// independent anonymous mapping instead of the heap. 128 KiB, the classic
/// malloc value.
pub const MMAP_THRESHOLD: usize = 128 * 1024;

/// Process-wide allocator state: the two ends of the heap block list plus
/// the platform the memory comes from.
pub(crate) struct Arena<M> {
    pub(crate) memory: M,
    pub(crate) head: Pointer<BlockHeader>,
    pub(crate) tail: Pointer<BlockHeader>,
}

impl<M> Arena<M> {
    /// Builds an empty arena on top of the given memory source. No syscalls
    /// happen until the first allocation.
    pub(crate) const fn with_memory(memory: M) -> Self {
        Self {
            memory,
            head: None,
            tail: None,
        }
    }
}

impl<M: PlatformMemory> Arena<M> {
    /// Serves a request of `size` bytes, switching policy on `threshold`.
    /// Returns a payload pointer that is always 8 byte aligned, or null when
    /// `size` is zero.
    ///
    /// The attempts, each falling through to the next one on failure: reuse
    /// a free block, expand the last block in place, preallocate the heap
    /// pool, and finally provision a fresh block from the kernel.
    pub(crate) unsafe fn allocate(&mut self, size: usize, threshold: usize) -> *mut u8 {
        if size == 0 {
            return ptr::null_mut();
        }

        let size = align8(size);

        if self.head.is_some() && size < threshold {
            if let Some(mut block) = self.find_best_block(size) {
                block.as_mut().status = BlockStatus::Alloc;
                return BlockHeader::payload_of(block).as_ptr();
            }
        }

        // No free block fits, but if the last one is free we can grow it in
        // place and pay only for the difference.
        if let Some(tail) = self.tail {
            if tail.as_ref().is_free()
                && tail.as_ref().size < size
                && size < threshold - BLOCK_HEADER_SIZE
            {
                self.expand_last_block(tail, size);
                return BlockHeader::payload_of(tail).as_ptr();
            }
        }

        if self.head.is_none() && size < threshold - BLOCK_HEADER_SIZE {
            let block = self.preallocate();
            if block.as_ref().size > slot_size(size) {
                self.split_block(block, size);
            }
            return BlockHeader::payload_of(block).as_ptr();
        }

        let block = self.create_block(size, threshold - BLOCK_HEADER_SIZE);

        // A fresh heap block sits right after the current tail, so it joins
        // the list. Mapped blocks live alone.
        if block.as_ref().status == BlockStatus::Alloc {
            match self.tail {
                Some(mut tail) => tail.as_mut().next = Some(block),
                None => self.head = Some(block),
            }
            self.tail = Some(block);
        }

        BlockHeader::payload_of(block).as_ptr()
    }

    /// Serves a zeroed request of `count` elements of `size` bytes each,
    /// using the page size as the mapping threshold.
    pub(crate) unsafe fn zero_allocate(&mut self, count: usize, size: usize) -> *mut u8 {
        let Some(total) = count.checked_mul(size) else {
            return ptr::null_mut();
        };

        let threshold = self.memory.page_size();
        let address = self.allocate(total, threshold);

        if !address.is_null() {
            ptr::write_bytes(address, 0, total);
        }

        address
    }

    /// Gives the block that owns `address` back to the arena. Heap blocks
    /// are only marked free and recycled later; mapped blocks are returned
    /// to the kernel immediately. Null is a no-op.
    pub(crate) unsafe fn release(&mut self, address: *mut u8) {
        let Some(payload) = NonNull::new(address) else {
            return;
        };

        let mut block = BlockHeader::from_payload(payload);

        match block.as_ref().status {
            BlockStatus::Alloc => block.as_mut().status = BlockStatus::Free,
            BlockStatus::Mapped => {
                let length = block.as_ref().total_size();
                self.memory.unmap(block.cast(), length);
            }
            // Releasing twice is caller misuse, nothing to detect here.
            BlockStatus::Free => {}
        }
    }

    /// Merges every run of adjacent free blocks into its first block and
    /// recomputes the tail:
    ///
    /// ```text
    /// Before:
    /// +-------+------+------+-------+------+
    /// | Alloc | Free | Free | Alloc | Free |
    /// +-------+------+------+-------+------+
    /// After:
    /// +-------+--------------+-------+------+
    /// | Alloc |     Free     | Alloc | Free |
    /// +-------+--------------+-------+------+
    /// ```
    ///
    /// The absorbed header becomes payload, so the survivor grows by the
    /// successor's size plus one header stride. The scan stays on the same
    /// block after a merge, which fuses runs of three or more in one pass.
    unsafe fn coalesce_free_blocks(&mut self) {
        let Some(mut current) = self.head else {
            return;
        };

        while let Some(next) = current.as_ref().next {
            if current.as_ref().is_free() && next.as_ref().is_free() {
                current.as_mut().next = next.as_ref().next;
                current.as_mut().size += next.as_ref().size + BLOCK_HEADER_SIZE;
            } else {
                current = next;
            }
        }

        self.tail = Some(current);
    }

    /// Best-fit search. Coalesces first, then returns the free block whose
    /// size is the smallest one that still fits `size` bytes, preferring
    /// earlier blocks on ties. Oversized winners are split so the remainder
    /// stays reusable. `size` must be aligned.
    unsafe fn find_best_block(&mut self, size: usize) -> Pointer<BlockHeader> {
        self.coalesce_free_blocks();

        let mut best: Pointer<BlockHeader> = None;
        let mut current = self.head;

        while let Some(block) = current {
            if block.as_ref().is_free()
                && block.as_ref().size >= size
                && best.map_or(true, |best| block.as_ref().size < best.as_ref().size)
            {
                best = Some(block);
            }

            current = block.as_ref().next;
        }

        let best = best?;

        if best.as_ref().size > slot_size(size) {
            self.split_block(best, size);
        }

        Some(best)
    }

    /// Splits `block` so it holds exactly `align8(size)` bytes and the rest
    /// becomes a new free block right after it:
    ///
    /// ```text
    /// Before:                    After:
    /// +--------+                 +--------+
    /// | Header |                 | Header |
    /// +--------+                 +--------+
    /// |        |                 | size'  |  <- align8(size) bytes.
    /// |  Big   |                 +--------+
    /// | block  |                 | Header |
    /// |        |                 +--------+
    /// |        |                 | Free   |
    /// +--------+                 +--------+
    /// ```
    ///
    /// Caller must make sure the block is large enough for a non-degenerate
    /// remainder, that is `block.size > slot_size(size)`.
    pub(crate) unsafe fn split_block(&mut self, mut block: NonNull<BlockHeader>, size: usize) {
        let slot = slot_size(size);

        let successor = NonNull::new_unchecked(block.as_ptr().cast::<u8>().add(slot))
            .cast::<BlockHeader>();

        successor.as_ptr().write(BlockHeader {
            size: align8(block.as_ref().size - slot),
            status: BlockStatus::Free,
            next: block.as_ref().next,
        });

        block.as_mut().size = align8(size);
        block.as_mut().next = Some(successor);

        if self.tail == Some(block) {
            self.tail = Some(successor);
        }
    }

    /// Grows the last heap block in place up to `size` bytes. The break
    /// already sits at the first byte after the tail's payload, so pushing
    /// it forward by the difference is all it takes. `size` must be aligned
    /// and larger than the tail's current size.
    pub(crate) unsafe fn expand_last_block(&mut self, mut tail: NonNull<BlockHeader>, size: usize) {
        let delta = size - tail.as_ref().size;

        if self.memory.extend_heap(delta).is_none() {
            fatal("brkalloc: heap extension failed");
        }

        tail.as_mut().size = size;
        tail.as_mut().status = BlockStatus::Alloc;
    }

    /// Provisions a fresh block of `align8(size)` payload bytes, from the
    /// heap when the aligned size is under `threshold` and from an
    /// independent anonymous mapping otherwise. The block is initialized
    /// but not linked anywhere.
    unsafe fn create_block(&mut self, size: usize, threshold: usize) -> NonNull<BlockHeader> {
        let size = align8(size);
        let length = size + BLOCK_HEADER_SIZE;

        let (address, status) = if size < threshold {
            let Some(address) = self.memory.extend_heap(length) else {
                fatal("brkalloc: heap extension failed");
            };
            (address, BlockStatus::Alloc)
        } else {
            let Some(address) = self.memory.map_anonymous(length) else {
                fatal("brkalloc: anonymous mapping failed");
            };
            (address, BlockStatus::Mapped)
        };

        let block = address.cast::<BlockHeader>();

        block.as_ptr().write(BlockHeader {
            size,
            status,
            next: None,
        });

        block
    }

    /// Reserves the initial heap pool: a single block whose total footprint
    /// is exactly [`MMAP_THRESHOLD`], so the first break extension is also
    /// the last one for most workloads. The block founds the list as both
    /// head and tail.
    unsafe fn preallocate(&mut self) -> NonNull<BlockHeader> {
        let block = self.create_block(MMAP_THRESHOLD - BLOCK_HEADER_SIZE, MMAP_THRESHOLD);

        self.head = Some(block);
        self.tail = Some(block);

        block
    }

    /// Collects the heap list into a vector for assertions.
    #[cfg(test)]
    pub(crate) unsafe fn collect_blocks(&self) -> Vec<NonNull<BlockHeader>> {
        let mut blocks = Vec::new();
        let mut current = self.head;

        while let Some(block) = current {
            blocks.push(block);
            current = block.as_ref().next;
        }

        blocks
    }

    /// Checks the structural invariants of the heap list: everything is 8
    /// byte aligned, blocks are contiguous in list order and the traversal
    /// ends exactly at the tail.
    #[cfg(test)]
    pub(crate) unsafe fn assert_layout(&self) {
        assert_eq!(self.head.is_none(), self.tail.is_none());

        let mut current = self.head;
        let mut last = None;

        while let Some(block) = current {
            assert_eq!(block.as_ptr() as usize % 8, 0);
            assert_eq!(block.as_ref().size % 8, 0);
            assert_ne!(block.as_ref().status, BlockStatus::Mapped);

            if let Some(next) = block.as_ref().next {
                assert_eq!(
                    next.as_ptr() as usize,
                    block.as_ptr() as usize + block.as_ref().total_size()
                );
            }

            last = current;
            current = block.as_ref().next;
        }

        assert_eq!(last, self.tail);
    }
}
