//! The resize path. Resizing tries every cheap option before falling back
//! to relocation: growing the tail in place, absorbing following free
//! blocks, splitting off a shrink remainder, or simply wasting a small
//! surplus. Only when none of those apply does the content move to a fresh
//! allocation.
//!
//! Copy lengths follow from the direction: a shrink copies the new payload
//! capacity, a grow copies the old one, so neither end of the copy ever
//! leaves a payload.

use std::ptr::{self, NonNull};

use crate::{
    align::align8,
    arena::{Arena, MMAP_THRESHOLD},
    block::{slot_size, BlockHeader, BlockStatus, BLOCK_HEADER_SIZE},
    platform::PlatformMemory,
};

impl<M: PlatformMemory> Arena<M> {
    /// Resizes the allocation at `address` to `size` bytes, returning either
    /// the same payload or a relocated one. Null `address` degenerates to a
    /// plain allocation, zero `size` to a release. Resizing a block that was
    /// already released is an error surfaced as null.
    pub(crate) unsafe fn resize(&mut self, address: *mut u8, size: usize) -> *mut u8 {
        let Some(payload) = NonNull::new(address) else {
            return self.allocate(size, MMAP_THRESHOLD);
        };

        if size == 0 {
            self.release(address);
            return ptr::null_mut();
        }

        let mut block = BlockHeader::from_payload(payload);

        if block.as_ref().is_free() {
            return ptr::null_mut();
        }

        let new_total = slot_size(size);
        let old_total = block.as_ref().total_size();

        // The tail can grow in place as long as the result stays in the
        // heap regime. Same trick as the expansion inside `allocate`.
        if Some(block) == self.tail
            && old_total < new_total
            && align8(size) < MMAP_THRESHOLD - BLOCK_HEADER_SIZE
        {
            self.expand_last_block(block, align8(size));
            return address;
        }

        // Growing an interior block: absorb following free blocks until the
        // request fits, the neighbourhood runs out, or the merged block
        // would leave the heap regime and become unaddressable by the list.
        if old_total < new_total && new_total < MMAP_THRESHOLD {
            while let Some(next) = block.as_ref().next {
                if !next.as_ref().is_free() {
                    break;
                }

                let merged = align8(block.as_ref().size + next.as_ref().size + BLOCK_HEADER_SIZE);
                if merged > MMAP_THRESHOLD {
                    break;
                }

                block.as_mut().next = next.as_ref().next;
                block.as_mut().size = merged;

                if Some(next) == self.tail {
                    self.tail = Some(block);
                }

                if block.as_ref().total_size() >= new_total {
                    break;
                }
            }
        }

        let old_total = block.as_ref().total_size();

        if old_total == new_total {
            return address;
        }

        if old_total > new_total + BLOCK_HEADER_SIZE {
            // Mapped blocks cannot be split in place, so a shrink moves the
            // content to a fresh allocation instead.
            if block.as_ref().status == BlockStatus::Mapped {
                debug_assert!(new_total < old_total);

                let new_address = self.allocate(size, MMAP_THRESHOLD);
                if new_address.is_null() {
                    return ptr::null_mut();
                }

                ptr::copy_nonoverlapping(address, new_address, align8(size));
                self.release(address);

                return new_address;
            }

            self.split_block(block, size);
            return address;
        }

        // Not enough surplus for a whole extra block, the waste stays
        // internal.
        if old_total > new_total {
            return address;
        }

        let new_address = self.allocate(size, MMAP_THRESHOLD);
        if new_address.is_null() {
            return ptr::null_mut();
        }

        ptr::copy_nonoverlapping(address, new_address, block.as_ref().size);

        if new_address != address {
            self.release(address);
        }

        new_address
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::mock::{MockMemory, MOCK_PAGE_SIZE};

    /// Payload capacity of the preallocated heap pool.
    const POOL_SIZE: usize = MMAP_THRESHOLD - BLOCK_HEADER_SIZE;

    fn arena() -> Arena<MockMemory> {
        Arena::with_memory(MockMemory::new())
    }

    unsafe fn sizes_and_statuses(arena: &Arena<MockMemory>) -> Vec<(usize, BlockStatus)> {
        arena
            .collect_blocks()
            .iter()
            .map(|block| (block.as_ref().size, block.as_ref().status))
            .collect()
    }

    #[test]
    fn resize_of_null_is_a_plain_allocation() {
        unsafe {
            let mut arena = arena();

            let q = arena.resize(ptr::null_mut(), 100);

            assert!(!q.is_null());
            assert_eq!(
                sizes_and_statuses(&arena),
                vec![
                    (104, BlockStatus::Alloc),
                    (POOL_SIZE - slot_size(104), BlockStatus::Free),
                ]
            );
        }
    }

    #[test]
    fn resize_to_zero_releases() {
        unsafe {
            let mut arena = arena();

            let p = arena.allocate(64, MMAP_THRESHOLD);
            let block = BlockHeader::from_payload(NonNull::new(p).unwrap());

            assert!(arena.resize(p, 0).is_null());
            assert_eq!(block.as_ref().status, BlockStatus::Free);
        }
    }

    #[test]
    fn resize_of_released_block_is_null() {
        unsafe {
            let mut arena = arena();

            let p = arena.allocate(64, MMAP_THRESHOLD);
            arena.release(p);

            assert!(arena.resize(p, 32).is_null());
        }
    }

    #[test]
    fn resize_to_same_size_returns_same_pointer() {
        unsafe {
            let mut arena = arena();

            let p = arena.allocate(128, MMAP_THRESHOLD);

            assert_eq!(arena.resize(p, 128), p);
            assert_eq!(arena.memory.extensions, vec![MMAP_THRESHOLD]);
        }
    }

    #[test]
    fn small_shrink_keeps_the_surplus_internal() {
        unsafe {
            let mut arena = arena();

            let p = arena.allocate(128, MMAP_THRESHOLD);
            let block = BlockHeader::from_payload(NonNull::new(p).unwrap());

            // Not enough surplus for a whole extra block.
            assert_eq!(arena.resize(p, 120), p);
            assert_eq!(block.as_ref().size, 128);
        }
    }

    #[test]
    fn grows_the_tail_in_place() {
        unsafe {
            let mut arena = arena();

            let a = arena.allocate(100000, MMAP_THRESHOLD);
            let p = arena.allocate(POOL_SIZE - slot_size(100000), MMAP_THRESHOLD);

            // p took the whole remainder of the pool, so it is the tail.
            let q = arena.resize(p, 40000);

            assert_eq!(q, p);
            assert_eq!(
                arena.memory.extensions,
                vec![MMAP_THRESHOLD, 40000 - (POOL_SIZE - slot_size(100000))]
            );
            assert_eq!(
                sizes_and_statuses(&arena),
                vec![
                    (100000, BlockStatus::Alloc),
                    (40000, BlockStatus::Alloc),
                ]
            );
            assert!(!a.is_null());

            arena.assert_layout();
        }
    }

    #[test]
    fn shrink_splits_off_a_free_remainder() {
        unsafe {
            let mut arena = arena();

            let p = arena.allocate(1000, MMAP_THRESHOLD);
            let q = arena.resize(p, 100);

            assert_eq!(q, p);
            assert_eq!(
                sizes_and_statuses(&arena),
                vec![
                    (104, BlockStatus::Alloc),
                    (1000 - 104 - BLOCK_HEADER_SIZE, BlockStatus::Free),
                    (POOL_SIZE - slot_size(1000), BlockStatus::Free),
                ]
            );

            arena.assert_layout();
        }
    }

    #[test]
    fn grow_absorbs_following_free_blocks() {
        unsafe {
            let mut arena = arena();

            let p = arena.allocate(1000, MMAP_THRESHOLD);
            let neighbour = arena.allocate(500, MMAP_THRESHOLD);
            arena.release(neighbour);

            let q = arena.resize(p, 1400);

            assert_eq!(q, p);
            // The freed neighbour was absorbed and the surplus split off
            // again. No extra syscalls.
            assert_eq!(arena.memory.extensions, vec![MMAP_THRESHOLD]);
            assert_eq!(
                sizes_and_statuses(&arena),
                vec![
                    (1400, BlockStatus::Alloc),
                    (1000 + slot_size(500) - slot_size(1400), BlockStatus::Free),
                    (POOL_SIZE - slot_size(1000) - slot_size(500), BlockStatus::Free),
                ]
            );

            arena.assert_layout();
        }
    }

    #[test]
    fn forward_merge_reassigns_the_tail() {
        unsafe {
            let mut arena = arena();

            let a = arena.allocate(100000, MMAP_THRESHOLD);
            let t = arena.allocate(POOL_SIZE - slot_size(100000), MMAP_THRESHOLD);
            arena.release(t);

            // The absorbed block was the tail, so the tail moves back to the
            // surviving block before the remainder is split off again.
            let q = arena.resize(a, 120000);

            assert_eq!(q, a);
            assert_eq!(arena.memory.extensions, vec![MMAP_THRESHOLD]);
            assert_eq!(
                sizes_and_statuses(&arena),
                vec![
                    (120000, BlockStatus::Alloc),
                    (POOL_SIZE - slot_size(120000), BlockStatus::Free),
                ]
            );

            arena.assert_layout();
        }
    }

    #[test]
    fn forward_merge_respects_the_mapping_threshold() {
        unsafe {
            let mut arena = arena();

            let a = arena.allocate(100000, MMAP_THRESHOLD);
            let d = arena.allocate(20000, MMAP_THRESHOLD);
            let e = arena.allocate(30000, MMAP_THRESHOLD);
            arena.release(d);
            arena.release(e);

            // Absorbing d keeps the block in the heap regime, absorbing e as
            // well would cross the threshold, so the merge stops and the
            // content relocates instead.
            let q = arena.resize(a, 125000);

            assert_ne!(q, a);
            assert_eq!(
                sizes_and_statuses(&arena),
                vec![
                    (120024, BlockStatus::Free),
                    (125000, BlockStatus::Alloc),
                ]
            );

            arena.assert_layout();
        }
    }

    #[test]
    fn mapped_shrink_relocates_to_the_heap() {
        unsafe {
            let mut arena = arena();

            let m = arena.allocate(200000, MMAP_THRESHOLD);
            assert_eq!(arena.memory.mappings.len(), 1);

            for offset in 0..1000 {
                *m.add(offset) = (offset % 251) as u8;
            }

            let q = arena.resize(m, 1000);

            assert_ne!(q, m);
            assert!(arena.memory.mappings.is_empty());
            assert_eq!(arena.memory.unmapped.len(), 1);
            assert_eq!(
                sizes_and_statuses(&arena),
                vec![
                    (1000, BlockStatus::Alloc),
                    (POOL_SIZE - slot_size(1000), BlockStatus::Free),
                ]
            );

            for offset in 0..1000 {
                assert_eq!(*q.add(offset), (offset % 251) as u8);
            }
        }
    }

    #[test]
    fn mapped_grow_relocates_to_the_heap() {
        unsafe {
            let mut arena = arena();

            // With the page size as threshold even a small request maps.
            let m = arena.allocate(8192, MOCK_PAGE_SIZE);
            assert_eq!(arena.memory.mappings.len(), 1);

            for offset in 0..8192 {
                *m.add(offset) = (offset % 249) as u8;
            }

            let q = arena.resize(m, 16384);

            assert_ne!(q, m);
            assert!(arena.memory.mappings.is_empty());
            assert_eq!(
                sizes_and_statuses(&arena),
                vec![
                    (16384, BlockStatus::Alloc),
                    (POOL_SIZE - slot_size(16384), BlockStatus::Free),
                ]
            );

            for offset in 0..8192 {
                assert_eq!(*q.add(offset), (offset % 249) as u8);
            }
        }
    }

    #[test]
    fn grow_across_the_threshold_relocates_to_a_mapping() {
        unsafe {
            let mut arena = arena();

            let p = arena.allocate(1000, MMAP_THRESHOLD);
            for offset in 0..1000 {
                *p.add(offset) = (offset % 247) as u8;
            }

            let q = arena.resize(p, MMAP_THRESHOLD + 1000);

            assert_ne!(q, p);
            assert_eq!(arena.memory.mappings.len(), 1);

            // The old heap block was released in place, coalescing stays
            // deferred until the next search.
            assert_eq!(
                sizes_and_statuses(&arena),
                vec![
                    (1000, BlockStatus::Free),
                    (POOL_SIZE - slot_size(1000), BlockStatus::Free),
                ]
            );

            for offset in 0..1000 {
                assert_eq!(*q.add(offset), (offset % 247) as u8);
            }

            arena.assert_layout();
        }
    }

    #[test]
    fn mapped_exact_fit_and_small_waste_stay_put() {
        unsafe {
            let mut arena = arena();

            let m = arena.allocate(140000, MMAP_THRESHOLD);

            assert_eq!(arena.resize(m, 140000), m);
            assert_eq!(arena.resize(m, 139980), m);
            assert_eq!(arena.memory.mappings.len(), 1);

            let block = BlockHeader::from_payload(NonNull::new(m).unwrap());
            assert_eq!(block.as_ref().size, 140000);

            arena.release(m);
        }
    }
}
