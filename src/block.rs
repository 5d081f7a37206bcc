use std::{mem, ptr::NonNull};

use crate::{align::align8, Pointer};

/// Block header size in bytes, rounded up to the 8 byte grain. A payload
/// pointer is always its block pointer advanced by exactly this stride, and
/// the other way around.
pub(crate) const BLOCK_HEADER_SIZE: usize = align8(mem::size_of::<BlockHeader>());

/// What a block is currently doing. Heap blocks alternate between
/// [`BlockStatus::Alloc`] and [`BlockStatus::Free`] for their whole life;
/// mapped blocks are [`BlockStatus::Mapped`] until they are unmapped and
/// cease to exist.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BlockStatus {
    /// Heap block, currently handed out to the caller.
    Alloc,
    /// Heap block, available for reuse.
    Free,
    /// Independent anonymous mapping, currently handed out to the caller.
    Mapped,
}

/// Metadata that sits right before every payload we hand out. Here's how a
/// block looks like in memory:
///
/// ```text
/// +--------------------------+  <- Block pointer.
/// | payload size             |
/// +--------------------------+
/// | status tag               |
/// +--------------------------+
/// | pointer to next block    |
/// +--------------------------+
/// | padding (8 byte grain)   |
/// +--------------------------+  <- Payload pointer, block + BLOCK_HEADER_SIZE.
/// |       User content       |
/// |           ...            |
/// +--------------------------+
/// ```
///
/// Heap blocks are laid out back to back in exactly this list order, so for
/// any heap block the address of `next` equals the first byte after its own
/// payload. Mapped blocks live alone and their `next` is always `None`.
pub(crate) struct BlockHeader {
    /// Payload capacity in bytes, excluding the header. Always a multiple
    /// of 8.
    pub size: usize,
    /// Whether this block can be used or not, and where it came from.
    pub status: BlockStatus,
    /// Next heap block. Only meaningful for blocks reachable from the arena
    /// head.
    pub next: Pointer<BlockHeader>,
}

impl BlockHeader {
    /// Returns the block header that sits right before `payload`.
    ///
    /// # Safety
    ///
    /// Caller must guarantee that `payload` is an address we previously
    /// handed out when allocating. As long as that's true this is safe,
    /// otherwise it's undefined behaviour.
    #[inline]
    pub unsafe fn from_payload(payload: NonNull<u8>) -> NonNull<BlockHeader> {
        NonNull::new_unchecked(payload.as_ptr().sub(BLOCK_HEADER_SIZE)).cast()
    }

    /// Returns the payload address of `block`, one header stride after the
    /// header itself.
    ///
    /// # Notes
    ///
    /// We use this as `BlockHeader::payload_of(block)` instead of
    /// `block.payload()` because we want to avoid creating intermediary
    /// references to headers we otherwise only hold raw pointers to.
    #[inline]
    pub unsafe fn payload_of(block: NonNull<BlockHeader>) -> NonNull<u8> {
        NonNull::new_unchecked(block.as_ptr().cast::<u8>().add(BLOCK_HEADER_SIZE))
    }

    /// Whether this block can serve a new request.
    #[inline]
    pub fn is_free(&self) -> bool {
        self.status == BlockStatus::Free
    }

    /// Total footprint of this block, header included.
    #[inline]
    pub fn total_size(&self) -> usize {
        BLOCK_HEADER_SIZE + self.size
    }
}

/// Total footprint needed to serve a request of `size` bytes: the aligned
/// payload plus one header stride.
#[inline]
pub(crate) fn slot_size(size: usize) -> usize {
    align8(size) + BLOCK_HEADER_SIZE
}
