use crate::{
    arena::{Arena, MMAP_THRESHOLD},
    platform::Platform,
};

/// Drop-in replacement for the system allocation routines of a single
/// threaded process. Payloads are opaque `*mut u8` handles, always 8 byte
/// aligned; no stronger alignment is offered.
///
/// Small requests come from a contiguous heap grown by extending the
/// program break, which makes this allocator the owner of the process data
/// segment while it runs. Requests whose footprint reaches
/// [`MMAP_THRESHOLD`] get their own anonymous mapping. Running out of kernel
/// memory aborts the process; the recoverable failures (zero sized request,
/// resize of a released block) surface as null.
///
/// Not thread safe. Callers that allocate from multiple threads must
/// serialize every call externally.
///
/// # Examples
///
/// ```rust
/// use brkalloc::Brkalloc;
///
/// let mut allocator = Brkalloc::new();
///
/// let address = allocator.allocate(128);
/// assert!(!address.is_null());
/// assert_eq!(address as usize % 8, 0);
///
/// unsafe {
///     address.write_bytes(69, 128);
///     assert_eq!(*address, 69);
///
///     // Shrinking stays in place.
///     let resized = allocator.resize(address, 64);
///     assert_eq!(resized, address);
///
///     allocator.release(resized);
/// }
/// ```
pub struct Brkalloc {
    arena: Arena<Platform>,
}

impl Brkalloc {
    /// Builds a new allocator. No memory is requested from the kernel until
    /// the first allocation.
    pub const fn new() -> Self {
        Self {
            arena: Arena::with_memory(Platform),
        }
    }

    /// Returns a pointer to at least `size` bytes of uninitialized memory,
    /// or null when `size` is zero.
    pub fn allocate(&mut self, size: usize) -> *mut u8 {
        unsafe { self.arena.allocate(size, MMAP_THRESHOLD) }
    }

    /// Returns a pointer to at least `count * size` bytes of zeroed memory,
    /// or null when the product is zero or overflows. Uses the page size
    /// instead of [`MMAP_THRESHOLD`] as the mapping boundary.
    pub fn zero_allocate(&mut self, count: usize, size: usize) -> *mut u8 {
        unsafe { self.arena.zero_allocate(count, size) }
    }

    /// Resizes the allocation at `address` to `size` bytes. The content up
    /// to the smaller of both sizes is preserved, but the payload may move;
    /// always continue through the returned pointer. Null `address` behaves
    /// like [`Brkalloc::allocate`], zero `size` like [`Brkalloc::release`],
    /// and resizing an already released block returns null.
    ///
    /// # Safety
    ///
    /// `address` must be null or a live payload previously returned by this
    /// allocator.
    pub unsafe fn resize(&mut self, address: *mut u8, size: usize) -> *mut u8 {
        self.arena.resize(address, size)
    }

    /// Releases the allocation at `address`. Null is a no-op.
    ///
    /// # Safety
    ///
    /// `address` must be null or a live payload previously returned by this
    /// allocator. The payload must not be used afterwards.
    pub unsafe fn release(&mut self, address: *mut u8) {
        self.arena.release(address)
    }
}

impl Default for Brkalloc {
    fn default() -> Self {
        Self::new()
    }
}
