//! Abstraction for the primitive memory syscalls. The arena only needs to
//! push the program break forward, map and unmap anonymous regions and know
//! the page size; everything else about the underlying kernel is hidden
//! behind [`PlatformMemory`], which also lets the tests drive the arena with
//! a fake heap instead of the real program break.

use std::ptr::NonNull;

use crate::Pointer;

/// The primitive operations the arena consumes. Failures surface as `None`;
/// the arena has no allocation-free way to report an exhausted kernel to its
/// caller, so it treats every `None` as fatal. See [`fatal`].
pub(crate) trait PlatformMemory {
    /// Moves the program break `delta` bytes forward and returns the old
    /// break, which is the first byte of the fresh region.
    unsafe fn extend_heap(&mut self, delta: usize) -> Pointer<u8>;

    /// Requests an anonymous, private, read/write mapping where `length`
    /// bytes can be written safely.
    unsafe fn map_anonymous(&mut self, length: usize) -> Pointer<u8>;

    /// Returns `length` bytes starting at `address` to the kernel.
    unsafe fn unmap(&mut self, address: NonNull<u8>, length: usize);

    /// Virtual memory page size in bytes.
    fn page_size(&self) -> usize;
}

/// Zero sized type that implements [`PlatformMemory`] through the OS.
pub(crate) struct Platform;

/// Writes `message` to stderr and aborts the process. Must not allocate,
/// which rules out the formatting machinery.
pub(crate) fn fatal(message: &str) -> ! {
    unsafe {
        let _ = libc::write(libc::STDERR_FILENO, message.as_ptr().cast(), message.len());
        let _ = libc::write(libc::STDERR_FILENO, "\n".as_ptr().cast(), 1);
        libc::abort();
    }
}

#[cfg(unix)]
mod unix {
    use std::ptr::{self, NonNull};

    use super::{Platform, PlatformMemory};
    use crate::Pointer;

    /// Virtual memory page size. 4096 bytes on most computers. This should
    /// be a constant but we don't know the value at compile time.
    static mut PAGE_SIZE: usize = 0;

    impl PlatformMemory for Platform {
        unsafe fn extend_heap(&mut self, delta: usize) -> Pointer<u8> {
            // `sbrk` returns the previous break on success and -1 on
            // failure. See https://man7.org/linux/man-pages/man2/sbrk.2.html
            let address = libc::sbrk(delta as libc::intptr_t);

            if address == usize::MAX as *mut libc::c_void {
                None
            } else {
                Some(NonNull::new_unchecked(address).cast())
            }
        }

        unsafe fn map_anonymous(&mut self, length: usize) -> Pointer<u8> {
            // Memory protection. Read-Write only.
            let protection = libc::PROT_READ | libc::PROT_WRITE;

            // Memory should be private to our process and not mapped to any
            // file.
            let flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;

            let address = libc::mmap(ptr::null_mut(), length, protection, flags, -1, 0);

            if address == libc::MAP_FAILED {
                None
            } else {
                Some(NonNull::new_unchecked(address).cast())
            }
        }

        unsafe fn unmap(&mut self, address: NonNull<u8>, length: usize) {
            if libc::munmap(address.cast().as_ptr(), length) != 0 {
                super::fatal("brkalloc: munmap failed");
            }
        }

        fn page_size(&self) -> usize {
            // We only know the value at runtime by calling `sysconf`, so we
            // call it once and reuse the result afterwards. The allocator is
            // single threaded by contract.
            unsafe {
                if PAGE_SIZE == 0 {
                    PAGE_SIZE = libc::sysconf(libc::_SC_PAGE_SIZE) as usize;
                }

                PAGE_SIZE
            }
        }
    }
}
