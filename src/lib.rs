//! General purpose memory allocator for single threaded processes. Memory is
//! obtained from the kernel either by extending the program break or through
//! anonymous mappings, depending on the request size, and the usual tricks
//! are implemented on top of the contiguous heap: free block reuse with a
//! best-fit search, block splitting, coalescing and in-place expansion of
//! the last block. See [`Brkalloc`] for the public API.

use std::ptr::NonNull;

mod align;
mod allocator;
mod arena;
mod block;
mod platform;
mod realloc;

/// Non-null pointer to `T`. We use this in most cases instead of `*mut T`
/// because the compiler will yell at us if we don't write code for the `None`
/// case.
pub(crate) type Pointer<T> = Option<NonNull<T>>;

pub use allocator::Brkalloc;
pub use arena::MMAP_THRESHOLD;
