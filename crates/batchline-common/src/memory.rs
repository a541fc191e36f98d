//! Aligned memory allocation.
//!
//! Chunks are read by the consumer through `u32` and `f64` views over the
//! same bytes, so the backing storage must be zero-filled and aligned to at
//! least [`CHUNK_ALIGNMENT`](crate::constants::CHUNK_ALIGNMENT).

use std::alloc::{self, Layout};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::slice;

use thiserror::Error;

/// Errors from aligned allocation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocError {
    /// A zero-sized buffer was requested.
    #[error("cannot allocate a zero-sized buffer")]
    ZeroSize,

    /// The size/alignment pair does not form a valid layout.
    #[error("invalid layout: size {size}, alignment {alignment}")]
    InvalidLayout {
        /// Requested size.
        size: usize,
        /// Requested alignment.
        alignment: usize,
    },

    /// The global allocator returned null.
    #[error("out of memory allocating {size} bytes")]
    OutOfMemory {
        /// Requested size.
        size: usize,
    },
}

/// A zero-filled heap buffer with guaranteed alignment.
///
/// The memory never moves while the buffer is alive, so its base pointer can
/// be handed out as a stable address.
///
/// # Example
///
/// ```rust
/// use batchline_common::memory::AlignedBuffer;
///
/// let mut buffer = AlignedBuffer::new(64, 8).unwrap();
/// buffer[0] = 42;
/// assert_eq!(buffer[0], 42);
/// assert!(buffer.is_aligned_to(8));
/// ```
pub struct AlignedBuffer {
    ptr: NonNull<u8>,
    size: usize,
    alignment: usize,
}

// SAFETY: AlignedBuffer owns its memory and doesn't share it
unsafe impl Send for AlignedBuffer {}
unsafe impl Sync for AlignedBuffer {}

impl AlignedBuffer {
    /// Allocates a zero-filled buffer of `size` bytes aligned to `alignment`.
    ///
    /// # Errors
    ///
    /// Returns an error for a zero size, a non power-of-two alignment, or
    /// when the allocator is out of memory.
    pub fn new(size: usize, alignment: usize) -> Result<Self, AllocError> {
        if size == 0 {
            return Err(AllocError::ZeroSize);
        }
        let layout = Layout::from_size_align(size, alignment)
            .map_err(|_| AllocError::InvalidLayout { size, alignment })?;

        // SAFETY: layout has a non-zero size (checked above)
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).ok_or(AllocError::OutOfMemory { size })?;

        Ok(Self {
            ptr,
            size,
            alignment,
        })
    }

    /// Returns the size of the buffer in bytes.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.size
    }

    /// Returns true if the buffer is empty.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Returns the alignment of the buffer.
    #[inline]
    #[must_use]
    pub const fn alignment(&self) -> usize {
        self.alignment
    }

    /// Returns a raw pointer to the buffer.
    #[inline]
    #[must_use]
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    /// Returns a mutable raw pointer to the buffer.
    #[inline]
    #[must_use]
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Returns the buffer as a byte slice.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr is valid and size is correct
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.size) }
    }

    /// Returns the buffer as a mutable byte slice.
    #[inline]
    #[must_use]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: ptr is valid, size is correct, and we have exclusive access
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.size) }
    }

    /// Checks if the buffer is aligned to the specified alignment.
    #[inline]
    #[must_use]
    pub fn is_aligned_to(&self, alignment: usize) -> bool {
        (self.ptr.as_ptr() as usize) % alignment == 0
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        // SAFETY: ptr was allocated with exactly this size and alignment,
        // which were validated as a layout in `new`
        unsafe {
            let layout = Layout::from_size_align_unchecked(self.size, self.alignment);
            alloc::dealloc(self.ptr.as_ptr(), layout);
        }
    }
}

impl Deref for AlignedBuffer {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &Self::Target {
        self.as_slice()
    }
}

impl DerefMut for AlignedBuffer {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.as_mut_slice()
    }
}

impl AsRef<[u8]> for AlignedBuffer {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl fmt::Debug for AlignedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlignedBuffer")
            .field("size", &self.size)
            .field("alignment", &self.alignment)
            .field("ptr", &self.ptr)
            .finish()
    }
}
