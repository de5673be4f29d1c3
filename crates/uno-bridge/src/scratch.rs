//! Call-scoped argument scratch
//!
//! Storage for the argument pointer arrays and converted temporaries of
//! one dispatch. Allocations come from an inline buffer living on the
//! dispatcher's stack frame and only spill to the heap for unusually large
//! frames. Everything is released when the [`Scratch`] is dropped; values
//! constructed in it must be destroyed by the caller first.

use std::alloc::{self, Layout};
use std::ffi::c_void;
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::ptr::NonNull;

use crate::defaults::SCRATCH_INLINE_BYTES;

const INLINE_ALIGN: usize = std::mem::align_of::<u64>();

/// Inline backing store for a [`Scratch`]
pub(crate) struct ScratchStorage([MaybeUninit<u64>; SCRATCH_INLINE_BYTES / 8]);

impl ScratchStorage {
    #[inline]
    pub(crate) fn new() -> Self {
        ScratchStorage([MaybeUninit::uninit(); SCRATCH_INLINE_BYTES / 8])
    }
}

/// Bump allocator over a [`ScratchStorage`]
pub(crate) struct Scratch<'a> {
    base: *mut u8,
    used: usize,
    spilled: Vec<(NonNull<u8>, Layout)>,
    _storage: PhantomData<&'a mut ScratchStorage>,
}

impl<'a> Scratch<'a> {
    pub(crate) fn new(storage: &'a mut ScratchStorage) -> Self {
        Scratch {
            base: storage.0.as_mut_ptr() as *mut u8,
            used: 0,
            spilled: Vec::new(),
            _storage: PhantomData,
        }
    }

    /// Uninitialized storage for one value. `None` only if the heap is
    /// exhausted or the request is not a valid layout.
    pub(crate) fn alloc(&mut self, size: usize, align: usize) -> Option<NonNull<c_void>> {
        let size = size.max(1);
        let align = align.max(1);
        if align <= INLINE_ALIGN {
            let start = (self.used + align - 1) & !(align - 1);
            if start + size <= SCRATCH_INLINE_BYTES {
                self.used = start + size;
                return NonNull::new(self.base.wrapping_add(start) as *mut c_void);
            }
        }

        let layout = Layout::from_size_align(size, align).ok()?;
        // Layout has a non-zero size.
        let ptr = NonNull::new(unsafe { alloc::alloc(layout) })?;
        self.spilled.push((ptr, layout));
        Some(ptr.cast())
    }

    /// Uninitialized array of `len` elements
    pub(crate) fn alloc_array<T>(&mut self, len: usize) -> Option<NonNull<T>> {
        let size = std::mem::size_of::<T>().checked_mul(len)?;
        self.alloc(size, std::mem::align_of::<T>()).map(NonNull::cast)
    }
}

impl Drop for Scratch<'_> {
    fn drop(&mut self) {
        for (ptr, layout) in self.spilled.drain(..) {
            unsafe { alloc::dealloc(ptr.as_ptr(), layout) };
        }
    }
}
