//! Precompiled vtable snippets
//!
//! Vtable slots of every proxy point into one flat table of small code
//! fragments, one per (function index, vtable segment, hidden return)
//! triple. A snippet hands its two data words to the shared executor, which
//! spills the argument registers and enters
//! [`cpp_vtable_call`](crate::cpp2uno::cpp_vtable_call).
//!
//! The table is generated at build time. On 32-bit ARM it is linked as
//! code; elsewhere the same encoding is kept as data and
//! [`hosted::invoke`] performs the executor's job.

pub(crate) mod gen;

use std::borrow::Cow;
use std::ffi::c_void;
use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::error::{BridgeError, BridgeResult};

pub use gen::{
    snippet_index, FUNCTION_INDICES, HIDDEN_RETURN_FLAG, SNIPPET_DATA_OFFSET, SNIPPET_SIZE,
    VTABLE_SEGMENTS,
};

mod table {
    include!(concat!(env!("OUT_DIR"), "/snippet_table.rs"));
}

#[cfg(target_arch = "arm")]
core::arch::global_asm!(include_str!(concat!(env!("OUT_DIR"), "/snippets.s")), options(raw));

#[cfg(target_arch = "arm")]
extern "C" {
    static uno_bridge_snippets: u32;
}

static TARGET: Lazy<Arc<SnippetTable>> = Lazy::new(|| Arc::new(SnippetTable::builtin()));

/// Data words of a snippet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnippetKey {
    /// Function index, flag stripped
    pub function_index: u32,
    /// Byte offset of the vtable pointer inside the proxy
    pub vtable_offset: u32,
    /// Whether callers pass a hidden return pointer
    pub hidden_return: bool,
}

/// Table of snippets addressed by [`snippet_index`]
pub struct SnippetTable {
    base: *const u8,
    offsets: Cow<'static, [u32]>,
    function_indices: u32,
    vtable_segments: u32,
    _image: Option<Box<[u32]>>,
}

// The table is immutable after construction.
unsafe impl Send for SnippetTable {}
unsafe impl Sync for SnippetTable {}

impl SnippetTable {
    fn builtin() -> Self {
        #[cfg(target_arch = "arm")]
        let base = unsafe { std::ptr::addr_of!(uno_bridge_snippets) as *const u8 };
        #[cfg(not(target_arch = "arm"))]
        let base = table::SNIPPET_IMAGE.as_ptr() as *const u8;

        SnippetTable {
            base,
            offsets: Cow::Borrowed(&table::SNIPPET_OFFSETS[..]),
            function_indices: FUNCTION_INDICES,
            vtable_segments: VTABLE_SEGMENTS,
            _image: None,
        }
    }

    /// The table generated for this build
    pub fn target() -> Arc<SnippetTable> {
        TARGET.clone()
    }

    /// Build a data-only table of a different size. Its code is never
    /// executed; use it with [`hosted::invoke`] or for layout checks.
    pub fn generate(function_indices: u32, vtable_segments: u32) -> SnippetTable {
        let image = gen::generate(
            function_indices,
            vtable_segments,
            std::mem::size_of::<usize>() as u32,
        );
        let words = image.words.into_boxed_slice();
        SnippetTable {
            base: words.as_ptr() as *const u8,
            offsets: Cow::Owned(image.offsets),
            function_indices,
            vtable_segments,
            _image: Some(words),
        }
    }

    /// Number of function indices covered
    #[inline]
    pub fn function_indices(&self) -> u32 {
        self.function_indices
    }

    /// Number of vtable segments covered
    #[inline]
    pub fn vtable_segments(&self) -> u32 {
        self.vtable_segments
    }

    /// Number of snippets
    #[inline]
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Whether the table is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Code address for a slot.
    ///
    /// Fails when the function index or segment lies outside the table.
    pub fn snippet(
        &self,
        function_index: usize,
        segment: usize,
        hidden_return: bool,
    ) -> BridgeResult<*const c_void> {
        if function_index >= self.function_indices as usize
            || segment >= self.vtable_segments as usize
        {
            return Err(BridgeError::SnippetOutOfRange {
                function_index,
                vtable_segment: segment,
                function_indices: self.function_indices,
                vtable_segments: self.vtable_segments,
            });
        }
        let index = snippet_index(
            function_index as u32,
            segment as u32,
            hidden_return,
            self.vtable_segments,
        );
        let offset = self.offsets[index] as usize;
        Ok(self.base.wrapping_add(offset) as *const c_void)
    }

    /// Read back the data words of a snippet of this table
    pub fn decode(&self, code: *const c_void) -> Option<SnippetKey> {
        let offset = (code as usize).checked_sub(self.base as usize)?;
        let offset = u32::try_from(offset).ok()?;
        self.offsets.binary_search(&offset).ok()?;
        // Every offset found above starts a complete snippet.
        let words = unsafe {
            let data = self.base.add(offset as usize + SNIPPET_DATA_OFFSET as usize) as *const u32;
            [data.read_unaligned(), data.add(1).read_unaligned()]
        };
        Some(SnippetKey {
            function_index: words[0] & !HIDDEN_RETURN_FLAG,
            vtable_offset: words[1],
            hidden_return: words[0] & HIDDEN_RETURN_FLAG != 0,
        })
    }
}

impl std::fmt::Debug for SnippetTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnippetTable")
            .field("function_indices", &self.function_indices)
            .field("vtable_segments", &self.vtable_segments)
            .finish()
    }
}

/// Executor stand-in for builds whose snippets cannot run natively
#[cfg(not(target_arch = "arm"))]
pub mod hosted {
    use std::ffi::c_void;

    use super::SNIPPET_DATA_OFFSET;

    /// Enter the dispatcher as the executor would after jumping through
    /// `code`.
    ///
    /// # Safety
    ///
    /// `code` must be a slot value of a live proxy vtable and `call_stack`
    /// a frame laid out by the target calling convention, with `this`
    /// pointing at that proxy.
    pub unsafe fn invoke(code: *const c_void, call_stack: *mut *mut c_void) -> i64 {
        let data = (code as *const u8).add(SNIPPET_DATA_OFFSET as usize) as *const u32;
        crate::cpp2uno::cpp_vtable_call(data, call_stack)
    }
}
