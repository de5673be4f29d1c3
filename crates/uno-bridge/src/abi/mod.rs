//! Calling-convention decoding
//!
//! The executor leaves the argument registers spilled in front of the
//! stacked arguments and passes the address of that area as the call
//! stack. Where each argument lives in that area is the only
//! architecture-specific knowledge the dispatcher needs; it is expressed by
//! a [`CallConvention`] handing out byte offsets through an [`ArgCursor`].

mod aapcs32;
mod word_slots;

use std::ffi::c_void;

use uno_sdk::{TypeClass, TypeRef, TypeRegistry};

pub use aapcs32::{Aapcs32, Aapcs32Cursor, ArmVariant, MAX_FLOAT_AGGREGATE_MEMBERS, MAX_FPR_REGS};
pub use word_slots::{WordSlots, WordSlotsCursor};

/// Convention of the build target
#[cfg(target_arch = "arm")]
pub type TargetConvention = Aapcs32;

/// Convention of the build target
#[cfg(not(target_arch = "arm"))]
pub type TargetConvention = WordSlots;

/// Bytes a callee may return in registers: up to four doubles of a
/// floating-point aggregate
pub const REGISTER_RETURN_BYTES: usize = 32;

/// Raw register return of one call
pub type RegisterReturn = [u64; REGISTER_RETURN_BYTES / 8];

/// Byte offset from the top of the spilled call stack.
///
/// Negative offsets address register spill areas below the core registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location(pub isize);

/// Walks the arguments of one call in declaration order
pub trait ArgCursor {
    /// Slot holding a pointer: hidden return pointer, `this`, and every
    /// parameter that is not passed by value
    fn indirect(&mut self) -> Location;

    /// Slot holding a by-value parameter of a simple type class
    fn simple(&mut self, class: TypeClass) -> Location;
}

/// Per-architecture argument placement rules
pub trait CallConvention: Send + Sync {
    /// Cursor type
    type Cursor: ArgCursor;

    /// Cursor positioned at the first word of the call stack
    fn cursor(&self) -> Self::Cursor;

    /// Location of `this`, which follows the hidden return pointer if
    /// there is one
    fn this_location(&self, hidden_return: bool) -> Location;

    /// Whether values of `ty` are returned through a hidden pointer
    fn return_in_hidden_param(&self, ty: &TypeRef, types: &TypeRegistry) -> bool;

    /// Leave the register return where the executor reloads registers
    /// other than the integer result from.
    ///
    /// # Safety
    ///
    /// `frame` must be the spilled frame of the call returning `value`.
    unsafe fn store_register_return(&self, _frame: CallFrame, _value: &RegisterReturn) {}
}

/// View on a spilled call stack
#[derive(Debug, Clone, Copy)]
pub struct CallFrame {
    top: *mut u8,
}

impl CallFrame {
    /// Wrap the call stack pointer handed over by the executor
    #[inline]
    pub fn new(call_stack: *mut *mut c_void) -> Self {
        CallFrame {
            top: call_stack as *mut u8,
        }
    }

    /// Address of a location
    #[inline]
    pub fn address(&self, location: Location) -> *mut c_void {
        self.top.wrapping_offset(location.0) as *mut c_void
    }

    /// Read the pointer stored at a location
    ///
    /// # Safety
    ///
    /// The location must lie inside the spilled frame.
    #[inline]
    pub unsafe fn read_ptr(&self, location: Location) -> *mut c_void {
        (self.address(location) as *const *mut c_void).read_unaligned()
    }
}

/// Convention used by the snippets of this build
#[inline]
pub fn target_convention() -> TargetConvention {
    TargetConvention::target()
}
