//! Runtime contracts consumed by language bridges
//!
//! The component runtime provides the generic marshaling library (copy,
//! convert, destruct), the per-environment registration tables and the
//! object model of component-side interfaces. Bridges only program against
//! the types and traits in this module.

use std::ffi::c_void;
use std::ptr::{self, NonNull};

use crate::description::TypeDescription;
use crate::types::{TypeClass, TypeRef};

// ============================================================================
// Component-side objects
// ============================================================================

/// Generic dispatch function of a component-side interface.
///
/// `member` is the method or attribute description being invoked, `ret`
/// points to storage for the return value (unused for void), `args` holds
/// one pointer per parameter. On success the callee stores null into
/// `*exception`; otherwise it constructs an [`UnoAny`] in `**exception` and
/// leaves the return value and out parameters unconstructed.
pub type UnoDispatchFn = unsafe extern "C" fn(
    this: *mut UnoInterface,
    member: *const TypeDescription,
    ret: *mut c_void,
    args: *mut *mut c_void,
    exception: *mut *mut UnoAny,
);

/// Header every component-side interface object starts with.
#[repr(C)]
pub struct UnoInterface {
    /// Increment the object's reference count
    pub acquire: unsafe extern "C" fn(this: *mut UnoInterface),
    /// Decrement the object's reference count
    pub release: unsafe extern "C" fn(this: *mut UnoInterface),
    /// Invoke a member
    pub dispatch: UnoDispatchFn,
}

/// Type-tagged value container.
///
/// The layout is shared by both environments. `data` points to the value;
/// who owns that storage is up to the environment that constructed the any.
#[repr(C)]
pub struct UnoAny {
    /// Type of the contained value
    pub ty: TypeRef,
    /// Pointer to the contained value
    pub data: *mut c_void,
    /// Inline storage for pointer-sized values
    pub reserved: *mut c_void,
}

impl UnoAny {
    /// An empty (void) any
    pub fn void() -> Self {
        UnoAny {
            ty: TypeRef::void(),
            data: ptr::null_mut(),
            reserved: ptr::null_mut(),
        }
    }

    /// Type class of the contained value
    #[inline]
    pub fn class(&self) -> TypeClass {
        self.ty.class()
    }
}

// ============================================================================
// Environments
// ============================================================================

/// Converting copy between two environments.
pub trait Mapping: Send + Sync {
    /// Copy-construct `dest` from `src`, mapping interface references into
    /// the target environment.
    ///
    /// # Safety
    ///
    /// `dest` must be valid uninitialized storage of `td.size()` bytes and
    /// `src` a constructed value of type `td` in the source environment.
    unsafe fn copy_and_convert(&self, dest: *mut c_void, src: *mut c_void, td: &TypeDescription);
}

/// Data operations of one environment.
pub trait Environment: Send + Sync {
    /// Environment name, e.g. `"uno"`
    fn name(&self) -> &str;

    /// Destroy a constructed value in place.
    ///
    /// # Safety
    ///
    /// `data` must hold a constructed value of type `td` owned by this
    /// environment.
    unsafe fn destruct(&self, data: *mut c_void, td: &TypeDescription);

    /// Construct an any holding a copy of `*value` at `dest`.
    ///
    /// # Safety
    ///
    /// `dest` must be writable and uninitialized; `value` must point to a
    /// constructed value of type `td`.
    unsafe fn construct_any(&self, dest: *mut UnoAny, value: *mut c_void, td: &TypeDescription);

    /// Release the value held by an any. The type reference is dropped
    /// together with the `UnoAny` itself.
    ///
    /// # Safety
    ///
    /// `any` must have been constructed by this environment.
    unsafe fn destruct_any(&self, any: &mut UnoAny);
}

/// Called by a native environment once a revoked proxy may be freed.
pub type FreeProxyFn = unsafe fn(interface: NonNull<c_void>);

/// Identity operations of the native environment.
///
/// Interface pointers returned from lookups are acquired: the caller owns
/// one reference.
pub trait NativeEnvironment: Environment {
    /// Look up the interface registered for (`oid`, `td`)
    fn registered_interface(&self, oid: &str, td: &TypeDescription) -> Option<NonNull<c_void>>;

    /// Release one reference to a native interface
    ///
    /// # Safety
    ///
    /// `interface` must be a live interface the caller owns a reference to.
    unsafe fn release_interface(&self, interface: NonNull<c_void>);

    /// Register a proxy under (`oid`, `td`). Returns the canonical
    /// interface, which differs from `proxy` when another thread registered
    /// the same identity first; the environment then acquires the existing
    /// interface and frees `proxy` through `free`.
    fn register_proxy(
        &self,
        proxy: NonNull<c_void>,
        oid: &str,
        td: &TypeDescription,
        free: FreeProxyFn,
    ) -> NonNull<c_void>;

    /// Revoke a previously registered proxy. The environment calls the
    /// proxy's free function when no registration remains.
    fn revoke_interface(&self, interface: NonNull<c_void>);
}
