//! Native-side proxies for component objects
//!
//! A [`CppInterfaceProxy`] looks like a native polymorphic object: its
//! first words are vtable pointers, so the address of the proxy is the
//! native interface pointer of its primary vtable, and the address of
//! `vtables[n]` is the interface pointer of segment `n`. Calls through any
//! slot end up in [`cpp2uno`](crate::cpp2uno), which recovers the proxy by
//! subtracting the segment's byte offset.

use std::ffi::c_void;
use std::mem::offset_of;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use uno_sdk::{NativeEnvironment, TypeDescription, UnoInterface};

use crate::bridge::Bridge;
use crate::defaults::MAX_PROXY_VTABLES;
use crate::error::{BridgeError, BridgeResult};
use crate::vtable::{Slot, Vtables};

/// Native proxy of one component interface
#[repr(C)]
pub struct CppInterfaceProxy {
    vtables: [*const Slot; MAX_PROXY_VTABLES],
    ref_count: AtomicUsize,
    bridge: Arc<Bridge>,
    uno_i: NonNull<UnoInterface>,
    td: Arc<TypeDescription>,
    oid: Arc<str>,
    blocks: Arc<Vtables>,
}

// The component interface is thread-safe by contract; everything else is
// immutable or atomic.
unsafe impl Send for CppInterfaceProxy {}
unsafe impl Sync for CppInterfaceProxy {}

impl CppInterfaceProxy {
    /// Allocate a proxy holding one reference. The component interface is
    /// acquired for the lifetime of the proxy.
    pub fn create(
        bridge: Arc<Bridge>,
        uno_i: NonNull<UnoInterface>,
        td: Arc<TypeDescription>,
        oid: Arc<str>,
    ) -> BridgeResult<NonNull<CppInterfaceProxy>> {
        if td.as_interface().is_none() {
            return Err(BridgeError::NotAnInterface(td.name().to_string()));
        }
        let blocks = bridge
            .vtables()
            .get_vtables(bridge.convention(), &td, bridge.types())?;

        unsafe { (uno_i.as_ref().acquire)(uno_i.as_ptr()) };
        tracing::debug!(oid = &*oid, interface = td.name(), "proxy created");

        let proxy = Box::new(CppInterfaceProxy {
            vtables: blocks.pointers(),
            ref_count: AtomicUsize::new(1),
            bridge,
            uno_i,
            td,
            oid,
            blocks,
        });
        Ok(NonNull::from(Box::leak(proxy)))
    }

    /// Bridge the proxy belongs to
    #[inline]
    pub fn bridge(&self) -> &Arc<Bridge> {
        &self.bridge
    }

    /// Wrapped component interface
    #[inline]
    pub fn uno_interface(&self) -> NonNull<UnoInterface> {
        self.uno_i
    }

    /// Description of the proxied interface type
    #[inline]
    pub fn type_description(&self) -> &Arc<TypeDescription> {
        &self.td
    }

    /// Object identifier
    #[inline]
    pub fn oid(&self) -> &Arc<str> {
        &self.oid
    }

    /// Current reference count
    pub fn ref_count(&self) -> usize {
        self.ref_count.load(Ordering::Acquire)
    }

    /// Native interface pointer of a vtable segment
    pub fn segment_interface(&self, segment: usize) -> Option<NonNull<c_void>> {
        if segment >= self.blocks.blocks().len() {
            return None;
        }
        Some(NonNull::from(&self.vtables[segment]).cast())
    }
}

impl Drop for CppInterfaceProxy {
    fn drop(&mut self) {
        unsafe { (self.uno_i.as_ref().release)(self.uno_i.as_ptr()) };
        tracing::debug!(oid = &*self.oid, interface = self.td.name(), "proxy destroyed");
    }
}

/// Native interface pointer of the primary vtable
#[inline]
pub fn cast_proxy_to_interface(proxy: NonNull<CppInterfaceProxy>) -> NonNull<c_void> {
    let vtables = unsafe { std::ptr::addr_of_mut!((*proxy.as_ptr()).vtables) };
    // Derived from a non-null pointer.
    unsafe { NonNull::new_unchecked(vtables as *mut c_void) }
}

/// Recover the proxy from a native interface pointer of the segment at
/// byte offset `vtable_offset`
#[inline]
pub fn cast_interface_to_proxy(interface: *mut c_void, vtable_offset: usize) -> *mut CppInterfaceProxy {
    (interface as *mut u8).wrapping_sub(vtable_offset + offset_of!(CppInterfaceProxy, vtables))
        as *mut CppInterfaceProxy
}

/// Take one reference. A proxy coming back from zero registers itself
/// again with the native environment.
///
/// # Safety
///
/// `proxy` must point to a live proxy.
pub unsafe fn acquire_proxy(proxy: *const CppInterfaceProxy) {
    let this = &*proxy;
    if this.ref_count.fetch_add(1, Ordering::AcqRel) == 0 {
        let interface = cast_proxy_to_interface(NonNull::from(this));
        let registered = this.bridge.cpp_env().register_proxy(
            interface,
            &this.oid,
            &this.td,
            free_cpp_interface_proxy,
        );
        if registered != interface {
            tracing::warn!(oid = &*this.oid, "resurrected proxy was exchanged on registration");
        }
    }
}

/// Drop one reference. The last release revokes the proxy from the native
/// environment, which frees it.
///
/// # Safety
///
/// `proxy` must point to a live proxy the caller holds a reference to; the
/// proxy must not be used afterwards.
pub unsafe fn release_proxy(proxy: *const CppInterfaceProxy) {
    if (*proxy).ref_count.fetch_sub(1, Ordering::AcqRel) == 1 {
        // The environment frees the proxy, and with it possibly the bridge.
        let env: Arc<dyn NativeEnvironment> = (*proxy).bridge.cpp_env().clone();
        let interface = cast_proxy_to_interface(NonNull::new_unchecked(proxy as *mut CppInterfaceProxy));
        env.revoke_interface(interface);
    }
}

/// Free function handed to the native environment on registration
///
/// # Safety
///
/// `interface` must be the primary interface pointer of a proxy with no
/// remaining references or registrations.
pub unsafe fn free_cpp_interface_proxy(interface: NonNull<c_void>) {
    let proxy = cast_interface_to_proxy(interface.as_ptr(), 0);
    drop(Box::from_raw(proxy));
}

/// [`acquire_proxy`] on a primary interface pointer
///
/// # Safety
///
/// `interface` must be the primary interface pointer of a live proxy.
pub unsafe fn acquire_interface(interface: NonNull<c_void>) {
    acquire_proxy(cast_interface_to_proxy(interface.as_ptr(), 0));
}

/// [`release_proxy`] on a primary interface pointer
///
/// # Safety
///
/// As for [`release_proxy`].
pub unsafe fn release_interface(interface: NonNull<c_void>) {
    release_proxy(cast_interface_to_proxy(interface.as_ptr(), 0));
}
