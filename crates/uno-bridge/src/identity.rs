//! Native-side registration table
//!
//! Keeps at most one native interface per (object identifier, interface
//! type). Native environments delegate their identity bookkeeping here.
//!
//! The lock is reentrant: acquiring a revoked proxy from inside a lookup
//! re-registers it on the same thread. Acquire and free callbacks always
//! run with the map itself unborrowed.

use std::cell::RefCell;
use std::ffi::c_void;
use std::ptr::NonNull;

use parking_lot::ReentrantMutex;
use rustc_hash::FxHashMap;
use uno_sdk::FreeProxyFn;

/// Acquire one reference to a native interface
pub type AcquireFn = unsafe fn(interface: NonNull<c_void>);

struct Entry {
    interface: NonNull<c_void>,
    free: FreeProxyFn,
    registrations: usize,
}

#[derive(Default)]
struct Tables {
    by_identity: FxHashMap<Box<str>, FxHashMap<Box<str>, Entry>>,
    by_pointer: FxHashMap<usize, (Box<str>, Box<str>)>,
}

/// Registration table keyed by (oid, interface type name)
pub struct IdentityTable {
    tables: ReentrantMutex<RefCell<Tables>>,
    acquire: AcquireFn,
}

// Registered pointers are only dereferenced through the callbacks, under
// the table lock.
unsafe impl Send for IdentityTable {}
unsafe impl Sync for IdentityTable {}

impl IdentityTable {
    /// Empty table. `acquire` is used to hand out references to registered
    /// interfaces.
    pub fn new(acquire: AcquireFn) -> Self {
        IdentityTable {
            tables: ReentrantMutex::new(RefCell::new(Tables::default())),
            acquire,
        }
    }

    /// Register `interface` under (`oid`, `type_name`) and return the
    /// canonical interface.
    ///
    /// Registering the pointer already stored there counts one more
    /// registration. If a different interface is registered, that one is
    /// acquired and returned and `interface` is freed.
    pub fn register(
        &self,
        interface: NonNull<c_void>,
        oid: &str,
        type_name: &str,
        free: FreeProxyFn,
    ) -> NonNull<c_void> {
        let guard = self.tables.lock();
        let existing = {
            let mut cell = guard.borrow_mut();
            let tables = &mut *cell;
            let by_type = tables.by_identity.entry(oid.into()).or_default();
            match by_type.get_mut(type_name) {
                Some(entry) if entry.interface == interface => {
                    entry.registrations += 1;
                    return interface;
                }
                Some(entry) => Some(entry.interface),
                None => {
                    by_type.insert(
                        type_name.into(),
                        Entry {
                            interface,
                            free,
                            registrations: 1,
                        },
                    );
                    tables
                        .by_pointer
                        .insert(interface.as_ptr() as usize, (oid.into(), type_name.into()));
                    None
                }
            }
        };

        match existing {
            Some(canonical) => {
                unsafe { (self.acquire)(canonical) };
                drop(guard);
                tracing::debug!(oid, type_name, "identity already registered, freeing duplicate");
                unsafe { free(interface) };
                canonical
            }
            None => interface,
        }
    }

    /// Registered interface for (`oid`, `type_name`), acquired
    pub fn lookup(&self, oid: &str, type_name: &str) -> Option<NonNull<c_void>> {
        let guard = self.tables.lock();
        let found = guard
            .borrow()
            .by_identity
            .get(oid)
            .and_then(|by_type| by_type.get(type_name))
            .map(|entry| entry.interface)?;
        unsafe { (self.acquire)(found) };
        drop(guard);
        Some(found)
    }

    /// Drop one registration of `interface`; frees it when none remain.
    /// Returns `false` if the pointer is not registered.
    pub fn revoke(&self, interface: NonNull<c_void>) -> bool {
        let guard = self.tables.lock();
        let freed = {
            let mut cell = guard.borrow_mut();
            let tables = &mut *cell;
            let Some((oid, type_name)) = tables.by_pointer.get(&(interface.as_ptr() as usize)).cloned() else {
                return false;
            };
            let Some(by_type) = tables.by_identity.get_mut(&oid) else {
                return false;
            };
            let Some(entry) = by_type.get_mut(&type_name) else {
                return false;
            };
            entry.registrations -= 1;
            if entry.registrations > 0 {
                None
            } else {
                let entry = by_type.remove(&type_name);
                if by_type.is_empty() {
                    tables.by_identity.remove(&oid);
                }
                tables.by_pointer.remove(&(interface.as_ptr() as usize));
                entry
            }
        };
        drop(guard);

        if let Some(entry) = freed {
            unsafe { (entry.free)(entry.interface) };
        }
        true
    }

    /// Number of registered interfaces
    pub fn len(&self) -> usize {
        self.tables.lock().borrow().by_pointer.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for IdentityTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityTable").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // Test objects are plain counters: [acquired, freed]
    type Counters = [AtomicUsize; 2];

    unsafe fn acquire(interface: NonNull<c_void>) {
        interface.cast::<Counters>().as_ref()[0].fetch_add(1, Ordering::SeqCst);
    }

    unsafe fn free(interface: NonNull<c_void>) {
        interface.cast::<Counters>().as_ref()[1].fetch_add(1, Ordering::SeqCst);
    }

    fn object() -> Box<Counters> {
        Box::new([AtomicUsize::new(0), AtomicUsize::new(0)])
    }

    fn ptr(obj: &Counters) -> NonNull<c_void> {
        NonNull::from(obj).cast()
    }

    #[test]
    fn test_register_lookup_revoke() {
        let table = IdentityTable::new(acquire);
        let a = object();
        assert_eq!(table.register(ptr(&a), "oid", "test.XFoo", free), ptr(&a));
        assert_eq!(table.len(), 1);

        assert_eq!(table.lookup("oid", "test.XFoo"), Some(ptr(&a)));
        assert_eq!(a[0].load(Ordering::SeqCst), 1);
        assert!(table.lookup("oid", "test.XBar").is_none());
        assert!(table.lookup("other", "test.XFoo").is_none());

        assert!(table.revoke(ptr(&a)));
        assert_eq!(a[1].load(Ordering::SeqCst), 1);
        assert!(table.is_empty());
        assert!(!table.revoke(ptr(&a)));
    }

    #[test]
    fn test_duplicate_registration_is_exchanged() {
        let table = IdentityTable::new(acquire);
        let a = object();
        let b = object();
        table.register(ptr(&a), "oid", "test.XFoo", free);
        let canonical = table.register(ptr(&b), "oid", "test.XFoo", free);
        assert_eq!(canonical, ptr(&a));
        assert_eq!(a[0].load(Ordering::SeqCst), 1);
        assert_eq!(b[1].load(Ordering::SeqCst), 1);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_reregistration_counts() {
        let table = IdentityTable::new(acquire);
        let a = object();
        table.register(ptr(&a), "oid", "test.XFoo", free);
        table.register(ptr(&a), "oid", "test.XFoo", free);
        assert!(table.revoke(ptr(&a)));
        assert_eq!(a[1].load(Ordering::SeqCst), 0);
        assert!(table.revoke(ptr(&a)));
        assert_eq!(a[1].load(Ordering::SeqCst), 1);
    }
}
