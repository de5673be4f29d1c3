//! Exception translation
//!
//! Exceptions leave the dispatcher as a [`NativeException`]: either a fault
//! detected by the bridge itself or a component exception already converted
//! into native representation. Unwinding into the native caller is the job
//! of the thrower installed with [`set_exception_thrower`]; the bridge never
//! unwinds on its own.

use std::alloc::{self, Layout};
use std::ffi::c_void;
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use uno_sdk::{NativeEnvironment, TypeDescription, UnoAny, RUNTIME_EXCEPTION};

use crate::bridge::Bridge;
use crate::rtti;

/// Exception raised toward the native caller
#[derive(Debug, thiserror::Error)]
pub enum NativeException {
    /// Fault detected by the bridge
    #[error("{message}")]
    Runtime {
        /// Description of the fault
        message: String,
        /// Object identifier of the proxy involved, if any
        context: Option<Arc<str>>,
    },

    /// Exception raised by the component
    #[error("{0}")]
    Uno(UnoException),
}

impl NativeException {
    /// Runtime fault without context
    pub fn runtime(message: impl Into<String>) -> Self {
        NativeException::Runtime {
            message: message.into(),
            context: None,
        }
    }

    /// Runtime fault attributed to an object
    pub fn runtime_in(message: impl Into<String>, oid: &Arc<str>) -> Self {
        NativeException::Runtime {
            message: message.into(),
            context: Some(oid.clone()),
        }
    }

    /// Component type name of the exception
    pub fn type_name(&self) -> &str {
        match self {
            NativeException::Runtime { .. } => RUNTIME_EXCEPTION,
            NativeException::Uno(exc) => exc.type_name(),
        }
    }

    /// Itanium name of the native exception type
    pub fn mangled_type_name(&self) -> String {
        rtti::mangle(self.type_name())
    }
}

/// Component exception converted into native representation.
///
/// Owns the native value and destroys it through the native environment
/// when dropped.
pub struct UnoException {
    td: Arc<TypeDescription>,
    data: NonNull<u8>,
    layout: Layout,
    env: Arc<dyn NativeEnvironment>,
}

// The value is owned exclusively; the environment is Send + Sync.
unsafe impl Send for UnoException {}

impl UnoException {
    /// Component type name
    pub fn type_name(&self) -> &str {
        self.td.name()
    }

    /// Description of the exception type
    pub fn type_description(&self) -> &Arc<TypeDescription> {
        &self.td
    }

    /// The native exception value
    pub fn as_ptr(&self) -> *mut c_void {
        self.data.as_ptr() as *mut c_void
    }
}

impl Drop for UnoException {
    fn drop(&mut self) {
        unsafe {
            self.env.destruct(self.as_ptr(), &self.td);
            alloc::dealloc(self.data.as_ptr(), self.layout);
        }
    }
}

impl fmt::Debug for UnoException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnoException")
            .field("type", &self.td.name())
            .field("env", &self.env.name())
            .finish()
    }
}

impl fmt::Display for UnoException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "component exception {}", self.td.name())
    }
}

/// Convert a component exception container into a native exception.
///
/// The container is destroyed in every case.
pub fn raise_exception(bridge: &Bridge, mut exception: UnoAny) -> NativeException {
    let uno_env = bridge.uno_env();
    let Some(td) = bridge.types().acquire(&exception.ty) else {
        let message = format!("cannot get typedescription for type {}", exception.ty.name());
        unsafe { uno_env.destruct_any(&mut exception) };
        tracing::warn!(%message, "dropping component exception");
        return NativeException::runtime(message);
    };

    let Ok(layout) = Layout::from_size_align(td.size().max(1), td.align().max(1)) else {
        unsafe { uno_env.destruct_any(&mut exception) };
        return NativeException::runtime(format!("invalid layout for exception {}", td.name()));
    };
    let Some(data) = NonNull::new(unsafe { alloc::alloc(layout) }) else {
        unsafe { uno_env.destruct_any(&mut exception) };
        return NativeException::runtime(format!("out of memory converting {}", td.name()));
    };

    unsafe {
        bridge
            .uno2cpp()
            .copy_and_convert(data.as_ptr() as *mut c_void, exception.data, &td);
        uno_env.destruct_any(&mut exception);
    }
    tracing::debug!(exception = td.name(), "component exception converted");

    NativeException::Uno(UnoException {
        td: td.shared(),
        data,
        layout,
        env: bridge.cpp_env().clone(),
    })
}

// ============================================================================
// Native thrower
// ============================================================================

/// Raises a native exception in the caller's frame. Ownership of the boxed
/// exception passes to the thrower.
pub type ThrowFn = unsafe extern "C-unwind" fn(exception: *mut NativeException) -> !;

static THROWER: OnceCell<ThrowFn> = OnceCell::new();

/// Install the process-wide thrower. Returns `false` if one is already
/// installed.
pub fn set_exception_thrower(thrower: ThrowFn) -> bool {
    THROWER.set(thrower).is_ok()
}

/// Hand an exception to the installed thrower, aborting when there is none.
pub(crate) unsafe fn throw(exception: NativeException) -> ! {
    match THROWER.get() {
        Some(thrower) => thrower(Box::into_raw(Box::new(exception))),
        None => {
            tracing::error!(
                exception = exception.type_name(),
                %exception,
                "no exception thrower installed"
            );
            std::process::abort()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_exception_names() {
        let oid: Arc<str> = Arc::from("oid;1");
        let exc = NativeException::runtime_in("illegal vtable index!", &oid);
        assert_eq!(exc.to_string(), "illegal vtable index!");
        assert_eq!(exc.type_name(), RUNTIME_EXCEPTION);
        assert_eq!(exc.mangled_type_name(), "N3com3sun4star3uno16RuntimeExceptionE");
        match exc {
            NativeException::Runtime { context, .. } => assert_eq!(context.as_deref(), Some("oid;1")),
            NativeException::Uno(_) => panic!("expected runtime exception"),
        }
    }
}
