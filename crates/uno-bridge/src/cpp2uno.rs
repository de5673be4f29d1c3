//! Native-to-component dispatcher
//!
//! Entered from the snippet executor with the snippet's data words and the
//! spilled call stack. Decodes the native call, marshals the arguments
//! into component representation, dispatches through the component
//! object's generic dispatch function and converts results, out
//! parameters and exceptions back.

use std::ffi::c_void;
use std::mem::MaybeUninit;
use std::ptr::{self, NonNull};

use uno_sdk::{MethodParameter, TypeClass, TypeDescription, TypeGuard, TypeRef, UnoAny};

use crate::abi::{
    target_convention, ArgCursor, CallConvention, CallFrame, RegisterReturn, REGISTER_RETURN_BYTES,
};
use crate::bridge::Bridge;
use crate::except::{raise_exception, throw, NativeException};
use crate::proxy::{acquire_proxy, cast_interface_to_proxy, release_proxy, CppInterfaceProxy};
use crate::scratch::{Scratch, ScratchStorage};
use crate::snippet::HIDDEN_RETURN_FLAG;
use crate::types::needs_conversion;

// ============================================================================
// Entry points
// ============================================================================

/// Executor entry point.
///
/// `function_and_offset` points to the snippet's data words: the function
/// index (high bit set when a hidden return pointer precedes `this`) and
/// the byte offset of the vtable pointer inside the proxy. The result is
/// the register return, narrowed to the width of the returned type.
///
/// # Safety
///
/// Must only be reached through a snippet of a live proxy, with
/// `call_stack` laid out by the target calling convention.
#[no_mangle]
pub unsafe extern "C-unwind" fn cpp_vtable_call(
    function_and_offset: *const u32,
    call_stack: *mut *mut c_void,
) -> i64 {
    let function_index = function_and_offset.read_unaligned();
    let vtable_offset = function_and_offset.add(1).read_unaligned();

    let convention = target_convention();
    let mut register_return: RegisterReturn = [0; REGISTER_RETURN_BYTES / 8];
    match mediate(
        &convention,
        function_index,
        vtable_offset,
        call_stack,
        &mut register_return,
    ) {
        Ok(class) => {
            convention.store_register_return(CallFrame::new(call_stack), &register_return);
            narrow_register_return(class, &register_return[0]) as i64
        }
        Err(exception) => throw(exception),
    }
}

/// Zero-extend the bytes the callee actually wrote.
fn narrow_register_return(class: TypeClass, value: &u64) -> u64 {
    let bytes = value as *const u64 as *const u8;
    unsafe {
        match class {
            TypeClass::Boolean | TypeClass::Byte => u64::from(bytes.read()),
            TypeClass::Char | TypeClass::Short | TypeClass::UnsignedShort => {
                u64::from((bytes as *const u16).read())
            }
            TypeClass::Enum | TypeClass::Long | TypeClass::UnsignedLong => {
                u64::from((bytes as *const u32).read())
            }
            _ => *value,
        }
    }
}

/// Dispatch one native call.
///
/// Returns the type class of the return value; the value itself (or, for
/// hidden returns, the native return pointer) is stored at the start of
/// `register_return`.
///
/// # Safety
///
/// `call_stack` must be a frame laid out by `convention` whose `this`
/// points `vtable_offset` bytes into a live proxy.
pub unsafe fn mediate<C: CallConvention>(
    convention: &C,
    function_index: u32,
    vtable_offset: u32,
    call_stack: *mut *mut c_void,
    register_return: &mut RegisterReturn,
) -> Result<TypeClass, NativeException> {
    let hidden = function_index & HIDDEN_RETURN_FLAG != 0;
    let function_index = (function_index & !HIDDEN_RETURN_FLAG) as usize;

    let frame = CallFrame::new(call_stack);
    let this = frame.read_ptr(convention.this_location(hidden));
    let proxy = cast_interface_to_proxy(this, vtable_offset as usize);

    // Owned handles: a release may free the proxy before this returns.
    let bridge = (*proxy).bridge().clone();
    let oid = (*proxy).oid().clone();
    let td = (*proxy).type_description().clone();

    let Some(iface) = td.as_interface() else {
        return Err(NativeException::runtime_in("no member description found!", &oid));
    };
    let Some(member_index) = iface.member_for_function(function_index) else {
        tracing::error!(
            oid = &*oid,
            interface = td.name(),
            function_index,
            functions = iface.function_count(),
            "illegal vtable index"
        );
        return Err(NativeException::runtime_in("illegal vtable index!", &oid));
    };

    let types = bridge.types();
    let Some(member) = types.acquire(&iface.all_members()[member_index]) else {
        return Err(NativeException::runtime_in("no member description found!", &oid));
    };
    tracing::trace!(oid = &*oid, member = member.name(), function_index, "cpp2uno");

    let dispatch = Dispatch {
        convention,
        bridge: &bridge,
        proxy: &*proxy,
        frame,
    };

    if let Some(attr) = member.as_attribute() {
        return if iface.first_function(member_index) == Some(function_index) {
            dispatch.call(&member, Some(&attr.ty), &[], register_return)
        } else {
            let params = [MethodParameter::input(String::new(), attr.ty.clone())];
            dispatch.call(&member, None, &params, register_return)
        };
    }
    match member.as_method() {
        Some(method) => match function_index {
            1 => {
                acquire_proxy(proxy);
                Ok(TypeClass::Void)
            }
            2 => {
                release_proxy(proxy);
                Ok(TypeClass::Void)
            }
            0 => {
                if hidden {
                    if let Some(class) = dispatch.query_interface(register_return) {
                        return Ok(class);
                    }
                }
                dispatch.call(&member, method.return_type.as_ref(), &method.params, register_return)
            }
            _ => dispatch.call(&member, method.return_type.as_ref(), &method.params, register_return),
        },
        None => Err(NativeException::runtime_in("no member description found!", &oid)),
    }
}

// ============================================================================
// Dispatch
// ============================================================================

struct Dispatch<'a, C> {
    convention: &'a C,
    bridge: &'a Bridge,
    proxy: &'a CppInterfaceProxy,
    frame: CallFrame,
}

impl<C: CallConvention> Dispatch<'_, C> {
    fn runtime(&self, message: impl Into<String>) -> NativeException {
        NativeException::runtime_in(message, self.proxy.oid())
    }

    /// Answer `queryInterface` from the native registration table.
    ///
    /// Returns `None` when the generic dispatch path has to run.
    unsafe fn query_interface(&self, register_return: &mut RegisterReturn) -> Option<TypeClass> {
        let mut cursor = self.convention.cursor();
        let ret = self.frame.read_ptr(cursor.indirect());
        cursor.indirect(); // this
        let requested = self.frame.read_ptr(cursor.indirect()) as *const TypeRef;
        if ret.is_null() || requested.is_null() {
            return None;
        }

        let types = self.bridge.types();
        let td = types.acquire(&*requested)?;
        let cpp_env = self.bridge.cpp_env();
        let mut interface = cpp_env.registered_interface(self.proxy.oid(), &td)?;

        // The any takes its own reference.
        cpp_env.construct_any(
            ret as *mut UnoAny,
            &mut interface as *mut NonNull<c_void> as *mut c_void,
            &td,
        );
        cpp_env.release_interface(interface);
        tracing::trace!(oid = &**self.proxy.oid(), interface = td.name(), "queryInterface answered natively");

        register_return[0] = ret as usize as u64;
        Some(TypeClass::Any)
    }

    /// General path: marshal, dispatch, unmarshal.
    unsafe fn call(
        &self,
        member: &TypeDescription,
        return_type: Option<&TypeRef>,
        params: &[MethodParameter],
        register_return: &mut RegisterReturn,
    ) -> Result<TypeClass, NativeException> {
        let bridge = self.bridge;
        let types = bridge.types();
        let mut cursor = self.convention.cursor();
        let mut storage = ScratchStorage::new();
        let mut scratch = Scratch::new(&mut storage);

        // Return value
        let return_td = match return_type {
            Some(ty) => Some(types.acquire(ty).ok_or_else(|| {
                self.runtime(format!("cannot get typedescription for type {}", ty.name()))
            })?),
            None => None,
        };
        let mut cpp_return: *mut c_void = ptr::null_mut();
        let mut uno_return: *mut c_void = ptr::null_mut();
        if let Some(rtd) = &return_td {
            if self.convention.return_in_hidden_param(rtd.type_ref(), types) {
                cpp_return = self.frame.read_ptr(cursor.indirect());
                uno_return = if needs_conversion(rtd, types) {
                    self.alloc(&mut scratch, rtd)?
                } else {
                    cpp_return
                };
            } else {
                if rtd.size() > REGISTER_RETURN_BYTES {
                    return Err(self.runtime(format!(
                        "return value of type {} does not fit the return registers",
                        rtd.name()
                    )));
                }
                uno_return = register_return.as_mut_ptr() as *mut c_void;
            }
        }

        cursor.indirect(); // this

        // Parameters
        let count = params.len();
        let uno_args = scratch
            .alloc_array::<*mut c_void>(count.max(1))
            .ok_or_else(|| self.runtime("out of memory"))?
            .as_ptr();
        let cpp_args = scratch
            .alloc_array::<*mut c_void>(count.max(1))
            .ok_or_else(|| self.runtime("out of memory"))?
            .as_ptr();
        let mut temps = TempParams::new(bridge, count);

        for (index, param) in params.iter().enumerate() {
            let class = param.ty.class();
            if class.is_simple() && !param.is_out {
                let arg = self.frame.address(cursor.simple(class));
                *uno_args.add(index) = arg;
                *cpp_args.add(index) = arg;
                continue;
            }

            let cpp_arg = self.frame.read_ptr(cursor.indirect());
            *cpp_args.add(index) = cpp_arg;
            let td = types.acquire(&param.ty).ok_or_else(|| {
                self.runtime(format!("cannot get typedescription for type {}", param.ty.name()))
            })?;

            if !param.is_in {
                // pure out: the callee constructs the value
                let uno_arg = self.alloc(&mut scratch, &td)?;
                *uno_args.add(index) = uno_arg;
                temps.push(TempParam {
                    index,
                    td,
                    uno_arg,
                    constructed: false,
                    is_out: true,
                });
            } else if needs_conversion(&td, types) {
                let uno_arg = self.alloc(&mut scratch, &td)?;
                bridge.cpp2uno().copy_and_convert(uno_arg, cpp_arg, &td);
                *uno_args.add(index) = uno_arg;
                temps.push(TempParam {
                    index,
                    td,
                    uno_arg,
                    constructed: true,
                    is_out: param.is_out,
                });
            } else {
                *uno_args.add(index) = cpp_arg;
            }
        }

        // Dispatch
        let mut exception_storage = MaybeUninit::<UnoAny>::uninit();
        let mut exception: *mut UnoAny = exception_storage.as_mut_ptr();
        let uno_i = self.proxy.uno_interface().as_ptr();
        ((*uno_i).dispatch)(
            uno_i,
            member as *const TypeDescription,
            uno_return,
            uno_args,
            &mut exception,
        );

        if !exception.is_null() {
            temps.discard();
            drop(return_td);
            return Err(raise_exception(bridge, ptr::read(exception)));
        }

        temps.reconvert(cpp_args);

        let Some(rtd) = return_td else {
            return Ok(TypeClass::Void);
        };
        if !cpp_return.is_null() {
            if uno_return != cpp_return {
                bridge.uno2cpp().copy_and_convert(cpp_return, uno_return, &rtd);
                bridge.uno_env().destruct(uno_return, &rtd);
            }
            register_return[0] = cpp_return as usize as u64;
        }
        Ok(rtd.class())
    }

    fn alloc(&self, scratch: &mut Scratch<'_>, td: &TypeDescription) -> Result<*mut c_void, NativeException> {
        scratch
            .alloc(td.size(), td.align())
            .map(NonNull::as_ptr)
            .ok_or_else(|| self.runtime("out of memory"))
    }
}

// ============================================================================
// Temporaries
// ============================================================================

struct TempParam<'r> {
    index: usize,
    td: TypeGuard<'r>,
    uno_arg: *mut c_void,
    constructed: bool,
    is_out: bool,
}

/// Component-side temporaries of one call. Dropping without
/// [`reconvert`](TempParams::reconvert) destroys whatever was constructed.
struct TempParams<'r> {
    bridge: &'r Bridge,
    params: Vec<TempParam<'r>>,
}

impl<'r> TempParams<'r> {
    fn new(bridge: &'r Bridge, capacity: usize) -> Self {
        TempParams {
            bridge,
            params: Vec::with_capacity(capacity),
        }
    }

    fn push(&mut self, param: TempParam<'r>) {
        self.params.push(param);
    }

    /// Exception path: the callee constructed nothing, so only converted
    /// inputs are destroyed.
    fn discard(&mut self) {
        let env = self.bridge.uno_env();
        for param in self.params.drain(..) {
            if param.constructed {
                unsafe { env.destruct(param.uno_arg, &param.td) };
            }
        }
    }

    /// Success path: copy out values back into the native arguments and
    /// destroy every temporary.
    unsafe fn reconvert(mut self, cpp_args: *mut *mut c_void) {
        let cpp_env = self.bridge.cpp_env();
        let uno_env = self.bridge.uno_env();
        while let Some(param) = self.params.pop() {
            if param.is_out {
                let cpp_arg = *cpp_args.add(param.index);
                cpp_env.destruct(cpp_arg, &param.td);
                self.bridge
                    .uno2cpp()
                    .copy_and_convert(cpp_arg, param.uno_arg, &param.td);
            }
            uno_env.destruct(param.uno_arg, &param.td);
        }
    }
}

impl Drop for TempParams<'_> {
    fn drop(&mut self) {
        self.discard();
    }
}
