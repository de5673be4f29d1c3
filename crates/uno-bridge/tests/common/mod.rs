//! Mock component runtime shared by the integration tests and benches
//!
//! Both environments use the same value representation; strings are boxed
//! `String`s so that leaks and double frees show up in the live counters.

#![allow(dead_code)]

use std::alloc::{self, Layout};
use std::ffi::c_void;
use std::mem::MaybeUninit;
use std::panic::{self, AssertUnwindSafe};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicIsize, AtomicUsize, Ordering};
use std::sync::{Arc, Once};

use uno_bridge::snippet::hosted;
use uno_bridge::{
    proxy, set_exception_thrower, Bridge, BridgeConfig, BridgeEnvironments, IdentityTable,
    NativeException, SnippetTable,
};
use uno_sdk::{
    Environment, FreeProxyFn, InterfaceBuilder, Mapping, MethodParameter, NativeEnvironment,
    TypeClass, TypeDescription, TypeKind, TypeRef, TypeRegistry, UnoAny, UnoInterface, EXCEPTION,
};

pub const WORD: usize = std::mem::size_of::<usize>();

// ============================================================================
// Environments
// ============================================================================

pub struct MockEnv {
    name: &'static str,
    types: Arc<TypeRegistry>,
    strings: AtomicIsize,
    destructs: AtomicUsize,
    acquire_interface: unsafe fn(NonNull<c_void>),
    release_interface: unsafe fn(NonNull<c_void>),
    identity: IdentityTable,
}

unsafe fn uno_acquire(interface: NonNull<c_void>) {
    let i = interface.as_ptr() as *mut UnoInterface;
    ((*i).acquire)(i);
}

unsafe fn uno_release(interface: NonNull<c_void>) {
    let i = interface.as_ptr() as *mut UnoInterface;
    ((*i).release)(i);
}

impl MockEnv {
    pub fn native(types: Arc<TypeRegistry>) -> Arc<Self> {
        Arc::new(MockEnv {
            name: "gcc3",
            types,
            strings: AtomicIsize::new(0),
            destructs: AtomicUsize::new(0),
            acquire_interface: proxy::acquire_interface,
            release_interface: proxy::release_interface,
            identity: IdentityTable::new(proxy::acquire_interface),
        })
    }

    pub fn component(types: Arc<TypeRegistry>) -> Arc<Self> {
        Arc::new(MockEnv {
            name: "uno",
            types,
            strings: AtomicIsize::new(0),
            destructs: AtomicUsize::new(0),
            acquire_interface: uno_acquire,
            release_interface: uno_release,
            identity: IdentityTable::new(uno_acquire),
        })
    }

    /// Strings constructed and not yet destroyed
    pub fn strings_alive(&self) -> isize {
        self.strings.load(Ordering::SeqCst)
    }

    pub fn destructs(&self) -> usize {
        self.destructs.load(Ordering::SeqCst)
    }

    pub fn registered(&self) -> usize {
        self.identity.len()
    }

    pub fn new_string(&self, value: &str) -> *mut String {
        self.strings.fetch_add(1, Ordering::SeqCst);
        Box::into_raw(Box::new(value.to_string()))
    }

    fn td(&self, ty: &TypeRef) -> Arc<TypeDescription> {
        self.types.get(ty).expect("type registered")
    }

    pub unsafe fn copy_value(&self, dest: *mut c_void, src: *mut c_void, td: &TypeDescription) {
        match td.class() {
            class if class.is_simple() => {
                ptr::copy_nonoverlapping(src as *const u8, dest as *mut u8, td.size());
            }
            TypeClass::String => {
                let s = *(src as *const *mut String);
                let copy = if s.is_null() { self.new_string("") } else { self.new_string(&*s) };
                (dest as *mut *mut String).write(copy);
            }
            TypeClass::Type => {
                let ty = &*(src as *const TypeRef);
                (dest as *mut TypeRef).write(ty.clone());
            }
            TypeClass::Any => {
                let any = &*(src as *const UnoAny);
                let any_td = self.td(&any.ty);
                self.construct_any(dest as *mut UnoAny, any.data, &any_td);
            }
            TypeClass::Interface => {
                let p = *(src as *const *mut c_void);
                if let Some(interface) = NonNull::new(p) {
                    (self.acquire_interface)(interface);
                }
                (dest as *mut *mut c_void).write(p);
            }
            TypeClass::Struct | TypeClass::Exception => {
                let TypeKind::Compound(compound) = td.kind() else { unreachable!() };
                if let Some(base) = &compound.base {
                    self.copy_value(dest, src, &self.td(base));
                }
                for member in &compound.members {
                    self.copy_value(
                        (dest as *mut u8).add(member.offset) as *mut c_void,
                        (src as *mut u8).add(member.offset) as *mut c_void,
                        &self.td(&member.ty),
                    );
                }
            }
            class => unimplemented!("mock runtime has no {:?} values", class),
        }
    }

    unsafe fn destruct_value(&self, data: *mut c_void, td: &TypeDescription) {
        match td.class() {
            class if class.is_simple() => {}
            TypeClass::String => {
                let slot = data as *mut *mut String;
                if !(*slot).is_null() {
                    drop(Box::from_raw(*slot));
                    self.strings.fetch_sub(1, Ordering::SeqCst);
                    *slot = ptr::null_mut();
                }
            }
            TypeClass::Type => ptr::drop_in_place(data as *mut TypeRef),
            TypeClass::Any => {
                let any = data as *mut UnoAny;
                self.destruct_any(&mut *any);
                ptr::drop_in_place(ptr::addr_of_mut!((*any).ty));
            }
            TypeClass::Interface => {
                if let Some(interface) = NonNull::new(*(data as *const *mut c_void)) {
                    (self.release_interface)(interface);
                }
            }
            TypeClass::Struct | TypeClass::Exception => {
                let TypeKind::Compound(compound) = td.kind() else { unreachable!() };
                for member in &compound.members {
                    self.destruct_value(
                        (data as *mut u8).add(member.offset) as *mut c_void,
                        &self.td(&member.ty),
                    );
                }
                if let Some(base) = &compound.base {
                    self.destruct_value(data, &self.td(base));
                }
            }
            class => unimplemented!("mock runtime has no {:?} values", class),
        }
    }
}

fn value_layout(td: &TypeDescription) -> Layout {
    Layout::from_size_align(td.size().max(1), td.align().max(1)).expect("valid layout")
}

impl Environment for MockEnv {
    fn name(&self) -> &str {
        self.name
    }

    unsafe fn destruct(&self, data: *mut c_void, td: &TypeDescription) {
        self.destructs.fetch_add(1, Ordering::SeqCst);
        self.destruct_value(data, td);
    }

    unsafe fn construct_any(&self, dest: *mut UnoAny, value: *mut c_void, td: &TypeDescription) {
        let data = if td.class() == TypeClass::Void {
            ptr::null_mut()
        } else {
            let data = alloc::alloc(value_layout(td)) as *mut c_void;
            self.copy_value(data, value, td);
            data
        };
        dest.write(UnoAny {
            ty: td.type_ref().clone(),
            data,
            reserved: ptr::null_mut(),
        });
    }

    unsafe fn destruct_any(&self, any: &mut UnoAny) {
        if any.data.is_null() {
            return;
        }
        let td = self.td(&any.ty);
        self.destruct_value(any.data, &td);
        alloc::dealloc(any.data as *mut u8, value_layout(&td));
        any.data = ptr::null_mut();
    }
}

impl NativeEnvironment for MockEnv {
    fn registered_interface(&self, oid: &str, td: &TypeDescription) -> Option<NonNull<c_void>> {
        self.identity.lookup(oid, td.name())
    }

    unsafe fn release_interface(&self, interface: NonNull<c_void>) {
        (self.release_interface)(interface);
    }

    fn register_proxy(
        &self,
        proxy: NonNull<c_void>,
        oid: &str,
        td: &TypeDescription,
        free: FreeProxyFn,
    ) -> NonNull<c_void> {
        self.identity.register(proxy, oid, td.name(), free)
    }

    fn revoke_interface(&self, interface: NonNull<c_void>) {
        self.identity.revoke(interface);
    }
}

/// Conversion that deep-copies into the target environment
pub struct MockMapping {
    target: Arc<MockEnv>,
    conversions: AtomicUsize,
}

impl MockMapping {
    pub fn new(target: Arc<MockEnv>) -> Arc<Self> {
        Arc::new(MockMapping {
            target,
            conversions: AtomicUsize::new(0),
        })
    }

    pub fn conversions(&self) -> usize {
        self.conversions.load(Ordering::SeqCst)
    }
}

impl Mapping for MockMapping {
    unsafe fn copy_and_convert(&self, dest: *mut c_void, src: *mut c_void, td: &TypeDescription) {
        self.conversions.fetch_add(1, Ordering::SeqCst);
        self.target.copy_value(dest, src, td);
    }
}

// ============================================================================
// Component objects
// ============================================================================

type Handler = dyn Fn(&MockCall<'_>) -> Result<(), UnoAny> + Send + Sync;

/// Component object whose dispatch function forwards to a closure
#[repr(C)]
pub struct MockObject {
    header: UnoInterface,
    refs: AtomicUsize,
    calls: AtomicUsize,
    env: Arc<MockEnv>,
    handler: Box<Handler>,
}

unsafe extern "C" fn mock_acquire(this: *mut UnoInterface) {
    (*(this as *const MockObject)).refs.fetch_add(1, Ordering::SeqCst);
}

unsafe extern "C" fn mock_release(this: *mut UnoInterface) {
    (*(this as *const MockObject)).refs.fetch_sub(1, Ordering::SeqCst);
}

unsafe extern "C" fn mock_dispatch(
    this: *mut UnoInterface,
    member: *const TypeDescription,
    ret: *mut c_void,
    args: *mut *mut c_void,
    exception: *mut *mut UnoAny,
) {
    let object = &*(this as *const MockObject);
    object.calls.fetch_add(1, Ordering::SeqCst);
    let member = &*member;
    let count = match member.kind() {
        TypeKind::Method(method) => method.params.len(),
        TypeKind::Attribute(_) => usize::from(ret.is_null()),
        _ => 0,
    };
    let call = MockCall {
        member,
        ret,
        args: if count == 0 { &[] } else { std::slice::from_raw_parts(args, count) },
        env: &object.env,
    };
    match (object.handler)(&call) {
        Ok(()) => *exception = ptr::null_mut(),
        Err(any) => (*exception).write(any),
    }
}

impl MockObject {
    pub fn new(
        env: Arc<MockEnv>,
        handler: impl Fn(&MockCall<'_>) -> Result<(), UnoAny> + Send + Sync + 'static,
    ) -> Box<Self> {
        Box::new(MockObject {
            header: UnoInterface {
                acquire: mock_acquire,
                release: mock_release,
                dispatch: mock_dispatch,
            },
            refs: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            env,
            handler: Box::new(handler),
        })
    }

    pub fn as_uno(&self) -> NonNull<UnoInterface> {
        NonNull::from(&self.header)
    }

    /// References held by the bridge
    pub fn refs(&self) -> usize {
        self.refs.load(Ordering::SeqCst)
    }

    /// Generic dispatches received
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// One dispatch as seen by the component object
pub struct MockCall<'a> {
    pub member: &'a TypeDescription,
    ret: *mut c_void,
    args: &'a [*mut c_void],
    env: &'a MockEnv,
}

impl MockCall<'_> {
    /// Member name without the interface prefix
    pub fn name(&self) -> &str {
        self.member.name().rsplit("::").next().unwrap_or_default()
    }

    pub fn is_setter(&self) -> bool {
        matches!(self.member.kind(), TypeKind::Attribute(_)) && self.ret.is_null()
    }

    pub fn ret_ptr(&self) -> *mut c_void {
        self.ret
    }

    pub fn arg_ptr(&self, index: usize) -> *mut c_void {
        self.args[index]
    }

    pub unsafe fn arg<T: Copy>(&self, index: usize) -> T {
        (self.args[index] as *const T).read_unaligned()
    }

    pub unsafe fn arg_str(&self, index: usize) -> String {
        (**(self.args[index] as *const *mut String)).clone()
    }

    pub unsafe fn arg_type(&self, index: usize) -> TypeRef {
        (*(self.args[index] as *const TypeRef)).clone()
    }

    pub unsafe fn set_return<T>(&self, value: T) {
        (self.ret as *mut T).write_unaligned(value);
    }

    pub unsafe fn set_return_str(&self, value: &str) {
        (self.ret as *mut *mut String).write(self.env.new_string(value));
    }

    pub unsafe fn set_return_void_any(&self) {
        (self.ret as *mut UnoAny).write(UnoAny::void());
    }

    /// Write an out parameter into uninitialized storage
    pub unsafe fn set_out<T>(&self, index: usize, value: T) {
        (self.args[index] as *mut T).write_unaligned(value);
    }

    pub unsafe fn set_out_str(&self, index: usize, value: &str) {
        (self.args[index] as *mut *mut String).write(self.env.new_string(value));
    }

    /// Replace a constructed in/out string
    pub unsafe fn replace_str(&self, index: usize, value: &str) {
        let string = self.env.td(&TypeRef::builtin(TypeClass::String));
        self.env.destruct_value(self.args[index], &string);
        self.set_out_str(index, value);
    }

    /// Exception container for an exception type derived from `Exception`
    pub fn raise(&self, exception: &TypeRef, message: &str) -> UnoAny {
        let env = self.env;
        let td = env.td(exception);
        let root = env.td(&TypeRef::new(TypeClass::Exception, EXCEPTION));
        let TypeKind::Compound(root) = root.kind() else { unreachable!() };
        let message_offset = root
            .members
            .iter()
            .find(|m| m.name == "Message")
            .map(|m| m.offset)
            .expect("Message member");

        unsafe {
            let layout = value_layout(&td);
            let value = alloc::alloc_zeroed(layout);
            (value.add(message_offset) as *mut *mut String).write(env.new_string(message));
            let mut any = MaybeUninit::<UnoAny>::uninit();
            env.construct_any(any.as_mut_ptr(), value as *mut c_void, &td);
            env.destruct_value(value as *mut c_void, &td);
            alloc::dealloc(value, layout);
            any.assume_init()
        }
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub types: Arc<TypeRegistry>,
    pub cpp_env: Arc<MockEnv>,
    pub uno_env: Arc<MockEnv>,
    pub cpp2uno: Arc<MockMapping>,
    pub uno2cpp: Arc<MockMapping>,
    pub bridge: Arc<Bridge>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_table(SnippetTable::target())
    }

    pub fn with_table(table: Arc<SnippetTable>) -> Self {
        install_thrower();
        let types = Arc::new(TypeRegistry::new());
        let cpp_env = MockEnv::native(types.clone());
        let uno_env = MockEnv::component(types.clone());
        let cpp2uno = MockMapping::new(uno_env.clone());
        let uno2cpp = MockMapping::new(cpp_env.clone());
        let envs = BridgeEnvironments {
            cpp_env: cpp_env.clone(),
            uno_env: uno_env.clone(),
            cpp2uno: cpp2uno.clone(),
            uno2cpp: uno2cpp.clone(),
        };
        let bridge = Bridge::with_snippets(envs, types.clone(), BridgeConfig::default(), table);
        Harness {
            types,
            cpp_env,
            uno_env,
            cpp2uno,
            uno2cpp,
            bridge,
        }
    }

    pub fn object(
        &self,
        handler: impl Fn(&MockCall<'_>) -> Result<(), UnoAny> + Send + Sync + 'static,
    ) -> Box<MockObject> {
        MockObject::new(self.uno_env.clone(), handler)
    }

    pub fn map(&self, object: &MockObject, oid: &str, ty: &TypeRef) -> NonNull<c_void> {
        self.bridge
            .map_to_cpp(object.as_uno(), oid, ty)
            .expect("proxy created")
    }
}

/// `test.XCalculator` function indices
pub mod calc {
    pub const QUERY_INTERFACE: usize = 0;
    pub const ACQUIRE: usize = 1;
    pub const RELEASE: usize = 2;
    pub const ADD: usize = 3;
    pub const NAME: usize = 4;
    pub const VALUE_GET: usize = 5;
    pub const VALUE_SET: usize = 6;
    pub const DECORATE: usize = 7;
    pub const SPLIT: usize = 8;
    pub const FAIL: usize = 9;
    pub const NARROW: usize = 10;
    pub const RENAME: usize = 11;
    pub const FUNCTIONS: usize = 12;
}

/// Register `test.XCalculator` and `test.IllegalArgumentException`
pub fn register_calculator(types: &TypeRegistry) -> (TypeRef, TypeRef) {
    let long = TypeRef::builtin(TypeClass::Long);
    let string = TypeRef::builtin(TypeClass::String);
    let illegal = types
        .register_exception(
            "test.IllegalArgumentException",
            Some(TypeRef::new(TypeClass::Exception, EXCEPTION)),
            &[],
        )
        .unwrap();
    let calc = types
        .register_interface(
            InterfaceBuilder::new("test.XCalculator")
                .method(
                    "add",
                    long.clone(),
                    vec![
                        MethodParameter::input("a", long.clone()),
                        MethodParameter::input("b", long.clone()),
                    ],
                )
                .attribute("Name", string.clone(), true)
                .attribute("Value", TypeRef::builtin(TypeClass::Double), false)
                .method(
                    "decorate",
                    TypeRef::void(),
                    vec![MethodParameter::in_out("text", string.clone())],
                )
                .method(
                    "split",
                    TypeRef::builtin(TypeClass::Boolean),
                    vec![
                        MethodParameter::input("value", long.clone()),
                        MethodParameter::output("high", long.clone()),
                        MethodParameter::output("label", string.clone()),
                    ],
                )
                .method("fail", long, vec![MethodParameter::input("reason", string.clone())])
                .raises(illegal.clone())
                .method(
                    "narrow",
                    TypeRef::builtin(TypeClass::Short),
                    vec![
                        MethodParameter::input("f", TypeRef::builtin(TypeClass::Float)),
                        MethodParameter::input("h", TypeRef::builtin(TypeClass::Hyper)),
                    ],
                )
                .method(
                    "rename",
                    TypeRef::void(),
                    vec![
                        MethodParameter::in_out("name", string.clone()),
                        MethodParameter::output("previous", string.clone()),
                    ],
                )
                .raises(illegal.clone()),
        )
        .unwrap();
    (calc, illegal)
}

// ============================================================================
// Calling through vtables
// ============================================================================

/// Code address stored in a vtable slot of a native interface
pub unsafe fn slot_code(interface: NonNull<c_void>, slot: usize) -> *const c_void {
    let vtable = *(interface.as_ptr() as *const *const *const c_void);
    *vtable.add(slot)
}

/// Call a vtable slot with a word-slot frame
pub unsafe fn call_slot(interface: NonNull<c_void>, slot: usize, frame: &mut [usize]) -> i64 {
    hosted::invoke(slot_code(interface, slot), frame.as_mut_ptr() as *mut *mut c_void)
}

pub unsafe fn acquire(interface: NonNull<c_void>) {
    call_slot(interface, 1, &mut [interface.as_ptr() as usize]);
}

pub unsafe fn release(interface: NonNull<c_void>) {
    call_slot(interface, 2, &mut [interface.as_ptr() as usize]);
}

unsafe extern "C-unwind" fn unwind_thrower(exception: *mut NativeException) -> ! {
    let exception = Box::from_raw(exception);
    panic::resume_unwind(exception)
}

pub fn install_thrower() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        set_exception_thrower(unwind_thrower);
    });
}

/// Run `f`, catching an exception raised by the thrower
pub fn catch<R>(f: impl FnOnce() -> R) -> Result<R, NativeException> {
    install_thrower();
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Ok(value),
        Err(payload) => match payload.downcast::<NativeException>() {
            Ok(exception) => Err(*exception),
            Err(other) => panic::resume_unwind(other),
        },
    }
}
