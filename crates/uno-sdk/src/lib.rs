//! UNO SDK - type library and runtime contracts
//!
//! This crate holds what every language bridge of the component runtime
//! shares: type classes and references, type descriptions with their
//! function-index tables, the process type registry, and the traits through
//! which a bridge reaches the runtime's environments.
//!
//! # Example
//!
//! ```ignore
//! use uno_sdk::{InterfaceBuilder, MethodParameter, TypeClass, TypeRef, TypeRegistry};
//!
//! let registry = TypeRegistry::new();
//! let long = TypeRef::builtin(TypeClass::Long);
//! let adder = registry.register_interface(
//!     InterfaceBuilder::new("test.XAdder").method(
//!         "add",
//!         long.clone(),
//!         vec![MethodParameter::input("a", long.clone()), MethodParameter::input("b", long)],
//!     ),
//! )?;
//! ```

#![warn(missing_docs)]

pub mod description;
pub mod environment;
pub mod error;
pub mod registry;
pub mod types;

pub use description::{
    AttributeDescription, CompoundMember, CompoundTypeDescription, EnumTypeDescription,
    InterfaceTypeDescription, MethodDescription, MethodParameter, TypeDescription, TypeKind,
};
pub use environment::{
    Environment, FreeProxyFn, Mapping, NativeEnvironment, UnoAny, UnoDispatchFn, UnoInterface,
};
pub use error::{TypelibError, TypelibResult};
pub use registry::{
    InterfaceBuilder, TypeGuard, TypeRegistry, EXCEPTION, RUNTIME_EXCEPTION, XINTERFACE,
};
pub use types::{TypeClass, TypeRef};
