//! UNO bridge - native object model on top of component objects
//!
//! Makes component-runtime objects callable as native polymorphic objects.
//! A proxy carries synthesized vtables whose slots point into a snippet
//! table generated at build time; every call through a slot is decoded by
//! the dispatcher and forwarded to the component object's generic dispatch
//! function.
//!
//! # Example
//!
//! ```ignore
//! use uno_bridge::{Bridge, BridgeEnvironments};
//!
//! let bridge = Bridge::new(envs, types.clone());
//! let native = bridge.map_to_cpp(uno_object, "oid;1", &iface_type)?;
//! // `native` is an interface pointer native code can call through
//! ```

#![warn(missing_docs)]

pub mod abi;
pub mod bridge;
pub mod config;
pub mod cpp2uno;
pub mod defaults;
pub mod error;
pub mod except;
pub mod identity;
pub mod proxy;
pub mod rtti;
mod scratch;
pub mod snippet;
pub mod types;
pub mod vtable;

pub use abi::{target_convention, CallConvention, TargetConvention};
pub use bridge::{Bridge, BridgeEnvironments};
pub use config::BridgeConfig;
pub use cpp2uno::{cpp_vtable_call, mediate};
pub use error::{BridgeError, BridgeResult};
pub use except::{raise_exception, set_exception_thrower, NativeException, ThrowFn, UnoException};
pub use identity::IdentityTable;
pub use proxy::CppInterfaceProxy;
pub use snippet::SnippetTable;
pub use vtable::{VtableFactory, Vtables};
