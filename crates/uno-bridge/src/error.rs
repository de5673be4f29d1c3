//! Error types for vtable synthesis and proxy creation
//!
//! Errors raised while a native call is being dispatched are not
//! `BridgeError`s: they travel to the caller as
//! [`NativeException`](crate::except::NativeException).

use uno_sdk::TypelibError;

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Bridge error types
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    /// No precompiled snippet exists for a slot
    #[error(
        "No snippet for function index {function_index} in vtable segment {vtable_segment} \
         (table covers {function_indices} functions x {vtable_segments} segments)"
    )]
    SnippetOutOfRange {
        /// Requested function index
        function_index: usize,
        /// Requested vtable segment
        vtable_segment: usize,
        /// Function indices covered by the table
        function_indices: u32,
        /// Segments covered by the table
        vtable_segments: u32,
    },

    /// An interface needs more vtables than a proxy can hold
    #[error("Interface {interface} needs {needed} vtables, proxies hold at most {max}")]
    TooManyVtables {
        /// Interface name
        interface: String,
        /// Vtables required
        needed: usize,
        /// Proxy capacity
        max: usize,
    },

    /// A referenced type is not registered
    #[error("Unknown type: {0}")]
    UnknownType(String),

    /// A type used as an interface is something else
    #[error("Not an interface type: {0}")]
    NotAnInterface(String),

    /// An interface member is neither a method nor an attribute
    #[error("Unexpected member {member} in interface {interface}")]
    UnexpectedMember {
        /// Interface name
        interface: String,
        /// Member name
        member: String,
    },

    /// Type library failure
    #[error(transparent)]
    Typelib(#[from] TypelibError),
}
