//! Centralized default values for the bridge

/// Name of the native environment
pub const DEFAULT_CPP_ENV_NAME: &str = "gcc3";

/// Name of the component environment
pub const DEFAULT_UNO_ENV_NAME: &str = "uno";

/// Interface types whose vtables stay cached
pub const DEFAULT_MAX_CACHED_VTABLES: usize = 1024;

/// Inline bytes of per-call argument scratch before spilling to the heap
pub const SCRATCH_INLINE_BYTES: usize = 512;

/// Vtable pointers a proxy can hold
pub const MAX_PROXY_VTABLES: usize = crate::snippet::VTABLE_SEGMENTS as usize;
