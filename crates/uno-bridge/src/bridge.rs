//! Shared context of one native/component environment pair

use std::ffi::c_void;
use std::ptr::NonNull;
use std::sync::Arc;

use uno_sdk::{Environment, Mapping, NativeEnvironment, TypeRef, TypeRegistry, UnoInterface};

use crate::abi::{target_convention, TargetConvention};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::proxy::{cast_proxy_to_interface, free_cpp_interface_proxy, CppInterfaceProxy};
use crate::snippet::SnippetTable;
use crate::vtable::VtableFactory;

/// Environments and mappings a bridge connects
#[derive(Clone)]
pub struct BridgeEnvironments {
    /// Native environment
    pub cpp_env: Arc<dyn NativeEnvironment>,
    /// Component environment
    pub uno_env: Arc<dyn Environment>,
    /// Native to component conversion
    pub cpp2uno: Arc<dyn Mapping>,
    /// Component to native conversion
    pub uno2cpp: Arc<dyn Mapping>,
}

/// Bridge between a native and a component environment.
///
/// Every proxy holds an `Arc` to its bridge, so the bridge lives as long
/// as the last proxy.
pub struct Bridge {
    cpp_env: Arc<dyn NativeEnvironment>,
    uno_env: Arc<dyn Environment>,
    cpp2uno: Arc<dyn Mapping>,
    uno2cpp: Arc<dyn Mapping>,
    types: Arc<TypeRegistry>,
    vtables: VtableFactory,
    convention: TargetConvention,
    config: BridgeConfig,
}

impl Bridge {
    /// Bridge with the default configuration
    pub fn new(envs: BridgeEnvironments, types: Arc<TypeRegistry>) -> Arc<Self> {
        Self::with_config(envs, types, BridgeConfig::default())
    }

    /// Bridge with a custom configuration
    pub fn with_config(
        envs: BridgeEnvironments,
        types: Arc<TypeRegistry>,
        config: BridgeConfig,
    ) -> Arc<Self> {
        Self::with_snippets(envs, types, config, SnippetTable::target())
    }

    /// Bridge whose vtables point into `table` instead of the built-in
    /// snippet table
    pub fn with_snippets(
        envs: BridgeEnvironments,
        types: Arc<TypeRegistry>,
        config: BridgeConfig,
        table: Arc<SnippetTable>,
    ) -> Arc<Self> {
        tracing::debug!(
            cpp_env = %config.cpp_env_name,
            uno_env = %config.uno_env_name,
            snippets = table.len(),
            "bridge created"
        );
        Arc::new(Bridge {
            cpp_env: envs.cpp_env,
            uno_env: envs.uno_env,
            cpp2uno: envs.cpp2uno,
            uno2cpp: envs.uno2cpp,
            types,
            vtables: VtableFactory::new(table, config.max_cached_vtables),
            convention: target_convention(),
            config,
        })
    }

    /// Native environment
    #[inline]
    pub fn cpp_env(&self) -> &Arc<dyn NativeEnvironment> {
        &self.cpp_env
    }

    /// Component environment
    #[inline]
    pub fn uno_env(&self) -> &dyn Environment {
        &*self.uno_env
    }

    /// Native to component conversion
    #[inline]
    pub fn cpp2uno(&self) -> &dyn Mapping {
        &*self.cpp2uno
    }

    /// Component to native conversion
    #[inline]
    pub fn uno2cpp(&self) -> &dyn Mapping {
        &*self.uno2cpp
    }

    /// Type registry
    #[inline]
    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    /// Vtable factory
    #[inline]
    pub fn vtables(&self) -> &VtableFactory {
        &self.vtables
    }

    /// Calling convention of the snippets
    #[inline]
    pub fn convention(&self) -> &TargetConvention {
        &self.convention
    }

    /// Configuration
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Native interface for a component interface.
    ///
    /// Returns the interface already registered for (`oid`, `type_ref`)
    /// when there is one, otherwise a new proxy. The caller owns one
    /// reference to the result.
    pub fn map_to_cpp(
        self: &Arc<Self>,
        uno_i: NonNull<UnoInterface>,
        oid: &str,
        type_ref: &TypeRef,
    ) -> BridgeResult<NonNull<c_void>> {
        let td = self
            .types
            .get(type_ref)
            .ok_or_else(|| BridgeError::UnknownType(type_ref.name().to_string()))?;
        if td.as_interface().is_none() {
            return Err(BridgeError::NotAnInterface(type_ref.name().to_string()));
        }

        if let Some(existing) = self.cpp_env.registered_interface(oid, &td) {
            return Ok(existing);
        }

        let proxy = CppInterfaceProxy::create(self.clone(), uno_i, td.clone(), Arc::from(oid))?;
        Ok(self.cpp_env.register_proxy(
            cast_proxy_to_interface(proxy),
            oid,
            &td,
            free_cpp_interface_proxy,
        ))
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("cpp_env", &self.cpp_env.name())
            .field("uno_env", &self.uno_env.name())
            .field("vtables", &self.vtables)
            .field("config", &self.config)
            .finish()
    }
}
