//! Function-index bookkeeping over the base graph

use rustc_hash::FxHashMap;
use uno_sdk::{InterfaceTypeDescription, TypeDescription, TypeRef, TypeRegistry};

use crate::error::{BridgeError, BridgeResult};

/// Resolve an interface reference to its description
pub(crate) fn interface_of<'t>(
    td: &'t TypeDescription,
) -> BridgeResult<&'t InterfaceTypeDescription> {
    td.as_interface()
        .ok_or_else(|| BridgeError::NotAnInterface(td.name().to_string()))
}

/// Long-lived description of a referenced interface
pub(crate) fn resolve(
    types: &TypeRegistry,
    type_ref: &TypeRef,
) -> BridgeResult<std::sync::Arc<TypeDescription>> {
    let td = types
        .get(type_ref)
        .ok_or_else(|| BridgeError::UnknownType(type_ref.name().to_string()))?;
    interface_of(&td)?;
    Ok(td)
}

/// First function index of every interface in the base graph of a
/// most-derived interface.
///
/// Bases are numbered depth-first in post-order, each interface once; this
/// is the same order in which the flattened member list is built.
#[derive(Debug, Default)]
pub struct BaseOffset {
    offsets: FxHashMap<Box<str>, usize>,
}

impl BaseOffset {
    /// Number the base graph of `most_derived`
    pub fn new(most_derived: &TypeDescription, types: &TypeRegistry) -> BridgeResult<Self> {
        let mut base_offset = BaseOffset::default();
        base_offset.calculate(most_derived, 0, types)?;
        Ok(base_offset)
    }

    fn calculate(
        &mut self,
        td: &TypeDescription,
        mut offset: usize,
        types: &TypeRegistry,
    ) -> BridgeResult<usize> {
        if self.offsets.contains_key(td.name()) {
            return Ok(offset);
        }
        let iface = interface_of(td)?;
        for base in iface.bases() {
            let base_td = resolve(types, base)?;
            offset = self.calculate(&base_td, offset, types)?;
        }
        self.offsets.insert(td.name().into(), offset);
        Ok(offset + iface.local_function_count())
    }

    /// First function index of `interface`
    pub fn function_offset(&self, interface: &str) -> Option<usize> {
        self.offsets.get(interface).copied()
    }
}

/// Functions visible through the primary vtable of `td`: the local
/// functions of every interface along the primary-base chain.
pub fn primary_functions(td: &TypeDescription, types: &TypeRegistry) -> BridgeResult<usize> {
    let mut count = 0;
    let mut current = Some(resolve(types, td.type_ref())?);
    while let Some(td) = current {
        let iface = interface_of(&td)?;
        count += iface.local_function_count();
        current = match iface.bases().first() {
            Some(base) => Some(resolve(types, base)?),
            None => None,
        };
    }
    Ok(count)
}
