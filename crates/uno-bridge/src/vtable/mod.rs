//! Vtable synthesis
//!
//! A proxy for an interface type carries one vtable per segment: the
//! primary vtable covering the primary-base chain, and one more for every
//! base that is not the first base of its derived interface. Slots point
//! into the snippet table, so no code is generated at run time.
//!
//! Every block starts with two reserved null words in front of the visible
//! slots, where the native layout keeps offset-to-top and type info.

mod base_offset;

use std::ffi::c_void;
use std::ptr;
use std::sync::Arc;

use dashmap::DashMap;
use uno_sdk::{TypeDescription, TypeKind, TypeRegistry};

use crate::abi::CallConvention;
use crate::defaults::MAX_PROXY_VTABLES;
use crate::error::{BridgeError, BridgeResult};
use crate::snippet::SnippetTable;

pub use base_offset::{primary_functions, BaseOffset};
use base_offset::{interface_of, resolve};

/// Words in front of the visible slots of a block
pub const RESERVED_SLOTS: usize = 2;

/// One vtable entry
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    code: *const c_void,
}

impl Slot {
    const NULL: Slot = Slot { code: ptr::null() };

    /// Code address (or reserved word) stored in the slot
    #[inline]
    pub fn code(&self) -> *const c_void {
        self.code
    }
}

/// Slot storage of one vtable
#[derive(Debug)]
pub struct Block {
    slots: Box<[Slot]>,
}

impl Block {
    fn new(visible: usize) -> Self {
        Block {
            slots: vec![Slot::NULL; RESERVED_SLOTS + visible].into_boxed_slice(),
        }
    }

    /// Address native code stores as the vtable pointer
    #[inline]
    pub fn vtable(&self) -> *const Slot {
        self.slots[RESERVED_SLOTS..].as_ptr()
    }

    /// Visible slots
    #[inline]
    pub fn slots(&self) -> &[Slot] {
        &self.slots[RESERVED_SLOTS..]
    }

    /// Reserved words in front of the visible slots
    #[inline]
    pub fn reserved(&self) -> &[Slot] {
        &self.slots[..RESERVED_SLOTS]
    }

    fn visible_mut(&mut self) -> &mut [Slot] {
        &mut self.slots[RESERVED_SLOTS..]
    }
}

/// All vtables of one interface type
#[derive(Debug)]
pub struct Vtables {
    interface: Box<str>,
    blocks: Vec<Block>,
}

// Slots hold addresses into the immutable snippet table.
unsafe impl Send for Vtables {}
unsafe impl Sync for Vtables {}

impl Vtables {
    /// Interface the vtables were built for
    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// Blocks in segment order
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Vtable pointers as stored at the start of a proxy; unused segments
    /// are null
    pub fn pointers(&self) -> [*const Slot; MAX_PROXY_VTABLES] {
        let mut pointers = [ptr::null(); MAX_PROXY_VTABLES];
        for (pointer, block) in pointers.iter_mut().zip(&self.blocks) {
            *pointer = block.vtable();
        }
        pointers
    }
}

// ============================================================================
// VtableFactory
// ============================================================================

/// Builds and caches vtables per interface type
pub struct VtableFactory {
    table: Arc<SnippetTable>,
    cache: DashMap<Box<str>, Arc<Vtables>>,
    max_cached: usize,
}

impl VtableFactory {
    /// Factory over a snippet table
    pub fn new(table: Arc<SnippetTable>, max_cached: usize) -> Self {
        VtableFactory {
            table,
            cache: DashMap::new(),
            max_cached,
        }
    }

    /// Snippet table slots point into
    pub fn table(&self) -> &Arc<SnippetTable> {
        &self.table
    }

    /// Number of cached interface types
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    /// Vtables for an interface type, built on first use
    pub fn get_vtables<C: CallConvention>(
        &self,
        convention: &C,
        td: &TypeDescription,
        types: &TypeRegistry,
    ) -> BridgeResult<Arc<Vtables>> {
        if let Some(hit) = self.cache.get(td.name()) {
            return Ok(hit.clone());
        }

        let vtables = Arc::new(self.build(convention, td, types)?);
        tracing::debug!(
            interface = td.name(),
            blocks = vtables.blocks.len(),
            "vtables created"
        );
        if self.cache.len() >= self.max_cached {
            return Ok(vtables);
        }
        Ok(self
            .cache
            .entry(td.name().into())
            .or_insert(vtables)
            .clone())
    }

    fn build<C: CallConvention>(
        &self,
        convention: &C,
        td: &TypeDescription,
        types: &TypeRegistry,
    ) -> BridgeResult<Vtables> {
        let needed = count_blocks(td, true, types)?;
        if needed > MAX_PROXY_VTABLES {
            return Err(BridgeError::TooManyVtables {
                interface: td.name().to_string(),
                needed,
                max: MAX_PROXY_VTABLES,
            });
        }

        let offsets = BaseOffset::new(td, types)?;
        let mut builder = Builder {
            table: &self.table,
            convention,
            types,
            offsets: &offsets,
            blocks: Vec::with_capacity(needed),
        };
        builder.create_vtables(td, true)?;
        Ok(Vtables {
            interface: td.name().into(),
            blocks: builder.blocks,
        })
    }
}

impl std::fmt::Debug for VtableFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VtableFactory")
            .field("table", &self.table)
            .field("cached", &self.cache.len())
            .field("max_cached", &self.max_cached)
            .finish()
    }
}

fn count_blocks(td: &TypeDescription, include_primary: bool, types: &TypeRegistry) -> BridgeResult<usize> {
    let mut count = usize::from(include_primary);
    for (i, base) in interface_of(td)?.bases().iter().enumerate() {
        count += count_blocks(&*resolve(types, base)?, i != 0, types)?;
    }
    Ok(count)
}

struct Builder<'a, C> {
    table: &'a SnippetTable,
    convention: &'a C,
    types: &'a TypeRegistry,
    offsets: &'a BaseOffset,
    blocks: Vec<Block>,
}

impl<C: CallConvention> Builder<'_, C> {
    fn create_vtables(&mut self, td: &TypeDescription, include_primary: bool) -> BridgeResult<()> {
        if include_primary {
            let segment = self.blocks.len();
            let count = primary_functions(td, self.types)?;
            let mut block = Block::new(count);

            // Fill from the most derived interface backwards, so the
            // XInterface functions end up in the first slots.
            let mut end = count;
            let mut current = Some(resolve(self.types, td.type_ref())?);
            while let Some(chain_td) = current {
                let iface = interface_of(&chain_td)?;
                end -= iface.local_function_count();
                self.add_local_functions(&mut block, end, &chain_td, segment)?;
                current = match iface.bases().first() {
                    Some(base) => Some(resolve(self.types, base)?),
                    None => None,
                };
            }
            self.blocks.push(block);
        }

        let bases = interface_of(td)?.bases().to_vec();
        for (i, base) in bases.iter().enumerate() {
            let base_td = resolve(self.types, base)?;
            self.create_vtables(&base_td, i != 0)?;
        }
        Ok(())
    }

    fn add_local_functions(
        &self,
        block: &mut Block,
        start: usize,
        td: &TypeDescription,
        segment: usize,
    ) -> BridgeResult<()> {
        let iface = interface_of(td)?;
        let mut function_index = self
            .offsets
            .function_offset(td.name())
            .ok_or_else(|| BridgeError::UnknownType(td.name().to_string()))?;
        let slots = block.visible_mut();
        let mut at = start;

        for member in iface.members() {
            let member_td = self
                .types
                .acquire(member)
                .ok_or_else(|| BridgeError::UnknownType(member.name().to_string()))?;
            match member_td.kind() {
                TypeKind::Attribute(attr) => {
                    let hidden = self.convention.return_in_hidden_param(&attr.ty, self.types);
                    slots[at] = self.slot(function_index, segment, hidden)?;
                    at += 1;
                    function_index += 1;
                    if !attr.read_only {
                        slots[at] = self.slot(function_index, segment, false)?;
                        at += 1;
                        function_index += 1;
                    }
                }
                TypeKind::Method(method) => {
                    let hidden = method
                        .return_type
                        .as_ref()
                        .map_or(false, |ret| self.convention.return_in_hidden_param(ret, self.types));
                    slots[at] = self.slot(function_index, segment, hidden)?;
                    at += 1;
                    function_index += 1;
                }
                _ => {
                    return Err(BridgeError::UnexpectedMember {
                        interface: td.name().to_string(),
                        member: member.name().to_string(),
                    })
                }
            }
        }
        Ok(())
    }

    #[inline]
    fn slot(&self, function_index: usize, segment: usize, hidden: bool) -> BridgeResult<Slot> {
        Ok(Slot {
            code: self.table.snippet(function_index, segment, hidden)?,
        })
    }
}
