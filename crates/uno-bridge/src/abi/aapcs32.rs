//! 32-bit ARM argument placement
//!
//! The executor pushes `r0`-`r3` directly in front of the caller's stacked
//! arguments, so core-register and stack arguments form one contiguous run
//! of 4-byte words. With VFP argument passing the executor additionally
//! pushes `d0`-`d7` into the 64 bytes below that run, and on return reloads
//! `d0`-`d3` from the same area.

use std::ptr;

use uno_sdk::{TypeClass, TypeRef, TypeRegistry};

use super::{ArgCursor, CallConvention, CallFrame, Location, RegisterReturn, REGISTER_RETURN_BYTES};

const WORD: isize = 4;

/// Bytes of core argument registers spilled by the executor
const CORE_REGISTER_BYTES: isize = 16;

/// Bytes of VFP argument registers spilled below the core registers
const VFP_SPILL_BYTES: isize = 64;

/// Single-precision VFP argument registers
const SINGLE_REGS: u32 = (VFP_SPILL_BYTES / WORD) as u32;

/// Double-precision argument registers
pub const MAX_FPR_REGS: usize = (VFP_SPILL_BYTES / 8) as usize;

/// Members of a floating-point aggregate returned in VFP registers
pub const MAX_FLOAT_AGGREGATE_MEMBERS: usize = 4;

/// ARM procedure-call-standard flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmVariant {
    /// Apple's variant: no 8-byte argument alignment
    Ios,
    /// EABI with floating point passed in core registers
    Eabi,
    /// EABI with floating point passed in VFP registers
    EabiVfp,
}

impl ArmVariant {
    #[inline]
    fn aligns_wide(self) -> bool {
        !matches!(self, ArmVariant::Ios)
    }

    #[inline]
    fn vfp(self) -> bool {
        matches!(self, ArmVariant::EabiVfp)
    }
}

/// ARM 32-bit convention
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aapcs32 {
    variant: ArmVariant,
}

impl Aapcs32 {
    /// Convention for a variant
    pub const fn new(variant: ArmVariant) -> Self {
        Aapcs32 { variant }
    }

    /// Variant selected by the build target
    pub const fn target() -> Self {
        #[cfg(target_vendor = "apple")]
        let variant = ArmVariant::Ios;
        #[cfg(all(not(target_vendor = "apple"), target_abi = "eabihf"))]
        let variant = ArmVariant::EabiVfp;
        #[cfg(all(not(target_vendor = "apple"), not(target_abi = "eabihf")))]
        let variant = ArmVariant::Eabi;
        Aapcs32 { variant }
    }
}

/// Cursor over an ARM call stack.
///
/// Core registers and the stacked area are allocated independently, so an
/// integer argument following a floating-point argument that went to the
/// stack still lands in a free core register. Single-precision arguments
/// back-fill VFP registers left free by double alignment until the first
/// floating-point argument has to go to the stack.
#[derive(Debug, Clone)]
pub struct Aapcs32Cursor {
    variant: ArmVariant,
    core: isize,
    stack: isize,
    singles: u16,
    vfp_closed: bool,
}

impl Aapcs32Cursor {
    fn core_or_stack(&mut self, size: isize) -> Location {
        let aligned = size == 8 && self.variant.aligns_wide();
        if aligned && self.core % 8 != 0 {
            self.core += WORD;
        }
        if self.core + size <= CORE_REGISTER_BYTES {
            let at = self.core;
            self.core += size;
            return Location(at);
        }
        if self.core < CORE_REGISTER_BYTES && self.stack == CORE_REGISTER_BYTES {
            // Split between r3 and the first stacked word, contiguous here
            let at = self.core;
            self.core = CORE_REGISTER_BYTES;
            self.stack = at + size;
            return Location(at);
        }
        self.core = CORE_REGISTER_BYTES;
        self.on_stack(size, aligned)
    }

    fn on_stack(&mut self, size: isize, aligned: bool) -> Location {
        if aligned && self.stack % 8 != 0 {
            self.stack += WORD;
        }
        let at = self.stack;
        self.stack += size;
        Location(at)
    }

    fn vfp_register(&mut self, class: TypeClass) -> Option<Location> {
        if self.vfp_closed {
            return None;
        }
        let (width, mask) = if class == TypeClass::Double {
            (2, 0b11u16)
        } else {
            (1, 0b01u16)
        };
        let mut reg = 0u32;
        while reg + width <= SINGLE_REGS {
            let bits = mask << reg;
            if self.singles & bits == 0 {
                self.singles |= bits;
                return Some(Location(-VFP_SPILL_BYTES + reg as isize * WORD));
            }
            reg += width;
        }
        self.vfp_closed = true;
        None
    }
}

impl ArgCursor for Aapcs32Cursor {
    fn indirect(&mut self) -> Location {
        self.core_or_stack(WORD)
    }

    fn simple(&mut self, class: TypeClass) -> Location {
        let wide = matches!(
            class,
            TypeClass::Hyper | TypeClass::UnsignedHyper | TypeClass::Double
        );
        let size = if wide { 2 * WORD } else { WORD };

        if self.variant.vfp() && matches!(class, TypeClass::Float | TypeClass::Double) {
            // Never in core registers, even once the VFP registers are used up
            return match self.vfp_register(class) {
                Some(at) => at,
                None => self.on_stack(size, wide),
            };
        }
        self.core_or_stack(size)
    }
}

impl CallConvention for Aapcs32 {
    type Cursor = Aapcs32Cursor;

    fn cursor(&self) -> Aapcs32Cursor {
        Aapcs32Cursor {
            variant: self.variant,
            core: 0,
            stack: CORE_REGISTER_BYTES,
            singles: 0,
            vfp_closed: false,
        }
    }

    fn this_location(&self, hidden_return: bool) -> Location {
        Location(if hidden_return { WORD } else { 0 })
    }

    fn return_in_hidden_param(&self, ty: &TypeRef, types: &TypeRegistry) -> bool {
        if ty.class().is_simple() {
            return false;
        }
        if !matches!(ty.class(), TypeClass::Struct | TypeClass::Exception) {
            return true;
        }
        if self.variant.vfp() {
            if let Some(members) = float_aggregate_members(ty, types) {
                if members <= MAX_FLOAT_AGGREGATE_MEMBERS {
                    return false;
                }
            }
        }
        let Some(td) = types.acquire(ty) else {
            return true;
        };
        // Composites of at most one word come back in r0
        td.size() > 4 || is_complex_struct(ty, types)
    }

    unsafe fn store_register_return(&self, frame: CallFrame, value: &RegisterReturn) {
        if self.variant.vfp() {
            ptr::copy_nonoverlapping(
                value.as_ptr() as *const u8,
                frame.address(Location(-VFP_SPILL_BYTES)) as *mut u8,
                REGISTER_RETURN_BYTES,
            );
        }
    }
}

/// A compound with members that are neither simple nor plain compounds
fn is_complex_struct(ty: &TypeRef, types: &TypeRegistry) -> bool {
    let Some(td) = types.acquire(ty) else {
        return true;
    };
    let Some(compound) = td.as_compound() else {
        return false;
    };
    for member in &compound.members {
        match member.ty.class() {
            TypeClass::Struct | TypeClass::Exception => {
                if is_complex_struct(&member.ty, types) {
                    return true;
                }
            }
            class if !class.is_simple() => return true,
            _ => {}
        }
    }
    match &compound.base {
        Some(base) => is_complex_struct(base, types),
        None => false,
    }
}

/// Number of floating-point fields of a compound whose fields, flattened
/// through bases and nested compounds, are all `float` or all `double`
fn float_aggregate_members(ty: &TypeRef, types: &TypeRegistry) -> Option<usize> {
    let mut class = None;
    let mut count = 0;
    if collect_float_fields(ty, types, &mut class, &mut count) && count > 0 {
        Some(count)
    } else {
        None
    }
}

fn collect_float_fields(
    ty: &TypeRef,
    types: &TypeRegistry,
    class: &mut Option<TypeClass>,
    count: &mut usize,
) -> bool {
    match ty.class() {
        TypeClass::Float | TypeClass::Double => {
            if *class.get_or_insert(ty.class()) != ty.class() {
                return false;
            }
            *count += 1;
            true
        }
        TypeClass::Struct | TypeClass::Exception => {
            let Some(td) = types.acquire(ty) else {
                return false;
            };
            let Some(compound) = td.as_compound() else {
                return false;
            };
            if let Some(base) = &compound.base {
                if !collect_float_fields(base, types, class, count) {
                    return false;
                }
            }
            compound
                .members
                .iter()
                .all(|member| collect_float_fields(&member.ty, types, class, count))
        }
        _ => false,
    }
}
