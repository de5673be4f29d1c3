//! Word-slot convention for hosted builds
//!
//! Every argument occupies whole pointer-sized words in declaration order,
//! floating-point values included. Anything that is not a simple type is
//! returned through a hidden pointer.

use uno_sdk::{TypeClass, TypeRef, TypeRegistry};

use super::{ArgCursor, CallConvention, Location};

const WORD: isize = std::mem::size_of::<usize>() as isize;

/// Word-slot convention
#[derive(Debug, Clone, Copy, Default)]
pub struct WordSlots;

impl WordSlots {
    /// The convention; it has no variants
    pub const fn target() -> Self {
        WordSlots
    }
}

/// Cursor over word slots
#[derive(Debug, Clone)]
pub struct WordSlotsCursor {
    offset: isize,
}

impl ArgCursor for WordSlotsCursor {
    fn indirect(&mut self) -> Location {
        let at = self.offset;
        self.offset += WORD;
        Location(at)
    }

    fn simple(&mut self, class: TypeClass) -> Location {
        let size = class.simple_size().unwrap_or(0) as isize;
        let words = ((size + WORD - 1) / WORD).max(1);
        let at = self.offset;
        self.offset += words * WORD;
        Location(at)
    }
}

impl CallConvention for WordSlots {
    type Cursor = WordSlotsCursor;

    fn cursor(&self) -> WordSlotsCursor {
        WordSlotsCursor { offset: 0 }
    }

    fn this_location(&self, hidden_return: bool) -> Location {
        Location(if hidden_return { WORD } else { 0 })
    }

    fn return_in_hidden_param(&self, ty: &TypeRef, _types: &TypeRegistry) -> bool {
        !ty.class().is_simple()
    }
}
