//! Type classes and type references
//!
//! A [`TypeRef`] is the cheap handle every description, parameter and `any`
//! carries around. It names a type and its class; the full description is
//! obtained from the [`TypeRegistry`](crate::TypeRegistry) on demand.

use std::fmt;
use std::sync::Arc;

// ============================================================================
// TypeClass
// ============================================================================

/// Classification tag of a UNO type.
///
/// The discriminants are the values the component runtime uses on the wire
/// and in its own type library, so they are stable.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TypeClass {
    /// No value
    Void = 0,
    /// UTF-16 code unit
    Char = 1,
    /// Boolean stored in one byte
    Boolean = 2,
    /// Signed 8-bit integer
    Byte = 3,
    /// Signed 16-bit integer
    Short = 4,
    /// Unsigned 16-bit integer
    UnsignedShort = 5,
    /// Signed 32-bit integer
    Long = 6,
    /// Unsigned 32-bit integer
    UnsignedLong = 7,
    /// Signed 64-bit integer
    Hyper = 8,
    /// Unsigned 64-bit integer
    UnsignedHyper = 9,
    /// IEEE single
    Float = 10,
    /// IEEE double
    Double = 11,
    /// Reference-counted string handle
    String = 12,
    /// Type value
    Type = 13,
    /// Any container
    Any = 14,
    /// 32-bit enumeration
    Enum = 15,
    /// Plain struct
    Struct = 17,
    /// Exception struct
    Exception = 19,
    /// Sequence handle
    Sequence = 20,
    /// Interface reference
    Interface = 22,
    /// Member description of an interface method
    InterfaceMethod = 25,
    /// Member description of an interface attribute
    InterfaceAttribute = 26,
    /// Unresolvable type
    Unknown = 27,
}

impl TypeClass {
    /// Whether values of this class are passed and stored as plain scalars.
    ///
    /// Everything up to and including `Double` plus `Enum`.
    #[inline]
    pub fn is_simple(self) -> bool {
        self <= TypeClass::Double || self == TypeClass::Enum
    }

    /// Native size in bytes of a simple class, `None` for everything else.
    pub fn simple_size(self) -> Option<usize> {
        match self {
            TypeClass::Void => Some(0),
            TypeClass::Boolean | TypeClass::Byte => Some(1),
            TypeClass::Char | TypeClass::Short | TypeClass::UnsignedShort => Some(2),
            TypeClass::Long | TypeClass::UnsignedLong | TypeClass::Float | TypeClass::Enum => {
                Some(4)
            }
            TypeClass::Hyper | TypeClass::UnsignedHyper | TypeClass::Double => Some(8),
            _ => None,
        }
    }

    /// Canonical UNO name of a built-in type class.
    pub fn builtin_name(self) -> Option<&'static str> {
        Some(match self {
            TypeClass::Void => "void",
            TypeClass::Char => "char",
            TypeClass::Boolean => "boolean",
            TypeClass::Byte => "byte",
            TypeClass::Short => "short",
            TypeClass::UnsignedShort => "unsigned short",
            TypeClass::Long => "long",
            TypeClass::UnsignedLong => "unsigned long",
            TypeClass::Hyper => "hyper",
            TypeClass::UnsignedHyper => "unsigned hyper",
            TypeClass::Float => "float",
            TypeClass::Double => "double",
            TypeClass::String => "string",
            TypeClass::Type => "type",
            TypeClass::Any => "any",
            _ => return None,
        })
    }
}

// ============================================================================
// TypeRef
// ============================================================================

struct TypeRefData {
    class: TypeClass,
    name: Box<str>,
}

/// Reference to a type by class and name.
///
/// Pointer-sized, so it can be stored in native `type` slots and inside
/// [`UnoAny`](crate::UnoAny). Equality is by name.
#[derive(Clone)]
pub struct TypeRef(Arc<TypeRefData>);

impl TypeRef {
    /// Create a reference to a named type
    pub fn new(class: TypeClass, name: impl Into<Box<str>>) -> Self {
        TypeRef(Arc::new(TypeRefData {
            class,
            name: name.into(),
        }))
    }

    /// Reference to one of the built-in types (`void` through `any`).
    ///
    /// Non built-in classes get the name `"<unknown>"`.
    pub fn builtin(class: TypeClass) -> Self {
        TypeRef::new(class, class.builtin_name().unwrap_or("<unknown>"))
    }

    /// The `void` type
    pub fn void() -> Self {
        TypeRef::builtin(TypeClass::Void)
    }

    /// Type class of the referenced type
    #[inline]
    pub fn class(&self) -> TypeClass {
        self.0.class
    }

    /// Fully qualified name
    #[inline]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Whether the referenced type is void
    #[inline]
    pub fn is_void(&self) -> bool {
        self.0.class == TypeClass::Void
    }
}

impl PartialEq for TypeRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0.name == other.0.name
    }
}

impl Eq for TypeRef {}

impl fmt::Debug for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeRef({:?} {})", self.0.class, self.0.name)
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_classes() {
        assert!(TypeClass::Void.is_simple());
        assert!(TypeClass::Double.is_simple());
        assert!(TypeClass::Enum.is_simple());
        assert!(!TypeClass::String.is_simple());
        assert!(!TypeClass::Any.is_simple());
        assert!(!TypeClass::Struct.is_simple());
        assert!(!TypeClass::Interface.is_simple());
    }

    #[test]
    fn test_type_ref_is_pointer_sized() {
        assert_eq!(std::mem::size_of::<TypeRef>(), std::mem::size_of::<usize>());
    }

    #[test]
    fn test_type_ref_equality_by_name() {
        let a = TypeRef::new(TypeClass::Interface, "test.XFoo");
        let b = TypeRef::new(TypeClass::Interface, "test.XFoo");
        assert_eq!(a, b);
        assert_ne!(a, TypeRef::builtin(TypeClass::Long));
        assert_eq!(TypeRef::builtin(TypeClass::UnsignedShort).name(), "unsigned short");
    }
}
