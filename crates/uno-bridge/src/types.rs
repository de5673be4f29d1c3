//! Type predicates used while marshaling

use uno_sdk::{TypeClass, TypeDescription, TypeKind, TypeRef, TypeRegistry};

/// Whether values of `td` must be copy-converted between environments
/// instead of being shared in place.
///
/// This is the case for everything that relates to interface types and for
/// strings, which are reference-counted per environment.
pub fn needs_conversion(td: &TypeDescription, types: &TypeRegistry) -> bool {
    contains_class(td, types, &|class| {
        matches!(class, TypeClass::Any | TypeClass::Interface | TypeClass::String)
    })
}

fn contains_class(td: &TypeDescription, types: &TypeRegistry, leaf: &dyn Fn(TypeClass) -> bool) -> bool {
    if leaf(td.class()) {
        return true;
    }
    match td.kind() {
        TypeKind::Compound(compound) => {
            for member in &compound.members {
                if member_contains(&member.ty, types, leaf) {
                    return true;
                }
            }
            match &compound.base {
                Some(base) => member_contains(base, types, leaf),
                None => false,
            }
        }
        TypeKind::Sequence { element } => member_contains(element, types, leaf),
        _ => false,
    }
}

fn member_contains(ty: &TypeRef, types: &TypeRegistry, leaf: &dyn Fn(TypeClass) -> bool) -> bool {
    if leaf(ty.class()) {
        return true;
    }
    match ty.class() {
        TypeClass::Struct | TypeClass::Exception | TypeClass::Sequence => types
            .acquire(ty)
            .map_or(false, |td| contains_class(&td, types, leaf)),
        _ => false,
    }
}
