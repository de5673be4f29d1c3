//! Type descriptions
//!
//! Full descriptions of registered types. Interface descriptions carry the
//! dense function-index tables that native vtables are laid out by: slot `n`
//! of a most-derived vtable is function index `n`, and the first three
//! function indices always belong to `XInterface` (`queryInterface`,
//! `acquire`, `release`).

use crate::types::{TypeClass, TypeRef};

// ============================================================================
// TypeDescription
// ============================================================================

/// Registered description of a type.
#[derive(Debug)]
pub struct TypeDescription {
    type_ref: TypeRef,
    size: usize,
    align: usize,
    kind: TypeKind,
}

/// Kind-specific part of a [`TypeDescription`].
#[derive(Debug)]
pub enum TypeKind {
    /// Built-in type (simple types, string, type, any)
    Builtin,
    /// Enumeration
    Enum(EnumTypeDescription),
    /// Struct or exception
    Compound(CompoundTypeDescription),
    /// Sequence of an element type
    Sequence {
        /// Element type
        element: TypeRef,
    },
    /// Interface type
    Interface(InterfaceTypeDescription),
    /// Interface method member
    Method(MethodDescription),
    /// Interface attribute member
    Attribute(AttributeDescription),
}

impl TypeDescription {
    pub(crate) fn new(type_ref: TypeRef, size: usize, align: usize, kind: TypeKind) -> Self {
        TypeDescription {
            type_ref,
            size,
            align,
            kind,
        }
    }

    /// Reference to this type
    #[inline]
    pub fn type_ref(&self) -> &TypeRef {
        &self.type_ref
    }

    /// Fully qualified name
    #[inline]
    pub fn name(&self) -> &str {
        self.type_ref.name()
    }

    /// Type class
    #[inline]
    pub fn class(&self) -> TypeClass {
        self.type_ref.class()
    }

    /// Native size in bytes
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Native alignment in bytes
    #[inline]
    pub fn align(&self) -> usize {
        self.align
    }

    /// Kind-specific data
    #[inline]
    pub fn kind(&self) -> &TypeKind {
        &self.kind
    }

    /// Interface data, if this describes an interface
    pub fn as_interface(&self) -> Option<&InterfaceTypeDescription> {
        match &self.kind {
            TypeKind::Interface(i) => Some(i),
            _ => None,
        }
    }

    /// Compound data, if this describes a struct or exception
    pub fn as_compound(&self) -> Option<&CompoundTypeDescription> {
        match &self.kind {
            TypeKind::Compound(c) => Some(c),
            _ => None,
        }
    }

    /// Method data, if this describes an interface method
    pub fn as_method(&self) -> Option<&MethodDescription> {
        match &self.kind {
            TypeKind::Method(m) => Some(m),
            _ => None,
        }
    }

    /// Attribute data, if this describes an interface attribute
    pub fn as_attribute(&self) -> Option<&AttributeDescription> {
        match &self.kind {
            TypeKind::Attribute(a) => Some(a),
            _ => None,
        }
    }
}

// ============================================================================
// Enum / Compound
// ============================================================================

/// Enumeration values
#[derive(Debug, Clone)]
pub struct EnumTypeDescription {
    /// Value names with their numeric values
    pub values: Vec<(String, i32)>,
    /// Value of a default-constructed enum
    pub default_value: i32,
}

/// Struct or exception layout
#[derive(Debug, Clone)]
pub struct CompoundTypeDescription {
    /// Base compound, laid out first
    pub base: Option<TypeRef>,
    /// Own members in declaration order
    pub members: Vec<CompoundMember>,
}

/// One field of a compound
#[derive(Debug, Clone)]
pub struct CompoundMember {
    /// Field name
    pub name: String,
    /// Field type
    pub ty: TypeRef,
    /// Byte offset from the start of the compound, base included
    pub offset: usize,
}

// ============================================================================
// Interface members
// ============================================================================

/// Parameter of an interface method.
///
/// `is_in` and `is_out` are independent: in-out parameters have both set,
/// pure out parameters only `is_out`.
#[derive(Debug, Clone)]
pub struct MethodParameter {
    /// Parameter name
    pub name: String,
    /// Parameter type
    pub ty: TypeRef,
    /// Value flows from caller to callee
    pub is_in: bool,
    /// Value flows from callee back to caller
    pub is_out: bool,
}

impl MethodParameter {
    /// In parameter
    pub fn input(name: impl Into<String>, ty: TypeRef) -> Self {
        MethodParameter {
            name: name.into(),
            ty,
            is_in: true,
            is_out: false,
        }
    }

    /// Pure out parameter
    pub fn output(name: impl Into<String>, ty: TypeRef) -> Self {
        MethodParameter {
            name: name.into(),
            ty,
            is_in: false,
            is_out: true,
        }
    }

    /// In-out parameter
    pub fn in_out(name: impl Into<String>, ty: TypeRef) -> Self {
        MethodParameter {
            name: name.into(),
            ty,
            is_in: true,
            is_out: true,
        }
    }
}

/// Interface method
#[derive(Debug, Clone)]
pub struct MethodDescription {
    /// Short member name
    pub name: String,
    /// Declaring interface
    pub interface: TypeRef,
    /// Return type; `None` for void
    pub return_type: Option<TypeRef>,
    /// Parameters in declaration order
    pub params: Vec<MethodParameter>,
    /// Exceptions the method may raise
    pub exceptions: Vec<TypeRef>,
    /// Declared oneway
    pub one_way: bool,
}

/// Interface attribute
#[derive(Debug, Clone)]
pub struct AttributeDescription {
    /// Short member name
    pub name: String,
    /// Declaring interface
    pub interface: TypeRef,
    /// Attribute type
    pub ty: TypeRef,
    /// Read-only attributes have a getter only
    pub read_only: bool,
}

impl AttributeDescription {
    /// Number of vtable slots: getter plus optional setter
    #[inline]
    pub fn slot_count(&self) -> usize {
        if self.read_only {
            1
        } else {
            2
        }
    }
}

// ============================================================================
// InterfaceTypeDescription
// ============================================================================

/// Interface layout and function-index maps.
#[derive(Debug, Clone)]
pub struct InterfaceTypeDescription {
    bases: Vec<TypeRef>,
    members: Vec<TypeRef>,
    all_members: Vec<TypeRef>,
    function_to_member: Vec<usize>,
    member_to_function: Vec<usize>,
}

impl InterfaceTypeDescription {
    /// Build the maps from the flattened member list.
    ///
    /// `slots[i]` is the number of vtable slots of `all_members[i]`. The
    /// local members are the tail of `all_members`.
    pub(crate) fn from_layout(
        bases: Vec<TypeRef>,
        members: Vec<TypeRef>,
        all_members: Vec<TypeRef>,
        slots: &[usize],
    ) -> Self {
        debug_assert_eq!(all_members.len(), slots.len());
        let mut function_to_member = Vec::with_capacity(slots.iter().sum());
        let mut member_to_function = Vec::with_capacity(all_members.len());
        for (member, &count) in slots.iter().enumerate() {
            member_to_function.push(function_to_member.len());
            for _ in 0..count {
                function_to_member.push(member);
            }
        }
        InterfaceTypeDescription {
            bases,
            members,
            all_members,
            function_to_member,
            member_to_function,
        }
    }

    /// Direct base interfaces, primary base first
    pub fn bases(&self) -> &[TypeRef] {
        &self.bases
    }

    /// Members declared by this interface itself
    pub fn members(&self) -> &[TypeRef] {
        &self.members
    }

    /// All members, inherited ones first
    pub fn all_members(&self) -> &[TypeRef] {
        &self.all_members
    }

    /// Total number of function indices (vtable slots of the flattened
    /// interface)
    #[inline]
    pub fn function_count(&self) -> usize {
        self.function_to_member.len()
    }

    /// Member index owning a function index
    #[inline]
    pub fn member_for_function(&self, function_index: usize) -> Option<usize> {
        self.function_to_member.get(function_index).copied()
    }

    /// First function index of a member (the getter, for attributes)
    #[inline]
    pub fn first_function(&self, member_index: usize) -> Option<usize> {
        self.member_to_function.get(member_index).copied()
    }

    /// Number of function indices contributed by the local members
    pub fn local_function_count(&self) -> usize {
        if self.members.is_empty() {
            return 0;
        }
        let first_local = self.all_members.len() - self.members.len();
        self.function_count() - self.member_to_function[first_local]
    }
}
