//! Type registry
//!
//! Thread-safe store of every type description known to the process.
//! Descriptions are looked up by name; per-call users take a scoped
//! [`TypeGuard`] so that the number of outstanding acquisitions can be
//! checked, long-lived owners (proxies, vtable caches) hold the `Arc`
//! returned by [`TypeRegistry::get`].

use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::description::{
    AttributeDescription, CompoundMember, CompoundTypeDescription, EnumTypeDescription,
    InterfaceTypeDescription, MethodDescription, MethodParameter, TypeDescription, TypeKind,
};
use crate::error::{TypelibError, TypelibResult};
use crate::types::{TypeClass, TypeRef};

/// Name of the root interface
pub const XINTERFACE: &str = "com.sun.star.uno.XInterface";

/// Name of the root exception
pub const EXCEPTION: &str = "com.sun.star.uno.Exception";

/// Name of the exception raised for bridge and runtime faults
pub const RUNTIME_EXCEPTION: &str = "com.sun.star.uno.RuntimeException";

const WORD: usize = std::mem::size_of::<usize>();

type TypeMap = FxHashMap<Box<str>, Arc<TypeDescription>>;

// ============================================================================
// TypeGuard
// ============================================================================

/// Scoped acquisition of a type description.
///
/// Dropping the guard releases the acquisition.
pub struct TypeGuard<'r> {
    td: Arc<TypeDescription>,
    registry: &'r TypeRegistry,
}

impl TypeGuard<'_> {
    /// Long-lived handle to the same description, not tracked by the guard
    pub fn shared(&self) -> Arc<TypeDescription> {
        self.td.clone()
    }
}

impl Deref for TypeGuard<'_> {
    type Target = TypeDescription;

    fn deref(&self) -> &TypeDescription {
        &self.td
    }
}

impl Drop for TypeGuard<'_> {
    fn drop(&mut self) {
        self.registry.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}

impl std::fmt::Debug for TypeGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TypeGuard({})", self.td.name())
    }
}

// ============================================================================
// TypeRegistry
// ============================================================================

/// Registry of type descriptions
pub struct TypeRegistry {
    types: RwLock<TypeMap>,
    outstanding: AtomicUsize,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    /// Create a registry holding the built-in types, `XInterface` and the
    /// root exceptions
    pub fn new() -> Self {
        let registry = TypeRegistry {
            types: RwLock::new(FxHashMap::default()),
            outstanding: AtomicUsize::new(0),
        };
        registry.bootstrap();
        registry
    }

    fn bootstrap(&self) {
        let mut types = self.types.write();
        for class in [
            TypeClass::Void,
            TypeClass::Char,
            TypeClass::Boolean,
            TypeClass::Byte,
            TypeClass::Short,
            TypeClass::UnsignedShort,
            TypeClass::Long,
            TypeClass::UnsignedLong,
            TypeClass::Hyper,
            TypeClass::UnsignedHyper,
            TypeClass::Float,
            TypeClass::Double,
        ] {
            let size = class.simple_size().unwrap_or(0);
            insert(&mut types, TypeRef::builtin(class), size, size.max(1), TypeKind::Builtin);
        }
        for class in [TypeClass::String, TypeClass::Type] {
            insert(&mut types, TypeRef::builtin(class), WORD, WORD, TypeKind::Builtin);
        }
        insert(&mut types, TypeRef::builtin(TypeClass::Any), 3 * WORD, WORD, TypeKind::Builtin);

        let xinterface = TypeRef::new(TypeClass::Interface, XINTERFACE);
        let root = InterfaceBuilder::new(XINTERFACE)
            .method(
                "queryInterface",
                TypeRef::builtin(TypeClass::Any),
                vec![MethodParameter::input("aType", TypeRef::builtin(TypeClass::Type))],
            )
            .method("acquire", TypeRef::void(), vec![])
            .method("release", TypeRef::void(), vec![]);
        // Built-in layout is fixed, so registration cannot fail here.
        let _ = build_interface(&mut types, root, Vec::new());

        let string = TypeRef::builtin(TypeClass::String);
        let _ = build_compound(
            &mut types,
            TypeClass::Exception,
            EXCEPTION,
            None,
            &[("Message", string), ("Context", xinterface)],
        );
        let _ = build_compound(
            &mut types,
            TypeClass::Exception,
            RUNTIME_EXCEPTION,
            Some(TypeRef::new(TypeClass::Exception, EXCEPTION)),
            &[],
        );
    }

    /// Acquire a description for the duration of the returned guard
    pub fn acquire(&self, type_ref: &TypeRef) -> Option<TypeGuard<'_>> {
        self.acquire_by_name(type_ref.name())
    }

    /// Acquire a description by name
    pub fn acquire_by_name(&self, name: &str) -> Option<TypeGuard<'_>> {
        let td = self.types.read().get(name).cloned()?;
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        Some(TypeGuard { td, registry: self })
    }

    /// Long-lived handle to a description
    pub fn get(&self, type_ref: &TypeRef) -> Option<Arc<TypeDescription>> {
        self.types.read().get(type_ref.name()).cloned()
    }

    /// Number of guards currently alive
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Whether a type with this name is registered
    pub fn contains(&self, name: &str) -> bool {
        self.types.read().contains_key(name)
    }

    /// Reference to the root interface
    pub fn xinterface(&self) -> TypeRef {
        TypeRef::new(TypeClass::Interface, XINTERFACE)
    }

    /// Register an enumeration. The first value is the default.
    pub fn register_enum(&self, name: &str, values: &[(&str, i32)]) -> TypelibResult<TypeRef> {
        let mut types = self.types.write();
        if types.contains_key(name) {
            return Err(TypelibError::DuplicateType(name.to_string()));
        }
        let type_ref = TypeRef::new(TypeClass::Enum, name);
        let kind = TypeKind::Enum(EnumTypeDescription {
            values: values.iter().map(|(n, v)| (n.to_string(), *v)).collect(),
            default_value: values.first().map_or(0, |(_, v)| *v),
        });
        insert(&mut types, type_ref.clone(), 4, 4, kind);
        Ok(type_ref)
    }

    /// Register a plain struct
    pub fn register_struct(
        &self,
        name: &str,
        base: Option<TypeRef>,
        members: &[(&str, TypeRef)],
    ) -> TypelibResult<TypeRef> {
        let mut types = self.types.write();
        build_compound(&mut types, TypeClass::Struct, name, base, members)
    }

    /// Register an exception
    pub fn register_exception(
        &self,
        name: &str,
        base: Option<TypeRef>,
        members: &[(&str, TypeRef)],
    ) -> TypelibResult<TypeRef> {
        let mut types = self.types.write();
        build_compound(&mut types, TypeClass::Exception, name, base, members)
    }

    /// Register (or look up) the sequence type of an element type
    pub fn register_sequence(&self, element: &TypeRef) -> TypelibResult<TypeRef> {
        let name = format!("[]{}", element.name());
        let mut types = self.types.write();
        if let Some(existing) = types.get(name.as_str()) {
            return Ok(existing.type_ref().clone());
        }
        if !types.contains_key(element.name()) {
            return Err(TypelibError::UnknownType(element.name().to_string()));
        }
        let type_ref = TypeRef::new(TypeClass::Sequence, name);
        let kind = TypeKind::Sequence {
            element: element.clone(),
        };
        insert(&mut types, type_ref.clone(), WORD, WORD, kind);
        Ok(type_ref)
    }

    /// Register an interface together with its member descriptions
    pub fn register_interface(&self, builder: InterfaceBuilder) -> TypelibResult<TypeRef> {
        let mut types = self.types.write();
        let bases = if builder.bases.is_empty() {
            vec![TypeRef::new(TypeClass::Interface, XINTERFACE)]
        } else {
            builder.bases.clone()
        };
        build_interface(&mut types, builder, bases)
    }
}

fn insert(types: &mut TypeMap, type_ref: TypeRef, size: usize, align: usize, kind: TypeKind) {
    let name: Box<str> = type_ref.name().into();
    types.insert(name, Arc::new(TypeDescription::new(type_ref, size, align, kind)));
}

fn lookup(types: &TypeMap, name: &str) -> TypelibResult<Arc<TypeDescription>> {
    types
        .get(name)
        .cloned()
        .ok_or_else(|| TypelibError::UnknownType(name.to_string()))
}

#[inline]
fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

fn build_compound(
    types: &mut TypeMap,
    class: TypeClass,
    name: &str,
    base: Option<TypeRef>,
    members: &[(&str, TypeRef)],
) -> TypelibResult<TypeRef> {
    if types.contains_key(name) {
        return Err(TypelibError::DuplicateType(name.to_string()));
    }

    let (mut size, mut align) = (0, 1);
    if let Some(base) = &base {
        let base_td = lookup(types, base.name())?;
        if base_td.as_compound().is_none() {
            return Err(TypelibError::WrongClass {
                name: base.name().to_string(),
                expected: "a struct or exception",
            });
        }
        size = base_td.size();
        align = base_td.align();
    }

    let mut laid_out = Vec::with_capacity(members.len());
    let mut seen = FxHashSet::default();
    for (member_name, ty) in members {
        if !seen.insert(*member_name) {
            return Err(TypelibError::DuplicateMember {
                owner: name.to_string(),
                member: member_name.to_string(),
            });
        }
        let td = lookup(types, ty.name())?;
        let offset = align_up(size, td.align());
        size = offset + td.size();
        align = align.max(td.align());
        laid_out.push(CompoundMember {
            name: member_name.to_string(),
            ty: ty.clone(),
            offset,
        });
    }
    size = align_up(size, align);

    let type_ref = TypeRef::new(class, name);
    let kind = TypeKind::Compound(CompoundTypeDescription {
        base,
        members: laid_out,
    });
    insert(types, type_ref.clone(), size, align, kind);
    Ok(type_ref)
}

/// Collect the members of `name` and its bases, bases first, each interface
/// once.
fn collect_members(
    types: &TypeMap,
    name: &str,
    seen: &mut FxHashSet<Box<str>>,
    out: &mut Vec<TypeRef>,
) -> TypelibResult<()> {
    if !seen.insert(name.into()) {
        return Ok(());
    }
    let td = lookup(types, name)?;
    let iface = td.as_interface().ok_or_else(|| TypelibError::WrongClass {
        name: name.to_string(),
        expected: "an interface",
    })?;
    for base in iface.bases() {
        collect_members(types, base.name(), seen, out)?;
    }
    out.extend(iface.members().iter().cloned());
    Ok(())
}

fn slot_count(td: &TypeDescription) -> usize {
    match td.kind() {
        TypeKind::Attribute(attr) => attr.slot_count(),
        _ => 1,
    }
}

fn build_interface(
    types: &mut TypeMap,
    builder: InterfaceBuilder,
    bases: Vec<TypeRef>,
) -> TypelibResult<TypeRef> {
    let name = builder.name;
    if types.contains_key(name.as_str()) {
        return Err(TypelibError::DuplicateType(name));
    }
    let iface_ref = TypeRef::new(TypeClass::Interface, name.as_str());

    let mut all_members = Vec::new();
    let mut seen = FxHashSet::default();
    seen.insert(Box::<str>::from(name.as_str()));
    for base in &bases {
        collect_members(types, base.name(), &mut seen, &mut all_members)?;
    }
    let mut slots = Vec::with_capacity(all_members.len() + builder.members.len());
    for member in &all_members {
        slots.push(slot_count(&*lookup(types, member.name())?));
    }

    // Member descriptions are validated before anything is inserted.
    let mut pending = Vec::with_capacity(builder.members.len());
    let mut local_names = FxHashSet::default();
    for spec in builder.members {
        let member_name = spec.name().to_string();
        if !local_names.insert(member_name.clone()) {
            return Err(TypelibError::DuplicateMember {
                owner: name,
                member: member_name,
            });
        }
        let full_name = format!("{}::{}", name, member_name);
        let (class, kind) = match spec {
            MemberSpec::Method(mut method) => {
                if let Some(ret) = &method.return_type {
                    lookup(types, ret.name())?;
                }
                for param in &method.params {
                    lookup(types, param.ty.name())?;
                }
                method.interface = iface_ref.clone();
                (TypeClass::InterfaceMethod, TypeKind::Method(method))
            }
            MemberSpec::Attribute(mut attr) => {
                lookup(types, attr.ty.name())?;
                attr.interface = iface_ref.clone();
                (TypeClass::InterfaceAttribute, TypeKind::Attribute(attr))
            }
        };
        pending.push((TypeRef::new(class, full_name), kind));
    }

    let mut locals = Vec::with_capacity(pending.len());
    for (member_ref, kind) in pending {
        let td = TypeDescription::new(member_ref.clone(), 0, 1, kind);
        slots.push(slot_count(&td));
        types.insert(member_ref.name().into(), Arc::new(td));
        locals.push(member_ref.clone());
        all_members.push(member_ref);
    }

    let kind = TypeKind::Interface(InterfaceTypeDescription::from_layout(
        bases,
        locals,
        all_members,
        &slots,
    ));
    insert(types, iface_ref.clone(), WORD, WORD, kind);
    Ok(iface_ref)
}

// ============================================================================
// InterfaceBuilder
// ============================================================================

#[derive(Debug)]
enum MemberSpec {
    Method(MethodDescription),
    Attribute(AttributeDescription),
}

impl MemberSpec {
    fn name(&self) -> &str {
        match self {
            MemberSpec::Method(m) => &m.name,
            MemberSpec::Attribute(a) => &a.name,
        }
    }
}

/// Declarative builder for interface types.
///
/// An interface declared without bases derives from `XInterface`.
#[derive(Debug)]
pub struct InterfaceBuilder {
    name: String,
    bases: Vec<TypeRef>,
    members: Vec<MemberSpec>,
}

impl InterfaceBuilder {
    /// Start an interface declaration
    pub fn new(name: impl Into<String>) -> Self {
        InterfaceBuilder {
            name: name.into(),
            bases: Vec::new(),
            members: Vec::new(),
        }
    }

    /// Add a base interface; the first one is the primary base
    pub fn base(mut self, base: TypeRef) -> Self {
        self.bases.push(base);
        self
    }

    /// Declare a method. A `void` return type is stored as no return type.
    pub fn method(
        mut self,
        name: impl Into<String>,
        return_type: TypeRef,
        params: Vec<MethodParameter>,
    ) -> Self {
        let return_type = if return_type.is_void() {
            None
        } else {
            Some(return_type)
        };
        self.members.push(MemberSpec::Method(MethodDescription {
            name: name.into(),
            interface: TypeRef::void(),
            return_type,
            params,
            exceptions: Vec::new(),
            one_way: false,
        }));
        self
    }

    /// Add an exception to the most recently declared method
    pub fn raises(mut self, exception: TypeRef) -> Self {
        if let Some(MemberSpec::Method(method)) = self.members.last_mut() {
            method.exceptions.push(exception);
        }
        self
    }

    /// Declare an attribute
    pub fn attribute(mut self, name: impl Into<String>, ty: TypeRef, read_only: bool) -> Self {
        self.members.push(MemberSpec::Attribute(AttributeDescription {
            name: name.into(),
            interface: TypeRef::void(),
            ty,
            read_only,
        }));
        self
    }
}
