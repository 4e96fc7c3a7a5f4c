// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Runtime schema metadata registry.
//!
//! The mapping engine never hard-codes knowledge of any entity type; it asks
//! this registry for property descriptors, subtype lists and abstractness.
//! Lookups by name are case-insensitive on a canonical upper-cased form.

use crate::error::{Error, Result};
use rustc_hash::FxHashMap;

/// Handle to a registered type. Cheap to copy and compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeRef(pub(crate) u16);

/// Primitive kinds a value type can resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    String,
    Integer,
    Float,
    Bool,
    DateTime,
}

/// What a registered type is.
#[derive(Debug, Clone)]
pub enum TypeBody {
    /// Entity type with declared properties (inherited ones live on the supertype)
    Entity { properties: Vec<PropertyDef> },
    /// Concrete value type wrapping a primitive (e.g. `FloatValue`)
    Value { underlying: ScalarKind },
    /// Abstract select over value subtypes (e.g. `AttributeValue`)
    Select,
    /// Enumeration with a closed member list
    Enumeration { members: Vec<String> },
}

/// Shape of a single property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    /// Single scalar; target is a value/select/enumeration type
    Scalar(TypeRef),
    /// Ordered list of scalars
    ScalarList(TypeRef),
    /// Single related entity
    Entity(TypeRef),
    /// Ordered set of related entities
    EntityList(TypeRef),
}

impl PropertyKind {
    /// Target type regardless of cardinality.
    #[inline]
    pub fn target(&self) -> TypeRef {
        match self {
            PropertyKind::Scalar(t)
            | PropertyKind::ScalarList(t)
            | PropertyKind::Entity(t)
            | PropertyKind::EntityList(t) => *t,
        }
    }

    #[inline]
    pub fn is_enumerable(&self) -> bool {
        matches!(self, PropertyKind::ScalarList(_) | PropertyKind::EntityList(_))
    }

    #[inline]
    pub fn is_entity(&self) -> bool {
        matches!(self, PropertyKind::Entity(_) | PropertyKind::EntityList(_))
    }
}

/// Property descriptor as consumed by the mapping engine.
#[derive(Debug, Clone)]
pub struct PropertyDef {
    pub name: String,
    pub kind: PropertyKind,
    /// Derived values are computed by the tooling, never by hand-edited data
    pub is_derived: bool,
    /// Inverse properties are traversed against the direction of ownership;
    /// holds the name of the owning (remote) property on the target type
    pub inverse_of: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TypeDef {
    pub name: String,
    pub is_abstract: bool,
    pub supertype: Option<TypeRef>,
    pub body: TypeBody,
}

/// The schema registry.
#[derive(Debug)]
pub struct Schema {
    types: Vec<TypeDef>,
    by_name: FxHashMap<String, TypeRef>,
    /// Transitive subtype closure per type (excluding the type itself)
    subtypes: Vec<Vec<TypeRef>>,
}

impl Schema {
    /// Resolve a type by name, case-insensitive.
    pub fn type_by_name(&self, name: &str) -> Option<TypeRef> {
        self.by_name.get(&name.to_uppercase()).copied()
    }

    /// Like [`Schema::type_by_name`] but an error for configuration contexts.
    pub fn require(&self, name: &str) -> Result<TypeRef> {
        self.type_by_name(name)
            .ok_or_else(|| Error::UnknownType(name.to_string()))
    }

    #[inline]
    pub fn name(&self, t: TypeRef) -> &str {
        &self.types[t.0 as usize].name
    }

    #[inline]
    pub fn def(&self, t: TypeRef) -> &TypeDef {
        &self.types[t.0 as usize]
    }

    #[inline]
    pub fn is_abstract(&self, t: TypeRef) -> bool {
        self.types[t.0 as usize].is_abstract
    }

    #[inline]
    pub fn supertype(&self, t: TypeRef) -> Option<TypeRef> {
        self.types[t.0 as usize].supertype
    }

    /// All transitive subtypes, not including `t` itself.
    #[inline]
    pub fn subtypes(&self, t: TypeRef) -> &[TypeRef] {
        &self.subtypes[t.0 as usize]
    }

    /// True if `t` is `base` or derives from it.
    pub fn is_kind_of(&self, t: TypeRef, base: TypeRef) -> bool {
        let mut cur = Some(t);
        while let Some(c) = cur {
            if c == base {
                return true;
            }
            cur = self.supertype(c);
        }
        false
    }

    /// Look up a property on a type, walking the supertype chain.
    pub fn property(&self, t: TypeRef, name: &str) -> Option<&PropertyDef> {
        let mut cur = Some(t);
        while let Some(c) = cur {
            if let TypeBody::Entity { properties } = &self.types[c.0 as usize].body {
                if let Some(p) = properties.iter().find(|p| p.name == name) {
                    return Some(p);
                }
            }
            cur = self.supertype(c);
        }
        None
    }

    /// Declared and inherited properties, supertypes first.
    pub fn properties(&self, t: TypeRef) -> Vec<&PropertyDef> {
        let mut chain = Vec::new();
        let mut cur = Some(t);
        while let Some(c) = cur {
            chain.push(c);
            cur = self.supertype(c);
        }
        let mut props = Vec::new();
        for c in chain.into_iter().rev() {
            if let TypeBody::Entity { properties } = &self.types[c.0 as usize].body {
                props.extend(properties.iter());
            }
        }
        props
    }

    /// Primitive behind a value type; walks past abstract selects to `None`.
    pub fn underlying(&self, t: TypeRef) -> Option<ScalarKind> {
        match &self.types[t.0 as usize].body {
            TypeBody::Value { underlying } => Some(*underlying),
            TypeBody::Enumeration { .. } => Some(ScalarKind::String),
            _ => None,
        }
    }

    /// Members of an enumeration type.
    pub fn enum_members(&self, t: TypeRef) -> Option<&[String]> {
        match &self.types[t.0 as usize].body {
            TypeBody::Enumeration { members } => Some(members),
            _ => None,
        }
    }

    pub fn is_value_type(&self, t: TypeRef) -> bool {
        matches!(
            self.types[t.0 as usize].body,
            TypeBody::Value { .. } | TypeBody::Select | TypeBody::Enumeration { .. }
        )
    }

    pub fn type_count(&self) -> usize {
        self.types.len()
    }
}

/// Incremental schema construction: declare all types first, then attach
/// properties (property targets may reference any declared type).
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    types: Vec<TypeDef>,
    by_name: FxHashMap<String, TypeRef>,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn declare(&mut self, name: &str, is_abstract: bool, supertype: Option<&str>, body: TypeBody) -> TypeRef {
        let supertype = supertype.map(|s| {
            *self
                .by_name
                .get(&s.to_uppercase())
                .unwrap_or_else(|| panic!("supertype {s} must be declared before {name}"))
        });
        let t = TypeRef(self.types.len() as u16);
        self.by_name.insert(name.to_uppercase(), t);
        self.types.push(TypeDef {
            name: name.to_string(),
            is_abstract,
            supertype,
            body,
        });
        t
    }

    pub fn entity(&mut self, name: &str, supertype: Option<&str>) -> TypeRef {
        self.declare(name, false, supertype, TypeBody::Entity { properties: Vec::new() })
    }

    pub fn abstract_entity(&mut self, name: &str, supertype: Option<&str>) -> TypeRef {
        self.declare(name, true, supertype, TypeBody::Entity { properties: Vec::new() })
    }

    pub fn value_type(&mut self, name: &str, underlying: ScalarKind, supertype: Option<&str>) -> TypeRef {
        self.declare(name, false, supertype, TypeBody::Value { underlying })
    }

    pub fn select(&mut self, name: &str) -> TypeRef {
        self.declare(name, true, None, TypeBody::Select)
    }

    pub fn enumeration(&mut self, name: &str, members: &[&str]) -> TypeRef {
        self.declare(
            name,
            false,
            None,
            TypeBody::Enumeration {
                members: members.iter().map(|m| m.to_string()).collect(),
            },
        )
    }

    fn resolve(&self, name: &str) -> TypeRef {
        *self
            .by_name
            .get(&name.to_uppercase())
            .unwrap_or_else(|| panic!("property target {name} is not declared"))
    }

    fn push_property(&mut self, owner: &str, def: PropertyDef) {
        let owner_ref = self.resolve(owner);
        match &mut self.types[owner_ref.0 as usize].body {
            TypeBody::Entity { properties } => properties.push(def),
            _ => panic!("{owner} is not an entity type"),
        }
    }

    pub fn scalar(&mut self, owner: &str, name: &str, target: &str) {
        let target = self.resolve(target);
        self.push_property(
            owner,
            PropertyDef {
                name: name.to_string(),
                kind: PropertyKind::Scalar(target),
                is_derived: false,
                inverse_of: None,
            },
        );
    }

    pub fn derived_scalar(&mut self, owner: &str, name: &str, target: &str) {
        let target = self.resolve(target);
        self.push_property(
            owner,
            PropertyDef {
                name: name.to_string(),
                kind: PropertyKind::Scalar(target),
                is_derived: true,
                inverse_of: None,
            },
        );
    }

    pub fn scalar_list(&mut self, owner: &str, name: &str, target: &str) {
        let target = self.resolve(target);
        self.push_property(
            owner,
            PropertyDef {
                name: name.to_string(),
                kind: PropertyKind::ScalarList(target),
                is_derived: false,
                inverse_of: None,
            },
        );
    }

    pub fn entity_ref(&mut self, owner: &str, name: &str, target: &str) {
        let target = self.resolve(target);
        self.push_property(
            owner,
            PropertyDef {
                name: name.to_string(),
                kind: PropertyKind::Entity(target),
                is_derived: false,
                inverse_of: None,
            },
        );
    }

    pub fn entity_list(&mut self, owner: &str, name: &str, target: &str) {
        let target = self.resolve(target);
        self.push_property(
            owner,
            PropertyDef {
                name: name.to_string(),
                kind: PropertyKind::EntityList(target),
                is_derived: false,
                inverse_of: None,
            },
        );
    }

    /// Inverse single-entity property: `remote` names the owning property on
    /// the target type.
    pub fn inverse(&mut self, owner: &str, name: &str, target: &str, remote: &str) {
        let target_ref = self.resolve(target);
        self.push_property(
            owner,
            PropertyDef {
                name: name.to_string(),
                kind: PropertyKind::EntityList(target_ref),
                is_derived: false,
                inverse_of: Some(remote.to_string()),
            },
        );
    }

    pub fn finish(self) -> Schema {
        let mut subtypes: Vec<Vec<TypeRef>> = vec![Vec::new(); self.types.len()];
        for (i, def) in self.types.iter().enumerate() {
            // register i under every ancestor
            let mut cur = def.supertype;
            while let Some(sup) = cur {
                subtypes[sup.0 as usize].push(TypeRef(i as u16));
                cur = self.types[sup.0 as usize].supertype;
            }
        }
        Schema {
            types: self.types,
            by_name: self.by_name,
            subtypes,
        }
    }
}
