// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Dynamic entity store.
//!
//! Entities are arena-allocated and addressed by small copyable handles.
//! Attribute slots are populated on demand; reads of unset slots yield
//! nothing rather than defaults. Mutations are visible immediately to
//! subsequent reads within the same pass.

use crate::error::{Error, Result};
use crate::schema::{PropertyDef, Schema, TypeRef};
use crate::value::Value;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::sync::Arc;

/// Handle to an entity instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub u32);

/// One attribute slot of an entity. List slots stay inline for the short
/// collections typical of building data (categories, spaces, members).
#[derive(Debug, Clone)]
pub enum Slot {
    Scalar(Value),
    ScalarList(SmallVec<[Value; 4]>),
    Entity(EntityId),
    EntityList(SmallVec<[EntityId; 4]>),
}

#[derive(Debug)]
struct Entity {
    type_ref: TypeRef,
    slots: FxHashMap<String, Slot>,
}

/// Read view of a property value; inverse properties yield an owned list
/// because they are computed by scanning the remote side.
#[derive(Debug, Clone)]
pub enum PropValue {
    Scalar(Value),
    ScalarList(Vec<Value>),
    Entity(EntityId),
    EntityList(Vec<EntityId>),
}

/// The instance graph.
#[derive(Debug)]
pub struct Model {
    schema: Arc<Schema>,
    entities: Vec<Entity>,
}

impl Model {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            entities: Vec::new(),
        }
    }

    #[inline]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn schema_handle(&self) -> Arc<Schema> {
        Arc::clone(&self.schema)
    }

    /// Create a new instance of a concrete entity type.
    pub fn new_entity(&mut self, type_ref: TypeRef) -> Result<EntityId> {
        if self.schema.is_abstract(type_ref) {
            return Err(Error::AbstractInstantiation(
                self.schema.name(type_ref).to_string(),
            ));
        }
        let id = EntityId(self.entities.len() as u32);
        self.entities.push(Entity {
            type_ref,
            slots: FxHashMap::default(),
        });
        Ok(id)
    }

    #[inline]
    pub fn entity_type(&self, id: EntityId) -> TypeRef {
        self.entities[id.0 as usize].type_ref
    }

    #[inline]
    pub fn type_name(&self, id: EntityId) -> &str {
        self.schema.name(self.entity_type(id))
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// All instances of a type, optionally including subtypes.
    pub fn instances_of(&self, type_ref: TypeRef, include_subtypes: bool) -> Vec<EntityId> {
        self.entities
            .iter()
            .enumerate()
            .filter(|(_, e)| {
                e.type_ref == type_ref
                    || (include_subtypes && self.schema.is_kind_of(e.type_ref, type_ref))
            })
            .map(|(i, _)| EntityId(i as u32))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = EntityId> + '_ {
        (0..self.entities.len() as u32).map(EntityId)
    }

    // -- slot reads ---------------------------------------------------------

    pub fn scalar(&self, id: EntityId, prop: &str) -> Option<&Value> {
        match self.entities[id.0 as usize].slots.get(prop) {
            Some(Slot::Scalar(v)) => Some(v),
            _ => None,
        }
    }

    pub fn scalar_list(&self, id: EntityId, prop: &str) -> Option<&[Value]> {
        match self.entities[id.0 as usize].slots.get(prop) {
            Some(Slot::ScalarList(v)) => Some(v.as_slice()),
            _ => None,
        }
    }

    pub fn related(&self, id: EntityId, prop: &str) -> Option<EntityId> {
        match self.entities[id.0 as usize].slots.get(prop) {
            Some(Slot::Entity(e)) => Some(*e),
            _ => None,
        }
    }

    pub fn related_list(&self, id: EntityId, prop: &str) -> Option<&[EntityId]> {
        match self.entities[id.0 as usize].slots.get(prop) {
            Some(Slot::EntityList(v)) => Some(v.as_slice()),
            _ => None,
        }
    }

    /// Evaluate a property descriptor against an entity. Inverse properties
    /// are resolved by scanning instances of the remote type; everything else
    /// is a slot read. Returns `None` when the slot has never been set.
    pub fn property_value(&self, id: EntityId, def: &PropertyDef) -> Option<PropValue> {
        if let Some(remote) = &def.inverse_of {
            let target = def.kind.target();
            let found = self.inverses_of(id, target, remote);
            if found.is_empty() {
                return None;
            }
            return Some(PropValue::EntityList(found));
        }
        match self.entities[id.0 as usize].slots.get(&def.name)? {
            Slot::Scalar(v) => Some(PropValue::Scalar(v.clone())),
            Slot::ScalarList(v) => Some(PropValue::ScalarList(v.to_vec())),
            Slot::Entity(e) => Some(PropValue::Entity(*e)),
            Slot::EntityList(v) => Some(PropValue::EntityList(v.to_vec())),
        }
    }

    /// Entities of `target` type (or subtypes) whose `remote` property points
    /// back at `id`.
    pub fn inverses_of(&self, id: EntityId, target: TypeRef, remote: &str) -> Vec<EntityId> {
        self.instances_of(target, true)
            .into_iter()
            .filter(|&other| {
                match self.entities[other.0 as usize].slots.get(remote) {
                    Some(Slot::Entity(e)) => *e == id,
                    Some(Slot::EntityList(v)) => v.contains(&id),
                    _ => false,
                }
            })
            .collect()
    }

    // -- slot writes --------------------------------------------------------

    pub fn set_scalar(&mut self, id: EntityId, prop: &str, value: Value) {
        self.entities[id.0 as usize]
            .slots
            .insert(prop.to_string(), Slot::Scalar(value));
    }

    /// Append to a scalar list, creating the list on first use.
    pub fn push_scalar(&mut self, id: EntityId, prop: &str, value: Value) {
        match self.entities[id.0 as usize]
            .slots
            .entry(prop.to_string())
            .or_insert_with(|| Slot::ScalarList(SmallVec::new()))
        {
            Slot::ScalarList(list) => list.push(value),
            other => *other = Slot::ScalarList(SmallVec::from_elem(value, 1)),
        }
    }

    pub fn set_related(&mut self, id: EntityId, prop: &str, other: EntityId) {
        self.entities[id.0 as usize]
            .slots
            .insert(prop.to_string(), Slot::Entity(other));
    }

    /// Append to an entity list, creating the list on first use.
    pub fn push_related(&mut self, id: EntityId, prop: &str, other: EntityId) {
        match self.entities[id.0 as usize]
            .slots
            .entry(prop.to_string())
            .or_insert_with(|| Slot::EntityList(SmallVec::new()))
        {
            Slot::EntityList(list) => {
                if !list.contains(&other) {
                    list.push(other);
                }
            }
            slot => *slot = Slot::EntityList(SmallVec::from_elem(other, 1)),
        }
    }

    pub fn has_slot(&self, id: EntityId, prop: &str) -> bool {
        self.entities[id.0 as usize].slots.contains_key(prop)
    }

    /// Validity check for handles coming from foreign sessions.
    pub fn contains(&self, id: EntityId) -> bool {
        (id.0 as usize) < self.entities.len()
    }
}
