// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Key→target mapping caches.
//!
//! During a conversion the same source value is encountered many times -
//! the same classification string on hundreds of elements, the same
//! authoring tool name on every object. Each mapping keeps one target
//! entity per distinct key so the converted model shares instances the way
//! the table store's global registry expects.

use cobie_lite_model::{EntityId, Model, Result, TypeRef, Value};
use rustc_hash::FxHashMap;
use std::hash::Hash;

/// One key→target cache. `get_or_create` returns the existing target or
/// materializes a new one through the supplied constructor.
#[derive(Debug, Default)]
pub struct MappingCache<K: Eq + Hash> {
    cache: FxHashMap<K, EntityId>,
}

impl<K: Eq + Hash> MappingCache<K> {
    pub fn new() -> Self {
        MappingCache {
            cache: FxHashMap::default(),
        }
    }

    pub fn get(&self, key: &K) -> Option<EntityId> {
        self.cache.get(key).copied()
    }

    pub fn get_or_create(
        &mut self,
        key: K,
        create: impl FnOnce() -> Result<EntityId>,
    ) -> Result<EntityId> {
        if let Some(&existing) = self.cache.get(&key) {
            return Ok(existing);
        }
        let created = create()?;
        self.cache.insert(key, created);
        Ok(created)
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

/// An exchange session over one target model: identifier counters plus the
/// string-keyed mappings shared by every concrete converter.
pub struct Exchange<'m> {
    model: &'m mut Model,
    categories: MappingCache<String>,
    external_systems: MappingCache<String>,
    external_objects: MappingCache<String>,
    next_id: u32,
}

impl<'m> Exchange<'m> {
    pub fn new(model: &'m mut Model) -> Self {
        Exchange {
            model,
            categories: MappingCache::new(),
            external_systems: MappingCache::new(),
            external_objects: MappingCache::new(),
            next_id: 0,
        }
    }

    pub fn model(&mut self) -> &mut Model {
        self.model
    }

    /// Sequential identifier for generated names.
    pub fn next_identifier(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn require_type(&self, name: &str) -> Result<TypeRef> {
        self.model.schema().require(name)
    }

    /// One shared category entity per distinct classification string.
    pub fn category(&mut self, value: &str) -> Result<EntityId> {
        let t = self.require_type("CobieCategory")?;
        let model = &mut *self.model;
        self.categories.get_or_create(value.to_string(), || {
            let e = model.new_entity(t)?;
            model.set_scalar(e, "Value", Value::String(value.to_string()));
            model.set_scalar(e, "Description", Value::String(value.to_string()));
            Ok(e)
        })
    }

    /// One shared external system entity per authoring tool name.
    pub fn external_system(&mut self, name: &str) -> Result<EntityId> {
        let t = self.require_type("CobieExternalSystem")?;
        let model = &mut *self.model;
        self.external_systems.get_or_create(name.to_string(), || {
            let e = model.new_entity(t)?;
            model.set_scalar(e, "Name", Value::String(name.to_string()));
            Ok(e)
        })
    }

    /// One shared external object entity per source schema type name.
    pub fn external_object(&mut self, name: &str) -> Result<EntityId> {
        let t = self.require_type("CobieExternalObject")?;
        let model = &mut *self.model;
        self.external_objects.get_or_create(name.to_string(), || {
            let e = model.new_entity(t)?;
            model.set_scalar(e, "Name", Value::String(name.to_string()));
            Ok(e)
        })
    }
}
