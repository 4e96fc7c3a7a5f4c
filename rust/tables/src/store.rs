// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The table store session.
//!
//! One [`TableStore`] owns every cache a store or load operation needs: row
//! counters, reference contexts, the forward-reference queue, the global
//! entity registry and the style registry. All state is instance scoped -
//! two stores never share anything, so independent sessions stay independent.
//! A store is single-threaded and non-reentrant; one call runs to completion
//! or fails.

use crate::context::ReferenceContext;
use crate::error::Result;
use crate::forward::ForwardReference;
use crate::mapping::ModelMapping;
use crate::resolvers::TypeResolver;
use cobie_lite_model::{EntityId, Model, TypeRef};
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::fmt::Write as _;

/// Append-only operation report. Data-quality conditions land here; the
/// caller gets the full text back from `store`/`load_from`.
#[derive(Debug, Default)]
pub struct Log {
    text: String,
}

impl Log {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, line: impl AsRef<str>) {
        let line = line.as_ref();
        tracing::warn!(target: "cobie_lite_tables", "{line}");
        let _ = writeln!(self.text, "{line}");
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn take(&mut self) -> String {
        std::mem::take(&mut self.text)
    }
}

/// Bidirectional converter between an entity graph and tabular workbooks.
pub struct TableStore<'m> {
    pub(crate) model: &'m mut Model,
    pub(crate) mapping: ModelMapping,
    /// Resolvers for abstract value types, tried in order
    pub(crate) resolvers: Vec<Box<dyn TypeResolver>>,
    pub(crate) log: Log,

    /// Preprocessed `Enumeration.Alias` → member lookups
    pub(crate) alias_enum_cache: FxHashMap<String, String>,

    // caches bounded by one store/load call
    pub(crate) row_num_cache: FxHashMap<String, u32>,
    pub(crate) table_type_cache: FxHashMap<String, Option<TypeRef>>,
    pub(crate) multi_row_indices: FxHashMap<String, Vec<u32>>,
    pub(crate) contexts: FxHashMap<usize, ReferenceContext>,
    pub(crate) global_types: Vec<TypeRef>,
    pub(crate) global_entities: FxHashMap<TypeRef, FxHashMap<String, EntityId>>,
    pub(crate) forward_references: VecDeque<ForwardReference>,
    /// Last resolved parent set, reused across consecutive rows
    pub(crate) parent_cache: Vec<EntityId>,
    /// Grow-only sampled column widths per (table, column index)
    pub(crate) column_widths: FxHashMap<(String, u32), f64>,

    /// Traceability: emitted row index → originating entity, per sheet
    pub row_to_entity: FxHashMap<String, FxHashMap<u32, EntityId>>,
}

impl<'m> TableStore<'m> {
    /// Bind a model and a mapping into a session. The mapping is initialised
    /// against the model's schema; configuration mismatches fail here, before
    /// any data is touched.
    pub fn new(model: &'m mut Model, mut mapping: ModelMapping) -> Result<Self> {
        if !mapping.is_initialised() {
            let schema = model.schema_handle();
            mapping.init(&schema)?;
        }

        let schema = model.schema_handle();
        let mut global_types = Vec::new();
        for scope in &mapping.scopes {
            if scope.scope == crate::mapping::ClassScope::Model {
                global_types.push(schema.require(&scope.class)?);
            }
        }

        let mut alias_enum_cache = FxHashMap::default();
        for enum_mapping in &mapping.enumeration_mappings {
            for alias in &enum_mapping.aliases {
                alias_enum_cache.insert(
                    format!("{}.{}", enum_mapping.enumeration, alias.alias),
                    alias.enum_member.clone(),
                );
            }
        }

        Ok(TableStore {
            model,
            mapping,
            resolvers: Vec::new(),
            log: Log::new(),
            alias_enum_cache,
            row_num_cache: FxHashMap::default(),
            table_type_cache: FxHashMap::default(),
            multi_row_indices: FxHashMap::default(),
            contexts: FxHashMap::default(),
            global_types,
            global_entities: FxHashMap::default(),
            forward_references: VecDeque::new(),
            parent_cache: Vec::new(),
            column_widths: FxHashMap::default(),
            row_to_entity: FxHashMap::default(),
        })
    }

    /// Register a resolver for abstract value types.
    pub fn add_resolver(&mut self, resolver: Box<dyn TypeResolver>) {
        self.resolvers.push(resolver);
    }

    pub fn mapping(&self) -> &ModelMapping {
        &self.mapping
    }

    pub fn model(&self) -> &Model {
        self.model
    }

    /// Reset per-operation state; each store or load starts from a clean
    /// session so consecutive runs never leak entities or counters.
    pub(crate) fn reset_session(&mut self) {
        self.log = Log::new();
        self.row_num_cache.clear();
        self.multi_row_indices.clear();
        self.contexts.clear();
        self.global_entities.clear();
        self.forward_references.clear();
        self.parent_cache.clear();
        self.column_widths.clear();
        self.row_to_entity.clear();
    }

    /// Mapped type of a table name, cached; `None` for unknown tables.
    pub(crate) fn table_type(&mut self, table_name: &str) -> Option<TypeRef> {
        let key = table_name.to_uppercase();
        if let Some(cached) = self.table_type_cache.get(&key) {
            return *cached;
        }
        let found = self
            .mapping
            .for_table(table_name)
            .and_then(|i| self.mapping.class_mappings[i].type_ref);
        self.table_type_cache.insert(key, found);
        found
    }

    /// Model-scoped types are deduplicated by identity key; the set is closed
    /// and declared explicitly in the configuration.
    pub(crate) fn is_global(&self, t: TypeRef) -> bool {
        let schema = self.model.schema();
        self.global_types.iter().any(|&g| schema.is_kind_of(t, g))
    }

    /// Take the lazily-built reference context of a class mapping out of the
    /// session. Callers return it with [`TableStore::put_context`]; taking
    /// ownership keeps row processing free of aliasing.
    pub(crate) fn take_context(&mut self, cm_index: usize) -> Result<ReferenceContext> {
        if let Some(ctx) = self.contexts.remove(&cm_index) {
            return Ok(ctx);
        }
        let schema = self.model.schema_handle();
        ReferenceContext::build(&schema, &self.mapping, cm_index)
    }

    pub(crate) fn put_context(&mut self, cm_index: usize, ctx: ReferenceContext) {
        self.contexts.insert(cm_index, ctx);
    }

    /// Alias registered for an enumeration member, if any.
    pub(crate) fn alias_for_member(&self, member: &str) -> Option<&str> {
        self.mapping
            .enumeration_mappings
            .iter()
            .flat_map(|e| e.aliases.iter())
            .find(|a| a.enum_member == member)
            .map(|a| a.alias.as_str())
    }
}
