// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Reading a workbook back into the entity graph.
//!
//! Per sheet: header adjustment → row iteration → multi-row detection →
//! entity resolution → row-number tagging. Relationship targets that may
//! live in other tables are deferred to the forward-reference queue and
//! resolved after every sheet has loaded.

use crate::context::{ContextType, LoadEnv, ReferenceContext, ROOT};
use crate::error::Result;
use crate::forward::ForwardReference;
use crate::mapping::{column_index_to_letter, column_letter_to_index, MultiRow};
use crate::store::TableStore;
use crate::workbook::{CellSnapshot, CellValue, RowSnapshot, Workbook};
use cobie_lite_model::{EntityId, PropertyKind, TypeRef, Value};
use rustc_hash::FxHashMap;
use std::path::Path;

/// Three consecutive fully blank rows terminate a sheet.
const BLANK_ROW_LIMIT: u32 = 3;

impl TableStore<'_> {
    /// Deserialize a workbook into the model. Returns the read log - every
    /// skipped, ambiguous or orphaned condition encountered. Only structural
    /// and configuration problems are errors.
    pub fn load_from(&mut self, path: &Path) -> Result<String> {
        self.reset_session();
        let workbook = Workbook::open(path)?;
        self.load_from_workbook(&workbook)?;
        Ok(self.log.take())
    }

    fn load_from_workbook(&mut self, workbook: &Workbook) -> Result<()> {
        if self.mapping.class_mappings.is_empty() {
            return Ok(());
        }

        for sheet_name in workbook.sheet_names() {
            let Some(cm_index) = self.mapping.for_table(&sheet_name) else {
                continue;
            };
            if self.mapping.class_mappings[cm_index].is_partial {
                self.process_partial_sheet(workbook, cm_index, &sheet_name)?;
            } else {
                self.load_from_sheet(workbook, cm_index, &sheet_name)?;
            }
        }

        self.resolve_references()?;
        Ok(())
    }

    /// Drain the forward-reference queue to its fixpoint. New references
    /// enqueued while draining are processed in the same pass.
    pub fn resolve_references(&mut self) -> Result<()> {
        while let Some(reference) = self.forward_references.pop_front() {
            let mut ctx = self.take_context(reference.cm_index)?;
            self.load_context(&mut ctx, &reference.row);
            if ctx.node(reference.node).kind == ContextType::Parent {
                self.resolve_parent(&ctx, &reference);
            } else {
                self.resolve_member(&ctx, &reference);
            }
            self.put_context(reference.cm_index, ctx);
        }
        Ok(())
    }

    fn load_from_sheet(&mut self, workbook: &Workbook, cm_index: usize, sheet: &str) -> Result<()> {
        let cells = workbook.sheet_cells(sheet);
        let last_row = workbook.last_row(sheet);
        // only a header in this sheet, don't waste resources
        if last_row < 2 {
            return Ok(());
        }

        self.adjust_mapping(cm_index, &cells);
        self.cache_multi_row_indices(cm_index);
        let mut ctx = self.take_context(cm_index)?;

        let mut blank_rows = 0u32;
        let mut last_entity: Option<EntityId> = None;
        let mut last_snapshot: Option<RowSnapshot> = None;

        for row_index in 2..=last_row {
            let row = snapshot_row(&cells, row_index);
            if row.iter().all(|c| c.value.is_blank()) {
                blank_rows += 1;
                if blank_rows == BLANK_ROW_LIMIT {
                    // trailing formatting noise, not data
                    break;
                }
                continue;
            }
            blank_rows = 0;

            self.load_context(&mut ctx, &row);

            // nothing to create an entity from
            if !ctx.has_data(ROOT) {
                continue;
            }
            // identity declared but absent: skip the row
            {
                let cm = &self.mapping.class_mappings[cm_index];
                if ctx.has_key_requirements(cm) && !ctx.has_key_data(cm) {
                    continue;
                }
            }

            let continuation = match &last_snapshot {
                Some(last) => self.is_continuation_row(cm_index, &row, last),
                None => false,
            };

            let entity = if continuation {
                self.merge_continuation_row(&ctx, last_entity, &row);
                last_entity
            } else {
                self.resolve_context(&ctx, ROOT, None, false, &row)
            };

            if let Some(e) = entity {
                self.add_row_number(e, row_index);
            }
            last_entity = entity;
            last_snapshot = Some(row);
        }

        self.put_context(cm_index, ctx);
        Ok(())
    }

    /// Partial tables carry no entity data of their own; each row locates
    /// existing entities and links them to their parent.
    fn process_partial_sheet(&mut self, workbook: &Workbook, cm_index: usize, sheet: &str) -> Result<()> {
        let cells = workbook.sheet_cells(sheet);
        let last_row = workbook.last_row(sheet);
        if last_row < 2 {
            return Ok(());
        }

        self.adjust_mapping(cm_index, &cells);
        let mut ctx = self.take_context(cm_index)?;

        let Some(parent_node) = ctx.parent_node() else {
            self.log.write(format!(
                "Table {sheet} is marked as a partial table but it doesn't have any parent mapping defined"
            ));
            self.put_context(cm_index, ctx);
            return Ok(());
        };

        let mut blank_rows = 0u32;
        for row_index in 2..=last_row {
            let row = snapshot_row(&cells, row_index);
            if row.iter().all(|c| c.value.is_blank()) {
                blank_rows += 1;
                if blank_rows == BLANK_ROW_LIMIT {
                    break;
                }
                continue;
            }
            blank_rows = 0;

            self.load_context(&mut ctx, &row);
            let entities = self.get_referenced_entities(&ctx, ROOT);
            for entity in entities {
                self.forward_references.push_back(ForwardReference::new(
                    entity,
                    cm_index,
                    parent_node,
                    row.clone(),
                ));
            }
        }

        self.put_context(cm_index, ctx);
        Ok(())
    }

    // -- header adjustment --------------------------------------------------

    /// Column letters in the mapping are not trusted positionally: re-bind
    /// every property mapping to whichever column carries its header text,
    /// hand out remaining columns to unmatched mappings in encounter order
    /// and drop mappings that end up with no column at all for this load.
    fn adjust_mapping(&mut self, cm_index: usize, cells: &FxHashMap<(u32, u32), CellValue>) {
        let mut headers: Vec<(u32, String)> = cells
            .iter()
            .filter(|((row, _), _)| *row == 1)
            .map(|((_, col), v)| (*col, v.text()))
            .filter(|(_, text)| !text.trim().is_empty())
            .collect();
        headers.sort_by_key(|(col, _)| *col);
        if headers.is_empty() {
            return;
        }

        let mappings = &mut self.mapping.class_mappings[cm_index].property_mappings;

        for (col, header) in &headers {
            let letter = column_index_to_letter(*col);
            let Some(target) = mappings
                .iter()
                .position(|m| m.header.eq_ignore_ascii_case(header))
            else {
                // unknown headers may be renamed columns; things might go
                // wrong, leave them alone
                continue;
            };
            if mappings[target]
                .column
                .as_deref()
                .is_some_and(|c| c.eq_ignore_ascii_case(&letter))
            {
                continue;
            }
            if mappings[target].column.as_deref().unwrap_or("").trim().is_empty() {
                mappings[target].column = Some(letter);
                continue;
            }
            // move the mapping to its observed position
            if let Some(current) = mappings
                .iter()
                .position(|m| m.column.as_deref().is_some_and(|c| c.eq_ignore_ascii_case(&letter)))
            {
                mappings[current].column = None;
            }
            mappings[target].column = Some(letter);
        }

        // hand out unoccupied header columns to mappings without a home
        for (col, _) in &headers {
            let letter = column_index_to_letter(*col);
            if mappings
                .iter()
                .any(|m| m.column.as_deref().is_some_and(|c| c.eq_ignore_ascii_case(&letter)))
            {
                continue;
            }
            let Some(first_unassigned) = mappings
                .iter()
                .position(|m| m.column.as_deref().unwrap_or("").trim().is_empty())
            else {
                break;
            };
            mappings[first_unassigned].column = Some(letter);
        }

        // a column with no home is dropped from the mapping for this load
        mappings.retain(|m| !m.column.as_deref().unwrap_or("").trim().is_empty());

        for m in mappings.iter_mut() {
            m.column_index = m
                .column
                .as_deref()
                .and_then(column_letter_to_index)
                .unwrap_or(0);
        }
    }

    /// One table may be defined for multiple classes; it has to share the
    /// same identity columns (validated at init).
    fn cache_multi_row_indices(&mut self, cm_index: usize) {
        let cm = &self.mapping.class_mappings[cm_index];
        self.multi_row_indices
            .insert(cm.table_name.to_uppercase(), cm.identity_columns());
    }

    // -- multi-row handling -------------------------------------------------

    /// A row continues the previous one iff every identity column agrees,
    /// compared type-aware: numbers within 1e-9, strings and booleans exact.
    fn is_continuation_row(&self, cm_index: usize, row: &RowSnapshot, last: &RowSnapshot) -> bool {
        let cm = &self.mapping.class_mappings[cm_index];
        if !cm.has_multi_row_columns() {
            return false;
        }
        let Some(indices) = self.multi_row_indices.get(&cm.table_name.to_uppercase()) else {
            return false;
        };
        // nothing to compare means nothing can merge
        if indices.is_empty() {
            return false;
        }

        indices.iter().all(|&index| {
            let a = row.iter().find(|c| c.column == index).map(|c| &c.value);
            let b = last.iter().find(|c| c.column == index).map(|c| &c.value);
            match (a, b) {
                (Some(a), Some(b)) if !a.is_blank() && !b.is_blank() => match (a, b) {
                    (CellValue::Number(x), CellValue::Number(y)) => (x - y).abs() <= 1e-9,
                    (CellValue::Text(x), CellValue::Text(y)) => x == y,
                    (CellValue::Bool(x), CellValue::Bool(y)) => x == y,
                    _ => false,
                },
                _ => false,
            }
        })
    }

    /// Continuation rows only contribute their multi-row columns, appended
    /// to the running entity's collections.
    fn merge_continuation_row(
        &mut self,
        ctx: &ReferenceContext,
        last_entity: Option<EntityId>,
        row: &RowSnapshot,
    ) {
        let Some(root_entity) = last_entity else {
            return;
        };
        let cm = &self.mapping.class_mappings[ctx.class_mapping];

        // climb each multi-row scalar to its list-valued entry point
        let mut sub_contexts: Vec<usize> = Vec::new();
        for scalar in ctx.all_scalar_children(ROOT) {
            let node = ctx.node(scalar);
            let Some(pm) = node.mapping else { continue };
            if cm.property_mappings[pm].multi_row == MultiRow::None {
                continue;
            }
            let sub = if node.kind == ContextType::ScalarList {
                Some(scalar)
            } else {
                let mut cur = node.parent;
                loop {
                    match cur {
                        Some(p) if ctx.node(p).kind == ContextType::EntityList => break Some(p),
                        Some(p) => cur = ctx.node(p).parent,
                        None => break None,
                    }
                }
            };
            if let Some(s) = sub {
                if !sub_contexts.contains(&s) {
                    sub_contexts.push(s);
                }
            }
        }

        for sub in sub_contexts {
            self.resolve_multi_context(ctx, sub, root_entity, row);
        }
    }

    /// Browse from the running entity to the level above `sub` and resolve
    /// only that partial context for this continuation row.
    fn resolve_multi_context(
        &mut self,
        ctx: &ReferenceContext,
        sub: usize,
        root_entity: EntityId,
        row: &RowSnapshot,
    ) {
        // path of context nodes from the root down to sub
        let mut stack = Vec::new();
        let mut cur = Some(sub);
        while let Some(c) = cur {
            if c == ROOT {
                break;
            }
            stack.push(c);
            cur = ctx.node(c).parent;
        }

        let mut entity = root_entity;
        while stack.len() > 1 {
            let step = stack.pop().expect("len checked");
            let node = ctx.node(step);
            let Some(prop) = self
                .model
                .schema()
                .property(self.model.entity_type(entity), &node.segment)
                .cloned()
            else {
                self.log.write("It wasn't possible to browse to the data entry point.");
                return;
            };
            match self.model.property_value(entity, &prop) {
                Some(cobie_lite_model::PropValue::Entity(e)) => entity = e,
                Some(cobie_lite_model::PropValue::EntityList(list)) => {
                    match list
                        .into_iter()
                        .find(|&e| crate::resolve::is_valid_entity(self.model, ctx, step, e))
                    {
                        Some(e) => entity = e,
                        None => {
                            self.log.write("It wasn't possible to browse to the data entry point.");
                            return;
                        }
                    }
                }
                _ => {
                    self.log.write("It wasn't possible to browse to the data entry point.");
                    return;
                }
            }
        }

        let node = ctx.node(sub);
        if node.is_reference {
            self.forward_references.push_back(ForwardReference::new(
                entity,
                ctx.class_mapping,
                sub,
                row.clone(),
            ));
            return;
        }
        match node.kind {
            ContextType::EntityList => {
                if let Some(child) = self.resolve_context(ctx, sub, None, false, row) {
                    self.assign_entity(entity, child, ctx, sub);
                }
            }
            ContextType::ScalarList => {
                if let Some(value) = node.values.first() {
                    self.model.push_scalar(entity, &node.segment, value.clone());
                }
            }
            _ => {}
        }
    }

    // -- entity resolution --------------------------------------------------

    /// Create or find the entity a context subtree describes and populate it
    /// from the loaded values. `scalar_index` picks one element of the value
    /// lists when a repeated entity is materialized per index.
    pub(crate) fn resolve_context(
        &mut self,
        ctx: &ReferenceContext,
        node: usize,
        scalar_index: Option<usize>,
        only_scalar: bool,
        row: &RowSnapshot,
    ) -> Option<EntityId> {
        let concrete = self.concrete_type(ctx, node)?;

        let mut entity: Option<EntityId> = None;
        if self.is_global(concrete) {
            // a global type with no values at all resolves to nothing
            if !ctx
                .all_scalar_children(node)
                .iter()
                .any(|&c| ctx.node(c).has_values())
            {
                return None;
            }
            let (found, existed) = self.get_or_create_global(ctx, node, concrete, scalar_index);
            if existed {
                return Some(found);
            }
            entity = Some(found);
        }

        let entity = match entity {
            Some(e) => e,
            None => match self.model.new_entity(concrete) {
                Ok(e) => e,
                Err(err) => {
                    self.log.write(format!("Unable to create entity: {err}"));
                    return None;
                }
            },
        };

        // scalar values
        for scalar in ctx.scalar_children(node) {
            let n = ctx.node(scalar);
            if n.values.is_empty() || n.is_derived {
                continue;
            }
            if n.kind == ContextType::ScalarList {
                for value in &n.values {
                    self.model.push_scalar(entity, &n.segment, value.clone());
                }
                continue;
            }
            let value = match scalar_index {
                None => n.values.first(),
                Some(i) => {
                    if n.values.len() == 1 {
                        n.values.first()
                    } else {
                        n.values.get(i)
                    }
                }
            };
            if let Some(v) = value {
                self.model.set_scalar(entity, &n.segment, v.clone());
            }
        }

        if only_scalar {
            return Some(entity);
        }

        // nested entities: global, local or referenced
        for child in ctx.entity_children(node) {
            let child_node = ctx.node(child);
            if child_node.is_reference {
                self.forward_references.push_back(ForwardReference::new(
                    entity,
                    ctx.class_mapping,
                    child,
                    row.clone(),
                ));
                continue;
            }
            if child_node.kind == ContextType::EntityList {
                let depth = ctx
                    .all_scalar_children(child)
                    .iter()
                    .map(|&c| ctx.node(c).values.len())
                    .max()
                    .unwrap_or(0);
                for i in 0..depth {
                    let index = if depth == 1 { None } else { Some(i) };
                    if let Some(e) = self.resolve_context(ctx, child, index, false, row) {
                        self.assign_entity(entity, e, ctx, child);
                    }
                }
                continue;
            }
            if let Some(e) = self.resolve_context(ctx, child, None, false, row) {
                self.assign_entity(entity, e, ctx, child);
            }
        }

        // parent links always wait for the full graph
        if let Some(parent) = ctx
            .node(node)
            .children
            .iter()
            .copied()
            .find(|&c| ctx.node(c).kind == ContextType::Parent)
        {
            self.forward_references.push_back(ForwardReference::new(
                entity,
                ctx.class_mapping,
                parent,
                row.clone(),
            ));
        }

        Some(entity)
    }

    /// Non-abstract type for a context node: the segment type itself, the
    /// `[type]` hint, or the mapping's declared fallback for abstract roots.
    fn concrete_type(&mut self, ctx: &ReferenceContext, node: usize) -> Option<TypeRef> {
        let schema = self.model.schema_handle();
        let declared = ctx.node(node).type_ref?;
        if !schema.is_abstract(declared) {
            return Some(declared);
        }

        if let Some(hint) = ctx.hint_text(ctx.node(node).type_hint) {
            if let Some(t) = schema.type_by_name(hint) {
                if !schema.is_abstract(t) && schema.is_kind_of(t, declared) {
                    return Some(t);
                }
            }
        }

        if node == ROOT {
            let cm = &self.mapping.class_mappings[ctx.class_mapping];
            if let Some(fallback) = &cm.fallback_concrete_type {
                if let Some(t) = schema.type_by_name(fallback) {
                    if !schema.is_abstract(t) {
                        return Some(t);
                    }
                }
            }
        }

        let cm = &self.mapping.class_mappings[ctx.class_mapping];
        self.log.write(format!(
            "It wasn't possible to find a non-abstract type for table {}, class {}",
            cm.table_name, cm.class
        ));
        None
    }

    /// Model-scoped lookup-or-create. The key is the ordered string form of
    /// every loaded identity value, deterministically ordered by segment
    /// name. Returns `(entity, existed)`.
    fn get_or_create_global(
        &mut self,
        ctx: &ReferenceContext,
        node: usize,
        t: TypeRef,
        scalar_index: Option<usize>,
    ) -> (EntityId, bool) {
        let mut parts: Vec<(String, Vec<String>)> = ctx
            .all_scalar_children(node)
            .into_iter()
            .filter(|&c| ctx.node(c).has_values())
            .map(|c| {
                let n = ctx.node(c);
                let values: Vec<String> = match scalar_index {
                    Some(i) => {
                        let pick = if n.values.len() == 1 {
                            n.values.first()
                        } else {
                            n.values.get(i)
                        };
                        pick.map(|v| vec![v.to_string()]).unwrap_or_default()
                    }
                    None => n.values.iter().map(|v| v.to_string()).collect(),
                };
                (n.segment.clone(), values)
            })
            .collect();
        parts.sort_by(|a, b| a.0.cmp(&b.0));
        let key = parts
            .into_iter()
            .flat_map(|(_, vs)| vs)
            .collect::<Vec<_>>()
            .join(", ");

        if let Some(existing) = self.global_entities.get(&t).and_then(|m| m.get(&key)) {
            return (*existing, true);
        }
        let entity = self
            .model
            .new_entity(t)
            .expect("global types are concrete by configuration");
        self.global_entities.entry(t).or_default().insert(key, entity);
        (entity, false)
    }

    /// Attach `child` to `parent` through the property a context node names,
    /// honouring inverse direction and list cardinality.
    pub(crate) fn assign_entity(
        &mut self,
        parent: EntityId,
        child: EntityId,
        ctx: &ReferenceContext,
        node: usize,
    ) {
        let n = ctx.node(node);
        let schema = self.model.schema_handle();

        if n.is_derived {
            self.log.write(format!(
                "It wasn't possible to add entity {} as a {} to parent {} because it is a derived value",
                self.model.type_name(child),
                n.segment,
                self.model.type_name(parent)
            ));
            return;
        }

        // inverse property: the remote side owns the link
        if let Some(remote) = &n.inverse_of {
            let child_type = self.model.entity_type(child);
            match schema.property(child_type, remote) {
                Some(prop) => match prop.kind {
                    PropertyKind::EntityList(_) => self.model.push_related(child, remote, parent),
                    PropertyKind::Entity(_) => self.model.set_related(child, remote, parent),
                    _ => self.log.write(format!(
                        "It wasn't possible to add entity {} as a {} to parent {}",
                        self.model.type_name(child),
                        n.segment,
                        self.model.type_name(parent)
                    )),
                },
                None => self.log.write(format!(
                    "It wasn't possible to add entity {} as a {} to parent {}",
                    self.model.type_name(child),
                    n.segment,
                    self.model.type_name(parent)
                )),
            }
            return;
        }

        if n.kind == ContextType::EntityList {
            self.model.push_related(parent, &n.segment, child);
        } else {
            self.model.set_related(parent, &n.segment, child);
        }
    }

    /// Entities already in the model that satisfy a context's loaded data.
    pub(crate) fn get_referenced_entities(
        &mut self,
        ctx: &ReferenceContext,
        node: usize,
    ) -> Vec<EntityId> {
        let schema = self.model.schema_handle();
        let Some(mut t) = ctx.node(node).type_ref else {
            return Vec::new();
        };

        // a [table]/[type] hint narrows the searched type
        let hinted = ctx
            .hint_text(ctx.node(node).table_hint)
            .map(str::to_string)
            .and_then(|name| self.table_type(&name))
            .or_else(|| {
                ctx.hint_text(ctx.node(node).type_hint)
                    .and_then(|name| schema.type_by_name(name))
            });
        if let Some(h) = hinted {
            if schema.is_kind_of(h, t) {
                t = h;
            }
        }
        let has_hints = hinted.is_some();

        let scalars = ctx.scalar_children(node);
        // identifiers without data cannot match anything
        if !has_hints && !scalars.is_empty() && !ctx.has_data(node) {
            return Vec::new();
        }
        let instances = self.model.instances_of(t, true);
        if scalars.is_empty() {
            return instances;
        }
        instances
            .into_iter()
            .filter(|&e| crate::resolve::is_valid_entity(self.model, ctx, node, e))
            .collect()
    }

    /// Stamp the 1-based source row index onto the designated derived field.
    fn add_row_number(&mut self, entity: EntityId, row: u32) {
        let Some(field) = self.mapping.row_number.clone() else {
            return;
        };
        let schema = self.model.schema_handle();
        let t = self.model.entity_type(entity);
        let Some(prop) = schema.property(t, &field) else {
            return;
        };
        if !prop.is_derived {
            return;
        }
        self.model.set_scalar(entity, &field, Value::Integer(row as i64));
    }

    /// Row number previously stamped on an entity, for diagnostics.
    pub(crate) fn row_number_of(&self, entity: EntityId) -> String {
        let Some(field) = &self.mapping.row_number else {
            return "Unknown".to_string();
        };
        match self.model.scalar(entity, field) {
            Some(v) => v.to_string(),
            None => "Unknown".to_string(),
        }
    }

    /// Load one row's raw cells into a context tree.
    pub(crate) fn load_context(&mut self, ctx: &mut ReferenceContext, row: &RowSnapshot) {
        let schema = self.model.schema_handle();
        let cm = &self.mapping.class_mappings[ctx.class_mapping];
        let env = LoadEnv {
            schema: &schema,
            class_mapping: cm,
            list_separator: &self.mapping.list_separator,
            alias_to_member: &self.alias_enum_cache,
            resolvers: &self.resolvers,
        };
        ctx.load_data(row, &env, &mut self.log);
    }

}

/// Materialize the populated cells of one physical row.
fn snapshot_row(cells: &FxHashMap<(u32, u32), CellValue>, row: u32) -> RowSnapshot {
    let mut snapshot: RowSnapshot = cells
        .iter()
        .filter(|((r, _), _)| *r == row)
        .map(|((_, col), value)| CellSnapshot {
            column: *col,
            value: value.clone(),
        })
        .collect();
    snapshot.sort_by_key(|c| c.column);
    snapshot
}
