// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Forward references.
//!
//! A forward reference is a deferred linking task queued whenever a row names
//! a relationship whose target may not exist yet - entities of other tables,
//! parent rows, cross references. It holds a handle to the already-resolved
//! owner, the raw cell data of its row, and the context node describing the
//! relationship; the queue is drained to exhaustion after all sheets load.

use crate::context::{ContextType, ReferenceContext};
use crate::resolve::{is_valid_entity, is_valid_entity_deep};
use crate::store::TableStore;
use crate::workbook::RowSnapshot;
use cobie_lite_model::{EntityId, PropValue};

/// One deferred link-resolution task.
#[derive(Debug)]
pub(crate) struct ForwardReference {
    /// Handle to the object whose relationship will be established
    pub entity: EntityId,
    /// Class mapping owning the reference context
    pub cm_index: usize,
    /// Context node describing what must be linked
    pub node: usize,
    /// Raw row data; re-loaded into the context at resolution time
    pub row: RowSnapshot,
}

impl ForwardReference {
    pub fn new(entity: EntityId, cm_index: usize, node: usize, row: RowSnapshot) -> Self {
        ForwardReference {
            entity,
            cm_index,
            node,
            row,
        }
    }
}

impl TableStore<'_> {
    /// Resolve a non-parent reference: link every existing entity matching
    /// the context's identity values; when none exists and the row carries
    /// data, create exactly one from it.
    pub(crate) fn resolve_member(&mut self, ctx: &ReferenceContext, reference: &ForwardReference) {
        let node = reference.node;
        if ctx.node(node).kind == ContextType::Parent {
            return;
        }

        let mut children = self.get_referenced_entities(ctx, node);
        if children.is_empty() && ctx.has_data(node) {
            if let Some(created) = self.resolve_context(ctx, node, None, false, &reference.row) {
                children.push(created);
            }
        }
        for child in children {
            self.assign_entity(reference.entity, child, ctx, node);
        }
    }

    /// Resolve a parent link. Zero matches is an orphan (logged, skipped);
    /// several matches link to all of them with an ambiguity warning -
    /// over-linking with a visible warning beats silent data loss.
    pub(crate) fn resolve_parent(&mut self, ctx: &ReferenceContext, reference: &ForwardReference) {
        let node = reference.node;
        if ctx.node(node).kind != ContextType::Parent {
            return;
        }
        let schema = self.model.schema_handle();
        let parent_type = ctx.node(node).type_ref.expect("parent nodes carry a type");

        // consecutive rows usually share a parent; reuse the last resolved
        // set while it still satisfies this row's values
        let cached = !self.parent_cache.is_empty()
            && self.parent_cache.iter().all(|&e| {
                schema.is_kind_of(self.model.entity_type(e), parent_type)
                    && is_valid_entity(self.model, ctx, node, e)
            });
        let parents = if cached {
            self.parent_cache.clone()
        } else {
            self.get_referenced_entities(ctx, node)
        };

        if parents.is_empty() {
            let row = self.row_number_of(reference.entity);
            self.log.write(format!(
                "Found no parent {} for row {} of {}s",
                schema.name(parent_type),
                row,
                self.model.type_name(reference.entity)
            ));
            return;
        }
        if parents.len() > 1 {
            let row = self.row_number_of(reference.entity);
            self.log.write(format!(
                "The parent {} of row {} of {}s is ambiguous. All {} {} parents will be referenced.",
                schema.name(parent_type),
                row,
                self.model.type_name(reference.entity),
                parents.len(),
                schema.name(parent_type)
            ));
        }

        let Some(destination) = ctx.destination_under(node) else {
            let cm = &self.mapping.class_mappings[ctx.class_mapping];
            self.log.write(format!(
                "There is no destination path for type {} in type {}, table {}.",
                self.model.type_name(reference.entity),
                schema.name(parent_type),
                cm.table_name
            ));
            return;
        };

        for &parent in &parents {
            self.add_to_path(ctx, node, destination, parent, reference.entity, &reference.row);
        }

        if !cached {
            self.parent_cache.clear();
            self.parent_cache.extend(parents);
        }
    }

    /// Walk from a resolved parent down the destination chain, reusing
    /// matching intermediate entities and creating missing ones, until the
    /// child is attached at the destination node.
    fn add_to_path(
        &mut self,
        ctx: &ReferenceContext,
        parent_node: usize,
        destination: usize,
        parent: EntityId,
        child: EntityId,
        row: &RowSnapshot,
    ) {
        // context nodes between the parent jump (exclusive) and destination
        let mut stack = Vec::new();
        let mut cur = Some(destination);
        while let Some(c) = cur {
            if c == parent_node {
                break;
            }
            stack.push(c);
            cur = ctx.node(c).parent;
        }

        let mut entity = parent;
        while let Some(step) = stack.pop() {
            let node = ctx.node(step);
            let Some(prop) = self
                .model
                .schema()
                .property(self.model.entity_type(entity), &node.segment)
                .cloned()
            else {
                self.log
                    .write("It wasn't possible to browse to the data entry point.");
                return;
            };
            let value = self.model.property_value(entity, &prop);

            if node.kind == ContextType::Entity {
                match value {
                    Some(PropValue::Entity(existing))
                        if is_valid_entity(self.model, ctx, step, existing) =>
                    {
                        entity = existing;
                    }
                    _ => {
                        let next = if step == destination {
                            Some(child)
                        } else {
                            self.resolve_context(ctx, step, None, true, row)
                        };
                        let Some(next) = next else { return };
                        self.assign_entity(entity, next, ctx, step);
                        entity = next;
                    }
                }
                continue;
            }

            // list-valued step
            if step == destination {
                self.assign_entity(entity, child, ctx, step);
                return;
            }
            let candidates = match value {
                Some(PropValue::EntityList(list)) => list,
                _ => Vec::new(),
            };
            match self.first_valid(ctx, step, &candidates) {
                Some(existing) => entity = existing,
                None => {
                    let Some(created) = self.resolve_context(ctx, step, None, true, row) else {
                        return;
                    };
                    self.assign_entity(entity, created, ctx, step);
                    entity = created;
                }
            }
        }
    }

    /// Pick the entity of a candidate list that satisfies the context: a
    /// single candidate wins outright, then scalar identity narrows the
    /// field, then nested entity data decides.
    fn first_valid(
        &self,
        ctx: &ReferenceContext,
        node: usize,
        candidates: &[EntityId],
    ) -> Option<EntityId> {
        match candidates.len() {
            0 => return None,
            1 => return Some(candidates[0]),
            _ => {}
        }
        if !ctx.has_data(node) {
            return None;
        }

        let narrowed: Vec<EntityId> = if ctx
            .scalar_children(node)
            .iter()
            .any(|&c| ctx.node(c).has_values())
        {
            let filtered: Vec<EntityId> = candidates
                .iter()
                .copied()
                .filter(|&e| is_valid_entity(self.model, ctx, node, e))
                .collect();
            match filtered.len() {
                0 => return None,
                1 => return Some(filtered[0]),
                _ => filtered,
            }
        } else {
            candidates.to_vec()
        };

        narrowed
            .into_iter()
            .find(|&e| is_valid_entity_deep(self.model, ctx, node, e))
    }
}
