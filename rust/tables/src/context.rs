// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Reference contexts.
//!
//! A [`ReferenceContext`] mirrors the path expressions of one class mapping
//! as a navigable tree, built once per mapping and reused for every row.
//! The tree shape never changes after construction; per-row processing only
//! swaps the values attached to scalar nodes.

use crate::error::{Error, Result};
use crate::mapping::{ClassMapping, ModelMapping};
use crate::path::{IndexKey, PathExpr, Prefix, Segment};
use crate::resolvers::TypeResolver;
use crate::store::Log;
use crate::workbook::{CellValue, RowSnapshot};
use chrono::{Duration, NaiveDate};
use cobie_lite_model::{PropertyKind, ScalarKind, Schema, TypeBody, TypeRef, Value};
use rustc_hash::FxHashMap;

/// Kind of a context tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextType {
    /// The mapped entity of the table row
    Root,
    /// Single scalar value
    Scalar,
    /// List of scalar values
    ScalarList,
    /// Single related entity
    Entity,
    /// Set of related entities
    EntityList,
    /// Jump to the parent entity of a nested table
    Parent,
}

/// One node of the context tree.
#[derive(Debug)]
pub struct CtxNode {
    pub kind: ContextType,
    /// Property name this node navigates; empty for root and parent nodes
    pub segment: String,
    /// Resolved type of the value at this node
    pub type_ref: Option<TypeRef>,
    /// Keyed or numbered access on an indexable property
    pub index: Option<IndexKey>,
    /// `name\Type` narrowing applied to this segment
    pub type_filter: Option<TypeRef>,
    /// Property-mapping index for leaves fed directly from a cell
    pub mapping: Option<usize>,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    /// Entities of this type live in their own table; establish the link via
    /// the forward-reference queue instead of creating them inline
    pub is_reference: bool,
    pub is_derived: bool,
    /// Remote property name when this segment is an inverse property
    pub inverse_of: Option<String>,
    /// `[table]`/`[type]` hint columns attached to this node
    pub is_hint: bool,
    pub table_hint: Option<usize>,
    pub type_hint: Option<usize>,
    /// Values loaded from the current row; the only mutable per-row state
    pub values: Vec<Value>,
}

impl CtxNode {
    fn new(kind: ContextType, segment: &str, type_ref: Option<TypeRef>, parent: Option<usize>) -> Self {
        CtxNode {
            kind,
            segment: segment.to_string(),
            type_ref,
            index: None,
            type_filter: None,
            mapping: None,
            parent,
            children: Vec::new(),
            is_reference: false,
            is_derived: false,
            inverse_of: None,
            is_hint: false,
            table_hint: None,
            type_hint: None,
            values: Vec::new(),
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self.kind, ContextType::Scalar | ContextType::ScalarList) && !self.is_hint
    }

    pub fn is_entity(&self) -> bool {
        matches!(self.kind, ContextType::Entity | ContextType::EntityList)
    }

    pub fn has_values(&self) -> bool {
        !self.values.is_empty()
    }
}

/// Per-row parsing resources handed to [`ReferenceContext::load_data`].
pub(crate) struct LoadEnv<'a> {
    pub schema: &'a Schema,
    pub class_mapping: &'a ClassMapping,
    pub list_separator: &'a str,
    /// `Enumeration.Alias` → member
    pub alias_to_member: &'a FxHashMap<String, String>,
    pub resolvers: &'a [Box<dyn TypeResolver>],
}

/// The context tree of one class mapping.
#[derive(Debug)]
pub struct ReferenceContext {
    nodes: Vec<CtxNode>,
    /// Index of the owning class mapping within the model mapping
    pub class_mapping: usize,
}

pub const ROOT: usize = 0;

impl ReferenceContext {
    /// Build the tree from the mapping's path expressions; unknown property
    /// names are configuration errors.
    pub fn build(schema: &Schema, mapping: &ModelMapping, cm_index: usize) -> Result<Self> {
        let cm = &mapping.class_mappings[cm_index];
        let root_type = cm.type_ref.expect("mapping must be initialised");
        let mut ctx = ReferenceContext {
            nodes: vec![CtxNode::new(ContextType::Root, "", Some(root_type), None)],
            class_mapping: cm_index,
        };

        // parent node plus the destination chain described by the parent path
        let parent_node = match cm.parent_type {
            Some(parent_type) => {
                let p = ctx.push(CtxNode::new(ContextType::Parent, "", Some(parent_type), Some(ROOT)));
                if let Some(expr) = &cm.parsed_parent_path {
                    ctx.walk(schema, mapping, p, expr, None)?;
                }
                Some(p)
            }
            None => None,
        };

        for (pm_index, pm) in cm.property_mappings.iter().enumerate() {
            // candidate paths are a write-time fallback chain; the context is
            // built from the primary path
            let Some(expr) = pm.parsed_paths.first() else {
                continue;
            };
            let base = match expr.prefix {
                Prefix::None => ROOT,
                Prefix::Parent => match parent_node {
                    Some(p) => p,
                    // parent paths on a root table can only be written
                    None => continue,
                },
                // context-tree hops only make sense during export
                Prefix::ContextUp(_) => continue,
            };
            ctx.walk(schema, mapping, base, expr, Some(pm_index))?;
        }

        Ok(ctx)
    }

    fn push(&mut self, node: CtxNode) -> usize {
        let id = self.nodes.len();
        if let Some(parent) = node.parent {
            self.nodes[parent].children.push(id);
        }
        self.nodes.push(node);
        id
    }

    /// Walk the segments of one expression from `base`, reusing shared
    /// prefixes and attaching the property mapping to the final node.
    fn walk(
        &mut self,
        schema: &Schema,
        mapping: &ModelMapping,
        base: usize,
        expr: &PathExpr,
        pm_index: Option<usize>,
    ) -> Result<()> {
        let mut cur = base;
        for segment in &expr.segments {
            match segment {
                Segment::TableMeta | Segment::TypeMeta => {
                    let hint = self.push({
                        let mut n = CtxNode::new(ContextType::Scalar, "", None, Some(cur));
                        n.is_hint = true;
                        n.mapping = pm_index;
                        n
                    });
                    match segment {
                        Segment::TableMeta => self.nodes[cur].table_hint = Some(hint),
                        _ => self.nodes[cur].type_hint = Some(hint),
                    }
                    return Ok(());
                }
                Segment::Property { name, type_filter, index } => {
                    let owner = self.nodes[cur].type_ref.expect("entity node has a type");
                    let prop = schema.property(owner, name).ok_or_else(|| Error::UnknownProperty {
                        type_name: schema.name(owner).to_string(),
                        property: name.clone(),
                    })?;
                    let filter = match type_filter {
                        Some(f) => Some(schema.require(f)?),
                        None => None,
                    };

                    // reuse an existing child for shared path prefixes
                    let existing = self.nodes[cur].children.iter().copied().find(|&c| {
                        let n = &self.nodes[c];
                        !n.is_hint
                            && n.segment == *name
                            && n.index == *index
                            && n.type_filter == filter
                    });
                    cur = match existing {
                        Some(c) => c,
                        None => {
                            let kind = match prop.kind {
                                PropertyKind::Scalar(_) => ContextType::Scalar,
                                PropertyKind::ScalarList(_) => ContextType::ScalarList,
                                PropertyKind::Entity(_) => ContextType::Entity,
                                PropertyKind::EntityList(_) => ContextType::EntityList,
                            };
                            let node_type = filter.unwrap_or_else(|| prop.kind.target());
                            let mut node = CtxNode::new(kind, name, Some(node_type), Some(cur));
                            node.index = index.clone();
                            node.type_filter = filter;
                            node.is_derived = prop.is_derived;
                            node.inverse_of = prop.inverse_of.clone();
                            node.is_reference = matches!(kind, ContextType::Entity | ContextType::EntityList)
                                && has_table(schema, mapping, node_type);
                            self.push(node)
                        }
                    };
                }
            }
        }

        if let Some(pm_index) = pm_index {
            if self.nodes[cur].is_scalar() {
                self.nodes[cur].mapping = Some(pm_index);
            } else if self.nodes[cur].is_entity() {
                // a column that stops at an entity reads/writes its Name
                let t = self.nodes[cur].type_ref.expect("entity node has a type");
                if let Some(prop) = schema.property(t, "Name") {
                    let name_child = self.nodes[cur]
                        .children
                        .iter()
                        .copied()
                        .find(|&c| self.nodes[c].segment == "Name" && !self.nodes[c].is_hint);
                    let child = match name_child {
                        Some(c) => c,
                        None => {
                            let mut node =
                                CtxNode::new(ContextType::Scalar, "Name", Some(prop.kind.target()), Some(cur));
                            node.is_derived = prop.is_derived;
                            self.push(node)
                        }
                    };
                    self.nodes[child].mapping = Some(pm_index);
                } else {
                    tracing::debug!(
                        segment = %self.nodes[cur].segment,
                        "column ends at an entity without a Name property; not imported"
                    );
                }
            }
        }
        Ok(())
    }

    // -- queries ------------------------------------------------------------

    #[inline]
    pub fn node(&self, id: usize) -> &CtxNode {
        &self.nodes[id]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Direct scalar children (hint columns excluded).
    pub fn scalar_children(&self, id: usize) -> Vec<usize> {
        self.nodes[id]
            .children
            .iter()
            .copied()
            .filter(|&c| self.nodes[c].is_scalar())
            .collect()
    }

    /// Direct entity children; the parent jump is not among them.
    pub fn entity_children(&self, id: usize) -> Vec<usize> {
        self.nodes[id]
            .children
            .iter()
            .copied()
            .filter(|&c| self.nodes[c].is_entity())
            .collect()
    }

    /// Every scalar node reachable below `id` without crossing a parent jump.
    pub fn all_scalar_children(&self, id: usize) -> Vec<usize> {
        let mut out = Vec::new();
        let mut stack: Vec<usize> = self.nodes[id].children.clone();
        while let Some(c) = stack.pop() {
            let n = &self.nodes[c];
            if n.kind == ContextType::Parent {
                continue;
            }
            if n.is_scalar() {
                out.push(c);
            }
            stack.extend(n.children.iter().copied());
        }
        out.sort_unstable();
        out
    }

    /// The parent jump of a nested table's context.
    pub fn parent_node(&self) -> Option<usize> {
        self.nodes[ROOT]
            .children
            .iter()
            .copied()
            .find(|&c| self.nodes[c].kind == ContextType::Parent)
    }

    /// The leaf entity node a resolved parent link attaches through.
    pub fn destination_under(&self, id: usize) -> Option<usize> {
        let mut stack: Vec<usize> = self.nodes[id].children.clone();
        while let Some(c) = stack.pop() {
            let n = &self.nodes[c];
            if n.is_entity() && n.children.is_empty() {
                return Some(c);
            }
            stack.extend(n.children.iter().copied());
        }
        None
    }

    /// Any value loaded anywhere below `id`.
    pub fn has_data(&self, id: usize) -> bool {
        self.all_scalar_children(id)
            .iter()
            .any(|&c| self.nodes[c].has_values())
    }

    /// Does the mapping declare identity columns for this table at all?
    pub fn has_key_requirements(&self, cm: &ClassMapping) -> bool {
        self.key_nodes(cm).next().is_some()
    }

    /// Did the current row populate any of them?
    pub fn has_key_data(&self, cm: &ClassMapping) -> bool {
        self.key_nodes(cm).any(|c| self.nodes[c].has_values())
    }

    fn key_nodes<'a>(&'a self, cm: &'a ClassMapping) -> impl Iterator<Item = usize> + 'a {
        self.all_scalar_children(ROOT).into_iter().filter(move |&c| {
            self.nodes[c]
                .mapping
                .is_some_and(|m| cm.property_mappings[m].is_key)
        })
    }

    /// Is this node's value a delimited list in its cell?
    pub fn is_list_context(&self, id: usize) -> bool {
        if self.nodes[id].kind == ContextType::ScalarList {
            return true;
        }
        let mut cur = self.nodes[id].parent;
        while let Some(p) = cur {
            match self.nodes[p].kind {
                ContextType::EntityList => return true,
                ContextType::Root | ContextType::Parent => return false,
                _ => cur = self.nodes[p].parent,
            }
        }
        false
    }

    /// Hint value loaded for a node, if any.
    pub fn hint_text(&self, hint: Option<usize>) -> Option<&str> {
        let id = hint?;
        self.nodes[id].values.first().and_then(|v| v.as_str())
    }

    // -- per-row data -------------------------------------------------------

    /// Load raw cell values of a row into the tree's scalar and hint nodes.
    /// This is pure value substitution: the tree shape is untouched.
    pub(crate) fn load_data(&mut self, row: &RowSnapshot, env: &LoadEnv, log: &mut Log) {
        for id in 0..self.nodes.len() {
            let Some(pm_index) = self.nodes[id].mapping else {
                continue;
            };
            let pm = &env.class_mapping.property_mappings[pm_index];
            let cell = row
                .iter()
                .find(|c| c.column == pm.column_index)
                .map(|c| c.value.clone())
                .unwrap_or(CellValue::Blank);

            let split = self.is_list_context(id);
            let node = &mut self.nodes[id];
            node.values.clear();

            if node.is_hint {
                let text = cell.text();
                if !text.trim().is_empty() {
                    node.values.push(Value::String(text));
                }
                continue;
            }
            if cell.is_blank() {
                continue;
            }

            let target = node.type_ref;
            let column = pm.column.clone().unwrap_or_default();
            if split {
                if let CellValue::Text(text) = &cell {
                    let parts: Vec<Value> = text
                        .split(env.list_separator)
                        .map(str::trim)
                        .filter(|p| !p.is_empty())
                        .filter_map(|p| {
                            parse_cell_value(&CellValue::Text(p.to_string()), target, env, log, &column)
                        })
                        .collect();
                    self.nodes[id].values = parts;
                    continue;
                }
            }
            if let Some(v) = parse_cell_value(&cell, target, env, log, &column) {
                self.nodes[id].values.push(v);
            }
        }
    }

    /// Drop all loaded values; used between independent resolutions.
    pub fn clear_data(&mut self) {
        for node in &mut self.nodes {
            node.values.clear();
        }
    }
}

/// Does any class mapping give this type (or a base of it) its own table?
fn has_table(schema: &Schema, mapping: &ModelMapping, t: TypeRef) -> bool {
    mapping.class_mappings.iter().any(|cm| {
        cm.type_ref
            .is_some_and(|mapped| mapped == t || schema.is_kind_of(t, mapped) || schema.is_kind_of(mapped, t))
    })
}

/// Coerce one cell into a typed value, resolving abstract value types
/// through the resolver chain. Failures are data-quality conditions: they
/// are logged and the cell is skipped, except for dates which fall back to
/// the documented sentinel.
pub(crate) fn parse_cell_value(
    cell: &CellValue,
    target: Option<TypeRef>,
    env: &LoadEnv,
    log: &mut Log,
    column: &str,
) -> Option<Value> {
    let Some(target) = target else {
        return Some(Value::String(cell.text()));
    };
    let schema = env.schema;

    // resolve selects to a concrete wrapper type first
    let concrete = if schema.is_abstract(target) || matches!(schema.def(target).body, TypeBody::Select) {
        match env
            .resolvers
            .iter()
            .find(|r| r.can_resolve(schema, target))
            .and_then(|r| r.resolve(schema, target, cell))
        {
            Some(t) => t,
            None => {
                log.write(format!(
                    "It wasn't possible to find a concrete value type for {} in column {}",
                    schema.name(target),
                    column
                ));
                return None;
            }
        }
    } else {
        target
    };

    let name = schema.name(concrete).to_string();
    let wrap = |v: Value| -> Value {
        // primitive pseudo-types stay bare, named wrappers keep their tag
        match name.as_str() {
            "String" | "Integer" | "Float" | "Boolean" | "DateTime" => v,
            _ => Value::typed(name.clone(), v),
        }
    };

    match &schema.def(concrete).body {
        TypeBody::Enumeration { members } => {
            let text = cell.text();
            // hyphens show up in live data but not in member names
            let candidate = text.replace('-', "_");
            let aliased = env
                .alias_to_member
                .get(&format!("{name}.{candidate}"))
                .cloned();
            let member = aliased.or_else(|| {
                members
                    .iter()
                    .find(|m| m.eq_ignore_ascii_case(&candidate))
                    .cloned()
            });
            match member {
                Some(m) => Some(Value::Enum(m)),
                None => {
                    log.write(format!("Enumeration {name} doesn't have a member {text}"));
                    None
                }
            }
        }
        TypeBody::Value { underlying } => match underlying {
            ScalarKind::String => Some(wrap(Value::String(cell.text()))),
            ScalarKind::Integer => match cell {
                CellValue::Number(n) => Some(wrap(Value::Integer(n.round() as i64))),
                CellValue::Text(t) => match t.trim().parse::<i64>() {
                    Ok(i) => Some(wrap(Value::Integer(i))),
                    Err(_) => {
                        log.write(format!(
                            "There is no suitable value for {name} in column {column}: '{t}'"
                        ));
                        None
                    }
                },
                _ => {
                    log.write(format!("There is no suitable value for {name} in column {column}"));
                    None
                }
            },
            ScalarKind::Float => match cell {
                CellValue::Number(n) => Some(wrap(Value::Float(*n))),
                CellValue::Text(t) => match t.trim().parse::<f64>() {
                    Ok(f) => Some(wrap(Value::Float(f))),
                    Err(_) => {
                        log.write(format!(
                            "There is no suitable value for {name} in column {column}: '{t}'"
                        ));
                        None
                    }
                },
                _ => {
                    log.write(format!("There is no suitable value for {name} in column {column}"));
                    None
                }
            },
            ScalarKind::Bool => match cell {
                CellValue::Bool(b) => Some(wrap(Value::Bool(*b))),
                CellValue::Number(n) => Some(wrap(Value::Bool(*n != 0.0))),
                CellValue::Text(t) => match t.trim().to_ascii_lowercase().as_str() {
                    "true" | "1" | "yes" => Some(wrap(Value::Bool(true))),
                    "false" | "0" | "no" => Some(wrap(Value::Bool(false))),
                    _ => {
                        log.write(format!("Wrong boolean format of {name} in column {column}: '{t}'"));
                        None
                    }
                },
                _ => None,
            },
            ScalarKind::DateTime => {
                let parsed = match cell {
                    CellValue::Number(serial) => from_excel_serial(*serial),
                    CellValue::Text(t) => chrono::NaiveDateTime::parse_from_str(
                        t.trim().get(..19).unwrap_or(t.trim()),
                        cobie_lite_model::DATE_TIME_FORMAT,
                    )
                    .ok(),
                    _ => None,
                };
                match parsed {
                    Some(d) => Some(wrap(Value::DateTime(d))),
                    None => {
                        log.write(format!(
                            "Unable to parse date for {name} in column {column}; using default"
                        ));
                        // sentinel default: a malformed cell never aborts an import
                        chrono::NaiveDateTime::parse_from_str(
                            "1900-12-31T23:59:59",
                            cobie_lite_model::DATE_TIME_FORMAT,
                        )
                        .ok()
                        .map(|d| wrap(Value::DateTime(d)))
                    }
                }
            }
        },
        _ => {
            log.write(format!(
                "Type {name} in column {column} is not a value type; cell skipped"
            ));
            None
        }
    }
}

/// Spreadsheet serial date: days since 1899-12-30, fraction is time of day.
fn from_excel_serial(serial: f64) -> Option<chrono::NaiveDateTime> {
    let base = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let seconds = (serial * 86_400.0).round() as i64;
    base.checked_add_signed(Duration::seconds(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::ModelMapping;
    use crate::workbook::CellSnapshot;
    use cobie_lite_model::cobie;

    fn mapping() -> ModelMapping {
        let json = r#"{
            "name": "test",
            "classMappings": [
                {"class": "CobieContact", "tableName": "Contact", "propertyMappings": [
                    {"header": "Email", "column": "A", "paths": ["Email"], "isKey": true}
                ]},
                {"class": "CobieZone", "tableName": "Zone", "propertyMappings": [
                    {"header": "Name", "column": "A", "paths": ["Name"], "isKey": true},
                    {"header": "CreatedBy", "column": "B", "paths": ["Created.CreatedBy.Email"]},
                    {"header": "CreatedOn", "column": "C", "paths": ["Created.CreatedOn"]},
                    {"header": "SpaceNames", "column": "D", "paths": ["Spaces.Name"], "multiRow": "Always"}
                ]}
            ]
        }"#;
        let mut m = ModelMapping::from_json_str(json).unwrap();
        m.init(&cobie::schema()).unwrap();
        m
    }

    #[test]
    fn shared_prefixes_collapse_into_one_node() {
        let m = mapping();
        let ctx = ReferenceContext::build(&cobie::schema(), &m, 1).unwrap();
        // root children: Name scalar, Created entity, Spaces entity list
        let entity_children = ctx.entity_children(ROOT);
        assert_eq!(entity_children.len(), 2);
        let created = entity_children
            .iter()
            .copied()
            .find(|&c| ctx.node(c).segment == "Created")
            .unwrap();
        // CreatedBy and CreatedOn both hang off the single Created node
        assert_eq!(ctx.node(created).children.len(), 2);
    }

    #[test]
    fn reference_flag_follows_table_presence() {
        let m = mapping();
        let schema = cobie::schema();
        let ctx = ReferenceContext::build(&schema, &m, 1).unwrap();
        for c in ctx.entity_children(ROOT) {
            let n = ctx.node(c);
            match n.segment.as_str() {
                // created-info and spaces have no table in this mapping
                "Created" | "Spaces" => assert!(!n.is_reference, "{}", n.segment),
                other => panic!("unexpected child {other}"),
            }
        }
        // the contact under Created does have a table
        let created = ctx
            .entity_children(ROOT)
            .into_iter()
            .find(|&c| ctx.node(c).segment == "Created")
            .unwrap();
        let created_by = ctx
            .entity_children(created)
            .into_iter()
            .find(|&c| ctx.node(c).segment == "CreatedBy")
            .unwrap();
        assert!(ctx.node(created_by).is_reference);
    }

    #[test]
    fn unknown_property_is_a_configuration_error() {
        let json = r#"{
            "name": "bad",
            "classMappings": [{"class": "CobieZone", "tableName": "Zone", "propertyMappings": [
                {"header": "X", "column": "A", "paths": ["NoSuchProperty"]}
            ]}]
        }"#;
        let mut m = ModelMapping::from_json_str(json).unwrap();
        m.init(&cobie::schema()).unwrap();
        let err = ReferenceContext::build(&cobie::schema(), &m, 0).unwrap_err();
        assert!(matches!(err, Error::UnknownProperty { .. }));
    }

    #[test]
    fn list_context_splits_cell_values() {
        let m = mapping();
        let schema = cobie::schema();
        let mut ctx = ReferenceContext::build(&schema, &m, 1).unwrap();
        let spaces_name = ctx
            .all_scalar_children(ROOT)
            .into_iter()
            .find(|&c| {
                ctx.node(c).segment == "Name"
                    && ctx.node(ctx.node(c).parent.unwrap()).segment == "Spaces"
            })
            .unwrap();
        assert!(ctx.is_list_context(spaces_name));

        let aliases = FxHashMap::default();
        let env = LoadEnv {
            schema: &schema,
            class_mapping: &m.class_mappings[1],
            list_separator: ",",
            alias_to_member: &aliases,
            resolvers: &[],
        };
        let mut log = Log::new();
        let row = vec![
            CellSnapshot { column: 1, value: CellValue::Text("Zone 1".into()) },
            CellSnapshot { column: 4, value: CellValue::Text("S1, S2, S3".into()) },
        ];
        ctx.load_data(&row, &env, &mut log);
        assert_eq!(ctx.node(spaces_name).values.len(), 3);
        assert!(ctx.has_data(ROOT));
        assert!(ctx.has_key_data(&m.class_mappings[1]));
    }
}
