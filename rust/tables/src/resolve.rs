// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Path evaluation against a live entity graph.
//!
//! Used by the writer to extract cell values and by the reader as the
//! validity predicate that matches candidate entities against loaded row
//! data. Pure with respect to the graph - nothing here mutates.

use crate::context::ReferenceContext;
use crate::error::{Error, Result};
use crate::mapping::ModelMapping;
use crate::path::{IndexKey, PathExpr, Prefix, Segment};
use cobie_lite_model::{EntityId, Model, PropValue, Schema, TypeRef, Value};
use std::rc::Rc;

/// Result of a path evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    /// No value on this path
    None,
    /// A single scalar
    Scalar(Value),
    /// A flattened one-to-many result, stringified per element
    Many(Vec<String>),
}

impl Resolved {
    pub fn is_none(&self) -> bool {
        matches!(self, Resolved::None)
    }
}

/// Export-side ancestry of one emitted row: the entity plus the chain of
/// ancestors it was reached through.
#[derive(Debug, Clone)]
pub struct ExportContext {
    pub entity: EntityId,
    pub parent: Option<Rc<ExportContext>>,
}

impl ExportContext {
    pub fn root(entity: EntityId) -> Rc<Self> {
        Rc::new(ExportContext { entity, parent: None })
    }

    pub fn nested(entity: EntityId, parent: Rc<ExportContext>) -> Rc<Self> {
        Rc::new(ExportContext {
            entity,
            parent: Some(parent),
        })
    }

    /// The ultimate root of this chain; for top-level rows that is the row
    /// entity itself.
    pub fn root_entity(&self) -> EntityId {
        match &self.parent {
            Some(p) => p.root_entity(),
            None => self.entity,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

/// Class mapping responsible for a type: the mapped type itself or a base of
/// it, root mappings preferred. Missing mappings are configuration errors.
pub(crate) fn table_for_type(
    mapping: &ModelMapping,
    schema: &Schema,
    t: TypeRef,
) -> Result<usize> {
    let candidates: Vec<usize> = mapping
        .class_mappings
        .iter()
        .enumerate()
        .filter(|(_, cm)| {
            cm.type_ref
                .is_some_and(|mapped| mapped == t || schema.is_kind_of(t, mapped))
        })
        .map(|(i, _)| i)
        .collect();
    if candidates.is_empty() {
        return Err(Error::NoTableMapping(schema.name(t).to_string()));
    }
    Ok(candidates
        .iter()
        .copied()
        .find(|&i| mapping.class_mappings[i].is_root())
        .unwrap_or(candidates[0]))
}

/// Evaluate a parsed path against an entity. `chain` carries the export
/// ancestry for `parent.` and `().` rebasing; `None` outside leaf expansion.
pub(crate) fn resolve_path(
    model: &Model,
    mapping: &ModelMapping,
    entity: EntityId,
    expr: &PathExpr,
    chain: Option<&Rc<ExportContext>>,
) -> Result<Resolved> {
    let schema = model.schema();

    // re-base the walk according to the prefix
    let entity = match expr.prefix {
        Prefix::None => entity,
        Prefix::Parent => match chain {
            // top-level rows have no parent to jump to
            Some(c) if !c.is_root() => c.root_entity(),
            _ => return Ok(Resolved::None),
        },
        Prefix::ContextUp(levels) => {
            let mut cur = match chain {
                Some(c) => Rc::clone(c),
                None => return Ok(Resolved::None),
            };
            for _ in 0..levels {
                cur = match &cur.parent {
                    Some(p) => Rc::clone(p),
                    None => return Ok(Resolved::None),
                };
            }
            cur.entity
        }
    };

    if expr.is_pure_meta() {
        return Ok(match expr.segments[0] {
            Segment::TableMeta => {
                let cm = table_for_type(mapping, schema, model.entity_type(entity))?;
                Resolved::Scalar(Value::String(mapping.class_mappings[cm].table_name.clone()))
            }
            _ => Resolved::Scalar(Value::String(model.type_name(entity).to_string())),
        });
    }

    walk(model, schema, entity, &expr.segments)
}

fn walk(model: &Model, schema: &Schema, mut entity: EntityId, segments: &[Segment]) -> Result<Resolved> {
    for (i, segment) in segments.iter().enumerate() {
        let (name, type_filter, index) = match segment {
            Segment::Property { name, type_filter, index } => (name, type_filter, index),
            Segment::TableMeta => return Ok(Resolved::None),
            // `x.[type]` on an entity position: the runtime type name
            Segment::TypeMeta => {
                return Ok(Resolved::Scalar(Value::String(
                    model.type_name(entity).to_string(),
                )))
            }
        };

        let entity_type = model.entity_type(entity);
        let prop = schema
            .property(entity_type, name)
            .ok_or_else(|| Error::UnknownProperty {
                type_name: schema.name(entity_type).to_string(),
                property: name.clone(),
            })?;
        let filter = match type_filter {
            Some(f) => Some(schema.require(f)?),
            None => None,
        };

        let Some(value) = model.property_value(entity, prop) else {
            return Ok(Resolved::None);
        };

        match value {
            PropValue::Entity(e) => {
                if let Some(f) = filter {
                    if !schema.is_kind_of(model.entity_type(e), f) {
                        return Ok(Resolved::None);
                    }
                }
                entity = e;
            }
            PropValue::Scalar(v) => {
                // `Value.[type]` asks for the wrapper's type name instead
                if segments.get(i + 1).is_some_and(|s| matches!(s, Segment::TypeMeta)) {
                    let type_name = v
                        .type_name()
                        .map(str::to_string)
                        .unwrap_or_else(|| scalar_kind_name(&v).to_string());
                    return Ok(Resolved::Scalar(Value::String(type_name)));
                }
                // underlying primitive of a typed wrapper
                return Ok(Resolved::Scalar(v.unwrapped().clone()));
            }
            PropValue::ScalarList(values) => {
                return Ok(Resolved::Many(values.iter().map(|v| v.to_string()).collect()));
            }
            PropValue::EntityList(list) => {
                let rest = &segments[i + 1..];
                let mut out = Vec::new();
                for e in list {
                    if let Some(f) = filter {
                        if !schema.is_kind_of(model.entity_type(e), f) {
                            continue;
                        }
                    }
                    match walk(model, schema, e, rest)? {
                        Resolved::Scalar(v) => out.push(v.to_string()),
                        Resolved::Many(vs) => out.extend(vs),
                        Resolved::None => {}
                    }
                }
                if let Some(IndexKey::Number(n)) = index {
                    let n = *n as usize;
                    return Ok(match out.get(n) {
                        Some(v) => Resolved::Scalar(Value::String(v.clone())),
                        None => Resolved::None,
                    });
                }
                return Ok(Resolved::Many(out));
            }
        }
    }

    // path exhausted on an entity: use its human readable form
    Ok(fallback_value(model, schema, entity))
}

fn scalar_kind_name(v: &Value) -> &'static str {
    match v.unwrapped() {
        Value::String(_) => "String",
        Value::Integer(_) => "Integer",
        Value::Float(_) => "Float",
        Value::Bool(_) => "Boolean",
        Value::DateTime(_) => "DateTime",
        Value::Enum(_) => "Enumeration",
        Value::Typed { .. } => "Value",
    }
}

/// Last-resort representation of a bare entity: `Name`, `Value`, both joined,
/// or the type name when neither exists.
fn fallback_value(model: &Model, schema: &Schema, entity: EntityId) -> Resolved {
    let t = model.entity_type(entity);
    let has_name = schema.property(t, "Name").is_some();
    let has_value = schema.property(t, "Value").is_some();
    let name = if has_name { model.scalar(entity, "Name") } else { None };
    let value = if has_value { model.scalar(entity, "Value") } else { None };

    match (value, name) {
        (Some(v), Some(n)) => Resolved::Scalar(Value::String(format!("{v}:{n}"))),
        (None, Some(n)) => Resolved::Scalar(n.unwrapped().clone()),
        (Some(v), None) => Resolved::Scalar(v.unwrapped().clone()),
        (None, None) => {
            if has_name || has_value {
                Resolved::None
            } else {
                Resolved::Scalar(Value::String(schema.name(t).to_string()))
            }
        }
    }
}

/// Does a candidate entity's data agree with every loaded scalar of a
/// context node? The shared predicate behind parent matching, reference
/// matching and multi-row entity reuse.
pub(crate) fn is_valid_entity(
    model: &Model,
    ctx: &ReferenceContext,
    node: usize,
    entity: EntityId,
) -> bool {
    let schema = model.schema();
    let scalars = ctx.scalar_children(node);
    if scalars.is_empty() {
        return true;
    }
    // identifiers exist but carry no data: nothing can match
    if !ctx.has_data(node) {
        return false;
    }

    scalars
        .iter()
        .copied()
        .filter(|&s| ctx.node(s).has_values())
        .all(|s| {
            let n = ctx.node(s);
            let Some(prop) = schema.property(model.entity_type(entity), &n.segment) else {
                return false;
            };
            match model.property_value(entity, prop) {
                Some(PropValue::Scalar(v)) => n.values.iter().any(|val| val.matches(&v)),
                Some(PropValue::ScalarList(list)) => list
                    .iter()
                    .all(|item| n.values.iter().any(|val| val.matches(item))),
                _ => false,
            }
        })
}

/// Deep variant: scalar children on this level plus entity children checked
/// recursively; used to pick one entity out of several candidates.
pub(crate) fn is_valid_entity_deep(
    model: &Model,
    ctx: &ReferenceContext,
    node: usize,
    entity: EntityId,
) -> bool {
    if !is_valid_entity(model, ctx, node, entity) {
        return false;
    }
    let schema = model.schema();
    ctx.entity_children(node).into_iter().all(|c| {
        let n = ctx.node(c);
        if !ctx.has_data(c) {
            return true;
        }
        let Some(prop) = schema.property(model.entity_type(entity), &n.segment) else {
            return false;
        };
        match model.property_value(entity, prop) {
            Some(PropValue::Entity(e)) => is_valid_entity_deep(model, ctx, c, e),
            Some(PropValue::EntityList(list)) => list
                .iter()
                .any(|&e| is_valid_entity_deep(model, ctx, c, e)),
            _ => false,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::ModelMapping;
    use crate::path::parse_path;
    use cobie_lite_model::cobie;

    fn minimal_mapping() -> ModelMapping {
        let json = r#"{
            "name": "test",
            "classMappings": [
                {"class": "CobieComponent", "tableName": "Component"},
                {"class": "CobieType", "tableName": "Type"}
            ]
        }"#;
        let mut m = ModelMapping::from_json_str(json).unwrap();
        m.init(&cobie::schema()).unwrap();
        m
    }

    #[test]
    fn dotted_path_follows_entities() {
        let mapping = minimal_mapping();
        let mut model = cobie::new_model();
        let schema = model.schema_handle();
        let info = cobie::default_created_info(
            &mut model,
            "2019-09-04T17:20:40",
            "andy.ward@xbim.net",
            "Andy",
            "Ward",
        );
        let comp_t = schema.type_by_name("CobieComponent").unwrap();
        let c = model.new_entity(comp_t).unwrap();
        model.set_related(c, "Created", info);

        let expr = parse_path("Created.CreatedBy.Email").unwrap();
        let got = resolve_path(&model, &mapping, c, &expr, None).unwrap();
        assert_eq!(
            got,
            Resolved::Scalar(Value::String("andy.ward@xbim.net".into()))
        );

        let expr = parse_path("Created.CreatedOn").unwrap();
        let got = resolve_path(&model, &mapping, c, &expr, None).unwrap();
        match got {
            Resolved::Scalar(Value::DateTime(d)) => {
                assert_eq!(d.format("%Y-%m-%dT%H:%M:%S").to_string(), "2019-09-04T17:20:40")
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn entity_list_flattens_to_many() {
        let mapping = minimal_mapping();
        let mut model = cobie::new_model();
        let schema = model.schema_handle();
        let comp_t = schema.type_by_name("CobieComponent").unwrap();

        let a = model.new_entity(comp_t).unwrap();
        for name in ["Component B", "Component C"] {
            let child = model.new_entity(comp_t).unwrap();
            model.set_scalar(child, "Name", Value::String(name.into()));
            model.push_related(a, "AssemblyOf", child);
        }

        let expr = parse_path("AssemblyOf.Name").unwrap();
        let got = resolve_path(&model, &mapping, a, &expr, None).unwrap();
        assert_eq!(
            got,
            Resolved::Many(vec!["Component B".into(), "Component C".into()])
        );
    }

    #[test]
    fn meta_tokens_report_table_and_type() {
        let mapping = minimal_mapping();
        let mut model = cobie::new_model();
        let schema = model.schema_handle();
        let comp_t = schema.type_by_name("CobieComponent").unwrap();
        let c = model.new_entity(comp_t).unwrap();

        let chain = ExportContext::root(c);
        let leaf = ExportContext::nested(c, Rc::clone(&chain));

        let expr = parse_path("parent.[table]").unwrap();
        let got = resolve_path(&model, &mapping, c, &expr, Some(&leaf)).unwrap();
        assert_eq!(got, Resolved::Scalar(Value::String("Component".into())));

        let expr = parse_path("[type]").unwrap();
        let got = resolve_path(&model, &mapping, c, &expr, None).unwrap();
        assert_eq!(got, Resolved::Scalar(Value::String("CobieComponent".into())));
    }

    #[test]
    fn missing_property_is_fatal() {
        let mapping = minimal_mapping();
        let mut model = cobie::new_model();
        let schema = model.schema_handle();
        let comp_t = schema.type_by_name("CobieComponent").unwrap();
        let c = model.new_entity(comp_t).unwrap();

        let expr = parse_path("Nonsense.Name").unwrap();
        assert!(matches!(
            resolve_path(&model, &mapping, c, &expr, None),
            Err(Error::UnknownProperty { .. })
        ));
    }

    #[test]
    fn wrapper_type_name_via_type_token() {
        let mapping = minimal_mapping();
        let mut model = cobie::new_model();
        let schema = model.schema_handle();
        let attr_t = schema.type_by_name("CobieAttribute").unwrap();
        let a = model.new_entity(attr_t).unwrap();
        model.set_scalar(a, "Value", Value::typed("FloatValue", Value::Float(15.5)));

        let expr = parse_path("Value.[type]").unwrap();
        let got = resolve_path(&model, &mapping, a, &expr, None).unwrap();
        assert_eq!(got, Resolved::Scalar(Value::String("FloatValue".into())));

        let expr = parse_path("Value").unwrap();
        let got = resolve_path(&model, &mapping, a, &expr, None).unwrap();
        assert_eq!(got, Resolved::Scalar(Value::Float(15.5)));
    }
}
