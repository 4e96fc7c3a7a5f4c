// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Declarative mapping configuration.
//!
//! A [`ModelMapping`] describes which entity types map to which tables and
//! which property paths feed which columns. It is loaded from JSON and bound
//! to a schema once with [`ModelMapping::init`] before any row is processed.

use crate::error::{Error, Result};
use cobie_lite_model::{Schema, TypeRef};
use serde::{Deserialize, Serialize};

/// Status tag of a column or table; drives styling and the required-default
/// rule on export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum DataStatus {
    #[default]
    None,
    Header,
    Required,
    Reference,
    External,
    Optional,
    UserDefined,
}

/// Multi-row policy of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum MultiRow {
    #[default]
    None,
    IfNecessary,
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum FontWeight {
    #[default]
    Normal,
    Bold,
    Italics,
    BoldItalics,
}

/// Scope of a mapped class; `Model` scoped types are deduplicated globally
/// by their identity key during an import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassScope {
    Local,
    Model,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeMapping {
    pub class: String,
    pub scope: ClassScope,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnumAlias {
    pub enum_member: String,
    pub alias: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnumMapping {
    pub enumeration: String,
    #[serde(default)]
    pub aliases: Vec<EnumAlias>,
}

/// Visual representation registered for a [`DataStatus`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRepresentation {
    pub status: DataStatus,
    pub colour: String,
    #[serde(default)]
    pub font_weight: FontWeight,
    #[serde(default)]
    pub border: bool,
}

/// One table column.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyMapping {
    /// Header text; this is the authoritative column identity on import
    pub header: String,
    /// Column letter; assigned automatically when absent
    #[serde(default)]
    pub column: Option<String>,
    /// Candidate path expressions, tried in order; first non-null wins
    #[serde(default)]
    pub paths: Vec<String>,
    /// Written when every path yields null and the column is Required
    #[serde(default)]
    pub default_value: Option<String>,
    #[serde(default)]
    pub status: DataStatus,
    #[serde(default)]
    pub multi_row: MultiRow,
    /// Key columns get a defined name and participate in lookups
    #[serde(default)]
    pub is_key: bool,
    /// Identity columns decide whether a row continues the previous one
    #[serde(default)]
    pub is_multi_row_identity: bool,
    /// Validation source in `Table.Header` form
    #[serde(default)]
    pub look_up: Option<String>,
    #[serde(default)]
    pub hidden: bool,

    /// 1-based column index, cached from `column` by `init`
    #[serde(skip)]
    pub column_index: u32,
    /// Candidate paths parsed once at init; row processing never re-parses
    #[serde(skip)]
    pub parsed_paths: Vec<crate::path::PathExpr>,
}

impl PropertyMapping {
    pub fn required(&self) -> bool {
        self.status == DataStatus::Required
    }
}

/// One entity type to one table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassMapping {
    /// Mapped type name (resolved against the schema, case-insensitive)
    pub class: String,
    #[serde(default)]
    pub table_name: String,
    #[serde(default)]
    pub table_order: i32,
    /// Type of the parent entity for nested tables; `None` marks a root table
    #[serde(default)]
    pub parent_class: Option<String>,
    /// Property path walked from a parent entity to this table's entities
    #[serde(default)]
    pub parent_path: Option<String>,
    /// Partial tables only establish parent links for existing entities
    #[serde(default)]
    pub is_partial: bool,
    /// Concrete type used when the mapped class is abstract
    #[serde(default)]
    pub fallback_concrete_type: Option<String>,
    #[serde(default)]
    pub table_status: DataStatus,
    #[serde(default)]
    pub property_mappings: Vec<PropertyMapping>,

    #[serde(skip)]
    pub type_ref: Option<TypeRef>,
    #[serde(skip)]
    pub parent_type: Option<TypeRef>,
    /// Parent path parsed once at init
    #[serde(skip)]
    pub parsed_parent_path: Option<crate::path::PathExpr>,
    /// Indices of child mappings within the owning [`ModelMapping`]
    #[serde(skip)]
    pub children: Vec<usize>,
}

impl ClassMapping {
    /// Root tables own their entity set; nested tables derive it from a parent.
    pub fn is_root(&self) -> bool {
        self.parent_class.is_none()
    }

    /// Identity (multi-row key) column indices, 1-based.
    pub fn identity_columns(&self) -> Vec<u32> {
        self.property_mappings
            .iter()
            .filter(|p| p.is_multi_row_identity)
            .map(|p| p.column_index)
            .collect()
    }

    pub fn has_multi_row_columns(&self) -> bool {
        self.property_mappings
            .iter()
            .any(|p| p.multi_row != MultiRow::None)
    }
}

/// The whole mapping table: classes, styling, scopes and list conventions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelMapping {
    pub name: String,
    #[serde(default = "default_list_separator")]
    pub list_separator: String,
    /// Sheet that carries pick lists referenced by lookup validations
    #[serde(default)]
    pub pick_table_name: Option<String>,
    /// Name of the derived field stamped with the source row number
    #[serde(default)]
    pub row_number: Option<String>,
    #[serde(default)]
    pub scopes: Vec<ScopeMapping>,
    #[serde(default)]
    pub enumeration_mappings: Vec<EnumMapping>,
    #[serde(default)]
    pub status_representations: Vec<StatusRepresentation>,
    pub class_mappings: Vec<ClassMapping>,

    #[serde(skip)]
    initialised: bool,
}

fn default_list_separator() -> String {
    ",".to_string()
}

impl ModelMapping {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn is_initialised(&self) -> bool {
        self.initialised
    }

    /// Bind the mapping to a schema: resolve class and parent types, assign
    /// missing table names and column letters, wire child tables to their
    /// roots, and validate identity-column consistency for shared tables.
    /// Must be called once before the mapping is used.
    pub fn init(&mut self, schema: &Schema) -> Result<()> {
        // default table names for the edge case when none is supplied
        let mut unnamed = 0;
        for cm in &mut self.class_mappings {
            if cm.table_name.trim().is_empty() {
                cm.table_name = format!("{}({})", cm.class, unnamed);
                unnamed += 1;
            }
        }

        for cm in &mut self.class_mappings {
            cm.type_ref = Some(schema.require(&cm.class)?);
            cm.parent_type = match &cm.parent_class {
                Some(p) => Some(schema.require(p)?),
                None => None,
            };
            cm.parsed_parent_path = match &cm.parent_path {
                Some(p) => Some(crate::path::parse_path(p)?),
                None => None,
            };

            // assign letters to unassigned columns in declared order
            let mut next = 1u32;
            for pm in &mut cm.property_mappings {
                pm.parsed_paths = pm
                    .paths
                    .iter()
                    .map(|p| crate::path::parse_path(p))
                    .collect::<Result<Vec<_>>>()?;
                match &pm.column {
                    Some(letter) if !letter.trim().is_empty() => {
                        pm.column_index = column_letter_to_index(letter).ok_or_else(|| {
                            Error::InvalidMapping(format!(
                                "column letter '{letter}' of {} is not valid",
                                pm.header
                            ))
                        })?;
                        next = next.max(pm.column_index + 1);
                    }
                    _ => {
                        pm.column = Some(column_index_to_letter(next));
                        pm.column_index = next;
                        next += 1;
                    }
                }
            }
        }

        // wire nested tables to every root whose entities can parent them
        let relations: Vec<(usize, Vec<usize>)> = self
            .class_mappings
            .iter()
            .enumerate()
            .filter(|(_, cm)| cm.is_root())
            .map(|(i, root)| {
                let root_type = root.type_ref.expect("resolved above");
                let children = self
                    .class_mappings
                    .iter()
                    .enumerate()
                    .filter(|(j, child)| {
                        *j != i
                            && child
                                .parent_type
                                .is_some_and(|pt| schema.is_kind_of(root_type, pt))
                    })
                    .map(|(j, _)| j)
                    .collect();
                (i, children)
            })
            .collect();
        for (i, children) in relations {
            self.class_mappings[i].children = children;
        }

        // one table shared by several classes must agree on identity columns
        for (i, a) in self.class_mappings.iter().enumerate() {
            for b in self.class_mappings.iter().skip(i + 1) {
                if a.table_name.eq_ignore_ascii_case(&b.table_name)
                    && a.identity_columns() != b.identity_columns()
                {
                    return Err(Error::InvalidMapping(format!(
                        "table {} is defined in multiple class mappings with different key columns for multi-value records",
                        a.table_name
                    )));
                }
            }
        }

        self.initialised = true;
        Ok(())
    }

    /// Class mappings in declared table order.
    pub fn ordered(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.class_mappings.len()).collect();
        order.sort_by_key(|&i| self.class_mappings[i].table_order);
        order
    }

    /// Mapping index for a sheet name, case-insensitive.
    pub fn for_table(&self, table_name: &str) -> Option<usize> {
        self.class_mappings
            .iter()
            .position(|m| m.table_name.eq_ignore_ascii_case(table_name))
    }

    pub fn representation(&self, status: DataStatus) -> Option<&StatusRepresentation> {
        self.status_representations.iter().find(|r| r.status == status)
    }
}

/// `"A"` → 1, `"AB"` → 28. `None` for anything but ASCII letters.
pub fn column_letter_to_index(letters: &str) -> Option<u32> {
    let trimmed = letters.trim();
    if trimmed.is_empty() {
        return None;
    }
    let mut index = 0u32;
    for c in trimmed.chars() {
        if !c.is_ascii_alphabetic() {
            return None;
        }
        index = index * 26 + (c.to_ascii_uppercase() as u32 - 'A' as u32 + 1);
    }
    Some(index)
}

/// 1 → `"A"`, 28 → `"AB"`.
pub fn column_index_to_letter(mut index: u32) -> String {
    let mut name = String::new();
    while index > 0 {
        let remainder = ((index - 1) % 26) as u8;
        name.insert(0, (b'A' + remainder) as char);
        index = (index - 1) / 26;
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use cobie_lite_model::cobie;

    #[test]
    fn column_letters_round_trip() {
        for (letter, index) in [("A", 1), ("Z", 26), ("AA", 27), ("AB", 28), ("BA", 53)] {
            assert_eq!(column_letter_to_index(letter), Some(index));
            assert_eq!(column_index_to_letter(index), letter);
        }
        assert_eq!(column_letter_to_index("1"), None);
        assert_eq!(column_letter_to_index(""), None);
    }

    #[test]
    fn init_assigns_missing_columns_in_order() {
        let json = r#"{
            "name": "test",
            "classMappings": [{
                "class": "CobieFloor",
                "tableName": "Floor",
                "propertyMappings": [
                    {"header": "Name", "paths": ["Name"]},
                    {"header": "Elevation", "paths": ["Elevation"]}
                ]
            }]
        }"#;
        let mut mapping = ModelMapping::from_json_str(json).unwrap();
        mapping.init(&cobie::schema()).unwrap();
        let cm = &mapping.class_mappings[0];
        assert_eq!(cm.property_mappings[0].column.as_deref(), Some("A"));
        assert_eq!(cm.property_mappings[1].column.as_deref(), Some("B"));
        assert_eq!(cm.property_mappings[1].column_index, 2);
        assert!(cm.is_root());
    }

    #[test]
    fn init_rejects_unknown_class() {
        let json = r#"{
            "name": "test",
            "classMappings": [{"class": "NoSuchThing", "tableName": "X"}]
        }"#;
        let mut mapping = ModelMapping::from_json_str(json).unwrap();
        assert!(mapping.init(&cobie::schema()).is_err());
    }

    #[test]
    fn shared_table_with_different_identity_columns_is_fatal() {
        let json = r#"{
            "name": "test",
            "classMappings": [
                {"class": "CobieType", "tableName": "Shared", "propertyMappings": [
                    {"header": "Name", "column": "A", "paths": ["Name"], "isMultiRowIdentity": true}
                ]},
                {"class": "CobieComponent", "tableName": "Shared", "propertyMappings": [
                    {"header": "Name", "column": "A", "paths": ["Name"]}
                ]}
            ]
        }"#;
        let mut mapping = ModelMapping::from_json_str(json).unwrap();
        assert!(mapping.init(&cobie::schema()).is_err());
    }

    #[test]
    fn nested_tables_attach_to_matching_roots() {
        let json = r#"{
            "name": "test",
            "classMappings": [
                {"class": "CobieComponent", "tableName": "Component", "propertyMappings": [
                    {"header": "Name", "column": "A", "paths": ["Name"]}
                ]},
                {"class": "CobieAttribute", "tableName": "Attribute",
                 "parentClass": "CobieAsset", "parentPath": "Attributes",
                 "propertyMappings": [{"header": "Name", "column": "A", "paths": ["Name"]}]}
            ]
        }"#;
        let mut mapping = ModelMapping::from_json_str(json).unwrap();
        mapping.init(&cobie::schema()).unwrap();
        assert_eq!(mapping.class_mappings[0].children, vec![1]);
        assert!(!mapping.class_mappings[1].is_root());
    }
}
