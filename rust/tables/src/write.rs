// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Writing the entity graph out to a workbook.
//!
//! Per table: root entities → leaf expansion → row emission → multi-row
//! expansion → sampled column-width growth. Child tables are emitted inline
//! with every parent leaf so their rows stay grouped by parent.

use crate::error::{Error, Result};
use crate::mapping::{ClassMapping, DataStatus, MultiRow, PropertyMapping};
use crate::path::Segment;
use crate::resolve::{resolve_path, ExportContext, Resolved};
use crate::store::TableStore;
use crate::workbook::{CellValue, Workbook};
use cobie_lite_model::{EntityId, PropValue, Value};
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Limit of the length of the text in a cell before the row gets repeated
/// when the column policy is `IfNecessary`.
const CELL_TEXT_LIMIT: usize = 1024;

const MIN_COLUMN_WIDTH: f64 = 8.0;
const MAX_COLUMN_WIDTH: f64 = 50.0;
const COLUMN_PADDING: f64 = 1.5;

impl TableStore<'_> {
    /// Serialize the model into an XLSX file. Returns the write log.
    pub fn store(&mut self, path: &Path) -> Result<String> {
        self.store_inner(path, None)
    }

    /// Serialize into a clone of `template`; existing same-named sheets in
    /// the template are replaced cleanly, never merged.
    pub fn store_with_template(&mut self, path: &Path, template: &Path) -> Result<String> {
        self.store_inner(path, Some(template))
    }

    fn store_inner(&mut self, path: &Path, template: Option<&Path>) -> Result<String> {
        self.reset_session();

        let path = ensure_xlsx(path);
        let mut workbook = match template {
            Some(t) => Workbook::open(t)?,
            None => Workbook::new(),
        };

        self.register_styles(&mut workbook);
        self.set_up_tables(&mut workbook)?;

        let roots: Vec<usize> = self
            .mapping
            .ordered()
            .into_iter()
            .filter(|&i| self.mapping.class_mappings[i].is_root())
            .collect();
        for cm_index in roots {
            self.serialize_sheet(&mut workbook, cm_index, None)?;
        }

        workbook.save(&path)?;
        Ok(self.log.take())
    }

    /// Register one style record per data status; identical statuses share
    /// one record for the whole workbook.
    fn register_styles(&self, workbook: &mut Workbook) {
        workbook.register_status_style(DataStatus::None, self.mapping.representation(DataStatus::None));
        workbook.register_status_style(
            DataStatus::UserDefined,
            self.mapping.representation(DataStatus::UserDefined),
        );
        for representation in &self.mapping.status_representations {
            workbook.register_status_style(representation.status, Some(representation));
        }
        if !workbook.has_status_style(DataStatus::Header) {
            workbook.register_status_style(DataStatus::Header, None);
        }
    }

    /// Create the mapped sheets in declared order, replacing any same-named
    /// template sheets, and emit header rows with styling, key names,
    /// lookups and autofilters.
    fn set_up_tables(&mut self, workbook: &mut Workbook) -> Result<()> {
        let order = self.mapping.ordered();
        let mut seen: Vec<String> = Vec::new();
        for cm_index in order {
            let cm = self.mapping.class_mappings[cm_index].clone();
            if seen.iter().any(|n| n.eq_ignore_ascii_case(&cm.table_name)) {
                continue;
            }
            seen.push(cm.table_name.clone());

            if workbook.has_sheet(&cm.table_name) {
                // a clean start saves us from mis-placed columns and stale data
                workbook.remove_sheet(&cm.table_name);
            }
            workbook.add_sheet(&cm.table_name)?;
            self.row_to_entity
                .insert(cm.table_name.clone(), Default::default());

            self.set_up_header(workbook, &cm)?;

            if cm.table_status != DataStatus::None {
                if let Some(representation) = self.mapping.representation(cm.table_status) {
                    workbook.set_tab_colour(&cm.table_name, &representation.colour);
                }
            }
        }
        Ok(())
    }

    fn set_up_header(&mut self, workbook: &mut Workbook, cm: &ClassMapping) -> Result<()> {
        let sheet = &cm.table_name;
        let mut last_column = 0u32;
        for pm in &cm.property_mappings {
            let column = pm.column_index;
            last_column = last_column.max(column);
            workbook.write_cell(sheet, column, 1, &CellValue::Text(pm.header.clone()));
            workbook.apply_status_style(sheet, column, 1, DataStatus::Header);

            let letter = pm.column.clone().unwrap_or_default();
            workbook.set_column_width(sheet, &letter, 15.0);
            if pm.hidden {
                workbook.set_column_hidden(sheet, &letter);
            }

            // key columns become named ranges other sheets validate against
            if pm.is_key && pm.status == DataStatus::Required {
                let name = format!("{}.{}", sheet, pm.header);
                let address = format!("{}!${}:${}", sheet, letter, letter);
                workbook.add_defined_name(sheet, &name, &address);
            }
            if let Some(look_up) = &pm.look_up {
                self.add_lookup_validation(workbook, sheet, &letter, look_up);
            }
        }

        if last_column > 0 {
            let last_letter = crate::mapping::column_index_to_letter(last_column);
            workbook.set_auto_filter(sheet, &format!("A1:{last_letter}1"));
        }
        Ok(())
    }

    fn add_lookup_validation(
        &self,
        workbook: &mut Workbook,
        sheet: &str,
        column_letter: &str,
        look_up: &str,
    ) {
        let Some((table, column_name)) = look_up.split_once('.') else {
            return;
        };
        let is_pick_list = self
            .mapping
            .pick_table_name
            .as_deref()
            .is_some_and(|p| p.eq_ignore_ascii_case(table));
        let formula = if is_pick_list {
            // pick lists are plain named ranges on the pick sheet
            format!("={column_name}")
        } else {
            if self.mapping.for_table(table).is_none() {
                // dynamic sheet names cannot be validated
                return;
            }
            format!("={look_up}")
        };
        workbook.add_list_validation(sheet, column_letter, &formula);
    }

    /// Emit one table: every leaf becomes a row, then child tables are
    /// emitted for the leaf entity.
    fn serialize_sheet(
        &mut self,
        workbook: &mut Workbook,
        cm_index: usize,
        parent: Option<&Rc<ExportContext>>,
    ) -> Result<()> {
        let cm = self.mapping.class_mappings[cm_index].clone();
        if cm.property_mappings.is_empty() {
            return Ok(());
        }

        let leaves: Vec<Rc<ExportContext>> = match parent {
            None => {
                let t = cm.type_ref.expect("initialised mapping");
                self.model
                    .instances_of(t, true)
                    .into_iter()
                    .map(ExportContext::root)
                    .collect()
            }
            Some(base) => self.expand_leaves(base, &cm)?,
        };

        if leaves.is_empty() {
            if parent.is_none() {
                // on root tabs, mark empty tables on the tab itself
                workbook.set_tab_colour(&cm.table_name, "#AAAAAA");
            }
            return Ok(());
        }

        for leaf in leaves {
            self.serialize_entity(workbook, &cm, &leaf)?;
            for &child in &cm.children {
                self.serialize_sheet(workbook, child, Some(&leaf))?;
            }
        }
        Ok(())
    }

    /// Leaves of a nested table: every (entity, ancestor-chain) combination
    /// reached by walking the parent path from the parent entity. An entity
    /// reachable through several ancestors yields one leaf per ancestor.
    fn expand_leaves(
        &self,
        base: &Rc<ExportContext>,
        cm: &ClassMapping,
    ) -> Result<Vec<Rc<ExportContext>>> {
        let Some(expr) = &cm.parsed_parent_path else {
            return Ok(Vec::new());
        };
        let mut leaves = Vec::new();
        self.expand_segments(base, &expr.segments, &mut leaves)?;
        Ok(leaves)
    }

    fn expand_segments(
        &self,
        chain: &Rc<ExportContext>,
        segments: &[Segment],
        out: &mut Vec<Rc<ExportContext>>,
    ) -> Result<()> {
        let Some(segment) = segments.first() else {
            out.push(Rc::clone(chain));
            return Ok(());
        };
        let Segment::Property { name, type_filter, .. } = segment else {
            return Ok(());
        };
        let schema = self.model.schema();
        let entity_type = self.model.entity_type(chain.entity);
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

        match self.model.property_value(chain.entity, prop) {
            Some(PropValue::Entity(e)) => {
                if filter.map_or(true, |f| schema.is_kind_of(self.model.entity_type(e), f)) {
                    let next = ExportContext::nested(e, Rc::clone(chain));
                    self.expand_segments(&next, &segments[1..], out)?;
                }
            }
            Some(PropValue::EntityList(list)) => {
                for e in list {
                    if filter.map_or(true, |f| schema.is_kind_of(self.model.entity_type(e), f)) {
                        let next = ExportContext::nested(e, Rc::clone(chain));
                        self.expand_segments(&next, &segments[1..], out)?;
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Emit one leaf as a spreadsheet row, expanding multi-row columns into
    /// cloned rows below it.
    fn serialize_entity(
        &mut self,
        workbook: &mut Workbook,
        cm: &ClassMapping,
        leaf: &Rc<ExportContext>,
    ) -> Result<()> {
        let sheet = cm.table_name.clone();
        let row = self.next_row(&sheet);

        // the assembly-or-component union cannot be disambiguated later, so
        // trace those rows to the ancestor instead of the leaf
        let union_row = cm.class.to_uppercase().ends_with("TYPEORCOMPONENT") && !leaf.is_root();
        let trace = if union_row { leaf.root_entity() } else { leaf.entity };
        self.record_row(&sheet, row, trace);

        let mut cells: Vec<(u32, CellValue, DataStatus)> = Vec::new();
        let mut multi: Option<(u32, Vec<String>)> = None;

        for pm in &cm.property_mappings {
            // candidate paths are tried strictly in declared order
            let mut value = Resolved::None;
            for expr in &pm.parsed_paths {
                value = resolve_path(self.model, &self.mapping, leaf.entity, expr, Some(leaf))?;
                if !value.is_none() {
                    break;
                }
            }
            if value.is_none() && pm.required() {
                // required columns are never left blank
                let text = pm.default_value.clone().unwrap_or_else(|| "n/a".to_string());
                value = Resolved::Scalar(Value::String(text));
            }

            match value {
                Resolved::None => {}
                Resolved::Scalar(v) => {
                    let cell = self.cell_from_value(&v, pm)?;
                    cells.push((pm.column_index, cell, pm.status));
                }
                Resolved::Many(values) => {
                    if self.is_multi_row(&values, pm) {
                        let first = values.first().cloned().unwrap_or_default();
                        cells.push((pm.column_index, CellValue::Text(first), pm.status));
                        multi = Some((pm.column_index, values[1..].to_vec()));
                    } else {
                        let joined = values.join(&self.mapping.list_separator);
                        if !joined.is_empty() {
                            cells.push((pm.column_index, CellValue::Text(joined), pm.status));
                        }
                    }
                }
            }
        }

        self.write_row(workbook, &sheet, row, &cells);

        // adjust widths for the initial rows, then sample every 100th
        if row <= 8 || row % 100 == 0 {
            self.adjust_column_widths(workbook, cm, &cells, row <= 2);
        }

        // repeated rows for the remaining multi values
        if let Some((multi_column, values)) = multi {
            for value in values {
                let copy_row = self.next_row(&sheet);
                let mut copy = cells.clone();
                for cell in &mut copy {
                    if cell.0 == multi_column {
                        cell.1 = CellValue::Text(value.clone());
                    }
                }
                self.write_row(workbook, &sheet, copy_row, &copy);
                self.record_row(&sheet, copy_row, leaf.entity);
            }
        }
        Ok(())
    }

    fn write_row(
        &mut self,
        workbook: &mut Workbook,
        sheet: &str,
        row: u32,
        cells: &[(u32, CellValue, DataStatus)],
    ) {
        for (column, value, status) in cells {
            workbook.write_cell(sheet, *column, row, value);
            if *status != DataStatus::None {
                workbook.apply_status_style(sheet, *column, row, *status);
            }
        }
    }

    fn record_row(&mut self, sheet: &str, row: u32, entity: EntityId) {
        self.row_to_entity
            .entry(sheet.to_string())
            .or_default()
            .insert(row, entity);
    }

    fn next_row(&mut self, sheet: &str) -> u32 {
        let entry = self.row_num_cache.entry(sheet.to_string()).or_insert(1);
        *entry += 1;
        *entry
    }

    fn is_multi_row(&self, values: &[String], pm: &PropertyMapping) -> bool {
        match pm.multi_row {
            MultiRow::None => false,
            MultiRow::Always => values.len() > 1,
            MultiRow::IfNecessary => {
                let joined = values.join(&self.mapping.list_separator);
                joined.len() > CELL_TEXT_LIMIT
            }
        }
    }

    /// Convert a resolved scalar into a typed cell. Enumerations are written
    /// through their configured alias.
    fn cell_from_value(&self, value: &Value, pm: &PropertyMapping) -> Result<CellValue> {
        Ok(match value {
            Value::String(s) => CellValue::Text(s.clone()),
            Value::Integer(i) => CellValue::Number(*i as f64),
            Value::Float(f) => CellValue::Number(*f),
            Value::Bool(b) => CellValue::Bool(*b),
            Value::DateTime(d) => {
                CellValue::Text(d.format(cobie_lite_model::DATE_TIME_FORMAT).to_string())
            }
            Value::Enum(member) => CellValue::Text(
                self.alias_for_member(member)
                    .unwrap_or(member.as_str())
                    .to_string(),
            ),
            Value::Typed { type_name, .. } => {
                return Err(Error::UnsupportedValue {
                    type_name: type_name.clone(),
                    column: pm.column.clone().unwrap_or_default(),
                })
            }
        })
    }

    /// Width grows with the widest sampled cell, clamped, and never shrinks
    /// past the initial rows.
    fn adjust_column_widths(
        &mut self,
        workbook: &mut Workbook,
        cm: &ClassMapping,
        cells: &[(u32, CellValue, DataStatus)],
        initial: bool,
    ) {
        for pm in &cm.property_mappings {
            let Some((_, cell, _)) = cells.iter().find(|(c, _, _)| *c == pm.column_index) else {
                continue;
            };
            let width = cell.text().len() as f64;
            let optimal = (width + COLUMN_PADDING).clamp(MIN_COLUMN_WIDTH, MAX_COLUMN_WIDTH);
            let key = (cm.table_name.clone(), pm.column_index);
            let current = self.column_widths.get(&key).copied();
            if initial || current.map_or(true, |w| optimal > w) {
                self.column_widths.insert(key, optimal);
                if let Some(letter) = &pm.column {
                    workbook.set_column_width(&cm.table_name, letter, optimal);
                }
            }
        }
    }
}

/// XLSX is the spreadsheet representation capable of storing all the data;
/// anything else gets the extension appended.
fn ensure_xlsx(path: &Path) -> PathBuf {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("xlsx") => path.to_path_buf(),
        _ => {
            let mut p = path.as_os_str().to_owned();
            p.push(".xlsx");
            PathBuf::from(p)
        }
    }
}
