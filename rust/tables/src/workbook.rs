// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Tabular container adapter.
//!
//! Wraps [umya-spreadsheet](https://docs.rs/umya-spreadsheet) behind the
//! minimal contract the mapping engine needs: typed cell access, row
//! snapshots, column width/hidden flags, memoized status styles, defined
//! names, list validations and tab colours. Package-format concerns stay on
//! this side of the boundary.

use crate::error::Result;
use crate::mapping::{DataStatus, FontWeight, StatusRepresentation};
use rustc_hash::FxHashMap;
use std::path::Path;
use umya_spreadsheet::{
    Border, DataValidation, DataValidationValues, DataValidations, SequenceOfReferences, Style,
};

/// A typed cell value; shared strings are resolved by the container.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Blank,
    Text(String),
    Number(f64),
    Bool(bool),
}

impl CellValue {
    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Blank => true,
            CellValue::Text(t) => t.trim().is_empty(),
            _ => false,
        }
    }

    /// Rendered text, as a spreadsheet user would read it.
    pub fn text(&self) -> String {
        match self {
            CellValue::Blank => String::new(),
            CellValue::Text(t) => t.clone(),
            CellValue::Number(n) => {
                // round to avoid floating point artifacts ("2500.000000000002")
                let rounded = (n * 1e8).round() / 1e8;
                if rounded.fract() == 0.0 && rounded.abs() < i64::MAX as f64 {
                    format!("{}", rounded as i64)
                } else {
                    format!("{rounded}")
                }
            }
            CellValue::Bool(b) => b.to_string(),
        }
    }
}

/// One loaded cell of a row; `column` is 1-based.
#[derive(Debug, Clone)]
pub struct CellSnapshot {
    pub column: u32,
    pub value: CellValue,
}

/// Raw cells of one physical row, in column order.
pub type RowSnapshot = Vec<CellSnapshot>;

/// Workbook wrapper owning the umya spreadsheet plus the style registry.
pub struct Workbook {
    book: umya_spreadsheet::Spreadsheet,
    styles: FxHashMap<DataStatus, Style>,
}

impl Workbook {
    /// A new workbook with no sheets.
    pub fn new() -> Self {
        let mut book = umya_spreadsheet::new_file();
        // new_file seeds a default sheet we never asked for
        let _ = book.remove_sheet_by_name("Sheet1");
        Self {
            book,
            styles: FxHashMap::default(),
        }
    }

    /// Open an existing workbook (template or import source).
    pub fn open(path: &Path) -> Result<Self> {
        let book = umya_spreadsheet::reader::xlsx::read(path)?;
        Ok(Self {
            book,
            styles: FxHashMap::default(),
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        umya_spreadsheet::writer::xlsx::write(&self.book, path)?;
        Ok(())
    }

    pub fn sheet_names(&self) -> Vec<String> {
        self.book
            .get_sheet_collection()
            .iter()
            .map(|s| s.get_name().to_string())
            .collect()
    }

    pub fn has_sheet(&self, name: &str) -> bool {
        self.book.get_sheet_by_name(name).is_some()
    }

    /// Remove a sheet when present; replacing template sheets starts clean so
    /// stale columns never survive.
    pub fn remove_sheet(&mut self, name: &str) {
        let _ = self.book.remove_sheet_by_name(name);
    }

    pub fn add_sheet(&mut self, name: &str) -> Result<()> {
        self.book
            .new_sheet(name)
            .map_err(|e| crate::error::Error::Workbook(e.to_string()))?;
        Ok(())
    }

    // -- cells --------------------------------------------------------------

    pub fn read_cell(&self, sheet: &str, column: u32, row: u32) -> CellValue {
        let Some(ws) = self.book.get_sheet_by_name(sheet) else {
            return CellValue::Blank;
        };
        match ws.get_cell((column, row)) {
            Some(cell) => convert_raw(cell.get_cell_value().get_raw_value()),
            None => CellValue::Blank,
        }
    }

    pub fn write_cell(&mut self, sheet: &str, column: u32, row: u32, value: &CellValue) {
        let Some(ws) = self.book.get_sheet_by_name_mut(sheet) else {
            return;
        };
        let cell = ws.get_cell_mut((column, row));
        match value {
            CellValue::Blank => {}
            CellValue::Text(t) => {
                cell.set_value_string(t.clone());
            }
            CellValue::Number(n) => {
                cell.set_value_number(*n);
            }
            CellValue::Bool(b) => {
                cell.set_value_bool(*b);
            }
        }
    }

    /// All non-empty cells of a sheet keyed by `(row, column)`, 1-based.
    pub fn sheet_cells(&self, sheet: &str) -> FxHashMap<(u32, u32), CellValue> {
        let mut cells = FxHashMap::default();
        let Some(ws) = self.book.get_sheet_by_name(sheet) else {
            return cells;
        };
        for cell in ws.get_cell_collection() {
            let coordinate = cell.get_coordinate();
            let row = *coordinate.get_row_num();
            let column = *coordinate.get_col_num();
            let value = convert_raw(cell.get_cell_value().get_raw_value());
            if !matches!(value, CellValue::Blank) {
                cells.insert((row, column), value);
            }
        }
        cells
    }

    /// Highest populated row index of a sheet, 0 when empty.
    pub fn last_row(&self, sheet: &str) -> u32 {
        self.book
            .get_sheet_by_name(sheet)
            .map(|ws| {
                ws.get_cell_collection()
                    .iter()
                    .map(|c| *c.get_coordinate().get_row_num())
                    .max()
                    .unwrap_or(0)
            })
            .unwrap_or(0)
    }

    // -- columns ------------------------------------------------------------

    pub fn set_column_width(&mut self, sheet: &str, column_letter: &str, width: f64) {
        if let Some(ws) = self.book.get_sheet_by_name_mut(sheet) {
            ws.get_column_dimension_mut(column_letter).set_width(width);
        }
    }

    pub fn column_width(&self, sheet: &str, column_letter: &str) -> Option<f64> {
        self.book
            .get_sheet_by_name(sheet)?
            .get_column_dimension(column_letter)
            .map(|c| *c.get_width())
    }

    pub fn set_column_hidden(&mut self, sheet: &str, column_letter: &str) {
        if let Some(ws) = self.book.get_sheet_by_name_mut(sheet) {
            ws.get_column_dimension_mut(column_letter).set_hidden(true);
        }
    }

    // -- presentation -------------------------------------------------------

    /// Register the style for a status once; identical status tags share one
    /// style record.
    pub fn register_status_style(
        &mut self,
        status: DataStatus,
        representation: Option<&StatusRepresentation>,
    ) {
        if self.styles.contains_key(&status) {
            return;
        }
        // unknown statuses get a loud fallback so they are visible in output
        let fallback = StatusRepresentation {
            status,
            colour: "#FF0000".to_string(),
            font_weight: FontWeight::Normal,
            border: false,
        };
        let repr = representation.unwrap_or(&fallback);
        let mut style = Style::default();
        style.set_background_color(to_argb(&repr.colour));
        match repr.font_weight {
            FontWeight::Normal => {}
            FontWeight::Bold => {
                style.get_font_mut().set_bold(true);
            }
            FontWeight::Italics => {
                style.get_font_mut().set_italic(true);
            }
            FontWeight::BoldItalics => {
                style.get_font_mut().set_bold(true);
                style.get_font_mut().set_italic(true);
            }
        }
        if repr.border {
            let borders = style.get_borders_mut();
            borders.get_left_mut().set_border_style(Border::BORDER_THIN);
            borders.get_right_mut().set_border_style(Border::BORDER_THIN);
            borders.get_top_mut().set_border_style(Border::BORDER_THIN);
            borders
                .get_bottom_mut()
                .set_border_style(Border::BORDER_THIN);
        }
        self.styles.insert(status, style);
    }

    pub fn has_status_style(&self, status: DataStatus) -> bool {
        self.styles.contains_key(&status)
    }

    /// Apply a previously registered status style to one cell.
    pub fn apply_status_style(&mut self, sheet: &str, column: u32, row: u32, status: DataStatus) {
        let Some(style) = self.styles.get(&status).cloned() else {
            return;
        };
        if let Some(ws) = self.book.get_sheet_by_name_mut(sheet) {
            *ws.get_style_mut((column, row)) = style;
        }
    }

    pub fn set_tab_colour(&mut self, sheet: &str, colour: &str) {
        if let Some(ws) = self.book.get_sheet_by_name_mut(sheet) {
            ws.get_tab_color_mut().set_argb(to_argb(colour));
        }
    }

    pub fn set_auto_filter(&mut self, sheet: &str, range: &str) {
        if let Some(ws) = self.book.get_sheet_by_name_mut(sheet) {
            ws.set_auto_filter(range);
        }
    }

    /// Register `Table.Header` as a workbook-visible name for a key column.
    pub fn add_defined_name(&mut self, sheet: &str, name: &str, address: &str) {
        if let Some(ws) = self.book.get_sheet_by_name_mut(sheet) {
            let _ = ws.add_defined_name(name, address);
        }
    }

    /// List validation on a whole column, fed by a named range or a
    /// `Table!$X:$X` address on another sheet.
    pub fn add_list_validation(&mut self, sheet: &str, column_letter: &str, formula: &str) {
        let Some(ws) = self.book.get_sheet_by_name_mut(sheet) else {
            return;
        };
        let mut refs = SequenceOfReferences::default();
        refs.set_sqref(format!("{column_letter}:{column_letter}"));
        let mut validation = DataValidation::default();
        validation.set_type(DataValidationValues::List);
        validation.set_allow_blank(true);
        validation.set_sequence_of_references(refs);
        validation.set_formula1(formula.to_string());

        if ws.get_data_validations().is_none() {
            ws.set_data_validations(DataValidations::default());
        }
        if let Some(validations) = ws.get_data_validations_mut() {
            validations.add_data_validation_list(validation);
        }
    }
}

impl Default for Workbook {
    fn default() -> Self {
        Self::new()
    }
}

fn convert_raw(raw: &umya_spreadsheet::CellRawValue) -> CellValue {
    use umya_spreadsheet::CellRawValue as Raw;
    match raw {
        Raw::Numeric(n) => CellValue::Number(*n),
        Raw::Bool(b) => CellValue::Bool(*b),
        Raw::String(s) => CellValue::Text(s.to_string()),
        Raw::RichText(rt) => CellValue::Text(rt.get_text().to_string()),
        Raw::Lazy(s) => {
            let txt = s.as_ref();
            if let Ok(n) = txt.parse::<f64>() {
                CellValue::Number(n)
            } else if txt.eq_ignore_ascii_case("TRUE") {
                CellValue::Bool(true)
            } else if txt.eq_ignore_ascii_case("FALSE") {
                CellValue::Bool(false)
            } else {
                CellValue::Text(txt.to_string())
            }
        }
        Raw::Error(_) | Raw::Empty => CellValue::Blank,
    }
}

/// `#RGB` / `#RRGGBB` → 8-digit ARGB as the container expects.
fn to_argb(colour: &str) -> String {
    let hex = colour.trim_start_matches('#').to_uppercase();
    match hex.len() {
        3 => {
            let mut out = String::with_capacity(8);
            out.push_str("FF");
            for c in hex.chars() {
                out.push(c);
                out.push(c);
            }
            out
        }
        6 => format!("FF{hex}"),
        _ => hex,
    }
}
