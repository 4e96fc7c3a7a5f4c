// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Resolution of abstract types while data is read into the object model.
//!
//! Add as many resolvers as necessary to a
//! [`TableStore`](crate::store::TableStore); the first one that can resolve
//! a type wins.

use crate::workbook::CellValue;
use chrono::NaiveDateTime;
use cobie_lite_model::{Schema, TypeRef, DATE_TIME_FORMAT};

/// Resolves an abstract (select) type to a concrete one.
pub trait TypeResolver {
    /// Checks if this resolver can resolve the type.
    fn can_resolve(&self, schema: &Schema, abstract_type: TypeRef) -> bool;

    /// Pick a concrete value type for a cell. The cell's typed content is
    /// usually the only evidence available.
    fn resolve(&self, schema: &Schema, abstract_type: TypeRef, cell: &CellValue)
        -> Option<TypeRef>;
}

/// Resolver for the COBie `AttributeValue` select: the concrete wrapper is
/// inferred from how the cell is typed and shaped.
#[derive(Debug, Default)]
pub struct AttributeValueResolver;

impl TypeResolver for AttributeValueResolver {
    fn can_resolve(&self, schema: &Schema, abstract_type: TypeRef) -> bool {
        schema.name(abstract_type).eq_ignore_ascii_case("AttributeValue")
    }

    fn resolve(
        &self,
        schema: &Schema,
        _abstract_type: TypeRef,
        cell: &CellValue,
    ) -> Option<TypeRef> {
        let name = match cell {
            CellValue::Number(n) => {
                // it might be integer or float
                if (n % 1.0).abs() < 1e-9 {
                    "IntegerValue"
                } else {
                    "FloatValue"
                }
            }
            CellValue::Bool(_) => "BooleanValue",
            CellValue::Text(s) => {
                // it might be string or datetime: 2009-06-15T13:45:30
                if is_date_time(s) {
                    "DateTimeValue"
                } else {
                    "StringValue"
                }
            }
            CellValue::Blank => "StringValue",
        };
        schema.type_by_name(name)
    }
}

fn is_date_time(s: &str) -> bool {
    s.get(..19)
        .is_some_and(|p| NaiveDateTime::parse_from_str(p, DATE_TIME_FORMAT).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cobie_lite_model::cobie;

    #[test]
    fn attribute_values_resolve_by_cell_shape() {
        let schema = cobie::schema();
        let select = schema.type_by_name("AttributeValue").unwrap();
        let r = AttributeValueResolver;
        assert!(r.can_resolve(&schema, select));

        let cases = [
            (CellValue::Number(15.0), "IntegerValue"),
            (CellValue::Number(15.5), "FloatValue"),
            (CellValue::Bool(true), "BooleanValue"),
            (CellValue::Text("2009-06-15T13:45:30".into()), "DateTimeValue"),
            (CellValue::Text("Martin".into()), "StringValue"),
        ];
        for (cell, expected) in cases {
            let resolved = r.resolve(&schema, select, &cell).unwrap();
            assert_eq!(schema.name(resolved), expected, "{cell:?}");
        }
    }
}
