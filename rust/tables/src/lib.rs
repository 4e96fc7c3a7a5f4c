// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! # COBie-Lite Tables
//!
//! Schema-driven bidirectional mapping between an entity graph and tabular
//! spreadsheet files, driven entirely by a declarative mapping configuration.
//!
//! ## Overview
//!
//! - **Mapping configuration**: which types map to which tables, which
//!   property paths feed which columns ([`mapping`])
//! - **Path expressions**: dotted paths with `parent.`, `().`, `\Type`,
//!   `[index]` and `[table]`/`[type]` tokens, parsed once with nom ([`path`])
//! - **Reference contexts**: the expressions of one table compiled into a
//!   reusable tree; rows only swap values in and out ([`context`])
//! - **Writer**: leaf expansion, multi-row emission, styling and sampled
//!   column sizing ([`write`])
//! - **Reader**: header re-binding, multi-row merging, global entity
//!   deduplication and forward-reference resolution ([`read`], [`forward`])
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cobie_lite_tables::cobie;
//! use std::path::Path;
//!
//! let (model, report) = cobie::import_from_table(Path::new("building.xlsx")).unwrap();
//! assert!(report.is_empty(), "{report}");
//! ```
//!
//! Data-quality problems (orphaned rows, ambiguous parents, unparsable
//! cells) never abort a run - they are returned in the operation log.
//! Configuration mismatches against the schema fail fast instead.

pub mod cobie;
pub mod context;
pub mod error;
pub mod forward;
pub mod mapping;
pub mod path;
pub mod read;
pub mod resolve;
pub mod resolvers;
pub mod store;
pub mod workbook;
pub mod write;

pub use context::{ContextType, ReferenceContext};
pub use error::{Error, Result};
pub use mapping::{
    ClassMapping, ClassScope, DataStatus, EnumMapping, FontWeight, ModelMapping, MultiRow,
    PropertyMapping, StatusRepresentation,
};
pub use path::{parse_path, PathExpr, Prefix, Segment};
pub use resolve::{ExportContext, Resolved};
pub use resolvers::{AttributeValueResolver, TypeResolver};
pub use store::{Log, TableStore};
pub use workbook::{CellSnapshot, CellValue, RowSnapshot, Workbook};
