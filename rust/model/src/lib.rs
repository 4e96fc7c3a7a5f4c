// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! # COBie-Lite Model
//!
//! Schema-described entity graph for facility-management (COBie) data.
//!
//! ## Overview
//!
//! This crate provides the two collaborators the table mapping engine
//! consumes:
//!
//! - **Schema registry**: runtime metadata - per-type property descriptors,
//!   subtype/supertype relations, abstractness, case-insensitive lookup
//! - **Instance store**: arena-allocated dynamic entities addressed by
//!   copyable handles, with slot-based attribute storage and inverse
//!   property resolution
//!
//! The COBie 2.4 schema itself is registered by [`cobie::schema`]; nothing
//! else in the workspace hard-codes entity types.
//!
//! ## Quick Start
//!
//! ```rust
//! use cobie_lite_model::{cobie, Value};
//!
//! let mut model = cobie::new_model();
//! let schema = model.schema_handle();
//! let component = schema.type_by_name("CobieComponent").unwrap();
//!
//! let c = model.new_entity(component).unwrap();
//! model.set_scalar(c, "Name", Value::String("Boiler B-01".into()));
//! assert_eq!(model.instances_of(component, false).len(), 1);
//! ```

pub mod cobie;
pub mod error;
pub mod model;
pub mod schema;
pub mod value;

pub use error::{Error, Result};
pub use model::{EntityId, Model, PropValue, Slot};
pub use schema::{PropertyDef, PropertyKind, ScalarKind, Schema, SchemaBuilder, TypeBody, TypeDef, TypeRef};
pub use value::{Value, DATE_TIME_FORMAT};
