// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the model crate.

use thiserror::Error;

/// Model and schema errors.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Unknown type: {0}")]
    UnknownType(String),

    #[error("Type {type_name} has no property {property}")]
    UnknownProperty { type_name: String, property: String },

    #[error("Cannot instantiate abstract type {0}")]
    AbstractInstantiation(String),

    #[error("Property {property} of {type_name} is not {expected}")]
    SlotKind {
        type_name: String,
        property: String,
        expected: &'static str,
    },

    #[error("Entity handle {0} is not valid in this model")]
    InvalidHandle(u32),
}

pub type Result<T> = std::result::Result<T, Error>;
