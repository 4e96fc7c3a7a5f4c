// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the table mapping engine.
//!
//! Only structural and configuration problems surface as errors - the static
//! mapping disagreeing with the schema cannot be fixed at runtime. Data
//! quality conditions (orphans, ambiguity, unparsable cells) are reported in
//! the operation log instead and never abort a run.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Unknown type in mapping configuration: {0}")]
    UnknownType(String),

    #[error("It wasn't possible to find property {property} in the object of type {type_name}")]
    UnknownProperty { type_name: String, property: String },

    #[error("No table mapping defined for {0}")]
    NoTableMapping(String),

    #[error("Invalid path expression '{path}': {reason}")]
    PathSyntax { path: String, reason: String },

    #[error("Invalid mapping configuration: {0}")]
    InvalidMapping(String),

    #[error("Only base types are supported, cannot write {type_name} to column {column}")]
    UnsupportedValue { type_name: String, column: String },

    #[error("Model error: {0}")]
    Model(#[from] cobie_lite_model::Error),

    #[error("Workbook error: {0}")]
    Workbook(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Mapping configuration is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<umya_spreadsheet::XlsxError> for Error {
    fn from(e: umya_spreadsheet::XlsxError) -> Self {
        Error::Workbook(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
