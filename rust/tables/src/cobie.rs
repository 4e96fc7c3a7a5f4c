// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! COBie 2.4 (UK) convenience layer: the embedded default mapping plus
//! one-call import/export over a COBie model.

use crate::error::Result;
use crate::mapping::ModelMapping;
use crate::resolvers::AttributeValueResolver;
use crate::store::TableStore;
use cobie_lite_model::{cobie, Model};
use std::path::Path;

/// The default COBie 2.4 UK mapping table.
pub fn cobie_mapping() -> Result<ModelMapping> {
    ModelMapping::from_json_str(include_str!("../mappings/cobie24uk.json"))
}

/// Import a COBie workbook into a fresh model. Returns the model and the
/// read log of every skipped, ambiguous or orphaned condition.
pub fn import_from_table(path: &Path) -> Result<(Model, String)> {
    let mut model = cobie::new_model();
    let report = import_into(&mut model, path)?;
    Ok((model, report))
}

/// Import a COBie workbook into an existing model.
pub fn import_into(model: &mut Model, path: &Path) -> Result<String> {
    let mapping = cobie_mapping()?;
    let mut store = TableStore::new(model, mapping)?;
    store.add_resolver(Box::new(AttributeValueResolver));
    store.load_from(path)
}

/// Export a model to a COBie workbook. Returns the write log.
pub fn export_to_table(model: &mut Model, path: &Path) -> Result<String> {
    let mapping = cobie_mapping()?;
    let mut store = TableStore::new(model, mapping)?;
    store.add_resolver(Box::new(AttributeValueResolver));
    store.store(path)
}

/// Export through a template workbook whose same-named sheets are replaced.
pub fn export_to_table_with_template(
    model: &mut Model,
    path: &Path,
    template: &Path,
) -> Result<String> {
    let mapping = cobie_mapping()?;
    let mut store = TableStore::new(model, mapping)?;
    store.add_resolver(Box::new(AttributeValueResolver));
    store.store_with_template(path, template)
}
