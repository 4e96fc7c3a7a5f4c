// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Export → import round trips over the default COBie mapping.

use chrono::NaiveDateTime;
use cobie_lite_model::{cobie, EntityId, Model, Value, DATE_TIME_FORMAT};
use cobie_lite_tables::cobie as tables;
use std::path::PathBuf;

fn temp_file(name: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join(name);
    (dir, path)
}

fn date(s: &str) -> Value {
    Value::typed(
        "DateTimeValue",
        Value::DateTime(NaiveDateTime::parse_from_str(s, DATE_TIME_FORMAT).expect("test date")),
    )
}

fn new_entity(model: &mut Model, type_name: &str) -> EntityId {
    let t = model.schema_handle().type_by_name(type_name).expect(type_name);
    model.new_entity(t).expect("concrete type")
}

fn set_str(model: &mut Model, e: EntityId, prop: &str, value: &str) {
    model.set_scalar(e, prop, Value::String(value.to_string()));
}

/// Stamp the shared created-info onto every entity that carries provenance,
/// the way a modelling session would before an export.
fn stamp_created(model: &mut Model, info: EntityId) {
    let schema = model.schema_handle();
    let ids: Vec<EntityId> = model.iter().collect();
    for id in ids {
        if id == info {
            continue;
        }
        let t = model.entity_type(id);
        if schema.property(t, "Created").is_some() && !model.has_slot(id, "Created") {
            model.set_related(id, "Created", info);
        }
    }
}

fn add_category(model: &mut Model, e: EntityId, value: &str) {
    let cat = new_entity(model, "CobieCategory");
    set_str(model, cat, "Value", value);
    model.push_related(e, "Categories", cat);
}

fn find_by_name(model: &Model, type_name: &str, name: &str) -> Option<EntityId> {
    let t = model.schema_handle().type_by_name(type_name)?;
    model
        .instances_of(t, true)
        .into_iter()
        .find(|&e| model.scalar(e, "Name").and_then(|v| v.as_str().map(str::to_string)) == Some(name.to_string()))
}

/// A small but complete facility: site, units, floors, spaces, zone, type,
/// components, system, attributes and a document.
fn sample_model() -> Model {
    let mut model = cobie::new_model();
    let info = cobie::default_created_info(
        &mut model,
        "2016-03-01T10:30:00",
        "martin.cerny@northumbria.ac.uk",
        "Martin",
        "Cerny",
    );

    let site = new_entity(&mut model, "CobieSite");
    set_str(&mut model, site, "Name", "Spectacular site");
    set_str(&mut model, site, "Description", "The best site you can imagine");
    set_str(&mut model, site, "ExternalId", "156");

    let facility = new_entity(&mut model, "CobieFacility");
    set_str(&mut model, facility, "Name", "Superb Facility");
    set_str(&mut model, facility, "Description", "Facility under test");
    set_str(&mut model, facility, "AreaMeasurement", "m2");
    model.set_related(facility, "Site", site);
    add_category(&mut model, facility, "Ss_25 : Office");

    for (prop, unit_type, value) in [
        ("LinearUnits", "CobieLinearUnit", "millimeters"),
        ("AreaUnits", "CobieAreaUnit", "square meters"),
        ("VolumeUnits", "CobieVolumeUnit", "cubic meters"),
        ("CurrencyUnit", "CobieCurrencyUnit", "GBP"),
    ] {
        let unit = new_entity(&mut model, unit_type);
        set_str(&mut model, unit, "Value", value);
        model.set_related(facility, prop, unit);
    }

    let floor = new_entity(&mut model, "CobieFloor");
    set_str(&mut model, floor, "Name", "Ground Floor");
    model.set_scalar(floor, "Elevation", Value::Float(0.0));
    model.set_scalar(floor, "Height", Value::Float(3200.5));
    add_category(&mut model, floor, "SL_20_15 : Floors");

    let mut spaces = Vec::new();
    for name in ["1A Office", "1B Meeting Room", "1C Kitchen"] {
        let space = new_entity(&mut model, "CobieSpace");
        set_str(&mut model, space, "Name", name);
        set_str(&mut model, space, "Description", name);
        model.set_related(space, "Floor", floor);
        model.set_scalar(space, "GrossArea", Value::Float(42.7));
        add_category(&mut model, space, "SL_45 : Rooms");
        spaces.push(space);
    }

    let zone = new_entity(&mut model, "CobieZone");
    set_str(&mut model, zone, "Name", "Zone West");
    add_category(&mut model, zone, "Circulation");
    for &s in &spaces {
        model.push_related(zone, "Spaces", s);
    }

    let boiler_type = new_entity(&mut model, "CobieType");
    set_str(&mut model, boiler_type, "Name", "Boiler");
    set_str(
        &mut model,
        boiler_type,
        "Description",
        "Very performant boiler which doesn't use almost any energy",
    );
    set_str(&mut model, boiler_type, "WarrantyDescription", "Warranty information for a boiler");
    model.set_scalar(boiler_type, "WarrantyDurationLabor", Value::Integer(45));
    model.set_scalar(boiler_type, "WarrantyDurationParts", Value::Integer(78));
    model.set_scalar(boiler_type, "ExpectedLife", Value::Integer(20));
    model.set_scalar(boiler_type, "ReplacementCost", Value::Float(42.5));
    model.set_scalar(boiler_type, "AssetType", Value::Enum("Fixed".to_string()));
    add_category(&mut model, boiler_type, "Pr_70_65 : Heating");
    let duration_unit = new_entity(&mut model, "CobieDurationUnit");
    set_str(&mut model, duration_unit, "Value", "Years");
    model.set_related(boiler_type, "DurationUnit", duration_unit);

    let mut components = Vec::new();
    for (name, serial) in [("Boiler B-01", "S-1001"), ("Pump P-01", "S-1002"), ("Pump P-02", "S-1003")] {
        let c = new_entity(&mut model, "CobieComponent");
        set_str(&mut model, c, "Name", name);
        set_str(&mut model, c, "Description", name);
        set_str(&mut model, c, "SerialNumber", serial);
        model.set_scalar(c, "InstallationDate", date("2015-11-20T08:00:00"));
        model.set_related(c, "Type", boiler_type);
        model.push_related(c, "Spaces", spaces[0]);
        components.push(c);
    }

    let system = new_entity(&mut model, "CobieSystem");
    set_str(&mut model, system, "Name", "Heating System");
    add_category(&mut model, system, "Ss_60_40 : Heating");
    for &c in &components {
        model.push_related(system, "Components", c);
    }

    let attribute = new_entity(&mut model, "CobieAttribute");
    set_str(&mut model, attribute, "Name", "Voltage");
    set_str(&mut model, attribute, "Unit", "V");
    model.set_scalar(attribute, "Value", Value::typed("IntegerValue", Value::Integer(230)));
    model.push_related(facility, "Attributes", attribute);

    let document = new_entity(&mut model, "CobieDocument");
    set_str(&mut model, document, "Name", "O&M Manual");
    set_str(&mut model, document, "Directory", "docs");
    set_str(&mut model, document, "File", "om-manual.pdf");
    model.push_related(components[0], "Documents", document);

    stamp_created(&mut model, info);
    model
}

#[test]
fn round_trip_preserves_scalars() {
    let (_dir, path) = temp_file("roundtrip.xlsx");
    let mut source = sample_model();
    let write_report = tables::export_to_table(&mut source, &path).expect("export");
    assert!(write_report.is_empty(), "{write_report}");

    let (loaded, read_report) = tables::import_from_table(&path).expect("import");
    assert!(read_report.is_empty(), "{read_report}");

    let facility = find_by_name(&loaded, "CobieFacility", "Superb Facility").expect("facility");
    assert_eq!(
        loaded.scalar(facility, "AreaMeasurement").unwrap().as_str(),
        Some("m2")
    );
    let site = loaded.related(facility, "Site").expect("site restored");
    assert_eq!(
        loaded.scalar(site, "Description").unwrap().as_str(),
        Some("The best site you can imagine")
    );
    let linear = loaded.related(facility, "LinearUnits").expect("linear units");
    assert_eq!(loaded.scalar(linear, "Value").unwrap().as_str(), Some("millimeters"));

    let floor = find_by_name(&loaded, "CobieFloor", "Ground Floor").expect("floor");
    assert!((loaded.scalar(floor, "Height").unwrap().as_f64().unwrap() - 3200.5).abs() < 1e-5);

    // spaces found their floor by name
    let space = find_by_name(&loaded, "CobieSpace", "1B Meeting Room").expect("space");
    assert_eq!(loaded.related(space, "Floor"), Some(floor));
    assert!((loaded.scalar(space, "GrossArea").unwrap().as_f64().unwrap() - 42.7).abs() < 1e-5);

    let boiler = find_by_name(&loaded, "CobieType", "Boiler").expect("type");
    assert_eq!(loaded.scalar(boiler, "WarrantyDurationParts").unwrap().as_i64(), Some(78));
    assert_eq!(loaded.scalar(boiler, "WarrantyDurationLabor").unwrap().as_i64(), Some(45));
    assert_eq!(loaded.scalar(boiler, "ExpectedLife").unwrap().as_i64(), Some(20));
    assert_eq!(
        loaded.scalar(boiler, "AssetType").unwrap().as_str(),
        Some("Fixed")
    );
    let unit = loaded.related(boiler, "DurationUnit").expect("duration unit");
    assert_eq!(loaded.scalar(unit, "Value").unwrap().as_str(), Some("Years"));

    // components link back to their type through the reference column
    let pump = find_by_name(&loaded, "CobieComponent", "Pump P-01").expect("component");
    assert_eq!(loaded.related(pump, "Type"), Some(boiler));
    assert_eq!(
        loaded.scalar(pump, "InstallationDate").unwrap().to_string(),
        "2015-11-20T08:00:00"
    );

    // provenance survived: created-by email resolves on every asset
    let info = loaded.related(boiler, "Created").expect("created info");
    let author = loaded.related(info, "CreatedBy").expect("created by");
    assert_eq!(
        loaded.scalar(author, "Email").unwrap().as_str(),
        Some("martin.cerny@northumbria.ac.uk")
    );
}

#[test]
fn multi_row_columns_merge_back_to_one_entity() {
    let (_dir, path) = temp_file("multirow.xlsx");
    let mut source = sample_model();
    tables::export_to_table(&mut source, &path).expect("export");

    // three spaces expand the zone into three physical rows
    let workbook = cobie_lite_tables::Workbook::open(&path).expect("reopen");
    assert_eq!(workbook.last_row("Zone"), 4);

    let (loaded, report) = tables::import_from_table(&path).expect("import");
    assert!(report.is_empty(), "{report}");

    let zone_t = loaded.schema_handle().type_by_name("CobieZone").unwrap();
    let zones = loaded.instances_of(zone_t, false);
    assert_eq!(zones.len(), 1, "continuation rows must not create zones");
    let spaces = loaded.related_list(zones[0], "Spaces").expect("spaces");
    assert_eq!(spaces.len(), 3);

    // same for the system emitted with one component per row
    let system = find_by_name(&loaded, "CobieSystem", "Heating System").expect("system");
    assert_eq!(loaded.related_list(system, "Components").unwrap().len(), 3);
}

#[test]
fn global_entities_are_deduplicated_on_import() {
    let (_dir, path) = temp_file("globals.xlsx");
    let mut source = sample_model();
    tables::export_to_table(&mut source, &path).expect("export");

    let (loaded, _report) = tables::import_from_table(&path).expect("import");
    let schema = loaded.schema_handle();

    // one shared created-info row despite appearing on every sheet
    let info_t = schema.type_by_name("CobieCreatedInfo").unwrap();
    assert_eq!(loaded.instances_of(info_t, false).len(), 1);

    // every occurrence of the same category text is one instance
    let cat_t = schema.type_by_name("CobieCategory").unwrap();
    let mut values: Vec<String> = loaded
        .instances_of(cat_t, false)
        .into_iter()
        .filter_map(|c| loaded.scalar(c, "Value").map(|v| v.to_string()))
        .collect();
    let total = values.len();
    values.sort();
    values.dedup();
    assert_eq!(values.len(), total, "duplicate category instances");

    // and both spaces' floors are reference-equal
    let a = find_by_name(&loaded, "CobieSpace", "1A Office").unwrap();
    let b = find_by_name(&loaded, "CobieSpace", "1C Kitchen").unwrap();
    assert_eq!(loaded.related(a, "Floor"), loaded.related(b, "Floor"));
}

#[test]
fn assembly_round_trip_links_components() {
    let (_dir, path) = temp_file("assembly.xlsx");
    let mut model = cobie::new_model();
    let info = cobie::default_created_info(
        &mut model,
        "2016-03-01T10:30:00",
        "martin.cerny@northumbria.ac.uk",
        "Martin",
        "Cerny",
    );

    let a = new_entity(&mut model, "CobieComponent");
    set_str(&mut model, a, "Name", "Component A");
    set_str(&mut model, a, "Description", "assembly parent");
    let b = new_entity(&mut model, "CobieComponent");
    set_str(&mut model, b, "Name", "Component B");
    set_str(&mut model, b, "Description", "assembly child");
    model.push_related(a, "AssemblyOf", b);
    stamp_created(&mut model, info);

    let report = tables::export_to_table(&mut model, &path).expect("export");
    assert!(report.is_empty(), "{report}");

    let (loaded, report) = tables::import_from_table(&path).expect("import");
    assert!(report.is_empty(), "{report}");

    let a = find_by_name(&loaded, "CobieComponent", "Component A").expect("A");
    let b = find_by_name(&loaded, "CobieComponent", "Component B").expect("B");
    let assembly = loaded.related_list(a, "AssemblyOf").expect("assembly links");
    assert!(assembly.contains(&b));
}

#[test]
fn attribute_values_keep_their_concrete_type() {
    let (_dir, path) = temp_file("attributes.xlsx");
    let mut model = cobie::new_model();
    let info = cobie::default_created_info(
        &mut model,
        "2016-03-01T10:30:00",
        "martin.cerny@northumbria.ac.uk",
        "Martin",
        "Cerny",
    );

    let facility = new_entity(&mut model, "CobieFacility");
    set_str(&mut model, facility, "Name", "Typed Facility");
    set_str(&mut model, facility, "AreaMeasurement", "m2");

    let cases = [
        ("String attribute", Value::typed("StringValue", Value::String("Martin".into()))),
        ("Boolean attribute", Value::typed("BooleanValue", Value::Bool(true))),
        ("Float attribute", Value::typed("FloatValue", Value::Float(15.5))),
        ("Integer attribute", Value::typed("IntegerValue", Value::Integer(15))),
        (
            "Date attribute",
            date("2009-06-15T13:45:30"),
        ),
    ];
    for (name, value) in &cases {
        let attr = new_entity(&mut model, "CobieAttribute");
        set_str(&mut model, attr, "Name", name);
        set_str(&mut model, attr, "Description", "Perfect description");
        model.set_scalar(attr, "Value", value.clone());
        model.push_related(facility, "Attributes", attr);
    }
    stamp_created(&mut model, info);

    tables::export_to_table(&mut model, &path).expect("export");
    let (loaded, report) = tables::import_from_table(&path).expect("import");
    assert!(report.is_empty(), "{report}");

    let facility = find_by_name(&loaded, "CobieFacility", "Typed Facility").expect("facility");
    let attributes = loaded.related_list(facility, "Attributes").expect("attributes");
    assert_eq!(attributes.len(), 5);

    let value_of = |name: &str| -> Value {
        let attr = attributes
            .iter()
            .copied()
            .find(|&a| loaded.scalar(a, "Name").and_then(|v| v.as_str().map(str::to_string)) == Some(name.to_string()))
            .unwrap_or_else(|| panic!("attribute {name}"));
        loaded.scalar(attr, "Value").expect("value").clone()
    };

    let string = value_of("String attribute");
    assert_eq!(string.type_name(), Some("StringValue"));
    assert_eq!(string.as_str(), Some("Martin"));

    let boolean = value_of("Boolean attribute");
    assert_eq!(boolean.type_name(), Some("BooleanValue"));
    assert_eq!(boolean.as_bool(), Some(true));

    let float = value_of("Float attribute");
    assert_eq!(float.type_name(), Some("FloatValue"));
    assert!((float.as_f64().unwrap() - 15.5).abs() < 1e-5);

    let integer = value_of("Integer attribute");
    assert_eq!(integer.type_name(), Some("IntegerValue"));
    assert_eq!(integer.as_i64(), Some(15));

    let date_attr = value_of("Date attribute");
    assert_eq!(date_attr.type_name(), Some("DateTimeValue"));
    assert_eq!(date_attr.to_string(), "2009-06-15T13:45:30");
}

#[test]
fn row_numbers_are_stamped_on_loaded_entities() {
    let (_dir, path) = temp_file("rownumbers.xlsx");
    let mut source = sample_model();
    tables::export_to_table(&mut source, &path).expect("export");
    let (loaded, _report) = tables::import_from_table(&path).expect("import");

    for type_name in [
        "CobieFacility",
        "CobieFloor",
        "CobieSpace",
        "CobieZone",
        "CobieType",
        "CobieComponent",
        "CobieSystem",
        "CobieAttribute",
        "CobieDocument",
    ] {
        let t = loaded.schema_handle().type_by_name(type_name).unwrap();
        for e in loaded.instances_of(t, false) {
            let row = loaded.scalar(e, "RowNumber").and_then(|v| v.as_i64());
            assert!(
                row.is_some_and(|r| r >= 2),
                "{type_name} entity without a row number"
            );
        }
    }
}

#[test]
fn consecutive_loads_stay_independent() {
    let (_dir, path) = temp_file("consecutive.xlsx");
    let mut source = sample_model();
    tables::export_to_table(&mut source, &path).expect("export");

    let (first, _) = tables::import_from_table(&path).expect("first import");
    let (second, _) = tables::import_from_table(&path).expect("second import");

    // a shared cache between sessions would double counts or cross-link
    assert_eq!(first.len(), second.len());
    let comp_t = first.schema_handle().type_by_name("CobieComponent").unwrap();
    assert_eq!(
        first.instances_of(comp_t, false).len(),
        second.instances_of(comp_t, false).len()
    );
}

#[test]
fn traceability_records_every_emitted_row() {
    let (_dir, path) = temp_file("trace.xlsx");
    let mut source = sample_model();

    let mapping = tables::cobie_mapping().expect("mapping");
    let mut store = cobie_lite_tables::TableStore::new(&mut source, mapping).expect("store");
    store.add_resolver(Box::new(cobie_lite_tables::AttributeValueResolver));
    store.store(&path).expect("export");

    let zone_rows = store.row_to_entity.get("Zone").expect("zone rows");
    // one zone expanded into three rows, all tracing to the same entity
    assert_eq!(zone_rows.len(), 3);
    let mut entities: Vec<_> = zone_rows.values().copied().collect();
    entities.sort();
    entities.dedup();
    assert_eq!(entities.len(), 1);
}
