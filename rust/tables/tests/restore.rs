// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Importing hand-built workbooks: the files a spreadsheet-literate user
//! would actually produce, including edited and damaged ones.

use cobie_lite_model::{EntityId, Model};
use cobie_lite_tables::cobie as tables;
use cobie_lite_tables::{CellValue, Workbook};
use std::path::PathBuf;

fn temp_file(name: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join(name);
    (dir, path)
}

/// Write a sheet from (column, text-or-number) tuples; row 1 is the header.
fn write_sheet(workbook: &mut Workbook, name: &str, rows: &[Vec<(u32, CellValue)>]) {
    workbook.add_sheet(name).expect("sheet");
    for (i, row) in rows.iter().enumerate() {
        for (column, value) in row {
            workbook.write_cell(name, *column, i as u32 + 1, value);
        }
    }
}

fn text(s: &str) -> CellValue {
    CellValue::Text(s.to_string())
}

fn find_by_name(model: &Model, type_name: &str, name: &str) -> Option<EntityId> {
    let t = model.schema_handle().type_by_name(type_name)?;
    model.instances_of(t, true).into_iter().find(|&e| {
        model
            .scalar(e, "Name")
            .and_then(|v| v.as_str())
            .is_some_and(|n| n == name)
    })
}

#[test]
fn type_row_restores_nested_provenance_and_numbers() {
    let (_dir, path) = temp_file("functions.xlsx");
    let mut workbook = Workbook::new();
    write_sheet(
        &mut workbook,
        "Type",
        &[
            vec![
                (1, text("Name")),
                (2, text("CreatedBy")),
                (3, text("CreatedOn")),
                (4, text("Category")),
                (10, text("WarrantyDurationParts")),
                (13, text("WarrantyDurationUnit")),
                (17, text("ReplacementCost")),
                (18, text("ExpectedLife")),
                (22, text("NominalWidth")),
            ],
            vec![
                (1, text("JEG_CommunicationDevices_PublicAddressSpeakerCeilingRecessed_10899659")),
                (2, text("andy.ward@xbim.net")),
                (3, text("2019-09-04T17:20:40")),
                (4, text("Pr_60_75 : Communications source products")),
                (10, CellValue::Number(24.0)),
                (13, text("Years")),
                (17, CellValue::Number(42.5)),
                (18, CellValue::Number(20.0)),
                (22, CellValue::Number(50.0)),
            ],
        ],
    );
    workbook.save(&path).expect("save");

    let (model, report) = tables::import_from_table(&path).expect("import");
    assert!(report.is_empty(), "{report}");

    let type_row = find_by_name(
        &model,
        "CobieType",
        "JEG_CommunicationDevices_PublicAddressSpeakerCeilingRecessed_10899659",
    )
    .expect("type row");

    let created = model.related(type_row, "Created").expect("created info");
    let author = model.related(created, "CreatedBy").expect("created by");
    assert_eq!(model.scalar(author, "Email").unwrap().as_str(), Some("andy.ward@xbim.net"));
    assert_eq!(
        model.scalar(created, "CreatedOn").unwrap().to_string(),
        "2019-09-04T17:20:40"
    );

    let categories = model.related_list(type_row, "Categories").expect("categories");
    assert_eq!(
        model.scalar(categories[0], "Value").unwrap().as_str(),
        Some("Pr_60_75 : Communications source products")
    );

    assert_eq!(model.scalar(type_row, "WarrantyDurationParts").unwrap().as_i64(), Some(24));
    assert!((model.scalar(type_row, "ReplacementCost").unwrap().as_f64().unwrap() - 42.5).abs() < 1e-9);
    assert_eq!(model.scalar(type_row, "ExpectedLife").unwrap().as_i64(), Some(20));
    assert!((model.scalar(type_row, "NominalWidth").unwrap().as_f64().unwrap() - 50.0).abs() < 1e-9);

    let unit = model.related(type_row, "DurationUnit").expect("duration unit");
    assert_eq!(model.scalar(unit, "Value").unwrap().as_str(), Some("Years"));
}

fn facility_sheet(name_a: &str, name_b: &str) -> Vec<Vec<(u32, CellValue)>> {
    vec![
        vec![
            (1, text("Name")),
            (2, text("CreatedBy")),
            (3, text("CreatedOn")),
            (10, text("AreaMeasurement")),
        ],
        vec![
            (1, text(name_a)),
            (2, text("facility.manager@example.com")),
            (3, text("2020-01-06T09:00:00")),
            (10, text("m2")),
        ],
        vec![
            (1, text(name_b)),
            (2, text("facility.manager@example.com")),
            (3, text("2020-01-06T09:00:00")),
            (10, text("m2")),
        ],
    ]
}

fn attribute_sheet(row_name: &str) -> Vec<Vec<(u32, CellValue)>> {
    vec![
        vec![
            (1, text("Name")),
            (2, text("CreatedBy")),
            (3, text("CreatedOn")),
            (4, text("SheetName")),
            (5, text("RowName")),
            (6, text("Value")),
        ],
        vec![
            (1, text("Colour")),
            (2, text("facility.manager@example.com")),
            (3, text("2020-01-06T09:00:00")),
            (4, text("Facility")),
            (5, text(row_name)),
            (6, text("Red")),
        ],
    ]
}

#[test]
fn ambiguous_parents_link_to_all_matches_with_a_warning() {
    let (_dir, path) = temp_file("ambiguous.xlsx");
    let mut workbook = Workbook::new();
    // two facilities share a name; the child row cannot tell them apart
    write_sheet(&mut workbook, "Facility", &facility_sheet("Facility X", "Facility X"));
    write_sheet(&mut workbook, "Attribute", &attribute_sheet("Facility X"));
    workbook.save(&path).expect("save");

    let (model, report) = tables::import_from_table(&path).expect("import");
    assert!(report.contains("ambiguous"), "{report}");

    let facility_t = model.schema_handle().type_by_name("CobieFacility").unwrap();
    let facilities = model.instances_of(facility_t, false);
    assert_eq!(facilities.len(), 2);

    // never fewer than both links
    let attribute = find_by_name(&model, "CobieAttribute", "Colour").expect("attribute");
    for f in facilities {
        let attached = model.related_list(f, "Attributes").unwrap_or(&[]);
        assert!(attached.contains(&attribute), "facility without the attribute");
    }
}

#[test]
fn orphaned_child_rows_are_logged_and_skipped() {
    let (_dir, path) = temp_file("orphan.xlsx");
    let mut workbook = Workbook::new();
    write_sheet(&mut workbook, "Facility", &facility_sheet("Facility X", "Facility Y"));
    write_sheet(&mut workbook, "Attribute", &attribute_sheet("Missing Facility"));
    workbook.save(&path).expect("save");

    let (model, report) = tables::import_from_table(&path).expect("import must not throw");
    assert!(report.contains("Found no parent"), "{report}");

    // the attribute row loaded but stayed unattached
    let attribute = find_by_name(&model, "CobieAttribute", "Colour").expect("attribute");
    let facility_t = model.schema_handle().type_by_name("CobieFacility").unwrap();
    for f in model.instances_of(facility_t, false) {
        assert!(!model.related_list(f, "Attributes").unwrap_or(&[]).contains(&attribute));
    }
}

#[test]
fn reordered_columns_load_the_same_graph() {
    let canonical = {
        let (_dir, path) = temp_file("canonical.xlsx");
        let mut workbook = Workbook::new();
        write_sheet(
            &mut workbook,
            "Floor",
            &[
                vec![(1, text("Name")), (2, text("CreatedBy")), (3, text("CreatedOn"))],
                vec![
                    (1, text("Level 1")),
                    (2, text("site.lead@example.com")),
                    (3, text("2020-01-06T09:00:00")),
                ],
            ],
        );
        write_sheet(
            &mut workbook,
            "Space",
            &[
                vec![
                    (1, text("Name")),
                    (2, text("CreatedBy")),
                    (3, text("CreatedOn")),
                    (5, text("FloorName")),
                    (12, text("GrossArea")),
                ],
                vec![
                    (1, text("Reception")),
                    (2, text("site.lead@example.com")),
                    (3, text("2020-01-06T09:00:00")),
                    (5, text("Level 1")),
                    (12, CellValue::Number(55.5)),
                ],
            ],
        );
        workbook.save(&path).expect("save");
        tables::import_from_table(&path).expect("import")
    };

    let shuffled = {
        let (_dir, path) = temp_file("shuffled.xlsx");
        let mut workbook = Workbook::new();
        write_sheet(
            &mut workbook,
            "Floor",
            &[
                vec![(1, text("Name")), (2, text("CreatedBy")), (3, text("CreatedOn"))],
                vec![
                    (1, text("Level 1")),
                    (2, text("site.lead@example.com")),
                    (3, text("2020-01-06T09:00:00")),
                ],
            ],
        );
        // same headers, different physical positions
        write_sheet(
            &mut workbook,
            "Space",
            &[
                vec![
                    (1, text("FloorName")),
                    (2, text("CreatedOn")),
                    (3, text("CreatedBy")),
                    (4, text("GrossArea")),
                    (5, text("Name")),
                ],
                vec![
                    (1, text("Level 1")),
                    (2, text("2020-01-06T09:00:00")),
                    (3, text("site.lead@example.com")),
                    (4, CellValue::Number(55.5)),
                    (5, text("Reception")),
                ],
            ],
        );
        workbook.save(&path).expect("save");
        tables::import_from_table(&path).expect("import")
    };

    for (model, _report) in [&canonical, &shuffled] {
        let space = find_by_name(model, "CobieSpace", "Reception").expect("space");
        let floor = model.related(space, "Floor").expect("floor link");
        assert_eq!(model.scalar(floor, "Name").unwrap().as_str(), Some("Level 1"));
        assert!((model.scalar(space, "GrossArea").unwrap().as_f64().unwrap() - 55.5).abs() < 1e-9);
    }
    assert_eq!(canonical.0.len(), shuffled.0.len());
}

#[test]
fn unknown_trailing_columns_are_tolerated() {
    let (_dir, path) = temp_file("blankcols.xlsx");
    let mut workbook = Workbook::new();
    write_sheet(
        &mut workbook,
        "Component",
        &[
            vec![
                (1, text("Name")),
                (2, text("CreatedBy")),
                (3, text("CreatedOn")),
                // hand-edited files often carry private columns
                (20, text("Comments")),
            ],
            vec![
                (1, text("AHU-01")),
                (2, text("site.lead@example.com")),
                (3, text("2020-01-06T09:00:00")),
            ],
        ],
    );
    workbook.save(&path).expect("save");

    let (model, report) = tables::import_from_table(&path).expect("import");
    assert!(report.is_empty(), "{report}");
    assert!(find_by_name(&model, "CobieComponent", "AHU-01").is_some());
}

#[test]
fn three_blank_rows_terminate_a_sheet() {
    let (_dir, path) = temp_file("blankrows.xlsx");
    let mut workbook = Workbook::new();
    write_sheet(
        &mut workbook,
        "Floor",
        &[
            vec![(1, text("Name")), (2, text("CreatedBy")), (3, text("CreatedOn"))],
            vec![(1, text("Level 1"))],
            vec![],
            vec![],
            vec![],
            // unreachable: three blank rows above mark the end of data
            vec![(1, text("Ghost Floor"))],
        ],
    );
    workbook.save(&path).expect("save");

    let (model, _report) = tables::import_from_table(&path).expect("import");
    assert!(find_by_name(&model, "CobieFloor", "Level 1").is_some());
    assert!(find_by_name(&model, "CobieFloor", "Ghost Floor").is_none());
}
