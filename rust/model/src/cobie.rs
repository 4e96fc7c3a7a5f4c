// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! COBie 2.4 schema registered against the runtime metadata registry.
//!
//! Generated from the COBie EXPRESS schema definition; trimmed to the types
//! the tabular representation exchanges. All types are handled generically
//! through the registry - nothing in the mapping engine names them.

use crate::model::{EntityId, Model};
use crate::schema::{ScalarKind, Schema, SchemaBuilder};
use crate::value::{Value, DATE_TIME_FORMAT};
use chrono::NaiveDateTime;
use std::sync::{Arc, OnceLock};

/// The shared COBie schema instance.
pub fn schema() -> Arc<Schema> {
    static SCHEMA: OnceLock<Arc<Schema>> = OnceLock::new();
    Arc::clone(SCHEMA.get_or_init(|| Arc::new(build())))
}

/// A fresh, empty COBie model.
pub fn new_model() -> Model {
    Model::new(schema())
}

fn build() -> Schema {
    let mut b = SchemaBuilder::new();

    // primitive value types
    b.value_type("String", ScalarKind::String, None);
    b.value_type("Integer", ScalarKind::Integer, None);
    b.value_type("Float", ScalarKind::Float, None);
    b.value_type("Boolean", ScalarKind::Bool, None);
    b.value_type("DateTime", ScalarKind::DateTime, None);

    // AttributeValue select and its concrete wrappers
    b.select("AttributeValue");
    b.value_type("StringValue", ScalarKind::String, Some("AttributeValue"));
    b.value_type("IntegerValue", ScalarKind::Integer, Some("AttributeValue"));
    b.value_type("FloatValue", ScalarKind::Float, Some("AttributeValue"));
    b.value_type("BooleanValue", ScalarKind::Bool, Some("AttributeValue"));
    b.value_type("DateTimeValue", ScalarKind::DateTime, Some("AttributeValue"));

    b.enumeration("AssetTypeEnum", &["Fixed", "Movable"]);

    // shared support entities
    b.entity("CobieExternalSystem", None);
    b.entity("CobieExternalObject", None);
    b.entity("CobieCategory", None);
    b.entity("CobieCreatedInfo", None);

    b.abstract_entity("CobieUnit", None);
    b.entity("CobieLinearUnit", Some("CobieUnit"));
    b.entity("CobieAreaUnit", Some("CobieUnit"));
    b.entity("CobieVolumeUnit", Some("CobieUnit"));
    b.entity("CobieCurrencyUnit", Some("CobieUnit"));
    b.entity("CobieDurationUnit", Some("CobieUnit"));

    // abstract roots
    b.abstract_entity("CobieReferencedObject", None);
    b.abstract_entity("CobieAsset", Some("CobieReferencedObject"));
    b.abstract_entity("CobieTypeOrComponent", Some("CobieAsset"));

    b.entity("CobieContact", Some("CobieReferencedObject"));
    b.entity("CobieSite", Some("CobieAsset"));
    b.entity("CobieFacility", Some("CobieAsset"));
    b.entity("CobieFloor", Some("CobieAsset"));
    b.entity("CobieSpace", Some("CobieAsset"));
    b.entity("CobieZone", Some("CobieAsset"));
    b.entity("CobieType", Some("CobieTypeOrComponent"));
    b.entity("CobieComponent", Some("CobieTypeOrComponent"));
    b.entity("CobieSystem", Some("CobieAsset"));
    b.entity("CobieAttribute", Some("CobieReferencedObject"));
    b.entity("CobieDocument", Some("CobieReferencedObject"));

    // CobieReferencedObject
    b.entity_ref("CobieReferencedObject", "Created", "CobieCreatedInfo");
    b.entity_ref("CobieReferencedObject", "ExternalSystem", "CobieExternalSystem");
    b.entity_ref("CobieReferencedObject", "ExternalObject", "CobieExternalObject");
    b.scalar("CobieReferencedObject", "ExternalId", "String");
    b.scalar("CobieReferencedObject", "AltExternalId", "String");
    b.derived_scalar("CobieReferencedObject", "RowNumber", "Integer");

    // CobieAsset
    b.scalar("CobieAsset", "Name", "String");
    b.scalar("CobieAsset", "Description", "String");
    b.entity_list("CobieAsset", "Categories", "CobieCategory");
    b.entity_list("CobieAsset", "Attributes", "CobieAttribute");
    b.entity_list("CobieAsset", "Documents", "CobieDocument");

    // CobieTypeOrComponent
    b.entity_list("CobieTypeOrComponent", "AssemblyOf", "CobieTypeOrComponent");

    // support entities
    b.scalar("CobieExternalSystem", "Name", "String");
    b.scalar("CobieExternalObject", "Name", "String");
    b.scalar("CobieCategory", "Value", "String");
    b.scalar("CobieCategory", "Description", "String");
    b.entity_ref("CobieCreatedInfo", "CreatedBy", "CobieContact");
    b.scalar("CobieCreatedInfo", "CreatedOn", "DateTimeValue");
    b.scalar("CobieUnit", "Value", "String");

    // CobieContact
    for prop in [
        "Email",
        "GivenName",
        "FamilyName",
        "Company",
        "Phone",
        "Street",
        "PostalBox",
        "Town",
        "StateRegion",
        "PostalCode",
        "Country",
    ] {
        b.scalar("CobieContact", prop, "String");
    }
    b.entity_ref("CobieContact", "Category", "CobieCategory");

    // CobieFacility
    b.entity_ref("CobieFacility", "Site", "CobieSite");
    b.scalar("CobieFacility", "Phase", "String");
    b.entity_ref("CobieFacility", "LinearUnits", "CobieLinearUnit");
    b.entity_ref("CobieFacility", "AreaUnits", "CobieAreaUnit");
    b.entity_ref("CobieFacility", "VolumeUnits", "CobieVolumeUnit");
    b.entity_ref("CobieFacility", "CurrencyUnit", "CobieCurrencyUnit");
    b.scalar("CobieFacility", "AreaMeasurement", "String");
    b.inverse("CobieFacility", "Floors", "CobieFloor", "Facility");

    // CobieFloor
    b.entity_ref("CobieFloor", "Facility", "CobieFacility");
    b.scalar("CobieFloor", "Elevation", "Float");
    b.scalar("CobieFloor", "Height", "Float");
    b.inverse("CobieFloor", "Spaces", "CobieSpace", "Floor");

    // CobieSpace
    b.entity_ref("CobieSpace", "Floor", "CobieFloor");
    b.scalar("CobieSpace", "RoomTag", "String");
    b.scalar("CobieSpace", "UsableHeight", "Float");
    b.scalar("CobieSpace", "GrossArea", "Float");
    b.scalar("CobieSpace", "NetArea", "Float");
    b.inverse("CobieSpace", "Components", "CobieComponent", "Spaces");

    // CobieZone
    b.entity_list("CobieZone", "Spaces", "CobieSpace");

    // CobieType
    b.scalar("CobieType", "AssetType", "AssetTypeEnum");
    b.entity_ref("CobieType", "Manufacturer", "CobieContact");
    b.scalar("CobieType", "ModelNumber", "String");
    b.entity_ref("CobieType", "WarrantyGuarantorParts", "CobieContact");
    b.scalar("CobieType", "WarrantyDurationParts", "Integer");
    b.entity_ref("CobieType", "WarrantyGuarantorLabor", "CobieContact");
    b.scalar("CobieType", "WarrantyDurationLabor", "Integer");
    b.entity_ref("CobieType", "DurationUnit", "CobieDurationUnit");
    b.scalar("CobieType", "WarrantyDescription", "String");
    b.scalar("CobieType", "ReplacementCost", "Float");
    b.scalar("CobieType", "ExpectedLife", "Integer");
    b.scalar("CobieType", "NominalLength", "Float");
    b.scalar("CobieType", "NominalWidth", "Float");
    b.scalar("CobieType", "NominalHeight", "Float");
    for prop in [
        "ModelReference",
        "Shape",
        "Size",
        "Color",
        "Finish",
        "Grade",
        "Material",
    ] {
        b.scalar("CobieType", prop, "String");
    }
    b.inverse("CobieType", "Components", "CobieComponent", "Type");

    // CobieComponent
    b.entity_ref("CobieComponent", "Type", "CobieType");
    b.entity_list("CobieComponent", "Spaces", "CobieSpace");
    b.scalar("CobieComponent", "SerialNumber", "String");
    b.scalar("CobieComponent", "InstallationDate", "DateTimeValue");
    b.scalar("CobieComponent", "WarrantyStartDate", "DateTimeValue");
    b.scalar("CobieComponent", "TagNumber", "String");
    b.scalar("CobieComponent", "BarCode", "String");
    b.scalar("CobieComponent", "AssetIdentifier", "String");

    // CobieSystem
    b.entity_list("CobieSystem", "Components", "CobieComponent");

    // CobieAttribute
    b.scalar("CobieAttribute", "Name", "String");
    b.scalar("CobieAttribute", "Description", "String");
    b.scalar("CobieAttribute", "Value", "AttributeValue");
    b.scalar("CobieAttribute", "Unit", "String");
    b.scalar_list("CobieAttribute", "AllowedValues", "String");
    b.scalar("CobieAttribute", "Stage", "String");

    // CobieDocument
    b.scalar("CobieDocument", "Name", "String");
    b.scalar("CobieDocument", "Description", "String");
    b.scalar("CobieDocument", "ApprovalType", "String");
    b.scalar("CobieDocument", "Stage", "String");
    b.scalar("CobieDocument", "Directory", "String");
    b.scalar("CobieDocument", "File", "String");
    b.scalar("CobieDocument", "Reference", "String");

    b.finish()
}

/// Create a contact plus a created-info record - the default provenance
/// stamped onto entities built in memory before an export.
pub fn default_created_info(
    model: &mut Model,
    created_on: &str,
    email: &str,
    given_name: &str,
    family_name: &str,
) -> EntityId {
    let schema = model.schema_handle();
    let contact_t = schema.type_by_name("CobieContact").expect("COBie schema");
    let info_t = schema.type_by_name("CobieCreatedInfo").expect("COBie schema");

    let contact = model.new_entity(contact_t).expect("concrete type");
    model.set_scalar(contact, "Email", Value::String(email.to_string()));
    model.set_scalar(contact, "GivenName", Value::String(given_name.to_string()));
    model.set_scalar(contact, "FamilyName", Value::String(family_name.to_string()));

    let info = model.new_entity(info_t).expect("concrete type");
    model.set_related(info, "CreatedBy", contact);
    if let Ok(on) = NaiveDateTime::parse_from_str(created_on, DATE_TIME_FORMAT) {
        model.set_scalar(
            info,
            "CreatedOn",
            Value::typed("DateTimeValue", Value::DateTime(on)),
        );
    }
    info
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_registers_core_types() {
        let s = schema();
        for name in [
            "CobieFacility",
            "CobieFloor",
            "CobieSpace",
            "CobieZone",
            "CobieType",
            "CobieComponent",
            "CobieSystem",
            "CobieContact",
            "CobieAttribute",
            "CobieDocument",
            "AttributeValue",
        ] {
            assert!(s.type_by_name(name).is_some(), "{name} missing");
        }
    }

    #[test]
    fn type_or_component_union_covers_both() {
        let s = schema();
        let union = s.type_by_name("CobieTypeOrComponent").unwrap();
        let ty = s.type_by_name("CobieType").unwrap();
        let comp = s.type_by_name("CobieComponent").unwrap();
        assert!(s.is_abstract(union));
        assert!(s.is_kind_of(ty, union));
        assert!(s.is_kind_of(comp, union));
    }

    #[test]
    fn inherited_properties_resolve() {
        let s = schema();
        let comp = s.type_by_name("CobieComponent").unwrap();
        // Name comes from CobieAsset, Created from CobieReferencedObject
        assert!(s.property(comp, "Name").is_some());
        assert!(s.property(comp, "Created").is_some());
        assert!(s.property(comp, "AssemblyOf").is_some());
        assert!(s.property(comp, "RowNumber").unwrap().is_derived);
    }

    #[test]
    fn created_info_helper_builds_graph() {
        let mut m = new_model();
        let info = default_created_info(
            &mut m,
            "2016-01-01T12:00:00",
            "martin.cerny@northumbria.ac.uk",
            "Martin",
            "Cerny",
        );
        let by = m.related(info, "CreatedBy").unwrap();
        assert_eq!(
            m.scalar(by, "Email").unwrap().as_str(),
            Some("martin.cerny@northumbria.ac.uk")
        );
        assert_eq!(
            m.scalar(info, "CreatedOn").unwrap().to_string(),
            "2016-01-01T12:00:00"
        );
    }
}
