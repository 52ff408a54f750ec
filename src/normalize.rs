//! Field normalisation.
//!
//! Reconciles the historical field names of specification (WPS) and
//! qualification (WPQR) records into one canonical field set. Every canonical
//! field is declared once below with its ordered alias list and default; the
//! first alias carrying a non-null value wins.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::record::{RawRecord, RawValue};

/// Sentinel shown for any canonical field without a value or default.
pub const NOT_AVAILABLE: &str = "N/A";

/// Display format used for every calendar date in generated documents.
pub const DATE_FORMAT: &str = "%d.%m.%Y";

lazy_static! {
    static ref LIST_DELIMITER: Regex =
        Regex::new(r"[,;/\s]+").expect("list delimiter pattern is valid");
}

/// The two document types issued by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    /// Welding procedure specification.
    Specification,
    /// Welding procedure qualification record.
    QualificationRecord,
}

impl DocumentType {
    /// Short code used in filenames and metrics labels.
    pub fn code(&self) -> &'static str {
        match self {
            DocumentType::Specification => "WPS",
            DocumentType::QualificationRecord => "WPQR",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            DocumentType::Specification => "WELDING PROCEDURE SPECIFICATION",
            DocumentType::QualificationRecord => "WELDING PROCEDURE QUALIFICATION RECORD",
        }
    }

    pub fn fields(&self) -> impl Iterator<Item = &'static FieldSpec> {
        let specific: &'static [FieldSpec] = match self {
            DocumentType::Specification => SPECIFICATION_FIELDS,
            DocumentType::QualificationRecord => QUALIFICATION_FIELDS,
        };
        ORGANIZATION_FIELDS.iter().chain(specific.iter())
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Number,
    Date,
    List,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldDefault {
    /// The [`NOT_AVAILABLE`] sentinel.
    Placeholder,
    Text(&'static str),
    Number(f64),
    EmptyList,
}

/// Declaration of one canonical field.
#[derive(Debug)]
pub struct FieldSpec {
    pub key: &'static str,
    /// Source field names in priority order.
    pub aliases: &'static [&'static str],
    pub kind: FieldKind,
    pub default: FieldDefault,
}

const fn text(key: &'static str, aliases: &'static [&'static str]) -> FieldSpec {
    FieldSpec { key, aliases, kind: FieldKind::Text, default: FieldDefault::Placeholder }
}

const fn text_or(
    key: &'static str,
    aliases: &'static [&'static str],
    default: &'static str,
) -> FieldSpec {
    FieldSpec { key, aliases, kind: FieldKind::Text, default: FieldDefault::Text(default) }
}

const fn number(key: &'static str, aliases: &'static [&'static str]) -> FieldSpec {
    FieldSpec { key, aliases, kind: FieldKind::Number, default: FieldDefault::Placeholder }
}

/// Range bound: defaults to the `0` sentinel.
const fn bound(key: &'static str, aliases: &'static [&'static str]) -> FieldSpec {
    FieldSpec { key, aliases, kind: FieldKind::Number, default: FieldDefault::Number(0.0) }
}

const fn date(key: &'static str, aliases: &'static [&'static str]) -> FieldSpec {
    FieldSpec { key, aliases, kind: FieldKind::Date, default: FieldDefault::Placeholder }
}

const fn list(key: &'static str, aliases: &'static [&'static str]) -> FieldSpec {
    FieldSpec { key, aliases, kind: FieldKind::List, default: FieldDefault::EmptyList }
}

static ORGANIZATION_FIELDS: &[FieldSpec] = &[
    text("organization_name", &["organization.name", "company.name", "company_name"]),
    text("organization_code", &["organization.code", "organization.company_code", "company.code"]),
    text(
        "organization_address",
        &["organization.address", "company.address", "organization.city"],
    ),
];

pub static SPECIFICATION_FIELDS: &[FieldSpec] = &[
    text("document_number", &["wps_number"]),
    text_or("revision", &["revision"], "0"),
    text("title", &["title"]),
    date("document_date", &["date_prepared", "approved_date", "created_at"]),
    text("welding_code", &["welding_code"]),
    text("welding_process", &["welding_process"]),
    text("process_type", &["welding_process_type"]),
    list("welding_positions", &["welding_positions"]),
    text("joint_design", &["joint_type", "joint_design"]),
    text("joint_preparation", &["joint_preparation"]),
    text("backing", &["backing_type"]),
    text_or("cleaning", &["cleaning"], "Wire brush"),
    text("base_material_spec", &["base_material_spec", "base_metal_specification"]),
    text("base_material_grade", &["base_material_grade", "base_metal_type_grade"]),
    text("base_material_p_number", &["base_metal_p_number"]),
    text("base_material_group", &["base_metal_group_number"]),
    bound("thickness_min", &["base_material_thickness_min", "thickness_range_min"]),
    bound("thickness_max", &["base_material_thickness_max", "thickness_range_max"]),
    text("filler_spec", &["filler_material_spec", "filler_metal_specification"]),
    text(
        "filler_classification",
        &["filler_material_classification", "filler_metal_classification"],
    ),
    text("filler_f_number", &["filler_metal_f_number"]),
    text("filler_a_number", &["filler_metal_a_number"]),
    text("filler_diameter", &["filler_material_diameter", "filler_metal_diameter"]),
    text("filler_trade_name", &["filler_metal_trade_name"]),
    text("current_type", &["current_type"]),
    bound("current_min", &["current_range_min", "amperage_range_min"]),
    bound("current_max", &["current_range_max", "amperage_range_max"]),
    bound("voltage_min", &["voltage_range_min"]),
    bound("voltage_max", &["voltage_range_max"]),
    bound("travel_speed_min", &["travel_speed_min"]),
    bound("travel_speed_max", &["travel_speed_max"]),
    text("shielding_gas_type", &["shielding_gas_type"]),
    text("shielding_gas_composition", &["shielding_gas_composition"]),
    bound("gas_flow_rate", &["gas_flow_rate", "shielding_gas_flow_rate"]),
    bound("preheat_min", &["preheat_temp_min"]),
    bound("preheat_max", &["preheat_temp_max"]),
    bound("interpass_min", &["interpass_temp_min"]),
    bound("interpass_max", &["interpass_temp_max"]),
    number("pwht_temperature", &["pwht_temperature"]),
    number("pwht_time", &["pwht_time"]),
    text_or(
        "technique",
        &["technique"],
        "Standard welding technique as per procedure.",
    ),
    text_or("remarks", &["remarks"], "No additional remarks."),
    text_or("status", &["status"], "Draft"),
    text("qualified_by", &["qualified_by_wpqr"]),
    text("prepared_by", &["prepared_by"]),
    text("approved_by", &["approved_by"]),
    date("approved_date", &["date_approved", "approved_date"]),
];

pub static QUALIFICATION_FIELDS: &[FieldSpec] = &[
    text("document_number", &["wpqr_number"]),
    text_or("revision", &["revision"], "0"),
    text("title", &["title"]),
    date("test_date", &["test_date"]),
    text("specification_number", &["wps.wps_number", "wps_number"]),
    text("welding_code", &["welding_code", "wps.welding_code"]),
    text(
        "base_material",
        &["actual_base_material", "base_metal_specification", "wps.base_material_spec"],
    ),
    text("welding_process", &["welding_process", "wps.welding_process"]),
    text("welding_position", &["actual_welding_position", "welding_position"]),
    text(
        "joint_design",
        &["actual_joint_design", "wps.joint_type", "wps.joint_design"],
    ),
    text("filler_material", &["actual_filler_material", "wps.filler_material_spec"]),
    number("base_metal_thickness", &["base_metal_thickness"]),
    text("welder_name", &["welder_name"]),
    text("welder_qualification", &["welder_qualification"]),
    text("welder_stamp_number", &["welder_stamp_number"]),
    text("current_type", &["current_type", "wps.current_type"]),
    number("actual_current", &["actual_current", "amperage_actual"]),
    number("actual_voltage", &["actual_voltage", "voltage_actual"]),
    number("actual_travel_speed", &["actual_travel_speed", "travel_speed_actual"]),
    number("actual_heat_input", &["actual_heat_input", "heat_input"]),
    number("actual_preheat", &["actual_preheat_temp"]),
    number("actual_interpass", &["actual_interpass_temp"]),
    text("visual_result", &["visual_inspection_result"]),
    text("visual_notes", &["visual_inspection_notes"]),
    text("tensile_result", &["tensile_result", "tensile_test_result"]),
    number("tensile_strength", &["tensile_strength", "tensile_strength_mpa"]),
    text("tensile_location", &["tensile_location"]),
    number("elongation", &["elongation_percent"]),
    text("bend_result", &["bend_test_result"]),
    text("bend_type", &["bend_test_type"]),
    number("bend_angle", &["bend_test_angle"]),
    text("bend_notes", &["bend_test_notes"]),
    text("impact_result", &["impact_result", "impact_test_result"]),
    number("impact_temperature", &["impact_test_temp", "impact_test_temperature"]),
    number("impact_energy", &["impact_energy_weld", "impact_energy_j", "impact_energy"]),
    number("impact_energy_haz", &["impact_energy_haz"]),
    text("macro_result", &["macro_examination_result"]),
    text("macro_notes", &["macro_notes"]),
    text("ndt_method", &["ndt_method"]),
    text("ndt_standard", &["ndt_standard"]),
    text("ndt_result", &["ndt_result"]),
    text("ndt_report_number", &["ndt_report_number"]),
    text("overall_result", &["overall_result"]),
    text("qualified_thickness_range", &["qualified_thickness_range"]),
    list("qualified_positions", &["qualified_positions"]),
    text("qualified_materials", &["qualified_materials"]),
    date("valid_from", &["valid_from"]),
    date("valid_until", &["valid_until"]),
    text("tested_by", &["tested_by"]),
    text("witnessed_by", &["witnessed_by"]),
    text("approved_by", &["approved_by"]),
    date("approved_date", &["approved_date"]),
    text_or("remarks", &["remarks"], "No additional remarks."),
];

/// A resolved canonical value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Date(NaiveDate),
    List(Vec<String>),
    NotAvailable,
}

static NOT_AVAILABLE_VALUE: FieldValue = FieldValue::NotAvailable;

impl FieldValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_not_available(&self) -> bool {
        matches!(self, FieldValue::NotAvailable)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(s) => f.write_str(s),
            FieldValue::Number(n) => f.write_str(&format_number(*n)),
            FieldValue::Date(d) => write!(f, "{}", d.format(DATE_FORMAT)),
            FieldValue::List(items) if items.is_empty() => f.write_str(NOT_AVAILABLE),
            FieldValue::List(items) => f.write_str(&items.join(", ")),
            FieldValue::NotAvailable => f.write_str(NOT_AVAILABLE),
        }
    }
}

/// Formats a number without a trailing `.0` for whole values.
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{n:.0}")
    } else {
        format!("{n}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedField {
    pub value: FieldValue,
    /// The alias the value came from; `None` when the default applied.
    pub source: Option<&'static str>,
}

/// The complete canonical field set of one document.
///
/// Every declared field is present; lookups of undeclared keys yield
/// [`FieldValue::NotAvailable`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalFields {
    document_type: DocumentType,
    fields: BTreeMap<&'static str, ResolvedField>,
}

impl CanonicalFields {
    pub fn document_type(&self) -> DocumentType {
        self.document_type
    }

    pub fn get(&self, key: &str) -> &FieldValue {
        self.fields
            .get(key)
            .map(|f| &f.value)
            .unwrap_or(&NOT_AVAILABLE_VALUE)
    }

    /// Display text of a field.
    pub fn text(&self, key: &str) -> String {
        self.get(key).to_string()
    }

    /// True when no alias supplied the value.
    pub fn is_defaulted(&self, key: &str) -> bool {
        self.fields.get(key).map_or(true, |f| f.source.is_none())
    }

    pub fn source_of(&self, key: &str) -> Option<&'static str> {
        self.fields.get(key).and_then(|f| f.source)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &ResolvedField)> {
        self.fields.iter().map(|(k, v)| (*k, v))
    }
}

/// Resolves a raw record into the canonical field set of `document_type`.
///
/// Never fails: missing data resolves to the declared default and values that
/// cannot be coerced fall back to their raw text.
pub fn normalize(raw: &RawRecord, document_type: DocumentType) -> CanonicalFields {
    let fields = document_type
        .fields()
        .map(|spec| (spec.key, resolve(raw, spec)))
        .collect();

    CanonicalFields { document_type, fields }
}

fn resolve(raw: &RawRecord, spec: &'static FieldSpec) -> ResolvedField {
    let found = spec
        .aliases
        .iter()
        .find_map(|alias| raw.get(alias).map(|value| (*alias, value)));

    match found {
        Some((alias, value)) => ResolvedField {
            value: coerce(spec, value),
            source: Some(alias),
        },
        None => ResolvedField {
            value: default_value(spec.default),
            source: None,
        },
    }
}

fn default_value(default: FieldDefault) -> FieldValue {
    match default {
        FieldDefault::Placeholder => FieldValue::NotAvailable,
        FieldDefault::Text(s) => FieldValue::Text(s.to_string()),
        FieldDefault::Number(n) => FieldValue::Number(n),
        FieldDefault::EmptyList => FieldValue::List(Vec::new()),
    }
}

fn coerce(spec: &FieldSpec, value: &RawValue) -> FieldValue {
    match spec.kind {
        FieldKind::Text => FieldValue::Text(raw_text(value)),
        FieldKind::Number => match value {
            RawValue::Number(n) => FieldValue::Number(*n),
            RawValue::Text(s) => match s.trim().replace(',', ".").parse::<f64>() {
                Ok(n) if n.is_finite() => FieldValue::Number(n),
                _ => unparseable(spec, s),
            },
            other => unparseable(spec, &raw_text(other)),
        },
        FieldKind::Date => match value {
            RawValue::Date(d) => FieldValue::Date(*d),
            RawValue::Text(s) => match parse_date(s) {
                Some(d) => FieldValue::Date(d),
                None => unparseable(spec, s),
            },
            other => unparseable(spec, &raw_text(other)),
        },
        FieldKind::List => FieldValue::List(split_list(value)),
    }
}

fn unparseable(spec: &FieldSpec, raw: &str) -> FieldValue {
    log::warn!(
        "Unparseable value for field '{}' ({:?}): '{}', keeping raw text",
        spec.key,
        spec.kind,
        raw
    );
    FieldValue::Text(raw.trim().to_string())
}

fn raw_text(value: &RawValue) -> String {
    match value {
        RawValue::Null => String::new(),
        RawValue::Bool(true) => "Yes".to_string(),
        RawValue::Bool(false) => "No".to_string(),
        RawValue::Number(n) => format_number(*n),
        RawValue::Text(s) => s.trim().to_string(),
        RawValue::Date(d) => d.format(DATE_FORMAT).to_string(),
        RawValue::List(items) => items.join(", "),
    }
}

/// Parses the date shapes the persistence layer has been seen to produce.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if let Ok(d) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Some(d);
    }
    if let Ok(d) = NaiveDate::parse_from_str(value, DATE_FORMAT) {
        return Some(d);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.date_naive());
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|dt| dt.date())
}

fn split_list(value: &RawValue) -> Vec<String> {
    match value {
        RawValue::List(items) => items
            .iter()
            .flat_map(|item| split_joined(item))
            .collect(),
        RawValue::Text(s) => split_joined(s),
        RawValue::Null => Vec::new(),
        other => vec![raw_text(other)],
    }
}

fn split_joined(joined: &str) -> Vec<String> {
    LIST_DELIMITER
        .split(joined.trim())
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_field_keys_are_unique_per_document_type() {
        for doc in [DocumentType::Specification, DocumentType::QualificationRecord] {
            let keys: Vec<_> = doc.fields().map(|f| f.key).collect();
            let unique: HashSet<_> = keys.iter().collect();
            assert_eq!(keys.len(), unique.len(), "duplicate key in {doc}");
        }
    }

    #[test]
    fn test_first_alias_wins() {
        let raw = RawRecord::new()
            .with("current_range_min", 120.0)
            .with("amperage_range_min", 90.0);
        let fields = normalize(&raw, DocumentType::Specification);
        assert_eq!(fields.get("current_min"), &FieldValue::Number(120.0));
        assert_eq!(fields.source_of("current_min"), Some("current_range_min"));
    }

    #[test]
    fn test_null_alias_is_skipped() {
        let raw = RawRecord::new()
            .with("current_range_min", RawValue::Null)
            .with("amperage_range_min", 90.0);
        let fields = normalize(&raw, DocumentType::Specification);
        assert_eq!(fields.get("current_min"), &FieldValue::Number(90.0));
    }

    #[test]
    fn test_numeric_text_is_coerced() {
        let raw = RawRecord::new().with("gas_flow_rate", "12,5");
        let fields = normalize(&raw, DocumentType::Specification);
        assert_eq!(fields.get("gas_flow_rate"), &FieldValue::Number(12.5));
    }

    #[test]
    fn test_unparseable_number_keeps_raw_text() {
        let raw = RawRecord::new().with("actual_current", "approx. 150");
        let fields = normalize(&raw, DocumentType::QualificationRecord);
        assert_eq!(
            fields.get("actual_current"),
            &FieldValue::Text("approx. 150".into())
        );
    }

    #[test]
    fn test_date_shapes() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        for raw in ["2024-03-15", "15.03.2024", "2024-03-15T10:30:00", "2024-03-15T10:30:00+03:00"] {
            assert_eq!(parse_date(raw), Some(expected), "{raw}");
        }
        assert_eq!(parse_date("sometime in March"), None);
    }

    #[test]
    fn test_unparseable_date_falls_back_to_raw_string() {
        let raw = RawRecord::new().with("test_date", "spring 2024");
        let fields = normalize(&raw, DocumentType::QualificationRecord);
        assert_eq!(fields.get("test_date"), &FieldValue::Text("spring 2024".into()));
        assert_eq!(fields.text("test_date"), "spring 2024");
    }

    #[test]
    fn test_positions_from_joined_string_and_list_agree() {
        let joined = RawRecord::new().with("welding_positions", "PA, PB;PF");
        let listed = RawRecord::new().with(
            "welding_positions",
            vec!["PA".to_string(), "PB".to_string(), "PF".to_string()],
        );
        let a = normalize(&joined, DocumentType::Specification);
        let b = normalize(&listed, DocumentType::Specification);
        assert_eq!(a.get("welding_positions"), b.get("welding_positions"));
        assert_eq!(a.text("welding_positions"), "PA, PB, PF");
    }

    #[test]
    fn test_empty_positions_display_placeholder() {
        let fields = normalize(&RawRecord::new(), DocumentType::Specification);
        assert_eq!(fields.get("welding_positions"), &FieldValue::List(Vec::new()));
        assert_eq!(fields.text("welding_positions"), NOT_AVAILABLE);
    }

    #[test]
    fn test_unknown_key_is_not_available() {
        let fields = normalize(&RawRecord::new(), DocumentType::Specification);
        assert!(fields.get("no_such_field").is_not_available());
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(150.0), "150");
        assert_eq!(format_number(1.2), "1.2");
        assert_eq!(format_number(-20.0), "-20");
    }
}
