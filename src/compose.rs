//! Document composition.
//!
//! Turns canonical fields into an ordered list of layout blocks. Which field
//! lands in which cell is declared once per document type in the layout
//! tables below; nothing else projects fields into cells.

use serde::Serialize;

use crate::normalize::{CanonicalFields, DocumentType, FieldValue, NOT_AVAILABLE};
use crate::style::Verdict;

/// Shown instead of an empty range or an unset optional parameter.
pub const NOT_REQUIRED: &str = "Not required";

/// Maximum characters of free text kept inside a table cell.
pub const CELL_TEXT_LIMIT: usize = 30;
/// Header cells are wider and get a longer limit.
pub const HEADER_TEXT_LIMIT: usize = 60;
pub const ELLIPSIS: &str = "...";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Block {
    BandedHeader(BandedHeader),
    TitledTable(TitledTable),
    ParagraphPair(ParagraphPair),
    SignatureGrid(SignatureGrid),
}

/// Organization identity plus document number, revision and date.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BandedHeader {
    pub document_type: DocumentType,
    /// Relative column widths.
    pub widths: Vec<f32>,
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Column {
    pub header: String,
    pub width: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cell {
    pub text: String,
    /// Number of columns the cell covers.
    pub span: usize,
    /// Raw verdict string when the cell is coloured by outcome.
    pub verdict: Option<String>,
    pub emphasis: bool,
}

impl Cell {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            span: 1,
            verdict: None,
            emphasis: false,
        }
    }

    pub fn verdict(text: impl Into<String>, raw_verdict: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            span: 1,
            verdict: Some(raw_verdict.into()),
            emphasis: true,
        }
    }

    pub fn spanning(mut self, span: usize) -> Self {
        self.span = span;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TitledTable {
    pub document_type: DocumentType,
    pub title: String,
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<Cell>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Paragraph {
    pub heading: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParagraphPair {
    pub document_type: DocumentType,
    pub first: Paragraph,
    pub second: Paragraph,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignatureEntry {
    pub role: String,
    pub name: String,
    pub date: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignatureGrid {
    pub entries: Vec<SignatureEntry>,
    pub status: Option<String>,
}

/// How a cell obtains its text from canonical fields.
#[derive(Debug, Clone, Copy)]
enum CellSource {
    Field(&'static str),
    /// Prefix, field, suffix; affixes are dropped when the field is unset.
    Affix(&'static str, &'static str, &'static str),
    Range(&'static str, &'static str),
    /// Field text, or [`NOT_REQUIRED`] when no source supplied it.
    Optional(&'static str),
    /// Per-test verdict label, coloured by outcome.
    Verdict(&'static str),
    /// Whole-record verdict, upper-cased and coloured by outcome.
    Overall(&'static str),
    Literal(&'static str),
    ShieldingGas,
    Pwht,
}

struct TableLayout {
    title: &'static str,
    columns: &'static [(&'static str, f32)],
    /// A row of a single source spans every column.
    rows: &'static [&'static [CellSource]],
}

use CellSource::{Affix, Field, Literal, Optional, Overall, Pwht, Range, ShieldingGas};

const SPECIFICATION_TABLES: &[TableLayout] = &[
    TableLayout {
        title: "PROCESS DETAILS",
        columns: &[
            ("Welding Process", 1.0),
            ("Process Type", 1.0),
            ("Welding Positions", 1.0),
            ("Joint Design", 1.0),
            ("Backing", 1.0),
            ("Cleaning Method", 1.0),
        ],
        rows: &[&[
            Field("welding_process"),
            Field("process_type"),
            Field("welding_positions"),
            Field("joint_design"),
            Field("backing"),
            Field("cleaning"),
        ]],
    },
    TableLayout {
        title: "BASE MATERIALS",
        columns: &[
            ("Specification", 1.0),
            ("Type/Grade", 1.0),
            ("P-Number", 1.0),
            ("Group Number", 1.0),
            ("Thickness Range (mm)", 1.0),
        ],
        rows: &[&[
            Field("base_material_spec"),
            Field("base_material_grade"),
            Field("base_material_p_number"),
            Field("base_material_group"),
            Range("thickness_min", "thickness_max"),
        ]],
    },
    TableLayout {
        title: "FILLER MATERIALS",
        columns: &[
            ("Specification", 32.0),
            ("Classification", 32.0),
            ("F-Number", 32.0),
            ("A-Number", 32.0),
            ("Diameter (mm)", 30.0),
            ("Trade Name", 32.0),
        ],
        rows: &[&[
            Field("filler_spec"),
            Field("filler_classification"),
            Field("filler_f_number"),
            Field("filler_a_number"),
            Field("filler_diameter"),
            Field("filler_trade_name"),
        ]],
    },
    TableLayout {
        title: "ELECTRICAL PARAMETERS",
        columns: &[
            ("Current Type", 1.0),
            ("Amperage (A)", 1.0),
            ("Voltage (V)", 1.0),
            ("Travel Speed (mm/min)", 1.0),
            ("Heat Input (kJ/mm)", 1.0),
        ],
        rows: &[&[
            Field("current_type"),
            Range("current_min", "current_max"),
            Range("voltage_min", "voltage_max"),
            Range("travel_speed_min", "travel_speed_max"),
            Literal("As required"),
        ]],
    },
    TableLayout {
        title: "THERMAL & GAS PARAMETERS",
        columns: &[
            ("Shielding Gas", 1.0),
            ("Gas Flow (L/min)", 1.0),
            ("Preheat (°C)", 1.0),
            ("Interpass (°C)", 1.0),
            ("PWHT", 1.0),
        ],
        rows: &[&[
            ShieldingGas,
            Optional("gas_flow_rate"),
            Range("preheat_min", "preheat_max"),
            Range("interpass_min", "interpass_max"),
            Pwht,
        ]],
    },
];

const QUALIFICATION_TABLES: &[TableLayout] = &[
    TableLayout {
        title: "QUALIFICATION DETAILS",
        columns: &[
            ("Welding Code", 1.0),
            ("Base Material", 1.0),
            ("Welding Process", 1.0),
            ("Position", 1.0),
            ("Joint Type", 1.0),
        ],
        rows: &[&[
            Field("welding_code"),
            Field("base_material"),
            Field("welding_process"),
            Field("welding_position"),
            Field("joint_design"),
        ]],
    },
    TableLayout {
        title: "WELDER INFORMATION",
        columns: &[
            ("Welder Name", 1.0),
            ("Qualification", 1.0),
            ("Stamp Number", 1.0),
            ("Position Qualified", 1.0),
        ],
        rows: &[&[
            Field("welder_name"),
            Field("welder_qualification"),
            Field("welder_stamp_number"),
            Field("welding_position"),
        ]],
    },
    TableLayout {
        title: "ACTUAL WELDING PARAMETERS",
        columns: &[
            ("Current Type", 1.0),
            ("Amperage (A)", 1.0),
            ("Voltage (V)", 1.0),
            ("Travel Speed (mm/min)", 1.0),
            ("Heat Input (kJ/mm)", 1.0),
        ],
        rows: &[&[
            Field("current_type"),
            Field("actual_current"),
            Field("actual_voltage"),
            Field("actual_travel_speed"),
            Field("actual_heat_input"),
        ]],
    },
    TableLayout {
        title: "TEST RESULTS",
        columns: &[
            ("Test Type", 38.0),
            ("Result", 20.0),
            ("Value", 30.0),
            ("Standard", 30.0),
            ("Notes", 72.0),
        ],
        rows: &[
            &[
                Literal("Visual Inspection"),
                CellSource::Verdict("visual_result"),
                Literal("-"),
                Literal("-"),
                Field("visual_notes"),
            ],
            &[
                Literal("Tensile Test"),
                CellSource::Verdict("tensile_result"),
                Affix("", "tensile_strength", " MPa"),
                Literal("As per code"),
                Affix("Elongation: ", "elongation", "%"),
            ],
            &[
                Literal("Bend Test"),
                CellSource::Verdict("bend_result"),
                Affix("", "bend_angle", "°"),
                Field("bend_type"),
                Field("bend_notes"),
            ],
            &[
                Literal("Impact Test"),
                CellSource::Verdict("impact_result"),
                Affix("", "impact_energy", " J"),
                Affix("@ ", "impact_temperature", "°C"),
                Literal("Charpy V-notch"),
            ],
            &[
                Literal("Macro Examination"),
                CellSource::Verdict("macro_result"),
                Literal("-"),
                Literal("-"),
                Field("macro_notes"),
            ],
            &[
                Literal("NDT"),
                CellSource::Verdict("ndt_result"),
                Field("ndt_method"),
                Field("ndt_standard"),
                Affix("Report ", "ndt_report_number", ""),
            ],
        ],
    },
    TableLayout {
        title: "QUALIFICATION RESULT",
        columns: &[
            ("Valid From", 1.0),
            ("Valid Until", 1.0),
            ("Tested By", 1.0),
            ("Approved By", 1.0),
        ],
        rows: &[
            &[Overall("overall_result")],
            &[
                Field("valid_from"),
                Field("valid_until"),
                Field("tested_by"),
                Field("approved_by"),
            ],
        ],
    },
];

/// Condensed layout used by the single-pass summary document.
const SUMMARY_TABLES: &[TableLayout] = &[
    TableLayout {
        title: "RECORD",
        columns: &[("Item", 1.0), ("Value", 2.0)],
        rows: &[
            &[Literal("Organization code"), Field("organization_code")],
            &[Literal("Test date"), Field("test_date")],
            &[Literal("Result"), Overall("overall_result")],
        ],
    },
    TableLayout {
        title: "SPECIFICATION",
        columns: &[("Item", 1.0), ("Value", 2.0)],
        rows: &[
            &[Literal("WPS No"), Field("specification_number")],
            &[Literal("Process"), Field("welding_process")],
            &[Literal("Base material"), Field("base_material")],
            &[Literal("Thickness (mm)"), Field("base_metal_thickness")],
        ],
    },
    TableLayout {
        title: "WELDER AND PARAMETERS",
        columns: &[("Item", 1.0), ("Value", 2.0)],
        rows: &[
            &[Literal("Welder"), Field("welder_name")],
            &[Literal("Qualification"), Field("welder_qualification")],
            &[Literal("Current type"), Field("current_type")],
            &[Literal("Current (actual)"), Affix("", "actual_current", " A")],
            &[Literal("Voltage (actual)"), Affix("", "actual_voltage", " V")],
            &[Literal("Travel speed (actual)"), Affix("", "actual_travel_speed", " mm/min")],
        ],
    },
    TableLayout {
        title: "TESTS AND VALIDITY",
        columns: &[("Item", 1.0), ("Value", 2.0)],
        rows: &[
            &[Literal("Visual inspection"), CellSource::Verdict("visual_result")],
            &[Literal("Tensile strength"), Affix("", "tensile_strength", " MPa")],
            &[Literal("Elongation"), Affix("", "elongation", "%")],
            &[Literal("Bend test"), CellSource::Verdict("bend_result")],
            &[Literal("Impact energy"), Affix("", "impact_energy", " J")],
            &[Literal("Approved by"), Field("approved_by")],
            &[Literal("Valid from"), Field("valid_from")],
            &[Literal("Valid until"), Field("valid_until")],
        ],
    },
];

/// Composes the full, multi-block document.
pub fn compose(fields: &CanonicalFields, document_type: DocumentType) -> Vec<Block> {
    if fields.document_type() != document_type {
        log::warn!(
            "Composing {} from fields normalised as {}",
            document_type,
            fields.document_type()
        );
    }

    let tables = match document_type {
        DocumentType::Specification => SPECIFICATION_TABLES,
        DocumentType::QualificationRecord => QUALIFICATION_TABLES,
    };

    let mut overflow = Overflow::new();
    let mut blocks = Vec::with_capacity(tables.len() + 3);
    blocks.push(Block::BandedHeader(header(fields, document_type, &mut overflow)));
    for layout in tables {
        blocks.push(Block::TitledTable(table(fields, document_type, layout, &mut overflow)));
    }
    // Signatures may shorten names, so they are composed before the remarks.
    let signature_grid = signatures(fields, document_type, &mut overflow);
    blocks.push(Block::ParagraphPair(free_text(fields, document_type, &overflow)));
    blocks.push(Block::SignatureGrid(signature_grid));
    blocks
}

/// Composes the condensed single-section qualification summary.
pub fn compose_summary(fields: &CanonicalFields) -> Vec<Block> {
    let document_type = DocumentType::QualificationRecord;
    let mut overflow = Overflow::new();
    let mut blocks = vec![Block::BandedHeader(header(fields, document_type, &mut overflow))];
    for layout in SUMMARY_TABLES {
        blocks.push(Block::TitledTable(table(fields, document_type, layout, &mut overflow)));
    }
    blocks.push(Block::ParagraphPair(free_text(fields, document_type, &overflow)));
    blocks
}

/// Full text of every cell that had to be shortened, as `(label, text)`.
type Overflow = Vec<(String, String)>;

/// Shortens `text` to `limit` characters, recording the full value.
fn fit(text: String, limit: usize, label: &str, overflow: &mut Overflow) -> String {
    if text.chars().count() <= limit {
        return text;
    }
    let short = shorten(&text, limit);
    overflow.push((label.to_string(), text));
    short
}

fn header(
    fields: &CanonicalFields,
    document_type: DocumentType,
    overflow: &mut Overflow,
) -> BandedHeader {
    let code = document_type.code();
    let mut fitted = |label: &str, text: String| fit(text, HEADER_TEXT_LIMIT, label, overflow);

    let first_row = vec![
        fitted("Organization", fields.text("organization_name")),
        document_type.title().to_string(),
        fitted("Document number", format!("{code} No: {}", fields.text("document_number"))),
    ];
    let second_row = vec![
        fitted("Address", fields.text("organization_address")),
        fitted("Title", fields.text("title")),
        fitted("Revision", format!("Rev: {}", fields.text("revision"))),
    ];
    let third_row = match document_type {
        DocumentType::Specification => vec![
            fitted("Organization code", fields.text("organization_code")),
            fitted("Welding code", format!("Code: {}", fields.text("welding_code"))),
            fitted("Date", format!("Date: {}", fields.text("document_date"))),
        ],
        DocumentType::QualificationRecord => vec![
            fitted("Organization code", fields.text("organization_code")),
            fitted(
                "Qualified WPS",
                format!("Qualified WPS: {}", fields.text("specification_number")),
            ),
            fitted("Test date", format!("Test Date: {}", fields.text("test_date"))),
        ],
    };

    BandedHeader {
        document_type,
        widths: vec![60.0, 80.0, 50.0],
        rows: vec![first_row, second_row, third_row],
    }
}

fn table(
    fields: &CanonicalFields,
    document_type: DocumentType,
    layout: &TableLayout,
    overflow: &mut Overflow,
) -> TitledTable {
    let span_all = layout.columns.len();
    let mut rows = Vec::with_capacity(layout.rows.len());
    for row in layout.rows {
        let span = if row.len() == 1 { span_all } else { 1 };
        let mut cells = Vec::with_capacity(row.len());
        for (index, source) in row.iter().enumerate() {
            // Shortened text is listed under the row's own label when it has one.
            let label = match (span > 1, row.first()) {
                (true, _) => layout.title,
                (false, Some(Literal(name))) if index > 0 => *name,
                _ => layout.columns[index].0,
            };
            cells.push(cell(fields, *source, label, overflow).spanning(span));
        }
        rows.push(cells);
    }

    TitledTable {
        document_type,
        title: layout.title.to_string(),
        columns: layout
            .columns
            .iter()
            .map(|(header, width)| Column {
                header: header.to_string(),
                width: *width,
            })
            .collect(),
        rows,
    }
}

fn cell(fields: &CanonicalFields, source: CellSource, label: &str, overflow: &mut Overflow) -> Cell {
    let mut fitted = |text: String| fit(text, CELL_TEXT_LIMIT, label, overflow);
    match source {
        Field(key) => Cell::text(fitted(fields.text(key))),
        Affix(prefix, key, suffix) => {
            let value = fields.get(key);
            if value.is_not_available() {
                Cell::text(NOT_AVAILABLE)
            } else {
                Cell::text(fitted(format!("{prefix}{value}{suffix}")))
            }
        }
        Range(min, max) => Cell::text(fitted(format_range(fields, min, max))),
        Optional(key) => {
            if fields.is_defaulted(key) {
                Cell::text(NOT_REQUIRED)
            } else {
                Cell::text(fitted(fields.text(key)))
            }
        }
        CellSource::Verdict(key) => {
            let raw = verdict_source(fields.get(key));
            Cell::verdict(Verdict::parse(&raw).label(), raw)
        }
        Overall(key) => {
            let raw = verdict_source(fields.get(key));
            let shown = if raw.is_empty() {
                "PENDING".to_string()
            } else {
                raw.to_uppercase()
            };
            Cell::verdict(fitted(format!("OVERALL RESULT: {shown}")), raw)
        }
        Literal(text) => Cell::text(text),
        ShieldingGas => Cell::text(fitted(shielding_gas(fields))),
        Pwht => Cell::text(fitted(pwht(fields))),
    }
}

/// Verdict text without the placeholder sentinel.
fn verdict_source(value: &FieldValue) -> String {
    if value.is_not_available() {
        String::new()
    } else {
        value.to_string()
    }
}

/// `"<min> - <max>"`, or [`NOT_REQUIRED`] when neither bound was supplied.
pub fn format_range(fields: &CanonicalFields, min_key: &str, max_key: &str) -> String {
    let min = (!fields.is_defaulted(min_key)).then(|| fields.text(min_key));
    let max = (!fields.is_defaulted(max_key)).then(|| fields.text(max_key));
    match (min, max) {
        (Some(min), Some(max)) => format!("{min} - {max}"),
        (Some(min), None) => format!("min {min}"),
        (None, Some(max)) => format!("max {max}"),
        (None, None) => NOT_REQUIRED.to_string(),
    }
}

fn shielding_gas(fields: &CanonicalFields) -> String {
    let parts: Vec<String> = ["shielding_gas_type", "shielding_gas_composition"]
        .iter()
        .filter(|key| !fields.is_defaulted(key))
        .map(|key| fields.text(key))
        .collect();
    if parts.is_empty() {
        NOT_REQUIRED.to_string()
    } else {
        parts.join(" ")
    }
}

fn pwht(fields: &CanonicalFields) -> String {
    if fields.is_defaulted("pwht_temperature") {
        return NOT_REQUIRED.to_string();
    }
    let time = fields.get("pwht_time");
    if time.is_not_available() {
        format!("{}°C", fields.text("pwht_temperature"))
    } else {
        format!("{}°C / {}h", fields.text("pwht_temperature"), time)
    }
}

/// Shortens text for a fixed-width cell. Applying it twice changes nothing.
pub fn truncate_cell_text(text: &str) -> String {
    shorten(text, CELL_TEXT_LIMIT)
}

fn shorten(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let kept: String = text.chars().take(limit).collect();
    format!("{kept}{ELLIPSIS}")
}

fn free_text(
    fields: &CanonicalFields,
    document_type: DocumentType,
    overflow: &[(String, String)],
) -> ParagraphPair {
    match document_type {
        DocumentType::Specification => {
            let mut technique = fields.text("technique");
            if !fields.is_defaulted("joint_preparation") {
                technique.push_str(&format!(
                    "\n\nJoint preparation: {}",
                    fields.text("joint_preparation")
                ));
            }
            ParagraphPair {
                document_type,
                first: Paragraph {
                    heading: "WELDING TECHNIQUE".to_string(),
                    body: technique,
                },
                second: Paragraph {
                    heading: "REMARKS".to_string(),
                    body: with_overflow(fields.text("remarks"), overflow),
                },
            }
        }
        DocumentType::QualificationRecord => {
            let qualified = format!(
                "Thickness range: {}\nPositions: {}\nMaterials: {}",
                fields.text("qualified_thickness_range"),
                fields.text("qualified_positions"),
                fields.text("qualified_materials"),
            );

            let mut remarks = fields.text("remarks");
            for (label, key) in [
                ("Visual inspection", "visual_notes"),
                ("Bend test", "bend_notes"),
                ("Macro examination", "macro_notes"),
            ] {
                if !fields.is_defaulted(key) {
                    remarks.push_str(&format!("\n\n{label}: {}", fields.text(key)));
                }
            }

            ParagraphPair {
                document_type,
                first: Paragraph {
                    heading: "QUALIFIED RANGE".to_string(),
                    body: qualified,
                },
                second: Paragraph {
                    heading: "REMARKS".to_string(),
                    body: with_overflow(remarks, overflow),
                },
            }
        }
    }
}

/// Appends the full text of shortened cells not already quoted in `remarks`.
fn with_overflow(mut remarks: String, overflow: &[(String, String)]) -> String {
    for (label, full) in overflow {
        if !remarks.contains(full.as_str()) {
            remarks.push_str(&format!("\n\n{label}: {full}"));
        }
    }
    remarks
}

fn signatures(
    fields: &CanonicalFields,
    document_type: DocumentType,
    overflow: &mut Overflow,
) -> SignatureGrid {
    let mut entry = |role: &str, name: &str, date: String| SignatureEntry {
        role: role.to_string(),
        name: fit(fields.text(name), CELL_TEXT_LIMIT, role, overflow),
        date: fit(date, CELL_TEXT_LIMIT, role, overflow),
    };

    match document_type {
        DocumentType::Specification => {
            let entries = vec![
                entry("PREPARED BY", "prepared_by", fields.text("document_date")),
                entry("APPROVED BY", "approved_by", fields.text("approved_date")),
            ];
            let status = fit(
                fields.text("status").to_uppercase(),
                CELL_TEXT_LIMIT,
                "Status",
                overflow,
            );
            SignatureGrid {
                entries,
                status: Some(status),
            }
        }
        DocumentType::QualificationRecord => SignatureGrid {
            entries: vec![
                entry("TESTED BY", "tested_by", fields.text("test_date")),
                entry("WITNESSED BY", "witnessed_by", fields.text("test_date")),
                entry("APPROVED BY", "approved_by", fields.text("approved_date")),
            ],
            status: None,
        },
    }
}
