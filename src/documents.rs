//! Document generation pipeline.
//!
//! Normalises the source records, composes the layout and renders it. The
//! caller resolves relations beforehand; a missing organization is tolerated
//! here and simply shows up as placeholders.

use chrono::NaiveDateTime;
use thiserror::Error;

use crate::compose::{compose, compose_summary};
use crate::metrics;
use crate::normalize::{normalize, CanonicalFields, DocumentType};
use crate::record::RawRecord;
use crate::render::{render, PageConfig, RenderError};
use crate::store::StoreError;
use crate::style::StyleBinding;

pub const PDF_CONTENT_TYPE: &str = "application/pdf";

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("{kind} {id} not found")]
    RecordNotFound { kind: DocumentType, id: i64 },

    #[error("{kind} {id} has no {relation}")]
    MissingRequiredRelation {
        kind: DocumentType,
        id: i64,
        relation: &'static str,
    },

    #[error("failed to render {kind} {}: {source}", display_id(.id))]
    Render {
        kind: DocumentType,
        id: Option<i64>,
        #[source]
        source: RenderError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

fn display_id(id: &Option<i64>) -> String {
    id.map_or_else(|| "without id".to_string(), |id| id.to_string())
}

impl GenerationError {
    /// Failure kind reported to clients.
    pub fn kind(&self) -> &'static str {
        match self {
            GenerationError::RecordNotFound { .. } => "NotFound",
            GenerationError::MissingRequiredRelation { .. } => "MissingRequiredRelation",
            GenerationError::Render { .. } => "RenderFailure",
            GenerationError::Store(_) => "StoreError",
        }
    }
}

/// Result of a successful document generation.
#[derive(Debug)]
pub struct GeneratedDocument {
    pub filename: String,
    pub pdf: Vec<u8>,
    pub content_type: &'static str,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Layout {
    #[default]
    Detailed,
    /// Condensed key/value layout; qualification records only.
    Summary,
}

/// The record to render plus its already-resolved relations.
#[derive(Debug, Clone, Default)]
pub struct DocumentSources {
    pub record: RawRecord,
    pub organization: Option<RawRecord>,
    /// Linked specification of a qualification record.
    pub specification: Option<RawRecord>,
}

impl DocumentSources {
    pub fn new(record: RawRecord) -> Self {
        Self {
            record,
            ..Self::default()
        }
    }

    pub fn with_organization(mut self, organization: Option<RawRecord>) -> Self {
        self.organization = organization;
        self
    }

    pub fn with_specification(mut self, specification: Option<RawRecord>) -> Self {
        self.specification = specification;
        self
    }

    /// Flattened view handed to the normaliser.
    fn flatten(&self) -> RawRecord {
        self.record
            .clone()
            .with_relation("organization", self.organization.as_ref())
            .with_relation("wps", self.specification.as_ref())
    }
}

#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub layout: Layout,
    /// Footer timestamp; `None` omits it.
    pub generated_at: Option<NaiveDateTime>,
}

pub fn generate(
    document_type: DocumentType,
    sources: &DocumentSources,
    styles: &StyleBinding,
    options: &GenerateOptions,
) -> Result<GeneratedDocument, GenerationError> {
    let id = sources.record.id();
    let fields = normalize(&sources.flatten(), document_type);

    let blocks = match (options.layout, document_type) {
        (Layout::Summary, DocumentType::QualificationRecord) => compose_summary(&fields),
        (Layout::Summary, DocumentType::Specification) => {
            log::debug!("Summary layout not available for {}, using detailed", document_type);
            compose(&fields, document_type)
        }
        (Layout::Detailed, _) => compose(&fields, document_type),
    };

    let filename = document_filename(document_type, &fields, id);
    let page = PageConfig {
        generated_at: options.generated_at,
        title: filename.trim_end_matches(".pdf").to_string(),
        ..PageConfig::default()
    };

    let pdf = render(&blocks, styles, &page).map_err(|source| {
        metrics::record_render_failure(document_type);
        log::error!("Rendering {} {:?} failed: {}", document_type, id, source);
        GenerationError::Render {
            kind: document_type,
            id,
            source,
        }
    })?;

    metrics::record_generated(document_type);
    log::info!(
        "Generated {} ({} bytes, {} fields from aliases)",
        filename,
        pdf.len(),
        fields.iter().filter(|(_, f)| f.source.is_some()).count()
    );

    Ok(GeneratedDocument {
        filename,
        pdf,
        content_type: PDF_CONTENT_TYPE,
    })
}

/// `<CODE>_<document number or id>.pdf`.
pub fn document_filename(
    document_type: DocumentType,
    fields: &CanonicalFields,
    id: Option<i64>,
) -> String {
    let number = (!fields.is_defaulted("document_number"))
        .then(|| sanitize_filename::sanitize(fields.text("document_number").trim()))
        .filter(|n| !n.is_empty());

    let stem = match (number, id) {
        (Some(number), _) => number,
        (None, Some(id)) => id.to_string(),
        (None, None) => "unnumbered".to_string(),
    };
    format!("{}_{}.pdf", document_type.code(), stem)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filename_prefers_document_number() {
        let raw = RawRecord::new().with("id", 4_i64).with("wpqr_number", "WPQR/2024:07");
        let fields = normalize(&raw, DocumentType::QualificationRecord);
        let name = document_filename(DocumentType::QualificationRecord, &fields, raw.id());
        assert!(name.starts_with("WPQR_"));
        assert!(name.ends_with(".pdf"));
        assert!(!name.contains('/'));
        assert!(!name.contains(':'));
    }

    #[test]
    fn test_filename_falls_back_to_id() {
        let raw = RawRecord::new().with("id", 12_i64);
        let fields = normalize(&raw, DocumentType::Specification);
        assert_eq!(
            document_filename(DocumentType::Specification, &fields, raw.id()),
            "WPS_12.pdf"
        );
    }

    #[test]
    fn test_generate_without_organization_still_succeeds() {
        let sources = DocumentSources::new(RawRecord::new().with("id", 1_i64));
        let doc = generate(
            DocumentType::Specification,
            &sources,
            &StyleBinding::builtin(),
            &GenerateOptions::default(),
        )
        .unwrap();
        assert_eq!(doc.filename, "WPS_1.pdf");
        assert_eq!(doc.content_type, PDF_CONTENT_TYPE);
        assert!(doc.pdf.starts_with(b"%PDF"));
    }

    #[test]
    fn test_linked_specification_fills_qualification_fields() {
        let sources = DocumentSources::new(RawRecord::new().with("id", 2_i64))
            .with_specification(Some(
                RawRecord::new()
                    .with("wps_number", "WPS-77")
                    .with("welding_process", "135"),
            ));
        let fields = normalize(&sources.flatten(), DocumentType::QualificationRecord);
        assert_eq!(fields.text("specification_number"), "WPS-77");
        assert_eq!(fields.text("welding_process"), "135");
    }

    #[test]
    fn test_error_kinds() {
        let err = GenerationError::RecordNotFound {
            kind: DocumentType::Specification,
            id: 3,
        };
        assert_eq!(err.kind(), "NotFound");
        assert_eq!(err.to_string(), "WPS 3 not found");
    }
}
