use actix_web::http::header::{ContentDisposition, DispositionParam, DispositionType};
use actix_web::{web, HttpResponse, Responder};
use chrono::Local;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::documents::{
    generate, DocumentSources, GenerateOptions, GeneratedDocument, GenerationError, Layout,
};
use crate::expiry::{group_expiring, ExpiringCertificatesResponse, DEFAULT_DAYS_AHEAD};
use crate::metrics;
use crate::normalize::DocumentType;
use crate::record::{RawRecord, RawValue};
use crate::{AppState, ErrorResponse};

#[derive(Deserialize, Debug, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct QualificationPdfQuery {
    /// Use the condensed single-section layout.
    #[serde(default)]
    pub simple: bool,
}

#[derive(Deserialize, Debug, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ExpiringQuery {
    /// Look-ahead window in days, 60 when omitted.
    pub days_ahead: Option<i64>,
}

#[derive(Serialize, Deserialize, Debug, ToSchema)]
pub struct HealthResponse {
    pub status: String,
}

fn error_response(err: &GenerationError) -> HttpResponse {
    let body = ErrorResponse::new(err.kind(), &err.to_string());
    match err {
        GenerationError::RecordNotFound { .. } | GenerationError::MissingRequiredRelation { .. } => {
            HttpResponse::NotFound().json(body)
        }
        GenerationError::Render { .. } | GenerationError::Store(_) => {
            HttpResponse::InternalServerError().json(body)
        }
    }
}

fn pdf_response(document: GeneratedDocument) -> HttpResponse {
    HttpResponse::Ok()
        .content_type(document.content_type)
        .insert_header(ContentDisposition {
            disposition: DispositionType::Attachment,
            parameters: vec![DispositionParam::Filename(document.filename)],
        })
        .body(document.pdf)
}

/// Looks up the owning organization; documents cannot be issued without one.
async fn owning_organization(
    state: &AppState,
    kind: DocumentType,
    id: i64,
    record: &RawRecord,
) -> Result<RawRecord, GenerationError> {
    let missing = || GenerationError::MissingRequiredRelation {
        kind,
        id,
        relation: "organization",
    };
    let company_id = record.reference("company_id").ok_or_else(missing)?;
    state.store.organization(company_id).await?.ok_or_else(missing)
}

/// Runs the CPU-bound generation off the async workers.
async fn generate_blocking(
    state: &AppState,
    kind: DocumentType,
    sources: DocumentSources,
    layout: Layout,
) -> HttpResponse {
    let styles = state.styles.clone();
    let options = GenerateOptions {
        layout,
        generated_at: Some(Local::now().naive_local()),
    };

    match web::block(move || generate(kind, &sources, &styles, &options)).await {
        Ok(Ok(document)) => pdf_response(document),
        Ok(Err(err)) => error_response(&err),
        Err(e) => {
            log::error!("Document generation task failed: {}", e);
            HttpResponse::InternalServerError()
                .json(ErrorResponse::internal_error("Document generation task failed"))
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/pdf/wps/{id}",
    tag = "Documents",
    params(
        ("id" = i64, Path, description = "Specification ID")
    ),
    responses(
        (status = 200, description = "Specification PDF (application/pdf)"),
        (status = 404, description = "Specification or its organization not found", body = ErrorResponse),
        (status = 500, description = "Rendering failed", body = ErrorResponse)
    )
)]
pub async fn get_specification_pdf(
    state: web::Data<AppState>,
    path: web::Path<i64>,
) -> impl Responder {
    let id = path.into_inner();
    let kind = DocumentType::Specification;

    let record = match state.store.specification(id).await {
        Ok(Some(record)) => record,
        Ok(None) => return error_response(&GenerationError::RecordNotFound { kind, id }),
        Err(e) => return error_response(&GenerationError::from(e)),
    };
    let organization = match owning_organization(&state, kind, id, &record).await {
        Ok(organization) => organization,
        Err(e) => return error_response(&e),
    };

    let sources = DocumentSources::new(record).with_organization(Some(organization));
    generate_blocking(&state, kind, sources, Layout::Detailed).await
}

#[utoipa::path(
    get,
    path = "/api/pdf/wpqr/{id}",
    tag = "Documents",
    params(
        ("id" = i64, Path, description = "Qualification record ID"),
        QualificationPdfQuery
    ),
    responses(
        (status = 200, description = "Qualification record PDF (application/pdf)"),
        (status = 404, description = "Record or its organization not found", body = ErrorResponse),
        (status = 500, description = "Rendering failed", body = ErrorResponse)
    )
)]
pub async fn get_qualification_pdf(
    state: web::Data<AppState>,
    path: web::Path<i64>,
    query: web::Query<QualificationPdfQuery>,
) -> impl Responder {
    let id = path.into_inner();
    let kind = DocumentType::QualificationRecord;

    let record = match state.store.qualification_record(id).await {
        Ok(Some(record)) => record,
        Ok(None) => return error_response(&GenerationError::RecordNotFound { kind, id }),
        Err(e) => return error_response(&GenerationError::from(e)),
    };
    let organization = match owning_organization(&state, kind, id, &record).await {
        Ok(organization) => organization,
        Err(e) => return error_response(&e),
    };

    // The linked specification is optional; its fields fall back to placeholders.
    let specification = match record.reference("wps_id") {
        Some(wps_id) => match state.store.specification(wps_id).await {
            Ok(specification) => specification,
            Err(e) => return error_response(&GenerationError::from(e)),
        },
        None => None,
    };

    let layout = if query.simple {
        Layout::Summary
    } else {
        Layout::Detailed
    };
    let sources = DocumentSources::new(record)
        .with_organization(Some(organization))
        .with_specification(specification);
    generate_blocking(&state, kind, sources, layout).await
}

#[utoipa::path(
    get,
    path = "/api/companies/{id}/expiring-certificates",
    tag = "Certificates",
    params(
        ("id" = i64, Path, description = "Company ID"),
        ExpiringQuery
    ),
    responses(
        (status = 200, description = "Valid certificates expiring within the window, grouped by urgency", body = ExpiringCertificatesResponse),
        (status = 400, description = "Negative look-ahead window", body = ErrorResponse),
        (status = 404, description = "Company not found", body = ErrorResponse)
    )
)]
pub async fn get_expiring_certificates(
    state: web::Data<AppState>,
    path: web::Path<i64>,
    query: web::Query<ExpiringQuery>,
) -> impl Responder {
    let company_id = path.into_inner();
    let days_ahead = query.days_ahead.unwrap_or(DEFAULT_DAYS_AHEAD);
    if days_ahead < 0 {
        return HttpResponse::BadRequest()
            .json(ErrorResponse::bad_request("days_ahead must not be negative"));
    }

    let company = match state.store.organization(company_id).await {
        Ok(Some(company)) => company,
        Ok(None) => {
            return HttpResponse::NotFound().json(ErrorResponse::not_found("Company not found"))
        }
        Err(e) => {
            log::error!("Failed to load company {}: {}", company_id, e);
            return HttpResponse::InternalServerError()
                .json(ErrorResponse::internal_error(&e.to_string()));
        }
    };

    let certificates = match state.store.certificates(company_id).await {
        Ok(certificates) => certificates,
        Err(e) => {
            log::error!("Failed to load certificates of company {}: {}", company_id, e);
            return HttpResponse::InternalServerError()
                .json(ErrorResponse::internal_error(&e.to_string()));
        }
    };

    let company_name = match company.get("name") {
        Some(RawValue::Text(name)) => name.clone(),
        _ => String::new(),
    };
    let today = Local::now().date_naive();
    let response = group_expiring(company_id, &company_name, &certificates, today, days_ahead);
    HttpResponse::Ok().json(response)
}

#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse)
    )
)]
pub async fn health() -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok".to_string(),
    })
}

#[utoipa::path(
    get,
    path = "/document-metrics",
    tag = "Health",
    responses(
        (status = 200, description = "Document counters in Prometheus text format"),
        (status = 500, description = "Encoding failed", body = ErrorResponse)
    )
)]
pub async fn document_metrics() -> impl Responder {
    match metrics::export() {
        Ok(text) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(text),
        Err(e) => {
            log::error!("Failed to export document metrics: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse::internal_error(&e.to_string()))
        }
    }
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/pdf/wps/{id}").route(web::get().to(get_specification_pdf)))
        .service(web::resource("/pdf/wpqr/{id}").route(web::get().to(get_qualification_pdf)))
        .service(
            web::resource("/companies/{id}/expiring-certificates")
                .route(web::get().to(get_expiring_certificates)),
        );
}
