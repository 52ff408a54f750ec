mod common;

use actix_web::{http::header, http::StatusCode, test, web, App};
use weld_docs_server::expiry::{ExpiringCertificatesResponse, UrgencyTier};
use weld_docs_server::routes::{self, HealthResponse};
use weld_docs_server::ErrorResponse;

macro_rules! test_app {
    () => {
        test::init_service(
            App::new()
                .app_data(web::Data::new(common::test_state()))
                .service(web::scope("/api").configure(routes::config))
                .route("/health", web::get().to(routes::health))
                .route("/document-metrics", web::get().to(routes::document_metrics)),
        )
        .await
    };
}

#[actix_web::test]
async fn test_specification_pdf_download() {
    let app = test_app!();
    let req = test::TestRequest::get().uri("/api/pdf/wps/10").to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), StatusCode::OK);
    let content_type = resp.headers().get(header::CONTENT_TYPE).unwrap();
    assert_eq!(content_type, "application/pdf");
    let disposition = resp
        .headers()
        .get(header::CONTENT_DISPOSITION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(disposition.starts_with("attachment"));
    assert!(disposition.contains("WPS_WPS-010.pdf"));

    let body = test::read_body(resp).await;
    assert!(body.starts_with(b"%PDF"));
}

#[actix_web::test]
async fn test_unknown_specification_is_not_found() {
    let app = test_app!();
    let req = test::TestRequest::get().uri("/api/pdf/wps/404").to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: ErrorResponse = test::read_body_json(resp).await;
    assert_eq!(body.error, "NotFound");
}

#[actix_web::test]
async fn test_specification_without_organization_is_rejected() {
    let app = test_app!();
    let req = test::TestRequest::get().uri("/api/pdf/wps/11").to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: ErrorResponse = test::read_body_json(resp).await;
    assert_eq!(body.error, "MissingRequiredRelation");
    assert!(body.message.contains("organization"));
}

#[actix_web::test]
async fn test_qualification_pdf_layouts() {
    let app = test_app!();

    for uri in ["/api/pdf/wpqr/20", "/api/pdf/wpqr/20?simple=true"] {
        let req = test::TestRequest::get().uri(uri).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK, "{uri}");
        let disposition = resp
            .headers()
            .get(header::CONTENT_DISPOSITION)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(disposition.contains("WPQR_WPQR-020.pdf"));
        let body = test::read_body(resp).await;
        assert!(body.starts_with(b"%PDF"));
    }
}

#[actix_web::test]
async fn test_unknown_qualification_record_is_not_found() {
    let app = test_app!();
    let req = test::TestRequest::get().uri("/api/pdf/wpqr/7").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn test_expiring_certificates_grouped_by_urgency() {
    let app = test_app!();
    let req = test::TestRequest::get()
        .uri("/api/companies/1/expiring-certificates")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let body: ExpiringCertificatesResponse = test::read_body_json(resp).await;
    assert_eq!(body.company_id, 1);
    assert_eq!(body.company_name, "Acme Fabrication");
    assert_eq!(body.total_expiring, 2);

    assert_eq!(body.critical.len(), 1);
    let overdue = &body.critical[0];
    assert_eq!(overdue.certificate_id, 1);
    assert_eq!(overdue.days_until_expiry, -3);
    assert_eq!(overdue.urgency_level, UrgencyTier::Critical);
    assert_eq!(overdue.welder_name, "Ivan Petrov");

    assert_eq!(body.urgent.len(), 1);
    assert_eq!(body.urgent[0].days_until_expiry, 40);
    assert!(body.warning.is_empty());
}

#[actix_web::test]
async fn test_expiring_certificates_wider_window() {
    let app = test_app!();
    let req = test::TestRequest::get()
        .uri("/api/companies/1/expiring-certificates?days_ahead=365")
        .to_request();
    let body: ExpiringCertificatesResponse = test::call_and_read_body_json(&app, req).await;

    assert_eq!(body.total_expiring, 3);
    assert_eq!(body.warning.len(), 1);
    assert_eq!(body.warning[0].certificate_id, 3);
    assert_eq!(body.warning[0].expiry_date, common::today() + chrono::Duration::days(200));
}

#[actix_web::test]
async fn test_expiring_certificates_unknown_company() {
    let app = test_app!();
    let req = test::TestRequest::get()
        .uri("/api/companies/42/expiring-certificates")
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: ErrorResponse = test::read_body_json(resp).await;
    assert_eq!(body.message, "Company not found");
}

#[actix_web::test]
async fn test_expiring_certificates_negative_window() {
    let app = test_app!();
    let req = test::TestRequest::get()
        .uri("/api/companies/1/expiring-certificates?days_ahead=-1")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn test_health() {
    let app = test_app!();
    let req = test::TestRequest::get().uri("/health").to_request();
    let body: HealthResponse = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body.status, "ok");
}

#[actix_web::test]
async fn test_document_metrics_count_generated_pdfs() {
    let app = test_app!();
    let req = test::TestRequest::get().uri("/api/pdf/wps/10").to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

    let req = test::TestRequest::get().uri("/document-metrics").to_request();
    let body = test::call_and_read_body(&app, req).await;
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("weld_docs_server_documents_generated_total{kind=\"WPS\"}"));
}
