use actix_cors::Cors;
use actix_web::middleware::Compress;
use actix_web::{http::header, web, App, HttpServer};
use actix_web_prometheus::PrometheusMetricsBuilder;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

pub mod compose;
pub mod config;
pub mod documents;
pub mod expiry;
pub mod metrics;
pub mod normalize;
pub mod record;
pub mod render;
pub mod routes;
pub mod store;
pub mod style;

use crate::config::AppConfig;
use crate::store::{InMemoryStore, RecordStore};
use crate::style::StyleBinding;

#[derive(Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn new(error_type: &str, message: &str) -> Self {
        Self {
            error: error_type.to_string(),
            message: message.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn not_found(message: &str) -> Self {
        Self::new("NotFound", message)
    }

    pub fn bad_request(message: &str) -> Self {
        Self::new("BadRequest", message)
    }

    pub fn internal_error(message: &str) -> Self {
        Self::new("InternalServerError", message)
    }
}

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RecordStore>,
    pub styles: Arc<StyleBinding>,
}

impl AppState {
    pub fn new(store: Arc<dyn RecordStore>, styles: Arc<StyleBinding>) -> Self {
        Self { store, styles }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::get_specification_pdf,
        crate::routes::get_qualification_pdf,
        crate::routes::get_expiring_certificates,
        crate::routes::health,
        crate::routes::document_metrics
    ),
    components(
        schemas(
            ErrorResponse,
            routes::HealthResponse,
            expiry::ExpiringCertificatesResponse,
            expiry::ExpiringCertificate,
            expiry::UrgencyTier,
        )
    ),
    tags(
        (name = "Documents", description = "WPS and WPQR PDF generation."),
        (name = "Certificates", description = "Welder certificate expiry tracking."),
        (name = "Health", description = "Liveness probe.")
    ),
    servers(
        (url = "http://127.0.0.1:8080", description = "Local server")
    )
)]
pub struct ApiDoc;

async fn open_store(config: &AppConfig) -> anyhow::Result<InMemoryStore> {
    match &config.seed_file {
        Some(path) => InMemoryStore::load(path)
            .await
            .with_context(|| format!("loading seed file {}", path.display())),
        None => {
            log::warn!("SEED_FILE not set, starting with an empty record store");
            Ok(InMemoryStore::new())
        }
    }
}

pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok(); // Load .env file
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = AppConfig::from_env()?;
    let store: Arc<dyn RecordStore> = Arc::new(open_store(&config).await?);

    if let Some(dir) = &config.font_dir {
        log::info!("Looking for fonts in {} first", dir.display());
    }
    let styles = style::init_styles(config.font_dir.as_deref());
    log::info!(
        "Font roles: {:?} (family {}, unicode: {})",
        styles.role_names(),
        styles.family,
        styles.supports_unicode()
    );
    let app_state = web::Data::new(AppState::new(store, Arc::new(styles.clone())));

    let prometheus = PrometheusMetricsBuilder::new("weld_docs_server")
        .endpoint("/metrics")
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to create Prometheus metrics middleware: {}", e))?;

    log::info!(
        "Starting server at http://{}:{}",
        config.bind_address,
        config.port
    );

    let origins = config.allowed_origins.clone();
    HttpServer::new(move || {
        let app_state = app_state.clone();
        let prometheus = prometheus.clone();
        let cors = origins
            .iter()
            .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
            .allowed_methods(vec!["GET", "OPTIONS"])
            .allowed_headers(vec![header::ACCEPT, header::CONTENT_TYPE])
            .expose_headers(vec![header::CONTENT_DISPOSITION])
            .max_age(3600);

        App::new()
            .wrap(Compress::default())
            .wrap(prometheus)
            .wrap(cors)
            .app_data(app_state)
            .service(web::scope("/api").configure(routes::config))
            .service(web::resource("/health").route(web::get().to(routes::health)))
            .service(
                web::resource("/document-metrics").route(web::get().to(routes::document_metrics)),
            )
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-doc/openapi.json", ApiDoc::openapi()),
            )
    })
    .keep_alive(actix_web::http::KeepAlive::Os)
    .bind((config.bind_address.as_str(), config.port))?
    .run()
    .await?;

    Ok(())
}
