//! Document generation counters.
//!
//! The counters live for the whole process in their own registry, exported
//! by [`export`]. HTTP request metrics are collected by the middleware.

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

use crate::normalize::DocumentType;

const NAMESPACE: &str = "weld_docs_server";

lazy_static! {
    pub static ref DOCUMENTS_GENERATED: IntCounterVec = IntCounterVec::new(
        Opts::new("documents_generated_total", "Documents generated, by kind").namespace(NAMESPACE),
        &["kind"]
    )
    .expect("documents_generated_total is a valid metric");
    pub static ref RENDER_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new("render_failures_total", "Document renders that failed, by kind")
            .namespace(NAMESPACE),
        &["kind"]
    )
    .expect("render_failures_total is a valid metric");
    static ref REGISTRY: Registry = {
        let registry = Registry::new();
        register(&registry).expect("document counters register once");
        registry
    };
}

pub fn register(registry: &Registry) -> prometheus::Result<()> {
    registry.register(Box::new(DOCUMENTS_GENERATED.clone()))?;
    registry.register(Box::new(RENDER_FAILURES.clone()))?;
    Ok(())
}

/// Prometheus text exposition of the document counters.
pub fn export() -> prometheus::Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

pub fn record_generated(kind: DocumentType) {
    DOCUMENTS_GENERATED.with_label_values(&[kind.code()]).inc();
}

pub fn record_render_failure(kind: DocumentType) {
    RENDER_FAILURES.with_label_values(&[kind.code()]).inc();
}
