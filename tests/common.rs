use chrono::{Duration, Local, NaiveDate};
use std::sync::Arc;
use weld_docs_server::expiry::{Certificate, Welder};
use weld_docs_server::record::RawRecord;
use weld_docs_server::store::InMemoryStore;
use weld_docs_server::style::StyleBinding;
use weld_docs_server::AppState;

pub fn organization() -> RawRecord {
    RawRecord::new()
        .with("id", 1_i64)
        .with("name", "Acme Fabrication")
        .with("address", "12 Foundry Lane")
        .with("code", "ACM")
}

pub fn specification() -> RawRecord {
    RawRecord::new()
        .with("id", 10_i64)
        .with("company_id", 1_i64)
        .with("wps_number", "WPS-010")
        .with("title", "Butt weld, carbon steel pipe")
        .with("welding_code", "ISO 15614-1")
        .with("welding_process", "135")
        .with("welding_positions", "PA, PC; PF")
        .with("base_material_spec", "S355J2")
        .with("thickness_range_min", 3.0)
        .with("thickness_range_max", 12.0)
        .with("amperage_range_min", 110.0)
        .with("amperage_range_max", 160.0)
        .with("voltage_range_min", 19.0)
        .with("voltage_range_max", 24.0)
        .with("date_prepared", "2024-03-15")
        .with("prepared_by", "A. Smirnov")
}

pub fn qualification_record() -> RawRecord {
    RawRecord::new()
        .with("id", 20_i64)
        .with("company_id", 1_i64)
        .with("wps_id", 10_i64)
        .with("wpqr_number", "WPQR-020")
        .with("test_date", "15.03.2024")
        .with("welder_name", "Ivan Petrov")
        .with("amperage_actual", 135.0)
        .with("visual_inspection_result", "Pass")
        .with("tensile_test_result", "pass")
        .with("tensile_strength_mpa", 512.0)
        .with("bend_test_result", "Pass")
        .with("overall_result", "Qualified")
}

pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

pub fn certificate(id: i64, days_left: i64, status: &str) -> Certificate {
    Certificate {
        id,
        welder_id: 5,
        company_id: 1,
        certificate_number: format!("C-{id}"),
        welding_group: "NGDO".to_string(),
        welding_method: "RD".to_string(),
        expiry_date: today() + Duration::days(days_left),
        status: status.to_string(),
    }
}

pub fn seeded_store() -> InMemoryStore {
    let store = InMemoryStore::new();
    store.insert_organization(organization());
    store.insert_specification(specification());
    store.insert_qualification_record(qualification_record());
    // Specification whose organization does not exist.
    store.insert_specification(
        RawRecord::new()
            .with("id", 11_i64)
            .with("company_id", 99_i64)
            .with("wps_number", "WPS-011"),
    );
    store.insert_welder(Welder {
        id: 5,
        first_name: "Ivan".to_string(),
        last_name: "Petrov".to_string(),
    });
    store.insert_certificate(certificate(1, -3, "Valid"));
    store.insert_certificate(certificate(2, 40, "Valid"));
    store.insert_certificate(certificate(3, 200, "Valid"));
    store.insert_certificate(certificate(4, 10, "Expired"));
    store
}

pub fn test_state() -> AppState {
    AppState::new(
        Arc::new(seeded_store()),
        Arc::new(StyleBinding::builtin()),
    )
}
