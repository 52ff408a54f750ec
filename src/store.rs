//! Record persistence interface.
//!
//! The document pipeline only ever sees [`RawRecord`]s; where they come from
//! is up to the [`RecordStore`] implementation. [`InMemoryStore`] serves
//! records from a JSON seed file and backs the tests.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

use crate::expiry::{Certificate, HeldCertificate, Welder};
use crate::record::RawRecord;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read seed file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse seed data: {0}")]
    Parse(#[from] serde_json::Error),
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn specification(&self, id: i64) -> Result<Option<RawRecord>, StoreError>;

    async fn qualification_record(&self, id: i64) -> Result<Option<RawRecord>, StoreError>;

    async fn organization(&self, id: i64) -> Result<Option<RawRecord>, StoreError>;

    /// Certificates of one company together with their holders.
    async fn certificates(&self, company_id: i64) -> Result<Vec<HeldCertificate>, StoreError>;
}

/// Shape of the seed file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SeedData {
    pub organizations: Vec<RawRecord>,
    pub specifications: Vec<RawRecord>,
    pub qualification_records: Vec<RawRecord>,
    pub welders: Vec<Welder>,
    pub certificates: Vec<Certificate>,
}

#[derive(Default)]
struct Tables {
    organizations: HashMap<i64, RawRecord>,
    specifications: HashMap<i64, RawRecord>,
    qualification_records: HashMap<i64, RawRecord>,
    welders: HashMap<i64, Welder>,
    certificates: Vec<Certificate>,
}

#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn load(path: &Path) -> Result<Self, StoreError> {
        let raw = tokio::fs::read_to_string(path).await?;
        let seed: SeedData = serde_json::from_str(&raw)?;
        let store = Self::from_seed(seed);
        log::info!("Seeded record store from {}", path.display());
        Ok(store)
    }

    pub fn from_seed(seed: SeedData) -> Self {
        let store = Self::new();
        for record in seed.organizations {
            store.insert_organization(record);
        }
        for record in seed.specifications {
            store.insert_specification(record);
        }
        for record in seed.qualification_records {
            store.insert_qualification_record(record);
        }
        for welder in seed.welders {
            store.insert_welder(welder);
        }
        for certificate in seed.certificates {
            store.insert_certificate(certificate);
        }
        store
    }

    pub fn insert_organization(&self, record: RawRecord) {
        insert_keyed(&mut self.tables.write().organizations, record, "organization");
    }

    pub fn insert_specification(&self, record: RawRecord) {
        insert_keyed(&mut self.tables.write().specifications, record, "specification");
    }

    pub fn insert_qualification_record(&self, record: RawRecord) {
        insert_keyed(
            &mut self.tables.write().qualification_records,
            record,
            "qualification record",
        );
    }

    pub fn insert_welder(&self, welder: Welder) {
        self.tables.write().welders.insert(welder.id, welder);
    }

    pub fn insert_certificate(&self, certificate: Certificate) {
        self.tables.write().certificates.push(certificate);
    }
}

fn insert_keyed(table: &mut HashMap<i64, RawRecord>, record: RawRecord, kind: &str) {
    match record.id() {
        Some(id) => {
            table.insert(id, record);
        }
        None => log::warn!("Skipping {} without an id", kind),
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn specification(&self, id: i64) -> Result<Option<RawRecord>, StoreError> {
        Ok(self.tables.read().specifications.get(&id).cloned())
    }

    async fn qualification_record(&self, id: i64) -> Result<Option<RawRecord>, StoreError> {
        Ok(self.tables.read().qualification_records.get(&id).cloned())
    }

    async fn organization(&self, id: i64) -> Result<Option<RawRecord>, StoreError> {
        Ok(self.tables.read().organizations.get(&id).cloned())
    }

    async fn certificates(&self, company_id: i64) -> Result<Vec<HeldCertificate>, StoreError> {
        let tables = self.tables.read();
        let held = tables
            .certificates
            .iter()
            .filter(|c| c.company_id == company_id)
            .filter_map(|c| match tables.welders.get(&c.welder_id) {
                Some(welder) => Some(HeldCertificate {
                    certificate: c.clone(),
                    welder: welder.clone(),
                }),
                None => {
                    log::warn!(
                        "Certificate {} references unknown welder {}",
                        c.id,
                        c.welder_id
                    );
                    None
                }
            })
            .collect();
        Ok(held)
    }
}
