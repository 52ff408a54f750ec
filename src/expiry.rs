//! Certificate expiry classification.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Days below which a certificate is critical.
pub const CRITICAL_DAYS: i64 = 30;
/// Days below which a certificate is urgent.
pub const URGENT_DAYS: i64 = 60;
/// Default look-ahead window of the expiring-certificates query.
pub const DEFAULT_DAYS_AHEAD: i64 = 60;

/// Only certificates with this status are considered.
const ACTIVE_STATUS: &str = "valid";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum UrgencyTier {
    /// Under 30 days left, including already expired.
    Critical,
    Urgent,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub days_until_expiry: i64,
    pub tier: UrgencyTier,
}

/// Days left until `expiry` as of `as_of` and the resulting tier.
pub fn classify(expiry: NaiveDate, as_of: NaiveDate) -> Classification {
    let days_until_expiry = (expiry - as_of).num_days();
    let tier = if days_until_expiry < CRITICAL_DAYS {
        UrgencyTier::Critical
    } else if days_until_expiry < URGENT_DAYS {
        UrgencyTier::Urgent
    } else {
        UrgencyTier::Warning
    };
    Classification {
        days_until_expiry,
        tier,
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
pub struct Welder {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
}

impl Welder {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
pub struct Certificate {
    pub id: i64,
    pub welder_id: i64,
    pub company_id: i64,
    pub certificate_number: String,
    pub welding_group: String,
    pub welding_method: String,
    pub expiry_date: NaiveDate,
    #[serde(default = "default_status")]
    pub status: String,
}

fn default_status() -> String {
    "Valid".to_string()
}

/// A certificate paired with its holder, as handed over by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct HeldCertificate {
    pub certificate: Certificate,
    pub welder: Welder,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
pub struct ExpiringCertificate {
    pub certificate_id: i64,
    pub welder_name: String,
    pub certificate_number: String,
    pub welding_group: String,
    pub welding_method: String,
    pub expiry_date: NaiveDate,
    pub days_until_expiry: i64,
    pub urgency_level: UrgencyTier,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
pub struct ExpiringCertificatesResponse {
    pub company_id: i64,
    pub company_name: String,
    pub total_expiring: usize,
    pub critical: Vec<ExpiringCertificate>,
    pub urgent: Vec<ExpiringCertificate>,
    pub warning: Vec<ExpiringCertificate>,
}

/// Groups the company's valid certificates expiring on or before
/// `as_of + days_ahead` by urgency tier. Input order is kept within a tier.
pub fn group_expiring(
    company_id: i64,
    company_name: &str,
    certificates: &[HeldCertificate],
    as_of: NaiveDate,
    days_ahead: i64,
) -> ExpiringCertificatesResponse {
    let cutoff = as_of + Duration::days(days_ahead);

    let mut response = ExpiringCertificatesResponse {
        company_id,
        company_name: company_name.to_string(),
        total_expiring: 0,
        critical: Vec::new(),
        urgent: Vec::new(),
        warning: Vec::new(),
    };

    for held in certificates {
        let cert = &held.certificate;
        if cert.company_id != company_id
            || !cert.status.trim().eq_ignore_ascii_case(ACTIVE_STATUS)
            || cert.expiry_date > cutoff
        {
            continue;
        }

        let classification = classify(cert.expiry_date, as_of);
        let entry = ExpiringCertificate {
            certificate_id: cert.id,
            welder_name: held.welder.display_name(),
            certificate_number: cert.certificate_number.clone(),
            welding_group: cert.welding_group.clone(),
            welding_method: cert.welding_method.clone(),
            expiry_date: cert.expiry_date,
            days_until_expiry: classification.days_until_expiry,
            urgency_level: classification.tier,
        };

        match classification.tier {
            UrgencyTier::Critical => response.critical.push(entry),
            UrgencyTier::Urgent => response.urgent.push(entry),
            UrgencyTier::Warning => response.warning.push(entry),
        }
        response.total_expiring += 1;
    }

    log::debug!(
        "Company {}: {} expiring certificate(s) within {} days ({} critical, {} urgent, {} warning)",
        company_id,
        response.total_expiring,
        days_ahead,
        response.critical.len(),
        response.urgent.len(),
        response.warning.len()
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 10).unwrap()
    }

    fn held(id: i64, days: i64, status: &str) -> HeldCertificate {
        HeldCertificate {
            certificate: Certificate {
                id,
                welder_id: 1,
                company_id: 3,
                certificate_number: format!("NAKS-{id:04}"),
                welding_group: "NGDO".to_string(),
                welding_method: "RD".to_string(),
                expiry_date: as_of() + Duration::days(days),
                status: status.to_string(),
            },
            welder: Welder {
                id: 1,
                first_name: "Ivan".to_string(),
                last_name: "Petrov".to_string(),
            },
        }
    }

    #[test]
    fn test_tier_boundaries() {
        let cases = [
            (-5, UrgencyTier::Critical),
            (0, UrgencyTier::Critical),
            (29, UrgencyTier::Critical),
            (30, UrgencyTier::Urgent),
            (59, UrgencyTier::Urgent),
            (60, UrgencyTier::Warning),
            (61, UrgencyTier::Warning),
        ];
        for (days, tier) in cases {
            let c = classify(as_of() + Duration::days(days), as_of());
            assert_eq!(c.days_until_expiry, days);
            assert_eq!(c.tier, tier, "{days} days");
        }
    }

    #[test]
    fn test_grouping_applies_cutoff_and_status() {
        let certs = vec![
            held(1, -5, "Valid"),
            held(2, 45, "valid"),
            held(3, 60, "Valid"),
            held(4, 61, "Valid"),
            held(5, 10, "Revoked"),
        ];
        let response = group_expiring(3, "Acme", &certs, as_of(), DEFAULT_DAYS_AHEAD);
        assert_eq!(response.total_expiring, 3);
        assert_eq!(response.critical.len(), 1);
        assert_eq!(response.critical[0].days_until_expiry, -5);
        assert_eq!(response.urgent[0].certificate_id, 2);
        assert_eq!(response.warning[0].certificate_id, 3);
        assert_eq!(response.critical[0].welder_name, "Ivan Petrov");
    }

    #[test]
    fn test_other_company_is_ignored() {
        let certs = vec![held(1, 5, "Valid")];
        let response = group_expiring(99, "Other", &certs, as_of(), DEFAULT_DAYS_AHEAD);
        assert_eq!(response.total_expiring, 0);
    }

    #[test]
    fn test_response_serialises_tier_in_lowercase() {
        let certs = vec![held(1, 5, "Valid")];
        let response = group_expiring(3, "Acme", &certs, as_of(), DEFAULT_DAYS_AHEAD);
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["critical"][0]["urgency_level"], "critical");
        assert_eq!(json["critical"][0]["expiry_date"], "2025-01-15");
    }
}
