//! License gate.
//!
//! License rows live in a separate sheet with the columns
//! `key | email | status | expiry (YYYY-MM-DD)` starting at row 2.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::record::pad_row;
use crate::store::{DocumentStore, RawRow};

/// Range holding the license rows, below a one-row header.
pub const LICENSE_RANGE: &str = "A2:D";

const LICENSE_FIELDS: usize = 4;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LicenseStatus {
    Active,
    Other(String),
}

impl LicenseStatus {
    fn parse(s: &str) -> Self {
        if s == "ACTIVE" {
            LicenseStatus::Active
        } else {
            LicenseStatus::Other(s.to_string())
        }
    }
}

/// One license row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LicenseRecord {
    pub key: String,
    pub owner_email: String,
    pub status: LicenseStatus,
    /// `None` when the stored expiry is not a `YYYY-MM-DD` date.
    pub expiry: Option<NaiveDate>,
}

impl LicenseRecord {
    /// Build a record from a raw row, padding missing trailing fields.
    pub fn from_row(row: &[String]) -> Self {
        let fields = pad_row(row, LICENSE_FIELDS);
        LicenseRecord {
            key: fields[0].clone(),
            owner_email: fields[1].clone(),
            status: LicenseStatus::parse(&fields[2]),
            expiry: NaiveDate::parse_from_str(fields[3].trim(), "%Y-%m-%d").ok(),
        }
    }
}

/// Whether a license must belong to the claimant's email.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailBinding {
    #[default]
    Enforced,
    Disabled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DenyReason {
    /// No email was given before the key
    EmailMissing,
    ReadFailed,
    NotFound,
    Inactive,
    WrongEmail,
    Expired,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            DenyReason::EmailMissing => "Enter your email",
            DenyReason::ReadFailed => "Cannot read license database",
            DenyReason::NotFound => "License not found",
            DenyReason::Inactive => "License inactive",
            DenyReason::WrongEmail => "Wrong email",
            DenyReason::Expired => "License expired",
        };
        f.write_str(msg)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LicenseDecision {
    Authorized,
    Denied(DenyReason),
}

impl LicenseDecision {
    pub fn is_authorized(&self) -> bool {
        matches!(self, LicenseDecision::Authorized)
    }
}

/// Decide whether `key` grants access to `claimant_email`.
///
/// The first row carrying `key` decides; later rows with the same key are
/// never consulted. Checks run in order: status, email, expiry. A license is
/// valid through the whole of its expiry day.
///
/// # Arguments
/// * `key` - License key typed by the user
/// * `claimant_email` - Email the user identified with
/// * `rows` - License rows below the header
/// * `binding` - Whether the license must belong to `claimant_email`
/// * `today` - Date the expiry is compared against
///
/// # Returns
/// * `LicenseDecision` - Authorized, or the first failed check
pub fn validate(
    key: &str,
    claimant_email: &str,
    rows: &[RawRow],
    binding: EmailBinding,
    today: NaiveDate,
) -> LicenseDecision {
    if key.is_empty() {
        return LicenseDecision::Denied(DenyReason::NotFound);
    }

    let Some(license) = rows
        .iter()
        .map(|row| LicenseRecord::from_row(row))
        .find(|license| license.key == key)
    else {
        return LicenseDecision::Denied(DenyReason::NotFound);
    };

    if license.status != LicenseStatus::Active {
        return LicenseDecision::Denied(DenyReason::Inactive);
    }
    if binding == EmailBinding::Enforced && license.owner_email != claimant_email {
        return LicenseDecision::Denied(DenyReason::WrongEmail);
    }
    match license.expiry {
        Some(expiry) if today <= expiry => LicenseDecision::Authorized,
        _ => LicenseDecision::Denied(DenyReason::Expired),
    }
}

/// Read the license sheet and validate `key` against it.
///
/// A failed read is reported as its own denial, distinct from "not found".
pub async fn check_license(
    store: &dyn DocumentStore,
    license_sheet_id: &str,
    key: &str,
    claimant_email: &str,
    binding: EmailBinding,
    today: NaiveDate,
) -> LicenseDecision {
    let rows = match store.read_range(license_sheet_id, LICENSE_RANGE).await {
        Ok(rows) => rows,
        Err(e) => {
            log::error!("license sheet read failed: {}", e);
            return LicenseDecision::Denied(DenyReason::ReadFailed);
        }
    };

    let decision = validate(key, claimant_email, &rows, binding, today);
    log::info!("license check for {}: {:?}", claimant_email, decision);
    decision
}
