use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Working set for one parent domain during one reconciliation pass.
///
/// Built fresh by the grouper and discarded at the end of the pass; anything
/// that has to survive a pass lives in the certificate store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssuanceUnit {
    /// Grouping and issuance key; the certificate covers `*.parent_domain`.
    pub parent_domain: String,
    /// Hostnames still waiting for HTTPS activation. Pruned as they succeed.
    pub hostnames: Vec<String>,
    /// Certificate bound to this unit, empty when none is usable yet.
    pub current_cert_id: String,
    /// Previous certificate to retire once the replacement is active.
    pub stale_cert_id: String,
    pub cert_pem: String,
    pub key_pem: String,
    /// Expiry of the certificate behind `current_cert_id`, when known.
    pub not_after: Option<DateTime<Utc>>,
}

impl IssuanceUnit {
    pub fn new(parent_domain: impl Into<String>, hostnames: Vec<String>) -> Self {
        Self {
            parent_domain: parent_domain.into(),
            hostnames,
            ..Self::default()
        }
    }

    pub fn wildcard_name(&self) -> String {
        format!("*.{}", self.parent_domain)
    }
}

/// Persistent certificate record, one per parent domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRecord {
    pub parent_domain: String,
    /// Identifier assigned by the CDN provider on upload.
    pub cert_id: String,
    pub cert_pem: String,
    pub key_pem: String,
    pub not_after: DateTime<Utc>,
    /// Hostnames HTTPS-enforced under `cert_id`.
    pub domains: Vec<String>,
}

/// Provisioning steps in execution order.
///
/// A failing step doubles as the resume code: a retry re-enters the sequence
/// at the step that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Step {
    CheckLocal,
    CheckRemote,
    Obtain,
    Upload,
    ForceHttps,
    RemoveOld,
}

impl Step {
    pub const ORDERED: [Step; 6] = [
        Step::CheckLocal,
        Step::CheckRemote,
        Step::Obtain,
        Step::Upload,
        Step::ForceHttps,
        Step::RemoveOld,
    ];

    /// Position of this step in [`Step::ORDERED`]; the start index of a resume.
    pub fn index(self) -> usize {
        match self {
            Step::CheckLocal => 0,
            Step::CheckRemote => 1,
            Step::Obtain => 2,
            Step::Upload => 3,
            Step::ForceHttps => 4,
            Step::RemoveOld => 5,
        }
    }

    /// The steps a run starting at `self` executes.
    pub fn chain(self) -> &'static [Step] {
        &Self::ORDERED[self.index()..]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Step::CheckLocal => "check-local",
            Step::CheckRemote => "check-remote",
            Step::Obtain => "obtain",
            Step::Upload => "upload",
            Step::ForceHttps => "force-https",
            Step::RemoveOld => "remove-old",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decides when a certificate stops being "comfortably valid".
///
/// Shared by the grouper's staleness filter and the pipeline's remote expiry
/// check so both agree on the same boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenewalPolicy {
    threshold: Duration,
}

impl RenewalPolicy {
    pub const DEFAULT_THRESHOLD_DAYS: i64 = 20;

    pub fn new(threshold: Duration) -> Self {
        Self { threshold }
    }

    pub fn from_days(days: i64) -> Self {
        Self::new(Duration::days(days))
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// True once `not_after` is within the threshold of `now` (or already past).
    pub fn needs_renewal(&self, not_after: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        not_after - now <= self.threshold
    }

    pub fn is_comfortably_valid(&self, not_after: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        !self.needs_renewal(not_after, now)
    }
}

impl Default for RenewalPolicy {
    fn default() -> Self {
        Self::from_days(Self::DEFAULT_THRESHOLD_DAYS)
    }
}
