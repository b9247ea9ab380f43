use chrono::{DateTime, Utc};
use thiserror::Error;

/// Certificate authority seam used by the provisioning pipeline.
pub trait CertificateAuthority: Send + Sync {
    /// Runs a complete issuance for `name` (usually `*.parent`) and returns
    /// the PEM chain with its matching private key.
    fn obtain(&self, name: &str) -> Result<IssuedCertificate, IssuerError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCertificate {
    pub cert_pem: String,
    pub key_pem: String,
    pub not_after: DateTime<Utc>,
}

#[derive(Error, Debug)]
pub enum IssuerError {
    #[error("issuer unavailable: {0}")]
    Unavailable(String),
    #[error("issuer configuration invalid: {0}")]
    InvalidConfig(String),
    #[error("issuer operation failed: {0}")]
    Operation(String),
    #[error("DNS challenge failed: {0}")]
    Dns(String),
}
