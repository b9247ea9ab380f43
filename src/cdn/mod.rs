//! CDN provider seam: the hostnames we manage and the certificates bound to them.

use chrono::{DateTime, Utc};
use thiserror::Error;

pub mod auth;
pub mod qiniu;

pub use qiniu::QiniuClient;

#[derive(Debug, Error)]
pub enum CdnError {
    /// Expected absence: the provider does not know this certificate id.
    #[error("certificate {0} not found on provider")]
    CertificateNotFound(String),
    #[error("provider request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("unexpected provider response: {0}")]
    Decode(String),
    #[error("provider request signing failed: {0}")]
    Auth(String),
}

impl CdnError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CdnError::CertificateNotFound(_))
    }
}

/// Certificate as the provider reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCertificate {
    pub cert_id: String,
    pub name: String,
    pub common_name: String,
    pub dns_names: Vec<String>,
    pub not_before: Option<DateTime<Utc>>,
    pub not_after: DateTime<Utc>,
}

pub trait CdnProvider: Send + Sync {
    fn list_hostnames(&self) -> Result<Vec<String>, CdnError>;

    /// Uploads a certificate and returns the id the provider assigned to it.
    fn upload_certificate(&self, key_pem: &str, cert_pem: &str, name: &str)
    -> Result<String, CdnError>;

    /// Returns [`CdnError::CertificateNotFound`] when the id is unknown.
    fn get_certificate(&self, cert_id: &str) -> Result<RemoteCertificate, CdnError>;

    fn delete_certificate(&self, cert_id: &str) -> Result<(), CdnError>;

    /// Binds `cert_id` to `hostname` and switches the hostname to HTTPS.
    fn bind_and_enable_https(&self, hostname: &str, cert_id: &str) -> Result<(), CdnError>;
}
