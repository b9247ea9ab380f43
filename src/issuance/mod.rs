pub mod acme_workflow;
pub mod certificate;
pub mod dns;
pub mod dns_providers;
pub mod issuer;

pub use acme_workflow::{AcmeAuthority, AcmeSettings};
pub use issuer::{CertificateAuthority, IssuedCertificate, IssuerError};
