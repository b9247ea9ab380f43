pub mod certificates;
pub mod db;
pub mod migrations;

pub use certificates::{CertificateStore, SqliteCertificateStore, StoreError};
pub use db::Db;
