pub mod cdn;
pub mod config;
pub mod context;
pub mod core;
pub mod domain;
pub mod http;
pub mod issuance;
pub mod notify;
pub mod reconcile;
pub mod storage;
