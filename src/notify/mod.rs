//! Operator alerting.

use thiserror::Error;

pub mod email;
pub mod report;

pub use email::EmailNotifier;
pub use report::{AlertMessage, FailedUnit};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("failed to build alert: {0}")]
    Build(String),
    #[error("failed to deliver alert: {0}")]
    Transport(String),
}

/// Best-effort alert sink. Callers log a failed delivery and move on.
pub trait Notifier: Send + Sync {
    fn notify(&self, subject: &str, text: &str, html: &str) -> Result<(), NotifyError>;
}

/// Writes alerts to the log; used when no mail server is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, subject: &str, text: &str, _html: &str) -> Result<(), NotifyError> {
        log::warn!("[alert] {subject}\n{text}");
        Ok(())
    }
}
