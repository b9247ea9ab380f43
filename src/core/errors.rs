use thiserror::Error;

use crate::{
    cdn::CdnError, core::types::Step, issuance::issuer::IssuerError, storage::StoreError,
};

/// Error raised by a collaborator while a pipeline step runs.
#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Cdn(#[from] CdnError),
    #[error(transparent)]
    Issuer(#[from] IssuerError),
}

/// A unit's hard failure: the step that failed (the resume point) and why.
#[derive(Debug, Error)]
#[error("{parent_domain}: step {step} failed: {source}")]
pub struct StepFailure {
    pub step: Step,
    pub parent_domain: String,
    #[source]
    pub source: StepError,
}

impl StepFailure {
    pub fn new(step: Step, parent_domain: impl Into<String>, source: impl Into<StepError>) -> Self {
        Self {
            step,
            parent_domain: parent_domain.into(),
            source: source.into(),
        }
    }
}
