//! Provisioning pipeline: the six steps that take one issuance unit from
//! "hostnames without a usable certificate" to "HTTPS enforced and recorded".
//!
//! Every step either mutates the unit and returns `Ok`, skips because its
//! precondition does not hold, or fails hard. The failing [`Step`] is the
//! resume point for the retry.

use std::thread;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};

use crate::{
    context::ServiceContext,
    core::{
        errors::{StepError, StepFailure},
        types::{CertificateRecord, IssuanceUnit, Step},
    },
    storage::StoreError,
};

pub struct Pipeline<'a> {
    context: &'a ServiceContext,
    now: DateTime<Utc>,
}

impl<'a> Pipeline<'a> {
    pub fn new(context: &'a ServiceContext, now: DateTime<Utc>) -> Self {
        Self { context, now }
    }

    /// Fresh run from the first step.
    pub fn run(&self, unit: &mut IssuanceUnit) -> Result<(), StepFailure> {
        self.resume(Step::CheckLocal, unit)
    }

    /// Runs `from` and every later step, stopping at the first hard failure.
    pub fn resume(&self, from: Step, unit: &mut IssuanceUnit) -> Result<(), StepFailure> {
        for &step in from.chain() {
            debug!("[pipeline] {}: {step}", unit.parent_domain);
            if let Err(source) = self.execute(step, unit) {
                let failure = StepFailure::new(step, unit.parent_domain.clone(), source);
                error!("[pipeline] {failure}");
                return Err(failure);
            }
        }
        Ok(())
    }

    fn execute(&self, step: Step, unit: &mut IssuanceUnit) -> Result<(), StepError> {
        match step {
            Step::CheckLocal => self.check_local(unit),
            Step::CheckRemote => self.check_remote(unit),
            Step::Obtain => self.obtain(unit),
            Step::Upload => self.upload(unit),
            Step::ForceHttps => self.force_https(unit),
            Step::RemoveOld => self.remove_old(unit),
        }
    }

    fn check_local(&self, unit: &mut IssuanceUnit) -> Result<(), StepError> {
        match self.context.store.find_by_parent_domain(&unit.parent_domain) {
            Ok(record) => {
                unit.current_cert_id = record.cert_id;
                unit.not_after = Some(record.not_after);
            }
            Err(StoreError::NotFound(_)) => {
                unit.current_cert_id.clear();
                unit.not_after = None;
            }
            Err(err) => return Err(err.into()),
        }
        Ok(())
    }

    fn check_remote(&self, unit: &mut IssuanceUnit) -> Result<(), StepError> {
        if unit.current_cert_id.is_empty() {
            return Ok(());
        }
        let cert_id = unit.current_cert_id.clone();

        match self.context.cdn.get_certificate(&cert_id) {
            Ok(remote) if self.context.settings.renewal.needs_renewal(remote.not_after, self.now) => {
                info!(
                    "[pipeline] {}: certificate {cert_id} expires {}, renewing",
                    unit.parent_domain, remote.not_after
                );
                unit.stale_cert_id = cert_id;
                unit.current_cert_id.clear();
                unit.not_after = None;
            }
            Ok(remote) => {
                unit.not_after = Some(remote.not_after);
            }
            Err(err) if err.is_not_found() => {
                warn!(
                    "[pipeline] {}: certificate {cert_id} is gone from the CDN, forgetting it",
                    unit.parent_domain
                );
                match self.context.store.delete_record(&cert_id) {
                    Ok(()) | Err(StoreError::NotFound(_)) => {}
                    Err(err) => return Err(err.into()),
                }
                unit.current_cert_id.clear();
                unit.not_after = None;
            }
            Err(err) => return Err(err.into()),
        }
        Ok(())
    }

    fn obtain(&self, unit: &mut IssuanceUnit) -> Result<(), StepError> {
        if !unit.current_cert_id.is_empty() {
            return Ok(());
        }
        let name = unit.wildcard_name();
        info!("[pipeline] {}: requesting certificate for {name}", unit.parent_domain);
        let issued = self.context.authority.obtain(&name)?;
        unit.cert_pem = issued.cert_pem;
        unit.key_pem = issued.key_pem;
        unit.not_after = Some(issued.not_after);
        Ok(())
    }

    fn upload(&self, unit: &mut IssuanceUnit) -> Result<(), StepError> {
        if !unit.current_cert_id.is_empty() || unit.cert_pem.is_empty() {
            return Ok(());
        }
        let cert_id =
            self.context
                .cdn
                .upload_certificate(&unit.key_pem, &unit.cert_pem, &unit.parent_domain)?;
        info!("[pipeline] {}: uploaded certificate {cert_id}", unit.parent_domain);
        unit.current_cert_id = cert_id;
        Ok(())
    }

    fn force_https(&self, unit: &mut IssuanceUnit) -> Result<(), StepError> {
        if unit.current_cert_id.is_empty() {
            warn!(
                "[pipeline] {}: no certificate to bind, leaving {} hostname(s) pending",
                unit.parent_domain,
                unit.hostnames.len()
            );
            return Ok(());
        }
        let cert_id = unit.current_cert_id.clone();
        let delay = self.context.settings.activation_delay;

        let mut succeeded = Vec::new();
        let mut pending = Vec::new();
        for hostname in &unit.hostnames {
            if !delay.is_zero() {
                thread::sleep(delay);
            }
            match self.context.cdn.bind_and_enable_https(hostname, &cert_id) {
                Ok(()) => {
                    info!("[pipeline] {hostname}: HTTPS enabled with {cert_id}");
                    succeeded.push(hostname.clone());
                }
                Err(err) => {
                    warn!("[pipeline] {hostname}: HTTPS activation failed: {err}");
                    pending.push(hostname.clone());
                }
            }
        }

        // The unit keeps every hostname until the activations are stored, so
        // a resumed run binds and records them again.
        self.persist_activations(unit, &cert_id, succeeded)?;
        unit.hostnames = pending;
        Ok(())
    }

    /// Records activated hostnames against `cert_id`, creating the record when
    /// this certificate has never been persisted.
    fn persist_activations(
        &self,
        unit: &IssuanceUnit,
        cert_id: &str,
        succeeded: Vec<String>,
    ) -> Result<(), StepError> {
        let store = &self.context.store;
        match store.find_by_cert_id(cert_id) {
            Ok(_) => {
                if !succeeded.is_empty() {
                    store.append_domains(cert_id, &succeeded)?;
                }
            }
            Err(StoreError::NotFound(_)) => {
                let not_after = unit.not_after.ok_or_else(|| {
                    StoreError::Corrupt(format!("no expiry known for certificate {cert_id}"))
                })?;
                store.create_record(&CertificateRecord {
                    parent_domain: unit.parent_domain.clone(),
                    cert_id: cert_id.to_string(),
                    cert_pem: unit.cert_pem.clone(),
                    key_pem: unit.key_pem.clone(),
                    not_after,
                    domains: succeeded,
                })?;
            }
            Err(err) => return Err(err.into()),
        }
        Ok(())
    }

    fn remove_old(&self, unit: &mut IssuanceUnit) -> Result<(), StepError> {
        if unit.stale_cert_id.is_empty() {
            return Ok(());
        }
        match self.context.cdn.delete_certificate(&unit.stale_cert_id) {
            Ok(()) => info!(
                "[pipeline] {}: retired certificate {}",
                unit.parent_domain, unit.stale_cert_id
            ),
            Err(err) if err.is_not_found() => debug!(
                "[pipeline] {}: certificate {} already removed",
                unit.parent_domain, unit.stale_cert_id
            ),
            Err(err) => return Err(err.into()),
        }
        unit.stale_cert_id.clear();
        Ok(())
    }
}
