use std::{fs, path::PathBuf, time::Duration};

use acme_lib::{
    Directory, DirectoryUrl,
    order::{Auth, NewOrder},
    persist::FilePersist,
};
use log::{debug, info, warn};

use super::{
    certificate::{KeyType, generate_private_key, leaf_fingerprint, leaf_not_after},
    dns::{PropagationState, record_name},
    dns_providers::{DnsProviderAdapter, poll_dns_propagation},
    issuer::{CertificateAuthority, IssuedCertificate, IssuerError},
};

/// Delay acme-lib waits between polls while the CA works on a request.
const ACME_POLL_MILLIS: u64 = 5000;
/// Authorization refresh rounds before the order is abandoned.
const MAX_VALIDATION_ROUNDS: usize = 10;

#[derive(Debug, Clone)]
pub struct AcmeSettings {
    pub directory_url: String,
    pub contact_email: String,
    /// Directory for the account key and acme-lib state.
    pub storage_path: PathBuf,
    pub key_type: KeyType,
    pub propagation_timeout: Duration,
    pub propagation_interval: Duration,
}

/// ACME DNS-01 certificate authority.
pub struct AcmeAuthority {
    settings: AcmeSettings,
    dns: Box<dyn DnsProviderAdapter>,
}

fn operation(err: acme_lib::Error) -> IssuerError {
    IssuerError::Operation(err.to_string())
}

impl AcmeAuthority {
    pub fn new(settings: AcmeSettings, dns: Box<dyn DnsProviderAdapter>) -> Self {
        Self { settings, dns }
    }

    fn open_order(&self, name: &str) -> Result<NewOrder<FilePersist>, IssuerError> {
        fs::create_dir_all(&self.settings.storage_path).map_err(|err| {
            IssuerError::InvalidConfig(format!(
                "cannot create ACME storage {}: {err}",
                self.settings.storage_path.display()
            ))
        })?;

        let persist = FilePersist::new(&self.settings.storage_path);
        let directory =
            Directory::from_url(persist, DirectoryUrl::Other(&self.settings.directory_url))
                .map_err(|err| IssuerError::Unavailable(err.to_string()))?;
        let account = directory
            .account(&self.settings.contact_email)
            .map_err(|err| IssuerError::Unavailable(err.to_string()))?;

        account.new_order(name, &[]).map_err(operation)
    }

    /// Publishes the TXT proof for one authorization and waits until public
    /// resolvers serve it. Returns the record name for cleanup.
    fn present_challenge(&self, auth: &Auth<FilePersist>) -> Result<String, IssuerError> {
        let challenge = auth.dns_challenge();
        let proof = challenge.dns_proof();
        let txt_name = record_name(auth.domain_name());

        self.dns
            .create_txt(&txt_name, &proof)
            .map_err(|err| IssuerError::Dns(format!("failed to create {txt_name}: {err}")))?;

        let result = poll_dns_propagation(
            &txt_name,
            &proof,
            self.settings.propagation_timeout,
            self.settings.propagation_interval,
        )
        .map_err(|err| IssuerError::Dns(err.to_string()))?;

        if result.state != PropagationState::Found {
            return Err(IssuerError::Dns(format!(
                "{txt_name} not visible after {}s ({})",
                self.settings.propagation_timeout.as_secs(),
                result.reason.unwrap_or_else(|| format!("{:?}", result.state))
            )));
        }

        info!("[acme] {txt_name} propagated, requesting validation");
        challenge.validate(ACME_POLL_MILLIS).map_err(operation)?;
        Ok(txt_name)
    }

    fn validate_order(
        &self,
        order: &mut NewOrder<FilePersist>,
        presented: &mut Vec<String>,
    ) -> Result<(), IssuerError> {
        for round in 0..MAX_VALIDATION_ROUNDS {
            if order.is_validated() {
                return Ok(());
            }
            let auths = order.authorizations().map_err(operation)?;
            for auth in &auths {
                if !auth.need_challenge() {
                    continue;
                }
                let txt_name = self.present_challenge(auth)?;
                if !presented.contains(&txt_name) {
                    presented.push(txt_name);
                }
            }
            debug!("[acme] validation round {} complete", round + 1);
            order.refresh().map_err(operation)?;
        }
        Err(IssuerError::Operation(format!(
            "order not validated after {MAX_VALIDATION_ROUNDS} rounds"
        )))
    }

    fn issue(
        &self,
        name: &str,
        presented: &mut Vec<String>,
    ) -> Result<IssuedCertificate, IssuerError> {
        let mut order = self.open_order(name)?;
        self.validate_order(&mut order, presented)?;

        let csr = order.confirm_validations().ok_or_else(|| {
            IssuerError::Operation("order validated but not ready for finalization".to_string())
        })?;

        let key_pem = generate_private_key(self.settings.key_type)
            .map_err(|err| IssuerError::Operation(err.to_string()))?;
        let certificate = csr
            .finalize(&key_pem, ACME_POLL_MILLIS)
            .map_err(operation)?
            .download_and_save_cert()
            .map_err(operation)?;

        let cert_pem = certificate.certificate().to_string();
        let not_after =
            leaf_not_after(&cert_pem).map_err(|err| IssuerError::Operation(err.to_string()))?;

        Ok(IssuedCertificate {
            cert_pem,
            key_pem: certificate.private_key().to_string(),
            not_after,
        })
    }
}

impl CertificateAuthority for AcmeAuthority {
    fn obtain(&self, name: &str) -> Result<IssuedCertificate, IssuerError> {
        info!("[acme] ordering certificate for {name}");
        let mut presented = Vec::new();
        let result = self.issue(name, &mut presented);

        for txt_name in &presented {
            if let Err(err) = self.dns.cleanup_txt(txt_name) {
                warn!("[acme] failed to clean up {txt_name}: {err}");
            }
        }

        match &result {
            Ok(issued) => {
                let fingerprint = leaf_fingerprint(&issued.cert_pem).unwrap_or_default();
                info!(
                    "[acme] issued {name}, valid until {} (sha256 {fingerprint})",
                    issued.not_after
                );
            }
            Err(err) => warn!("[acme] issuance for {name} failed: {err}"),
        }
        result
    }
}
