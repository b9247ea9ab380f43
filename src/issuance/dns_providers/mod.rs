use anyhow::{Result, anyhow};

use crate::{
    config::{DnsConfig, DnsProviderKind},
    domain::{normalize_domain_for_storage, root_from_hostname},
    issuance::dns::CHALLENGE_PREFIX,
};

mod aliyun;
mod cloudflare;
mod retry;

pub use aliyun::AliyunDnsAdapter;
pub use cloudflare::CloudflareAdapter;
pub use retry::{poll_dns_propagation, retry_provider_verification};

/// Creates and removes `_acme-challenge` TXT records at a DNS host.
pub trait DnsProviderAdapter: Send + Sync {
    fn create_txt(&self, record_name: &str, value: &str) -> Result<()>;
    fn cleanup_txt(&self, record_name: &str) -> Result<()>;
}

pub fn adapter_for_config(config: &DnsConfig) -> Result<Box<dyn DnsProviderAdapter>> {
    match config.provider {
        DnsProviderKind::Aliyun => {
            if config.access_key_id.is_empty() || config.access_key_secret.is_empty() {
                return Err(anyhow!("Aliyun DNS provider missing access key"));
            }
            Ok(Box::new(AliyunDnsAdapter::new(
                config.access_key_id.clone(),
                config.access_key_secret.clone(),
                config.zone.clone(),
            )))
        }
        DnsProviderKind::Cloudflare => {
            if config.api_token.is_empty() {
                return Err(anyhow!("Cloudflare provider missing API token"));
            }
            Ok(Box::new(CloudflareAdapter::new(
                config.api_token.clone(),
                config.zone.clone(),
            )))
        }
    }
}

pub(crate) fn matches_zone(domain_suffix: &str, zone_name: &str) -> bool {
    let domain_suffix = match normalize_domain_for_storage(domain_suffix) {
        Ok(value) => value,
        Err(_) => return false,
    };
    let zone_name = match normalize_domain_for_storage(zone_name) {
        Ok(value) => value,
        Err(_) => return false,
    };
    zone_name == domain_suffix || domain_suffix.ends_with(&format!(".{zone_name}"))
}

/// Zone that hosts `record_name`: the configured override, else the
/// registrable root of the challenged name.
pub(crate) fn zone_for_record(record_name: &str, zone_override: Option<&str>) -> String {
    if let Some(zone) = zone_override.filter(|zone| !zone.trim().is_empty()) {
        return zone.trim().trim_end_matches('.').to_string();
    }
    let challenged = record_name
        .trim_end_matches('.')
        .strip_prefix(CHALLENGE_PREFIX)
        .unwrap_or(record_name);
    root_from_hostname(challenged)
}

/// Host label of `record_name` relative to `zone` (`@` for the apex).
pub(crate) fn relative_name(record_name: &str, zone: &str) -> String {
    let record = record_name.trim_end_matches('.');
    let zone = zone.trim_end_matches('.');
    if record == zone {
        return "@".to_string();
    }
    record
        .strip_suffix(&format!(".{zone}"))
        .unwrap_or(record)
        .to_string()
}
