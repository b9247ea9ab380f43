//! Partitions CDN hostnames into issuance units.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use log::{debug, warn};
use thiserror::Error;

use crate::{
    cdn::{CdnError, CdnProvider},
    core::types::{IssuanceUnit, RenewalPolicy},
    domain::parent_domain,
    storage::{CertificateStore, StoreError},
};

/// Parent domain to the hostnames under it, in listing order.
pub type DomainGroups = BTreeMap<String, Vec<String>>;

#[derive(Debug, Error)]
pub enum GroupingError {
    #[error("failed to list CDN hostnames: {0}")]
    Cdn(#[from] CdnError),
    #[error("failed to read stored certificate for {parent_domain}: {source}")]
    Store {
        parent_domain: String,
        #[source]
        source: StoreError,
    },
}

/// Groups hostnames by parent domain. Names without a parent are skipped
/// with a warning; duplicates collapse onto their first occurrence.
pub fn group_by_parent(hostnames: &[String]) -> DomainGroups {
    let mut groups = DomainGroups::new();
    let mut seen = HashSet::new();

    for hostname in hostnames {
        let Some(parent) = parent_domain(hostname) else {
            warn!("[grouper] skipping {hostname:?}: no parent domain");
            continue;
        };
        if !seen.insert(hostname.as_str()) {
            continue;
        }
        groups.entry(parent).or_default().push(hostname.clone());
    }
    groups
}

/// Drops hostnames already covered by a comfortably valid stored certificate.
/// A record inside the renewal window keeps its whole group so the unit goes
/// through renewal. Groups left empty are removed.
pub fn filter_stale(
    groups: DomainGroups,
    store: &dyn CertificateStore,
    policy: &RenewalPolicy,
    now: DateTime<Utc>,
) -> Result<DomainGroups, GroupingError> {
    let mut pending = DomainGroups::new();

    for (parent, hostnames) in groups {
        let hostnames = match store.list_domains_and_expiry(&parent) {
            Ok((not_after, stored)) if policy.is_comfortably_valid(not_after, now) => {
                let stored: HashSet<&str> = stored.iter().map(String::as_str).collect();
                hostnames
                    .into_iter()
                    .filter(|hostname| !stored.contains(hostname.as_str()))
                    .collect()
            }
            Ok((not_after, _)) => {
                debug!("[grouper] {parent} expires {not_after}, reprocessing whole group");
                hostnames
            }
            Err(StoreError::NotFound(_)) => hostnames,
            Err(source) => {
                return Err(GroupingError::Store {
                    parent_domain: parent,
                    source,
                });
            }
        };

        if hostnames.is_empty() {
            debug!("[grouper] {parent} has nothing to do");
            continue;
        }
        pending.insert(parent, hostnames);
    }

    Ok(pending)
}

/// Lists provider hostnames and returns one unit per parent domain that needs
/// action this pass.
pub fn build_units(
    cdn: &dyn CdnProvider,
    store: &dyn CertificateStore,
    policy: &RenewalPolicy,
    now: DateTime<Utc>,
) -> Result<Vec<IssuanceUnit>, GroupingError> {
    let hostnames = cdn.list_hostnames()?;
    let groups = group_by_parent(&hostnames);
    let pending = filter_stale(groups, store, policy, now)?;
    Ok(pending
        .into_iter()
        .map(|(parent, hostnames)| IssuanceUnit::new(parent, hostnames))
        .collect())
}
