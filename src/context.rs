//! Collaborator handles for a reconciliation pass and their hot reload.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, SystemTime},
};

use anyhow::{Context, Result};
use log::{error, info};

use crate::{
    cdn::{CdnProvider, QiniuClient, auth::QboxCredentials},
    config::AppConfig,
    core::types::RenewalPolicy,
    issuance::{AcmeAuthority, AcmeSettings, CertificateAuthority, dns_providers::adapter_for_config},
    notify::{EmailNotifier, LogNotifier, Notifier},
    storage::{CertificateStore, Db, SqliteCertificateStore},
};

/// Tunables a pass reads from its context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassSettings {
    pub renewal: RenewalPolicy,
    /// Pause before each hostname activation call.
    pub activation_delay: Duration,
    pub pass_interval: Duration,
}

impl Default for PassSettings {
    fn default() -> Self {
        Self {
            renewal: RenewalPolicy::default(),
            activation_delay: Duration::from_secs(3),
            pass_interval: Duration::from_secs(300),
        }
    }
}

/// Everything one pass talks to. Built whole and never mutated; a reload
/// builds a replacement.
#[derive(Clone)]
pub struct ServiceContext {
    pub cdn: Arc<dyn CdnProvider>,
    pub store: Arc<dyn CertificateStore>,
    pub authority: Arc<dyn CertificateAuthority>,
    pub notifier: Arc<dyn Notifier>,
    pub settings: PassSettings,
}

impl ServiceContext {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let credentials =
            QboxCredentials::new(config.qiniu.access_key.clone(), config.qiniu.secret_key.clone());
        let cdn = QiniuClient::new(credentials)
            .with_base_url(config.qiniu.base_url.clone())
            .with_timeout(Duration::from_secs(config.schedule.http_timeout_secs))
            .with_https_options(config.qiniu.force_https, config.qiniu.http2);

        let db = Db::initialize_with_path(&config.store.path)?;
        let store = SqliteCertificateStore::new(db);

        let dns = adapter_for_config(&config.dns)?;
        let authority = AcmeAuthority::new(
            AcmeSettings {
                directory_url: config.acme.directory_url.clone(),
                contact_email: config.acme.email.clone(),
                storage_path: config.acme.storage_path.clone(),
                key_type: config.acme.key_type,
                propagation_timeout: Duration::from_secs(config.acme.propagation_timeout_secs),
                propagation_interval: Duration::from_secs(config.acme.propagation_interval_secs),
            },
            dns,
        );

        let notifier: Arc<dyn Notifier> = match &config.email {
            Some(email) => Arc::new(
                EmailNotifier::from_config(email).context("failed to configure alert email")?,
            ),
            None => {
                info!("[config] no [email] section; alerts will only be logged");
                Arc::new(LogNotifier)
            }
        };

        Ok(Self {
            cdn: Arc::new(cdn),
            store: Arc::new(store),
            authority: Arc::new(authority),
            notifier,
            settings: PassSettings {
                renewal: config.renewal_policy(),
                activation_delay: config.activation_delay(),
                pass_interval: config.pass_interval(),
            },
        })
    }
}

type Builder = Box<dyn Fn(&AppConfig) -> Result<ServiceContext> + Send>;

/// Owns the current context and swaps in a new one when the config file
/// changes. Only called between passes.
pub struct ContextLoader {
    path: PathBuf,
    loaded_mtime: Option<SystemTime>,
    current: Arc<ServiceContext>,
    build: Builder,
}

impl ContextLoader {
    pub fn load(path: &Path) -> Result<Self> {
        Self::with_builder(path, Box::new(ServiceContext::from_config))
    }

    pub fn with_builder(path: &Path, build: Builder) -> Result<Self> {
        let loaded_mtime = modified(path);
        let config = AppConfig::from_file(path)?;
        info!("[config] loaded {}: {config}", path.display());
        let current = Arc::new(build(&config)?);
        Ok(Self {
            path: path.to_path_buf(),
            loaded_mtime,
            current,
            build,
        })
    }

    pub fn current(&self) -> Arc<ServiceContext> {
        Arc::clone(&self.current)
    }

    /// Rebuilds the context when the file's modification time moved. A file
    /// that fails to parse or build leaves the current context in place.
    /// Returns whether a new context was installed.
    pub fn reload_if_changed(&mut self) -> bool {
        let mtime = modified(&self.path);
        if mtime.is_none() || mtime == self.loaded_mtime {
            return false;
        }
        // Remember the attempt so a broken file is not re-parsed every pass.
        self.loaded_mtime = mtime;

        let rebuilt = AppConfig::from_file(&self.path)
            .map_err(anyhow::Error::from)
            .and_then(|config| {
                let context = (self.build)(&config)?;
                Ok((config, context))
            });
        match rebuilt {
            Ok((config, context)) => {
                self.current = Arc::new(context);
                info!("[config] reloaded {}: {config}", self.path.display());
                true
            }
            Err(err) => {
                error!(
                    "[config] reload of {} failed, keeping previous configuration: {err:#}",
                    self.path.display()
                );
                false
            }
        }
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|meta| meta.modified()).ok()
}
