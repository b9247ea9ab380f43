use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use log::{debug, info};
use reqwest::blocking::RequestBuilder;
use serde::{Deserialize, Serialize};

use super::{DnsProviderAdapter, matches_zone, retry_provider_verification};
use crate::http::{self, HttpClient};
use crate::issuance::dns::CHALLENGE_PREFIX;

const API_BASE: &str = "https://api.cloudflare.com/client/v4";
const IDENTICAL_RECORD_EXISTS: u32 = 81058;

pub struct CloudflareAdapter {
    api_token: String,
    zone_override: Option<String>,
    /// Zone name to zone id.
    zone_cache: Mutex<HashMap<String, String>>,
}

#[derive(Deserialize)]
struct CloudflareZone {
    id: String,
    name: String,
}

#[derive(Deserialize)]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    result: Vec<T>,
    success: bool,
}

#[derive(Serialize)]
struct NewTxtRecord<'a> {
    #[serde(rename = "type")]
    record_type: &'static str,
    name: &'a str,
    content: String,
    ttl: u32,
}

#[derive(Deserialize)]
struct RecordResponse {
    result: Option<TxtRecord>,
    success: bool,
    #[serde(default)]
    errors: Vec<CloudflareError>,
}

#[derive(Deserialize)]
struct TxtRecord {
    id: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct CloudflareError {
    code: u32,
    message: String,
}

impl CloudflareAdapter {
    pub fn new(api_token: String, zone_override: Option<String>) -> Self {
        Self {
            api_token,
            zone_override,
            zone_cache: Mutex::new(HashMap::new()),
        }
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("Authorization", format!("Bearer {}", self.api_token))
            .header("Content-Type", "application/json")
    }

    fn format_txt_content(value: &str) -> String {
        format!("\"{}\"", value.trim().trim_matches('"'))
    }

    /// Finds the zone hosting `record_name`, preferring the longest match.
    fn zone_id_for(&self, record_name: &str) -> Result<String> {
        let challenged = record_name
            .strip_prefix(CHALLENGE_PREFIX)
            .unwrap_or(record_name);
        let wanted = self.zone_override.as_deref();

        if let Ok(cache) = self.zone_cache.lock() {
            let cached = cache
                .iter()
                .filter(|(name, _)| match wanted {
                    Some(zone) => name.as_str() == zone,
                    None => matches_zone(challenged, name),
                })
                .max_by_key(|(name, _)| name.len())
                .map(|(_, id)| id.clone());
            if let Some(id) = cached {
                return Ok(id);
            }
        }

        let response = self
            .authed(HttpClient::shared().get(format!("{API_BASE}/zones?per_page=50")))
            .send()
            .context("Failed to list Cloudflare zones")?;
        if !response.status().is_success() {
            return Err(http::status_error("Cloudflare", response.status(), None));
        }
        let zones: ListResponse<CloudflareZone> = response
            .json()
            .context("Failed to parse Cloudflare zone list response")?;
        if !zones.success {
            return Err(anyhow!("Cloudflare API returned unsuccessful response"));
        }

        let zone = zones
            .result
            .into_iter()
            .filter(|zone| match wanted {
                Some(wanted) => matches_zone(wanted, &zone.name) && matches_zone(&zone.name, wanted),
                None => matches_zone(challenged, &zone.name),
            })
            .max_by_key(|zone| zone.name.len())
            .ok_or_else(|| anyhow!("No Cloudflare zone found for {challenged}"))?;

        if let Ok(mut cache) = self.zone_cache.lock() {
            cache.insert(zone.name.clone(), zone.id.clone());
        }
        Ok(zone.id)
    }

    fn list_txt_records(&self, zone_id: &str, record_name: &str) -> Result<Vec<TxtRecord>> {
        let response = self
            .authed(HttpClient::shared().get(format!(
                "{API_BASE}/zones/{zone_id}/dns_records?type=TXT&name={record_name}"
            )))
            .send()
            .context("Failed to list Cloudflare DNS records")?;
        if !response.status().is_success() {
            return Err(http::status_error("Cloudflare", response.status(), None));
        }
        let listed: ListResponse<TxtRecord> = response
            .json()
            .context("Failed to parse Cloudflare DNS record list")?;
        if !listed.success {
            return Err(anyhow!("Cloudflare API returned unsuccessful response"));
        }
        Ok(listed.result)
    }

    fn verify_record_content(&self, zone_id: &str, record_id: &str, expected: &str) -> Result<()> {
        retry_provider_verification(
            &format!("record {record_id}"),
            "Cloudflare record verification",
            Duration::from_secs(2),
            Duration::from_millis(300),
            || {
                let response = self
                    .authed(HttpClient::shared().get(format!(
                        "{API_BASE}/zones/{zone_id}/dns_records/{record_id}"
                    )))
                    .send()
                    .context("Failed to fetch Cloudflare DNS record")?;
                if !response.status().is_success() {
                    return Ok(false);
                }
                let fetched: RecordResponse = response
                    .json()
                    .context("Failed to parse Cloudflare DNS record response")?;
                Ok(fetched
                    .result
                    .and_then(|record| record.content)
                    .is_some_and(|content| content == expected))
            },
        )
    }
}

impl DnsProviderAdapter for CloudflareAdapter {
    fn create_txt(&self, record_name: &str, value: &str) -> Result<()> {
        let zone_id = self.zone_id_for(record_name)?;
        let content = Self::format_txt_content(value);

        let existing = self.list_txt_records(&zone_id, record_name)?;
        if existing
            .iter()
            .any(|record| record.content.as_deref() == Some(content.as_str()))
        {
            debug!("[dns-cloudflare] TXT {record_name} already holds this value");
            return Ok(());
        }

        let record = NewTxtRecord {
            record_type: "TXT",
            name: record_name,
            content: content.clone(),
            ttl: 120,
        };
        let response = self
            .authed(HttpClient::shared().post(format!("{API_BASE}/zones/{zone_id}/dns_records")))
            .json(&record)
            .send()
            .context("Failed to create Cloudflare DNS record")?;
        let status = response.status();
        let body = response.text().unwrap_or_default();
        let parsed = serde_json::from_str::<RecordResponse>(&body).ok();

        if let Some(parsed) = &parsed
            && parsed
                .errors
                .iter()
                .any(|err| err.code == IDENTICAL_RECORD_EXISTS)
        {
            debug!("[dns-cloudflare] identical TXT {record_name} already exists");
            return Ok(());
        }
        if !status.is_success() {
            return Err(http::status_error("Cloudflare", status, Some(body)));
        }

        let parsed = parsed.ok_or_else(|| anyhow!("Failed to parse Cloudflare DNS record response"))?;
        if !parsed.success {
            let message = parsed
                .errors
                .iter()
                .map(|err| format!("{}: {}", err.code, err.message))
                .collect::<Vec<_>>()
                .join(", ");
            return Err(anyhow!("Cloudflare API error: {message}"));
        }
        let record_id = parsed
            .result
            .map(|record| record.id)
            .ok_or_else(|| anyhow!("Cloudflare API did not return record ID"))?;

        self.verify_record_content(&zone_id, &record_id, &content)?;
        info!("[dns-cloudflare] created TXT {record_name} (record {record_id})");
        Ok(())
    }

    fn cleanup_txt(&self, record_name: &str) -> Result<()> {
        let zone_id = self.zone_id_for(record_name)?;
        let records = self.list_txt_records(&zone_id, record_name)?;

        let mut failures = Vec::new();
        for record in &records {
            let result = self
                .authed(HttpClient::shared().delete(format!(
                    "{API_BASE}/zones/{zone_id}/dns_records/{}",
                    record.id
                )))
                .send();
            match result {
                // 404 means someone else already removed it.
                Ok(resp) if resp.status().is_success() || resp.status() == 404 => {}
                Ok(resp) => failures.push(format!("{}: status {}", record.id, resp.status())),
                Err(err) => failures.push(format!("{}: {err}", record.id)),
            }
        }

        if let Some(first) = failures.first() {
            return Err(anyhow!(
                "Failed to delete {} Cloudflare record(s): {first}",
                failures.len()
            ));
        }
        debug!("[dns-cloudflare] removed {} TXT record(s) at {record_name}", records.len());
        Ok(())
    }
}
