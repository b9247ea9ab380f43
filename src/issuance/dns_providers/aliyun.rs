use std::collections::BTreeMap;

use anyhow::{Context, Result, anyhow};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::Utc;
use hmac::{Hmac, Mac};
use log::{debug, info};
use serde::Deserialize;
use sha1::Sha1;
use uuid::Uuid;

use super::{DnsProviderAdapter, relative_name, zone_for_record};
use crate::http::{self, HttpClient};

const ENDPOINT: &str = "https://alidns.aliyuncs.com/";
const API_VERSION: &str = "2015-01-09";
const DUPLICATE_RECORD: &str = "DomainRecordDuplicate";

type HmacSha1 = Hmac<Sha1>;

/// Alibaba Cloud DNS (Alidns) RPC API adapter.
pub struct AliyunDnsAdapter {
    access_key_id: String,
    access_key_secret: String,
    zone: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AddRecordResponse {
    record_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeRecordsResponse {
    domain_records: DomainRecords,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DomainRecords {
    #[serde(default)]
    record: Vec<AliyunRecord>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AliyunRecord {
    record_id: String,
    #[serde(rename = "RR")]
    rr: String,
    #[serde(rename = "Type")]
    record_type: String,
    value: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AliyunError {
    code: String,
    #[serde(default)]
    message: String,
}

impl AliyunDnsAdapter {
    pub fn new(access_key_id: String, access_key_secret: String, zone: Option<String>) -> Self {
        Self {
            access_key_id,
            access_key_secret,
            zone,
        }
    }

    fn call(&self, action: &str, params: &[(&str, &str)]) -> Result<String> {
        let timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
        let nonce = Uuid::new_v4().to_string();

        let mut query: BTreeMap<String, String> = BTreeMap::new();
        query.insert("AccessKeyId".into(), self.access_key_id.clone());
        query.insert("Action".into(), action.into());
        query.insert("Format".into(), "JSON".into());
        query.insert("SignatureMethod".into(), "HMAC-SHA1".into());
        query.insert("SignatureNonce".into(), nonce);
        query.insert("SignatureVersion".into(), "1.0".into());
        query.insert("Timestamp".into(), timestamp);
        query.insert("Version".into(), API_VERSION.into());
        for (key, value) in params {
            query.insert((*key).to_string(), (*value).to_string());
        }

        let signature = sign(&self.access_key_secret, &query)?;
        let url = format!(
            "{ENDPOINT}?{}&Signature={}",
            canonical_query(&query),
            urlencoding::encode(&signature)
        );

        let response = HttpClient::shared()
            .get(&url)
            .send()
            .with_context(|| format!("Aliyun DNS {action} request failed"))?;
        let status = response.status();
        let body = response
            .text()
            .with_context(|| format!("Failed to read Aliyun DNS {action} response"))?;

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<AliyunError>(&body) {
                return Err(anyhow!("Aliyun DNS {action} failed: {}: {}", error.code, error.message));
            }
            return Err(http::status_error("Aliyun DNS", status, Some(body)));
        }
        Ok(body)
    }

    fn list_txt_records(&self, zone: &str, rr: &str) -> Result<Vec<AliyunRecord>> {
        let body = self.call(
            "DescribeDomainRecords",
            &[
                ("DomainName", zone),
                ("RRKeyWord", rr),
                ("TypeKeyWord", "TXT"),
                ("PageSize", "100"),
            ],
        )?;
        let parsed: DescribeRecordsResponse =
            serde_json::from_str(&body).context("Failed to parse Aliyun DNS record list")?;
        // RRKeyWord is a fuzzy match.
        Ok(parsed
            .domain_records
            .record
            .into_iter()
            .filter(|record| record.rr == rr && record.record_type.eq_ignore_ascii_case("TXT"))
            .collect())
    }
}

impl DnsProviderAdapter for AliyunDnsAdapter {
    fn create_txt(&self, record_name: &str, value: &str) -> Result<()> {
        let zone = zone_for_record(record_name, self.zone.as_deref());
        let rr = relative_name(record_name, &zone);
        let value = value.trim().trim_matches('"');

        match self.call(
            "AddDomainRecord",
            &[
                ("DomainName", zone.as_str()),
                ("RR", rr.as_str()),
                ("Type", "TXT"),
                ("Value", value),
            ],
        ) {
            Ok(body) => {
                let created: AddRecordResponse = serde_json::from_str(&body)
                    .context("Failed to parse Aliyun DNS AddDomainRecord response")?;
                info!(
                    "[dns-aliyun] created TXT {rr}.{zone} (record {})",
                    created.record_id
                );
                Ok(())
            }
            Err(err) if err.to_string().contains(DUPLICATE_RECORD) => {
                debug!("[dns-aliyun] TXT {rr}.{zone} already holds this value");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn cleanup_txt(&self, record_name: &str) -> Result<()> {
        let zone = zone_for_record(record_name, self.zone.as_deref());
        let rr = relative_name(record_name, &zone);
        let records = self.list_txt_records(&zone, &rr)?;
        for record in &records {
            self.call("DeleteDomainRecord", &[("RecordId", record.record_id.as_str())])?;
            debug!(
                "[dns-aliyun] deleted TXT {rr}.{zone} = {} (record {})",
                record.value, record.record_id
            );
        }
        info!("[dns-aliyun] removed {} TXT record(s) at {rr}.{zone}", records.len());
        Ok(())
    }
}

fn canonical_query(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .map(|(key, value)| format!("{}={}", urlencoding::encode(key), urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}

/// RPC signature: base64 HMAC-SHA1 over `GET&%2F&<encoded canonical query>`
/// keyed with `secret&`.
fn sign(secret: &str, params: &BTreeMap<String, String>) -> Result<String> {
    let string_to_sign = format!("GET&%2F&{}", urlencoding::encode(&canonical_query(params)));
    let mut mac = HmacSha1::new_from_slice(format!("{secret}&").as_bytes())
        .map_err(|e| anyhow!("HMAC error: {e}"))?;
    mac.update(string_to_sign.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}
