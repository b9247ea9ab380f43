use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use log::{debug, info};
use reqwest::{
    Method, StatusCode,
    blocking::Client,
    header::{AUTHORIZATION, CONTENT_TYPE},
};
use serde::{Deserialize, Serialize};

use super::{CdnError, CdnProvider, RemoteCertificate, auth::QboxCredentials};
use crate::http::{HttpClient, build_client};

pub const DEFAULT_BASE_URL: &str = "https://api.qiniu.com";
const PAGE_LIMIT: u32 = 1000;

/// Qiniu Fusion CDN management API client.
pub struct QiniuClient {
    base_url: String,
    credentials: QboxCredentials,
    client: Client,
    force_https: bool,
    http2: bool,
}

#[derive(Deserialize)]
struct DomainListResponse {
    #[serde(default)]
    marker: String,
    #[serde(default)]
    domains: Vec<DomainSummary>,
}

#[derive(Deserialize)]
struct DomainSummary {
    name: String,
}

#[derive(Deserialize)]
struct DomainDetail {
    #[serde(default)]
    protocol: String,
}

#[derive(Serialize)]
struct UploadRequest<'a> {
    name: &'a str,
    common_name: &'a str,
    pri: &'a str,
    ca: &'a str,
}

#[derive(Deserialize)]
struct UploadResponse {
    #[serde(rename = "certID", alias = "certid", alias = "certId", default)]
    cert_id: String,
}

#[derive(Deserialize)]
struct CertificateResponse {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    cert: Option<CertificateBody>,
}

#[derive(Deserialize)]
struct CertificateBody {
    #[serde(default)]
    certid: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    common_name: String,
    #[serde(default)]
    dnsnames: Vec<String>,
    #[serde(default)]
    not_before: i64,
    #[serde(default)]
    not_after: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HttpsConfig<'a> {
    cert_id: &'a str,
    force_https: bool,
    http2_enable: bool,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    error: Option<String>,
}

impl QiniuClient {
    pub fn new(credentials: QboxCredentials) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            credentials,
            client: HttpClient::shared().clone(),
            force_https: true,
            http2: false,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = build_client(timeout);
        self
    }

    pub fn with_https_options(mut self, force_https: bool, http2: bool) -> Self {
        self.force_https = force_https;
        self.http2 = http2;
        self
    }

    fn request<B: Serialize>(
        &self,
        method: Method,
        path_and_query: &str,
        body: Option<&B>,
    ) -> Result<String, CdnError> {
        let url = format!("{}{}", self.base_url, path_and_query);
        let mut builder = self.client.request(method.clone(), &url);

        let token = match body {
            Some(body) => {
                let payload =
                    serde_json::to_vec(body).map_err(|err| CdnError::Decode(err.to_string()))?;
                let token = self.credentials.authorization(
                    path_and_query,
                    Some("application/json"),
                    Some(&payload),
                )?;
                builder = builder
                    .header(CONTENT_TYPE, "application/json")
                    .body(payload);
                token
            }
            None => {
                builder = builder.header(CONTENT_TYPE, "application/x-www-form-urlencoded");
                self.credentials.authorization(path_and_query, None, None)?
            }
        };

        debug!("[qiniu] {method} {path_and_query}");
        let response = builder.header(AUTHORIZATION, token).send()?;
        let status = response.status();
        let text = response.text()?;
        if !status.is_success() {
            return Err(api_error(status, &text));
        }
        Ok(text)
    }

    fn domain_protocol(&self, hostname: &str) -> Result<String, CdnError> {
        let body = self.request::<()>(Method::GET, &format!("/domain/{hostname}"), None)?;
        let detail: DomainDetail = decode(&body)?;
        Ok(detail.protocol)
    }
}

impl CdnProvider for QiniuClient {
    fn list_hostnames(&self) -> Result<Vec<String>, CdnError> {
        let mut hostnames = Vec::new();
        let mut marker = String::new();

        loop {
            let mut path = format!("/domain?limit={PAGE_LIMIT}");
            if !marker.is_empty() {
                path.push_str("&marker=");
                path.push_str(&urlencoding::encode(&marker));
            }
            let body = self.request::<()>(Method::GET, &path, None)?;
            let page: DomainListResponse = decode(&body)?;
            hostnames.extend(page.domains.into_iter().map(|domain| domain.name));

            if page.marker.is_empty() || page.marker == marker {
                break;
            }
            marker = page.marker;
        }

        debug!("[qiniu] listed {} hostname(s)", hostnames.len());
        Ok(hostnames)
    }

    fn upload_certificate(
        &self,
        key_pem: &str,
        cert_pem: &str,
        name: &str,
    ) -> Result<String, CdnError> {
        let common_name = format!("*.{name}");
        let request = UploadRequest {
            name,
            common_name: &common_name,
            pri: key_pem,
            ca: cert_pem,
        };
        let body = self.request(Method::POST, "/sslcert", Some(&request))?;
        let response: UploadResponse = decode(&body)?;
        if response.cert_id.is_empty() {
            return Err(CdnError::Decode(
                "upload response did not include a certificate id".to_string(),
            ));
        }
        info!("[qiniu] uploaded certificate {} for {name}", response.cert_id);
        Ok(response.cert_id)
    }

    fn get_certificate(&self, cert_id: &str) -> Result<RemoteCertificate, CdnError> {
        match self.request::<()>(Method::GET, &format!("/sslcert/{cert_id}"), None) {
            Ok(body) => interpret_certificate(cert_id, &body),
            Err(CdnError::Api { status: 404, .. }) => {
                Err(CdnError::CertificateNotFound(cert_id.to_string()))
            }
            Err(err) => Err(err),
        }
    }

    fn delete_certificate(&self, cert_id: &str) -> Result<(), CdnError> {
        match self.request::<()>(Method::DELETE, &format!("/sslcert/{cert_id}"), None) {
            Ok(_) => {
                info!("[qiniu] deleted certificate {cert_id}");
                Ok(())
            }
            Err(CdnError::Api { status: 404, .. }) => {
                Err(CdnError::CertificateNotFound(cert_id.to_string()))
            }
            Err(err) => Err(err),
        }
    }

    fn bind_and_enable_https(&self, hostname: &str, cert_id: &str) -> Result<(), CdnError> {
        let config = HttpsConfig {
            cert_id,
            force_https: self.force_https,
            http2_enable: self.http2,
        };
        let endpoint = if self.domain_protocol(hostname)?.eq_ignore_ascii_case("https") {
            "httpsconf"
        } else {
            "sslize"
        };
        self.request(
            Method::PUT,
            &format!("/domain/{hostname}/{endpoint}"),
            Some(&config),
        )?;
        info!("[qiniu] {hostname} now served with certificate {cert_id} ({endpoint})");
        Ok(())
    }
}

fn decode<T: for<'de> Deserialize<'de>>(body: &str) -> Result<T, CdnError> {
    serde_json::from_str(body).map_err(|err| CdnError::Decode(err.to_string()))
}

fn api_error(status: StatusCode, body: &str) -> CdnError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|parsed| {
            parsed
                .error
                .filter(|message| !message.is_empty())
                .or_else(|| parsed.code.map(|code| format!("code {code}")))
        })
        .unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                status.to_string()
            } else {
                trimmed.to_string()
            }
        });
    CdnError::Api {
        status: status.as_u16(),
        message,
    }
}

/// Reads a `GET /sslcert/<id>` body. A `404` code or an empty id mean the
/// provider no longer has the certificate; other non-200 codes are errors.
fn interpret_certificate(cert_id: &str, body: &str) -> Result<RemoteCertificate, CdnError> {
    let response: CertificateResponse = decode(body)?;
    match response.code {
        Some(404) => return Err(CdnError::CertificateNotFound(cert_id.to_string())),
        Some(code) if code != 200 && code != 0 => {
            return Err(CdnError::Api {
                status: u16::try_from(code).unwrap_or(500),
                message: response.error.unwrap_or_else(|| format!("code {code}")),
            });
        }
        _ => {}
    }

    let cert = match response.cert {
        Some(cert) if !cert.certid.is_empty() => cert,
        _ => return Err(CdnError::CertificateNotFound(cert_id.to_string())),
    };

    let not_after = timestamp(cert.not_after)
        .ok_or_else(|| CdnError::Decode(format!("invalid not_after {}", cert.not_after)))?;
    Ok(RemoteCertificate {
        cert_id: cert.certid,
        name: cert.name,
        common_name: cert.common_name,
        dns_names: cert.dnsnames,
        not_before: timestamp(cert.not_before),
        not_after,
    })
}

fn timestamp(seconds: i64) -> Option<DateTime<Utc>> {
    if seconds <= 0 {
        return None;
    }
    Utc.timestamp_opt(seconds, 0).single()
}
