//! DNS-01 record naming and public-resolver propagation checks.

use std::sync::mpsc;
use std::thread;

use anyhow::{Result, anyhow};
use log::{debug, warn};
use serde::Deserialize;

pub const CHALLENGE_PREFIX: &str = "_acme-challenge.";

const RESOLVERS: [(&str, &str); 2] = [
    ("google", "https://dns.google/resolve"),
    ("cloudflare", "https://cloudflare-dns.com/dns-query"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropagationState {
    Pending,
    Found,
    NxDomain,
    WrongContent,
    Error,
}

#[derive(Debug, Clone)]
pub struct DnsPropagationResult {
    pub state: PropagationState,
    pub reason: Option<String>,
    pub observed_values: Vec<String>,
}

/// TXT record name for a challenge on `domain`. A wildcard authorization is
/// answered at the base name.
pub fn record_name(domain: &str) -> String {
    let trimmed = domain.trim_end_matches('.');
    let trimmed = trimmed.strip_prefix("*.").unwrap_or(trimmed);
    if trimmed.starts_with(CHALLENGE_PREFIX) {
        trimmed.to_string()
    } else {
        format!("{CHALLENGE_PREFIX}{trimmed}")
    }
}

#[derive(Debug, Deserialize, Clone)]
struct DohAnswer {
    data: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
struct DohResponse {
    #[serde(rename = "Status")]
    status: u32,
    #[serde(rename = "Answer")]
    answer: Option<Vec<DohAnswer>>,
}

impl DohResponse {
    fn values(&self) -> impl Iterator<Item = String> + '_ {
        self.answer
            .iter()
            .flatten()
            .filter_map(|answer| answer.data.as_deref())
            .map(trim_txt_quotes)
    }
}

fn trim_txt_quotes(value: &str) -> String {
    value.trim().trim_matches('"').trim().to_string()
}

/// Queries every resolver in parallel and returns as soon as one of them
/// already serves `expected_value`.
fn query_txt(record_name: &str, expected_value: &str) -> Result<Vec<DohResponse>> {
    let timeout = crate::http::resolve_timeout();
    let (tx, rx) = mpsc::channel();

    for (resolver, endpoint) in RESOLVERS {
        let tx = tx.clone();
        let url = format!("{endpoint}?name={record_name}&type=TXT");
        thread::spawn(move || {
            let agent = ureq::AgentBuilder::new().timeout(timeout).build();
            let result = agent
                .get(&url)
                .set("Accept", "application/dns-json")
                .call()
                .map_err(|err| anyhow!("{resolver} query failed: {err}"))
                .and_then(|resp| {
                    resp.into_string()
                        .map_err(|err| anyhow!("{resolver} body read failed: {err}"))
                })
                .and_then(|body| {
                    serde_json::from_str::<DohResponse>(&body)
                        .map_err(|err| anyhow!("{resolver} parse failed: {err}"))
                });
            let _ = tx.send(result);
        });
    }
    drop(tx);

    let mut responses = Vec::new();
    for received in rx {
        match received {
            Ok(response) => {
                if response.values().any(|value| value == expected_value) {
                    return Ok(vec![response]);
                }
                responses.push(response);
            }
            Err(err) => debug!("[dns] {err}"),
        }
    }

    if responses.is_empty() {
        warn!("[dns] all resolvers failed for {record_name}");
        return Err(anyhow!("dns query failed for {record_name} across resolvers"));
    }
    Ok(responses)
}

/// Looks `record_name` up on public resolvers and classifies what they see.
pub fn check_txt_record(record_name: &str, expected_value: &str) -> Result<DnsPropagationResult> {
    let expected = trim_txt_quotes(expected_value);
    let responses = query_txt(record_name, &expected)?;
    let result = interpret_dns_results(&responses, record_name, &expected);
    debug!(
        "[dns] {record_name}: state={:?} observed={:?}",
        result.state, result.observed_values
    );
    Ok(result)
}

fn interpret_dns_results(
    responses: &[DohResponse],
    record_name: &str,
    expected: &str,
) -> DnsPropagationResult {
    let mut observed = Vec::new();
    let mut saw_nxdomain = false;
    let mut saw_ok = false;

    for response in responses {
        observed.extend(response.values());
        match response.status {
            0 => saw_ok = true,
            3 => saw_nxdomain = true,
            other => warn!("[dns] unexpected status {other} for {record_name}"),
        }
    }

    let (state, reason) = if observed.iter().any(|value| value == expected) {
        (PropagationState::Found, None)
    } else if !observed.is_empty() {
        // Other challenges for the same name can coexist; keep waiting.
        (
            PropagationState::WrongContent,
            Some("TXT record present with different value"),
        )
    } else if saw_ok {
        (PropagationState::Pending, Some("record not found yet"))
    } else if saw_nxdomain {
        (PropagationState::NxDomain, Some("record not found (NXDOMAIN)"))
    } else {
        (PropagationState::Error, Some("no usable responses from DNS resolvers"))
    };

    DnsPropagationResult {
        state,
        reason: reason.map(str::to_string),
        observed_values: observed,
    }
}
