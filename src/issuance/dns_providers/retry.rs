use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use log::{debug, warn};

use crate::issuance::dns::{DnsPropagationResult, PropagationState, check_txt_record};

/// Polls public DNS until `record_name` serves `expected_value` or `timeout`
/// elapses. The caller inspects the returned state.
pub fn poll_dns_propagation(
    record_name: &str,
    expected_value: &str,
    timeout: Duration,
    interval: Duration,
) -> Result<DnsPropagationResult> {
    poll_until_found(record_name, timeout, interval, || {
        check_txt_record(record_name, expected_value)
    })
}

pub(crate) fn poll_until_found<F>(
    record_name: &str,
    timeout: Duration,
    interval: Duration,
    mut check: F,
) -> Result<DnsPropagationResult>
where
    F: FnMut() -> Result<DnsPropagationResult>,
{
    let started = Instant::now();
    let mut attempt = 0;

    loop {
        attempt += 1;
        let result = match check() {
            Ok(result) => result,
            Err(err) => DnsPropagationResult {
                state: PropagationState::Error,
                reason: Some(err.to_string()),
                observed_values: Vec::new(),
            },
        };

        if result.state == PropagationState::Found {
            debug!(
                "[dns-retry] {record_name} visible after {}ms (attempt {attempt})",
                started.elapsed().as_millis()
            );
            return Ok(result);
        }

        if started.elapsed() >= timeout {
            warn!(
                "[dns-retry] {record_name} not visible after {}ms (attempt {attempt}), last state {:?}",
                started.elapsed().as_millis(),
                result.state
            );
            return Ok(result);
        }

        debug!(
            "[dns-retry] {record_name} state={:?}, next check in {}ms",
            result.state,
            interval.as_millis()
        );
        std::thread::sleep(interval);
    }
}

/// Retries a provider-side read-back until it reports `Ok(true)`.
/// `Ok(false)` retries; `Err` fails at once.
pub fn retry_provider_verification<F>(
    record_name: &str,
    operation: &str,
    timeout: Duration,
    interval: Duration,
    mut verify_fn: F,
) -> Result<()>
where
    F: FnMut() -> Result<bool>,
{
    let started = Instant::now();
    let mut attempt = 0;

    loop {
        attempt += 1;
        match verify_fn() {
            Ok(true) => {
                debug!("[provider-retry] {operation} verified {record_name} (attempt {attempt})");
                return Ok(());
            }
            Ok(false) if started.elapsed() >= timeout => {
                warn!(
                    "[provider-retry] {operation} timed out for {record_name} after {}ms",
                    started.elapsed().as_millis()
                );
                return Err(anyhow!(
                    "{operation} failed for {record_name}: timeout after {}ms",
                    started.elapsed().as_millis()
                ));
            }
            Ok(false) => std::thread::sleep(interval),
            Err(err) => {
                warn!("[provider-retry] {operation} failed for {record_name}: {err}");
                return Err(err);
            }
        }
    }
}
