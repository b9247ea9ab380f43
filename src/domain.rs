use anyhow::{Result, anyhow};

/// Normalizes a hostname for storage and comparison: trimmed, no trailing dot,
/// IDNA ASCII form, lowercase.
pub fn normalize_domain_for_storage(input: &str) -> Result<String> {
    let trimmed = input.trim().trim_end_matches('.');
    if trimmed.is_empty() {
        return Err(anyhow!("domain name is required"));
    }
    let ascii = idna::domain_to_ascii(trimmed)
        .map_err(|err| anyhow!("invalid domain name: {err}"))?;
    Ok(ascii.to_lowercase())
}

/// Derives the parent domain a hostname is grouped and issued under.
///
/// A leading dot marks a wildcard-style CDN entry (`.img.example.com`); the
/// remainder is the parent verbatim. Otherwise the leftmost label is dropped.
/// Single-label names have no parent and yield `None`.
pub fn parent_domain(hostname: &str) -> Option<String> {
    if let Some(rest) = hostname.strip_prefix('.') {
        if rest.is_empty() {
            return None;
        }
        return Some(rest.to_string());
    }

    let (_, rest) = hostname.split_once('.')?;
    if rest.is_empty() {
        return None;
    }
    Some(rest.to_string())
}

/// Registrable root of a hostname (last two labels), used as the DNS zone when
/// no explicit zone is configured.
pub fn root_from_hostname(hostname: &str) -> String {
    let parts: Vec<&str> = hostname.trim_end_matches('.').split('.').collect();
    if parts.len() >= 2 {
        format!("{}.{}", parts[parts.len() - 2], parts[parts.len() - 1])
    } else {
        hostname.to_string()
    }
}
