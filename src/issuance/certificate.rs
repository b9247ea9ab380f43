use std::{fmt, str::FromStr};

use acme_lib::{create_p256_key, create_p384_key, create_rsa_key};
use anyhow::{Result, anyhow};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use x509_parser::pem::parse_x509_pem;

/// Private key flavour requested for issued certificates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum KeyType {
    #[serde(rename = "rsa-2048")]
    Rsa2048,
    #[serde(rename = "rsa-3072")]
    Rsa3072,
    #[serde(rename = "rsa-4096")]
    Rsa4096,
    #[default]
    #[serde(rename = "ecdsa-p256")]
    EcdsaP256,
    #[serde(rename = "ecdsa-p384")]
    EcdsaP384,
}

impl KeyType {
    pub fn as_str(self) -> &'static str {
        match self {
            KeyType::Rsa2048 => "rsa-2048",
            KeyType::Rsa3072 => "rsa-3072",
            KeyType::Rsa4096 => "rsa-4096",
            KeyType::EcdsaP256 => "ecdsa-p256",
            KeyType::EcdsaP384 => "ecdsa-p384",
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyType {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "rsa-2048" | "rsa2048" => Ok(KeyType::Rsa2048),
            "rsa-3072" | "rsa3072" => Ok(KeyType::Rsa3072),
            "rsa-4096" | "rsa4096" => Ok(KeyType::Rsa4096),
            "ecdsa-p256" | "p256" => Ok(KeyType::EcdsaP256),
            "ecdsa-p384" | "p384" => Ok(KeyType::EcdsaP384),
            other => Err(anyhow!(
                "unsupported key type {other}. Allowed: rsa-2048, rsa-3072, rsa-4096, ecdsa-p256, ecdsa-p384"
            )),
        }
    }
}

/// Generates a fresh private key and returns it as PKCS#8 PEM.
pub fn generate_private_key(key_type: KeyType) -> Result<String> {
    let key = match key_type {
        KeyType::Rsa2048 => create_rsa_key(2048),
        KeyType::Rsa3072 => create_rsa_key(3072),
        KeyType::Rsa4096 => create_rsa_key(4096),
        KeyType::EcdsaP256 => create_p256_key(),
        KeyType::EcdsaP384 => create_p384_key(),
    };

    let key_pem = key
        .private_key_to_pem_pkcs8()
        .map_err(|e| anyhow!("failed to serialize private key: {e}"))?;

    String::from_utf8(key_pem).map_err(|_| anyhow!("private key PEM contained invalid UTF-8"))
}

/// Expiry of the first (leaf) certificate in a PEM chain.
pub fn leaf_not_after(chain_pem: &str) -> Result<DateTime<Utc>> {
    let (_, pem_block) = parse_x509_pem(chain_pem.as_bytes())
        .map_err(|e| anyhow!("failed to parse certificate PEM: {e}"))?;
    let cert = pem_block
        .parse_x509()
        .map_err(|e| anyhow!("failed to parse certificate: {e}"))?;
    let seconds = cert.validity().not_after.timestamp();
    Utc.timestamp_opt(seconds, 0)
        .single()
        .ok_or_else(|| anyhow!("certificate notAfter {seconds} is out of range"))
}

/// Lowercase hex SHA-256 over the leaf certificate's DER encoding.
pub fn leaf_fingerprint(chain_pem: &str) -> Result<String> {
    let (_, pem_block) = parse_x509_pem(chain_pem.as_bytes())
        .map_err(|e| anyhow!("failed to parse certificate PEM: {e}"))?;
    let mut hasher = Sha256::new();
    hasher.update(&pem_block.contents);
    Ok(hex::encode(hasher.finalize()))
}
