use base64::{Engine as _, engine::general_purpose::URL_SAFE};
use hmac::{Hmac, Mac};
use sha1::Sha1;

use super::CdnError;

type HmacSha1 = Hmac<Sha1>;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Qiniu access/secret key pair producing `QBox` management tokens.
#[derive(Clone)]
pub struct QboxCredentials {
    access_key: String,
    secret_key: String,
}

impl QboxCredentials {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        }
    }

    /// URL-safe base64 HMAC-SHA1 of `data` under the secret key.
    pub fn sign(&self, data: &[u8]) -> Result<String, CdnError> {
        let mut mac = HmacSha1::new_from_slice(self.secret_key.as_bytes())
            .map_err(|err| CdnError::Auth(err.to_string()))?;
        mac.update(data);
        Ok(URL_SAFE.encode(mac.finalize().into_bytes()))
    }

    /// `Authorization` header value for a management request.
    ///
    /// The signed string is the path (plus `?query` when present) and a
    /// newline. Form-encoded bodies are appended; JSON bodies are not signed.
    pub fn authorization(
        &self,
        path_and_query: &str,
        content_type: Option<&str>,
        body: Option<&[u8]>,
    ) -> Result<String, CdnError> {
        let mut data = Vec::with_capacity(path_and_query.len() + 1);
        data.extend_from_slice(path_and_query.as_bytes());
        data.push(b'\n');
        if content_type == Some(FORM_CONTENT_TYPE)
            && let Some(body) = body
        {
            data.extend_from_slice(body);
        }
        let signature = self.sign(&data)?;
        Ok(format!("QBox {}:{}", self.access_key, signature))
    }
}

impl std::fmt::Debug for QboxCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QboxCredentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}
