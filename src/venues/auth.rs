use base64::{
    engine::general_purpose::{STANDARD as BASE64, URL_SAFE as BASE64_URL_SAFE},
    Engine,
};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const HEADER_KEY: &str = "KALSHI-ACCESS-KEY";
pub const HEADER_SIGNATURE: &str = "KALSHI-ACCESS-SIGNATURE";
pub const HEADER_TIMESTAMP: &str = "KALSHI-ACCESS-TIMESTAMP";

#[derive(Debug, Error)]
pub enum SignerError {
    #[error("invalid base64 secret: {0}")]
    InvalidSecret(#[from] base64::DecodeError),

    #[error("HMAC computation failed: {0}")]
    Hmac(String),
}

/// Signs target-venue requests with HMAC-SHA256.
///
/// message = `{timestamp_ms}{METHOD}{path}`, signature is standard base64.
#[derive(Clone)]
pub struct RequestSigner {
    key_id: String,
    secret: Vec<u8>,
}

impl std::fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestSigner")
            .field("key_id", &self.key_id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl RequestSigner {
    /// The secret may be URL-safe or standard base64.
    pub fn new(key_id: impl Into<String>, secret_b64: &str) -> Result<Self, SignerError> {
        let secret = BASE64_URL_SAFE
            .decode(secret_b64)
            .or_else(|_| BASE64.decode(secret_b64))?;
        Ok(Self {
            key_id: key_id.into(),
            secret,
        })
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn sign(&self, timestamp_ms: &str, method: &str, path: &str) -> Result<String, SignerError> {
        let message = format!("{timestamp_ms}{}{path}", method.to_uppercase());
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).map_err(|e| SignerError::Hmac(e.to_string()))?;
        mac.update(message.as_bytes());
        Ok(BASE64.encode(mac.finalize().into_bytes()))
    }

    /// Header triples for one request.
    pub fn headers(&self, method: &str, path: &str) -> Result<Vec<(&'static str, String)>, SignerError> {
        let timestamp = chrono::Utc::now().timestamp_millis().to_string();
        let signature = self.sign(&timestamp, method, path)?;
        Ok(vec![
            (HEADER_KEY, self.key_id.clone()),
            (HEADER_SIGNATURE, signature),
            (HEADER_TIMESTAMP, timestamp),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_produces_base64_output() {
        let secret = BASE64.encode(b"test-secret-key-1234");
        let signer = RequestSigner::new("key", &secret).unwrap();

        let sig = signer.sign("1700000000000", "get", "/trade-api/v2/portfolio/fills").unwrap();

        assert!(BASE64.decode(&sig).is_ok());
        assert_eq!(sig.len(), 44);
        // Method case does not change the signature.
        assert_eq!(sig, signer.sign("1700000000000", "GET", "/trade-api/v2/portfolio/fills").unwrap());
    }

    #[test]
    fn rejects_non_base64_secret() {
        assert!(RequestSigner::new("key", "not base64 !!").is_err());
    }

    #[test]
    fn debug_redacts_secret() {
        let signer = RequestSigner::new("key", &BASE64.encode(b"s")).unwrap();
        assert!(!format!("{signer:?}").contains("[115]"));
        assert!(format!("{signer:?}").contains("redacted"));
    }
}
