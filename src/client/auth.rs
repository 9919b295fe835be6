//! HMAC-SHA256 request signing for GDAX API requests.
//!
//! Signed requests carry four headers:
//!
//! - `CB-ACCESS-KEY`: the API key
//! - `CB-ACCESS-TIMESTAMP`: Unix timestamp in seconds
//! - `CB-ACCESS-PASSPHRASE`: the key's passphrase
//! - `CB-ACCESS-SIGN`: base64 HMAC-SHA256 of `timestamp + METHOD + path + body`,
//!   keyed with the base64-decoded secret
//!
//! # Example
//!
//! ```rust
//! use gdax_book::client::auth::Signer;
//! use gdax_book::config::Credentials;
//!
//! let creds = Credentials::new("key", "c2VjcmV0", "passphrase");
//! let signer = Signer::new(&creds).expect("secret is valid base64");
//!
//! let signature = signer
//!     .sign("1500000000", "GET", "/products/BTC-USD/book?level=3", "")
//!     .expect("Failed to sign");
//! ```

use std::fmt;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::config::Credentials;
use crate::error::Error;

type HmacSha256 = Hmac<Sha256>;

/// HMAC signer for GDAX API authentication
#[derive(Clone)]
pub struct Signer {
    key: String,
    secret: Vec<u8>,
    passphrase: String,
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer").field("key", &self.key).finish_non_exhaustive()
    }
}

impl Signer {
    /// Create a new signer from API credentials
    ///
    /// # Errors
    ///
    /// Returns [`Error::Authentication`] if the secret is not valid base64.
    pub fn new(credentials: &Credentials) -> Result<Self, Error> {
        let secret = BASE64
            .decode(credentials.secret.trim())
            .map_err(|e| Error::Authentication(format!("invalid API secret: {}", e)))?;

        Ok(Self {
            key: credentials.key.clone(),
            secret,
            passphrase: credentials.passphrase.clone(),
        })
    }

    /// Sign a request and return the base64-encoded signature
    ///
    /// `request_path` includes the query string.
    pub fn sign(
        &self,
        timestamp: &str,
        method: &str,
        request_path: &str,
        body: &str,
    ) -> Result<String, Error> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| Error::Authentication(e.to_string()))?;
        mac.update(timestamp.as_bytes());
        mac.update(method.to_ascii_uppercase().as_bytes());
        mac.update(request_path.as_bytes());
        mac.update(body.as_bytes());

        Ok(BASE64.encode(mac.finalize().into_bytes()))
    }

    /// Build the full header set for a request signed now
    pub fn headers(&self, method: &str, request_path: &str, body: &str) -> Result<AuthHeaders, Error> {
        let timestamp = Self::current_timestamp().to_string();
        let signature = self.sign(&timestamp, method, request_path, body)?;

        Ok(AuthHeaders {
            key: self.key.clone(),
            timestamp,
            passphrase: self.passphrase.clone(),
            signature,
        })
    }

    /// Get the current Unix timestamp in seconds
    pub fn current_timestamp() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default()
    }
}

/// Authentication headers for a GDAX API request
#[derive(Debug, Clone)]
pub struct AuthHeaders {
    /// API key
    pub key: String,
    /// Unix timestamp in seconds
    pub timestamp: String,
    /// Key passphrase
    pub passphrase: String,
    /// HMAC-SHA256 signature (base64)
    pub signature: String,
}

impl AuthHeaders {
    /// Header name for API key
    pub const KEY_HEADER: &'static str = "CB-ACCESS-KEY";
    /// Header name for timestamp
    pub const TIMESTAMP_HEADER: &'static str = "CB-ACCESS-TIMESTAMP";
    /// Header name for passphrase
    pub const PASSPHRASE_HEADER: &'static str = "CB-ACCESS-PASSPHRASE";
    /// Header name for signature
    pub const SIGNATURE_HEADER: &'static str = "CB-ACCESS-SIGN";
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> Signer {
        Signer::new(&Credentials::new("key", "Z2RheC10ZXN0LXNlY3JldA==", "pass")).unwrap()
    }

    #[test]
    fn test_timestamp() {
        let ts = Signer::current_timestamp();
        // Should be after 2024
        assert!(ts > 1_704_067_200);
    }

    #[test]
    fn test_known_signature() {
        let signature = signer()
            .sign("1500000000", "get", "/products/BTC-USD/book?level=3", "")
            .unwrap();
        assert_eq!(signature, "1KjW2iHWmfzB/ZfCAhytfvvrqfbFxEpkSuzZzFOCFYw=");
    }

    #[test]
    fn test_body_changes_signature() {
        let s = signer();
        let a = s.sign("1", "POST", "/orders", "").unwrap();
        let b = s.sign("1", "POST", "/orders", "{}").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_invalid_secret() {
        let err = Signer::new(&Credentials::new("key", "not base64!", "pass")).unwrap_err();
        assert!(matches!(err, Error::Authentication(_)));
    }

    #[test]
    fn test_headers_and_debug() {
        let s = signer();
        let headers = s.headers("GET", "/time", "").unwrap();
        assert_eq!(headers.key, "key");
        assert_eq!(headers.passphrase, "pass");
        assert!(!headers.signature.is_empty());
        assert!(!format!("{:?}", s).contains("pass"));
    }
}
