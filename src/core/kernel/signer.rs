use crate::core::config::Credential;
use crate::core::errors::ExchangeError;
use base64::engine::general_purpose;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha512};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use zeroize::Zeroizing;

type HmacSha512 = Hmac<Sha512>;

/// Result type for signing operations: headers to attach to the request
pub type SignatureResult = Result<HashMap<String, String>, ExchangeError>;

/// Signer trait for request authentication
///
/// The REST transport asks the signer for a nonce, injects it into the body,
/// then asks for the headers that authenticate the serialized request.
pub trait Signer: Send + Sync {
    /// Next nonce for this credential, strictly greater than any issued before
    fn next_nonce(&self) -> u64;

    /// Sign a request and return the headers to include
    ///
    /// # Arguments
    /// * `endpoint` - API endpoint path, e.g. `/0/private/Balance`
    /// * `query_string` - Encoded query string (without leading '?')
    /// * `body` - Serialized request body
    /// * `nonce` - Nonce carried in the body
    fn sign_request(
        &self,
        endpoint: &str,
        query_string: &str,
        body: &[u8],
        nonce: &str,
    ) -> SignatureResult;
}

/// Compute the `API-Sign` value for a private request.
///
/// `base64(HMAC-SHA512(base64_decode(private_key), path || SHA256(nonce || query || body)))`
pub fn sign(
    private_key: &str,
    path: &str,
    query_string: &str,
    body: &str,
    nonce: &str,
) -> Result<String, ExchangeError> {
    let key = Zeroizing::new(
        general_purpose::STANDARD
            .decode(private_key)
            .map_err(|e| ExchangeError::InvalidKeyEncoding(e.to_string()))?,
    );

    let mut digest = Sha256::new();
    digest.update(nonce.as_bytes());
    digest.update(query_string.as_bytes());
    digest.update(body.as_bytes());
    let digest = digest.finalize();

    let mut mac = HmacSha512::new_from_slice(&key)
        .map_err(|e| ExchangeError::AuthError(format!("Invalid private key: {}", e)))?;
    mac.update(path.as_bytes());
    mac.update(&digest);

    Ok(general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
}

/// Millisecond nonces that never repeat or go backwards, even when called
/// faster than the clock ticks.
#[derive(Debug, Default)]
pub struct NonceSource {
    last: AtomicU64,
}

impl NonceSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_nonce(&self) -> u64 {
        let now = u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0);
        let previous = self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        now.max(previous + 1)
    }
}

/// HMAC-SHA512 signer for Kraken private endpoints. Nonces come from the
/// credential, not the signer.
pub struct KrakenSigner {
    credential: Arc<Credential>,
}

impl KrakenSigner {
    pub fn new(credential: Arc<Credential>) -> Self {
        Self { credential }
    }
}

impl Signer for KrakenSigner {
    fn next_nonce(&self) -> u64 {
        self.credential.next_nonce()
    }

    fn sign_request(
        &self,
        endpoint: &str,
        query_string: &str,
        body: &[u8],
        nonce: &str,
    ) -> SignatureResult {
        let body = std::str::from_utf8(body)
            .map_err(|e| ExchangeError::AuthError(format!("Invalid body encoding: {}", e)))?;
        let signature = sign(
            self.credential.private_key(),
            endpoint,
            query_string,
            body,
            nonce,
        )?;

        let mut headers = HashMap::new();
        headers.insert(
            "API-Key".to_string(),
            self.credential.api_key().to_string(),
        );
        headers.insert("API-Sign".to_string(), signature);

        Ok(headers)
    }
}
