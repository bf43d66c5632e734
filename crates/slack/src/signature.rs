use std::time::{Duration, SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_VERSION: &str = "v0";
pub const DEFAULT_MAX_SKEW: Duration = Duration::from_secs(300);

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing X-Slack-Request-Timestamp header")]
    MissingTimestamp,
    #[error("missing X-Slack-Signature header")]
    MissingSignature,
    #[error("request timestamp `{0}` is not a unix time")]
    InvalidTimestamp(String),
    #[error("request timestamp is {skew_secs}s away from local clock")]
    StaleTimestamp { skew_secs: u64 },
    #[error("signature is not a `v0=` hex digest")]
    Malformed,
    #[error("signing secret is unusable")]
    InvalidKey,
    #[error("signature mismatch")]
    Mismatch,
}

/// Verifies Slack request signatures (`v0=` HMAC-SHA256 over
/// `v0:{timestamp}:{body}`).
#[derive(Clone)]
pub struct SignatureVerifier {
    secret: SecretString,
    max_skew: Duration,
}

impl SignatureVerifier {
    pub fn new(secret: SecretString) -> Self {
        Self { secret, max_skew: DEFAULT_MAX_SKEW }
    }

    pub fn with_max_skew(mut self, max_skew: Duration) -> Self {
        self.max_skew = max_skew;
        self
    }

    pub fn verify(
        &self,
        timestamp: Option<&str>,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<(), SignatureError> {
        self.verify_at(timestamp, signature, body, unix_now())
    }

    pub fn verify_at(
        &self,
        timestamp: Option<&str>,
        signature: Option<&str>,
        body: &[u8],
        now_secs: u64,
    ) -> Result<(), SignatureError> {
        let timestamp = timestamp.map(str::trim).filter(|value| !value.is_empty());
        let timestamp = timestamp.ok_or(SignatureError::MissingTimestamp)?;
        let signature = signature.ok_or(SignatureError::MissingSignature)?;

        let sent_at: u64 = timestamp
            .parse()
            .map_err(|_| SignatureError::InvalidTimestamp(timestamp.to_owned()))?;
        let skew_secs = now_secs.abs_diff(sent_at);
        if skew_secs > self.max_skew.as_secs() {
            return Err(SignatureError::StaleTimestamp { skew_secs });
        }

        let digest = signature
            .trim()
            .strip_prefix("v0=")
            .and_then(|hex_digest| hex::decode(hex_digest).ok())
            .ok_or(SignatureError::Malformed)?;

        signing_mac(self.secret.expose_secret(), timestamp, body)?
            .verify_slice(&digest)
            .map_err(|_| SignatureError::Mismatch)
    }
}

/// Computes the `v0=` signature header value Slack would send for `body`.
pub fn compute_signature(secret: &str, timestamp: &str, body: &[u8]) -> Result<String, SignatureError> {
    let mac = signing_mac(secret, timestamp, body)?;
    Ok(format!("{SIGNATURE_VERSION}={}", hex::encode(mac.finalize().into_bytes())))
}

fn signing_mac(secret: &str, timestamp: &str, body: &[u8]) -> Result<HmacSha256, SignatureError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::InvalidKey)?;
    mac.update(SIGNATURE_VERSION.as_bytes());
    mac.update(b":");
    mac.update(timestamp.as_bytes());
    mac.update(b":");
    mac.update(body);
    Ok(mac)
}

pub fn unix_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|elapsed| elapsed.as_secs()).unwrap_or_default()
}
