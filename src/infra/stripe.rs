use crate::app::ports::BillingVerifierPort;
use crate::error::VerificationError;
use crate::types::{BillingEvent, CheckoutSession};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const CHECKOUT_COMPLETED: &str = "checkout.session.completed";
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

#[derive(Deserialize)]
struct RawEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: RawEventData,
}

#[derive(Deserialize)]
struct RawEventData {
    object: serde_json::Value,
}

/// Parsed `Stripe-Signature` header.
#[derive(Debug, PartialEq, Eq)]
struct SignatureHeader {
    timestamp: i64,
    signatures: Vec<Vec<u8>>,
}

fn parse_header(header: &str) -> Result<SignatureHeader, VerificationError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => {
                let parsed = value
                    .parse::<i64>()
                    .map_err(|_| VerificationError::MalformedHeader)?;
                timestamp = Some(parsed);
            }
            // Unknown schemes (v0 test signatures) are ignored
            "v1" => {
                if let Ok(bytes) = hex::decode(value) {
                    signatures.push(bytes);
                }
            }
            _ => {}
        }
    }

    match timestamp {
        Some(timestamp) if !signatures.is_empty() => Ok(SignatureHeader {
            timestamp,
            signatures,
        }),
        _ => Err(VerificationError::MalformedHeader),
    }
}

/// Verifies Stripe webhook signatures and decodes the event.
pub struct StripeVerifier {
    secret: String,
    tolerance_secs: i64,
}

impl std::fmt::Debug for StripeVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeVerifier").field("tolerance_secs", &self.tolerance_secs).finish()
    }
}

impl StripeVerifier {
    pub fn new(secret: impl Into<String>, tolerance_secs: i64) -> Self {
        Self {
            secret: secret.into(),
            tolerance_secs,
        }
    }

    /// Verification against an explicit clock, in unix seconds.
    pub fn verify_at(
        &self,
        raw_body: &[u8],
        signature: Option<&str>,
        now: i64,
    ) -> Result<BillingEvent, VerificationError> {
        let header = signature
            .filter(|s| !s.trim().is_empty())
            .ok_or(VerificationError::MissingSignature)?;
        let parsed = parse_header(header)?;

        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|_| VerificationError::SignatureMismatch)?;
        mac.update(parsed.timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(raw_body);

        // verify_slice compares in constant time and consumes the mac
        let matched = parsed
            .signatures
            .iter()
            .any(|sig| mac.clone().verify_slice(sig).is_ok());
        if !matched {
            return Err(VerificationError::SignatureMismatch);
        }

        if (now - parsed.timestamp).abs() > self.tolerance_secs {
            return Err(VerificationError::TimestampOutsideTolerance);
        }

        parse_event(raw_body)
    }
}

impl BillingVerifierPort for StripeVerifier {
    fn verify_and_parse(
        &self,
        raw_body: &[u8],
        signature: Option<&str>,
    ) -> Result<BillingEvent, VerificationError> {
        self.verify_at(raw_body, signature, chrono::Utc::now().timestamp())
    }
}

fn parse_event(raw_body: &[u8]) -> Result<BillingEvent, VerificationError> {
    let raw: RawEvent = serde_json::from_slice(raw_body)
        .map_err(|e| VerificationError::InvalidPayload(e.to_string()))?;

    if raw.event_type == CHECKOUT_COMPLETED {
        let session: CheckoutSession = serde_json::from_value(raw.data.object)
            .map_err(|e| VerificationError::InvalidPayload(e.to_string()))?;
        Ok(BillingEvent::CheckoutCompleted {
            event_id: raw.id,
            session,
        })
    } else {
        Ok(BillingEvent::Other {
            event_id: raw.id,
            event_type: raw.event_type,
        })
    }
}

/// Builds a `Stripe-Signature` header value for `raw_body`.
pub fn sign(secret: &str, timestamp: i64, raw_body: &[u8]) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC accepts keys of any length"),
    };
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(raw_body);
    format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
}
