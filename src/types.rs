use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry of an owner's upload listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectListing {
    pub name: String,
    pub size: u64,
}

/// A single object to download. Consumed exactly once by the fetcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTask {
    pub object_key: String,
    pub owner_id: String,
}

impl FetchTask {
    pub fn new(owner_id: impl Into<String>, object_key: impl Into<String>) -> Self {
        Self {
            object_key: object_key.into(),
            owner_id: owner_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchFailure {
    pub reason: String,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResult {
    pub object_key: String,
    pub outcome: Result<Vec<u8>, FetchFailure>,
}

impl FetchResult {
    pub fn fetched(object_key: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            object_key: object_key.into(),
            outcome: Ok(bytes),
        }
    }

    pub fn failed(object_key: impl Into<String>, reason: impl Into<String>, attempts: u32) -> Self {
        Self {
            object_key: object_key.into(),
            outcome: Err(FetchFailure {
                reason: reason.into(),
                attempts,
            }),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// What to do when some objects of a batch could not be fetched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Any failed object rejects the whole batch.
    #[default]
    AllOrNothing,
    /// Failed objects are dropped; the batch goes out if anything succeeded.
    BestEffort,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItem {
    pub filename: String,
    /// Base64 (standard alphabet, padded) of the object bytes.
    pub encoded_payload: String,
    pub size_bytes: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub owner_id: String,
    pub items: Vec<BatchItem>,
    pub created_at: DateTime<Utc>,
    pub idempotency_key: String,
}

impl Batch {
    pub fn total_bytes(&self) -> u64 {
        self.items.iter().map(|i| i.size_bytes).sum()
    }

    pub fn filenames(&self) -> Vec<&str> {
        self.items.iter().map(|i| i.filename.as_str()).collect()
    }
}

/// A user account as seen by the payment path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerDetails {
    #[serde(default)]
    pub email: Option<String>,
}

/// The subset of a checkout session the payment path reads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSession {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub client_reference_id: Option<String>,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub customer_details: Option<CustomerDetails>,
}

impl CheckoutSession {
    pub fn reference_id(&self) -> Option<&str> {
        self.client_reference_id.as_deref().filter(|s| !s.is_empty())
    }

    /// `customer_email` wins over the email collected at checkout.
    pub fn email(&self) -> Option<&str> {
        self.customer_email
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| {
                self.customer_details
                    .as_ref()
                    .and_then(|d| d.email.as_deref())
                    .filter(|s| !s.is_empty())
            })
    }
}

/// A verified billing provider event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BillingEvent {
    CheckoutCompleted { event_id: String, session: CheckoutSession },
    Other { event_id: String, event_type: String },
}

impl BillingEvent {
    pub fn event_id(&self) -> &str {
        match self {
            BillingEvent::CheckoutCompleted { event_id, .. }
            | BillingEvent::Other { event_id, .. } => {
                event_id
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkout_email_fallback() {
        let session = CheckoutSession {
            customer_email: None,
            customer_details: Some(CustomerDetails {
                email: Some("a@b.c".into()),
            }),
            ..Default::default()
        };
        assert_eq!(session.email(), Some("a@b.c"));

        let session = CheckoutSession {
            customer_email: Some("first@b.c".into()),
            customer_details: Some(CustomerDetails {
                email: Some("second@b.c".into()),
            }),
            ..Default::default()
        };
        assert_eq!(session.email(), Some("first@b.c"));
    }

    #[test]
    fn test_empty_reference_is_absent() {
        let session = CheckoutSession {
            client_reference_id: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(session.reference_id(), None);
        assert_eq!(session.email(), None);
    }

    #[test]
    fn test_failure_policy_serde() {
        let p: FailurePolicy = serde_json::from_str("\"best_effort\"").unwrap();
        assert_eq!(p, FailurePolicy::BestEffort);
        assert_eq!(FailurePolicy::default(), FailurePolicy::AllOrNothing);
    }
}
