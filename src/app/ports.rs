use crate::envelope::PublishEnvelope;
use crate::error::{AccountError, IdentityError, SinkError, StoreError, VerificationError};
use crate::types::{BillingEvent, ObjectListing, UserRecord};
use async_trait::async_trait;
use axum::http::HeaderMap;
use std::sync::Arc;

// Training-side ports
#[async_trait]
pub trait ObjectStorePort: Send + Sync {
    async fn list(&self, owner_id: &str) -> Result<Vec<ObjectListing>, StoreError>;
    async fn download(&self, owner_id: &str, name: &str) -> Result<Vec<u8>, StoreError>;
}

#[async_trait]
pub trait IdentityPort: Send + Sync {
    /// Returns the owner id of the authenticated caller.
    async fn resolve_caller(&self, headers: &HeaderMap) -> Result<String, IdentityError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkAck {
    Delivered,
    /// The sink already holds a message with this idempotency key.
    AlreadyDelivered,
}

#[async_trait]
pub trait MessageSinkPort: Send + Sync {
    async fn send(&self, envelope: &PublishEnvelope) -> Result<SinkAck, SinkError>;
}

// Payment-side ports
pub trait BillingVerifierPort: Send + Sync {
    fn verify_and_parse(
        &self,
        raw_body: &[u8],
        signature: Option<&str>,
    ) -> Result<BillingEvent, VerificationError>;
}

#[async_trait]
pub trait AccountPort: Send + Sync {
    async fn get_user_by_id(&self, id: &str) -> Result<Option<UserRecord>, AccountError>;
    async fn invite_user_by_email(&self, email: &str) -> Result<UserRecord, AccountError>;
    async fn upsert_paid(&self, id: &str) -> Result<(), AccountError>;
}

// Shared
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    /// First sighting; the caller now holds the in-flight marker and must
    /// `complete` or `abandon` it.
    New,
    InFlight,
    Completed,
}

#[async_trait]
pub trait DeliveryLedgerPort: Send + Sync {
    async fn begin(&self, key: &str) -> DeliveryState;
    async fn complete(&self, key: &str);
    /// Releases an in-flight marker. Called from `Drop`, so it must not block.
    fn abandon(&self, key: &str);
}

/// In-flight marker on one ledger key.
///
/// Dropping the claim without `complete` releases the key, so a delivery cut
/// short by a timeout or a dropped request can be retried straight away.
pub struct DeliveryClaim {
    ledger: Arc<dyn DeliveryLedgerPort>,
    key: String,
    settled: bool,
}

impl DeliveryClaim {
    /// Claims `key`, or returns the state that already holds it.
    pub async fn acquire(
        ledger: &Arc<dyn DeliveryLedgerPort>,
        key: &str,
    ) -> Result<Self, DeliveryState> {
        match ledger.begin(key).await {
            DeliveryState::New => Ok(Self {
                ledger: ledger.clone(),
                key: key.to_string(),
                settled: false,
            }),
            held => Err(held),
        }
    }

    pub async fn complete(mut self) {
        self.ledger.complete(&self.key).await;
        self.settled = true;
    }
}

impl Drop for DeliveryClaim {
    fn drop(&mut self) {
        if !self.settled {
            self.ledger.abandon(&self.key);
        }
    }
}
