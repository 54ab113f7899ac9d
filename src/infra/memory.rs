use crate::app::ports::{DeliveryLedgerPort, DeliveryState, MessageSinkPort, SinkAck};
use crate::envelope::PublishEnvelope;
use crate::error::SinkError;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

/// In-memory delivery ledger for local runs and tests.
///
/// Entries older than `ttl` are forgotten on the next `begin`; a stale
/// in-flight marker therefore stops blocking its key after `ttl`.
pub struct MemoryLedger {
    entries: Mutex<HashMap<String, (DeliveryState, Instant)>>,
    ttl: Duration,
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new(Duration::from_secs(24 * 60 * 60))
    }
}

impl MemoryLedger {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DeliveryLedgerPort for MemoryLedger {
    async fn begin(&self, key: &str) -> DeliveryState {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        entries.retain(|_, (_, at)| now.duration_since(*at) < self.ttl);

        match entries.get(key) {
            Some((state, _)) => *state,
            None => {
                entries.insert(key.to_string(), (DeliveryState::InFlight, now));
                DeliveryState::New
            }
        }
    }

    async fn complete(&self, key: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), (DeliveryState::Completed, Instant::now()));
    }

    fn abandon(&self, key: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if matches!(entries.get(key), Some((DeliveryState::InFlight, _))) {
            entries.remove(key);
        }
    }
}

/// Message sink that keeps every delivered envelope in memory.
#[derive(Default)]
pub struct MemorySink {
    delivered: Mutex<HashSet<String>>,
    published: Mutex<Vec<PublishEnvelope>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<PublishEnvelope> {
        self.published.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl MessageSinkPort for MemorySink {
    async fn send(&self, envelope: &PublishEnvelope) -> Result<SinkAck, SinkError> {
        let mut delivered = self.delivered.lock().unwrap_or_else(PoisonError::into_inner);
        if !delivered.insert(envelope.idempotency_key().to_string()) {
            return Ok(SinkAck::AlreadyDelivered);
        }
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(envelope.clone());
        debug!(
            idempotency_key = %envelope.idempotency_key(),
            routing_key = %envelope.routing_key(),
            bytes = envelope.body().len(),
            "Envelope stored in memory sink"
        );
        Ok(SinkAck::Delivered)
    }
}
