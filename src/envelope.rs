use crate::types::Batch;
use serde::Serialize;
use std::collections::BTreeMap;

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const HEADER_SESSION: &str = "session";
pub const HEADER_IDEMPOTENCY_KEY: &str = "idempotency-key";

/// Item shape the training worker consumes.
#[derive(Debug, Serialize)]
struct WireItem<'a> {
    base64: &'a str,
    filename: &'a str,
}

/// The single message built for a batch. Fields are private so an envelope
/// cannot change between construction and send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishEnvelope {
    idempotency_key: String,
    routing_key: String,
    content_type: String,
    headers: BTreeMap<String, String>,
    body: Vec<u8>,
}

impl PublishEnvelope {
    pub fn from_batch(batch: &Batch, routing_key: &str) -> Result<Self, serde_json::Error> {
        let wire: Vec<WireItem<'_>> = batch
            .items
            .iter()
            .map(|item| WireItem {
                base64: &item.encoded_payload,
                filename: &item.filename,
            })
            .collect();
        let body = serde_json::to_vec(&wire)?;

        let mut headers = BTreeMap::new();
        headers.insert(HEADER_SESSION.to_string(), batch.owner_id.clone());
        headers.insert(HEADER_IDEMPOTENCY_KEY.to_string(), batch.idempotency_key.clone());

        Ok(Self {
            idempotency_key: batch.idempotency_key.clone(),
            routing_key: routing_key.to_string(),
            content_type: CONTENT_TYPE_JSON.to_string(),
            headers,
            body,
        })
    }

    pub fn idempotency_key(&self) -> &str {
        &self.idempotency_key
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }
}
