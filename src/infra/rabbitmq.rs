use crate::app::ports::{
    DeliveryClaim, DeliveryLedgerPort, DeliveryState, MessageSinkPort, SinkAck,
};
use crate::envelope::PublishEnvelope;
use crate::error::{SinkError, SinkErrorKind};
use crate::infra::http_client::{is_retryable_error, is_retryable_status, truncate_body};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// AMQP persistent delivery mode.
const PERSISTENT: u8 = 2;

/// Where and how to reach the broker's management API.
#[derive(Clone)]
pub struct RabbitMqEndpoint {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub tls: bool,
    pub vhost: String,
    pub exchange: String,
}

impl std::fmt::Debug for RabbitMqEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RabbitMqEndpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("tls", &self.tls)
            .field("vhost", &self.vhost)
            .field("exchange", &self.exchange)
            .finish()
    }
}

impl RabbitMqEndpoint {
    pub fn publish_url(&self) -> Result<Url, String> {
        let scheme = if self.tls { "https" } else { "http" };
        let mut url = Url::parse(&format!("{}://{}:{}/", scheme, self.host, self.port))
            .map_err(|e| format!("invalid broker address '{}:{}': {}", self.host, self.port, e))?;
        url.path_segments_mut()
            .map_err(|_| format!("broker address '{}' is not a base URL", self.host))?
            .pop_if_empty()
            .extend(["api", "exchanges", self.vhost.as_str(), self.exchange.as_str(), "publish"]);
        Ok(url)
    }
}

#[derive(Serialize)]
struct PublishRequest<'a> {
    properties: Properties<'a>,
    routing_key: &'a str,
    payload: String,
    payload_encoding: &'static str,
}

#[derive(Serialize)]
struct Properties<'a> {
    message_id: &'a str,
    content_type: &'a str,
    delivery_mode: u8,
    headers: &'a BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct PublishResponse {
    routed: bool,
}

fn request_body(envelope: &PublishEnvelope) -> PublishRequest<'_> {
    PublishRequest {
        properties: Properties {
            message_id: envelope.idempotency_key(),
            content_type: envelope.content_type(),
            delivery_mode: PERSISTENT,
            headers: envelope.headers(),
        },
        routing_key: envelope.routing_key(),
        payload: STANDARD.encode(envelope.body()),
        payload_encoding: "base64",
    }
}

fn classify_status(status: StatusCode, body: &str) -> SinkError {
    let message = format!("broker responded {}: {}", status, truncate_body(body));
    let kind = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SinkErrorKind::Unauthorized,
        s if is_retryable_status(s) => SinkErrorKind::Transient,
        // 400 bad payload, 404 unknown vhost/exchange
        _ => SinkErrorKind::Malformed,
    };
    SinkError::new(kind, message)
}

/// Publishes envelopes through the RabbitMQ management HTTP API.
///
/// The broker has no idempotent publish, so delivered keys are tracked in the
/// delivery ledger and a repeat key is acknowledged without a second message.
pub struct RabbitMqSink {
    http: reqwest::Client,
    endpoint: RabbitMqEndpoint,
    url: Url,
    ledger: Arc<dyn DeliveryLedgerPort>,
}

impl RabbitMqSink {
    pub fn new(
        http: reqwest::Client,
        endpoint: RabbitMqEndpoint,
        ledger: Arc<dyn DeliveryLedgerPort>,
    ) -> Result<Self, String> {
        let url = endpoint.publish_url()?;
        Ok(Self {
            http,
            endpoint,
            url,
            ledger,
        })
    }

    async fn post(&self, envelope: &PublishEnvelope) -> Result<(), SinkError> {
        let resp = self
            .http
            .post(self.url.clone())
            .basic_auth(&self.endpoint.username, Some(&self.endpoint.password))
            .json(&request_body(envelope))
            .send()
            .await
            .map_err(|e| {
                let kind = if is_retryable_error(&e) {
                    SinkErrorKind::Transient
                } else {
                    SinkErrorKind::Malformed
                };
                SinkError::new(kind, format!("broker request failed: {}", e))
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let ack: PublishResponse = resp
            .json()
            .await
            .map_err(|e| SinkError::transient(format!("unreadable broker response: {}", e)))?;
        if !ack.routed {
            return Err(SinkError::new(
                SinkErrorKind::Unroutable,
                format!("no queue bound to routing key '{}'", envelope.routing_key()),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl MessageSinkPort for RabbitMqSink {
    async fn send(&self, envelope: &PublishEnvelope) -> Result<SinkAck, SinkError> {
        let key = envelope.idempotency_key();
        let claim = match DeliveryClaim::acquire(&self.ledger, key).await {
            Ok(claim) => claim,
            Err(DeliveryState::Completed) => return Ok(SinkAck::AlreadyDelivered),
            Err(_) => {
                return Err(SinkError::transient("another publish of this batch is in flight"))
            }
        };

        // Dropping this future mid-post drops the claim and frees the key.
        match self.post(envelope).await {
            Ok(()) => {
                claim.complete().await;
                debug!(
                    idempotency_key = %key,
                    exchange = %self.endpoint.exchange,
                    routing_key = %envelope.routing_key(),
                    "Broker routed message"
                );
                Ok(SinkAck::Delivered)
            }
            Err(err) => {
                warn!(idempotency_key = %key, kind = ?err.kind, "Broker publish rejected");
                Err(err)
            }
        }
    }
}
