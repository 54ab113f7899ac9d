use crate::app::ports::SinkAck;
use crate::envelope::PublishEnvelope;
use crate::error::SinkError;
use crate::observability::metrics;
use crate::pipeline::backoff::{sleep_or_cancelled, Backoff};
use crate::pipeline::pool::ChannelPool;
use crate::types::Batch;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct PublishOptions {
    pub routing_key: String,
    /// Retries after the first send, transient failures only
    pub max_retries: u32,
    pub backoff: Backoff,
    /// Upper bound on one send including the broker's confirmation
    pub send_timeout: Duration,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            routing_key: "train_photos".to_string(),
            max_retries: 3,
            backoff: Backoff::default(),
            send_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Acked,
    /// The sink already delivered this key. Counts as success.
    Duplicate,
    Failed { retryable: bool, reason: String },
}

impl PublishOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, PublishOutcome::Acked | PublishOutcome::Duplicate)
    }

    fn label(&self) -> &'static str {
        match self {
            PublishOutcome::Acked => "acked",
            PublishOutcome::Duplicate => "duplicate",
            PublishOutcome::Failed { retryable: true, .. } => "failed_retryable",
            PublishOutcome::Failed { retryable: false, .. } => "failed",
        }
    }
}

/// Emits one envelope per batch through the channel pool.
pub struct Publisher {
    pool: ChannelPool,
    options: PublishOptions,
}

impl Publisher {
    pub fn new(pool: ChannelPool, options: PublishOptions) -> Self {
        Self { pool, options }
    }

    pub fn pool(&self) -> &ChannelPool {
        &self.pool
    }

    #[tracing::instrument(
        skip_all,
        fields(idempotency_key = %batch.idempotency_key, items = batch.items.len())
    )]
    pub async fn publish(&self, batch: &Batch, cancel: &CancellationToken) -> PublishOutcome {
        let outcome = self.publish_inner(batch, cancel).await;
        metrics::publish::outcome(outcome.label());
        match &outcome {
            PublishOutcome::Acked => info!("Batch published"),
            PublishOutcome::Duplicate => info!("Batch already delivered, treating as success"),
            PublishOutcome::Failed { retryable, reason } => {
                warn!(retryable, reason = %reason, "Batch publish failed")
            }
        }
        outcome
    }

    async fn publish_inner(&self, batch: &Batch, cancel: &CancellationToken) -> PublishOutcome {
        let envelope = match PublishEnvelope::from_batch(batch, &self.options.routing_key) {
            Ok(env) => env,
            Err(e) => {
                return PublishOutcome::Failed {
                    retryable: false,
                    reason: format!("could not serialize batch: {}", e),
                }
            }
        };

        let Some(lease) = self.pool.acquire(cancel).await else {
            return PublishOutcome::Failed {
                retryable: true,
                reason: "cancelled".to_string(),
            };
        };

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            metrics::publish::attempt();

            let send = tokio::time::timeout(self.options.send_timeout, lease.send(&envelope));
            let error: SinkError = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return PublishOutcome::Failed {
                        retryable: true,
                        reason: "cancelled".to_string(),
                    };
                }
                outcome = send => match outcome {
                    Ok(Ok(SinkAck::Delivered)) => return PublishOutcome::Acked,
                    Ok(Ok(SinkAck::AlreadyDelivered)) => return PublishOutcome::Duplicate,
                    Ok(Err(e)) => e,
                    Err(_) => SinkError::transient(format!(
                        "send timed out after {}ms",
                        self.options.send_timeout.as_millis()
                    )),
                },
            };

            let retries_used = attempt - 1;
            if !error.is_retryable() || retries_used >= self.options.max_retries {
                return PublishOutcome::Failed {
                    retryable: error.is_retryable(),
                    reason: error.to_string(),
                };
            }

            let delay = self.options.backoff.delay(retries_used);
            debug!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying publish"
            );
            if !sleep_or_cancelled(delay, cancel).await {
                return PublishOutcome::Failed {
                    retryable: true,
                    reason: "cancelled".to_string(),
                };
            }
        }
    }
}
