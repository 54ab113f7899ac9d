//! Metrics for the gateway
//!
//! Counters and histograms are recorded through the `metrics` facade and
//! rendered in Prometheus text format by the handle returned from [`init`].
//! Without an installed recorder every call here is a no-op, which is what
//! unit and integration tests rely on.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Every metric name used in the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    FetchAttempts,
    FetchRetries,
    FetchFailures,
    FetchBytes,
    BatchesAssembled,
    BatchesRejected,
    BatchItems,
    PublishAttempts,
    PublishOutcomes,
    ChannelsInUse,
    RequestsFinished,
    StageDuration,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::FetchAttempts => "train_gateway_fetch_attempts_total",
            MetricName::FetchRetries => "train_gateway_fetch_retries_total",
            MetricName::FetchFailures => "train_gateway_fetch_failures_total",
            MetricName::FetchBytes => "train_gateway_fetch_bytes_total",
            MetricName::BatchesAssembled => "train_gateway_batches_assembled_total",
            MetricName::BatchesRejected => "train_gateway_batches_rejected_total",
            MetricName::BatchItems => "train_gateway_batch_items",
            MetricName::PublishAttempts => "train_gateway_publish_attempts_total",
            MetricName::PublishOutcomes => "train_gateway_publish_outcomes_total",
            MetricName::ChannelsInUse => "train_gateway_broker_channels_in_use",
            MetricName::RequestsFinished => "train_gateway_requests_total",
            MetricName::StageDuration => "train_gateway_stage_duration_seconds",
        }
    }
}

/// Install the Prometheus recorder. Call once, from the binary.
pub fn init() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus recorder: {}", e))?;
    info!("Metrics recorder installed");
    Ok(handle)
}

pub mod fetch {
    use super::MetricName;

    pub fn attempt() {
        ::metrics::counter!(MetricName::FetchAttempts.as_str()).increment(1);
    }

    pub fn retry() {
        ::metrics::counter!(MetricName::FetchRetries.as_str()).increment(1);
    }

    pub fn failed() {
        ::metrics::counter!(MetricName::FetchFailures.as_str()).increment(1);
    }

    pub fn bytes(n: usize) {
        ::metrics::counter!(MetricName::FetchBytes.as_str()).increment(n as u64);
    }
}

pub mod batch {
    use super::MetricName;

    pub fn assembled(items: usize) {
        ::metrics::counter!(MetricName::BatchesAssembled.as_str()).increment(1);
        ::metrics::histogram!(MetricName::BatchItems.as_str()).record(items as f64);
    }

    pub fn rejected(kind: &'static str) {
        ::metrics::counter!(MetricName::BatchesRejected.as_str(), "kind" => kind).increment(1);
    }
}

pub mod publish {
    use super::MetricName;

    pub fn attempt() {
        ::metrics::counter!(MetricName::PublishAttempts.as_str()).increment(1);
    }

    pub fn outcome(outcome: &'static str) {
        ::metrics::counter!(MetricName::PublishOutcomes.as_str(), "outcome" => outcome)
            .increment(1);
    }

    pub fn channels_in_use(n: usize) {
        ::metrics::gauge!(MetricName::ChannelsInUse.as_str()).set(n as f64);
    }
}

pub mod request {
    use super::MetricName;

    pub fn finished(outcome: &'static str, stage: &'static str) {
        ::metrics::counter!(
            MetricName::RequestsFinished.as_str(),
            "outcome" => outcome,
            "stage" => stage
        )
        .increment(1);
    }

    pub fn stage_duration(stage: &'static str, secs: f64) {
        ::metrics::histogram!(MetricName::StageDuration.as_str(), "stage" => stage).record(secs);
    }
}
