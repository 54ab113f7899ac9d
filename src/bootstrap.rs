use crate::app::ports::{DeliveryLedgerPort, MessageSinkPort};
use crate::app::{PaymentSettings, PaymentUseCase, TrainSettings, TrainUseCase};
use crate::config::{require, BrokerKind, Config};
use crate::error::ConfigError;
use crate::infra::http_client::build_client;
use crate::infra::{
    MemoryLedger, MemorySink, RabbitMqEndpoint, RabbitMqSink, StripeVerifier, SupabaseAccounts,
    SupabaseClient, SupabaseIdentity, SupabaseStorage,
};
use crate::pipeline::{ChannelPool, FetchOptions, Fetcher, PublishOptions, Publisher};
use crate::server::AppState;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Wires the production adapters described by `config` into the use cases.
pub fn build_state(
    config: &Config,
    metrics: Option<PrometheusHandle>,
) -> Result<AppState, ConfigError> {
    let env = &config.env;
    let http = build_client(Duration::from_millis(config.storage.http_timeout_ms))
        .map_err(|e| ConfigError::Invalid(format!("HTTP client: {}", e)))?;

    let supabase = SupabaseClient::new(
        &require(&env.supabase_url, "SUPABASE_URL")?,
        require(&env.supabase_anon_key, "SUPABASE_ANON_KEY")?,
        Some(require(&env.supabase_service_role_key, "SUPABASE_SERVICE_ROLE_KEY")?),
        http.clone(),
    )?;

    // One ledger for broker dedupe and billing events; their keys never collide.
    let ledger: Arc<dyn DeliveryLedgerPort> =
        Arc::new(MemoryLedger::new(Duration::from_secs(config.broker.ledger_ttl_secs)));

    let sink: Arc<dyn MessageSinkPort> = match config.broker.kind {
        BrokerKind::Memory => {
            warn!("broker.kind is \"memory\": training batches stay in this process");
            Arc::new(MemorySink::new())
        }
        BrokerKind::Rabbitmq => {
            let endpoint = RabbitMqEndpoint {
                host: require(&env.rabbitmq_host, "RABBITMQ_HOST")?,
                port: config.rabbitmq_port()?,
                username: require(&env.rabbitmq_username, "RABBITMQ_USERNAME")?,
                password: require(&env.rabbitmq_password, "RABBITMQ_PASSWORD")?,
                tls: config.broker.tls,
                vhost: config.broker.vhost.clone(),
                exchange: config.broker.exchange.clone(),
            };
            Arc::new(
                RabbitMqSink::new(http.clone(), endpoint, ledger.clone())
                    .map_err(ConfigError::Invalid)?,
            )
        }
    };
    info!(kind = ?config.broker.kind, pool_size = config.broker.pool_size, "Message sink ready");

    let p = &config.pipeline;
    let storage = Arc::new(SupabaseStorage::new(
        supabase.clone(),
        &config.storage.bucket,
        config.storage.page_size,
    ));
    let fetcher = Fetcher::new(
        storage.clone(),
        FetchOptions {
            max_concurrency: p.max_concurrency,
            per_item_timeout: p.per_item_timeout(),
            max_retries: p.max_retries,
            backoff: p.backoff,
        },
    );
    let publisher = Publisher::new(
        ChannelPool::new(sink, config.broker.pool_size),
        PublishOptions {
            routing_key: config.broker.routing_key.clone(),
            max_retries: config.broker.max_retries,
            backoff: p.backoff,
            send_timeout: Duration::from_millis(config.broker.send_timeout_ms),
        },
    );
    let train = TrainUseCase::new(
        Arc::new(SupabaseIdentity::new(supabase.clone())),
        storage,
        fetcher,
        publisher,
        TrainSettings {
            limits: p.limits(),
            policy: p.failure_policy,
            deadline: p.request_deadline(),
        },
    );

    let payment = PaymentUseCase::new(
        Arc::new(StripeVerifier::new(
            require(&env.stripe_endpoint_secret, "PRIVATE_STRIPE_ENDPOINT_SECRET")?,
            config.payment.signature_tolerance_secs,
        )),
        Arc::new(SupabaseAccounts::new(supabase)),
        ledger,
        PaymentSettings {
            max_retries: config.payment.max_retries,
            backoff: p.backoff,
            deadline: Duration::from_millis(config.payment.deadline_ms),
        },
    );

    Ok(AppState {
        train: Arc::new(train),
        payment: Arc::new(payment),
        metrics,
    })
}
