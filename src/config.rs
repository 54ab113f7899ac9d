use crate::error::ConfigError;
use crate::pipeline::{Backoff, BatchLimits};
use crate::types::FailurePolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub pipeline: PipelineConfig,
    pub storage: StorageConfig,
    pub broker: BrokerConfig,
    pub payment: PaymentConfig,
    /// Endpoints and secrets, only ever read from the environment
    #[serde(skip)]
    pub env: EnvSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub log_dir: String,
    pub metrics_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            log_dir: "logs".to_string(),
            metrics_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub max_concurrency: usize,
    pub per_item_timeout_ms: u64,
    pub max_retries: u32,
    pub backoff: Backoff,
    pub max_items: usize,
    pub max_total_bytes: u64,
    pub failure_policy: FailurePolicy,
    pub request_deadline_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            per_item_timeout_ms: 10_000,
            max_retries: 3,
            backoff: Backoff::default(),
            max_items: 50,
            max_total_bytes: 50 * 1024 * 1024,
            failure_policy: FailurePolicy::AllOrNothing,
            request_deadline_ms: 60_000,
        }
    }
}

impl PipelineConfig {
    pub fn limits(&self) -> BatchLimits {
        BatchLimits {
            max_items: self.max_items,
            max_total_bytes: self.max_total_bytes,
        }
    }

    pub fn per_item_timeout(&self) -> Duration {
        Duration::from_millis(self.per_item_timeout_ms)
    }

    pub fn request_deadline(&self) -> Duration {
        Duration::from_millis(self.request_deadline_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub bucket: String,
    pub page_size: usize,
    pub http_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket: "photos-for-training".to_string(),
            page_size: 100,
            http_timeout_ms: 15_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerKind {
    /// Messages are kept in process memory; nothing reaches a worker.
    Memory,
    #[default]
    Rabbitmq,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub kind: BrokerKind,
    pub routing_key: String,
    pub exchange: String,
    pub vhost: String,
    pub tls: bool,
    pub pool_size: usize,
    pub send_timeout_ms: u64,
    pub max_retries: u32,
    /// How long a delivered key is remembered for duplicate detection
    pub ledger_ttl_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            kind: BrokerKind::Rabbitmq,
            routing_key: "train_photos".to_string(),
            exchange: "amq.default".to_string(),
            vhost: "/".to_string(),
            tls: true,
            pool_size: 4,
            send_timeout_ms: 5_000,
            max_retries: 3,
            ledger_ttl_secs: 24 * 60 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaymentConfig {
    pub signature_tolerance_secs: i64,
    pub max_retries: u32,
    pub deadline_ms: u64,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            signature_tolerance_secs: 300,
            max_retries: 3,
            deadline_ms: 20_000,
        }
    }
}

/// Values taken from environment variables.
#[derive(Clone, Default)]
pub struct EnvSettings {
    pub supabase_url: Option<String>,
    pub supabase_anon_key: Option<String>,
    pub supabase_service_role_key: Option<String>,
    pub stripe_endpoint_secret: Option<String>,
    pub rabbitmq_host: Option<String>,
    pub rabbitmq_port: Option<String>,
    pub rabbitmq_username: Option<String>,
    pub rabbitmq_password: Option<String>,
}

impl std::fmt::Debug for EnvSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let set = |v: &Option<String>| if v.is_some() { "<set>" } else { "<unset>" };
        f.debug_struct("EnvSettings")
            .field("supabase_url", &self.supabase_url)
            .field("supabase_anon_key", &set(&self.supabase_anon_key))
            .field("supabase_service_role_key", &set(&self.supabase_service_role_key))
            .field("stripe_endpoint_secret", &set(&self.stripe_endpoint_secret))
            .field("rabbitmq_host", &self.rabbitmq_host)
            .field("rabbitmq_port", &self.rabbitmq_port)
            .field("rabbitmq_username", &self.rabbitmq_username)
            .field("rabbitmq_password", &set(&self.rabbitmq_password))
            .finish()
    }
}

pub fn require(value: &Option<String>, name: &'static str) -> Result<String, ConfigError> {
    value.clone().filter(|v| !v.is_empty()).ok_or(ConfigError::MissingEnv(name))
}

impl Config {
    /// Reads `path` and overlays the process environment.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let config_content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        let mut config = Self::from_toml_str(&config_content)?;
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        self.env = EnvSettings {
            supabase_url: lookup("SUPABASE_URL"),
            supabase_anon_key: lookup("SUPABASE_ANON_KEY"),
            supabase_service_role_key: lookup("SUPABASE_SERVICE_ROLE_KEY"),
            stripe_endpoint_secret: lookup("PRIVATE_STRIPE_ENDPOINT_SECRET"),
            rabbitmq_host: lookup("RABBITMQ_HOST"),
            rabbitmq_port: lookup("RABBITMQ_PORT"),
            rabbitmq_username: lookup("RABBITMQ_USERNAME"),
            rabbitmq_password: lookup("RABBITMQ_PASSWORD"),
        };
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.pipeline;
        if p.max_concurrency == 0 {
            return Err(ConfigError::Invalid("pipeline.max_concurrency must be at least 1".into()));
        }
        if p.per_item_timeout_ms == 0 || p.request_deadline_ms == 0 {
            return Err(ConfigError::Invalid("pipeline timeouts must be non-zero".into()));
        }
        if p.max_items == 0 || p.max_total_bytes == 0 {
            return Err(ConfigError::Invalid("pipeline quotas must be non-zero".into()));
        }
        if p.backoff.base_ms == 0 {
            return Err(ConfigError::Invalid("pipeline.backoff.base_ms must be non-zero".into()));
        }
        if self.storage.page_size == 0 || self.storage.http_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "storage.page_size and http_timeout_ms must be non-zero".into(),
            ));
        }
        if self.broker.pool_size == 0 {
            return Err(ConfigError::Invalid("broker.pool_size must be at least 1".into()));
        }
        if self.broker.send_timeout_ms == 0 || self.payment.deadline_ms == 0 {
            return Err(ConfigError::Invalid("broker and payment timeouts must be non-zero".into()));
        }
        if self.payment.signature_tolerance_secs <= 0 {
            return Err(ConfigError::Invalid(
                "payment.signature_tolerance_secs must be positive".into(),
            ));
        }

        require(&self.env.supabase_url, "SUPABASE_URL")?;
        require(&self.env.supabase_anon_key, "SUPABASE_ANON_KEY")?;
        require(&self.env.supabase_service_role_key, "SUPABASE_SERVICE_ROLE_KEY")?;
        require(&self.env.stripe_endpoint_secret, "PRIVATE_STRIPE_ENDPOINT_SECRET")?;
        if self.broker.kind == BrokerKind::Rabbitmq {
            require(&self.env.rabbitmq_host, "RABBITMQ_HOST")?;
            require(&self.env.rabbitmq_username, "RABBITMQ_USERNAME")?;
            require(&self.env.rabbitmq_password, "RABBITMQ_PASSWORD")?;
            self.rabbitmq_port()?;
        }
        Ok(())
    }

    /// Management API port; 443/15672 when unset, depending on TLS.
    pub fn rabbitmq_port(&self) -> Result<u16, ConfigError> {
        match self.env.rabbitmq_port.as_deref().filter(|p| !p.is_empty()) {
            Some(raw) => raw
                .parse()
                .map_err(|_| {
                    ConfigError::Invalid(format!("RABBITMQ_PORT '{}' is not a port", raw))
                }),
            None if self.broker.tls => Ok(443),
            None => Ok(15672),
        }
    }
}
