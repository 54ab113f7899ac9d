use axum::http::StatusCode;
use std::fmt;
use thiserror::Error;

/// Failure reported by the object store adapter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct StoreError {
    pub retryable: bool,
    pub message: String,
}

impl StoreError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            retryable: true,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            retryable: false,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkErrorKind {
    /// Connection reset, timeout, broker overloaded.
    Transient,
    Unauthorized,
    Malformed,
    /// Broker accepted the message but no queue is bound to the routing key.
    Unroutable,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind:?}: {message}")]
pub struct SinkError {
    pub kind: SinkErrorKind,
    pub message: String,
}

impl SinkError {
    pub fn new(kind: SinkErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(SinkErrorKind::Transient, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == SinkErrorKind::Transient
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("missing or invalid credentials")]
    Unauthorized,

    #[error("credentials do not grant access")]
    Forbidden,

    #[error("identity service unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerificationError {
    #[error("missing signature header")]
    MissingSignature,

    #[error("malformed signature header")]
    MalformedHeader,

    #[error("signature timestamp outside tolerance")]
    TimestampOutsideTolerance,

    #[error("no signature matches the payload")]
    SignatureMismatch,

    #[error("invalid event payload: {0}")]
    InvalidPayload(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct AccountError {
    pub retryable: bool,
    pub message: String,
}

impl AccountError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            retryable: true,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            retryable: false,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyErrorKind {
    ListingFailed,
    PartialFailure,
    EmptyBatch,
    QuotaExceeded,
}

impl AssemblyErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssemblyErrorKind::ListingFailed => "listing_failed",
            AssemblyErrorKind::PartialFailure => "partial_failure",
            AssemblyErrorKind::EmptyBatch => "empty_batch",
            AssemblyErrorKind::QuotaExceeded => "quota_exceeded",
        }
    }
}

impl fmt::Display for AssemblyErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An object that could not be fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedItem {
    pub object_key: String,
    pub reason: String,
    pub attempts: u32,
}

/// Why a batch could not be built, or (under best effort) what was dropped from it.
///
/// `failed` lists every object that could not be fetched, sorted by key.
/// `discarded` lists fetched objects thrown away because the batch as a whole
/// was rejected, so `failed` and `discarded` together cover every task.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {detail}")]
pub struct AssemblyError {
    pub kind: AssemblyErrorKind,
    pub detail: String,
    pub failed: Vec<FailedItem>,
    pub discarded: Vec<String>,
}

impl AssemblyError {
    pub fn new(kind: AssemblyErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
            failed: Vec::new(),
            discarded: Vec::new(),
        }
    }

    pub fn listing_failed(detail: impl Into<String>) -> Self {
        Self::new(AssemblyErrorKind::ListingFailed, detail)
    }

    pub fn quota_exceeded(detail: impl Into<String>) -> Self {
        Self::new(AssemblyErrorKind::QuotaExceeded, detail)
    }

    pub fn failed_keys(&self) -> Vec<&str> {
        self.failed.iter().map(|f| f.object_key.as_str()).collect()
    }
}

/// Every way a request can fail once it reaches a use case.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("caller is not authenticated")]
    Unauthorized,

    #[error("caller is not allowed to perform this action")]
    Forbidden,

    #[error("webhook verification failed: {0}")]
    Verification(#[from] VerificationError),

    #[error(transparent)]
    Assembly(#[from] AssemblyError),

    #[error("publish failed (retryable: {retryable}): {message}")]
    PublishFailed { retryable: bool, message: String },

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("downstream service failed: {0}")]
    Downstream(String),

    #[error("request deadline expired")]
    Timeout,

    #[error("unexpected failure: {0}")]
    Unexpected(String),
}

impl From<IdentityError> for PipelineError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::Unauthorized => PipelineError::Unauthorized,
            IdentityError::Forbidden => PipelineError::Forbidden,
            IdentityError::Unavailable(msg) => PipelineError::Downstream(msg),
        }
    }
}

impl From<AccountError> for PipelineError {
    fn from(err: AccountError) -> Self {
        PipelineError::Downstream(err.message)
    }
}

impl PipelineError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            PipelineError::Unauthorized => StatusCode::UNAUTHORIZED,
            PipelineError::Forbidden => StatusCode::FORBIDDEN,
            PipelineError::Verification(_) | PipelineError::Validation(_) => {
                StatusCode::BAD_REQUEST
            }
            PipelineError::Assembly(err) => match err.kind {
                AssemblyErrorKind::QuotaExceeded => StatusCode::BAD_REQUEST,
                // Nothing uploaded is a caller problem; nothing downloadable is ours.
                AssemblyErrorKind::EmptyBatch if err.failed.is_empty() => StatusCode::BAD_REQUEST,
                AssemblyErrorKind::EmptyBatch
                | AssemblyErrorKind::ListingFailed
                | AssemblyErrorKind::PartialFailure => StatusCode::BAD_GATEWAY,
            },
            PipelineError::PublishFailed { .. } | PipelineError::Downstream(_) => {
                StatusCode::BAD_GATEWAY
            }
            PipelineError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            PipelineError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code exposed to callers.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::Unauthorized => "unauthorized",
            PipelineError::Forbidden => "forbidden",
            PipelineError::Verification(_) => "verification_failed",
            PipelineError::Assembly(err) => err.kind.as_str(),
            PipelineError::PublishFailed { .. } => "publish_failed",
            PipelineError::Validation(_) => "validation_failed",
            PipelineError::Downstream(_) => "downstream_failed",
            PipelineError::Timeout => "timeout",
            PipelineError::Unexpected(_) => "unexpected",
        }
    }

    /// Caller-facing message. Internal detail stays in the logs.
    pub fn public_message(&self) -> String {
        match self {
            PipelineError::Unauthorized => "Unauthorized".to_string(),
            PipelineError::Forbidden => "Forbidden".to_string(),
            PipelineError::Verification(_) => "Invalid webhook payload or signature".to_string(),
            PipelineError::Assembly(err) => match err.kind {
                AssemblyErrorKind::ListingFailed => "Could not list uploaded images".to_string(),
                AssemblyErrorKind::PartialFailure => {
                    "Some images could not be downloaded".to_string()
                }
                AssemblyErrorKind::EmptyBatch => "No images available for training".to_string(),
                AssemblyErrorKind::QuotaExceeded => {
                    "Uploaded images exceed the allowed count or size".to_string()
                }
            },
            PipelineError::PublishFailed { .. } => "Could not queue the training job".to_string(),
            PipelineError::Validation(msg) => msg.clone(),
            PipelineError::Downstream(_) => "A downstream service is unavailable".to_string(),
            PipelineError::Timeout => "Request timed out".to_string(),
            PipelineError::Unexpected(_) => "Internal error".to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Missing required environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Configuration error: {0}")]
    Invalid(String),
}
