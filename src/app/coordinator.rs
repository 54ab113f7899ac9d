use crate::error::PipelineError;
use crate::observability::metrics;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Where an invocation is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Received,
    Authorizing,
    Listing,
    Fetching,
    Assembling,
    Publishing,
    Responding,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Received => "received",
            Stage::Authorizing => "authorizing",
            Stage::Listing => "listing",
            Stage::Fetching => "fetching",
            Stage::Assembling => "assembling",
            Stage::Publishing => "publishing",
            Stage::Responding => "responding",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failure of an invocation: the stage it was in and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub stage: Stage,
    pub error: PipelineError,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed while {}: {}", self.stage, self.error)
    }
}

impl std::error::Error for Failure {}

/// One request moving through the stage machine under a single deadline.
///
/// When the deadline passes, the cancellation token fires so every fetch and
/// publish holding a clone stops at its next await point.
pub struct Invocation {
    request_id: Uuid,
    route: &'static str,
    current: Stage,
    started: Instant,
    stage_started: Instant,
    deadline: Instant,
    cancel: CancellationToken,
}

impl Invocation {
    pub fn begin(route: &'static str, budget: Duration) -> Self {
        let now = Instant::now();
        let request_id = Uuid::new_v4();
        debug!(%request_id, route, budget_ms = budget.as_millis() as u64, "Request received");
        Self {
            request_id,
            route,
            current: Stage::Received,
            started: now,
            stage_started: now,
            deadline: now + budget,
            cancel: CancellationToken::new(),
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn stage(&self) -> Stage {
        self.current
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn advance(&mut self, stage: Stage) {
        if stage == self.current {
            return;
        }
        let now = Instant::now();
        metrics::request::stage_duration(
            self.current.as_str(),
            now.duration_since(self.stage_started).as_secs_f64(),
        );
        self.current = stage;
        self.stage_started = now;
    }

    /// Runs `fut` as `stage`, bounded by what is left of the deadline.
    pub async fn run<T, F>(&mut self, stage: Stage, fut: F) -> Result<T, Failure>
    where
        F: Future<Output = Result<T, PipelineError>>,
    {
        self.advance(stage);
        if Instant::now() >= self.deadline {
            self.cancel.cancel();
            return Err(self.fail(PipelineError::Timeout));
        }

        match tokio::time::timeout_at(self.deadline, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err(self.fail(error)),
            Err(_) => {
                self.cancel.cancel();
                Err(self.fail(PipelineError::Timeout))
            }
        }
    }

    /// Marks the invocation failed in its current stage.
    pub fn fail(&mut self, error: PipelineError) -> Failure {
        let stage = self.current;
        match &error {
            PipelineError::Assembly(err) if !err.failed.is_empty() => warn!(
                request_id = %self.request_id,
                route = self.route,
                stage = stage.as_str(),
                code = error.code(),
                failed = ?err.failed_keys(),
                error = %error,
                "Request failed"
            ),
            _ => warn!(
                request_id = %self.request_id,
                route = self.route,
                stage = stage.as_str(),
                code = error.code(),
                error = %error,
                "Request failed"
            ),
        }
        metrics::request::finished("failed", stage.as_str());
        Failure { stage, error }
    }

    pub fn succeed(mut self) {
        self.advance(Stage::Responding);
        info!(
            request_id = %self.request_id,
            route = self.route,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "Request succeeded"
        );
        metrics::request::finished("succeeded", Stage::Responding.as_str());
    }
}
