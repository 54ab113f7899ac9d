use crate::app::coordinator::{Failure, Invocation, Stage};
use crate::app::ports::{IdentityPort, ObjectStorePort};
use crate::error::{AssemblyError, PipelineError};
use crate::pipeline::{
    assemble, check_listing_quota, BatchLimits, Fetcher, PublishOutcome, Publisher,
};
use crate::types::{FailurePolicy, FetchTask};
use axum::http::HeaderMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// What the trigger reports back once the batch is queued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrainReceipt {
    /// The batch's idempotency key
    pub batch_id: String,
    pub item_count: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct TrainSettings {
    pub limits: BatchLimits,
    pub policy: FailurePolicy,
    /// Budget for the whole request
    pub deadline: Duration,
}

/// Collects a caller's uploads into one batch and queues it for training.
pub struct TrainUseCase {
    identity: Arc<dyn IdentityPort>,
    store: Arc<dyn ObjectStorePort>,
    fetcher: Fetcher,
    publisher: Publisher,
    settings: TrainSettings,
}

impl TrainUseCase {
    pub fn new(
        identity: Arc<dyn IdentityPort>,
        store: Arc<dyn ObjectStorePort>,
        fetcher: Fetcher,
        publisher: Publisher,
        settings: TrainSettings,
    ) -> Self {
        Self {
            identity,
            store,
            fetcher,
            publisher,
            settings,
        }
    }

    #[tracing::instrument(name = "train", skip_all, fields(owner_id = tracing::field::Empty))]
    pub async fn trigger(&self, headers: &HeaderMap) -> Result<TrainReceipt, Failure> {
        let mut inv = Invocation::begin("train", self.settings.deadline);
        let cancel = inv.cancel_token();

        let owner_id = inv
            .run(Stage::Authorizing, async {
                self.identity.resolve_caller(headers).await.map_err(PipelineError::from)
            })
            .await?;
        tracing::Span::current().record("owner_id", owner_id.as_str());

        let listing = inv
            .run(Stage::Listing, async {
                let listing = self
                    .store
                    .list(&owner_id)
                    .await
                    .map_err(|e| AssemblyError::listing_failed(e.message))?;
                check_listing_quota(&listing, &self.settings.limits)?;
                Ok::<_, PipelineError>(listing)
            })
            .await?;

        let tasks: Vec<FetchTask> = listing
            .into_iter()
            .map(|object| FetchTask::new(owner_id.as_str(), object.name))
            .collect();
        let results = inv
            .run(Stage::Fetching, async { Ok(self.fetcher.fetch_all(tasks, &cancel).await) })
            .await?;

        let assembled = inv
            .run(Stage::Assembling, async {
                assemble(results, &owner_id, &self.settings.limits, self.settings.policy)
                    .map_err(PipelineError::from)
            })
            .await?;
        if let Some(dropped) = &assembled.diagnostics {
            warn!(
                failed = ?dropped.failed_keys(),
                "Publishing without objects that could not be fetched"
            );
        }
        let batch = assembled.batch;

        inv.run(Stage::Publishing, async {
            match self.publisher.publish(&batch, &cancel).await {
                PublishOutcome::Acked | PublishOutcome::Duplicate => Ok(()),
                PublishOutcome::Failed { retryable, reason } => {
                    Err(PipelineError::PublishFailed {
                        retryable,
                        message: reason,
                    })
                }
            }
        })
        .await?;

        info!(
            idempotency_key = %batch.idempotency_key,
            items = batch.items.len(),
            bytes = batch.total_bytes(),
            "Ready for training"
        );
        inv.succeed();

        Ok(TrainReceipt {
            item_count: batch.items.len(),
            batch_id: batch.idempotency_key,
        })
    }
}
