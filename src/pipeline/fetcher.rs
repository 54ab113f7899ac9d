use crate::app::ports::ObjectStorePort;
use crate::error::StoreError;
use crate::observability::metrics;
use crate::pipeline::backoff::{sleep_or_cancelled, Backoff};
use crate::types::{FetchResult, FetchTask};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const CANCELLED: &str = "cancelled";

#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Downloads in flight at once (at least 1)
    pub max_concurrency: usize,
    pub per_item_timeout: Duration,
    /// Retries after the first attempt
    pub max_retries: u32,
    pub backoff: Backoff,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            per_item_timeout: Duration::from_secs(10),
            max_retries: 3,
            backoff: Backoff::default(),
        }
    }
}

/// Downloads objects with bounded concurrency and per-object retry.
pub struct Fetcher {
    store: Arc<dyn ObjectStorePort>,
    options: FetchOptions,
}

impl Fetcher {
    pub fn new(store: Arc<dyn ObjectStorePort>, options: FetchOptions) -> Self {
        Self { store, options }
    }

    pub fn options(&self) -> &FetchOptions {
        &self.options
    }

    /// Returns exactly one result per task, in completion order.
    ///
    /// A failing object never aborts its siblings. Once `cancel` fires, queued
    /// tasks are not started and running ones stop at their next await point;
    /// both report a `cancelled` failure.
    pub async fn fetch_all(
        &self,
        tasks: Vec<FetchTask>,
        cancel: &CancellationToken,
    ) -> Vec<FetchResult> {
        if tasks.is_empty() {
            return Vec::new();
        }

        let total = tasks.len();
        let semaphore = Arc::new(Semaphore::new(self.options.max_concurrency.max(1)));
        let mut pending: HashSet<String> = tasks.iter().map(|t| t.object_key.clone()).collect();
        let mut results = Vec::with_capacity(total);
        let mut set = JoinSet::new();
        let mut queue = tasks.into_iter();

        // Dispatch: a task is only spawned once it holds a permit, so at most
        // `max_concurrency` downloads exist at any time.
        for task in queue.by_ref() {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    results.push(FetchResult::failed(&task.object_key, CANCELLED, 0));
                    break;
                }
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => {
                        results.push(FetchResult::failed(&task.object_key, CANCELLED, 0));
                        break;
                    }
                },
            };

            let store = self.store.clone();
            let options = self.options.clone();
            let cancel = cancel.clone();
            set.spawn(async move {
                let result = fetch_one(store.as_ref(), &task, &options, &cancel).await;
                drop(permit);
                result
            });
        }

        for task in queue {
            results.push(FetchResult::failed(&task.object_key, CANCELLED, 0));
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => warn!(error = %e, "Fetch worker ended abnormally"),
            }
        }

        // Keys with no result belonged to a worker that panicked.
        for result in &results {
            pending.remove(&result.object_key);
        }
        for key in pending {
            results.push(FetchResult::failed(key, "fetch worker aborted", 0));
        }

        debug!(
            total,
            failed = results.iter().filter(|r| !r.is_ok()).count(),
            "Fetch finished"
        );
        results
    }
}

async fn fetch_one(
    store: &dyn ObjectStorePort,
    task: &FetchTask,
    options: &FetchOptions,
    cancel: &CancellationToken,
) -> FetchResult {
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        metrics::fetch::attempt();

        let download = tokio::time::timeout(
            options.per_item_timeout,
            store.download(&task.owner_id, &task.object_key),
        );
        let error = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return FetchResult::failed(&task.object_key, CANCELLED, attempt);
            }
            outcome = download => match outcome {
                Ok(Ok(bytes)) => {
                    metrics::fetch::bytes(bytes.len());
                    return FetchResult::fetched(&task.object_key, bytes);
                }
                Ok(Err(e)) => e,
                Err(_) => StoreError::transient(format!(
                    "download timed out after {}ms",
                    options.per_item_timeout.as_millis()
                )),
            },
        };

        let retries_used = attempt - 1;
        if !error.retryable || retries_used >= options.max_retries {
            metrics::fetch::failed();
            warn!(
                object_key = %task.object_key,
                owner_id = %task.owner_id,
                attempt,
                retryable = error.retryable,
                error = %error,
                "Giving up on object"
            );
            return FetchResult::failed(&task.object_key, error.message, attempt);
        }

        let delay = options.backoff.delay(retries_used);
        metrics::fetch::retry();
        debug!(
            object_key = %task.object_key,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Retrying download"
        );
        if !sleep_or_cancelled(delay, cancel).await {
            return FetchResult::failed(&task.object_key, CANCELLED, attempt);
        }
    }
}
