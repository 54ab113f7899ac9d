use crate::error::{AssemblyError, AssemblyErrorKind, FailedItem};
use crate::idempotency::{compute_batch_key, sha256_hex};
use crate::observability::metrics;
use crate::types::{Batch, BatchItem, FailurePolicy, FetchResult, ObjectListing};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::Utc;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchLimits {
    pub max_items: usize,
    /// Sum of raw (pre-encoding) object sizes
    pub max_total_bytes: u64,
}

/// A batch ready to publish, plus what best effort had to leave out.
#[derive(Debug, Clone)]
pub struct Assembled {
    pub batch: Batch,
    /// `PartialFailure` listing the dropped objects; `None` when nothing was dropped.
    pub diagnostics: Option<AssemblyError>,
}

/// Rejects a listing that could never fit, so no download is spent on it.
pub fn check_listing_quota(
    listing: &[ObjectListing],
    limits: &BatchLimits,
) -> Result<(), AssemblyError> {
    let total: u64 = listing.iter().map(|o| o.size).sum();
    check_limits(listing.len(), total, limits)
}

fn check_limits(count: usize, total_bytes: u64, limits: &BatchLimits) -> Result<(), AssemblyError> {
    if count > limits.max_items {
        return Err(AssemblyError::quota_exceeded(format!(
            "{} objects exceed the limit of {}",
            count, limits.max_items
        )));
    }
    if total_bytes > limits.max_total_bytes {
        return Err(AssemblyError::quota_exceeded(format!(
            "{} bytes exceed the limit of {}",
            total_bytes, limits.max_total_bytes
        )));
    }
    Ok(())
}

/// Builds the batch for `owner_id` from fetch results.
///
/// Items come out sorted by filename whatever order the fetches finished in.
pub fn assemble(
    results: Vec<FetchResult>,
    owner_id: &str,
    limits: &BatchLimits,
    policy: FailurePolicy,
) -> Result<Assembled, AssemblyError> {
    let mut fetched: Vec<(String, Vec<u8>)> = Vec::with_capacity(results.len());
    let mut failed: Vec<FailedItem> = Vec::new();
    for result in results {
        match result.outcome {
            Ok(bytes) => fetched.push((result.object_key, bytes)),
            Err(f) => failed.push(FailedItem {
                object_key: result.object_key,
                reason: f.reason,
                attempts: f.attempts,
            }),
        }
    }
    failed.sort_by(|a, b| a.object_key.cmp(&b.object_key));
    fetched.sort_by(|a, b| a.0.cmp(&b.0));

    if !failed.is_empty() && policy == FailurePolicy::AllOrNothing {
        let mut err = AssemblyError::new(
            AssemblyErrorKind::PartialFailure,
            format!("{} of {} objects failed", failed.len(), failed.len() + fetched.len()),
        );
        err.discarded = fetched.into_iter().map(|(key, _)| key).collect();
        err.failed = failed;
        metrics::batch::rejected(err.kind.as_str());
        return Err(err);
    }

    if fetched.is_empty() {
        let mut err = AssemblyError::new(AssemblyErrorKind::EmptyBatch, "no objects to publish");
        err.failed = failed;
        metrics::batch::rejected(err.kind.as_str());
        return Err(err);
    }

    let total: u64 = fetched.iter().map(|(_, bytes)| bytes.len() as u64).sum();
    if let Err(mut err) = check_limits(fetched.len(), total, limits) {
        err.discarded = fetched.into_iter().map(|(key, _)| key).collect();
        err.failed = failed;
        metrics::batch::rejected(err.kind.as_str());
        return Err(err);
    }

    let items: Vec<BatchItem> = fetched
        .into_iter()
        .map(|(filename, bytes)| BatchItem {
            encoded_payload: STANDARD.encode(&bytes),
            size_bytes: bytes.len() as u64,
            sha256: sha256_hex(&bytes),
            filename,
        })
        .collect();

    let entries: Vec<(&str, &str)> = items
        .iter()
        .map(|i| (i.filename.as_str(), i.sha256.as_str()))
        .collect();
    let idempotency_key = compute_batch_key(owner_id, &entries);

    let diagnostics = if failed.is_empty() {
        None
    } else {
        let mut err = AssemblyError::new(
            AssemblyErrorKind::PartialFailure,
            format!("dropped {} of {} objects", failed.len(), failed.len() + items.len()),
        );
        err.failed = failed;
        Some(err)
    };

    metrics::batch::assembled(items.len());
    Ok(Assembled {
        batch: Batch {
            owner_id: owner_id.to_string(),
            items,
            created_at: Utc::now(),
            idempotency_key,
        },
        diagnostics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMITS: BatchLimits = BatchLimits {
        max_items: 10,
        max_total_bytes: 1_000,
    };

    fn ok(key: &str, body: &[u8]) -> FetchResult {
        FetchResult::fetched(key, body.to_vec())
    }

    fn bad(key: &str) -> FetchResult {
        FetchResult::failed(key, "connection reset", 4)
    }

    #[test]
    fn test_all_succeeded_sorted_under_both_policies() {
        for policy in [FailurePolicy::AllOrNothing, FailurePolicy::BestEffort] {
            let results = vec![ok("c.png", b"ccc"), ok("a.png", b"a"), ok("b.png", b"bb")];
            let assembled = assemble(results, "u1", &LIMITS, policy).unwrap();

            assert_eq!(assembled.batch.filenames(), vec!["a.png", "b.png", "c.png"]);
            assert_eq!(assembled.batch.total_bytes(), 6);
            assert!(assembled.diagnostics.is_none());
        }
    }

    #[test]
    fn test_key_stable_across_completion_orders() {
        let first = assemble(
            vec![ok("b.png", b"2"), ok("a.png", b"1")],
            "u1",
            &LIMITS,
            FailurePolicy::AllOrNothing,
        )
        .unwrap();
        let second = assemble(
            vec![ok("a.png", b"1"), ok("b.png", b"2")],
            "u1",
            &LIMITS,
            FailurePolicy::AllOrNothing,
        )
        .unwrap();
        assert_eq!(first.batch.idempotency_key, second.batch.idempotency_key);

        let changed = assemble(
            vec![ok("a.png", b"1"), ok("b.png", b"3")],
            "u1",
            &LIMITS,
            FailurePolicy::AllOrNothing,
        )
        .unwrap();
        assert_ne!(first.batch.idempotency_key, changed.batch.idempotency_key);
    }

    #[test]
    fn test_items_are_base64_encoded() {
        let assembled = assemble(
            vec![ok("a.png", &[0, 1, 2, 255])],
            "u1",
            &LIMITS,
            FailurePolicy::BestEffort,
        )
        .unwrap();
        assert_eq!(assembled.batch.items[0].encoded_payload, "AAEC/w==");
    }

    #[test]
    fn test_best_effort_drops_failures() {
        let results = vec![ok("a.png", b"1"), bad("b.png"), ok("c.png", b"3"), bad("d.png")];
        let assembled = assemble(results, "u1", &LIMITS, FailurePolicy::BestEffort).unwrap();

        assert_eq!(assembled.batch.filenames(), vec!["a.png", "c.png"]);
        let diag = assembled.diagnostics.unwrap();
        assert_eq!(diag.kind, AssemblyErrorKind::PartialFailure);
        assert_eq!(diag.failed_keys(), vec!["b.png", "d.png"]);
    }

    #[test]
    fn test_all_or_nothing_reports_every_key() {
        let results = vec![ok("a.png", b"1"), bad("b.png"), ok("c.png", b"3")];
        let err = assemble(results, "u1", &LIMITS, FailurePolicy::AllOrNothing).unwrap_err();

        assert_eq!(err.kind, AssemblyErrorKind::PartialFailure);
        assert_eq!(err.failed_keys(), vec!["b.png"]);
        assert_eq!(err.discarded, vec!["a.png".to_string(), "c.png".to_string()]);
        assert_eq!(err.failed[0].attempts, 4);
    }

    #[test]
    fn test_no_successes_is_empty_batch() {
        let err =
            assemble(vec![bad("a.png")], "u1", &LIMITS, FailurePolicy::BestEffort).unwrap_err();
        assert_eq!(err.kind, AssemblyErrorKind::EmptyBatch);
        assert_eq!(err.failed_keys(), vec!["a.png"]);

        let err = assemble(vec![], "u1", &LIMITS, FailurePolicy::AllOrNothing).unwrap_err();
        assert_eq!(err.kind, AssemblyErrorKind::EmptyBatch);
        assert!(err.failed.is_empty());
    }

    #[test]
    fn test_quota_on_fetched_bytes() {
        let limits = BatchLimits {
            max_items: 10,
            max_total_bytes: 4,
        };
        let at_limit = assemble(
            vec![ok("a.png", b"12"), ok("b.png", b"34")],
            "u1",
            &limits,
            FailurePolicy::BestEffort,
        );
        assert!(at_limit.is_ok());

        let err = assemble(
            vec![ok("a.png", b"12"), ok("b.png", b"345")],
            "u1",
            &limits,
            FailurePolicy::BestEffort,
        )
        .unwrap_err();
        assert_eq!(err.kind, AssemblyErrorKind::QuotaExceeded);
    }

    #[test]
    fn test_quota_on_item_count() {
        let limits = BatchLimits {
            max_items: 1,
            max_total_bytes: 1_000,
        };
        let err = assemble(
            vec![ok("a.png", b"1"), ok("b.png", b"2")],
            "u1",
            &limits,
            FailurePolicy::BestEffort,
        )
        .unwrap_err();
        assert_eq!(err.kind, AssemblyErrorKind::QuotaExceeded);
    }

    #[test]
    fn test_listing_quota_boundary() {
        let limits = BatchLimits {
            max_items: 5,
            max_total_bytes: 100,
        };
        let listing = |sizes: &[u64]| -> Vec<ObjectListing> {
            sizes
                .iter()
                .enumerate()
                .map(|(i, s)| ObjectListing { name: format!("{i}.png"), size: *s })
                .collect()
        };

        assert!(check_listing_quota(&listing(&[60, 40]), &limits).is_ok());
        let err = check_listing_quota(&listing(&[60, 41]), &limits).unwrap_err();
        assert_eq!(err.kind, AssemblyErrorKind::QuotaExceeded);
        let err = check_listing_quota(&listing(&[1, 1, 1, 1, 1, 1]), &limits).unwrap_err();
        assert_eq!(err.kind, AssemblyErrorKind::QuotaExceeded);
    }
}
