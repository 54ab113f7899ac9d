#![allow(dead_code)]

use async_trait::async_trait;
use axum::http::{header, HeaderMap, HeaderValue};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use train_gateway::app::ports::{AccountPort, IdentityPort, ObjectStorePort};
use train_gateway::app::{PaymentSettings, PaymentUseCase, TrainSettings, TrainUseCase};
use train_gateway::error::{AccountError, IdentityError, StoreError};
use train_gateway::infra::{MemoryLedger, MemorySink, StripeVerifier};
use train_gateway::pipeline::{
    Backoff, BatchLimits, ChannelPool, FetchOptions, Fetcher, PublishOptions, Publisher,
};
use train_gateway::types::{FailurePolicy, ObjectListing, UserRecord};

pub const GOOD_TOKEN: &str = "Bearer good-token";
pub const WEBHOOK_SECRET: &str = "whsec_integration";

pub fn fast_backoff() -> Backoff {
    Backoff {
        base_ms: 1,
        factor: 2,
        max_ms: 5,
    }
}

pub fn auth_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::AUTHORIZATION, HeaderValue::from_static(GOOD_TOKEN));
    headers
}

/// Accepts `GOOD_TOKEN` as owner `u1`, refuses `Bearer banned` with 403.
pub struct FakeIdentity;

#[async_trait]
impl IdentityPort for FakeIdentity {
    async fn resolve_caller(&self, headers: &HeaderMap) -> Result<String, IdentityError> {
        match headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
            Some(GOOD_TOKEN) => Ok("u1".to_string()),
            Some("Bearer banned") => Err(IdentityError::Forbidden),
            _ => Err(IdentityError::Unauthorized),
        }
    }
}

/// Object store double: objects by name, some failing, some never answering.
#[derive(Default)]
pub struct FakeStore {
    objects: Mutex<Vec<(String, Vec<u8>)>>,
    failing: Mutex<HashSet<String>>,
    hanging: Mutex<HashSet<String>>,
    list_error: Mutex<Option<StoreError>>,
    pub downloads: AtomicUsize,
}

impl FakeStore {
    /// Objects as `(name, content)` pairs, listed in the given order.
    pub fn with_objects(objects: &[(&str, &str)]) -> Arc<Self> {
        let store = Self::default();
        *store.objects.lock().unwrap() = objects
            .iter()
            .map(|(name, content)| (name.to_string(), content.as_bytes().to_vec()))
            .collect();
        Arc::new(store)
    }

    pub fn fail(&self, name: &str) {
        self.failing.lock().unwrap().insert(name.to_string());
    }

    pub fn hang(&self, name: &str) {
        self.hanging.lock().unwrap().insert(name.to_string());
    }

    pub fn fail_listing(&self, err: StoreError) {
        *self.list_error.lock().unwrap() = Some(err);
    }

    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStorePort for FakeStore {
    async fn list(&self, _owner_id: &str) -> Result<Vec<ObjectListing>, StoreError> {
        let list_error = self.list_error.lock().unwrap().clone();
        if let Some(err) = list_error {
            return Err(err);
        }
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .map(|(name, bytes)| ObjectListing {
                name: name.clone(),
                size: bytes.len() as u64,
            })
            .collect())
    }

    async fn download(&self, _owner_id: &str, name: &str) -> Result<Vec<u8>, StoreError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        let hangs = self.hanging.lock().unwrap().contains(name);
        if hangs {
            std::future::pending::<()>().await;
        }
        let fails = self.failing.lock().unwrap().contains(name);
        if fails {
            return Err(StoreError::permanent(format!("{name} not found")));
        }
        let objects = self.objects.lock().unwrap().clone();
        objects
            .into_iter()
            .find(|(n, _)| n == name)
            .map(|(_, bytes)| bytes)
            .ok_or_else(|| StoreError::permanent(format!("{name} not found")))
    }
}

pub struct TrainHarness {
    pub use_case: TrainUseCase,
    pub store: Arc<FakeStore>,
    pub sink: Arc<MemorySink>,
}

pub fn train_harness(
    store: Arc<FakeStore>,
    limits: BatchLimits,
    policy: FailurePolicy,
    deadline: Duration,
) -> TrainHarness {
    let sink = Arc::new(MemorySink::new());
    let fetcher = Fetcher::new(
        store.clone(),
        FetchOptions {
            max_concurrency: 2,
            per_item_timeout: Duration::from_secs(10),
            max_retries: 1,
            backoff: fast_backoff(),
        },
    );
    let publisher = Publisher::new(
        ChannelPool::new(sink.clone(), 2),
        PublishOptions {
            backoff: fast_backoff(),
            ..PublishOptions::default()
        },
    );
    let use_case = TrainUseCase::new(
        Arc::new(FakeIdentity),
        store.clone(),
        fetcher,
        publisher,
        TrainSettings {
            limits,
            policy,
            deadline,
        },
    );
    TrainHarness {
        use_case,
        store,
        sink,
    }
}

/// Roomy limits, all-or-nothing, five second deadline.
pub fn strict_harness(store: Arc<FakeStore>) -> TrainHarness {
    train_harness(
        store,
        roomy_limits(),
        FailurePolicy::AllOrNothing,
        Duration::from_secs(5),
    )
}

pub fn roomy_limits() -> BatchLimits {
    BatchLimits {
        max_items: 100,
        max_total_bytes: 1024 * 1024,
    }
}

/// Account service double recording every write.
#[derive(Default)]
pub struct FakeAccounts {
    users: Mutex<HashMap<String, UserRecord>>,
    pub invited: Mutex<Vec<String>>,
    pub upserts: Mutex<Vec<String>>,
    /// Upserts that fail transiently before one succeeds
    pub upsert_failures: AtomicUsize,
    /// User lookups stall for half a minute while set
    pub slow_lookups: AtomicBool,
}

impl FakeAccounts {
    pub fn with_user(id: &str) -> Arc<Self> {
        let accounts = Self::default();
        accounts
            .users
            .lock()
            .unwrap()
            .insert(
                id.to_string(),
                UserRecord {
                    id: id.to_string(),
                    email: None,
                },
            );
        Arc::new(accounts)
    }

    pub fn upserted(&self) -> Vec<String> {
        self.upserts.lock().unwrap().clone()
    }
}

#[async_trait]
impl AccountPort for FakeAccounts {
    async fn get_user_by_id(&self, id: &str) -> Result<Option<UserRecord>, AccountError> {
        if self.slow_lookups.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        Ok(self.users.lock().unwrap().get(id).cloned())
    }

    async fn invite_user_by_email(&self, email: &str) -> Result<UserRecord, AccountError> {
        self.invited.lock().unwrap().push(email.to_string());
        Ok(UserRecord { id: format!("invited-{email}"), email: Some(email.to_string()) })
    }

    async fn upsert_paid(&self, id: &str) -> Result<(), AccountError> {
        let remaining = self.upsert_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.upsert_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(AccountError::transient("503 from rest api"));
        }
        self.upserts.lock().unwrap().push(id.to_string());
        Ok(())
    }
}

pub fn payment_use_case(accounts: Arc<FakeAccounts>) -> PaymentUseCase {
    PaymentUseCase::new(
        Arc::new(StripeVerifier::new(WEBHOOK_SECRET, 300)),
        accounts,
        Arc::new(MemoryLedger::default()),
        PaymentSettings {
            max_retries: 3,
            backoff: fast_backoff(),
            deadline: Duration::from_secs(5),
        },
    )
}

pub fn checkout_event(event_id: &str, reference: Option<&str>, email: Option<&str>) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "id": event_id,
        "type": "checkout.session.completed",
        "data": { "object": {
            "id": "cs_test",
            "client_reference_id": reference,
            "customer_email": email,
        }}
    }))
    .unwrap()
}

pub fn signed(body: &[u8]) -> String {
    train_gateway::infra::stripe::sign(WEBHOOK_SECRET, chrono::Utc::now().timestamp(), body)
}
