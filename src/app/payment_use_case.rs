use crate::app::coordinator::{Failure, Invocation, Stage};
use crate::app::ports::{
    AccountPort, BillingVerifierPort, DeliveryClaim, DeliveryLedgerPort, DeliveryState,
};
use crate::error::{AccountError, PipelineError};
use crate::idempotency::billing_event_key;
use crate::pipeline::backoff::{sleep_or_cancelled, Backoff};
use crate::types::{BillingEvent, CheckoutSession};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentReceipt {
    Applied { user_id: String },
    /// The event id was already applied; nothing was written.
    AlreadyProcessed,
    Ignored { event_type: String },
}

#[derive(Debug, Clone, Copy)]
pub struct PaymentSettings {
    /// Retries after the first account call, transient failures only
    pub max_retries: u32,
    pub backoff: Backoff,
    pub deadline: Duration,
}

/// Applies verified checkout events to the paying user's account.
pub struct PaymentUseCase {
    verifier: Arc<dyn BillingVerifierPort>,
    accounts: Arc<dyn AccountPort>,
    ledger: Arc<dyn DeliveryLedgerPort>,
    settings: PaymentSettings,
}

impl PaymentUseCase {
    pub fn new(
        verifier: Arc<dyn BillingVerifierPort>,
        accounts: Arc<dyn AccountPort>,
        ledger: Arc<dyn DeliveryLedgerPort>,
        settings: PaymentSettings,
    ) -> Self {
        Self {
            verifier,
            accounts,
            ledger,
            settings,
        }
    }

    #[tracing::instrument(name = "payment", skip_all, fields(event_id = tracing::field::Empty))]
    pub async fn handle(
        &self,
        raw_body: &[u8],
        signature: Option<&str>,
    ) -> Result<PaymentReceipt, Failure> {
        let mut inv = Invocation::begin("payment", self.settings.deadline);
        let cancel = inv.cancel_token();

        let event = inv
            .run(Stage::Authorizing, async {
                self.verifier.verify_and_parse(raw_body, signature).map_err(PipelineError::from)
            })
            .await?;
        tracing::Span::current().record("event_id", event.event_id());

        let (event_id, session) = match event {
            BillingEvent::CheckoutCompleted { event_id, session } => (event_id, session),
            BillingEvent::Other { event_type, .. } => {
                info!(event_type = %event_type, "Unhandled event type");
                inv.succeed();
                return Ok(PaymentReceipt::Ignored { event_type });
            }
        };

        let key = billing_event_key(&event_id);
        let claim = match DeliveryClaim::acquire(&self.ledger, &key).await {
            Ok(claim) => claim,
            Err(DeliveryState::Completed) => {
                info!("Event already applied");
                inv.succeed();
                return Ok(PaymentReceipt::AlreadyProcessed);
            }
            Err(_) => {
                inv.advance(Stage::Assembling);
                // The provider redelivers on a non-2xx answer
                return Err(inv.fail(PipelineError::Downstream(
                    "event is already being processed".to_string(),
                )));
            }
        };

        // A failed or dropped apply releases the claim so a redelivery can retry it.
        let user_id = self.apply(&mut inv, &session, &cancel).await?;
        claim.complete().await;
        info!(user_id = %user_id, "Account marked as paid");
        inv.succeed();
        Ok(PaymentReceipt::Applied { user_id })
    }

    async fn apply(
        &self,
        inv: &mut Invocation,
        session: &CheckoutSession,
        cancel: &CancellationToken,
    ) -> Result<String, Failure> {
        let user_id = inv
            .run(Stage::Assembling, self.resolve_user(session, cancel))
            .await?;

        inv.run(Stage::Publishing, async {
            self.with_retry(cancel, || self.accounts.upsert_paid(&user_id))
                .await
                .map_err(PipelineError::from)
        })
        .await?;

        Ok(user_id)
    }

    async fn resolve_user(
        &self,
        session: &CheckoutSession,
        cancel: &CancellationToken,
    ) -> Result<String, PipelineError> {
        if let Some(reference) = session.reference_id() {
            let user = self
                .with_retry(cancel, || self.accounts.get_user_by_id(reference))
                .await?;
            return match user {
                Some(user) => Ok(user.id),
                None => Err(PipelineError::Validation(format!(
                    "User not found: ref_id {}",
                    reference
                ))),
            };
        }

        if let Some(email) = session.email() {
            // Not retried: a second invite for the same address is rejected.
            let user = self.accounts.invite_user_by_email(email).await?;
            debug!(user_id = %user.id, "Invited paying customer");
            return Ok(user.id);
        }

        Err(PipelineError::Validation("Missing reference id and email".to_string()))
    }

    async fn with_retry<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, AccountError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AccountError>>,
    {
        let mut retry = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.retryable && retry < self.settings.max_retries => {
                    let delay = self.settings.backoff.delay(retry);
                    retry += 1;
                    warn!(
                        attempt = retry,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Account call failed, retrying"
                    );
                    if !sleep_or_cancelled(delay, cancel).await {
                        return Err(err);
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }
}
