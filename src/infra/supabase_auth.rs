use crate::app::ports::{AccountPort, IdentityPort};
use crate::error::{AccountError, IdentityError};
use crate::infra::http_client::{is_retryable_error, is_retryable_status, truncate_body};
use crate::infra::supabase::SupabaseClient;
use crate::types::UserRecord;
use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use reqwest::StatusCode;
use serde::Serialize;
use tracing::{debug, warn};

/// Resolves the caller of the training trigger from their Supabase session.
pub struct SupabaseIdentity {
    client: SupabaseClient,
}

impl SupabaseIdentity {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl IdentityPort for SupabaseIdentity {
    async fn resolve_caller(&self, headers: &HeaderMap) -> Result<String, IdentityError> {
        let authorization = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.trim().is_empty())
            .ok_or(IdentityError::Unauthorized)?;

        let resp = self
            .client
            .http()
            .get(self.client.url(&["auth", "v1", "user"]))
            .header("apikey", self.client.anon_key())
            .header(header::AUTHORIZATION.as_str(), authorization)
            .send()
            .await
            .map_err(|e| IdentityError::Unavailable(format!("auth request failed: {}", e)))?;

        match resp.status() {
            s if s.is_success() => {
                let user: UserRecord = resp
                    .json()
                    .await
                    .map_err(|e| IdentityError::Unavailable(format!("unreadable user: {}", e)))?;
                if user.id.is_empty() {
                    return Err(IdentityError::Unauthorized);
                }
                Ok(user.id)
            }
            StatusCode::FORBIDDEN => Err(IdentityError::Forbidden),
            s if is_retryable_status(s) => {
                Err(IdentityError::Unavailable(format!("auth service responded {}", s)))
            }
            s => {
                debug!(status = %s, "Caller session rejected");
                Err(IdentityError::Unauthorized)
            }
        }
    }
}

#[derive(Serialize)]
struct InviteRequest<'a> {
    email: &'a str,
}

#[derive(Serialize)]
struct PaidRow<'a> {
    id: &'a str,
    paid: bool,
}

/// Admin access to Supabase users and the `user_info` table.
pub struct SupabaseAccounts {
    client: SupabaseClient,
}

impl SupabaseAccounts {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }

    async fn failure(resp: reqwest::Response, action: &str) -> AccountError {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        let message = format!("{} responded {}: {}", action, status, truncate_body(&body));
        if is_retryable_status(status) {
            AccountError::transient(message)
        } else {
            AccountError::permanent(message)
        }
    }

    fn transport(err: reqwest::Error, action: &str) -> AccountError {
        let message = format!("{} request failed: {}", action, err);
        if is_retryable_error(&err) {
            AccountError::transient(message)
        } else {
            AccountError::permanent(message)
        }
    }
}

#[async_trait]
impl AccountPort for SupabaseAccounts {
    async fn get_user_by_id(&self, id: &str) -> Result<Option<UserRecord>, AccountError> {
        let req = self.client.http().get(self.client.url(&["auth", "v1", "admin", "users", id]));
        let req = self.client.with_service_auth(req).map_err(AccountError::permanent)?;
        let resp = req.send().await.map_err(|e| Self::transport(e, "get user"))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(Self::failure(resp, "get user").await);
        }
        let user: UserRecord = resp.json().await.map_err(|e| Self::transport(e, "get user"))?;
        Ok(Some(user))
    }

    async fn invite_user_by_email(&self, email: &str) -> Result<UserRecord, AccountError> {
        let req = self
            .client
            .http()
            .post(self.client.url(&["auth", "v1", "invite"]))
            .json(&InviteRequest { email });
        let req = self.client.with_service_auth(req).map_err(AccountError::permanent)?;
        let resp = req.send().await.map_err(|e| Self::transport(e, "invite user"))?;

        if !resp.status().is_success() {
            return Err(Self::failure(resp, "invite user").await);
        }
        resp.json().await.map_err(|e| Self::transport(e, "invite user"))
    }

    async fn upsert_paid(&self, id: &str) -> Result<(), AccountError> {
        let req = self
            .client
            .http()
            .post(self.client.url(&["rest", "v1", "user_info"]))
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&[PaidRow { id, paid: true }]);
        let req = self.client.with_service_auth(req).map_err(AccountError::permanent)?;
        let resp = req.send().await.map_err(|e| Self::transport(e, "upsert user_info"))?;

        if !resp.status().is_success() {
            let err = Self::failure(resp, "upsert user_info").await;
            warn!(user_id = %id, retryable = err.retryable, "Paid flag upsert rejected");
            return Err(err);
        }
        Ok(())
    }
}
