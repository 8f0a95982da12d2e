//! Bank-data aggregator client. The orchestrator only sees the `Upstream`
//! trait; `GoCardlessClient` is the HTTP implementation.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{BankSyncError, Result};
use crate::settings::UpstreamSettings;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Institution {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub bic: Option<String>,
    #[serde(default)]
    pub logo: Option<String>,
    #[serde(default)]
    pub transaction_total_days: Option<String>,
}

/// A bank authorisation ("link") owning zero or more accounts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Requisition {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub institution_id: Option<String>,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub accounts: Vec<String>,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub access_valid_for_days: Option<i64>,
}

impl Requisition {
    /// Whole days until the authorisation lapses, or `None` without a
    /// parseable creation time.
    pub fn days_remaining(&self, valid_for_days: i64, now: DateTime<Utc>) -> Option<i64> {
        let created = DateTime::parse_from_rfc3339(self.created.as_deref()?).ok()?;
        let expires = created.with_timezone(&Utc) + Duration::days(valid_for_days);
        Some((expires - now).num_days())
    }

    pub fn expires_at(&self, valid_for_days: i64) -> Option<DateTime<Utc>> {
        let created = DateTime::parse_from_rfc3339(self.created.as_deref()?).ok()?;
        Some(created.with_timezone(&Utc) + Duration::days(valid_for_days))
    }
}

#[async_trait]
pub trait Upstream: Send + Sync {
    async fn list_institutions(&self, country: &str) -> Result<Vec<Institution>>;
    async fn create_requisition(&self, institution_id: &str, redirect_url: &str) -> Result<Requisition>;
    async fn list_requisitions(&self) -> Result<Vec<Requisition>>;
    /// Account metadata with the details object nested under `"account"`.
    async fn get_account(&self, account_id: &str) -> Result<Value>;
    async fn get_balances(&self, account_id: &str) -> Result<Value>;
    async fn get_transactions(&self, account_id: &str) -> Result<Value>;
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access: String,
    #[serde(default)]
    access_expires: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Paged<T> {
    results: Vec<T>,
}

struct CachedToken {
    access: String,
    expires_at: DateTime<Utc>,
}

/// Seconds shaved off the advertised token lifetime.
const TOKEN_EXPIRY_MARGIN_SECS: i64 = 60;

pub struct GoCardlessClient {
    client: Client,
    base_url: String,
    secret_id: String,
    secret_key: String,
    token: Mutex<Option<CachedToken>>,
}

impl GoCardlessClient {
    pub fn new(client: Client, settings: &UpstreamSettings) -> Self {
        Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            secret_id: settings.secret_id.clone(),
            secret_key: settings.secret_key.clone(),
            token: Mutex::new(None),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn access_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Utc::now() {
                return Ok(token.access.clone());
            }
        }
        if self.secret_id.is_empty() || self.secret_key.is_empty() {
            return Err(BankSyncError::Settings(
                "upstream secret_id and secret_key are not configured".into(),
            ));
        }
        debug!("requesting new upstream access token");
        let resp = self
            .client
            .post(self.url("/token/new/"))
            .json(&json!({ "secret_id": self.secret_id, "secret_key": self.secret_key }))
            .send()
            .await?;
        let token: TokenResponse = check(resp).await?.json().await?;
        let lifetime = token.access_expires.unwrap_or(3600) - TOKEN_EXPIRY_MARGIN_SECS;
        let access = token.access.clone();
        *cached = Some(CachedToken {
            access: token.access,
            expires_at: Utc::now() + Duration::seconds(lifetime.max(0)),
        });
        Ok(access)
    }

    async fn get_json(&self, path: &str) -> Result<Value> {
        let token = self.access_token().await?;
        let resp = self.client.get(self.url(path)).bearer_auth(token).send().await?;
        Ok(check(resp).await?.json().await?)
    }
}

/// Map non-success responses onto the error taxonomy.
async fn check(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(BankSyncError::RateLimited);
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(BankSyncError::Upstream { status: status.as_u16(), body });
    }
    Ok(resp)
}

#[async_trait]
impl Upstream for GoCardlessClient {
    async fn list_institutions(&self, country: &str) -> Result<Vec<Institution>> {
        let value = self.get_json(&format!("/institutions/?country={country}")).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn create_requisition(&self, institution_id: &str, redirect_url: &str) -> Result<Requisition> {
        let token = self.access_token().await?;
        let resp = self
            .client
            .post(self.url("/requisitions/"))
            .bearer_auth(token)
            .json(&json!({ "institution_id": institution_id, "redirect": redirect_url }))
            .send()
            .await?;
        Ok(check(resp).await?.json().await?)
    }

    async fn list_requisitions(&self) -> Result<Vec<Requisition>> {
        let value = self.get_json("/requisitions/").await?;
        let page: Paged<Requisition> = serde_json::from_value(value)?;
        Ok(page.results)
    }

    async fn get_account(&self, account_id: &str) -> Result<Value> {
        let mut meta = self.get_json(&format!("/accounts/{account_id}/")).await?;
        let details = self.get_json(&format!("/accounts/{account_id}/details/")).await?;
        if let Some(obj) = meta.as_object_mut() {
            obj.insert(
                "account".into(),
                details.get("account").cloned().unwrap_or(Value::Null),
            );
        }
        Ok(meta)
    }

    async fn get_balances(&self, account_id: &str) -> Result<Value> {
        self.get_json(&format!("/accounts/{account_id}/balances/")).await
    }

    async fn get_transactions(&self, account_id: &str) -> Result<Value> {
        let value = self.get_json(&format!("/accounts/{account_id}/transactions/")).await?;
        Ok(value.get("transactions").cloned().unwrap_or(value))
    }
}
