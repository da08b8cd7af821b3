//! # Authenticated HTTP Transport
//!
//! Thin wrapper over `reqwest` that every API call goes through. It owns the
//! cross-cutting response handling: rate-limit admission before each request,
//! session invalidation on 401/403, and budget shrink + retry on 429.

use crate::auth::AuthSession;
use crate::error::{ConnectorError, Result};
use boxarb_core::{RateLimiter, Settings};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Raw response surfaced to callers that parse non-JSON bodies (CSV).
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

pub struct KiteClient {
    http: reqwest::Client,
    host: String,
    auth: Arc<AuthSession>,
    limiter: Arc<RateLimiter>,
}

impl KiteClient {
    pub fn new(
        settings: &Settings,
        auth: Arc<AuthSession>,
        limiter: Arc<RateLimiter>,
    ) -> Result<Self> {
        let connect_timeout = settings.get_i64("api/connect_timeout_seconds", 10) as u64;
        let request_timeout = settings.get_i64("api/request_timeout_seconds", 30) as u64;
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout))
            .timeout(Duration::from_secs(request_timeout))
            .build()?;
        Ok(Self {
            http,
            host: settings.get_str("api/host", "https://api.kite.trade"),
            auth,
            limiter,
        })
    }

    /// The underlying client, for requests outside the Kite host (login flow).
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Rate-limited GET. Repeated params (`i=<token>`) are passed as repeated
    /// tuples. On 429 the limiter shrinks and the call re-enters admission.
    pub async fn get(&self, endpoint: &str, params: &[(String, String)]) -> Result<ApiResponse> {
        loop {
            if !self.auth.is_valid() {
                return Err(ConnectorError::AuthInvalid);
            }
            self.limiter.acquire(endpoint).await;

            let url = format!("{}{}", self.host, endpoint);
            let response = self
                .http
                .get(&url)
                .query(params)
                .header("X-Kite-Version", "3")
                .header("Authorization", self.auth.authorization_header())
                .send()
                .await?;

            let status = response.status().as_u16();
            let body = response.text().await?;
            debug!("GET {} -> {}", endpoint, status);

            match status {
                401 | 403 => {
                    warn!("authentication error on {} (status {})", endpoint, status);
                    self.auth.invalidate();
                    return Err(ConnectorError::AuthInvalid);
                }
                429 => {
                    warn!("upstream 429 on {}, shrinking budget and retrying", endpoint);
                    self.limiter.throttle(endpoint);
                    continue;
                }
                _ => return Ok(ApiResponse { status, body }),
            }
        }
    }

    /// GET that expects the `{status, data}` envelope and returns `data`.
    pub async fn get_json(&self, endpoint: &str, params: &[(String, String)]) -> Result<Value> {
        let response = self.get(endpoint, params).await?;
        unwrap_envelope(response.status, &response.body)
    }

    /// Rate-limited form-encoded POST (order placement, session calls).
    pub async fn post_form(&self, endpoint: &str, form: &[(String, String)]) -> Result<Value> {
        loop {
            if !self.auth.is_valid() {
                return Err(ConnectorError::AuthInvalid);
            }
            self.limiter.acquire(endpoint).await;

            let url = format!("{}{}", self.host, endpoint);
            let response = self
                .http
                .post(&url)
                .form(form)
                .header("X-Kite-Version", "3")
                .header("Authorization", self.auth.authorization_header())
                .send()
                .await?;

            let status = response.status().as_u16();
            let body = response.text().await?;
            debug!("POST {} -> {}", endpoint, status);

            match status {
                401 | 403 => {
                    warn!("authentication error on {} (status {})", endpoint, status);
                    self.auth.invalidate();
                    return Err(ConnectorError::AuthInvalid);
                }
                429 => {
                    warn!("upstream 429 on {}, shrinking budget and retrying", endpoint);
                    self.limiter.throttle(endpoint);
                    continue;
                }
                _ => return unwrap_envelope(status, &body),
            }
        }
    }

    /// Rate-limited DELETE (order cancel, session teardown).
    pub async fn delete(&self, endpoint: &str) -> Result<Value> {
        loop {
            if !self.auth.is_valid() {
                return Err(ConnectorError::AuthInvalid);
            }
            self.limiter.acquire(endpoint).await;

            let url = format!("{}{}", self.host, endpoint);
            let response = self
                .http
                .delete(&url)
                .header("X-Kite-Version", "3")
                .header("Authorization", self.auth.authorization_header())
                .send()
                .await?;

            let status = response.status().as_u16();
            let body = response.text().await?;
            debug!("DELETE {} -> {}", endpoint, status);

            match status {
                401 | 403 => {
                    self.auth.invalidate();
                    return Err(ConnectorError::AuthInvalid);
                }
                429 => {
                    self.limiter.throttle(endpoint);
                    continue;
                }
                _ => return unwrap_envelope(status, &body),
            }
        }
    }
}

/// Parses the `{status, data, message?}` envelope, returning `data`.
pub(crate) fn unwrap_envelope(status: u16, body: &str) -> Result<Value> {
    let value: Value =
        serde_json::from_str(body).map_err(|e| ConnectorError::Parse(e.to_string()))?;

    if !(200..300).contains(&status)
        || value.get("status").and_then(|s| s.as_str()) != Some("success")
    {
        let message = value
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("upstream request failed")
            .to_string();
        return Err(ConnectorError::Api { status, message });
    }

    Ok(value.get("data").cloned().unwrap_or(Value::Null))
}
