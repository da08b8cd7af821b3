//! # Auth Session
//!
//! Holds the Kite Connect credentials and the current access token.
//!
//! ## Description
//! Tokens come from the interactive Connect login: the user opens the login
//! URL, completes the flow, and pastes back the `request_token`, which is
//! exchanged (with a SHA-256 checksum of key + request token + secret) for a
//! 24-hour access token. The token and its expiry are persisted into the
//! config file so restarts inside the validity window skip the login. A
//! 401/403 anywhere marks the session invalid; the next scan cycle is
//! expected to re-authenticate.

use crate::error::{ConnectorError, Result};
use boxarb_core::Settings;
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

struct TokenState {
    access_token: String,
    expiry: Option<DateTime<Utc>>,
}

pub struct AuthSession {
    settings: Arc<Settings>,
    host: String,
    api_key: String,
    api_secret: String,
    state: Mutex<TokenState>,
}

impl AuthSession {
    /// Loads credentials and any persisted token from the settings store.
    pub fn from_settings(settings: Arc<Settings>) -> Self {
        let api_key = settings.get_str("api/key", "");
        let api_secret = settings.get_str("api/secret", "");
        if api_key.is_empty() || api_secret.is_empty() {
            error!("api/key or api/secret missing from configuration");
        }
        let host = settings.get_str("api/host", "https://api.kite.trade");

        let access_token = settings.get_str("auth/access_token", "");
        let expiry = {
            let raw = settings.get_str("auth/expiry", "");
            DateTime::parse_from_rfc3339(&raw)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
        };
        if !access_token.is_empty() {
            info!("loaded persisted access token from configuration");
        }

        Self {
            settings,
            host,
            api_key,
            api_secret,
            state: Mutex::new(TokenState { access_token, expiry }),
        }
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// URL the user opens in a browser to start the Connect login flow.
    pub fn login_url(&self) -> String {
        format!(
            "https://kite.zerodha.com/connect/login?api_key={}&v=3",
            self.api_key
        )
    }

    /// True while a non-empty token is inside its validity window.
    pub fn is_valid(&self) -> bool {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.access_token.is_empty() {
            return false;
        }
        match state.expiry {
            Some(expiry) => Utc::now() < expiry,
            None => false,
        }
    }

    /// Value for the `Authorization` header.
    pub fn authorization_header(&self) -> String {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        format!("token {}:{}", self.api_key, state.access_token)
    }

    /// Marks the session invalid (called on 401/403) and persists the
    /// cleared token so the next start re-authenticates.
    pub fn invalidate(&self) {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.access_token.clear();
            state.expiry = None;
        }
        warn!("access token invalidated");
        self.persist();
    }

    /// Exchanges an interactive-login `request_token` for an access token.
    pub async fn exchange_request_token(
        &self,
        http: &reqwest::Client,
        request_token: &str,
    ) -> Result<()> {
        if self.api_key.is_empty() || self.api_secret.is_empty() {
            return Err(ConnectorError::AuthInvalid);
        }

        let checksum = self.checksum(request_token);
        let url = format!("{}/session/token", self.host);
        let response = http
            .post(&url)
            .header("X-Kite-Version", "3")
            .form(&[
                ("api_key", self.api_key.as_str()),
                ("request_token", request_token),
                ("checksum", checksum.as_str()),
            ])
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;
        let value: serde_json::Value =
            serde_json::from_str(&body).map_err(|e| ConnectorError::Parse(e.to_string()))?;

        if status != 200 || value.get("status").and_then(|s| s.as_str()) != Some("success") {
            let message = value
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("session token exchange failed")
                .to_string();
            return Err(ConnectorError::Api { status, message });
        }

        let token = value
            .pointer("/data/access_token")
            .and_then(|t| t.as_str())
            .ok_or_else(|| ConnectorError::Parse("no access_token in session response".into()))?
            .to_string();

        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.access_token = token;
            // Kite tokens are valid for roughly a trading day.
            state.expiry = Some(Utc::now() + Duration::hours(24));
        }
        info!("access token generated successfully");
        self.persist();
        Ok(())
    }

    /// SHA-256 over `api_key + request_token + api_secret`, hex-encoded.
    fn checksum(&self, request_token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.api_key.as_bytes());
        hasher.update(request_token.as_bytes());
        hasher.update(self.api_secret.as_bytes());
        let digest = hasher.finalize();
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Writes the current token and expiry back into the config file.
    fn persist(&self) {
        let (token, expiry) = {
            let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            (
                state.access_token.clone(),
                state.expiry.map(|e| e.to_rfc3339()).unwrap_or_default(),
            )
        };
        self.settings.set_str("auth/access_token", &token);
        self.settings.set_str("auth/expiry", &expiry);
        if let Err(e) = self.settings.save() {
            warn!("failed to persist auth details to config: {}", e);
        }
    }
}
