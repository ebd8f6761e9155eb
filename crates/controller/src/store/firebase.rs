//! Firebase Realtime Database backend over the REST API.
//!
//! Sessions use email/password accounts from the identity toolkit. The
//! account is created on first start; an existing account is signed in
//! instead. ID tokens live for an hour and are refreshed from [`ready`]
//! shortly before they expire.
//!
//! [`ready`]: RemoteStore::ready

use anyhow::{bail, Context, Result};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::Instant;

use super::{Fields, RemoteStore};
use crate::config::StoreConfig;

const SIGN_UP: &str = "accounts:signUp";
const SIGN_IN: &str = "accounts:signInWithPassword";

/// Refresh this long before the ID token expires.
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Token lifetime assumed when the response does not say.
const DEFAULT_TOKEN_TTL_S: u64 = 3600;

// ---------------------------------------------------------------------------
// Auth wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountResponse {
    id_token: String,
    refresh_token: String,
    expires_in: String,
}

/// The secure token endpoint answers in snake_case.
#[derive(Debug, Deserialize)]
struct RefreshResponse {
    id_token: String,
    refresh_token: String,
    expires_in: String,
}

#[derive(Debug, Deserialize)]
struct AuthErrorBody {
    error: AuthError,
}

#[derive(Debug, Deserialize)]
struct AuthError {
    message: String,
}

struct Session {
    id_token: String,
    refresh_token: String,
    expires_at: Instant,
}

impl Session {
    fn new(id_token: String, refresh_token: String, expires_in: &str) -> Self {
        let ttl = expires_in.parse().unwrap_or(DEFAULT_TOKEN_TTL_S);
        Self {
            id_token,
            refresh_token,
            expires_at: Instant::now() + Duration::from_secs(ttl),
        }
    }

    fn is_valid(&self) -> bool {
        Instant::now() < self.expires_at
    }

    fn needs_refresh(&self) -> bool {
        Instant::now() + REFRESH_MARGIN >= self.expires_at
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub struct FirebaseStore {
    http: Client,
    database_url: String,
    api_key: String,
    email: String,
    password: String,
    identity_url: String,
    token_url: String,
    session: Option<Session>,
}

impl FirebaseStore {
    /// Every request made through this store is bounded by `timeout`.
    pub fn new(cfg: &StoreConfig, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build http client")?;

        Ok(Self {
            http,
            database_url: cfg.database_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            email: cfg.email.clone(),
            password: cfg.password.clone(),
            identity_url: cfg.identity_url.trim_end_matches('/').to_string(),
            token_url: cfg.token_url.clone(),
            session: None,
        })
    }

    /// Create the account, or sign in if it already exists.
    pub async fn sign_in(&mut self) -> Result<()> {
        let credentials = json!({
            "email": self.email,
            "password": self.password,
            "returnSecureToken": true,
        });

        let account = match self.account_request(SIGN_UP, &credentials).await? {
            Ok(account) => {
                tracing::info!(email = %self.email, "store account created");
                account
            }
            Err(reason) if reason == "EMAIL_EXISTS" => {
                match self.account_request(SIGN_IN, &credentials).await? {
                    Ok(account) => account,
                    Err(reason) => bail!("sign-in rejected: {reason}"),
                }
            }
            Err(reason) => bail!("sign-up rejected: {reason}"),
        };

        self.session = Some(Session::new(
            account.id_token,
            account.refresh_token,
            &account.expires_in,
        ));
        tracing::info!(email = %self.email, "store session established");
        Ok(())
    }

    /// POST to an identity toolkit endpoint. The inner `Err` carries the
    /// API's rejection message (e.g. `EMAIL_EXISTS`).
    async fn account_request(
        &self,
        method: &str,
        body: &Value,
    ) -> Result<std::result::Result<AccountResponse, String>> {
        let url = format!("{}/{method}", self.identity_url);
        let resp = self
            .http
            .post(&url)
            .query(&[("key", &self.api_key)])
            .json(body)
            .send()
            .await
            .with_context(|| format!("auth request failed: {url}"))?;

        if resp.status().is_success() {
            let account = resp.json().await.context("invalid auth response")?;
            Ok(Ok(account))
        } else {
            let status = resp.status();
            let reason = match resp.json::<AuthErrorBody>().await {
                Ok(body) => body.error.message,
                Err(_) => status.to_string(),
            };
            Ok(Err(reason))
        }
    }

    async fn refresh(&mut self) -> Result<()> {
        let refresh_token = match &self.session {
            Some(s) => s.refresh_token.clone(),
            None => bail!("no session to refresh"),
        };

        let resp = self
            .http
            .post(&self.token_url)
            .query(&[("key", &self.api_key)])
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.as_str()),
            ])
            .send()
            .await
            .context("token refresh request failed")?;

        let status = resp.status();
        if !status.is_success() {
            bail!("token refresh rejected: {status}");
        }
        let fresh: RefreshResponse = resp.json().await.context("invalid refresh response")?;
        self.session = Some(Session::new(
            fresh.id_token,
            fresh.refresh_token,
            &fresh.expires_in,
        ));
        tracing::debug!("store token refreshed");
        Ok(())
    }

    fn url(&self, path: &str) -> Result<String> {
        let session = self.session.as_ref().context("not signed in")?;
        Ok(format!(
            "{}/{}.json?auth={}",
            self.database_url,
            path.trim_start_matches('/'),
            session.id_token
        ))
    }

    /// Send a database request and return the JSON body, turning an error
    /// status into the reason string the database reported.
    async fn send(&self, req: RequestBuilder) -> Result<Value> {
        let resp = req.send().await?;
        let status = resp.status();

        if !status.is_success() {
            let body: Value = resp.json().await.unwrap_or(Value::Null);
            let reason = body
                .get("error")
                .and_then(Value::as_str)
                .map(str::to_owned)
                .unwrap_or_else(|| status.to_string());
            bail!("{reason}");
        }
        resp.json().await.context("invalid database response")
    }

    async fn put(&self, path: &str, value: &Value) -> Result<()> {
        let url = self.url(path)?;
        self.send(self.http.put(url).json(value)).await?;
        Ok(())
    }
}

impl RemoteStore for FirebaseStore {
    async fn ready(&mut self) -> bool {
        let result = match self.session.as_ref().map(Session::needs_refresh) {
            None => self.sign_in().await,
            Some(true) => match self.refresh().await {
                // An expired token with no way to refresh it: start over.
                Err(e) if !self.session.as_ref().is_some_and(Session::is_valid) => {
                    tracing::warn!("token refresh failed, signing in again: {e:#}");
                    self.session = None;
                    self.sign_in().await
                }
                other => other,
            },
            Some(false) => Ok(()),
        };
        if let Err(e) = result {
            tracing::warn!("store session not ready: {e:#}");
        }
        self.session.as_ref().is_some_and(Session::is_valid)
    }

    async fn get_bool(&mut self, path: &str) -> Result<bool> {
        let url = self.url(path)?;
        match self.send(self.http.get(url)).await? {
            Value::Bool(b) => Ok(b),
            Value::Null => bail!("path not exist"),
            other => bail!("type mismatch at {path}: expected boolean, found {other}"),
        }
    }

    async fn set_bool(&mut self, path: &str, value: bool) -> Result<()> {
        self.put(path, &Value::Bool(value)).await
    }

    async fn set_int(&mut self, path: &str, value: i64) -> Result<()> {
        self.put(path, &Value::from(value)).await
    }

    async fn set_object(&mut self, path: &str, fields: Fields) -> Result<()> {
        self.put(path, &Value::Object(fields)).await
    }

    async fn append(&mut self, path: &str, fields: Fields) -> Result<()> {
        let url = self.url(path)?;
        let body = self
            .send(self.http.post(url).json(&Value::Object(fields)))
            .await?;
        if let Some(key) = body.get("name").and_then(Value::as_str) {
            tracing::debug!(path, key, "appended log entry");
        }
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
