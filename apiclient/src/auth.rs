//! Token acquisition: one [`TokenProvider`] trait behind which either login flow from §9's
//! resolved Open Question lives — `BearerTokenProvider` for production (the token is supplied
//! directly by configuration) and `DemoLoginProvider` for the sample/demo backend (a cookie
//! exchange via `/login` followed by `/access`).

use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use url::Url;

use crate::dto::{AccessTokenResponse, LoginRequest};
use crate::error::BackendError;

/// Tokens are valid ~14 minutes (§6); refresh a margin early so an in-flight request never races
/// expiry.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self, http: &Client, base_url: &Url) -> Result<String, BackendError>;

    /// Called once `CryptoBootstrap` has learned the device's client id, so the demo flow's
    /// `/access?client_id=…` call can include it. A no-op for providers that don't need it.
    fn set_client_id(&self, _client_id: &str) {}
}

pub struct BearerTokenProvider {
    token: String,
}

impl BearerTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }
}

#[async_trait]
impl TokenProvider for BearerTokenProvider {
    async fn access_token(&self, _http: &Client, _base_url: &Url) -> Result<String, BackendError> {
        Ok(self.token.clone())
    }
}

struct Cached {
    token: String,
    expires_at: Instant,
}

pub struct DemoLoginProvider {
    email: String,
    password: String,
    client_id: Mutex<Option<String>>,
    cached: Mutex<Option<Cached>>,
}

impl DemoLoginProvider {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            client_id: Mutex::new(None),
            cached: Mutex::new(None),
        }
    }

    async fn login(&self, http: &Client, base_url: &Url) -> Result<(), BackendError> {
        let url = base_url.join("login").map_err(|e| BackendError::InvalidUrl(e.to_string()))?;
        let response = http
            .post(url)
            .json(&LoginRequest { email: &self.email, password: &self.password })
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Client { status, body });
        }
        Ok(())
    }

    async fn fetch_access_token(&self, http: &Client, base_url: &Url) -> Result<AccessTokenResponse, BackendError> {
        let mut url = base_url.join("access").map_err(|e| BackendError::InvalidUrl(e.to_string()))?;
        if let Some(client_id) = self.client_id.lock().unwrap().clone() {
            url.query_pairs_mut().append_pair("client_id", &client_id);
        }
        let response = http.post(url).send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Client { status, body });
        }
        response.json().await.map_err(|e| BackendError::Decode(e.to_string()))
    }
}

#[async_trait]
impl TokenProvider for DemoLoginProvider {
    async fn access_token(&self, http: &Client, base_url: &Url) -> Result<String, BackendError> {
        if let Some(cached) = self.cached.lock().unwrap().as_ref() {
            if cached.expires_at > Instant::now() {
                return Ok(cached.token.clone());
            }
        }
        self.login(http, base_url).await?;
        let response = self.fetch_access_token(http, base_url).await?;
        let expires_at = Instant::now() + Duration::from_secs(response.expires_in).saturating_sub(TOKEN_REFRESH_MARGIN);
        let token = response.access_token.clone();
        *self.cached.lock().unwrap() = Some(Cached { token: token.clone(), expires_at });
        Ok(token)
    }

    fn set_client_id(&self, client_id: &str) {
        *self.client_id.lock().unwrap() = Some(client_id.to_string());
    }
}
