//! Authenticated Weibo client
//!
//! `AuthClient` owns the app credentials, routes authorization codes and
//! signed requests to the matching strategy, and holds the current access
//! token. Every API call goes through the authorization gate first.
//!
//! Token lifecycle:
//! - Unauthenticated → Authenticated via code exchange or signed request
//! - Authenticated → Expired implicitly, as wall-clock time passes
//! - Expired → Authenticated via `refresh()`
//! - any → Unauthenticated via `sign_out()` or a token endpoint rejection

use std::sync::Arc;
use std::time::SystemTime;

use reqwest::{Method, Url};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::constants::{AUTHORIZE_PATH, TOKEN_PATH};
use crate::error::{Error, ProviderError, Result};
use crate::signed_request::Verification;
use crate::strategy::{AuthCode, AuthCodeGrant, SignedRequest, Strategy};
use crate::token::{AccessToken, TokenEndpoint};

/// Where a client stands with respect to its access token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    Authenticated,
    /// Holds a token past its expiry; the gate denies but refresh may work
    Expired,
}

/// Weibo API client gated on a valid access token.
///
/// The token lives behind an `RwLock<Option<Arc<AccessToken>>>`: readers
/// clone the `Arc` and work with that snapshot, writers swap the whole
/// `Arc`, so nobody observes a half-updated token.
pub struct AuthClient {
    key: String,
    redirect_uri: String,
    site: Url,
    http: reqwest::Client,
    auth_code: AuthCode,
    signed_request: SignedRequest,
    token: RwLock<Option<Arc<AccessToken>>>,
}

impl AuthClient {
    /// Build a client from validated config. No network I/O happens here.
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| Error::Http(format!("building HTTP client: {e}")))?;
        Self::with_http_client(config, http)
    }

    /// Build a client around a caller-supplied `reqwest::Client`, e.g. one
    /// with its own timeouts or proxy settings.
    pub fn with_http_client(config: &Config, http: reqwest::Client) -> Result<Self> {
        config.validate()?;
        let site = config.site_url()?;
        let secret = config
            .app
            .secret
            .clone()
            .ok_or_else(|| common::Error::Config("app secret missing".into()))?;

        let token_url = join(&site, TOKEN_PATH)?;
        let authorize_url = join(&site, AUTHORIZE_PATH)?;

        let endpoint = TokenEndpoint::new(http.clone(), token_url, &config.app.key, secret.clone());
        let auth_code = AuthCode::new(
            endpoint,
            authorize_url,
            &config.app.key,
            &config.app.redirect_uri,
        );

        debug!(site = %site, client_id = %config.app.key, "auth client initialized");
        Ok(Self {
            key: config.app.key.clone(),
            redirect_uri: config.app.redirect_uri.clone(),
            site,
            http,
            auth_code,
            signed_request: SignedRequest::new(secret),
            token: RwLock::new(None),
        })
    }

    /// Build a client and authenticate it from a signed request in one step.
    pub fn from_signed_request(config: &Config, signed_request: &str) -> Result<Self> {
        let client = Self::new(config)?;
        let token = client.signed_request.get_token(signed_request)?;
        info!(strategy = client.signed_request.id(), "access token acquired");
        Ok(Self {
            token: RwLock::new(Some(Arc::new(token))),
            ..client
        })
    }

    /// App key (OAuth `client_id`).
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    pub fn site(&self) -> &Url {
        &self.site
    }

    /// Consent URL for the redirect flow; see [`AuthCode::authorize_url`].
    pub fn authorize_url(&self, params: &[(&str, &str)]) -> Url {
        self.auth_code.authorize_url(params)
    }

    /// Exchange an authorization code and hold the resulting token.
    pub async fn get_token(&self, code: &str, params: &[(&str, &str)]) -> Result<Arc<AccessToken>> {
        let grant = AuthCodeGrant {
            code: code.to_string(),
            params: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        };
        self.acquire(&self.auth_code, &grant).await
    }

    /// Verify a signed request and hold the embedded token.
    pub async fn get_token_from_signed_request(
        &self,
        signed_request: &str,
    ) -> Result<Arc<AccessToken>> {
        self.acquire(&self.signed_request, signed_request).await
    }

    /// Verify a signed request without touching the held token.
    pub fn parse_signed_request(&self, signed_request: &str) -> Result<Verification> {
        self.signed_request.parse(signed_request)
    }

    /// Refresh the held token and swap in the new one.
    ///
    /// Fails with `Unauthorized` (no network I/O) when no token is held.
    /// The result only replaces the token the refresh started from: if
    /// another caller signed out meanwhile this returns `Unauthorized`, and
    /// if another token was installed meanwhile that token is returned.
    pub async fn refresh(&self, refresh_params: &[(&str, &str)]) -> Result<Arc<AccessToken>> {
        let Some(current) = self.token().await else {
            return Err(Error::Unauthorized);
        };

        let refreshed = match current
            .refresh(self.auth_code.token_endpoint(), refresh_params)
            .await
        {
            Ok(token) => Arc::new(token),
            Err(e) => {
                self.discard_on_rejection("refresh", &e, Some(&current)).await;
                return Err(e);
            }
        };

        let mut held = self.token.write().await;
        match held.as_ref() {
            Some(token) if Arc::ptr_eq(token, &current) => {
                *held = Some(refreshed.clone());
                info!("access token refreshed");
                Ok(refreshed)
            }
            Some(token) => {
                debug!("token replaced during refresh, discarding refreshed token");
                Ok(token.clone())
            }
            None => {
                debug!("signed out during refresh, discarding refreshed token");
                Err(Error::Unauthorized)
            }
        }
    }

    /// Drop the held token.
    pub async fn sign_out(&self) {
        if self.token.write().await.take().is_some() {
            info!("signed out");
        }
    }

    /// Snapshot of the held token, expired or not.
    pub async fn token(&self) -> Option<Arc<AccessToken>> {
        self.token.read().await.clone()
    }

    /// Install a token obtained elsewhere, e.g. from another `AuthClient`.
    pub async fn set_token(&self, token: AccessToken) {
        *self.token.write().await = Some(Arc::new(token));
    }

    pub async fn state(&self) -> AuthState {
        self.state_at(SystemTime::now()).await
    }

    pub async fn state_at(&self, now: SystemTime) -> AuthState {
        match self.token().await {
            None => AuthState::Unauthenticated,
            Some(token) if token.is_expired_at(now) => AuthState::Expired,
            Some(_) => AuthState::Authenticated,
        }
    }

    /// The gate: a token is held and has not expired.
    pub async fn is_authorized(&self) -> bool {
        self.is_authorized_at(SystemTime::now()).await
    }

    pub async fn is_authorized_at(&self, now: SystemTime) -> bool {
        self.authorized_token(now).await.is_some()
    }

    /// Issue an authorized API call and return the parsed JSON body.
    ///
    /// `path` is relative to the site (e.g. `statuses/home_timeline.json`).
    /// GET and DELETE send `params` as the query string; other verbs send a
    /// form body. Without a valid token this fails with `Unauthorized` before
    /// any network I/O.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<Value> {
        let Some(token) = self.authorized_token(SystemTime::now()).await else {
            debug!(%method, path, "request denied: no valid access token");
            return Err(Error::Unauthorized);
        };

        let url = join(&self.site, path.trim_start_matches('/'))?;
        if url.origin() != self.site.origin() {
            warn!(%method, path, "request path leaves the API site, not sending token");
            return Err(Error::Http(format!("path {path} resolves outside {}", self.site)));
        }
        let builder = self
            .http
            .request(method.clone(), url)
            .header(reqwest::header::AUTHORIZATION, token.authorization_header());
        let builder = if method == Method::GET || method == Method::DELETE {
            builder.query(params)
        } else {
            builder.form(params)
        };

        let response = builder
            .send()
            .await
            .map_err(|e| Error::Http(format!("{method} {path} failed: {e}")))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Http(format!("reading {method} {path} response: {e}")))?;

        if !status.is_success() {
            let error = ProviderError::from_response(status.as_u16(), &body);
            warn!(%method, path, status = status.as_u16(), code = ?error.code, "API request failed");
            return Err(Error::Api(error));
        }

        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|e| {
            Error::Api(ProviderError {
                status: Some(status.as_u16()),
                description: Some(format!("invalid JSON response: {e}")),
                ..ProviderError::default()
            })
        })
    }

    pub async fn get(&self, path: &str, params: &[(&str, &str)]) -> Result<Value> {
        self.request(Method::GET, path, params).await
    }

    pub async fn post(&self, path: &str, params: &[(&str, &str)]) -> Result<Value> {
        self.request(Method::POST, path, params).await
    }

    async fn authorized_token(&self, now: SystemTime) -> Option<Arc<AccessToken>> {
        self.token().await.filter(|t| !t.is_expired_at(now))
    }

    /// Run a strategy, then install its token or sign out on rejection.
    async fn acquire<S: Strategy>(&self, strategy: &S, input: &S::Input) -> Result<Arc<AccessToken>> {
        let before = self.token().await;
        match strategy.acquire(input).await {
            Ok(token) => {
                let token = Arc::new(token);
                *self.token.write().await = Some(token.clone());
                info!(strategy = strategy.id(), "access token acquired");
                Ok(token)
            }
            Err(e) => {
                self.discard_on_rejection(strategy.id(), &e, before.as_ref())
                    .await;
                Err(e)
            }
        }
    }

    /// Sign out when the token endpoint rejected the attempt, but only if
    /// `expected` is still the held token.
    async fn discard_on_rejection(
        &self,
        operation: &str,
        error: &Error,
        expected: Option<&Arc<AccessToken>>,
    ) {
        if !error.is_endpoint_rejection() {
            warn!(operation, error = %error, "token acquisition failed, keeping current token");
            return;
        }

        let mut held = self.token.write().await;
        let still_held = matches!(
            (held.as_ref(), expected),
            (Some(token), Some(expected)) if Arc::ptr_eq(token, expected)
        );
        if still_held {
            warn!(operation, error = %error, "token endpoint rejected credential, signing out");
            held.take();
        } else {
            warn!(operation, error = %error, "token endpoint rejected credential, held token already changed");
        }
    }
}

fn join(base: &Url, path: &str) -> Result<Url> {
    base.join(path)
        .map_err(|e| Error::Http(format!("invalid URL path {path}: {e}")))
}
