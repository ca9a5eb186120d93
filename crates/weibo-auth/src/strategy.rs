//! Token acquisition strategies
//!
//! Two independent ways to obtain an [`AccessToken`]:
//! - [`AuthCode`]: redirect consent flow, then exchange of the returned code
//! - [`SignedRequest`]: verification of a `signed_request` handed to apps
//!   embedded in Weibo pages
//!
//! Both implement [`Strategy`] so `AuthClient` can hold them side by side.

use std::future::Future;
use std::pin::Pin;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use common::Secret;
use rand::RngExt;
use reqwest::Url;
use tracing::debug;

use crate::error::Result;
use crate::params::{self, Params};
use crate::signed_request::{self, Verification};
use crate::token::{AccessToken, TokenEndpoint};

/// A way of turning some input into an access token.
///
/// Uses `Pin<Box<dyn Future>>` so strategies stay usable behind `dyn`.
pub trait Strategy: Send + Sync {
    type Input: ?Sized + Sync;

    /// Identifier for logging (e.g. "auth_code", "signed_request")
    fn id(&self) -> &'static str;

    fn acquire<'a>(
        &'a self,
        input: &'a Self::Input,
    ) -> Pin<Box<dyn Future<Output = Result<AccessToken>> + Send + 'a>>;
}

/// Input for the authorization code strategy.
#[derive(Debug, Clone, Default)]
pub struct AuthCodeGrant {
    pub code: String,
    /// Extra form parameters for the token request
    pub params: Params,
}

impl AuthCodeGrant {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            params: Vec::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }
}

/// Authorization code flow.
#[derive(Debug, Clone)]
pub struct AuthCode {
    endpoint: TokenEndpoint,
    authorize_endpoint: Url,
    client_id: String,
    redirect_uri: String,
}

impl AuthCode {
    pub fn new(
        endpoint: TokenEndpoint,
        authorize_endpoint: Url,
        client_id: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            endpoint,
            authorize_endpoint,
            client_id: client_id.into(),
            redirect_uri: redirect_uri.into(),
        }
    }

    /// Consent URL to send the user to.
    ///
    /// Starts from `client_id`, `response_type=code` and the configured
    /// `redirect_uri`; caller params are merged over them and kept verbatim
    /// (a caller may point this particular consent at another callback).
    pub fn authorize_url(&self, params: &[(&str, &str)]) -> Url {
        let merged = params::merge(
            &[
                ("client_id", self.client_id.as_str()),
                ("response_type", "code"),
                ("redirect_uri", self.redirect_uri.as_str()),
            ],
            params,
        );
        let mut url = self.authorize_endpoint.clone();
        url.query_pairs_mut().extend_pairs(merged);
        url
    }

    /// Exchange a code for a token using the configured redirect URI.
    pub async fn get_token(&self, code: &str, params: &[(&str, &str)]) -> Result<AccessToken> {
        self.endpoint
            .exchange_code(code, &self.redirect_uri, params)
            .await
    }

    pub fn token_endpoint(&self) -> &TokenEndpoint {
        &self.endpoint
    }
}

impl Strategy for AuthCode {
    type Input = AuthCodeGrant;

    fn id(&self) -> &'static str {
        "auth_code"
    }

    fn acquire<'a>(
        &'a self,
        input: &'a AuthCodeGrant,
    ) -> Pin<Box<dyn Future<Output = Result<AccessToken>> + Send + 'a>> {
        Box::pin(async move {
            let params: Vec<(&str, &str)> = input
                .params
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .collect();
            self.get_token(&input.code, &params).await
        })
    }
}

/// Signed request flow. Pure local work: no token endpoint involved.
#[derive(Debug, Clone)]
pub struct SignedRequest {
    secret: Secret<String>,
}

impl SignedRequest {
    pub fn new(secret: Secret<String>) -> Self {
        Self { secret }
    }

    /// Decode and verify without minting a token.
    pub fn parse(&self, signed_request: &str) -> Result<Verification> {
        signed_request::verify(signed_request, self.secret.expose_bytes())
    }

    /// Verify and build a token from the embedded `oauth_token`/`expires`.
    pub fn get_token(&self, signed_request: &str) -> Result<AccessToken> {
        let payload = self.parse(signed_request)?.into_payload()?;
        debug!(fields = payload.len(), "building token from signed request");
        AccessToken::from_signed_payload(payload)
    }
}

impl Strategy for SignedRequest {
    type Input = str;

    fn id(&self) -> &'static str {
        "signed_request"
    }

    fn acquire<'a>(
        &'a self,
        input: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<AccessToken>> + Send + 'a>> {
        Box::pin(async move { self.get_token(input) })
    }
}

/// Random `state` value for CSRF protection of the consent redirect.
///
/// 32 random bytes as URL-safe base64 (43 characters). Store it alongside
/// the user's session and compare it with the `state` on the callback.
pub fn generate_state() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
