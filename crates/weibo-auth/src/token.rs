//! Access tokens and the token endpoint
//!
//! Two token endpoint interactions, both a form POST to `oauth2/access_token`:
//! 1. Authorization code exchange (redirect flow completion)
//! 2. Token refresh
//!
//! An [`AccessToken`] can only be built from a successful token endpoint
//! response or from a verified signed request; its constructors are
//! crate-private.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use common::Secret;
use reqwest::Url;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::constants::AUTH_HEADER_SCHEME;
use crate::error::{Error, ProviderError, Result};
use crate::params;

/// Bearer credential for API calls.
///
/// Never mutated after construction: refresh produces a new token that the
/// holder swaps in whole.
#[derive(Debug, Clone)]
pub struct AccessToken {
    value: Secret<String>,
    expires_at: Option<SystemTime>,
    refresh_token: Option<Secret<String>>,
    params: Map<String, Value>,
}

impl AccessToken {
    pub(crate) fn new(value: String, expires_at: Option<SystemTime>) -> Self {
        Self {
            value: Secret::new(value),
            expires_at,
            refresh_token: None,
            params: Map::new(),
        }
    }

    /// Build from a token endpoint body. `now` anchors `expires_in`.
    pub(crate) fn from_response(response: TokenResponse, now: SystemTime) -> Result<Self> {
        let value = match response.access_token {
            Some(v) if !v.is_empty() => v,
            _ => {
                return Err(Error::AuthFailure(ProviderError::local(
                    "token response has no access_token",
                )));
            }
        };

        // Absolute expiry wins over the relative one when both are present
        let expires_at = match (response.expires_at, response.expires_in) {
            (Some(at), _) => Some(unix_seconds(at)),
            (None, Some(delta)) => Some(now.checked_add(Duration::from_secs(delta))),
            (None, None) => None,
        }
        .map(|at| {
            at.ok_or_else(|| {
                Error::AuthFailure(ProviderError::local("token expiry is out of range"))
            })
        })
        .transpose()?;

        Ok(Self {
            value: Secret::new(value),
            expires_at,
            refresh_token: response
                .refresh_token
                .filter(|t| !t.is_empty())
                .map(Secret::new),
            params: response.extra,
        })
    }

    /// Build from the payload of a verified signed request.
    ///
    /// Weibo embeds `oauth_token` and an absolute `expires` (unix seconds).
    /// A payload without `oauth_token` means the user has not authorized the
    /// app yet. Remaining fields (`user_id`, `issued_at`, ...) land in
    /// [`AccessToken::params`].
    pub(crate) fn from_signed_payload(mut payload: Map<String, Value>) -> Result<Self> {
        let value = match payload.remove("oauth_token") {
            Some(Value::String(v)) if !v.is_empty() => v,
            _ => {
                return Err(Error::AuthFailure(ProviderError::local(
                    "signed request carries no oauth_token; user has not authorized the app",
                )));
            }
        };

        let expires_at = match payload.remove("expires") {
            None | Some(Value::Null) => None,
            Some(raw) => {
                let at = seconds_from_value(&raw)
                    .and_then(unix_seconds)
                    .ok_or_else(|| Error::MalformedInput(format!("invalid expires value: {raw}")))?;
                Some(at)
            }
        };

        Ok(Self {
            value: Secret::new(value),
            expires_at,
            refresh_token: None,
            params: payload,
        })
    }

    /// The bearer token string.
    pub fn value(&self) -> &str {
        self.value.expose()
    }

    pub fn expires_at(&self) -> Option<SystemTime> {
        self.expires_at
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_ref().map(|t| t.expose().as_str())
    }

    /// Extra fields from the token response or signed payload (e.g. `uid`).
    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    /// Whether the token has expired as of the current wall clock.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(SystemTime::now())
    }

    /// Whether the token has expired as of `now`. A token expiring exactly
    /// at `now` counts as expired; a token without expiry never expires.
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Remaining lifetime as of `now`: `None` for non-expiring tokens,
    /// zero once expired.
    pub fn expires_in(&self, now: SystemTime) -> Option<Duration> {
        self.expires_at
            .map(|at| at.duration_since(now).unwrap_or(Duration::ZERO))
    }

    /// `Authorization` header value for API calls.
    pub fn authorization_header(&self) -> String {
        format!("{AUTH_HEADER_SCHEME} {}", self.value.expose())
    }

    /// Exchange this token's refresh token for a new access token.
    ///
    /// Fails without network I/O when there is no refresh token. If the
    /// endpoint omits a new refresh token, the current one is carried over.
    /// A response that hands back the same access token is rejected.
    pub async fn refresh(
        &self,
        endpoint: &TokenEndpoint,
        refresh_params: &[(&str, &str)],
    ) -> Result<AccessToken> {
        let Some(refresh_token) = self.refresh_token.as_ref() else {
            return Err(Error::AuthFailure(ProviderError::local(
                "access token has no refresh token",
            )));
        };

        let mut refreshed = endpoint
            .refresh(refresh_token.expose(), refresh_params)
            .await?;

        if refreshed.value.expose() == self.value.expose() {
            warn!("token endpoint reissued the previous access token");
            return Err(Error::AuthFailure(ProviderError::local(
                "refresh returned the previous access token",
            )));
        }

        if refreshed.refresh_token.is_none() {
            refreshed.refresh_token = Some(refresh_token.clone());
        }
        Ok(refreshed)
    }
}

/// Body returned by the token endpoint on success.
///
/// Weibo returns `expires_in` as a number on some endpoints and a string on
/// others, so both forms are accepted.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Seconds until the access token expires (delta)
    #[serde(default, deserialize_with = "deserialize_seconds")]
    pub expires_in: Option<u64>,
    /// Absolute expiry as unix seconds
    #[serde(default, deserialize_with = "deserialize_seconds")]
    pub expires_at: Option<u64>,
    /// Everything else (`uid`, `remind_in`, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Client for the token endpoint, carrying the app credentials.
#[derive(Debug, Clone)]
pub struct TokenEndpoint {
    http: reqwest::Client,
    url: Url,
    client_id: String,
    client_secret: Secret<String>,
}

impl TokenEndpoint {
    pub fn new(
        http: reqwest::Client,
        url: Url,
        client_id: impl Into<String>,
        client_secret: Secret<String>,
    ) -> Self {
        Self {
            http,
            url,
            client_id: client_id.into(),
            client_secret,
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Exchange an authorization code for an access token.
    ///
    /// `redirect_uri` always overrides any `redirect_uri` in `params`: Weibo
    /// rejects the exchange unless it matches the one the code was issued for.
    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        params: &[(&str, &str)],
    ) -> Result<AccessToken> {
        let form = params::merge(
            params,
            &[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.expose().as_str()),
                ("redirect_uri", redirect_uri),
            ],
        );
        self.request_token("authorization_code", form).await
    }

    /// Exchange a refresh token for a new access token.
    pub async fn refresh(&self, refresh_token: &str, params: &[(&str, &str)]) -> Result<AccessToken> {
        let form = params::merge(
            params,
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.expose().as_str()),
            ],
        );
        self.request_token("refresh_token", form).await
    }

    async fn request_token(&self, grant_type: &str, form: params::Params) -> Result<AccessToken> {
        debug!(grant_type, url = %self.url, "requesting token");

        let response = self
            .http
            .post(self.url.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&form)
            .send()
            .await
            .map_err(|e| Error::Http(format!("token request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Http(format!("reading token response: {e}")))?;

        if !status.is_success() {
            let error = ProviderError::from_response(status.as_u16(), &body);
            warn!(grant_type, status = status.as_u16(), code = ?error.code, "token endpoint rejected request");
            return Err(Error::AuthFailure(error));
        }

        let parsed: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            Error::AuthFailure(ProviderError {
                status: Some(status.as_u16()),
                description: Some(format!("invalid token response: {e}")),
                ..ProviderError::default()
            })
        })?;

        let token = AccessToken::from_response(parsed, SystemTime::now()).map_err(|e| match e {
            Error::AuthFailure(mut error) => {
                error.status = Some(status.as_u16());
                Error::AuthFailure(error)
            }
            other => other,
        })?;

        info!(
            grant_type,
            expires_in_secs = ?token.expires_in(SystemTime::now()).map(|d| d.as_secs()),
            "token endpoint issued access token"
        );
        Ok(token)
    }
}

fn unix_seconds(secs: u64) -> Option<SystemTime> {
    UNIX_EPOCH.checked_add(Duration::from_secs(secs))
}

/// Expiry seconds as Weibo sends them: a non-negative integer, a float
/// (truncated) or either of those as a string.
fn seconds_from_value(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().and_then(truncate_seconds)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<u64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(truncate_seconds))
        }
        _ => None,
    }
}

fn truncate_seconds(secs: f64) -> Option<u64> {
    (secs.is_finite() && secs >= 0.0).then(|| secs.trunc() as u64)
}

/// A present but unusable expiry fails deserialization rather than being
/// read as "never expires".
fn deserialize_seconds<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(value) => seconds_from_value(&value).map(Some).ok_or_else(|| {
            <D::Error as serde::de::Error>::custom(format!("invalid expiry seconds: {value}"))
        }),
    }
}
