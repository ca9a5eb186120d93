//! Error types for Weibo authentication and API calls

use std::fmt;

/// Structured rejection from the token endpoint or the REST API.
///
/// Weibo error bodies look like
/// `{"error":"expired_token","error_code":21327,"request":"/2/statuses/home_timeline.json"}`;
/// the token endpoint may add `error_description`. Every field is optional
/// because a rejection can also be a non-JSON body or a 2xx without a token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderError {
    /// HTTP status, when the failure came from a response
    pub status: Option<u16>,
    /// `error_code`, falling back to the `error` string
    pub code: Option<String>,
    /// `error_description`, falling back to the `error` string
    pub description: Option<String>,
    /// `request` path echoed back by the API
    pub request: Option<String>,
}

impl ProviderError {
    /// Build from a response status and raw body, reading Weibo's error
    /// fields when the body is a JSON object.
    pub fn from_response(status: u16, body: &str) -> Self {
        let mut error = Self {
            status: Some(status),
            ..Self::default()
        };

        let Ok(serde_json::Value::Object(fields)) = serde_json::from_str::<serde_json::Value>(body) else {
            if !body.trim().is_empty() {
                error.description = Some(body.trim().to_string());
            }
            return error;
        };

        let error_string = fields
            .get("error")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        error.code = match fields.get("error_code") {
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            _ => error_string.clone(),
        };
        error.description = fields
            .get("error_description")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or(error_string);
        error.request = fields
            .get("request")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        error
    }

    /// A failure that never reached (or never came from) an HTTP response.
    pub fn local(description: impl Into<String>) -> Self {
        Self {
            description: Some(description.into()),
            ..Self::default()
        }
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(status) = self.status {
            parts.push(format!("status {status}"));
        }
        if let Some(code) = &self.code {
            parts.push(format!("code {code}"));
        }
        if let Some(description) = &self.description {
            parts.push(description.clone());
        }
        if parts.is_empty() {
            write!(f, "unknown error")
        } else {
            write!(f, "{}", parts.join(": "))
        }
    }
}

/// Errors from Weibo authentication and API operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Signed request does not parse (separator, base64 or JSON).
    #[error("malformed signed request: {0}")]
    MalformedInput(String),

    /// Signed request declares an algorithm other than HMAC-SHA256.
    #[error("unsupported signed request algorithm: {}", .algorithm.as_deref().unwrap_or("<missing>"))]
    AlgorithmMismatch { algorithm: Option<String> },

    /// Signed request signature does not match the payload.
    #[error("signed request signature mismatch")]
    SignatureMismatch,

    /// Token endpoint rejected the request or returned an unusable body.
    #[error("authentication failed: {0}")]
    AuthFailure(ProviderError),

    /// API call attempted without a valid, unexpired access token.
    #[error("no valid access token: sign in first or refresh the expired token")]
    Unauthorized,

    /// REST API rejected an authorized call.
    #[error("API request failed: {0}")]
    Api(ProviderError),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error(transparent)]
    Config(#[from] common::Error),
}

impl Error {
    /// Whether the token endpoint itself turned the credential down.
    ///
    /// Only these invalidate the held token. Local failures (a bad signed
    /// request, a token without a refresh token) and transport errors say
    /// nothing about the credential already held.
    pub fn is_endpoint_rejection(&self) -> bool {
        matches!(self, Error::AuthFailure(error) if error.status.is_some())
    }
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
