//! Test fixtures: a mock Weibo API served by axum on a loopback port, and a
//! signer producing signed requests the way the platform does.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Form, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use tokio::net::TcpListener;

use crate::config::{AppCredentials, Config, EndpointConfig};

pub(crate) const APP_KEY: &str = "1234567890";
pub(crate) const APP_SECRET: &str = "s3cr3t";
pub(crate) const REDIRECT_URI: &str = "https://app.example.com/weibo/callback";

/// Sign a JSON payload with HMAC-SHA256 over its base64url encoding.
pub(crate) fn sign(payload_json: &str, secret: &str) -> String {
    let encoded_payload = URL_SAFE_NO_PAD.encode(payload_json);
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(encoded_payload.as_bytes());
    let sig = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
    format!("{sig}.{encoded_payload}")
}

/// Config pointing at `site`, signed with the fixture secret.
pub(crate) fn test_config(site: &str) -> Config {
    Config {
        app: AppCredentials {
            key: APP_KEY.into(),
            secret: Some(APP_SECRET.into()),
            secret_file: None,
            redirect_uri: REDIRECT_URI.into(),
        },
        endpoints: EndpointConfig {
            site: site.into(),
            timeout_secs: 5,
        },
    }
}

#[derive(Clone, Default)]
struct MockState {
    hits: Arc<AtomicUsize>,
    token_forms: Arc<Mutex<Vec<HashMap<String, String>>>>,
}

/// Running mock Weibo server.
pub(crate) struct MockWeibo {
    /// Site URL with trailing slash, e.g. `http://127.0.0.1:4242/2/`
    pub site: String,
    state: MockState,
    _handle: tokio::task::JoinHandle<()>,
}

impl MockWeibo {
    /// Total requests served across every route.
    pub fn hits(&self) -> usize {
        self.state.hits.load(Ordering::SeqCst)
    }

    /// Form bodies received by the token endpoint, in order.
    pub fn token_forms(&self) -> Vec<HashMap<String, String>> {
        self.state.token_forms.lock().unwrap().clone()
    }
}

/// Start the mock server.
///
/// Token endpoint behaviour is keyed on the submitted code/refresh token:
/// - code `good-code` → token `2.00code`, refresh token `rt_1`, 1h lifetime
/// - code `no-token` → 200 without `access_token`
/// - code `bad-expiry` → 200 with a non-numeric `expires_in`
/// - code `not-json` → 200 with a plain-text body
/// - refresh `rt_1` → token `2.00refreshed`, 2h lifetime, no new refresh token
/// - refresh `rt_same` → reissues `2.00code`
/// - refresh `slow:<token>` → as `<token>`, answered after 300ms
/// - anything else → 400 `invalid_grant`
pub(crate) async fn start_mock_weibo() -> MockWeibo {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = MockState::default();

    let app = Router::new()
        .route("/2/oauth2/access_token", post(token_handler))
        .route("/2/account/get_uid.json", get(get_uid_handler))
        .route("/2/statuses/update.json", post(update_handler))
        .with_state(state.clone());

    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    MockWeibo {
        site: format!("http://{addr}/2/"),
        state,
        _handle: handle,
    }
}

async fn token_handler(
    State(state): State<MockState>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);
    state.token_forms.lock().unwrap().push(form.clone());

    let invalid_grant = (
        StatusCode::BAD_REQUEST,
        Json(json!({
            "error": "invalid_grant",
            "error_code": 21325,
            "error_description": "invalid authorization code or refresh token",
        })),
    );

    if form.get("client_id").map(String::as_str) != Some(APP_KEY)
        || form.get("client_secret").map(String::as_str) != Some(APP_SECRET)
    {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "invalid_client", "error_code": 21324})),
        )
            .into_response();
    }

    match form.get("grant_type").map(String::as_str) {
        Some("authorization_code") => match form.get("code").map(String::as_str) {
            Some("good-code") => Json(json!({
                "access_token": "2.00code",
                "refresh_token": "rt_1",
                "expires_in": 3600,
                "remind_in": "3600",
                "uid": "1404376560",
            }))
            .into_response(),
            Some("no-token") => Json(json!({"uid": "1404376560"})).into_response(),
            Some("bad-expiry") => Json(json!({
                "access_token": "2.00code",
                "expires_in": "soon",
            }))
            .into_response(),
            Some("not-json") => (StatusCode::OK, "this is not json").into_response(),
            _ => invalid_grant.into_response(),
        },
        Some("refresh_token") => match slow_refresh_token(&form).await {
            Some("rt_1") => Json(json!({
                "access_token": "2.00refreshed",
                "expires_in": "7200",
            }))
            .into_response(),
            Some("rt_same") => Json(json!({
                "access_token": "2.00code",
                "expires_in": 7200,
            }))
            .into_response(),
            _ => invalid_grant.into_response(),
        },
        _ => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "unsupported_grant_type"})),
        )
            .into_response(),
    }
}

/// Refresh tokens prefixed `slow:` are answered like the rest of the token
/// after a delay, leaving a window to change the client's state mid-refresh.
async fn slow_refresh_token(form: &HashMap<String, String>) -> Option<&str> {
    let token = form.get("refresh_token").map(String::as_str)?;
    match token.strip_prefix("slow:") {
        Some(rest) => {
            tokio::time::sleep(Duration::from_millis(300)).await;
            Some(rest)
        }
        None => Some(token),
    }
}

async fn get_uid_handler(
    State(state): State<MockState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if !auth.starts_with("OAuth2 2.00") {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "error": "invalid_access_token",
                "error_code": 21332,
                "request": "/2/account/get_uid.json",
            })),
        )
            .into_response();
    }

    Json(json!({
        "uid": 1404376560u64,
        "authorization": auth,
        "query": query,
    }))
    .into_response()
}

async fn update_handler(
    State(state): State<MockState>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);
    match form.get("status") {
        Some(text) if !text.is_empty() => Json(json!({"id": 1, "text": text})).into_response(),
        _ => (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "content is null!",
                "error_code": 20008,
                "request": "/2/statuses/update.json",
            })),
        )
            .into_response(),
    }
}
