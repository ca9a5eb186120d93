//! Weibo OAuth2 constants
//!
//! Endpoint paths are relative to the API site and resolved with
//! `Url::join`, so a trailing slash on the site matters.

/// Default API site. Every REST path and both OAuth endpoints hang off it.
pub const DEFAULT_SITE: &str = "https://api.weibo.com/2/";

/// Authorization (consent) endpoint, relative to the site
pub const AUTHORIZE_PATH: &str = "oauth2/authorize";

/// Token endpoint for code exchange and refresh, relative to the site
pub const TOKEN_PATH: &str = "oauth2/access_token";

/// The only signing algorithm accepted on signed requests
pub const SIGNED_REQUEST_ALGORITHM: &str = "HMAC-SHA256";

/// Authorization header scheme. Weibo expects `OAuth2 <token>`, not `Bearer`.
pub const AUTH_HEADER_SCHEME: &str = "OAuth2";

/// Default timeout for token endpoint and API requests
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
