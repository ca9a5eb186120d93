//! Application credentials and endpoint configuration
//!
//! Precedence for the app secret: `WEIBO_APP_SECRET` env var, then
//! `secret_file`. The secret is never read from the TOML itself so config
//! files can be committed without leaking it.
//!
//! ```toml
//! [app]
//! key = "1234567890"
//! redirect_uri = "https://app.example.com/weibo/callback"
//! secret_file = "/run/secrets/weibo"
//!
//! [endpoints]
//! site = "https://api.weibo.com/2/"
//! timeout_secs = 30
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use common::Secret;
use reqwest::Url;
use serde::Deserialize;

use crate::constants::{DEFAULT_SITE, DEFAULT_TIMEOUT_SECS};

/// Env var holding the app secret
pub const SECRET_ENV: &str = "WEIBO_APP_SECRET";

/// Env var naming the config file
pub const CONFIG_PATH_ENV: &str = "WEIBO_CONFIG";

/// Root configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppCredentials,
    #[serde(default)]
    pub endpoints: EndpointConfig,
}

/// Application identity issued by the Weibo open platform.
#[derive(Debug, Clone, Deserialize)]
pub struct AppCredentials {
    /// App key, sent as `client_id`
    pub key: String,
    #[serde(skip)]
    pub secret: Option<Secret<String>>,
    /// Path to a file containing the app secret (alternative to the env var)
    #[serde(default)]
    pub secret_file: Option<PathBuf>,
    /// Callback registered for the app; must match on code exchange
    pub redirect_uri: String,
}

/// Where and how to reach the API.
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    #[serde(default = "default_site")]
    pub site: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            site: default_site(),
            timeout_secs: default_timeout(),
        }
    }
}

fn default_site() -> String {
    DEFAULT_SITE.to_string()
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl Config {
    /// Build a config in code with default endpoints.
    pub fn new(
        key: impl Into<String>,
        secret: impl Into<Secret<String>>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            app: AppCredentials {
                key: key.into(),
                secret: Some(secret.into()),
                secret_file: None,
                redirect_uri: redirect_uri.into(),
            },
            endpoints: EndpointConfig::default(),
        }
    }

    /// Load configuration from a TOML file, then resolve the app secret.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if let Ok(secret) = std::env::var(SECRET_ENV) {
            config.app.secret = Some(Secret::new(secret));
        } else if let Some(ref secret_file) = config.app.secret_file {
            let secret = std::fs::read_to_string(secret_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read secret_file {}: {e}",
                    secret_file.display()
                ))
            })?;
            let secret = secret.trim().to_owned();
            if !secret.is_empty() {
                config.app.secret = Some(Secret::new(secret));
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Check the values an `AuthClient` depends on.
    pub fn validate(&self) -> common::Result<()> {
        if self.app.key.trim().is_empty() {
            return Err(common::Error::Config("app.key must not be empty".into()));
        }

        match &self.app.secret {
            Some(secret) if !secret.is_empty() => {}
            _ => {
                return Err(common::Error::Config(format!(
                    "app secret missing: set {SECRET_ENV} or app.secret_file"
                )));
            }
        }

        if !is_http_url(&self.app.redirect_uri) {
            return Err(common::Error::Config(format!(
                "redirect_uri must be an http:// or https:// URL, got: {}",
                self.app.redirect_uri
            )));
        }

        self.site_url()?;

        if self.endpoints.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// API site as a URL. Relative endpoint paths are joined onto it, so it
    /// must end with `/`.
    pub fn site_url(&self) -> common::Result<Url> {
        let site = &self.endpoints.site;
        if !is_http_url(site) {
            return Err(common::Error::Config(format!(
                "site must start with http:// or https://, got: {site}"
            )));
        }
        if !site.ends_with('/') {
            return Err(common::Error::Config(format!(
                "site must end with '/', got: {site}"
            )));
        }
        Url::parse(site)
            .map_err(|e| common::Error::Config(format!("invalid site URL {site}: {e}")))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.endpoints.timeout_secs)
    }

    /// Resolve config file path from an explicit path or `WEIBO_CONFIG`.
    pub fn resolve_path(explicit: Option<&str>) -> PathBuf {
        if let Some(p) = explicit {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var(CONFIG_PATH_ENV) {
            return PathBuf::from(p);
        }
        PathBuf::from("weibo.toml")
    }
}

fn is_http_url(value: &str) -> bool {
    (value.starts_with("http://") || value.starts_with("https://")) && Url::parse(value).is_ok()
}
