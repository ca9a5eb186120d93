//! Weibo OAuth2 authentication core
//!
//! Obtains a verified, time-bounded access token through one of two trust
//! paths and gates every API call on it. Standalone library: no storage, no
//! CLI, no endpoint wrappers.
//!
//! Credential flow:
//! 1. Caller builds an `AuthClient` from `Config` (no network I/O)
//! 2a. Redirect flow: send the user to `AuthClient::authorize_url()`, then
//!     exchange the returned code with `AuthClient::get_token()`
//! 2b. Embedded app: verify the page's signed request with
//!     `AuthClient::get_token_from_signed_request()`
//! 3. Endpoint wrappers call `AuthClient::request()` / `get()` / `post()`,
//!    which fail with `Error::Unauthorized` unless a valid token is held
//! 4. Once the token expires, `AuthClient::refresh()` swaps in a new one

pub mod client;
pub mod config;
pub mod constants;
pub mod error;
pub mod params;
pub mod signed_request;
pub mod strategy;
pub mod token;

#[cfg(test)]
mod testing;

pub use client::{AuthClient, AuthState};
pub use config::Config;
pub use constants::*;
pub use error::{Error, ProviderError, Result};
pub use signed_request::{SignedPayload, Verification, verify};
pub use strategy::{AuthCode, AuthCodeGrant, SignedRequest, Strategy, generate_state};
pub use token::{AccessToken, TokenEndpoint, TokenResponse};
