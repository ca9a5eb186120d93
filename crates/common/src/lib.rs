//! Shared types for the Weibo OAuth workspace
//!
//! Holds the redacting `Secret` wrapper used for the app secret and bearer
//! tokens, and the configuration error type.

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
