//! Server configuration, read from the environment.

use rand::RngCore;
use tracing::info;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP bind address.
    pub bind_addr: String,

    /// Postgres connection string. When absent the server falls back to
    /// the in-memory store (local development only).
    pub database_uri: Option<String>,

    /// Shared secret identifying in-cluster service callers.
    pub internal_key: String,

    /// Discovery endpoint publishing the identity provider's signing keys.
    pub jwks_uri: String,

    /// Audience expected in verified identity tokens.
    pub token_audience: String,
}

impl Config {
    /// Read configuration from `DROIDSTORE_*` environment variables,
    /// falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: std::env::var("DROIDSTORE_BIND_ADDR").unwrap_or(defaults.bind_addr),
            database_uri: std::env::var("DROIDSTORE_DATABASE_URI").ok(),
            internal_key: std::env::var("DROIDSTORE_INTERNAL_COMKEY")
                .unwrap_or_else(|_| random_internal_key()),
            jwks_uri: std::env::var("DROIDSTORE_JWKS_URI").unwrap_or(defaults.jwks_uri),
            token_audience: std::env::var("DROIDSTORE_TOKEN_AUDIENCE")
                .unwrap_or(defaults.token_audience),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            database_uri: None,
            internal_key: String::new(),
            jwks_uri: "https://login.microsoftonline.com/common/discovery/keys".to_string(),
            token_audience: "00000002-0000-0000-c000-000000000000".to_string(),
        }
    }
}

/// Pick a random internal key for local testing when none is configured.
fn random_internal_key() -> String {
    let mut bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut bytes);
    let key = hex::encode(bytes);
    info!(prefix = %&key[..8], "internal communication key generated at random");
    key
}
