//! Access gate.
//!
//! Every operation except health is guarded by one stateless pass/fail
//! decision: the caller presents either the internal shared key (exact
//! match, in-cluster services) or a bearer identity token verified against
//! cached signing keys from the provider's discovery endpoint. The key
//! cache is refreshed lazily, at most every 12 hours. There is no role
//! distinction: any valid caller may perform any operation.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::http::error::ApiError;
use crate::state::AppState;

/// How long fetched signing keys stay fresh.
fn key_refresh_interval() -> Duration {
    Duration::hours(12)
}

/// Authorization failures, in the gate's own vocabulary.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No `Authorization` header at all.
    #[error("missing authorization header")]
    MissingCredential,

    /// The identity token is past its expiry.
    #[error("the identity token is expired")]
    Expired,

    /// The credential was readable but did not verify.
    #[error("the identity token could not be verified")]
    InvalidToken,

    /// The header or token cannot even be parsed.
    #[error("authorization header cannot be parsed")]
    Malformed,

    /// The signing-key discovery endpoint was unreachable.
    #[error("cannot fetch signing keys: {0}")]
    KeyFetch(String),
}

#[derive(Deserialize)]
struct JwksDocument {
    keys: Vec<Jwk>,
}

#[derive(Deserialize)]
struct Jwk {
    kid: String,
    #[serde(default)]
    n: String,
    #[serde(default)]
    e: String,
}

#[derive(Default)]
struct KeyCache {
    keys: HashMap<String, DecodingKey>,
    refreshed_at: Option<DateTime<Utc>>,
}

struct GateInner {
    internal_key: String,
    jwks_uri: String,
    audience: String,
    http: reqwest::Client,
    cache: Mutex<KeyCache>,
}

/// The access gate guarding every operation.
#[derive(Clone)]
pub struct AccessGate {
    inner: Arc<GateInner>,
}

impl AccessGate {
    /// Create a gate with the given internal key and token verification
    /// parameters.
    pub fn new(
        internal_key: impl Into<String>,
        jwks_uri: impl Into<String>,
        audience: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(GateInner {
                internal_key: internal_key.into(),
                jwks_uri: jwks_uri.into(),
                audience: audience.into(),
                http: reqwest::Client::new(),
                cache: Mutex::new(KeyCache::default()),
            }),
        }
    }

    /// Authorize one request from its `Authorization` header value.
    pub async fn authorize(&self, header: Option<&str>) -> Result<(), AuthError> {
        let raw = header.ok_or(AuthError::MissingCredential)?;
        if raw == self.inner.internal_key {
            return Ok(());
        }
        let token = raw.strip_prefix("Bearer ").unwrap_or(raw);
        self.verify_token(token).await
    }

    async fn verify_token(&self, token: &str) -> Result<(), AuthError> {
        let header = decode_header(token).map_err(|_| AuthError::Malformed)?;
        let kid = header.kid.ok_or(AuthError::Malformed)?;
        let key = self.signing_key(&kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[self.inner.audience.as_str()]);

        match decode::<serde_json::Value>(token, &key, &validation) {
            Ok(data) => {
                debug!(subject = ?data.claims.get("sub"), "identity token verified");
                Ok(())
            }
            Err(e) => match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => Err(AuthError::Expired),
                jsonwebtoken::errors::ErrorKind::Base64(_)
                | jsonwebtoken::errors::ErrorKind::Utf8(_)
                | jsonwebtoken::errors::ErrorKind::Json(_)
                | jsonwebtoken::errors::ErrorKind::InvalidToken => Err(AuthError::Malformed),
                _ => Err(AuthError::InvalidToken),
            },
        }
    }

    /// Cache-aside lookup of a signing key: refresh the whole set when it
    /// is older than the refresh interval, then look up the key id.
    async fn signing_key(&self, kid: &str) -> Result<DecodingKey, AuthError> {
        let mut cache = self.inner.cache.lock().await;
        let stale = cache
            .refreshed_at
            .map_or(true, |t| Utc::now() - t >= key_refresh_interval());
        if stale {
            info!(jwks_uri = %self.inner.jwks_uri, "refreshing signing keys");
            let document: JwksDocument = self
                .inner
                .http
                .get(&self.inner.jwks_uri)
                .send()
                .await
                .map_err(|e| AuthError::KeyFetch(e.to_string()))?
                .json()
                .await
                .map_err(|e| AuthError::KeyFetch(e.to_string()))?;

            cache.keys.clear();
            for key in document.keys {
                match DecodingKey::from_rsa_components(&key.n, &key.e) {
                    Ok(decoded) => {
                        cache.keys.insert(key.kid, decoded);
                    }
                    Err(e) => warn!(kid = %key.kid, error = %e, "skipping unusable signing key"),
                }
            }
            cache.refreshed_at = Some(Utc::now());
        } else {
            debug!("signing keys are fresh, skipping refresh");
        }

        cache.keys.get(kid).cloned().ok_or(AuthError::InvalidToken)
    }
}

/// Axum middleware applying the gate to a request.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let header = match request.headers().get(AUTHORIZATION) {
        None => None,
        Some(value) => match value.to_str() {
            Ok(s) => Some(s.to_string()),
            Err(_) => return ApiError::from(AuthError::Malformed).into_response(),
        },
    };

    match state.gate.authorize(header.as_deref()).await {
        Ok(()) => next.run(request).await,
        Err(e) => ApiError::from(e).into_response(),
    }
}
