//! Bearer tokens for the BigQuery REST API.
//!
//! A service-account key signs a short-lived RS256 assertion which the token
//! endpoint exchanges for an access token. Tokens are cached until a minute
//! before they expire.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bookcast_warehouse::{BoxFuture, WarehouseError};
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::ConfigError;
use crate::http_client::{HttpClient, HttpRequest};

pub const BIGQUERY_SCOPE: &str = "https://www.googleapis.com/auth/bigquery";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3_600;
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// The fields of a service-account JSON key this crate needs.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default)]
    pub project_id: Option<String>,
}

fn default_token_uri() -> String {
    String::from(DEFAULT_TOKEN_URI)
}

impl ServiceAccountKey {
    /// # Errors
    /// Returns [`ConfigError::MissingCredentials`] when the file is absent and
    /// [`ConfigError::InvalidCredentials`] when it is not a service-account key.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.is_file() {
            return Err(ConfigError::MissingCredentials(path.to_path_buf()));
        }
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|error| ConfigError::InvalidCredentials {
            path: path.to_path_buf(),
            message: error.to_string(),
        })
    }
}

/// Source of bearer tokens for warehouse requests.
pub trait TokenProvider: Send + Sync {
    fn access_token<'a>(&'a self) -> BoxFuture<'a, Result<String, WarehouseError>>;
}

/// A token obtained elsewhere (e.g. `gcloud auth print-access-token`).
#[derive(Debug, Clone)]
pub struct StaticToken(String);

impl StaticToken {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl TokenProvider for StaticToken {
    fn access_token<'a>(&'a self) -> BoxFuture<'a, Result<String, WarehouseError>> {
        Box::pin(async move { Ok(self.0.clone()) })
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3_600
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: Option<String>,
    error_description: Option<String>,
}

struct CachedToken {
    token: String,
    refresh_after: Instant,
}

pub struct ServiceAccountTokenProvider {
    key: ServiceAccountKey,
    signing_key: EncodingKey,
    http: Arc<dyn HttpClient>,
    cached: Mutex<Option<CachedToken>>,
}

impl ServiceAccountTokenProvider {
    /// # Errors
    /// Returns [`ConfigError::InvalidCredentials`] when the private key is not RSA PEM.
    pub fn new(
        key: ServiceAccountKey,
        http: Arc<dyn HttpClient>,
        origin: &Path,
    ) -> Result<Self, ConfigError> {
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes()).map_err(|error| {
            ConfigError::InvalidCredentials {
                path: origin.to_path_buf(),
                message: format!("private_key: {error}"),
            }
        })?;
        Ok(Self {
            key,
            signing_key,
            http,
            cached: Mutex::new(None),
        })
    }

    fn signed_assertion(&self) -> Result<String, WarehouseError> {
        let now = Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: &self.key.client_email,
            scope: BIGQUERY_SCOPE,
            aud: &self.key.token_uri,
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };
        encode(&Header::new(Algorithm::RS256), &claims, &self.signing_key).map_err(|error| {
            WarehouseError::Transport {
                operation: String::from("sign token assertion"),
                message: error.to_string(),
            }
        })
    }

    async fn exchange(&self) -> Result<CachedToken, WarehouseError> {
        let assertion = self.signed_assertion()?;
        let body = format!(
            "grant_type={}&assertion={}",
            urlencoding::encode(JWT_BEARER_GRANT),
            urlencoding::encode(&assertion)
        );
        let request = HttpRequest::post(&self.key.token_uri)
            .with_header("content-type", "application/x-www-form-urlencoded")
            .with_body(body);

        let started = Instant::now();
        let response = self
            .http
            .execute(request)
            .await
            .map_err(|error| WarehouseError::Transport {
                operation: String::from("token exchange"),
                message: error.to_string(),
            })?;

        if !response.is_success() {
            let message = serde_json::from_str::<TokenErrorResponse>(&response.body)
                .ok()
                .and_then(|parsed| parsed.error_description.or(parsed.error))
                .unwrap_or(response.body);
            return Err(WarehouseError::Api {
                operation: String::from("token exchange"),
                status: response.status,
                message,
            });
        }

        let parsed: TokenResponse =
            serde_json::from_str(&response.body).map_err(|error| WarehouseError::Decode {
                operation: String::from("token exchange"),
                message: error.to_string(),
            })?;
        debug!(expires_in = parsed.expires_in, "obtained access token");
        Ok(CachedToken {
            token: parsed.access_token,
            refresh_after: refresh_deadline(started, parsed.expires_in),
        })
    }
}

/// When a token issued at `started` should be replaced. A lifetime past what
/// [`Instant`] can hold falls back to `started`, so the next call refreshes.
fn refresh_deadline(started: Instant, expires_in: u64) -> Instant {
    let lifetime = Duration::from_secs(expires_in).saturating_sub(REFRESH_MARGIN);
    started.checked_add(lifetime).unwrap_or_else(|| {
        warn!(expires_in, "token lifetime out of range, refreshing on next use");
        started
    })
}

impl TokenProvider for ServiceAccountTokenProvider {
    fn access_token<'a>(&'a self) -> BoxFuture<'a, Result<String, WarehouseError>> {
        Box::pin(async move {
            let mut cached = self.cached.lock().await;
            if let Some(token) = cached.as_ref() {
                if Instant::now() < token.refresh_after {
                    return Ok(token.token.clone());
                }
            }
            let fresh = self.exchange().await?;
            let token = fresh.token.clone();
            *cached = Some(fresh);
            Ok(token)
        })
    }
}
