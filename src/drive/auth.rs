// src/drive/auth.rs

use async_trait::async_trait;
use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine as _,
};
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use ring::{
    rand::SystemRandom,
    signature::{RsaKeyPair, RSA_PKCS1_SHA256},
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::{fs, path::Path, sync::Mutex};
use tracing::{debug, info};

use crate::{Error, Result};

pub const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const SCOPES: &str =
    "https://www.googleapis.com/auth/drive https://www.googleapis.com/auth/spreadsheets";
const GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_TTL_SECS: i64 = 3600;
/// Tokens are refreshed this long before the expiry the endpoint reported.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// Source of bearer tokens for the Drive and Sheets APIs.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String>;
}

/// The two fields of a service-account JSON key file that matter here.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    #[serde(default)]
    pub client_email: String,
    #[serde(default)]
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    TOKEN_URL.to_string()
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountKey {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "service account file not readable at {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let key: ServiceAccountKey = serde_json::from_str(text)
            .map_err(|e| Error::Config(format!("service account JSON is invalid: {}", e)))?;
        if key.client_email.trim().is_empty() {
            return Err(Error::Config(
                "service account JSON lacks `client_email`".to_string(),
            ));
        }
        if key.private_key.trim().is_empty() {
            return Err(Error::Config(
                "service account JSON lacks `private_key`".to_string(),
            ));
        }
        Ok(key)
    }

    /// Signed `header.claims.signature` assertion issued at `now`.
    pub fn assertion(&self, now: DateTime<Utc>) -> Result<String> {
        let header = json!({ "alg": "RS256", "typ": "JWT" });
        let iat = now.timestamp();
        let claims = json!({
            "iss": self.client_email,
            "scope": SCOPES,
            "aud": self.token_uri,
            "iat": iat,
            "exp": iat + ASSERTION_TTL_SECS,
        });
        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header.to_string()),
            URL_SAFE_NO_PAD.encode(claims.to_string())
        );

        let der = pem_to_der(&self.private_key)?;
        let pair = RsaKeyPair::from_pkcs8(&der)
            .map_err(|e| Error::Config(format!("service account private_key rejected: {}", e)))?;
        let mut signature = vec![0u8; pair.public().modulus_len()];
        pair.sign(
            &RSA_PKCS1_SHA256,
            &SystemRandom::new(),
            signing_input.as_bytes(),
            &mut signature,
        )
        .map_err(|_| Error::Config("signing the token assertion failed".to_string()))?;

        Ok(format!("{}.{}", signing_input, URL_SAFE_NO_PAD.encode(signature)))
    }
}

/// Strip PEM armour and decode the base64 body.
fn pem_to_der(pem: &str) -> Result<Vec<u8>> {
    let body: String = pem
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with("-----"))
        .collect();
    STANDARD
        .decode(body)
        .map_err(|e| Error::Config(format!("service account private_key is not PEM: {}", e)))
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<i64>,
}

struct CachedToken {
    token: String,
    refresh_at: DateTime<Utc>,
}

/// Exchanges a signed service-account assertion for an access token.
///
/// The token is kept until shortly before the expiry reported by the token
/// endpoint, so a run pays one exchange instead of one per call.
pub struct ServiceAccountTokens {
    key: ServiceAccountKey,
    http: Client,
    cached: Mutex<Option<CachedToken>>,
}

impl ServiceAccountTokens {
    pub fn new(key: ServiceAccountKey, http: Client) -> Self {
        Self {
            key,
            http,
            cached: Mutex::new(None),
        }
    }

    fn cached_token(&self, now: DateTime<Utc>) -> Option<String> {
        let guard = self.cached.lock().ok()?;
        guard
            .as_ref()
            .filter(|c| c.refresh_at > now)
            .map(|c| c.token.clone())
    }

    /// Keep `token` until shortly before it expires. Lifetimes that do not fit
    /// a timestamp are not cached.
    fn store(&self, token: &str, expires_in: i64, now: DateTime<Utc>) {
        let Some(refresh_at) = expires_in
            .checked_sub(EXPIRY_MARGIN_SECS)
            .and_then(Duration::try_seconds)
            .and_then(|ttl| now.checked_add_signed(ttl))
        else {
            debug!(expires_in, "token lifetime out of range, not caching");
            return;
        };
        if let Ok(mut guard) = self.cached.lock() {
            *guard = Some(CachedToken {
                token: token.to_string(),
                refresh_at,
            });
        }
    }

    async fn exchange(&self, now: DateTime<Utc>) -> Result<(String, i64)> {
        let assertion = self.key.assertion(now)?;
        let resp = self
            .http
            .post(&self.key.token_uri)
            .form(&[("grant_type", GRANT_TYPE), ("assertion", assertion.as_str())])
            .send()
            .await?;
        let status = resp.status();
        let text = resp.text().await?;
        parse_token_response(status.as_u16(), &text)
    }
}

fn parse_token_response(status: u16, text: &str) -> Result<(String, i64)> {
    let parsed: Option<TokenResponse> = serde_json::from_str(text).ok();
    match parsed {
        Some(TokenResponse {
            access_token: Some(token),
            expires_in,
        }) if !token.is_empty() => Ok((token, expires_in.unwrap_or(ASSERTION_TTL_SECS))),
        _ => {
            let detail = serde_json::from_str::<Value>(text)
                .unwrap_or_else(|_| Value::String(text.to_string()));
            Err(Error::Config(format!(
                "token endpoint returned no access_token (HTTP {}): {}",
                status, detail
            )))
        }
    }
}

#[async_trait]
impl TokenProvider for ServiceAccountTokens {
    async fn access_token(&self) -> Result<String> {
        let now = Utc::now();
        if let Some(token) = self.cached_token(now) {
            debug!("reusing cached access token");
            return Ok(token);
        }
        let (token, expires_in) = self.exchange(now).await?;
        info!(identity = %self.key.client_email, expires_in, "obtained access token");
        self.store(&token, expires_in, now);
        Ok(token)
    }
}
