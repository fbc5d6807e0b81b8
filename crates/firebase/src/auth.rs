use std::{fmt, path::Path, sync::Arc};

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::{Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use url::Url;

pub const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// OAuth scopes needed to read the Realtime Database and send FCM messages.
pub const FIREBASE_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/firebase.messaging",
    "https://www.googleapis.com/auth/firebase.database",
    "https://www.googleapis.com/auth/userinfo.email",
];

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
const REFRESH_MARGIN_SECS: i64 = 60;
const MAX_TOKEN_LIFETIME_SECS: u64 = 86_400;

/// Google service account key as downloaded from the cloud console.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub private_key_id: Option<String>,
    pub private_key: String,
    pub client_email: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    GOOGLE_TOKEN_URI.to_string()
}

impl ServiceAccountKey {
    /// Parses a service account key from its JSON representation.
    pub fn from_json(raw: &str) -> Result<Self, AuthError> {
        serde_json::from_str(raw).map_err(AuthError::KeyFormat)
    }

    /// Reads and parses the key file at `path`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, AuthError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }
}

impl fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("project_id", &self.project_id)
            .field("client_email", &self.client_email)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

/// Provides bearer tokens for the Firebase REST APIs.
///
/// Cloning is cheap; clones share the cached token.
#[derive(Clone)]
pub struct AccessTokenSource {
    kind: Arc<SourceKind>,
}

enum SourceKind {
    Anonymous,
    Fixed(String),
    ServiceAccount(ServiceAccountSource),
}

struct ServiceAccountSource {
    http: Client,
    client_email: String,
    key_id: Option<String>,
    encoding_key: EncodingKey,
    token_url: Url,
    cache: Mutex<Option<CachedToken>>,
}

#[derive(Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl AccessTokenSource {
    /// Source that never attaches credentials.
    pub fn anonymous() -> Self {
        Self {
            kind: Arc::new(SourceKind::Anonymous),
        }
    }

    /// Source that always returns the provided token.
    pub fn fixed(token: impl Into<String>) -> Self {
        Self {
            kind: Arc::new(SourceKind::Fixed(token.into())),
        }
    }

    /// Source that mints tokens from a service account key.
    pub fn service_account(key: &ServiceAccountKey, http: Client) -> Result<Self, AuthError> {
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())?;
        let token_url = Url::parse(&key.token_uri)?;
        Ok(Self {
            kind: Arc::new(SourceKind::ServiceAccount(ServiceAccountSource {
                http,
                client_email: key.client_email.clone(),
                key_id: key.private_key_id.clone(),
                encoding_key,
                token_url,
                cache: Mutex::new(None),
            })),
        })
    }

    /// Returns a short label describing the credential mode.
    pub fn mode(&self) -> &'static str {
        match self.kind.as_ref() {
            SourceKind::Anonymous => "anonymous",
            SourceKind::Fixed(_) => "static_token",
            SourceKind::ServiceAccount(_) => "service_account",
        }
    }

    /// Returns the bearer token to attach, or `None` for anonymous access.
    pub async fn access_token(&self) -> Result<Option<String>, AuthError> {
        self.access_token_at(Utc::now()).await
    }

    /// Same as [`access_token`](Self::access_token) with an explicit clock reading.
    pub async fn access_token_at(&self, now: DateTime<Utc>) -> Result<Option<String>, AuthError> {
        match self.kind.as_ref() {
            SourceKind::Anonymous => Ok(None),
            SourceKind::Fixed(token) => Ok(Some(token.clone())),
            SourceKind::ServiceAccount(source) => source.token(now).await.map(Some),
        }
    }
}

impl ServiceAccountSource {
    async fn token(&self, now: DateTime<Utc>) -> Result<String, AuthError> {
        // Held across the exchange: concurrent callers wait for one refresh.
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref() {
            if now < cached.expires_at - Duration::seconds(REFRESH_MARGIN_SECS) {
                return Ok(cached.value.clone());
            }
        }

        let assertion = self.sign_assertion(now)?;
        let response = self
            .http
            .post(self.token_url.clone())
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;
        let token: TokenResponse = parse_json(response).await?;

        let expires_at = token.expires_at(now);
        *cache = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at,
        });
        Ok(token.access_token)
    }

    fn sign_assertion(&self, now: DateTime<Utc>) -> Result<String, AuthError> {
        let iat = now.timestamp();
        let claims = AssertionClaims {
            iss: &self.client_email,
            scope: FIREBASE_SCOPES.join(" "),
            aud: self.token_url.as_str(),
            iat,
            exp: iat + ASSERTION_LIFETIME_SECS,
        };
        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.key_id.clone();
        Ok(jsonwebtoken::encode(&header, &claims, &self.encoding_key)?)
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: String,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

/// Token response returned by the OAuth token endpoint.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TokenResponse {
    pub access_token: String,
    pub expires_in: u64,
    #[serde(default)]
    pub token_type: Option<String>,
}

impl TokenResponse {
    /// Computes the expiration timestamp relative to the provided instant.
    pub fn expires_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + Duration::seconds(self.expires_in.min(MAX_TOKEN_LIFETIME_SECS) as i64)
    }
}

/// Errors that can occur while obtaining access tokens.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("failed to read service account key: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed service account key: {0}")]
    KeyFormat(serde_json::Error),
    #[error("failed to sign token assertion: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error("failed to build url: {0}")]
    Url(#[from] url::ParseError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },
}

async fn parse_json<T>(response: Response) -> Result<T, AuthError>
where
    T: DeserializeOwned,
{
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<unavailable>"));
        return Err(AuthError::Status { status, body });
    }

    Ok(response.json().await?)
}
