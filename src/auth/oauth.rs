//! OAuth2 refresh-token provider backed by an authorized-user `token.json`.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;

use super::{AuthError, AuthProvider};

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
/// Refresh this long before the recorded expiry.
const EXPIRY_SKEW_SECS: i64 = 60;
const REFRESH_TIMEOUT_SECS: u64 = 30;

/// Authorized-user credentials as written by Google's auth libraries.
/// Unknown fields are carried through untouched when the file is rewritten.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredToken {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default = "default_token_uri")]
    token_uri: String,
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expiry: Option<String>,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl StoredToken {
    fn expires_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.expiry.as_deref()?;
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// The access token, if present and not about to expire. A token without
    /// a recorded expiry is trusted until the service rejects it.
    fn usable_token(&self, now: DateTime<Utc>) -> Option<&str> {
        let token = self.token.as_deref().filter(|t| !t.is_empty())?;
        match self.expires_at() {
            Some(expiry) if expiry <= now + chrono::Duration::seconds(EXPIRY_SKEW_SECS) => None,
            _ => Some(token),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

pub struct OAuthTokenProvider {
    path: PathBuf,
    http: reqwest::Client,
    cached: Mutex<Option<StoredToken>>,
}

impl OAuthTokenProvider {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REFRESH_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            path: path.into(),
            http,
            cached: Mutex::new(None),
        })
    }

    async fn read_token_file(&self) -> Result<StoredToken, AuthError> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AuthError::MissingToken(self.path.clone()));
            }
            Err(e) => return Err(e.into()),
        };
        tracing::debug!("Loaded OAuth token from {}", self.path.display());
        Ok(serde_json::from_str(&contents)?)
    }

    async fn write_token_file(&self, stored: &StoredToken) -> Result<(), AuthError> {
        let json = serde_json::to_string_pretty(stored)?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, json.as_bytes()).await?;
        fs::rename(&tmp_path, &self.path).await?;
        tracing::debug!("Saved refreshed OAuth token to {}", self.path.display());
        Ok(())
    }

    async fn refresh(&self, stored: &mut StoredToken) -> Result<(), AuthError> {
        let refresh_token = stored.refresh_token.clone().ok_or_else(|| {
            AuthError::InvalidToken(format!(
                "{} has no refresh_token; re-authorize the app",
                self.path.display()
            ))
        })?;
        let client_id = stored
            .client_id
            .clone()
            .ok_or_else(|| AuthError::InvalidToken("token file has no client_id".into()))?;

        tracing::info!("Refreshing OAuth access token");
        let mut form = vec![
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token),
            ("client_id", client_id),
        ];
        if let Some(secret) = &stored.client_secret {
            form.push(("client_secret", secret.clone()));
        }

        let response = self.http.post(&stored.token_uri).form(&form).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AuthError::Refresh {
                status: status.as_u16(),
                message: message.trim().to_string(),
            });
        }
        let refreshed: RefreshResponse = response.json().await?;

        stored.token = Some(refreshed.access_token);
        stored.expiry = refreshed.expires_in.map(|secs| {
            (Utc::now() + chrono::Duration::seconds(secs))
                .format("%Y-%m-%dT%H:%M:%S%.6fZ")
                .to_string()
        });
        if let Some(rotated) = refreshed.refresh_token {
            stored.refresh_token = Some(rotated);
        }
        self.write_token_file(stored).await
    }
}

#[async_trait::async_trait]
impl AuthProvider for OAuthTokenProvider {
    async fn token(&self) -> Result<String, AuthError> {
        let mut cached = self.cached.lock().await;
        if cached.is_none() {
            *cached = Some(self.read_token_file().await?);
        }
        let Some(stored) = cached.as_mut() else {
            return Err(AuthError::MissingToken(self.path.clone()));
        };
        if let Some(token) = stored.usable_token(Utc::now()) {
            return Ok(token.to_string());
        }
        self.refresh(stored).await?;
        stored
            .token
            .clone()
            .ok_or_else(|| AuthError::InvalidToken("refresh returned no access token".into()))
    }

    async fn invalidate(&self) {
        if let Some(stored) = self.cached.lock().await.as_mut() {
            tracing::debug!("Access token rejected, forcing refresh");
            stored.token = None;
        }
    }
}
