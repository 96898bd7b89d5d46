//! OAuth access tokens for Cloud Storage, from the gcloud CLI

use crate::error::{ProxyError, ProxyResult};
use chrono::{DateTime, Duration, Utc};
use std::process::Stdio;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Environment variable holding a ready-made token; bypasses gcloud
pub const TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";

struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

enum TokenSource {
    Gcloud { service_account: Option<String> },
    Fixed(String),
}

/// Access token provider.
///
/// gcloud tokens are valid for an hour; they are reused for 55 minutes and
/// then fetched again. Nothing runs until the first token is needed.
pub struct AccessTokenProvider {
    source: TokenSource,
    cached: Mutex<Option<CachedToken>>,
}

impl AccessTokenProvider {
    /// Provider backed by `gcloud auth print-access-token`
    pub fn gcloud(service_account: Option<String>) -> Self {
        Self {
            source: TokenSource::Gcloud { service_account },
            cached: Mutex::new(None),
        }
    }

    /// Provider that always returns `token`
    pub fn fixed(token: impl Into<String>) -> Self {
        Self {
            source: TokenSource::Fixed(token.into()),
            cached: Mutex::new(None),
        }
    }

    /// Use `GOOGLE_OAUTH_ACCESS_TOKEN` when set, gcloud otherwise
    pub fn from_env(service_account: Option<String>) -> Self {
        match std::env::var(TOKEN_ENV) {
            Ok(token) if !token.trim().is_empty() => {
                debug!("Using access token from {}", TOKEN_ENV);
                Self::fixed(token.trim())
            }
            _ => Self::gcloud(service_account),
        }
    }

    /// Get a token, fetching a new one if the cached one expired
    pub async fn token(&self) -> ProxyResult<String> {
        let service_account = match &self.source {
            TokenSource::Fixed(token) => return Ok(token.clone()),
            TokenSource::Gcloud { service_account } => service_account,
        };

        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Utc::now() {
                debug!("Using cached access token");
                return Ok(token.value.clone());
            }
        }

        let value = print_access_token(service_account.as_deref()).await?;
        *cached = Some(CachedToken {
            value: value.clone(),
            expires_at: Utc::now() + Duration::minutes(55),
        });
        Ok(value)
    }
}

async fn print_access_token(service_account: Option<&str>) -> ProxyResult<String> {
    info!("Requesting GCP access token...");

    let mut cmd = Command::new("gcloud");
    cmd.args(["auth", "print-access-token"]);
    if let Some(account) = service_account {
        cmd.args(["--impersonate-service-account", account]);
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    let output = cmd
        .output()
        .await
        .map_err(|e| ProxyError::command_failed("gcloud auth print-access-token", e))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ProxyError::AccessToken(stderr.trim().to_string()));
    }

    let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if token.is_empty() {
        return Err(ProxyError::AccessToken("Empty token returned".to_string()));
    }
    Ok(token)
}
