use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const DEFAULT_BASE_URL: &str = "https://oauth2.googleapis.com";

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid base url: {0}")]
    Url(#[from] url::ParseError),
    /// The endpoint answered with a standard OAuth error object.
    #[error("token endpoint rejected the grant: {error}")]
    Grant {
        status: StatusCode,
        error: String,
        description: Option<String>,
    },
    #[error("token endpoint returned {status}: {body}")]
    Api { status: StatusCode, body: String },
}

impl OAuthError {
    /// `invalid_grant`: the refresh token expired or the user revoked access.
    /// Only a new interactive authorization can recover from this.
    pub fn is_revoked(&self) -> bool {
        matches!(self, OAuthError::Grant { error, .. } if error == "invalid_grant")
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Client for Google's OAuth 2.0 token endpoint, limited to the refresh grant.
#[derive(Clone)]
pub struct OAuthClient {
    http: Client,
    base_url: Url,
    client_id: String,
    client_secret: String,
}

impl OAuthClient {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Result<Self, OAuthError> {
        Self::with_base_url(DEFAULT_BASE_URL, client_id, client_secret)
    }

    pub fn with_base_url(
        base_url: &str,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Result<Self, OAuthError> {
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(base_url)?,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        })
    }

    /// Trades a refresh token for a new access token. Google keeps the scope
    /// of the original grant and does not rotate the refresh token, so the
    /// response usually carries no `refresh_token`.
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<OAuthToken, OAuthError> {
        let url = self.base_url.join("/token")?;
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];

        let response = self.http.post(url).form(&form).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<OAuthToken>().await?);
        }
        let body = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ErrorBody>(&body) {
            Ok(parsed) => Err(OAuthError::Grant {
                status,
                error: parsed.error,
                description: parsed.error_description,
            }),
            Err(_) => Err(OAuthError::Api { status, body }),
        }
    }
}

fn bearer() -> String {
    "Bearer".to_string()
}

/// Token endpoint response. `scope` is space separated.
#[derive(Debug, Deserialize, Serialize)]
pub struct OAuthToken {
    pub access_token: String,
    #[serde(default = "bearer")]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl OAuthToken {
    /// Absolute expiry, in unix seconds, for a token issued at `issued_at`.
    pub fn expires_at(&self, issued_at: i64) -> Option<i64> {
        let lifetime = i64::try_from(self.expires_in?).ok()?;
        Some(issued_at.saturating_add(lifetime))
    }
}
