use gphotos_core::{OAuthClient, OAuthError};
use thiserror::Error;
use tracing::{info, warn};

use crate::storage::{TokenFile, TokenFileError, TokenState};

const REFRESH_SKEW_SECS: i64 = 60;

#[derive(Debug, Error)]
pub enum TokenProviderError {
    #[error("access token expired and GPHOTOS_CLIENT_ID/GPHOTOS_CLIENT_SECRET are not set")]
    MissingOAuthClient,
    #[error("access token expired and the token file has no refresh token")]
    MissingRefreshToken,
    #[error("refresh token was revoked or has expired; authorize again")]
    Revoked(#[source] OAuthError),
    #[error("oauth refresh failed: {0}")]
    OAuth(OAuthError),
    #[error("token file error: {0}")]
    TokenFile(#[from] TokenFileError),
}

impl From<OAuthError> for TokenProviderError {
    fn from(err: OAuthError) -> Self {
        if err.is_revoked() {
            TokenProviderError::Revoked(err)
        } else {
            TokenProviderError::OAuth(err)
        }
    }
}

/// Hands out a Google access token that stays valid for at least a minute.
///
/// Access tokens live about an hour, so a long run refreshes on the way.
/// Refreshed state is written back to the token file when one is attached.
pub struct TokenProvider {
    state: TokenState,
    oauth_client: Option<OAuthClient>,
    token_file: Option<TokenFile>,
}

impl TokenProvider {
    pub fn new(state: TokenState, oauth_client: Option<OAuthClient>) -> Self {
        Self {
            state,
            oauth_client,
            token_file: None,
        }
    }

    pub fn with_token_file(mut self, token_file: TokenFile) -> Self {
        self.token_file = Some(token_file);
        self
    }

    pub async fn valid_access_token(&mut self) -> Result<String, TokenProviderError> {
        if self.expires_soon(now_unix()) {
            self.refresh().await?;
        }
        Ok(self.state.access_token.clone())
    }

    fn expires_soon(&self, now: i64) -> bool {
        self.state
            .expires_at
            .is_some_and(|expires_at| expires_at <= now.saturating_add(REFRESH_SKEW_SECS))
    }

    async fn refresh(&mut self) -> Result<(), TokenProviderError> {
        let refresh_token = self
            .state
            .refresh_token
            .as_deref()
            .ok_or(TokenProviderError::MissingRefreshToken)?;
        let client = self
            .oauth_client
            .as_ref()
            .ok_or(TokenProviderError::MissingOAuthClient)?;
        let token = client.refresh_token(refresh_token).await?;
        self.state = self.state.refreshed(&token, now_unix());
        info!(expires_at = ?self.state.expires_at, "access token refreshed");

        if let Some(file) = &self.token_file {
            if let Err(err) = file.save(&self.state) {
                warn!(path = %file.path().display(), error = %err, "failed to persist refreshed token");
            }
        }
        Ok(())
    }
}

fn now_unix() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn expired(refresh_token: Option<&str>) -> TokenState {
        TokenState {
            access_token: "old-token".into(),
            refresh_token: refresh_token.map(Into::into),
            expires_at: Some(0),
            scope: None,
            token_type: Some("Bearer".into()),
        }
    }

    #[tokio::test]
    async fn returns_current_token_when_not_expired() {
        let mut provider = TokenProvider::new(
            TokenState {
                access_token: "token-1".into(),
                refresh_token: Some("refresh-1".into()),
                expires_at: Some(i64::MAX),
                scope: None,
                token_type: Some("Bearer".into()),
            },
            None,
        );

        let token = provider
            .valid_access_token()
            .await
            .expect("token should be valid");
        assert_eq!(token, "token-1");
    }

    #[tokio::test]
    async fn token_without_expiry_is_used_as_is() {
        let mut provider = TokenProvider::new(
            TokenState {
                access_token: "static".into(),
                refresh_token: None,
                expires_at: None,
                scope: None,
                token_type: None,
            },
            None,
        );
        assert_eq!(provider.valid_access_token().await.unwrap(), "static");
    }

    #[tokio::test]
    async fn refreshes_expired_token_and_persists_it() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=refresh-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "new-token",
                "token_type": "Bearer",
                "expires_in": 3599
            })))
            .mount(&server)
            .await;
        let oauth_client = OAuthClient::with_base_url(&server.uri(), "client-id", "secret")
            .expect("oauth client should be built");
        let dir = tempdir().unwrap();
        let token_file = TokenFile::new(dir.path().join("token.json"));
        let mut provider = TokenProvider::new(expired(Some("refresh-1")), Some(oauth_client))
            .with_token_file(token_file.clone());

        let token = provider
            .valid_access_token()
            .await
            .expect("token should refresh");

        assert_eq!(token, "new-token");
        assert_eq!(provider.state.refresh_token.as_deref(), Some("refresh-1"));
        let saved = token_file.load().unwrap();
        assert_eq!(saved.access_token, "new-token");
        assert!(saved.expires_at.unwrap() > now_unix());
    }

    #[tokio::test]
    async fn returns_error_when_expired_and_no_refresh_token() {
        let mut provider = TokenProvider::new(expired(None), None);

        let err = provider
            .valid_access_token()
            .await
            .expect_err("expected missing refresh token error");
        assert!(matches!(err, TokenProviderError::MissingRefreshToken));
    }

    #[tokio::test]
    async fn returns_error_when_expired_without_oauth_client() {
        let mut provider = TokenProvider::new(expired(Some("refresh-1")), None);

        let err = provider
            .valid_access_token()
            .await
            .expect_err("expected missing client error");
        assert!(matches!(err, TokenProviderError::MissingOAuthClient));
    }

    #[tokio::test]
    async fn revoked_refresh_token_is_reported_as_such() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant",
                "error_description": "Token has been expired or revoked."
            })))
            .mount(&server)
            .await;
        let oauth_client = OAuthClient::with_base_url(&server.uri(), "client-id", "secret")
            .expect("oauth client should be built");
        let mut provider = TokenProvider::new(expired(Some("refresh-1")), Some(oauth_client));

        let err = provider
            .valid_access_token()
            .await
            .expect_err("expected revoked grant");
        assert!(matches!(err, TokenProviderError::Revoked(_)));
        assert_eq!(provider.state.access_token, "old-token");
    }

    #[test]
    fn refreshes_a_minute_before_expiry() {
        let provider = TokenProvider::new(
            TokenState {
                expires_at: Some(1_000),
                ..expired(None)
            },
            None,
        );
        assert!(!provider.expires_soon(939));
        assert!(provider.expires_soon(940));
    }
}
