use std::io;
use std::path::{Path, PathBuf};

use gphotos_core::OAuthToken;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TokenFileError {
    #[error("token file {0} not found")]
    NotFound(PathBuf),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("token file is not valid json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Persisted OAuth session. `expires_at` is a unix timestamp in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenState {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
}

impl TokenState {
    /// State after a refresh at `now` (unix seconds). Google answers a
    /// refresh with a new access token only: the refresh token and granted
    /// scope of the original authorization carry over unless the response
    /// replaces them.
    pub fn refreshed(&self, token: &OAuthToken, now: i64) -> Self {
        Self {
            access_token: token.access_token.clone(),
            refresh_token: token
                .refresh_token
                .clone()
                .or_else(|| self.refresh_token.clone()),
            expires_at: token.expires_at(now),
            scope: token.scope.clone().or_else(|| self.scope.clone()),
            token_type: Some(token.token_type.clone()),
        }
    }
}

/// JSON token file, written owner-only on unix.
#[derive(Debug, Clone)]
pub struct TokenFile {
    path: PathBuf,
}

impl TokenFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<TokenState, TokenFileError> {
        let raw = match std::fs::read(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(TokenFileError::NotFound(self.path.clone()));
            }
            Err(err) => return Err(err.into()),
        };
        Ok(serde_json::from_slice(&raw)?)
    }

    pub fn save(&self, state: &TokenState) -> Result<(), TokenFileError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_vec_pretty(state)?;
        let staging = self.path.with_extension("json.tmp");
        std::fs::write(&staging, raw)?;
        restrict_permissions(&staging)?;
        std::fs::rename(&staging, &self.path)?;
        Ok(())
    }

    pub fn delete(&self) -> Result<(), TokenFileError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> io::Result<()> {
    Ok(())
}
