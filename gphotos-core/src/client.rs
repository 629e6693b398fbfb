use std::sync::{Arc, RwLock};

use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::retry::{RetryPolicy, RetryingHttp};

pub const DEFAULT_BASE_URL: &str = "https://photoslibrary.googleapis.com";

#[derive(Debug, Error)]
pub enum PhotosError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("base url cannot carry path segments: {0}")]
    CannotBeABase(Url),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    RateLimit,
    Transient,
    Permanent,
}

/// Bearer-authenticated client for the media-items endpoints.
///
/// Clones share the HTTP pool and the access token, so a token refreshed
/// through [`PhotosClient::set_access_token`] is seen by every clone.
#[derive(Clone)]
pub struct PhotosClient {
    http: RetryingHttp,
    base_url: Url,
    token: Arc<RwLock<String>>,
}

impl PhotosClient {
    pub fn with_policy(
        base_url: &str,
        token: impl Into<String>,
        policy: RetryPolicy,
    ) -> Result<Self, PhotosError> {
        Ok(Self {
            http: RetryingHttp::new(Client::new(), policy),
            base_url: Url::parse(base_url)?,
            token: Arc::new(RwLock::new(token.into())),
        })
    }

    pub fn set_access_token(&self, token: impl Into<String>) {
        let mut guard = self.token.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = token.into();
    }

    pub async fn list_media_items(
        &self,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<MediaItemsPage, PhotosError> {
        let mut url = self.endpoint("/v1/mediaItems")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("pageSize", &page_size.to_string());
            if let Some(token) = page_token {
                query.append_pair("pageToken", token);
            }
        }
        let request = self
            .http
            .client()
            .get(url)
            .bearer_auth(self.access_token())
            .build()?;
        let response = self.http.execute(request).await?;
        Self::handle_response(response).await
    }

    pub async fn search_media_items(
        &self,
        search: &SearchRequest,
    ) -> Result<MediaItemsPage, PhotosError> {
        let url = self.endpoint("/v1/mediaItems:search")?;
        let request = self
            .http
            .client()
            .post(url)
            .bearer_auth(self.access_token())
            .json(search)
            .build()?;
        let response = self.http.execute(request).await?;
        Self::handle_response(response).await
    }

    pub async fn get_media_item(&self, id: &str) -> Result<RemoteMediaItem, PhotosError> {
        let mut url = self.endpoint("/v1/mediaItems")?;
        url.path_segments_mut()
            .map_err(|_| PhotosError::CannotBeABase(self.base_url.clone()))?
            .push(id);
        let request = self
            .http
            .client()
            .get(url)
            .bearer_auth(self.access_token())
            .build()?;
        let response = self.http.execute(request).await?;
        Self::handle_response(response).await
    }

    /// Opens a content URL (a `baseUrl` with its download suffix) for streaming.
    pub async fn fetch_content(&self, content_url: &str) -> Result<Response, PhotosError> {
        let url = Url::parse(content_url)?;
        let request = self.http.client().get(url).build()?;
        let response = self.http.execute(request).await?;
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(PhotosError::Api { status, body })
        }
    }

    fn access_token(&self) -> String {
        self.token
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn endpoint(&self, path: &str) -> Result<Url, PhotosError> {
        Ok(self.base_url.join(path)?)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: Response,
    ) -> Result<T, PhotosError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(PhotosError::Api { status, body })
        }
    }
}

impl PhotosError {
    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            PhotosError::Api { status, .. } => Some(classify_api_status(*status)),
            _ => None,
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self.classification(), Some(ApiErrorClass::Auth))
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            PhotosError::Request(err) => err.is_connect() || err.is_timeout(),
            _ => matches!(
                self.classification(),
                Some(ApiErrorClass::RateLimit | ApiErrorClass::Transient)
            ),
        }
    }
}

fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ApiErrorClass::Auth
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ApiErrorClass::RateLimit
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteMediaItem {
    pub id: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub media_metadata: MediaMetadata,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaMetadata {
    #[serde(default)]
    pub creation_time: Option<String>,
    #[serde(default)]
    pub modification_time: Option<String>,
    #[serde(default)]
    pub photo: Option<PhotoMetadata>,
    #[serde(default)]
    pub video: Option<VideoMetadata>,
}

/// Present on still images. Only its presence is used, to tell media kinds
/// apart when `mimeType` is missing.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PhotoMetadata {}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct VideoMetadata {}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaItemsPage {
    #[serde(default)]
    pub media_items: Vec<RemoteMediaItem>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub page_size: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<SearchFilters>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchFilters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_type_filter: Option<MediaTypeFilter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_filter: Option<DateFilter>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaTypeFilter {
    pub media_types: Vec<String>,
}

impl MediaTypeFilter {
    pub fn photos_only() -> Self {
        Self {
            media_types: vec!["PHOTO".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DateFilter {
    pub ranges: Vec<DateRange>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRange {
    pub start_date: DateBound,
    pub end_date: DateBound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateBound {
    pub year: i32,
    pub month: u8,
    pub day: u8,
}

impl DateBound {
    pub const EARLIEST: DateBound = DateBound {
        year: 1,
        month: 1,
        day: 1,
    };
    pub const LATEST: DateBound = DateBound {
        year: 9999,
        month: 12,
        day: 31,
    };
}
