mod client;
mod oauth;
pub mod retry;

pub use client::DEFAULT_BASE_URL as DEFAULT_API_BASE_URL;
pub use client::{
    ApiErrorClass, DateBound, DateFilter, DateRange, MediaItemsPage, MediaMetadata,
    MediaTypeFilter, PhotoMetadata, PhotosClient, PhotosError, RemoteMediaItem, SearchFilters,
    SearchRequest, VideoMetadata,
};
pub use oauth::{OAuthClient, OAuthError, OAuthToken};
pub use retry::{Backoff, RetryPolicy, RetryingHttp};
