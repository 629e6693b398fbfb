use std::collections::VecDeque;

use futures_util::Stream;
use futures_util::stream;
use gphotos_core::{
    DateBound, DateFilter, DateRange, MediaItemsPage, MediaTypeFilter, PhotosClient, PhotosError,
    RemoteMediaItem, SearchFilters, SearchRequest,
};
use time::{OffsetDateTime, UtcOffset};
use tracing::debug;

use super::media::{MediaItem, MediaKind};

pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Which part of the catalog a walk yields. Both date bounds are inclusive and
/// apply to the item's modify date.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatalogFilter {
    pub include_video: bool,
    pub modified_after: Option<OffsetDateTime>,
    pub modified_before: Option<OffsetDateTime>,
}

impl CatalogFilter {
    pub fn admits(&self, item: &MediaItem) -> bool {
        if item.kind == MediaKind::Video && !self.include_video {
            return false;
        }
        if self
            .modified_after
            .is_some_and(|after| item.modify_date < after)
        {
            return false;
        }
        if self
            .modified_before
            .is_some_and(|before| item.modify_date > before)
        {
            return false;
        }
        true
    }

    /// Server-side prefilter. The remote date filter is day-granular, so it can
    /// only narrow the listing; [`CatalogFilter::admits`] has the final say.
    fn search_filters(&self) -> Option<SearchFilters> {
        let media_type_filter = (!self.include_video).then(MediaTypeFilter::photos_only);
        let date_filter = (self.modified_after.is_some() || self.modified_before.is_some()).then(
            || DateFilter {
                ranges: vec![DateRange {
                    start_date: self
                        .modified_after
                        .map(date_bound)
                        .unwrap_or(DateBound::EARLIEST),
                    end_date: self
                        .modified_before
                        .map(date_bound)
                        .unwrap_or(DateBound::LATEST),
                }],
            },
        );
        if media_type_filter.is_none() && date_filter.is_none() {
            return None;
        }
        Some(SearchFilters {
            media_type_filter,
            date_filter,
        })
    }
}

pub struct CatalogWalker {
    client: PhotosClient,
    page_size: u32,
}

#[derive(Default)]
struct WalkState {
    buffered: VecDeque<MediaItem>,
    next_page: Option<String>,
    started: bool,
    pages: u32,
}

impl CatalogWalker {
    pub fn new(client: PhotosClient) -> Self {
        Self::with_page_size(client, DEFAULT_PAGE_SIZE)
    }

    pub fn with_page_size(client: PhotosClient, page_size: u32) -> Self {
        Self {
            client,
            page_size: page_size.max(1),
        }
    }

    /// Lazily walks the catalog from the first page, following next-page
    /// tokens until the remote stops returning one. Items come out in catalog
    /// order; a failed page fetch ends the stream with that error.
    pub fn walk(
        &self,
        filter: CatalogFilter,
    ) -> impl Stream<Item = Result<MediaItem, PhotosError>> + use<> {
        let client = self.client.clone();
        let page_size = self.page_size;
        stream::try_unfold(WalkState::default(), move |state| {
            let client = client.clone();
            async move { next_item(&client, page_size, filter, state).await }
        })
    }
}

async fn next_item(
    client: &PhotosClient,
    page_size: u32,
    filter: CatalogFilter,
    mut state: WalkState,
) -> Result<Option<(MediaItem, WalkState)>, PhotosError> {
    loop {
        if let Some(item) = state.buffered.pop_front() {
            return Ok(Some((item, state)));
        }
        if state.started && state.next_page.is_none() {
            return Ok(None);
        }

        let page_token = state.next_page.take();
        let page = fetch_page(client, page_size, &filter, page_token).await?;
        state.started = true;
        state.pages += 1;
        debug!(
            page = state.pages,
            items = page.media_items.len(),
            "fetched catalog page"
        );
        state.next_page = page.next_page_token.filter(|token| !token.is_empty());
        state.buffered.extend(
            page.media_items
                .into_iter()
                .filter_map(|raw| admit(raw, &filter)),
        );
    }
}

async fn fetch_page(
    client: &PhotosClient,
    page_size: u32,
    filter: &CatalogFilter,
    page_token: Option<String>,
) -> Result<MediaItemsPage, PhotosError> {
    match filter.search_filters() {
        Some(filters) => {
            client
                .search_media_items(&SearchRequest {
                    page_size,
                    page_token,
                    filters: Some(filters),
                })
                .await
        }
        None => {
            client
                .list_media_items(page_size, page_token.as_deref())
                .await
        }
    }
}

fn admit(raw: RemoteMediaItem, filter: &CatalogFilter) -> Option<MediaItem> {
    let item = match MediaItem::try_from(raw) {
        Ok(item) => item,
        Err(err) => {
            debug!(error = %err, "skipping catalog entry");
            return None;
        }
    };
    filter.admits(&item).then_some(item)
}

fn date_bound(value: OffsetDateTime) -> DateBound {
    let date = value.to_offset(UtcOffset::UTC).date();
    DateBound {
        year: date.year(),
        month: u8::from(date.month()),
        day: date.day(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::TryStreamExt;
    use gphotos_core::RetryPolicy;
    use serde_json::json;
    use time::macros::datetime;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> PhotosClient {
        PhotosClient::with_policy(&server.uri(), "test-token", RetryPolicy::none()).unwrap()
    }

    fn photo(id: &str, modified: &str) -> serde_json::Value {
        json!({
            "id": id,
            "filename": format!("{id}.jpg"),
            "mimeType": "image/jpeg",
            "mediaMetadata": { "creationTime": modified }
        })
    }

    #[tokio::test]
    async fn follows_page_tokens_until_exhausted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/mediaItems:search"))
            .and(body_json(json!({
                "pageSize": 2,
                "filters": { "mediaTypeFilter": { "mediaTypes": ["PHOTO"] } }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "mediaItems": [photo("A", "2020-01-02T00:00:00Z"), photo("B", "2020-01-01T00:00:00Z")],
                "nextPageToken": "p2"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/mediaItems:search"))
            .and(body_json(json!({
                "pageSize": 2,
                "pageToken": "p2",
                "filters": { "mediaTypeFilter": { "mediaTypes": ["PHOTO"] } }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "mediaItems": [photo("C", "2020-01-03T00:00:00Z")]
            })))
            .mount(&server)
            .await;

        let walker = CatalogWalker::with_page_size(client(&server), 2);
        let items: Vec<MediaItem> = walker
            .walk(CatalogFilter::default())
            .try_collect()
            .await
            .unwrap();

        let ids: Vec<_> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn uses_plain_listing_when_nothing_is_filtered() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/mediaItems"))
            .and(query_param("pageSize", "100"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "mediaItems": [
                    photo("A", "2020-01-01T00:00:00Z"),
                    {
                        "id": "V",
                        "filename": "v.mp4",
                        "mimeType": "video/mp4",
                        "mediaMetadata": { "creationTime": "2020-01-02T00:00:00Z" }
                    },
                    { "id": "DOC", "filename": "doc.pdf", "mimeType": "application/pdf" }
                ]
            })))
            .mount(&server)
            .await;

        let walker = CatalogWalker::new(client(&server));
        let items: Vec<MediaItem> = walker
            .walk(CatalogFilter {
                include_video: true,
                ..CatalogFilter::default()
            })
            .try_collect()
            .await
            .unwrap();

        let kinds: Vec<_> = items.iter().map(|i| i.kind).collect();
        assert_eq!(kinds, vec![MediaKind::Photo, MediaKind::Video]);
    }

    #[tokio::test]
    async fn applies_exact_date_bounds_after_remote_prefilter() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/mediaItems:search"))
            .and(body_json(json!({
                "pageSize": 100,
                "filters": {
                    "mediaTypeFilter": { "mediaTypes": ["PHOTO"] },
                    "dateFilter": { "ranges": [{
                        "startDate": { "year": 2020, "month": 1, "day": 2 },
                        "endDate": { "year": 9999, "month": 12, "day": 31 }
                    }]}
                }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "mediaItems": [
                    photo("EARLY", "2020-01-02T05:59:59Z"),
                    photo("EDGE", "2020-01-02T06:00:00Z"),
                    photo("LATE", "2020-01-05T00:00:00Z")
                ]
            })))
            .mount(&server)
            .await;

        let walker = CatalogWalker::new(client(&server));
        let items: Vec<MediaItem> = walker
            .walk(CatalogFilter {
                include_video: false,
                modified_after: Some(datetime!(2020-01-02 06:00:00 UTC)),
                modified_before: None,
            })
            .try_collect()
            .await
            .unwrap();

        let ids: Vec<_> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["EDGE", "LATE"]);
    }

    #[tokio::test]
    async fn page_failure_surfaces_after_earlier_items() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/mediaItems"))
            .and(query_param("pageToken", "p2"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/mediaItems"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "mediaItems": [photo("A", "2020-01-01T00:00:00Z")],
                "nextPageToken": "p2"
            })))
            .mount(&server)
            .await;

        let walker = CatalogWalker::new(client(&server));
        let stream = walker.walk(CatalogFilter {
            include_video: true,
            ..CatalogFilter::default()
        });
        futures_util::pin_mut!(stream);

        let first = stream.try_next().await.unwrap().unwrap();
        assert_eq!(first.id, "A");
        let err = stream.try_next().await.unwrap_err();
        assert!(matches!(err, PhotosError::Api { .. }));
    }

    #[test]
    fn filter_bounds_are_inclusive() {
        let filter = CatalogFilter {
            include_video: false,
            modified_after: Some(datetime!(2020-01-01 00:00:00 UTC)),
            modified_before: Some(datetime!(2020-01-31 00:00:00 UTC)),
        };
        let mut item = MediaItem {
            id: "A".into(),
            kind: MediaKind::Photo,
            filename: "a.jpg".into(),
            create_date: None,
            modify_date: datetime!(2020-01-01 00:00:00 UTC),
        };
        assert!(filter.admits(&item));
        item.modify_date = datetime!(2020-01-31 00:00:00 UTC);
        assert!(filter.admits(&item));
        item.modify_date = datetime!(2020-01-31 00:00:01 UTC);
        assert!(!filter.admits(&item));
        item.modify_date = datetime!(2020-01-15 00:00:00 UTC);
        item.kind = MediaKind::Video;
        assert!(!filter.admits(&item));
    }
}
