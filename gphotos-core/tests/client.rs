use std::time::Duration;

use gphotos_core::{
    ApiErrorClass, Backoff, MediaTypeFilter, PhotosClient, PhotosError, RetryPolicy,
    SearchFilters, SearchRequest,
};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn no_wait_policy() -> RetryPolicy {
    RetryPolicy::default().with_backoff(Backoff::new(
        Duration::from_millis(1),
        Duration::from_millis(2),
        false,
    ))
}

#[tokio::test]
async fn list_media_items_sends_bearer_token_and_page_size() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/mediaItems"))
        .and(query_param("pageSize", "100"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "mediaItems": [
                {
                    "id": "AAA",
                    "filename": "IMG_0001.JPG",
                    "mimeType": "image/jpeg",
                    "baseUrl": "https://lh3.example/AAA",
                    "mediaMetadata": {
                        "creationTime": "2020-01-01T10:00:00Z",
                        "photo": { "cameraMake": "Pixel" }
                    }
                }
            ],
            "nextPageToken": "page-2"
        })))
        .mount(&server)
        .await;

    let client =
        PhotosClient::with_policy(&server.uri(), "test-token", RetryPolicy::none()).unwrap();
    let page = client.list_media_items(100, None).await.unwrap();

    assert_eq!(page.media_items.len(), 1);
    assert_eq!(page.media_items[0].filename, "IMG_0001.JPG");
    assert_eq!(
        page.media_items[0].media_metadata.creation_time.as_deref(),
        Some("2020-01-01T10:00:00Z")
    );
    assert!(page.media_items[0].media_metadata.photo.is_some());
    assert_eq!(page.next_page_token.as_deref(), Some("page-2"));
}

#[tokio::test]
async fn list_media_items_forwards_page_token() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/mediaItems"))
        .and(query_param("pageToken", "page-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let client =
        PhotosClient::with_policy(&server.uri(), "test-token", RetryPolicy::none()).unwrap();
    let page = client.list_media_items(100, Some("page-2")).await.unwrap();

    assert!(page.media_items.is_empty());
    assert!(page.next_page_token.is_none());
}

#[tokio::test]
async fn search_media_items_posts_filters() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/mediaItems:search"))
        .and(body_json(json!({
            "pageSize": 50,
            "filters": { "mediaTypeFilter": { "mediaTypes": ["PHOTO"] } }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "mediaItems": [
                { "id": "BBB", "filename": "b.jpg", "mimeType": "image/jpeg" }
            ]
        })))
        .mount(&server)
        .await;

    let client =
        PhotosClient::with_policy(&server.uri(), "test-token", RetryPolicy::none()).unwrap();
    let page = client
        .search_media_items(&SearchRequest {
            page_size: 50,
            page_token: None,
            filters: Some(SearchFilters {
                media_type_filter: Some(MediaTypeFilter::photos_only()),
                date_filter: None,
            }),
        })
        .await
        .unwrap();

    assert_eq!(page.media_items[0].id, "BBB");
}

#[tokio::test]
async fn get_media_item_returns_fresh_base_url() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/mediaItems/AAA"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "AAA",
            "filename": "IMG_0001.JPG",
            "mimeType": "image/jpeg",
            "baseUrl": "https://lh3.example/fresh"
        })))
        .mount(&server)
        .await;

    let client =
        PhotosClient::with_policy(&server.uri(), "test-token", RetryPolicy::none()).unwrap();
    let item = client.get_media_item("AAA").await.unwrap();

    assert_eq!(item.base_url.as_deref(), Some("https://lh3.example/fresh"));
}

#[tokio::test]
async fn set_access_token_is_shared_between_clones() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/mediaItems"))
        .and(header("authorization", "Bearer rotated"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let client =
        PhotosClient::with_policy(&server.uri(), "stale", RetryPolicy::none()).unwrap();
    let clone = client.clone();
    client.set_access_token("rotated");

    clone.list_media_items(10, None).await.unwrap();
}

#[tokio::test]
async fn unauthorized_is_classified_as_auth() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/mediaItems"))
        .respond_with(ResponseTemplate::new(401).set_body_string("expired"))
        .mount(&server)
        .await;

    let client =
        PhotosClient::with_policy(&server.uri(), "test-token", RetryPolicy::none()).unwrap();
    let err = client.list_media_items(100, None).await.unwrap_err();

    assert_eq!(err.classification(), Some(ApiErrorClass::Auth));
    assert!(err.is_auth());
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn rate_limited_listing_is_retried_transparently() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/mediaItems"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/mediaItems"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "mediaItems": [{ "id": "AAA", "filename": "a.jpg", "mimeType": "image/jpeg" }]
        })))
        .mount(&server)
        .await;

    let client =
        PhotosClient::with_policy(&server.uri(), "test-token", no_wait_policy()).unwrap();
    let page = client.list_media_items(100, None).await.unwrap();

    assert_eq!(page.media_items.len(), 1);
}

#[tokio::test]
async fn fetch_content_streams_bytes_and_reports_failures() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/AAA=d"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"jpeg-bytes"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/gone=d"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client =
        PhotosClient::with_policy(&server.uri(), "test-token", RetryPolicy::none()).unwrap();
    let response = client
        .fetch_content(&format!("{}/AAA=d", server.uri()))
        .await
        .unwrap();
    assert_eq!(response.bytes().await.unwrap().as_ref(), b"jpeg-bytes");

    let err = client
        .fetch_content(&format!("{}/gone=d", server.uri()))
        .await
        .unwrap_err();
    assert!(matches!(err, PhotosError::Api { .. }));
}
