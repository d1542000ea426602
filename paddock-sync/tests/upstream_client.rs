//! Upstream client against a mock provider: cache interaction with shape
//! validation failures.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use paddock_sync::cache::CacheGateway;
use paddock_sync::upstream::client::CacheTtls;
use paddock_sync::upstream::{RateGate, RetryConfig, UpstreamClient, UpstreamError};

fn client_for(base_url: &str) -> UpstreamClient {
    UpstreamClient::new(
        base_url,
        Arc::new(RateGate::new(Duration::from_millis(1))),
        CacheGateway::new(100),
        RetryConfig {
            max_attempts: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        },
        CacheTtls {
            series: Duration::from_secs(3600),
            seasons: Duration::from_secs(3600),
            schedule: Duration::from_secs(3600),
        },
        Duration::from_secs(5),
    )
    .unwrap()
}

#[tokio::test]
async fn malformed_body_is_not_served_from_cache_once_upstream_recovers() {
    let server = MockServer::start().await;
    // One malformed response (an object where the listing must be an
    // array), then well-formed ones
    Mock::given(method("GET"))
        .and(path("/series"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"error": "maintenance"})))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/series"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"series_id": 280, "series_name": "GT3 Challenge", "license_group": "C",
             "car_class_ids": [2523], "active": true}
        ])))
        .mount(&server)
        .await;

    let client = client_for(&server.uri());

    let err = client.list_series(false).await.unwrap_err();
    assert!(matches!(err, UpstreamError::Shape { .. }));

    // The bad body was evicted, so this is a fresh fetch within the TTL,
    // not a replay of the cached malformed payload
    let series = client.list_series(false).await.unwrap();
    assert_eq!(series.len(), 1);
    assert_eq!(series[0].external_id, 280);

    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn well_formed_body_stays_cached() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/series"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"series_id": 280, "series_name": "GT3 Challenge", "license_group": "C",
             "car_class_ids": [2523], "active": true}
        ])))
        .mount(&server)
        .await;

    let client = client_for(&server.uri());
    client.list_series(false).await.unwrap();
    client.list_series(false).await.unwrap();

    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}
