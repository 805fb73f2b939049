//! Subscription REST API Integration Tests
//!
//! Exercises `SubscriptionApi` against a mock HTTP server.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use quote_stream_client::{
    BusCommand, BusEvent, ClientConfig, ConnectionEvent, ControlError, QuoteSubscriptionClient,
    RestError, SessionSettings, SubscriptionApi, SubscriptionControl,
};

fn api(server: &MockServer) -> SubscriptionApi {
    SubscriptionApi::new(&server.uri(), Duration::from_secs(2)).unwrap()
}

#[tokio::test]
async fn test_subscribe_posts_to_ticker_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/stock/subscription/005930/subscribe"))
        .respond_with(ResponseTemplate::new(200).set_body_string("subscribed"))
        .expect(1)
        .mount(&server)
        .await;

    api(&server).subscribe("005930").await.unwrap();
}

#[tokio::test]
async fn test_unsubscribe_accepts_any_2xx() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/stock/subscription/005930/unsubscribe"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    api(&server).unsubscribe("005930").await.unwrap();
}

#[tokio::test]
async fn test_non_success_status_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/stock/subscription/005930/subscribe"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
        .mount(&server)
        .await;

    let err = api(&server).subscribe("005930").await.unwrap_err();
    match err {
        RestError::Status { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "upstream down");
        }
        other => panic!("expected status error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_control_port_maps_rejection() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/stock/subscription/005930/unsubscribe"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let control: Arc<dyn SubscriptionControl> = Arc::new(api(&server));
    let err = control.disable("005930").await.unwrap_err();
    assert_eq!(err, ControlError::Rejected { status: 404 });
}

#[tokio::test]
async fn test_active_subscription_count() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/stock/subscription/status"))
        .respond_with(ResponseTemplate::new(200).set_body_string("3"))
        .mount(&server)
        .await;

    assert_eq!(api(&server).active_subscription_count().await.unwrap(), 3);
}

#[tokio::test]
async fn test_active_subscription_count_rejects_non_integer() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/stock/subscription/status"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{\"count\":3}"))
        .mount(&server)
        .await;

    let err = api(&server).active_subscription_count().await.unwrap_err();
    assert!(matches!(err, RestError::Decode(_)));
}

#[tokio::test]
async fn test_unreachable_server_is_network_error() {
    let api = SubscriptionApi::new("http://127.0.0.1:1", Duration::from_millis(500)).unwrap();
    let err = api.subscribe("005930").await.unwrap_err();
    assert!(matches!(err, RestError::Network(_)));

    let control: ControlError = err.into();
    assert!(matches!(control, ControlError::Network(_)));
}

#[tokio::test]
async fn test_client_toggles_forwarding_through_rest() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/stock/subscription/005930/subscribe"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/stock/subscription/005930/unsubscribe"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let config = ClientConfig::new(server.uri());
    let control = Arc::new(SubscriptionApi::from_config(&config).unwrap());
    let (bus_tx, mut bus_rx) = mpsc::channel(16);
    let (event_tx, event_rx) = mpsc::channel(16);
    let client = QuoteSubscriptionClient::with_parts(
        SessionSettings {
            sequenced_enable: true,
            ..SessionSettings::default()
        },
        control,
        bus_tx,
        event_rx,
        CancellationToken::new(),
    );

    event_tx
        .send(BusEvent::Connection(ConnectionEvent::Connected))
        .await
        .unwrap();

    client.subscribe_confirmed("005930").await.unwrap();
    assert!(matches!(
        bus_rx.recv().await,
        Some(BusCommand::Subscribe { .. })
    ));

    client.close().await;
    // Mock expectations are verified when the server drops.
}
