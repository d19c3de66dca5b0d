use std::collections::BTreeMap;
use std::time::Duration;

use httpmock::prelude::*;
use serde_json::json;
use visitor_tracker::config::TrackerConfig;
use visitor_tracker::tracker::session::Session;
use visitor_tracker::tracker::{
    Batch, Buffer, EventTracker, HttpTransport, RawEvent, SendOutcome, Transport,
};
use visitor_tracker::API_KEY_HEADER;

fn batch_of(names: &[&str]) -> Batch {
    let mut session = Session::with_id("http-session");
    let mut buffer = Buffer::new(names.len().max(1));
    for name in names {
        buffer.append(session.stamp(RawEvent::new(*name, json!({})), &BTreeMap::new()));
    }
    buffer.take_batch(names.len())
}

#[tokio::test]
async fn test_delivered_on_2xx() {
    let server = MockServer::start_async().await;
    let collector = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/events")
                .header("Content-Type", "application/json")
                .header(API_KEY_HEADER, "secret")
                .body_contains(r#""sessionId":"http-session""#)
                .body_contains(r#""name":"page_view""#);
            then.status(202);
        })
        .await;

    let config = TrackerConfig {
        api_key: Some("secret".to_string()),
        ..TrackerConfig::new(server.url("/events"))
    };
    let transport = HttpTransport::new(&config);

    let outcome = transport.send(&batch_of(&["page_view", "click"])).await;
    assert_eq!(outcome, SendOutcome::Delivered);
    collector.assert_async().await;
}

#[tokio::test]
async fn test_rejected_on_4xx() {
    let server = MockServer::start_async().await;
    let collector = server
        .mock_async(|when, then| {
            when.method(POST).path("/events");
            then.status(400).body("malformed batch");
        })
        .await;

    let transport = HttpTransport::new(&TrackerConfig::new(server.url("/events")));
    let outcome = transport.send(&batch_of(&["click"])).await;
    assert_eq!(outcome, SendOutcome::Rejected);
    collector.assert_async().await;
}

#[tokio::test]
async fn test_unreachable_on_5xx() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/events");
            then.status(503);
        })
        .await;

    let transport = HttpTransport::new(&TrackerConfig::new(server.url("/events")));
    let outcome = transport.send(&batch_of(&["click"])).await;
    assert_eq!(outcome, SendOutcome::Unreachable);
}

#[tokio::test]
async fn test_unreachable_on_timeout() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/events");
            then.status(200).delay(Duration::from_millis(500));
        })
        .await;

    let config = TrackerConfig {
        request_timeout_ms: 50,
        ..TrackerConfig::new(server.url("/events"))
    };
    let transport = HttpTransport::new(&config);
    let outcome = transport.send(&batch_of(&["click"])).await;
    assert_eq!(outcome, SendOutcome::Unreachable);
}

#[tokio::test]
async fn test_unreachable_on_connection_error() {
    let transport = HttpTransport::new(&TrackerConfig::new("http://127.0.0.1:1/events"));
    let outcome = transport.send(&batch_of(&["click"])).await;
    assert_eq!(outcome, SendOutcome::Unreachable);
}

#[tokio::test]
async fn test_tracker_flushes_over_http() {
    let server = MockServer::start_async().await;
    let collector = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/events")
                .body_contains(r#""name":"page_view""#)
                .body_contains(r#""path":"/case/12""#)
                .body_contains(r#""app":"memorial""#)
                .body_contains(r#""sequence":1"#);
            then.status(200);
        })
        .await;

    let config = TrackerConfig {
        global_properties: BTreeMap::from([("app".to_string(), "memorial".to_string())]),
        ..TrackerConfig::new(server.url("/events"))
    };
    let tracker = EventTracker::init_http(config).expect("valid config");

    tracker.track_page_view("/case/12");
    tracker.flush().await.expect("flush");

    collector.assert_async().await;
    assert!(tracker.pending().await.expect("pending").is_empty());
}

#[tokio::test]
async fn test_destroy_sends_beacon() {
    let server = MockServer::start_async().await;
    let collector = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/events")
                .body_contains(r#""name":"tip_submission""#);
            then.status(202);
        })
        .await;

    let tracker =
        EventTracker::init_http(TrackerConfig::new(server.url("/events"))).expect("valid config");
    tracker.track_tip_submission("case-7", json!({"anonymous": true}));
    tracker.destroy().await.expect("destroy");

    // beacon sends are fire-and-forget, give it a moment to land
    for _ in 0..50 {
        if collector.hits_async().await == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    collector.assert_async().await;
}
