//! Integration tests for event streams over the reqwest transport

use std::time::Duration;

use fetchkit_http::{
    event_source_helper, EventListener, FetchConfig, FetchRequest, MessageEvent, StreamErrorEvent,
};
use serde_json::json;
use tokio::{sync::mpsc, time::timeout};
use wiremock::{
    matchers::{header, method, path},
    Mock, MockServer, ResponseTemplate,
};

#[derive(Debug)]
enum Received {
    Message(MessageEvent),
    Error(StreamErrorEvent),
    Close,
}

async fn drain(mut rx: mpsc::UnboundedReceiver<Received>) -> Vec<Received> {
    let mut received = Vec::new();
    loop {
        let next = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("Timed out waiting for stream events");
        match next {
            Some(Received::Close) | None => break,
            Some(event) => received.push(event),
        }
    }
    received
}

async fn open(server: &MockServer, route: &str) -> mpsc::UnboundedReceiver<Received> {
    let config = FetchConfig::with_defaults().expect("Failed to build config");
    let request = FetchRequest::get(format!("{}{}", server.uri(), route));
    let source = event_source_helper(&config, request, None, None)
        .await
        .expect("Failed to create event source");

    let (tx, rx) = mpsc::unbounded_channel();
    let messages = tx.clone();
    source.add_event_listener(EventListener::message(move |event| {
        let _ = messages.send(Received::Message(event.clone()));
    }));
    let errors = tx.clone();
    source.add_event_listener(EventListener::error(move |event| {
        let _ = errors.send(Received::Error(event.clone()));
    }));
    source.add_event_listener(EventListener::close(move || {
        let _ = tx.send(Received::Close);
    }));
    source.connect();

    // Keep the connection alive until the stream ends
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(10)).await;
        drop(source);
    });
    rx
}

#[tokio::test]
async fn test_stream_delivers_messages() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/events"))
        .and(header("accept", "text/event-stream"))
        .and(header("cache-control", "no-cache"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string("event: pet\nid: 1\ndata: {\"a\":1}\n\n: keep-alive\n\ndata: [1,\ndata: 2]\n\n"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let received = drain(open(&server, "/events").await).await;
    assert_eq!(received.len(), 2);

    let Received::Message(first) = &received[0] else {
        panic!("expected a message, got {:?}", received[0]);
    };
    assert_eq!(first.data, json!({"a": 1}));
    assert_eq!(first.event_type.as_deref(), Some("pet"));
    assert_eq!(first.last_event_id.as_deref(), Some("1"));
    assert_eq!(first.origin, format!("{}/events", server.uri()));

    let Received::Message(second) = &received[1] else {
        panic!("expected a message, got {:?}", received[1]);
    };
    assert_eq!(second.data, json!([1, 2]));
}

#[tokio::test]
async fn test_stream_error_status_reports_body() {
    let server = MockServer::start().await;
    Mock::given(path("/events"))
        .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
        .mount(&server)
        .await;

    let received = drain(open(&server, "/events").await).await;
    assert_eq!(received.len(), 1);
    let Received::Error(error) = &received[0] else {
        panic!("expected an error, got {:?}", received[0]);
    };
    assert_eq!(error.status, 403);
    assert_eq!(error.response, "forbidden");
}
