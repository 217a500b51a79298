//! Integration tests for the `/ws` event stream.

mod common;

use std::time::Duration;

use common::{spawn_server, ScriptedProvider};
use futures::{SinkExt, StreamExt};
use medsim_session::{OperationKind, SessionEvent, SessionMode};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tungstenite::Message;

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn connect_client(url: &str) -> WsClient {
    let (ws_stream, _) = connect_async(url)
        .await
        .expect("Failed to connect to WebSocket");
    ws_stream
}

/// Receives the next event, answering pings along the way.
async fn receive_event(client: &mut WsClient) -> SessionEvent {
    loop {
        let msg = timeout(Duration::from_secs(5), client.next())
            .await
            .expect("Timeout waiting for message")
            .expect("Stream ended")
            .expect("WebSocket error");

        match msg {
            Message::Text(text) => {
                return serde_json::from_str(&text).expect("Failed to parse event");
            }
            Message::Ping(data) => {
                client
                    .send(Message::Pong(data))
                    .await
                    .expect("Failed to send pong");
            }
            _ => {}
        }
    }
}

async fn post(url: String, body: serde_json::Value) {
    reqwest::Client::new()
        .post(url)
        .json(&body)
        .send()
        .await
        .expect("Request failed");
}

#[tokio::test]
async fn test_connected_event_carries_snapshot() {
    let server = spawn_server(ScriptedProvider::new()).await;
    let mut client = connect_client(&server.ws_url).await;

    let event = receive_event(&mut client).await;
    assert_eq!(event.event_name(), "connected");
    if let SessionEvent::Connected(payload) = event {
        assert_eq!(payload.snapshot.mode, SessionMode::Menu);
        assert!(!payload.snapshot.loading);
    }
}

#[tokio::test]
async fn test_case_lifecycle_events_in_order() {
    let server = spawn_server(ScriptedProvider::new()).await;
    let mut client = connect_client(&server.ws_url).await;
    let _ = receive_event(&mut client).await;

    let base = &server.base_url;
    post(format!("{base}/case/start"), json!({"scenario": "UBS"})).await;

    let first = receive_event(&mut client).await;
    assert!(matches!(
        &first,
        SessionEvent::LoadingStarted(p) if p.operation == OperationKind::GenerateCase
    ));
    let second = receive_event(&mut client).await;
    assert!(matches!(
        &second,
        SessionEvent::StateChanged(p) if p.snapshot.mode == SessionMode::InCase && !p.snapshot.loading
    ));

    post(
        format!("{base}/case/finish"),
        json!({"hypotheses": "Pneumonia", "conduct": "Antibiótico"}),
    )
    .await;

    let names: Vec<&str> = vec![
        receive_event(&mut client).await.event_name(),
        receive_event(&mut client).await.event_name(),
        receive_event(&mut client).await.event_name(),
    ];
    assert_eq!(names, ["loading_started", "case_completed", "state_changed"]);
}

#[tokio::test]
async fn test_failure_emits_error_event() {
    let server = spawn_server(ScriptedProvider::new().failing_feedback(1)).await;
    let mut client = connect_client(&server.ws_url).await;
    let _ = receive_event(&mut client).await;

    let base = &server.base_url;
    post(format!("{base}/case/start"), json!({"scenario": "UPA"})).await;
    let _ = receive_event(&mut client).await;
    let _ = receive_event(&mut client).await;

    post(format!("{base}/case/finish"), json!({"hypotheses": "x", "conduct": "y"})).await;

    assert_eq!(receive_event(&mut client).await.event_name(), "loading_started");
    let error = receive_event(&mut client).await;
    assert!(matches!(&error, SessionEvent::Error(_)));
    if let SessionEvent::Error(payload) = error {
        assert_eq!(payload.operation, OperationKind::Feedback);
        assert!(payload.message.starts_with("Falha ao gerar o feedback"));
    }
    let changed = receive_event(&mut client).await;
    assert!(matches!(
        &changed,
        SessionEvent::StateChanged(p) if p.snapshot.mode == SessionMode::InCase
    ));
}

#[tokio::test]
async fn test_multiple_clients_receive_the_same_events() {
    let server = spawn_server(ScriptedProvider::new()).await;
    let mut first = connect_client(&server.ws_url).await;
    let mut second = connect_client(&server.ws_url).await;
    let _ = receive_event(&mut first).await;
    let _ = receive_event(&mut second).await;

    post(format!("{}/history/show", server.base_url), json!({})).await;

    for client in [&mut first, &mut second] {
        let event = receive_event(client).await;
        assert!(matches!(
            &event,
            SessionEvent::StateChanged(p) if p.snapshot.show_history
        ));
    }
}
