//! Loopback tests for the live delivery channel.
//!
//! Each test runs a minimal WebSocket server on an ephemeral port and
//! drives the client against it.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use huddle_client::{ChannelConfig, ChannelState, ClientFrame, LiveChannel, ServerEvent};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, format!("ws://{addr}/streaming"))
}

async fn accept_ws(listener: &TcpListener) -> (WebSocketStream<TcpStream>, String) {
    let (stream, _) = listener.accept().await.unwrap();
    let mut request_uri = String::new();
    let ws = tokio_tungstenite::accept_hdr_async(stream, |req: &tokio_tungstenite::tungstenite::handshake::server::Request, resp| {
        request_uri = req.uri().to_string();
        Ok(resp)
    })
    .await
    .unwrap();
    (ws, request_uri)
}

fn fast_config(url: &str) -> ChannelConfig {
    let mut config = ChannelConfig::new(url, "user1");
    config.reconnect_delay = Duration::from_millis(50);
    config.max_reconnect_attempts = 3;
    config
}

#[tokio::test]
async fn test_receives_pushed_events() {
    let (listener, url) = bind().await;
    let (channel, mut events) = LiveChannel::connect(fast_config(&url));

    let (mut ws, uri) = accept_ws(&listener).await;
    assert!(uri.ends_with("?i=user1"), "token missing from {uri}");

    let mut states = channel.state_changes();
    states.wait_for(|s| *s == ChannelState::Open).await.unwrap();

    let frame = r#"{
        "type": "message.created",
        "body": {
            "conversationId": "conv1",
            "message": {
                "id": "msg1",
                "conversationId": "conv1",
                "senderId": "user2",
                "content": "hello",
                "attachmentUrl": null,
                "attachmentType": null,
                "isEdited": false,
                "isDeleted": false,
                "createdAt": "2025-06-01T12:00:00+00:00"
            }
        }
    }"#;
    ws.send(Message::Text(frame.into())).await.unwrap();

    let event = timeout(Duration::from_secs(2), events.recv())
        .await
        .unwrap()
        .unwrap();
    match event {
        ServerEvent::MessageCreated {
            conversation_id,
            message,
        } => {
            assert_eq!(conversation_id, "conv1");
            assert_eq!(message.content, "hello");
        }
        other => panic!("unexpected event: {other:?}"),
    }

    channel.close();
    states
        .wait_for(|s| *s == ChannelState::Closed)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_outbound_frames_reach_server() {
    let (listener, url) = bind().await;
    let (channel, _events) = LiveChannel::connect(fast_config(&url));

    let (mut ws, _) = accept_ws(&listener).await;
    let mut states = channel.state_changes();
    states.wait_for(|s| *s == ChannelState::Open).await.unwrap();

    assert!(channel.send(ClientFrame::Ping));

    let received = timeout(Duration::from_secs(2), ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    match received {
        Message::Text(text) => assert_eq!(text.as_str(), r#"{"type":"ping"}"#),
        other => panic!("unexpected frame: {other:?}"),
    }
}

#[tokio::test]
async fn test_reconnects_after_unexpected_disconnect() {
    let (listener, url) = bind().await;
    let (channel, mut events) = LiveChannel::connect(fast_config(&url));

    // First session: handshake, then drop the connection.
    let (ws, _) = accept_ws(&listener).await;
    let mut states = channel.state_changes();
    states.wait_for(|s| *s == ChannelState::Open).await.unwrap();
    drop(ws);

    // Second session proves the channel redialed on its own.
    let (mut ws, _) = timeout(Duration::from_secs(2), accept_ws(&listener))
        .await
        .unwrap();
    states.wait_for(|s| *s == ChannelState::Open).await.unwrap();

    let frame = r#"{
        "type": "read.updated",
        "body": {
            "conversationId": "conv1",
            "userId": "user2",
            "throughMessageId": "msg9"
        }
    }"#;
    ws.send(Message::Text(frame.into())).await.unwrap();

    let event = timeout(Duration::from_secs(2), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        event,
        ServerEvent::ReadUpdated {
            conversation_id: "conv1".to_string(),
            user_id: "user2".to_string(),
            through_message_id: "msg9".to_string(),
        }
    );
}

#[tokio::test]
async fn test_attempt_counter_resets_after_each_open() {
    let (listener, url) = bind().await;
    let mut config = ChannelConfig::new(&url, "user1");
    config.reconnect_delay = Duration::from_millis(50);
    config.max_reconnect_attempts = 1;
    let (channel, _events) = LiveChannel::connect(config);
    let mut states = channel.state_changes();

    // Two drops in a row, each followed by a successful redial. With the
    // budget at a single attempt, the second redial can only happen if
    // reaching Open reset the counter.
    for _ in 0..2 {
        let (ws, _) = timeout(Duration::from_secs(2), accept_ws(&listener))
            .await
            .unwrap();
        states.wait_for(|s| *s == ChannelState::Open).await.unwrap();
        drop(ws);
    }

    let (_ws, _) = timeout(Duration::from_secs(2), accept_ws(&listener))
        .await
        .unwrap();
    states.wait_for(|s| *s == ChannelState::Open).await.unwrap();

    channel.close();
    states
        .wait_for(|s| *s == ChannelState::Closed)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_explicit_close_suppresses_reconnect() {
    let (listener, url) = bind().await;
    let (channel, _events) = LiveChannel::connect(fast_config(&url));

    let (_ws, _) = accept_ws(&listener).await;
    let mut states = channel.state_changes();
    states.wait_for(|s| *s == ChannelState::Open).await.unwrap();

    channel.close();
    states
        .wait_for(|s| *s == ChannelState::Closed)
        .await
        .unwrap();

    // No redial should happen after an explicit close.
    let redial = timeout(Duration::from_millis(300), listener.accept()).await;
    assert!(redial.is_err(), "channel reconnected after explicit close");

    assert!(!channel.send(ClientFrame::Ping));
}
