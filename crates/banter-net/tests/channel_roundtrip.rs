//! Exercises the event channel against a real in-process WebSocket server.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use banter_net::{spawn_channel, ChannelConfig, ChannelNotification, NetError};
use banter_shared::protocol::{ClientEvent, ServerEvent};
use banter_shared::types::{ConversationKey, UserId};

const WAIT: Duration = Duration::from_secs(5);

fn test_config(port: u16) -> ChannelConfig {
    ChannelConfig {
        ws_url: format!("ws://127.0.0.1:{port}/ws"),
        room: ConversationKey::community("lobby"),
        user_id: UserId("alice".into()),
    }
}

#[tokio::test]
async fn send_fails_fast_while_disconnected() {
    // Bind then drop, so the port is closed when the channel dials.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let (channel, _notif_rx) = spawn_channel(test_config(port));

    let connected = channel
        .await_connected(3, Duration::from_millis(50))
        .await;
    assert!(!connected);
    assert!(!channel.is_connected());

    let result = channel
        .send(ClientEvent::StopTyping {
            room: ConversationKey::community("lobby"),
            user_id: UserId("alice".into()),
        })
        .await;
    assert!(matches!(result, Err(NetError::TransportUnavailable)));
}

#[tokio::test]
async fn join_send_and_receive_roundtrip() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    // Minimal server: expect join-room, push one event, expect start-typing.
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        let frame = ws.next().await.unwrap().unwrap();
        let join = match frame {
            WsMessage::Text(txt) => ClientEvent::from_bytes(txt.as_bytes()).unwrap(),
            other => panic!("unexpected frame: {other:?}"),
        };
        assert!(matches!(join, ClientEvent::JoinRoom { .. }));

        let event = ServerEvent::Typing {
            user_id: UserId("bob".into()),
            username: "Bob".into(),
        };
        let txt = String::from_utf8(event.to_bytes().unwrap()).unwrap();
        ws.send(WsMessage::text(txt)).await.unwrap();

        let frame = ws.next().await.unwrap().unwrap();
        let typing = match frame {
            WsMessage::Text(txt) => ClientEvent::from_bytes(txt.as_bytes()).unwrap(),
            other => panic!("unexpected frame: {other:?}"),
        };
        assert!(matches!(typing, ClientEvent::StartTyping { .. }));
    });

    let (channel, mut notif_rx) = spawn_channel(test_config(port));

    let first = timeout(WAIT, notif_rx.recv()).await.unwrap().unwrap();
    assert!(matches!(first, ChannelNotification::LinkUp));
    assert!(channel.is_connected());

    let second = timeout(WAIT, notif_rx.recv()).await.unwrap().unwrap();
    match second {
        ChannelNotification::Event(ServerEvent::Typing { user_id, username }) => {
            assert_eq!(user_id, UserId("bob".into()));
            assert_eq!(username, "Bob");
        }
        other => panic!("unexpected notification: {other:?}"),
    }

    channel
        .send(ClientEvent::StartTyping {
            room: ConversationKey::community("lobby"),
            user_id: UserId("alice".into()),
            username: "Alice".into(),
        })
        .await
        .unwrap();

    timeout(WAIT, server).await.unwrap().unwrap();
}

#[tokio::test]
async fn malformed_server_event_does_not_kill_the_channel() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let _join = ws.next().await.unwrap().unwrap();

        ws.send(WsMessage::text("this is not an event")).await.unwrap();

        let event = ServerEvent::StopTyping {
            user_id: UserId("bob".into()),
        };
        let txt = String::from_utf8(event.to_bytes().unwrap()).unwrap();
        ws.send(WsMessage::text(txt)).await.unwrap();
    });

    let (_channel, mut notif_rx) = spawn_channel(test_config(port));

    let first = timeout(WAIT, notif_rx.recv()).await.unwrap().unwrap();
    assert!(matches!(first, ChannelNotification::LinkUp));

    // The garbage frame is swallowed; the next well-formed event arrives.
    let second = timeout(WAIT, notif_rx.recv()).await.unwrap().unwrap();
    assert!(matches!(
        second,
        ChannelNotification::Event(ServerEvent::StopTyping { .. })
    ));

    timeout(WAIT, server).await.unwrap().unwrap();
}
