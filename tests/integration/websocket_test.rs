//! The manager against a real WebSocket server on localhost

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use medichat::chat_client::connection::{ConnectionManager, ConnectionState, TungsteniteConnector};
use medichat::shared::config::ClientConfig;
use medichat::shared::messaging::IncomingMessage;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::common::{Recorder, LOCAL_USER, PEER, TOKEN};

struct ServerLog {
    uri: oneshot::Receiver<String>,
    received: oneshot::Receiver<String>,
    close: oneshot::Receiver<Option<(u16, String)>>,
}

async fn spawn_chat_server() -> (String, ServerLog) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let (uri_tx, uri) = oneshot::channel();
    let (received_tx, received) = oneshot::channel();
    let (close_tx, close) = oneshot::channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let capture_uri = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            let _ = uri_tx.send(request.uri().to_string());
            Ok(response)
        };
        let mut ws = tokio_tungstenite::accept_hdr_async(stream, capture_uri).await.unwrap();

        let first = ws.next().await.unwrap().unwrap();
        let _ = received_tx.send(first.to_text().unwrap().to_string());

        let reply = r#"{"id":"srv-9","text":"How can I help?","sender_id":"d1","receiver_id":"u1","timestamp":"2024-01-01T10:00:00Z"}"#;
        ws.send(WsMessage::Text(reply.into())).await.unwrap();

        let mut seen_close = None;
        while let Some(Ok(message)) = ws.next().await {
            if let WsMessage::Close(frame) = message {
                seen_close = frame.map(|f| (u16::from(f.code), f.reason.as_str().to_string()));
                break;
            }
        }
        let _ = close_tx.send(seen_close);
    });

    (address, ServerLog { uri, received, close })
}

async fn wait_until<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_round_trip_over_a_real_socket() {
    let (address, log) = spawn_chat_server().await;
    let config = ClientConfig::builder()
        .server_address(address)
        .auth_token(TOKEN)
        .local_user_id(LOCAL_USER)
        .peer_id(PEER)
        .build()
        .unwrap();
    let manager = ConnectionManager::new(config, Arc::new(TungsteniteConnector));
    let messages = Recorder::<IncomingMessage>::new();
    let _subscription = manager.on_message(messages.sink());

    manager.connect().await.unwrap();
    let mut states = manager.state_changes();
    tokio::time::timeout(
        Duration::from_secs(5),
        states.wait_for(|state| *state == ConnectionState::Connected),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(log.uri.await.unwrap(), "/chat/d1/u1?token=tok");

    assert!(manager.send("I have a headache", PEER));
    let sent: serde_json::Value = serde_json::from_str(&log.received.await.unwrap()).unwrap();
    assert_eq!(
        sent,
        serde_json::json!({"text": "I have a headache", "sender_id": "u1", "receiver_id": "d1"})
    );

    wait_until(|| !messages.values().is_empty()).await;
    let reply = messages.last().unwrap();
    assert_eq!(reply.id.as_deref(), Some("srv-9"));
    assert_eq!(reply.text, "How can I help?");
    assert_eq!(reply.sender_id, PEER);

    manager.disconnect().await;
    assert_eq!(
        log.close.await.unwrap(),
        Some((1000, "client disconnect".to_string()))
    );
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    manager.dispose().await;
}
