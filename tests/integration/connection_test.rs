//! Connection manager behaviour against a scripted socket

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use medichat::chat_client::connection::{
    ConnectionManager, ConnectionOptions, ConnectionState, NoticeLevel, SocketCommand,
    ABNORMAL_CLOSURE, NORMAL_CLOSURE,
};
use medichat::chat_client::sync::{FallbackMode, NetworkMonitor};
use medichat::shared::error::ChatError;
use medichat::shared::messaging::IncomingMessage;
use pretty_assertions::assert_eq;

use crate::common::{test_config, Behavior, Recorder, ScriptedConnector, LOCAL_USER, PEER, TOKEN};

fn manager_with(connector: &ScriptedConnector) -> ConnectionManager {
    ConnectionManager::new(test_config(), Arc::new(connector.clone()))
}

#[tokio::test]
async fn test_connect_opens_socket_at_chat_endpoint() {
    let connector = ScriptedConnector::new(Behavior::Manual);
    let manager = manager_with(&connector);

    manager.connect().await.unwrap();
    assert_eq!(manager.state(), ConnectionState::Connecting);
    assert_eq!(
        connector.last().url,
        format!("ws://chat.test:8000/chat/{}/{}?token={}", PEER, LOCAL_USER, TOKEN)
    );

    let connection = Recorder::<bool>::new();
    let _subscription = manager.on_connection_change(connection.sink());
    connector.last().open();
    manager.settle().await;

    assert_eq!(manager.state(), ConnectionState::Connected);
    assert_eq!(connection.values(), vec![true]);
}

#[tokio::test]
async fn test_connect_without_peer_uses_general_channel() {
    let connector = ScriptedConnector::new(Behavior::Manual);
    let mut config = test_config();
    config.peer_id = None;
    let manager = ConnectionManager::new(config, Arc::new(connector.clone()));

    manager.connect().await.unwrap();
    assert!(connector.last().url.contains("/chat/general/u1?"));
}

#[tokio::test]
async fn test_connect_requires_token_and_user() {
    let connector = ScriptedConnector::new(Behavior::Manual);
    let mut config = test_config();
    config.auth_token = None;
    let manager = ConnectionManager::new(config, Arc::new(connector.clone()));

    assert_matches!(manager.connect().await, Err(ChatError::Configuration { .. }));
    assert_eq!(manager.state(), ConnectionState::Error);
    assert_eq!(connector.opened(), 0);

    manager.reconfigure(test_config()).await;
    assert_eq!(manager.state(), ConnectionState::Idle);
    manager.connect().await.unwrap();
    assert_eq!(connector.opened(), 1);
}

#[tokio::test]
async fn test_second_connect_closes_first_socket() {
    let connector = ScriptedConnector::new(Behavior::Manual);
    let manager = manager_with(&connector);

    manager.connect().await.unwrap();
    connector.socket(0).open();
    manager.settle().await;
    manager.connect().await.unwrap();
    manager.settle().await;

    assert_eq!(connector.opened(), 2);
    let first = connector.socket(0);
    assert_eq!(
        first.drain_commands(),
        vec![SocketCommand::Close {
            code: NORMAL_CLOSURE,
            reason: "reconnecting".to_string()
        }]
    );
    assert!(first.is_released());

    connector.socket(1).open();
    manager.settle().await;
    assert_eq!(manager.state(), ConnectionState::Connected);

    // Late events from the replaced socket change nothing.
    first.close(ABNORMAL_CLOSURE);
    manager.settle().await;
    assert_eq!(manager.state(), ConnectionState::Connected);
    assert_eq!(connector.opened(), 2);
}

#[tokio::test]
async fn test_send_before_connect_returns_false_and_keeps_state() {
    let connector = ScriptedConnector::new(Behavior::Manual);
    let manager = manager_with(&connector);

    assert!(!manager.send("hello", PEER));
    manager.settle().await;

    assert_eq!(manager.state(), ConnectionState::Idle);
    assert_eq!(connector.opened(), 0);
}

#[tokio::test]
async fn test_send_writes_wire_frame() {
    let connector = ScriptedConnector::new(Behavior::AutoOpen);
    let manager = manager_with(&connector);
    manager.connect().await.unwrap();
    manager.settle().await;

    assert!(manager.send("hello", PEER));
    assert_eq!(
        connector.last().sent_frames(),
        vec![serde_json::json!({"text": "hello", "sender_id": "u1", "receiver_id": "d1"})]
    );
}

#[tokio::test]
async fn test_send_while_connecting_fails_without_reconnect() {
    let connector = ScriptedConnector::new(Behavior::Manual);
    let manager = manager_with(&connector);
    manager.connect().await.unwrap();

    assert!(!manager.send("hello", PEER));
    manager.settle().await;
    assert_eq!(manager.state(), ConnectionState::Connecting);
    assert_eq!(connector.opened(), 1);
}

#[tokio::test]
async fn test_inbound_frames_reach_listeners_and_bad_frames_are_dropped() {
    let connector = ScriptedConnector::new(Behavior::AutoOpen);
    let manager = manager_with(&connector);
    let messages = Recorder::<IncomingMessage>::new();
    let _subscription = manager.on_message(messages.sink());

    manager.connect().await.unwrap();
    let socket = connector.last();
    socket.frame(r#"{"foo":"bar"}"#);
    socket.frame(r#"{"type":"ping"}"#);
    socket.frame(r#"{"error":"slow down"}"#);
    socket.frame("not json at all");
    socket.frame(r#"{"id":"m9","text":"hi","sender_id":"d1","receiver_id":"u1"}"#);
    manager.settle().await;

    let received = messages.values();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].id.as_deref(), Some("m9"));
    assert_eq!(manager.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_transport_error_notifies_without_reconnecting() {
    let connector = ScriptedConnector::new(Behavior::AutoOpen);
    let manager = manager_with(&connector);
    let connection = Recorder::<bool>::new();
    let _subscription = manager.on_connection_change(connection.sink());

    manager.connect().await.unwrap();
    connector.last().error("reset by peer");
    manager.settle().await;

    assert_eq!(connection.values(), vec![true, false]);
    assert_eq!(connector.opened(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_abnormal_close_backs_off_1_2_4_8_16_then_stops() {
    let connector = ScriptedConnector::new(Behavior::Refuse);
    let manager = manager_with(&connector);
    let notices = Recorder::new();
    let _subscription = manager.on_notice(notices.sink());

    manager.connect().await.unwrap();
    manager.settle().await;
    assert_eq!(connector.opened(), 1);
    assert_eq!(manager.state(), ConnectionState::Disconnected);

    for (attempt, delay_ms) in [1000u64, 2000, 4000, 8000, 16000].into_iter().enumerate() {
        tokio::time::advance(Duration::from_millis(delay_ms - 1)).await;
        manager.settle().await;
        assert_eq!(connector.opened(), attempt + 1, "fired early before attempt {}", attempt + 1);

        tokio::time::advance(Duration::from_millis(1)).await;
        manager.settle().await;
        assert_eq!(connector.opened(), attempt + 2, "attempt {} did not fire", attempt + 1);
    }

    tokio::time::advance(Duration::from_secs(120)).await;
    manager.settle().await;
    assert_eq!(connector.opened(), 6);
    assert_eq!(manager.state(), ConnectionState::Disconnected);

    let last = notices.last().unwrap();
    assert_eq!(last.level, NoticeLevel::Error);
}

#[tokio::test(start_paused = true)]
async fn test_manual_retry_after_cap_starts_over() {
    let connector = ScriptedConnector::new(Behavior::Refuse);
    let manager = manager_with(&connector);

    manager.connect().await.unwrap();
    tokio::time::advance(Duration::from_secs(120)).await;
    for _ in 0..10 {
        tokio::time::advance(Duration::from_secs(30)).await;
        manager.settle().await;
    }
    assert_eq!(connector.opened(), 6);

    manager.retry().await.unwrap();
    manager.settle().await;
    assert_eq!(connector.opened(), 7);

    tokio::time::advance(Duration::from_millis(1000)).await;
    manager.settle().await;
    assert_eq!(connector.opened(), 8);
}

#[tokio::test(start_paused = true)]
async fn test_successful_open_resets_attempts() {
    let connector = ScriptedConnector::new(Behavior::AutoOpen);
    let manager = manager_with(&connector);

    manager.connect().await.unwrap();
    manager.settle().await;

    for round in 0..3 {
        connector.last().close(ABNORMAL_CLOSURE);
        manager.settle().await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        tokio::time::advance(Duration::from_millis(1000)).await;
        manager.settle().await;
        assert_eq!(connector.opened(), round + 2);
        assert_eq!(manager.state(), ConnectionState::Connected);
    }
}

#[tokio::test(start_paused = true)]
async fn test_normal_close_does_not_reconnect() {
    let connector = ScriptedConnector::new(Behavior::AutoOpen);
    let manager = manager_with(&connector);

    manager.connect().await.unwrap();
    connector.last().close(NORMAL_CLOSURE);
    manager.settle().await;

    tokio::time::advance(Duration::from_secs(60)).await;
    manager.settle().await;
    assert_eq!(connector.opened(), 1);
    assert_eq!(manager.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_failed_send_after_drop_schedules_reconnect() {
    let connector = ScriptedConnector::new(Behavior::AutoOpen);
    let manager = manager_with(&connector);
    let notices = Recorder::new();
    let _subscription = manager.on_notice(notices.sink());

    manager.connect().await.unwrap();
    connector.last().close(NORMAL_CLOSURE);
    manager.settle().await;

    assert!(!manager.send("hello", PEER));
    manager.settle().await;
    assert_eq!(notices.last().unwrap().level, NoticeLevel::Warning);

    tokio::time::advance(Duration::from_millis(1000)).await;
    manager.settle().await;
    assert_eq!(connector.opened(), 2);
    assert_eq!(manager.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_cancels_pending_reconnect_and_keeps_listeners() {
    let connector = ScriptedConnector::new(Behavior::AutoOpen);
    let manager = manager_with(&connector);
    let connection = Recorder::<bool>::new();
    let _subscription = manager.on_connection_change(connection.sink());

    manager.connect().await.unwrap();
    connector.last().close(ABNORMAL_CLOSURE);
    manager.settle().await;
    manager.disconnect().await;

    tokio::time::advance(Duration::from_secs(60)).await;
    manager.settle().await;
    assert_eq!(connector.opened(), 1);
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert_eq!(manager.channel().connection_listeners(), 1);
}

#[tokio::test]
async fn test_disconnect_closes_with_normal_code() {
    let connector = ScriptedConnector::new(Behavior::AutoOpen);
    let manager = manager_with(&connector);
    let connection = Recorder::<bool>::new();
    let _subscription = manager.on_connection_change(connection.sink());

    manager.connect().await.unwrap();
    manager.settle().await;
    manager.disconnect().await;

    assert_eq!(
        connector.last().drain_commands(),
        vec![SocketCommand::Close {
            code: NORMAL_CLOSURE,
            reason: "client disconnect".to_string()
        }]
    );
    assert_eq!(connection.values(), vec![true, false]);
}

#[tokio::test(start_paused = true)]
async fn test_offline_notifies_then_online_reconnects_immediately() {
    let connector = ScriptedConnector::new(Behavior::AutoOpen);
    let network = NetworkMonitor::default();
    let manager = ConnectionManager::with_options(
        test_config(),
        Arc::new(connector.clone()),
        ConnectionOptions {
            network: Some(network.clone()),
            ..ConnectionOptions::default()
        },
    );
    let connection = Recorder::<bool>::new();
    let _subscription = manager.on_connection_change(connection.sink());

    manager.connect().await.unwrap();
    manager.settle().await;

    network.go_offline();
    manager.settle().await;
    assert_eq!(connection.values(), vec![true, false]);
    assert_eq!(manager.state(), ConnectionState::Connected);

    connector.last().close(ABNORMAL_CLOSURE);
    manager.settle().await;
    assert_eq!(manager.state(), ConnectionState::Disconnected);

    network.go_online();
    manager.settle().await;
    assert_eq!(connector.opened(), 2);
    assert_eq!(manager.state(), ConnectionState::Connected);

    // The backoff timer was cancelled by the online signal.
    tokio::time::advance(Duration::from_secs(5)).await;
    manager.settle().await;
    assert_eq!(connector.opened(), 2);
}

#[tokio::test]
async fn test_online_while_connected_does_nothing() {
    let connector = ScriptedConnector::new(Behavior::AutoOpen);
    let network = NetworkMonitor::default();
    let manager = ConnectionManager::with_options(
        test_config(),
        Arc::new(connector.clone()),
        ConnectionOptions {
            network: Some(network.clone()),
            ..ConnectionOptions::default()
        },
    );

    manager.connect().await.unwrap();
    network.go_offline();
    manager.settle().await;
    network.go_online();
    manager.settle().await;

    assert_eq!(connector.opened(), 1);
}

#[tokio::test]
async fn test_dispose_releases_network_subscription() {
    let connector = ScriptedConnector::new(Behavior::AutoOpen);
    let network = NetworkMonitor::default();
    let manager = ConnectionManager::with_options(
        test_config(),
        Arc::new(connector.clone()),
        ConnectionOptions {
            network: Some(network.clone()),
            ..ConnectionOptions::default()
        },
    );
    assert_eq!(network.subscriber_count(), 1);

    manager.connect().await.unwrap();
    manager.dispose().await;

    assert_eq!(network.subscriber_count(), 0);
    assert!(connector.last().is_released());
}

#[tokio::test]
async fn test_fallback_switches_between_simulated_and_real_socket() {
    let connector = ScriptedConnector::new(Behavior::Manual);
    let fallback = FallbackMode::default();
    let manager = ConnectionManager::with_options(
        test_config(),
        Arc::new(connector.clone()),
        ConnectionOptions {
            fallback: fallback.clone(),
            ..ConnectionOptions::default()
        },
    );
    let messages = Recorder::<IncomingMessage>::new();
    let _subscription = manager.on_message(messages.sink());

    manager.connect().await.unwrap();
    assert_eq!(manager.state(), ConnectionState::Connecting);

    fallback.set(true);
    manager.settle().await;
    assert_eq!(manager.state(), ConnectionState::Connected);
    assert!(manager.send("hello", PEER));
    assert_eq!(messages.values()[0].sender_id, LOCAL_USER);
    assert!(connector.socket(0).is_released());

    fallback.set(false);
    manager.settle().await;
    assert_eq!(connector.opened(), 2);
    assert_eq!(manager.state(), ConnectionState::Connecting);

    connector.last().open();
    manager.settle().await;
    assert_eq!(manager.state(), ConnectionState::Connected);
}
