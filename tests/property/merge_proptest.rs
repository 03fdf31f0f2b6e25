//! Property-based tests for conversation merging, frame parsing and
//! reconnect backoff

use std::collections::HashSet;

use chrono::{DateTime, TimeZone, Utc};
use medichat::chat_client::offline::retry::DEFAULT_MAX_DELAY;
use medichat::chat_client::offline::{merge_messages, BackoffStrategy, ConversationStore};
use medichat::shared::messaging::{parse_frame, IncomingMessage, Message, MessageStatus};
use proptest::prelude::*;

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

fn message_strategy() -> impl Strategy<Value = Message> {
    (0u8..20, 0i64..1_000, any::<bool>()).prop_map(|(id, secs, inbound)| {
        let (sender, receiver) = if inbound { ("d1", "u1") } else { ("u1", "d1") };
        Message::new(format!("m{}", id), sender, receiver, "text", at(secs), MessageStatus::Sent)
    })
}

fn assert_ordered_and_unique(messages: &[Message]) -> Result<(), TestCaseError> {
    let ids: HashSet<&str> = messages.iter().map(|m| m.id.as_str()).collect();
    prop_assert_eq!(ids.len(), messages.len());
    prop_assert!(messages.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    Ok(())
}

proptest! {
    #[test]
    fn test_merged_view_is_ordered_and_unique(
        mut history in prop::collection::vec(message_strategy(), 0..30),
        live in prop::collection::vec(message_strategy(), 0..30),
    ) {
        history.sort_by_key(|m| m.timestamp);
        let merged = merge_messages(&history, &live);

        assert_ordered_and_unique(&merged)?;
        let expected: HashSet<&str> = history.iter().chain(live.iter()).map(|m| m.id.as_str()).collect();
        let actual: HashSet<&str> = merged.iter().map(|m| m.id.as_str()).collect();
        prop_assert_eq!(expected, actual);
    }

    #[test]
    fn test_store_view_is_ordered_and_unique(
        deliveries in prop::collection::vec(
            (prop::option::of(0u8..10), 0i64..1_000, any::<bool>()),
            0..40,
        ),
    ) {
        let store = ConversationStore::new("u1");
        for (id, secs, inbound) in deliveries {
            let (sender, receiver) = if inbound { ("d1", "u1") } else { ("u1", "d1") };
            store.apply_incoming(
                IncomingMessage {
                    id: id.map(|n| format!("m{}", n)),
                    text: "text".to_string(),
                    sender_id: sender.to_string(),
                    receiver_id: Some(receiver.to_string()),
                    timestamp: Some(at(secs)),
                    read: false,
                },
                at(2_000),
            );
        }

        assert_ordered_and_unique(&store.conversation("d1"))?;
    }

    #[test]
    fn test_parse_frame_never_panics(raw in ".*") {
        let _ = parse_frame(&raw);
    }

    #[test]
    fn test_parse_frame_rejects_messages_without_text(sender in "[a-z0-9]{1,8}") {
        let raw = serde_json::json!({"sender_id": sender}).to_string();
        prop_assert!(parse_frame(&raw).is_err());
    }

    #[test]
    fn test_backoff_delay_is_monotonic_and_capped(attempt in 0u32..64) {
        let strategy = BackoffStrategy::Exponential {
            base: std::time::Duration::from_millis(1000),
            max: DEFAULT_MAX_DELAY,
        };
        let delay = strategy.delay(attempt);
        prop_assert!(delay <= DEFAULT_MAX_DELAY);
        prop_assert!(delay <= strategy.delay(attempt + 1));
    }
}
