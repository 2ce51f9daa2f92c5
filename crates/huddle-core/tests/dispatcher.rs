mod common;

use common::{dispatcher, drain, seeded_store, FUN_FRIDAY};
use huddle_core::error::CoreError;
use huddle_core::outbound::channel;
use huddle_models::gateway::{SendMessage, ServerEvent};
use huddle_models::message::MessageType;
use huddle_models::user::UserIdentity;

fn alice() -> UserIdentity {
    UserIdentity::new(1, "alice", None)
}

fn send(room_id: i64, content: &str) -> SendMessage {
    SendMessage {
        room_id,
        content: content.to_string(),
        message_type: MessageType::Text,
        reply_to_id: None,
        nonce: None,
    }
}

#[tokio::test]
async fn member_message_is_persisted_then_broadcast_to_all_subscribers() {
    let store = seeded_store();
    let dispatcher = dispatcher(store.clone(), true);
    let (a, mut rx_a) = channel(8);
    let (b, mut rx_b) = channel(8);
    dispatcher.hub().join(FUN_FRIDAY, a.clone(), 1);
    dispatcher.hub().join(FUN_FRIDAY, b, 2);

    let delivered = dispatcher
        .send_message(&alice(), Some(a.id()), send(FUN_FRIDAY, "  hi  "))
        .await
        .unwrap();
    assert_eq!(delivered.message.content, "hi");
    assert_eq!(store.message_count(FUN_FRIDAY), 1);

    let seen_by_a = drain(&mut rx_a);
    let seen_by_b = drain(&mut rx_b);
    assert_eq!(seen_by_a.len(), 1);
    assert_eq!(seen_by_a, seen_by_b);
    match &seen_by_b[0] {
        ServerEvent::NewMessage(m) => {
            assert_eq!(m.message.id, delivered.message.id);
            assert_eq!(m.message.content, "hi");
            assert_eq!(m.sender.username, "alice");
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn message_is_written_before_any_subscriber_sees_it() {
    let store = seeded_store();
    let dispatcher = dispatcher(store.clone(), true);
    let (a, _rx_a) = channel(8);
    let (b, mut rx_b) = channel(8);
    dispatcher.hub().join(FUN_FRIDAY, a.clone(), 1);
    dispatcher.hub().join(FUN_FRIDAY, b.clone(), 2);
    store.watch_queue(b);

    for content in ["one", "two"] {
        dispatcher
            .send_message(&alice(), Some(a.id()), send(FUN_FRIDAY, content))
            .await
            .unwrap();
        assert_eq!(drain(&mut rx_b).len(), 1);
    }
    assert_eq!(store.queued_at_write(), vec![0, 0]);

    store.fail_writes(true);
    let err = dispatcher
        .send_message(&alice(), Some(a.id()), send(FUN_FRIDAY, "lost"))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::StoreUnavailable(_)));
    assert!(drain(&mut rx_b).is_empty());
}

#[tokio::test]
async fn non_member_send_is_forbidden_and_not_broadcast() {
    let store = seeded_store();
    let dispatcher = dispatcher(store.clone(), true);
    let (b, mut rx_b) = channel(8);
    dispatcher.hub().join(FUN_FRIDAY, b, 2);

    let carol = UserIdentity::new(3, "carol", None);
    let err = dispatcher
        .send_message(&carol, None, send(FUN_FRIDAY, "let me in"))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Forbidden));
    assert_eq!(store.message_count(FUN_FRIDAY), 0);
    assert!(drain(&mut rx_b).is_empty());
}

#[tokio::test]
async fn revoked_membership_is_caught_at_send_time() {
    let store = seeded_store();
    let dispatcher = dispatcher(store.clone(), true);
    dispatcher.authorize_join(1, FUN_FRIDAY).await.unwrap();

    store.remove_member(FUN_FRIDAY, 1);
    let err = dispatcher
        .send_message(&alice(), None, send(FUN_FRIDAY, "still here?"))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Forbidden));
}

#[tokio::test]
async fn blank_and_oversized_content_is_rejected_before_the_store() {
    let store = seeded_store();
    let dispatcher = dispatcher(store.clone(), true);

    let blank = dispatcher
        .send_message(&alice(), None, send(FUN_FRIDAY, " \n\t "))
        .await;
    assert!(matches!(blank, Err(CoreError::EmptyMessage)));

    let huge = "x".repeat(huddle_util::validation::MAX_MESSAGE_CHARS + 1);
    let oversized = dispatcher
        .send_message(&alice(), None, send(FUN_FRIDAY, &huge))
        .await;
    assert!(matches!(oversized, Err(CoreError::Validation(_))));
    assert_eq!(store.message_count(FUN_FRIDAY), 0);
}

#[tokio::test]
async fn store_failure_produces_no_broadcast() {
    let store = seeded_store();
    let dispatcher = dispatcher(store.clone(), true);
    let (b, mut rx_b) = channel(8);
    dispatcher.hub().join(FUN_FRIDAY, b, 2);

    store.fail_writes(true);
    let err = dispatcher
        .send_message(&alice(), None, send(FUN_FRIDAY, "lost?"))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::StoreUnavailable(_)));
    assert!(drain(&mut rx_b).is_empty());

    store.fail_writes(false);
    dispatcher
        .send_message(&alice(), None, send(FUN_FRIDAY, "retry"))
        .await
        .unwrap();
    assert_eq!(drain(&mut rx_b).len(), 1);
}

#[tokio::test]
async fn membership_lookup_failure_is_store_unavailable() {
    let store = seeded_store();
    let dispatcher = dispatcher(store.clone(), true);
    store.fail_reads(true);
    let err = dispatcher
        .send_message(&alice(), None, send(FUN_FRIDAY, "hello"))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::StoreUnavailable(_)));
    assert_eq!(store.message_count(FUN_FRIDAY), 0);
}

#[tokio::test]
async fn echo_can_be_disabled_for_the_sending_connection() {
    let store = seeded_store();
    let dispatcher = dispatcher(store, false);
    let (a, mut rx_a) = channel(8);
    let (a_other_tab, mut rx_a2) = channel(8);
    dispatcher.hub().join(FUN_FRIDAY, a.clone(), 1);
    dispatcher.hub().join(FUN_FRIDAY, a_other_tab, 1);

    dispatcher
        .send_message(&alice(), Some(a.id()), send(FUN_FRIDAY, "hi"))
        .await
        .unwrap();
    assert!(drain(&mut rx_a).is_empty());
    assert_eq!(drain(&mut rx_a2).len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn each_senders_messages_arrive_in_submission_order() {
    let store = seeded_store();
    let dispatcher = dispatcher(store.clone(), true);
    let (watcher, mut rx) = channel(256);
    dispatcher.hub().join(FUN_FRIDAY, watcher, 2);

    let senders: Vec<_> = [(1, "alice"), (2, "bob")]
        .into_iter()
        .map(|(id, name)| {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                let user = UserIdentity::new(id, name, None);
                for i in 0..25 {
                    dispatcher
                        .send_message(&user, None, send(FUN_FRIDAY, &format!("{name}-{i}")))
                        .await
                        .unwrap();
                }
            })
        })
        .collect();
    for sender in senders {
        sender.await.unwrap();
    }

    let events = drain(&mut rx);
    assert_eq!(events.len(), 50);
    for name in ["alice", "bob"] {
        let sequence: Vec<usize> = events
            .iter()
            .filter_map(|e| match e {
                ServerEvent::NewMessage(m) => m.message.content.strip_prefix(&format!("{name}-"))?.parse().ok(),
                _ => None,
            })
            .collect();
        assert_eq!(sequence, (0..25).collect::<Vec<_>>());
    }
}

#[tokio::test]
async fn history_is_members_only_and_chronological() {
    let store = seeded_store();
    let dispatcher = dispatcher(store, true);
    for content in ["first", "second", "third"] {
        dispatcher
            .send_message(&alice(), None, send(FUN_FRIDAY, content))
            .await
            .unwrap();
    }

    let page = dispatcher.room_history(2, FUN_FRIDAY, 2, 0).await.unwrap();
    let contents: Vec<&str> = page.iter().map(|m| m.message.content.as_str()).collect();
    assert_eq!(contents, vec!["second", "third"]);

    let older = dispatcher.room_history(2, FUN_FRIDAY, 2, 2).await.unwrap();
    assert_eq!(older[0].message.content, "first");

    assert!(matches!(
        dispatcher.room_history(3, FUN_FRIDAY, 50, 0).await,
        Err(CoreError::Forbidden)
    ));
    let members = dispatcher.room_members(1, FUN_FRIDAY).await.unwrap();
    assert_eq!(members.len(), 2);
}
