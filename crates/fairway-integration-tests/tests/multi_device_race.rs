//! Integration test: one user, several devices, racing mutations.
//!
//! Exercises:
//! 1. Accepting on one device while another is offline (stale response)
//! 2. Mark-as-read and delete propagating between devices by push
//! 3. Duplicate deliveries and deletes for unknown ids
//! 4. Disposal while events keep arriving

use fairway_integration_tests::{settle, wait_for, Harness};
use fairway_notify::{EngineError, NotificationStore};
use fairway_realtime::RowChange;
use fairway_types::events::Operation;
use fairway_types::friends::FriendRequestStatus;
use fairway_types::notifications::NotificationKind;

#[tokio::test]
async fn test_accept_from_offline_device_is_stale() {
    let h = Harness::new();
    let (alice, bob) = (fairway_types::new_id(), fairway_types::new_id());
    let request = h
        .backend
        .send_friend_request(&alice, &bob)
        .await
        .expect("send");

    let phone = h.device(bob);
    let laptop = h.offline_device(bob);
    phone.load(None).await.expect("phone load");
    laptop.load(None).await.expect("laptop load");
    assert_eq!(laptop.snapshot().unread_count, 1);

    phone
        .respond_to_friend_request(&request.id, true)
        .await
        .expect("phone accepts");

    let err = laptop
        .respond_to_friend_request(&request.id, true)
        .await
        .expect_err("laptop is behind");

    assert!(matches!(
        err,
        EngineError::StaleState {
            status: FriendRequestStatus::Accepted,
            ..
        }
    ));
    // The refetched terminal status marked the laptop's copy read.
    assert_eq!(laptop.snapshot().unread_count, 0);

    let alice_view = h
        .backend
        .fetch_notifications(&alice, 50)
        .await
        .expect("fetch");
    let accepted: Vec<_> = alice_view
        .iter()
        .filter(|n| n.kind == NotificationKind::FriendAccepted)
        .collect();
    assert_eq!(accepted.len(), 1, "exactly one acceptance notification");
}

#[tokio::test]
async fn test_mutations_propagate_between_devices() {
    let h = Harness::new();
    let me = fairway_types::new_id();
    for _ in 0..3 {
        h.backend
            .send_friend_request(&fairway_types::new_id(), &me)
            .await
            .expect("send");
    }
    let phone = h.device(me);
    let laptop = h.device(me);
    phone.load(None).await.expect("load");
    laptop.load(None).await.expect("load");
    let ids = phone.snapshot().ids();
    assert_eq!(ids.len(), 3);

    phone.mark_as_read(&ids[0]).await.expect("mark");
    laptop.delete_notification(&ids[1]).await.expect("delete");

    let expected = |s: &fairway_types::notifications::ViewSnapshot| {
        s.notifications.len() == 2 && s.unread_count == 1
    };
    let on_phone = wait_for(&phone, expected).await;
    let on_laptop = wait_for(&laptop, expected).await;
    assert_eq!(on_phone, on_laptop);
    assert_eq!(on_phone.ids(), vec![ids[0], ids[2]]);
}

#[tokio::test]
async fn test_concurrent_read_and_delete_converge() {
    let h = Harness::new();
    let me = fairway_types::new_id();
    h.backend
        .send_friend_request(&fairway_types::new_id(), &me)
        .await
        .expect("send");
    let phone = h.device(me);
    let laptop = h.device(me);
    phone.load(None).await.expect("load");
    laptop.load(None).await.expect("load");
    let id = phone.snapshot().ids()[0];

    // The mark may lose the race and fail with NotFound; the views still agree.
    let (_read, deleted) =
        tokio::join!(phone.mark_as_read(&id), laptop.delete_notification(&id));

    assert!(deleted.is_ok());
    let gone = |s: &fairway_types::notifications::ViewSnapshot| s.notifications.is_empty();
    wait_for(&phone, gone).await;
    wait_for(&laptop, gone).await;
}

#[tokio::test]
async fn test_duplicate_delivery_and_unknown_delete() {
    let h = Harness::new();
    let me = fairway_types::new_id();
    let device = h.device(me);
    h.backend
        .send_friend_request(&fairway_types::new_id(), &me)
        .await
        .expect("send");
    let view = wait_for(&device, |s| s.notifications.len() == 1).await;

    // Replays of the same row, then a delete for an id nobody has.
    let row = RowChange::notification(Operation::Insert, &view.notifications[0]).expect("row");
    h.feed().publish(row.clone());
    h.feed().publish(row);
    h.feed().publish(RowChange {
        table: "notifications".into(),
        operation: "DELETE".into(),
        row: serde_json::json!({ "id": fairway_types::new_id() }),
    });
    settle().await;

    assert_eq!(device.snapshot(), view);
}

#[tokio::test]
async fn test_disposed_device_ignores_pushes() {
    let h = Harness::new();
    let me = fairway_types::new_id();
    let handle = h.sessions.acquire(me);
    let engine = std::sync::Arc::clone(handle.engine());
    drop(handle);
    assert!(engine.is_disposed());

    h.backend
        .send_friend_request(&fairway_types::new_id(), &me)
        .await
        .expect("send");
    settle().await;

    assert!(engine.snapshot().notifications.is_empty());
    assert!(matches!(
        engine.mark_all_as_read().await,
        Err(EngineError::Disposed)
    ));
    assert_eq!(h.sessions.active_sessions(), 0);
}
