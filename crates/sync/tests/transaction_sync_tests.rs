mod common;

use std::sync::Arc;

use common::*;
use rust_decimal_macros::dec;
use serde_json::json;
use xpenza_core::sync::{
    CommandOutcome, LocalCache, Precondition, RecordId, STORE_CACHE_KEY, TRANSACTIONS_COLLECTION,
};
use xpenza_core::transactions::TransactionPatch;
use xpenza_storage_local::StoreOp;

#[tokio::test]
async fn add_transaction_is_visible_before_the_remote_write() {
    let h = Harness::signed_in();
    let ledger_id = h.confirmed_ledger("Main Book").await;
    h.remote.pause_writes();

    let first = applied(h.store.add_transaction(expense("Coffee", dec!(3.5))));
    let second = applied(h.store.add_transaction(expense("Lunch", dec!(12))));

    let held = h.store.transactions();
    assert_eq!(held.len(), 2);
    assert_ne!(first, second);
    assert_eq!(held[0].id, RecordId::Pending(second.clone()));
    assert_eq!(held[1].id, RecordId::Pending(first.clone()));
    assert!(held.iter().all(|tx| tx.is_syncing));
    assert!(held.iter().all(|tx| tx.ledger_id.as_deref() == Some(ledger_id.as_str())));
    assert!(h.store.is_in_flight(&first));

    h.remote.resume_writes();
    h.store.wait_idle().await;

    let held = h.store.transactions();
    assert_eq!(held.len(), 2);
    assert!(held.iter().all(|tx| !tx.is_syncing && !tx.id.is_pending()));
    assert_eq!(h.remote.documents(TRANSACTIONS_COLLECTION).len(), 2);
    assert!(!h.store.is_in_flight(&first));
}

#[tokio::test]
async fn confirmed_create_swaps_the_id_without_duplicating() {
    let h = Harness::signed_in();
    h.confirmed_ledger("Main Book").await;

    let key = applied(h.store.add_transaction(expense("Coffee", dec!(3.5))));
    h.store.wait_idle().await;

    let held = h.store.transactions();
    assert_eq!(held.len(), 1);
    let server_id = held[0].id.server_id().expect("confirmed").to_string();
    assert_ne!(server_id, key);
    assert_eq!(held[0].client_key, key);

    let remote = h
        .remote
        .document(TRANSACTIONS_COLLECTION, &server_id)
        .expect("written remotely");
    assert_eq!(remote.get("clientKey"), Some(&json!(key)));
    assert!(remote.get("isSyncing").is_none());
    assert!(remote.get("id").is_none());

    // Both tokens keep resolving the record.
    assert_eq!(h.store.transaction(&key), h.store.transaction(&server_id));
}

#[tokio::test]
async fn failed_create_keeps_the_record_unsynced() {
    let h = Harness::signed_in();
    h.confirmed_ledger("Main Book").await;
    h.remote.fail_next(StoreOp::Create, 1);

    let key = applied(h.store.add_transaction(expense("Coffee", dec!(3.5))));
    h.store.wait_idle().await;

    let held = h.store.transactions();
    assert_eq!(held.len(), 1);
    assert_eq!(held[0].id, RecordId::Pending(key));
    assert!(!held[0].is_syncing);
    assert!(h.remote.documents(TRANSACTIONS_COLLECTION).is_empty());
}

#[tokio::test]
async fn failed_delete_restores_the_exact_sequence() {
    let h = Harness::signed_in();
    h.confirmed_ledger("Main Book").await;
    for (title, amount) in [("Rent", dec!(900)), ("Bus", dec!(2.5)), ("Salad", dec!(8))] {
        h.confirmed_expense(title, amount).await;
    }
    let before = h.store.transactions();
    h.remote.fail_next(StoreOp::Delete, 1);

    let target = before[1].id.to_string();
    applied(h.store.delete_transaction(&target));
    assert_eq!(h.store.transactions().len(), 2);
    assert!(h.store.transaction(&target).is_none());

    h.store.wait_idle().await;
    assert_eq!(h.store.transactions(), before);
    assert_eq!(h.remote.documents(TRANSACTIONS_COLLECTION).len(), 3);
}

#[tokio::test]
async fn delete_removes_the_remote_document() {
    let h = Harness::signed_in();
    h.confirmed_ledger("Main Book").await;
    let server_id = h.confirmed_expense("Bus", dec!(2.5)).await;

    applied(h.store.delete_transaction(&server_id));
    h.store.wait_idle().await;

    assert!(h.store.transactions().is_empty());
    assert!(h.remote.document(TRANSACTIONS_COLLECTION, &server_id).is_none());
}

#[tokio::test]
async fn update_on_a_pending_insert_waits_for_the_create() {
    let h = Harness::signed_in();
    h.confirmed_ledger("Main Book").await;
    h.remote.pause_writes();

    let key = applied(h.store.add_transaction(expense("Coffee", dec!(3.5))));
    let patch = TransactionPatch {
        title: Some("Dinner".into()),
        amount: Some(dec!(40)),
        ..Default::default()
    };
    applied(h.store.update_transaction(&key, patch));

    let local = h.store.transaction(&key).expect("held");
    assert_eq!(local.title, "Dinner");
    assert!(local.is_syncing);
    assert!(local.updated_at.is_some());

    h.remote.resume_writes();
    h.store.wait_idle().await;

    let local = h.store.transaction(&key).expect("held");
    assert!(!local.is_syncing);
    let server_id = local.id.server_id().expect("confirmed");
    let remote = h
        .remote
        .document(TRANSACTIONS_COLLECTION, server_id)
        .expect("written remotely");
    assert_eq!(remote.get("title"), Some(&json!("Dinner")));
    assert_eq!(h.remote.documents(TRANSACTIONS_COLLECTION).len(), 1);
    assert_eq!(h.remote.call_count(StoreOp::Update), 1);
}

#[tokio::test]
async fn update_after_a_failed_create_creates_the_record() {
    let h = Harness::signed_in();
    h.confirmed_ledger("Main Book").await;
    h.remote.fail_next(StoreOp::Create, 1);

    let key = applied(h.store.add_transaction(expense("Coffee", dec!(3.5))));
    h.store.wait_idle().await;
    assert!(h.store.transaction(&key).expect("held").id.is_pending());

    let patch = TransactionPatch {
        note: Some("with oat milk".into()),
        ..Default::default()
    };
    applied(h.store.update_transaction(&key, patch));
    h.store.wait_idle().await;

    let local = h.store.transaction(&key).expect("held");
    assert!(!local.is_syncing);
    let server_id = local.id.server_id().expect("confirmed by the retry");
    let remote = h
        .remote
        .document(TRANSACTIONS_COLLECTION, server_id)
        .expect("written remotely");
    assert_eq!(remote.get("note"), Some(&json!("with oat milk")));
    assert_eq!(h.remote.call_count(StoreOp::Update), 0);
}

#[tokio::test]
async fn failed_update_keeps_the_local_patch() {
    let h = Harness::signed_in();
    h.confirmed_ledger("Main Book").await;
    let server_id = h.confirmed_expense("Coffee", dec!(3.5)).await;
    h.remote.fail_next(StoreOp::Update, 1);

    applied(h.store.update_transaction(
        &server_id,
        TransactionPatch {
            title: Some("Espresso".into()),
            ..Default::default()
        },
    ));
    h.store.wait_idle().await;

    let local = h.store.transaction(&server_id).expect("held");
    assert_eq!(local.title, "Espresso");
    assert!(!local.is_syncing);
    let remote = h
        .remote
        .document(TRANSACTIONS_COLLECTION, &server_id)
        .expect("still there");
    assert_eq!(remote.get("title"), Some(&json!("Coffee")));
}

#[tokio::test]
async fn delete_of_a_pending_insert_never_reaches_the_remote() {
    let h = Harness::signed_in();
    h.confirmed_ledger("Main Book").await;
    h.remote.pause_writes();

    let key = applied(h.store.add_transaction(expense("Coffee", dec!(3.5))));
    applied(h.store.delete_transaction(&key));
    assert!(h.store.transactions().is_empty());

    h.remote.resume_writes();
    h.store.wait_idle().await;

    assert!(h.store.transactions().is_empty());
    assert!(h.remote.documents(TRANSACTIONS_COLLECTION).is_empty());
}

#[tokio::test]
async fn commands_report_unmet_preconditions() {
    let h = Harness::signed_out();
    assert_eq!(
        h.store.add_transaction(expense("Coffee", dec!(1))),
        CommandOutcome::PreconditionFailed(Precondition::NoSession)
    );

    let h = Harness::signed_in();
    assert_eq!(
        h.store.add_transaction(expense("Coffee", dec!(1))),
        CommandOutcome::PreconditionFailed(Precondition::NoActiveLedger)
    );

    h.confirmed_ledger("Main Book").await;
    assert_eq!(
        h.store.add_transaction(expense("Coffee", dec!(-1))),
        CommandOutcome::PreconditionFailed(Precondition::NegativeAmount)
    );
    assert_eq!(
        h.store
            .update_transaction("missing", TransactionPatch::default()),
        CommandOutcome::PreconditionFailed(Precondition::UnknownRecord("missing".into()))
    );
    assert_eq!(
        h.store.delete_transaction("missing"),
        CommandOutcome::PreconditionFailed(Precondition::UnknownRecord("missing".into()))
    );
    assert!(h.store.transactions().is_empty());
}

#[tokio::test]
async fn subscription_push_during_create_does_not_duplicate() {
    let h = Harness::signed_in();
    let ledger_id = h.confirmed_ledger("Main Book").await;
    let subscription = applied(h.store.subscribe_to_transactions().await);
    eventually("initial snapshot", || subscription.deliveries() >= 1).await;

    h.remote.pause_writes();
    let key = applied(h.store.add_transaction(expense("Coffee", dec!(3.5))));
    // Another device writes while our create is held.
    h.remote.seed(
        TRANSACTIONS_COLLECTION,
        "other-device-1",
        remote_transaction(USER, Some(&ledger_id), "Groceries", "2026-01-01T00:00:00.000Z"),
    );
    eventually("pushed snapshot", || h.store.transactions().len() == 2).await;
    assert!(h.store.transaction(&key).expect("kept").id.is_pending());

    h.remote.resume_writes();
    h.store.wait_idle().await;
    eventually("confirmed", || {
        h.store
            .transaction(&key)
            .is_some_and(|tx| !tx.id.is_pending())
    })
    .await;

    let held = h.store.transactions();
    assert_eq!(held.len(), 2);
    assert_eq!(held.iter().filter(|tx| tx.client_key == key).count(), 1);
}

#[tokio::test]
async fn fetch_replaces_and_sorts_newest_first() {
    let h = Harness::signed_in();
    let ledger_id = h.confirmed_ledger("Main Book").await;
    for (id, created_at) in [
        ("t-old", "2026-01-01T00:00:00.000Z"),
        ("t-new", "2026-03-01T00:00:00.000Z"),
        ("t-mid", "2026-02-01T00:00:00.000Z"),
    ] {
        h.remote.seed(
            TRANSACTIONS_COLLECTION,
            id,
            remote_transaction(USER, Some(&ledger_id), id, created_at),
        );
    }
    h.remote.seed(
        TRANSACTIONS_COLLECTION,
        "t-foreign",
        remote_transaction("someone-else", Some(&ledger_id), "x", "2026-04-01T00:00:00.000Z"),
    );

    assert_eq!(h.store.fetch_transactions().await, CommandOutcome::Applied(3));
    let ids: Vec<String> = h
        .store
        .transactions()
        .iter()
        .map(|tx| tx.id.to_string())
        .collect();
    assert_eq!(ids, vec!["t-new", "t-mid", "t-old"]);
}

#[tokio::test]
async fn fetch_failure_is_reported() {
    let h = Harness::signed_in();
    h.confirmed_ledger("Main Book").await;
    h.remote.fail_next(StoreOp::Query, 1);
    assert!(matches!(
        h.store.fetch_transactions().await,
        CommandOutcome::RemoteFailed(_)
    ));
}

#[tokio::test]
async fn state_is_written_through_and_rehydrated() {
    let h = Harness::signed_in();
    h.confirmed_ledger("Main Book").await;
    h.confirmed_expense("Rent", dec!(900)).await;
    h.remote.pause_writes();
    let pending = applied(h.store.add_transaction(expense("Bus", dec!(2.5))));

    assert!(h.cache.get(STORE_CACHE_KEY).expect("cache read").is_some());

    let restarted = h.restarted();
    assert!(restarted.rehydrate());
    let restored = restarted.transactions();
    assert_eq!(restored.len(), 2);
    assert!(restored.iter().all(|tx| !tx.is_syncing));
    assert!(restarted.transaction(&pending).is_some());
    assert_eq!(restarted.active_ledger_id(), h.store.active_ledger_id());
    assert_eq!(restarted.categories().len(), 15);

    h.remote.resume_writes();
    h.store.wait_idle().await;
}

#[tokio::test]
async fn rehydrate_without_cache_is_a_no_op() {
    let h = Harness::signed_in();
    assert!(!h.store.rehydrate());
    assert!(h.store.transactions().is_empty());
}

#[tokio::test]
async fn every_change_bumps_the_revision() {
    let h = Harness::signed_in();
    h.confirmed_ledger("Main Book").await;
    let mut changes = h.store.changes();
    let seen = *changes.borrow_and_update();

    applied(h.store.add_transaction(expense("Coffee", dec!(3.5))));
    assert!(changes.has_changed().expect("store alive"));
    assert!(*changes.borrow_and_update() > seen);
    h.store.wait_idle().await;
}

#[test]
fn commands_issued_off_the_runtime_still_sync() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let h = runtime.block_on(async {
        let h = Harness::signed_in();
        h.confirmed_ledger("Main Book").await;
        h
    });

    let store = Arc::clone(&h.store);
    let key = std::thread::spawn(move || applied(store.add_transaction(expense("Tea", dec!(3)))))
        .join()
        .unwrap();
    runtime.block_on(h.store.wait_idle());

    let tx = h.store.transaction(&key).expect("held");
    assert!(tx.id.server_id().is_some());
    assert_eq!(h.remote.documents(TRANSACTIONS_COLLECTION).len(), 1);
}
