//! Sync engine behavior against a scripted mailbox.

mod common;

use chrono::Duration as ChronoDuration;
use code_sync::{
    CodeStore, CycleOutcome, MemoryStore, SqliteStore, SyncConfig, SyncEngine,
};
use common::{html_message, minutes_ago, plain_message, ScriptedMailbox};
use std::sync::Arc;
use std::time::Duration;

fn engine(mailbox: &Arc<ScriptedMailbox>, store: &Arc<MemoryStore>) -> Arc<SyncEngine> {
    Arc::new(SyncEngine::new(
        SyncConfig::default(),
        mailbox.clone(),
        store.clone(),
    ))
}

fn completed(outcome: CycleOutcome) -> code_sync::CycleReport {
    match outcome {
        CycleOutcome::Completed(report) => report,
        other => panic!("expected completed cycle, got {other:?}"),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// End-to-end scenarios
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_plain_text_code_is_stored() {
    let mailbox = Arc::new(ScriptedMailbox::new(vec![plain_message(
        "m1",
        "User <User@Example.com>",
        "Your code",
        "Your verification code is 482913.",
        minutes_ago(1),
    )]));
    let store = Arc::new(MemoryStore::new());

    let report = completed(engine(&mailbox, &store).run_cycle().await);
    assert_eq!(report.listed, 1);
    assert_eq!(report.inserted, 1);

    let records = store.snapshot().await;
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.code, "482913");
    assert!(!record.is_protected);
    assert_eq!(record.recipient, "user@example.com");
    assert_eq!(record.sender.as_deref(), Some("no-reply@acme.com"));
    assert_eq!(record.subject, "Your code");
}

#[tokio::test]
async fn test_reset_template_code_is_protected() {
    let html = r#"<div style="background-color: #f3f3f3"><p>Use code AB3D4-E5F61 to reset your account</p></div>"#;
    let mailbox = Arc::new(ScriptedMailbox::new(vec![html_message(
        "m1",
        "user@example.com",
        "Account recovery",
        html,
        minutes_ago(2),
    )]));
    let store = Arc::new(MemoryStore::new());

    completed(engine(&mailbox, &store).run_cycle().await);

    let records = store.snapshot().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].code, "AB3D4-E5F61");
    assert!(records[0].is_protected);
}

#[tokio::test]
async fn test_second_cycle_on_unchanged_mailbox_inserts_nothing() {
    let mailbox = Arc::new(ScriptedMailbox::new(vec![
        plain_message("m1", "a@example.com", "Code", "Code 111111", minutes_ago(1)),
        plain_message("m2", "b@example.com", "Code", "Code 222222 or 333333", minutes_ago(2)),
    ]));
    let store = Arc::new(MemoryStore::new());
    let engine = engine(&mailbox, &store);

    let first = completed(engine.run_cycle().await);
    assert_eq!(first.inserted, 3);

    let second = completed(engine.run_cycle().await);
    assert_eq!(second.listed, 2);
    assert_eq!(second.candidates, 3);
    assert_eq!(second.inserted, 0);
    assert_eq!(store.len().await, 3);
}

// ─────────────────────────────────────────────────────────────────────────────
// Failure handling
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_listing_failure_aborts_cleanly() {
    let mailbox = Arc::new(ScriptedMailbox::new(vec![plain_message(
        "m1",
        "a@example.com",
        "Code",
        "Code 111111",
        minutes_ago(1),
    )]));
    mailbox.set_fail_listing(true);
    let store = Arc::new(MemoryStore::new());
    let engine = engine(&mailbox, &store);

    let outcome = engine.run_cycle().await;
    match outcome {
        CycleOutcome::Failed(e) => assert!(e.is_retryable()),
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(!engine.state().is_in_progress());
    assert!(store.is_empty().await);

    // The next cycle runs normally once the mailbox recovers.
    mailbox.set_fail_listing(false);
    assert_eq!(completed(engine.run_cycle().await).inserted, 1);
}

#[tokio::test]
async fn test_single_message_failure_is_skipped() {
    let mailbox = Arc::new(ScriptedMailbox::new(vec![
        plain_message("m1", "a@example.com", "Code", "Code 111111", minutes_ago(1)),
        plain_message("m2", "a@example.com", "Code", "Code 222222", minutes_ago(1)),
    ]));
    mailbox.fail_message("m1");
    let store = Arc::new(MemoryStore::new());

    let report = completed(engine(&mailbox, &store).run_cycle().await);
    assert_eq!(report.failed, 1);
    assert_eq!(report.scanned, 1);
    assert_eq!(report.inserted, 1);
    assert_eq!(store.snapshot().await[0].code, "222222");
}

#[tokio::test]
async fn test_store_failure_fails_cycle() {
    let mailbox = Arc::new(ScriptedMailbox::new(vec![plain_message(
        "m1",
        "a@example.com",
        "Code",
        "Code 111111",
        minutes_ago(1),
    )]));
    let engine = SyncEngine::new(
        SyncConfig::default(),
        mailbox,
        Arc::new(common::FailingStore),
    );

    assert!(matches!(engine.run_cycle().await, CycleOutcome::Failed(_)));
    assert!(!engine.state().is_in_progress());
}

// ─────────────────────────────────────────────────────────────────────────────
// Window, pagination, batching
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_messages_before_window_are_dropped() {
    let mailbox = Arc::new(ScriptedMailbox::new(vec![
        plain_message("old", "a@example.com", "Code", "Code 111111", minutes_ago(60)),
        plain_message("new", "a@example.com", "Code", "Code 222222", minutes_ago(1)),
    ]));
    let store = Arc::new(MemoryStore::new());

    let report = completed(engine(&mailbox, &store).run_cycle().await);
    assert_eq!(report.out_of_window, 1);
    assert_eq!(report.inserted, 1);
    assert_eq!(store.snapshot().await[0].code, "222222");
}

#[tokio::test]
async fn test_listing_follows_every_page() {
    let messages = (0..7)
        .map(|i| {
            plain_message(
                &format!("m{i}"),
                "a@example.com",
                "Code",
                &format!("Code 10000{i}"),
                minutes_ago(1),
            )
        })
        .collect();
    let mailbox = Arc::new(ScriptedMailbox::new(messages).with_page_size(3));
    let store = Arc::new(MemoryStore::new());

    let report = completed(engine(&mailbox, &store).run_cycle().await);
    assert_eq!(mailbox.list_calls(), 3);
    assert_eq!(report.listed, 7);
    assert_eq!(report.inserted, 7);
}

#[tokio::test]
async fn test_same_code_in_two_messages_is_stored_once() {
    let at = minutes_ago(1);
    let mailbox = Arc::new(ScriptedMailbox::new(vec![
        plain_message("m1", "a@example.com", "Code", "Code 111111", at),
        plain_message("m2", "a@example.com", "Code again", "111111 is your code", at),
        plain_message("m3", "b@example.com", "Code", "Code 111111", at),
    ]));
    let store = Arc::new(MemoryStore::new());

    let report = completed(engine(&mailbox, &store).run_cycle().await);
    assert_eq!(report.candidates, 3);
    assert_eq!(report.inserted, 2);
}

#[tokio::test]
async fn test_new_mail_is_picked_up_by_next_cycle() {
    let mailbox = Arc::new(ScriptedMailbox::new(vec![plain_message(
        "m1",
        "a@example.com",
        "Code",
        "Code 111111",
        minutes_ago(3),
    )]));
    let store = Arc::new(MemoryStore::new());
    let engine = engine(&mailbox, &store);

    completed(engine.run_cycle().await);
    mailbox.push(plain_message(
        "m2",
        "a@example.com",
        "Code",
        "Code 222222",
        minutes_ago(0),
    ));

    let report = completed(engine.run_cycle().await);
    assert_eq!(report.inserted, 1);
    assert_eq!(store.len().await, 2);
}

#[tokio::test]
async fn test_sqlite_backed_cycle_is_idempotent() {
    let mailbox = Arc::new(ScriptedMailbox::new(vec![plain_message(
        "m1",
        "a@example.com",
        "Code",
        "Your verification code is 482913.",
        minutes_ago(1),
    )]));
    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    let engine = SyncEngine::new(SyncConfig::default(), mailbox, store.clone());

    assert_eq!(completed(engine.run_cycle().await).inserted, 1);
    assert_eq!(completed(engine.run_cycle().await).inserted, 0);

    let since = chrono::Utc::now() - ChronoDuration::minutes(8);
    let stored = store
        .find_recent(since, &code_sync::store::RecentFilter::default())
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// Single flight and scheduling
// ─────────────────────────────────────────────────────────────────────────────

async fn wait_until_running(engine: &SyncEngine) {
    while !engine.state().is_in_progress() {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_trigger_is_skipped() {
    let mailbox = Arc::new(ScriptedMailbox::new(Vec::new()));
    mailbox.set_hang_listing(true);
    let store = Arc::new(MemoryStore::new());
    let engine = engine(&mailbox, &store);

    let hung = tokio::spawn({
        let engine = engine.clone();
        async move {
            engine.run_cycle().await;
        }
    });
    wait_until_running(&engine).await;

    tokio::time::advance(Duration::from_secs(30)).await;
    assert!(matches!(engine.run_cycle().await, CycleOutcome::Skipped));
    assert_eq!(mailbox.list_calls(), 1);

    hung.abort();
    let _ = hung.await;
    assert!(!engine.state().is_in_progress());
}

#[tokio::test(start_paused = true)]
async fn test_stuck_cycle_is_replaced() {
    let mailbox = Arc::new(ScriptedMailbox::new(vec![plain_message(
        "m1",
        "a@example.com",
        "Code",
        "Code 111111",
        minutes_ago(1),
    )]));
    mailbox.set_hang_listing(true);
    let store = Arc::new(MemoryStore::new());
    let engine = engine(&mailbox, &store);

    let hung = tokio::spawn({
        let engine = engine.clone();
        async move {
            engine.run_cycle().await;
        }
    });
    wait_until_running(&engine).await;

    tokio::time::advance(Duration::from_secs(121)).await;
    mailbox.set_hang_listing(false);

    let report = completed(engine.run_cycle().await);
    assert_eq!(report.inserted, 1);
    assert!(!engine.state().is_in_progress());

    // The wedged cycle ending later leaves the state idle.
    hung.abort();
    let _ = hung.await;
    assert!(!engine.state().is_in_progress());
}

#[tokio::test(start_paused = true)]
async fn test_start_is_idempotent_and_ticks() {
    let mailbox = Arc::new(ScriptedMailbox::new(Vec::new()));
    let store = Arc::new(MemoryStore::new());
    let engine = Arc::new(SyncEngine::new(
        SyncConfig::builder()
            .interval(Duration::from_secs(10))
            .build()
            .unwrap(),
        mailbox.clone(),
        store,
    ));

    assert!(engine.start());
    assert!(!engine.start());
    assert!(engine.state().is_loop_running());

    tokio::time::sleep(Duration::from_secs(25)).await;
    let calls = mailbox.list_calls();
    assert!(calls >= 2, "expected at least two cycles, got {calls}");

    engine.shutdown().await;
    assert!(!engine.state().is_loop_running());

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(mailbox.list_calls(), calls);

    assert!(engine.start());
    engine.shutdown().await;
}
