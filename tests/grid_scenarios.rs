//! End-to-end behavior of the reconciliation loop against in-process and
//! file-backed stores.

use chrono::{TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;

use chore_tracker::config::TrackerConfig;
use chore_tracker::file_store::JsonFileStore;
use chore_tracker::model::{CompletionRecord, Recurrence, Task, User};
use chore_tracker::store::{ChoreStore, MemoryStore};
use chore_tracker::{ErrorCode, ErrorKind, Reconciler, RefreshOutcome, TrackerEvent};
use tempfile::TempDir;

fn config() -> TrackerConfig {
    TrackerConfig {
        year: Some(2025),
        utc_offset_minutes: Some(0),
        remote_timeout_ms: Some(2_000),
        ..Default::default()
    }
}

fn clean_task() -> Task {
    Task {
        id: "1".into(),
        title: "Clean".into(),
        recurrence: Some(Recurrence::Weekly),
    }
}

fn record(id: &str, task_id: &str, user: &str, created_at: chrono::DateTime<Utc>) -> CompletionRecord {
    CompletionRecord {
        id: id.into(),
        task_id: task_id.into(),
        task_title: None,
        user_id: user.into(),
        percentage_done: None,
        week: None,
        year: None,
        created_at,
    }
}

async fn next_write_outcome(events: &mut tokio::sync::broadcast::Receiver<TrackerEvent>) -> TrackerEvent {
    loop {
        match events.recv().await {
            Ok(TrackerEvent::MatrixPublished { .. }) => continue,
            Ok(other) => return other,
            Err(e) => panic!("event channel failed: {:?}", e),
        }
    }
}

#[tokio::test]
async fn test_first_of_february_lands_in_fifth_column() {
    let store = MemoryStore::with_data(
        vec![clean_task()],
        vec![record("r1", "1", "U1", Utc.with_ymd_and_hms(2025, 2, 1, 10, 0, 0).unwrap())],
        vec![],
    );
    let tracker = Reconciler::new(Arc::new(store), &config());
    tracker.refresh().await.unwrap();

    let matrix = tracker.matrix().await.unwrap();
    let row = matrix.row("1").unwrap();
    assert_eq!(row.slots.len(), 52);
    assert_eq!(row.owner(4), Some("U1"));
    assert_eq!(row.slots.iter().filter(|s| s.is_some()).count(), 1);

    // Same user toggles: slot cleared, an undo is persisted.
    let undo = tracker.toggle("1", 4, "U1").await.unwrap();
    assert_eq!(tracker.matrix().await.unwrap().owner("1", 4), None);
    let undo = undo.wait().await.unwrap();
    assert_eq!(undo.percentage_done, Some(0));
    assert_eq!(undo.week, Some(5));

    // Another user takes the slot.
    tracker.toggle("1", 4, "U2").await.unwrap().wait().await.unwrap();
    assert_eq!(tracker.matrix().await.unwrap().owner("1", 4), Some("U2"));

    // A fresh fetch rebuilds the same grid from the persisted facts.
    tracker.refresh().await.unwrap();
    assert_eq!(tracker.matrix().await.unwrap().owner("1", 4), Some("U2"));
    assert_eq!(tracker.store().records().await.len(), 3);
}

#[tokio::test]
async fn test_stale_fetch_is_discarded() {
    let store = MemoryStore::with_data(vec![clean_task()], vec![], vec![]);
    store.push_read_delay(Duration::from_millis(300));
    let tracker = Reconciler::new(Arc::new(store), &config());

    let slow = {
        let tracker = tracker.clone();
        tokio::spawn(async move { tracker.refresh().await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;

    // A completion appears after the slow fetch read its records.
    tracker
        .store()
        .push_record(record("r1", "1", "U1", Utc.with_ymd_and_hms(2025, 1, 2, 9, 0, 0).unwrap()))
        .await;
    let fast = tracker.refresh().await.unwrap();
    assert!(matches!(fast, RefreshOutcome::Applied { seq: 2, .. }));

    let slow = slow.await.unwrap().unwrap();
    assert_eq!(slow, RefreshOutcome::Stale { seq: 1 });
    assert_eq!(tracker.matrix().await.unwrap().owner("1", 0), Some("U1"));
}

#[tokio::test]
async fn test_toggle_during_fetch_survives_its_result() {
    let store = MemoryStore::with_data(vec![clean_task()], vec![], vec![]);
    let tracker = Reconciler::new(Arc::new(store), &config());
    tracker.refresh().await.unwrap();

    tracker.store().push_read_delay(Duration::from_millis(300));
    let slow = {
        let tracker = tracker.clone();
        tokio::spawn(async move { tracker.refresh().await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;

    tracker.toggle("1", 7, "U1").await.unwrap().wait().await.unwrap();
    assert!(matches!(slow.await.unwrap().unwrap(), RefreshOutcome::Applied { .. }));
    assert_eq!(tracker.matrix().await.unwrap().owner("1", 7), Some("U1"));

    // Once the write is visible remotely the replay is no longer needed.
    tracker.refresh().await.unwrap();
    assert_eq!(tracker.matrix().await.unwrap().owner("1", 7), Some("U1"));
}

#[tokio::test]
async fn test_write_failure_is_reported_not_thrown() {
    let store = MemoryStore::with_data(vec![clean_task()], vec![], vec![]);
    store.set_fail_writes(true);
    let tracker = Reconciler::new(Arc::new(store), &config());
    tracker.refresh().await.unwrap();
    let mut events = tracker.subscribe();

    // The caller drops the handle; the failure still surfaces as an event.
    drop(tracker.toggle("1", 2, "U1").await.unwrap());
    assert_eq!(tracker.matrix().await.unwrap().owner("1", 2), Some("U1"));

    match next_write_outcome(&mut events).await {
        TrackerEvent::WriteFailed {
            task_id,
            week_index,
            error,
            rolled_back,
        } => {
            assert_eq!(task_id, "1");
            assert_eq!(week_index, 2);
            assert_eq!(error.kind(), ErrorKind::WriteFailure);
            assert!(!rolled_back);
        }
        other => panic!("unexpected event: {:?}", other),
    }

    // The next fetch shows what the store actually holds.
    tracker.refresh().await.unwrap();
    assert_eq!(tracker.matrix().await.unwrap().owner("1", 2), None);
}

#[tokio::test]
async fn test_slow_write_times_out() {
    let store = MemoryStore::with_data(vec![clean_task()], vec![], vec![]);
    store.set_write_delay(Some(Duration::from_millis(500)));
    let config = TrackerConfig {
        remote_timeout_ms: Some(50),
        rollback_on_write_failure: true,
        ..config()
    };
    let tracker = Reconciler::new(Arc::new(store), &config);
    tracker.refresh().await.unwrap();
    let mut events = tracker.subscribe();

    let err = tracker.toggle("1", 0, "U1").await.unwrap().wait().await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::WriteTimeout);
    assert_eq!(tracker.matrix().await.unwrap().owner("1", 0), None);

    match next_write_outcome(&mut events).await {
        TrackerEvent::WriteFailed { rolled_back, .. } => assert!(rolled_back),
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn test_file_store_round_trip() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("chores.json");
    let config = TrackerConfig {
        data_file: Some(path.clone()),
        ..config()
    };

    let store = Arc::new(JsonFileStore::new(config.data_file()));
    let alice: User = store.add_user("Alice", "#FF5733").await.unwrap();
    let tracker = Reconciler::new(store, &config);
    tracker.refresh().await.unwrap();

    let task = tracker.create_task("Take out trash", Some(Recurrence::Weekly)).await.unwrap();
    tracker.toggle(&task.id, 9, &alice.id).await.unwrap().wait().await.unwrap();

    // A second process sees the same grid.
    let other = Reconciler::new(Arc::new(JsonFileStore::new(&path)), &config);
    other.refresh().await.unwrap();
    let view = other.view().await.unwrap();
    assert_eq!(view.rows.len(), 1);
    assert_eq!(view.rows[0].cells[9].owner_name.as_deref(), Some("Alice"));
    assert_eq!(view.legend[0].completed, 1);

    let summaries = other.chore_summaries().await.unwrap();
    assert_eq!(summaries[0].last_done_by.as_deref(), Some(alice.id.as_str()));
    assert_eq!(other.store().list_users().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_invalid_chore_is_rejected_before_any_write() {
    let store = MemoryStore::new();
    let tracker = Reconciler::new(Arc::new(store), &config());

    let err = tracker.create_task("", Some(Recurrence::Daily)).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::TitleMissing);
    let err = tracker.create_task("Dishes", None).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::RecurrenceMissing);
    assert!(tracker.store().list_tasks().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_refresh_keeps_undo_while_mark_write_is_in_flight() {
    let store = MemoryStore::with_data(vec![clean_task()], vec![], vec![]);
    let tracker = Reconciler::new(Arc::new(store), &config());
    tracker.refresh().await.unwrap();

    // Mark with a slow write, then undo with a fast one.
    tracker.store().set_write_delay(Some(Duration::from_millis(300)));
    let mark = tracker.toggle("1", 2, "U1").await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    tracker.store().set_write_delay(None);
    tracker.toggle("1", 2, "U1").await.unwrap().wait().await.unwrap();
    assert_eq!(tracker.matrix().await.unwrap().owner("1", 2), None);

    // The store only holds the undo so far; the undo must still win locally.
    tracker.refresh().await.unwrap();
    assert_eq!(tracker.matrix().await.unwrap().owner("1", 2), None);

    mark.wait().await.unwrap();
    tracker.refresh().await.unwrap();
    assert_eq!(tracker.matrix().await.unwrap().owner("1", 2), None);
}

#[tokio::test]
async fn test_in_flight_toggles_on_different_slots_do_not_interfere() {
    let store = MemoryStore::with_data(vec![clean_task()], vec![], vec![]);
    let tracker = Reconciler::new(Arc::new(store), &config());
    tracker.refresh().await.unwrap();

    tracker.store().set_write_delay(Some(Duration::from_millis(300)));
    let first = tracker.toggle("1", 2, "U1").await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    let second = tracker.toggle("1", 5, "U2").await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    tracker.refresh().await.unwrap();
    let matrix = tracker.matrix().await.unwrap();
    assert_eq!(matrix.owner("1", 2), Some("U1"));
    assert_eq!(matrix.owner("1", 5), Some("U2"));
    assert_eq!(matrix.completed_count("U1") + matrix.completed_count("U2"), 2);

    first.wait().await.unwrap();
    second.wait().await.unwrap();
    tracker.refresh().await.unwrap();
    let matrix = tracker.matrix().await.unwrap();
    assert_eq!(matrix.owner("1", 2), Some("U1"));
    assert_eq!(matrix.owner("1", 5), Some("U2"));
}
