//! End-to-end sync scenarios against the scripted remote.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use studysync_engine::{
    CancelToken, Progress, SyncConfig, SyncEngine, SyncError, SyncState,
};
use studysync_protocol::{Outcome, SyncMode};
use studysync_store::{LocalStore, StorageFormat, StoreConfig};
use studysync_testkit::prelude::*;

const STUDY: &str = "demo";

fn engine_with(
    remote: ScriptedRemote,
    store: LocalStore,
    page_size: u32,
    concurrency: usize,
) -> SyncEngine<ScriptedRemote> {
    let config = SyncConfig::new()
        .with_page_size(page_size)
        .with_max_concurrent_requests(concurrency);
    SyncEngine::new(config, remote, store).unwrap()
}

fn stored_ids(engine: &SyncEngine<ScriptedRemote>) -> Vec<String> {
    ids(&engine.store().load_events(STUDY).unwrap())
}

#[test]
fn full_then_incremental_sync() {
    let (_dir, store) = temp_store(StorageFormat::Json);
    let engine = engine_with(ScriptedRemote::new(STUDY, make_events(0..250)), store, 100, 3);

    let report = engine.sync(STUDY, SyncMode::Full).unwrap();
    assert!(report.success, "{}", report.message);
    assert_eq!(report.outcome, Outcome::Success);
    assert_eq!(report.events_fetched, 250);
    assert_eq!(report.pages_fetched, 3);
    assert_eq!(report.exit_code(), 0);

    let info = engine.info(STUDY).unwrap();
    assert_eq!(info.total_events(), 250);
    let history = engine.history(STUDY).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].pages_fetched, 3);
    assert_eq!(history[0].mode, SyncMode::Full);

    engine.remote().push_events(make_events(250..260));
    let report = engine.sync(STUDY, SyncMode::Incremental).unwrap();
    assert!(report.success);
    assert_eq!(report.events_fetched, 10);
    // The boundary event at the cursor is delivered again and dropped.
    assert_eq!(report.events_received, 11);

    assert_eq!(engine.info(STUDY).unwrap().total_events(), 260);
    let history = engine.history(STUDY).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].events_fetched, 10);
    assert_eq!(history[1].mode, SyncMode::Incremental);
    assert_eq!(stored_ids(&engine), ids(&make_events(0..260)));
}

#[test]
fn incremental_sync_is_idempotent() {
    let (_dir, store) = temp_store(StorageFormat::Json);
    let engine = engine_with(ScriptedRemote::new(STUDY, make_events(0..120)), store, 50, 2);

    engine.sync(STUDY, SyncMode::Full).unwrap();
    let before = engine.info(STUDY).unwrap().metadata.unwrap();

    for _ in 0..2 {
        let report = engine.sync(STUDY, SyncMode::Incremental).unwrap();
        assert!(report.success);
        assert_eq!(report.events_fetched, 0);
    }

    let after = engine.info(STUDY).unwrap().metadata.unwrap();
    assert_eq!(after.total_events, before.total_events);
    assert_eq!(after.high_water_mark, before.high_water_mark);
    assert_eq!(engine.history(STUDY).unwrap().len(), 3);
}

#[test]
fn first_incremental_sync_fetches_everything() {
    let (_dir, store) = temp_store(StorageFormat::Json);
    let engine = engine_with(ScriptedRemote::new(STUDY, make_events(0..30)), store, 10, 3);

    let report = engine.sync(STUDY, SyncMode::Incremental).unwrap();
    assert!(report.success);
    assert_eq!(report.total_events, 30);
    assert!(engine.remote().calls().iter().all(|c| c.since.is_none()));
}

#[test]
fn failure_on_second_page_keeps_first_page() {
    let (_dir, store) = temp_store(StorageFormat::Json);
    let remote = ScriptedRemote::new(STUDY, make_events(0..250));
    remote.fail_at_offset(100, 1, Failure::Transient);
    let engine = engine_with(remote, store, 100, 3);

    let report = engine.sync(STUDY, SyncMode::Incremental).unwrap();
    assert!(!report.success);
    assert_eq!(report.outcome, Outcome::Partial);
    assert_eq!(report.events_fetched, 100);
    assert!(matches!(report.error, Some(SyncError::TransientNetwork(_))));
    assert_eq!(report.exit_code(), 5);

    assert_eq!(stored_ids(&engine), ids(&make_events(0..100)));
    let history = engine.history(STUDY).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].outcome, Outcome::Partial);
    assert_eq!(history[0].events_fetched, 100);
    assert!(history[0].error_summary.is_some());

    // The next run resumes from the cursor.
    let report = engine.sync(STUDY, SyncMode::Incremental).unwrap();
    assert!(report.success);
    assert_eq!(report.events_fetched, 150);
    assert_eq!(report.total_events, 250);
    let last = engine.remote().calls().last().cloned().unwrap();
    assert_eq!(last.since, Some(event_time(99)));
}

#[test]
fn failure_on_first_page_is_failed() {
    let (_dir, store) = temp_store(StorageFormat::Json);
    let remote = ScriptedRemote::new(STUDY, make_events(0..10));
    remote.fail_next(1, Failure::Unauthorized);
    let engine = engine_with(remote, store, 100, 3);

    let report = engine.sync(STUDY, SyncMode::Full).unwrap();
    assert!(!report.success);
    assert_eq!(report.outcome, Outcome::Failed);
    assert!(matches!(report.error, Some(SyncError::RemoteAuth(_))));
    assert_eq!(report.exit_code(), 3);

    let info = engine.info(STUDY).unwrap();
    assert!(!info.has_data);
    assert!(info.metadata.is_none());
    assert_eq!(info.last_outcome(), Some(Outcome::Failed));
    assert_eq!(engine.state(STUDY), SyncState::Failed);
}

#[test]
fn full_sync_never_merges_past_a_failed_page() {
    let (_dir, store) = temp_store(StorageFormat::Json);
    let remote = ScriptedRemote::new(STUDY, make_events(0..400));
    // Second window page fails, third succeeds; the third must be dropped.
    remote.fail_at_offset(100, 1, Failure::ServerError);
    let engine = engine_with(remote, store, 100, 3);

    let report = engine.sync(STUDY, SyncMode::Full).unwrap();
    assert_eq!(report.outcome, Outcome::Partial);
    assert_eq!(stored_ids(&engine), ids(&make_events(0..100)));
    let meta = engine.info(STUDY).unwrap().metadata.unwrap();
    assert_eq!(meta.high_water_mark, Some(event_time(99)));

    let report = engine.sync(STUDY, SyncMode::Incremental).unwrap();
    assert!(report.success);
    assert_eq!(report.total_events, 400);
}

#[test]
fn concurrent_full_sync_merges_in_offset_order() {
    let (_dir, store) = temp_store(StorageFormat::Json);
    let remote =
        ScriptedRemote::new(STUDY, make_events(0..1000)).with_latency(Duration::from_millis(2));
    let engine = engine_with(remote, store, 64, 4);

    let report = engine.sync(STUDY, SyncMode::Full).unwrap();
    assert!(report.success);
    assert_eq!(report.pages_fetched, 16);
    assert_eq!(stored_ids(&engine), ids(&make_events(0..1000)));
}

#[test]
fn capped_pages_do_not_leave_gaps_in_full_sync() {
    let (_dir, store) = temp_store(StorageFormat::Json);
    let remote = ScriptedRemote::new(STUDY, make_events(0..400)).with_page_cap(50);
    let engine = engine_with(remote, store, 100, 3);

    let report = engine.sync(STUDY, SyncMode::Full).unwrap();
    assert!(report.success, "{}", report.message);
    assert_eq!(report.total_events, 400);
    assert_eq!(report.events_fetched, 400);
    assert_eq!(stored_ids(&engine), ids(&make_events(0..400)));

    let meta = engine.info(STUDY).unwrap().metadata.unwrap();
    assert_eq!(meta.high_water_mark, Some(event_time(399)));
}

#[test]
fn full_sync_without_total_pages_sequentially() {
    let (_dir, store) = temp_store(StorageFormat::Json);
    let remote = ScriptedRemote::new(STUDY, make_events(0..250)).without_total();
    let engine = engine_with(remote, store, 100, 3);

    let report = engine.sync(STUDY, SyncMode::Full).unwrap();
    assert!(report.success);
    assert_eq!(report.total_events, 250);
    assert_eq!(report.pages_fetched, 3);
}

#[test]
fn progress_is_reported_per_page() {
    let (_dir, store) = temp_store(StorageFormat::Json);
    let engine = engine_with(ScriptedRemote::new(STUDY, make_events(0..250)), store, 100, 1);

    let mut seen: Vec<Progress> = Vec::new();
    let mut reporter = |p: Progress| seen.push(p);
    engine
        .sync_with(STUDY, SyncMode::Full, &mut reporter, &CancelToken::new())
        .unwrap();

    let pages: Vec<_> = seen.iter().map(|p| p.pages_fetched_so_far).collect();
    assert_eq!(pages, vec![1, 2, 3]);
    let last = seen.last().unwrap();
    assert_eq!(last.events_fetched_so_far, 250);
    assert_eq!(last.total_expected, Some(250));
}

#[test]
fn cancellation_between_pages_is_partial() {
    let (_dir, store) = temp_store(StorageFormat::Json);
    let engine = engine_with(ScriptedRemote::new(STUDY, make_events(0..250)), store, 100, 1);

    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    let mut reporter = move |p: Progress| {
        if p.pages_fetched_so_far == 1 {
            trigger.cancel();
        }
    };
    let report = engine
        .sync_with(STUDY, SyncMode::Full, &mut reporter, &cancel)
        .unwrap();

    assert_eq!(report.outcome, Outcome::Partial);
    assert!(matches!(report.error, Some(SyncError::Cancelled)));
    assert_eq!(report.events_fetched, 100);
    assert_eq!(engine.remote().calls().len(), 1);
    assert_eq!(engine.history(STUDY).unwrap()[0].outcome, Outcome::Partial);
}

#[test]
fn page_bound_ends_run_as_partial() {
    let (_dir, store) = temp_store(StorageFormat::Json);
    let config = SyncConfig::new().with_page_size(100).with_max_pages(2);
    let engine =
        SyncEngine::new(config, ScriptedRemote::new(STUDY, make_events(0..250)), store).unwrap();

    let report = engine.sync(STUDY, SyncMode::Incremental).unwrap();
    assert!(!report.success);
    assert_eq!(report.outcome, Outcome::Partial);
    assert!(report.error.is_none());
    assert_eq!(report.pages_fetched, 2);
    assert_eq!(report.exit_code(), 1);

    let report = engine.sync(STUDY, SyncMode::Incremental).unwrap();
    assert!(report.success);
    assert_eq!(report.total_events, 250);
}

#[test]
fn locked_study_is_refused_without_changes() {
    let (_dir, store) = temp_store(StorageFormat::Json);
    let engine = engine_with(ScriptedRemote::new(STUDY, make_events(0..10)), store, 100, 1);

    let held = engine.store().open_study(STUDY).unwrap();
    let err = engine.sync(STUDY, SyncMode::Full).unwrap_err();
    assert!(matches!(err, SyncError::ConcurrentSync(_)));
    assert!(matches!(
        engine.delete_study(STUDY, true),
        Err(SyncError::ConcurrentSync(_))
    ));
    drop(held);

    assert!(engine.remote().calls().is_empty());
    assert!(engine.history(STUDY).unwrap().is_empty());
    assert!(engine.info(STUDY).unwrap().metadata.is_none());
}

#[test]
fn concurrent_syncs_of_one_study_exclude_each_other() {
    let (_dir, store) = temp_store(StorageFormat::Json);
    let remote =
        ScriptedRemote::new(STUDY, make_events(0..300)).with_latency(Duration::from_millis(100));
    let engine = Arc::new(engine_with(remote, store, 100, 1));

    let background = {
        let engine = Arc::clone(&engine);
        std::thread::spawn(move || engine.sync(STUDY, SyncMode::Full))
    };

    let deadline = Instant::now() + Duration::from_secs(5);
    while !engine.state(STUDY).is_active() {
        assert!(Instant::now() < deadline, "background sync never started");
        std::thread::sleep(Duration::from_millis(1));
    }
    let err = engine.sync(STUDY, SyncMode::Incremental).unwrap_err();
    assert!(matches!(err, SyncError::ConcurrentSync(_)));

    let report = background.join().unwrap().unwrap();
    assert!(report.success);
    assert_eq!(engine.history(STUDY).unwrap().len(), 1);
    assert_eq!(engine.state(STUDY), SyncState::Synced);
}

#[test]
fn crash_during_append_keeps_sidecars_valid() {
    let dir = tempfile::tempdir().unwrap();
    let format = Arc::new(CrashingFormat::new(StorageFormat::Json).crash_on_append(2));
    let store = LocalStore::new(StoreConfig::new(dir.path())).with_event_format(format.clone());
    let engine = engine_with(ScriptedRemote::new(STUDY, make_events(0..250)), store, 100, 1);

    let report = engine.sync(STUDY, SyncMode::Full).unwrap();
    assert!(format.has_crashed());
    assert_eq!(report.outcome, Outcome::Partial);
    assert!(matches!(report.error, Some(SyncError::StorageIo(_))));

    // Sidecars reflect the last committed page.
    let plain = LocalStore::new(StoreConfig::new(dir.path()));
    let meta = plain.read_metadata(STUDY).unwrap().unwrap();
    assert_eq!(meta.total_events, 100);
    let history = plain.read_history(STUDY).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].outcome, Outcome::Partial);

    // A fresh engine recovers and completes without duplicates.
    let engine = engine_with(ScriptedRemote::new(STUDY, make_events(0..250)), plain, 100, 1);
    let report = engine.sync(STUDY, SyncMode::Full).unwrap();
    assert!(report.success, "{}", report.message);
    assert_eq!(report.total_events, 250);

    let stored = stored_ids(&engine);
    let distinct: HashSet<_> = stored.iter().collect();
    assert_eq!(stored.len(), 250);
    assert_eq!(distinct.len(), 250);
    assert_eq!(engine.history(STUDY).unwrap().len(), 2);
}

#[test]
fn cursor_never_moves_backwards() {
    let (dir, store) = temp_store(StorageFormat::Json);
    let engine = engine_with(ScriptedRemote::new(STUDY, make_events(0..50)), store, 20, 2);
    engine.sync(STUDY, SyncMode::Full).unwrap();

    // The remote lost its newest events; a full sync must not rewind.
    let store = LocalStore::new(StoreConfig::new(dir.path()));
    let engine = engine_with(ScriptedRemote::new(STUDY, make_events(0..10)), store, 20, 2);
    let report = engine.sync(STUDY, SyncMode::Full).unwrap();
    assert!(report.success);
    assert_eq!(report.events_fetched, 0);

    let meta = engine.info(STUDY).unwrap().metadata.unwrap();
    assert_eq!(meta.high_water_mark, Some(event_time(49)));
    assert_eq!(meta.total_events, 50);
}

#[test]
fn every_format_stores_the_same_events() {
    for format in [StorageFormat::Json, StorageFormat::Csv, StorageFormat::Sqlite] {
        let (_dir, store) = temp_store(format);
        let engine = engine_with(ScriptedRemote::new(STUDY, make_events(0..75)), store, 20, 3);

        let report = engine.sync(STUDY, SyncMode::Full).unwrap();
        assert!(report.success, "{format}: {}", report.message);
        engine.remote().push_events(make_events(75..80));
        engine.sync(STUDY, SyncMode::Incremental).unwrap();

        assert_eq!(engine.store().load_events(STUDY).unwrap(), make_events(0..80), "{format}");
        assert_eq!(engine.info(STUDY).unwrap().storage_format, format);
    }
}

#[test]
fn check_updates_compares_counts() {
    let (_dir, store) = temp_store(StorageFormat::Json);
    let engine = engine_with(ScriptedRemote::new(STUDY, make_events(0..40)), store, 100, 1);

    let check = engine.check_updates(STUDY).unwrap();
    assert!(check.has_updates);
    assert_eq!(check.new_events_available, 40);

    engine.sync(STUDY, SyncMode::Full).unwrap();
    assert!(!engine.check_updates(STUDY).unwrap().has_updates);

    engine.remote().push_events(make_events(40..47));
    let check = engine.check_updates(STUDY).unwrap();
    assert_eq!(check.new_events_available, 7);
    assert_eq!(check.local_total, 40);
}

#[test]
fn delete_study_removes_everything() {
    let (dir, store) = temp_store(StorageFormat::Csv);
    let engine = engine_with(ScriptedRemote::new(STUDY, make_events(0..10)), store, 100, 1);
    engine.sync(STUDY, SyncMode::Full).unwrap();
    assert_eq!(engine.list_local_studies().unwrap(), vec![STUDY.to_string()]);

    assert!(engine.delete_study(STUDY, false).unwrap());
    assert!(!dir.path().join(STUDY).exists());
    let info = engine.info(STUDY).unwrap();
    assert!(!info.has_data);
    assert_eq!(info.runs, 0);
    assert_eq!(engine.state(STUDY), SyncState::Idle);

    assert!(!engine.delete_study(STUDY, false).unwrap());

    std::fs::create_dir_all(dir.path().join("scratch")).unwrap();
    assert!(!engine.delete_study("scratch", false).unwrap());
    assert!(engine.delete_study("scratch", true).unwrap());
}

#[test]
fn invalid_study_name_is_a_config_error() {
    let (_dir, store) = temp_store(StorageFormat::Json);
    let engine = engine_with(ScriptedRemote::new(STUDY, Vec::new()), store, 100, 1);
    assert!(matches!(
        engine.sync("Bad Name", SyncMode::Full),
        Err(SyncError::Config(_))
    ));
}

#[test]
fn remote_listing_and_connection() {
    let (_dir, store) = temp_store(StorageFormat::Json);
    let engine = engine_with(ScriptedRemote::new(STUDY, Vec::new()), store, 100, 1);

    let studies = engine.list_remote_studies().unwrap();
    assert_eq!(studies[0].name, STUDY);
    assert!(engine.test_connection(STUDY));
    assert!(!engine.test_connection("elsewhere"));
}

#[test]
fn empty_remote_sync_succeeds() {
    let (_dir, store) = temp_store(StorageFormat::Json);
    let engine = engine_with(ScriptedRemote::new(STUDY, Vec::new()), store, 100, 3);

    let report = engine.sync(STUDY, SyncMode::Full).unwrap();
    assert!(report.success);
    assert_eq!(report.pages_fetched, 1);
    let info = engine.info(STUDY).unwrap();
    assert!(!info.has_data);
    assert_eq!(info.metadata.unwrap().total_events, 0);
}

#[test]
fn sync_all_covers_listed_and_local_studies() {
    let (_dir, store) = temp_store(StorageFormat::Json);
    let engine = engine_with(ScriptedRemote::new(STUDY, make_events(0..120)), store, 50, 2);

    // The remote no longer serves this study, but its history is local.
    let report = engine.sync("retired", SyncMode::Full).unwrap();
    assert_eq!(report.outcome, Outcome::Failed);

    let mut updates: Vec<(String, u64)> = Vec::new();
    let results = engine
        .sync_all(
            SyncMode::Incremental,
            &mut |study: &str, p: Progress| updates.push((study.to_string(), p.pages_fetched_so_far)),
            &CancelToken::new(),
        )
        .unwrap();

    let names: Vec<_> = results.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, vec![STUDY, "retired"]);

    let demo = results[0].1.as_ref().unwrap();
    assert!(demo.success, "{}", demo.message);
    assert_eq!(demo.total_events, 120);

    let retired = results[1].1.as_ref().unwrap();
    assert!(!retired.success);
    assert!(matches!(retired.error, Some(SyncError::RemoteNotFound(_))));

    assert_eq!(
        updates,
        vec![(STUDY.to_string(), 1), (STUDY.to_string(), 2), (STUDY.to_string(), 3)]
    );
    assert_eq!(engine.history("retired").unwrap().len(), 2);
}

#[test]
fn sync_all_stops_when_cancelled() {
    let (_dir, store) = temp_store(StorageFormat::Json);
    let engine = engine_with(ScriptedRemote::new(STUDY, make_events(0..10)), store, 50, 1);

    let cancel = CancelToken::new();
    cancel.cancel();
    let results = engine
        .sync_all(SyncMode::Full, &mut |_: &str, _: Progress| {}, &cancel)
        .unwrap();
    assert!(results.is_empty());
    assert!(engine.history(STUDY).unwrap().is_empty());
}
