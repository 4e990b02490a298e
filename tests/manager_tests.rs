//! End-to-end refresh behaviour of the data manager against fixture pages.

mod support;

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use reward_cache::error::{AppError, FetchError};
use reward_cache::models::{CharacterClass, SourceKind, SourceStatus};
use reward_cache::pipeline::RefreshMode;
use reward_cache::storage::{LocalStorage, SnapshotStorage};
use support::{FakeFetcher, FlakyStorage, age_partition, lang, manager, quest_page, vendor_page};

const FULL: RefreshMode = RefreshMode::ForceFull;
const INC: RefreshMode = RefreshMode::Incremental;

fn seeded_fetcher(quests: usize) -> Arc<FakeFetcher> {
    let fetcher = FakeFetcher::new();
    fetcher.serve(&lang("en_US"), SourceKind::Quest, quest_page(quests));
    fetcher.serve(&lang("en_US"), SourceKind::Vendor, vendor_page(6, 3));
    fetcher.serve(&lang("pt_BR"), SourceKind::Quest, quest_page(40));
    fetcher.serve(&lang("pt_BR"), SourceKind::Vendor, vendor_page(6, 3));
    fetcher
}

#[tokio::test]
async fn fifty_quests_then_truncated_source_is_rejected() {
    let dir = TempDir::new().unwrap();
    let storage = LocalStorage::new(dir.path());
    let en = lang("en_US");
    let fetcher = seeded_fetcher(50);

    let m = manager(Arc::clone(&fetcher), Arc::new(storage.clone())).await;
    let status = m.refresh(&en, FULL).await;
    assert!(status.applied, "{status:?}");
    assert_eq!(status.sources[&SourceKind::Quest].status, SourceStatus::Ok);

    let quests = m.get_quest_rewards(&en).unwrap();
    assert_eq!(quests.len(), 50);
    let meta = m.snapshot(&en).unwrap().metadata.clone();
    assert!(meta.last_updated.is_some());
    assert_eq!(meta.status(SourceKind::Quest), SourceStatus::Ok);
    assert_eq!(meta.count(SourceKind::Quest), 50);

    // A week later upstream serves a truncated table
    age_partition(&storage, &en, 24 * 7).await;
    fetcher.serve(&en, SourceKind::Quest, quest_page(2));
    let m = manager(Arc::clone(&fetcher), Arc::new(storage.clone())).await;

    let status = m.refresh(&en, INC).await;
    let quest = &status.sources[&SourceKind::Quest];
    assert_eq!(quest.status, SourceStatus::Stale);
    assert!(!quest.applied);
    assert_eq!(quest.records, 50);

    assert_eq!(m.get_quest_rewards(&en).unwrap(), quests);
    assert_eq!(
        m.snapshot(&en).unwrap().metadata.status(SourceKind::Quest),
        SourceStatus::Stale
    );
    let on_disk = storage.load(&en).await.unwrap().unwrap();
    assert_eq!(on_disk.records.quests, quests);
}

#[tokio::test]
async fn forced_refresh_accepts_a_smaller_table_but_never_an_empty_one() {
    let dir = TempDir::new().unwrap();
    let en = lang("en_US");
    let fetcher = seeded_fetcher(50);
    let m = manager(Arc::clone(&fetcher), Arc::new(LocalStorage::new(dir.path()))).await;
    m.refresh(&en, FULL).await;

    fetcher.serve(&en, SourceKind::Quest, quest_page(2));
    let status = m.refresh(&en, FULL).await;
    assert!(status.sources[&SourceKind::Quest].applied);
    assert_eq!(m.get_quest_rewards(&en).unwrap().len(), 2);

    // Table still there, every row unusable
    fetcher.serve(
        &en,
        SourceKind::Quest,
        quest_page(0).replace("</tbody>", "<tr><td></td><td>x</td><td></td><td></td><td></td><td></td><td></td><td></td></tr></tbody>"),
    );
    let status = m.refresh(&en, FULL).await;
    assert_eq!(status.sources[&SourceKind::Quest].status, SourceStatus::Stale);
    assert_eq!(m.get_quest_rewards(&en).unwrap().len(), 2);
}

#[tokio::test]
async fn incremental_refresh_of_fresh_cache_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let storage = LocalStorage::new(dir.path());
    let en = lang("en_US");
    let fetcher = seeded_fetcher(50);
    let m = manager(Arc::clone(&fetcher), Arc::new(storage.clone())).await;

    m.refresh(&en, INC).await;
    let first = std::fs::read(storage.path(&en)).unwrap();
    let calls = fetcher.calls();

    let status = m.refresh(&en, INC).await;
    assert!(status.skipped);
    assert!(!status.applied);
    assert_eq!(fetcher.calls(), calls, "fresh cache must not touch the network");
    assert_eq!(std::fs::read(storage.path(&en)).unwrap(), first);
}

#[tokio::test]
async fn forced_refresh_with_unchanged_upstream_keeps_records_and_keys() {
    let dir = TempDir::new().unwrap();
    let en = lang("en_US");
    let fetcher = seeded_fetcher(50);
    let m = manager(Arc::clone(&fetcher), Arc::new(LocalStorage::new(dir.path()))).await;

    m.refresh(&en, FULL).await;
    let before = m.snapshot(&en).unwrap();
    m.refresh(&en, FULL).await;
    let after = m.snapshot(&en).unwrap();

    assert_eq!(before.records, after.records);
    assert!(after.metadata.last_updated >= before.metadata.last_updated);
    let keys: Vec<_> = after.records.quests.iter().map(|q| q.quest_key.as_str()).collect();
    assert_eq!(keys[0], "act1/quest-0");
    assert_eq!(keys[49], "act10/quest-49");
}

#[tokio::test]
async fn refreshing_one_language_leaves_others_untouched() {
    let dir = TempDir::new().unwrap();
    let storage = LocalStorage::new(dir.path());
    let (en, pt) = (lang("en_US"), lang("pt_BR"));
    let fetcher = seeded_fetcher(50);
    let m = manager(Arc::clone(&fetcher), Arc::new(storage.clone())).await;

    m.refresh(&en, FULL).await;
    let en_before = m.snapshot(&en).unwrap();
    let en_file = std::fs::read(storage.path(&en)).unwrap();
    assert!(matches!(
        m.get_quest_rewards(&pt),
        Err(AppError::NoDataForLanguage(_))
    ));

    let status = m.refresh(&pt, FULL).await;
    assert!(status.applied);
    assert_eq!(m.get_quest_rewards(&pt).unwrap().len(), 40);
    assert_eq!(m.get_vendor_rewards(&pt).unwrap().len(), 18);

    assert_eq!(m.snapshot(&en).unwrap(), en_before);
    assert_eq!(std::fs::read(storage.path(&en)).unwrap(), en_file);
}

#[tokio::test]
async fn failed_save_keeps_previous_snapshot() {
    let dir = TempDir::new().unwrap();
    let storage = FlakyStorage::new(LocalStorage::new(dir.path()));
    let en = lang("en_US");
    let fetcher = seeded_fetcher(50);
    let m = manager(Arc::clone(&fetcher), storage.clone()).await;
    m.refresh(&en, FULL).await;

    fetcher.serve(&en, SourceKind::Quest, quest_page(60));
    storage.fail_saves(true);
    let status = m.refresh(&en, FULL).await;

    assert!(!status.applied);
    assert!(status.detail.as_deref().unwrap().contains("disk full"));
    assert_eq!(m.get_quest_rewards(&en).unwrap().len(), 50);
    let on_disk = storage.load(&en).await.unwrap().unwrap();
    assert_eq!(on_disk.records.quests.len(), 50);

    // No temp files left behind
    let leftovers = std::fs::read_dir(dir.path())
        .unwrap()
        .filter(|e| e.as_ref().unwrap().file_name().to_string_lossy().ends_with(".tmp"))
        .count();
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn concurrent_refreshes_are_coalesced() {
    let dir = TempDir::new().unwrap();
    let en = lang("en_US");
    let fetcher = seeded_fetcher(50);
    fetcher.set_delay(Duration::from_millis(100));
    let m = Arc::new(manager(Arc::clone(&fetcher), Arc::new(LocalStorage::new(dir.path()))).await);

    let first = m.spawn_refresh(en.clone(), FULL);
    tokio::time::sleep(Duration::from_millis(20)).await;
    let second = m.spawn_refresh(en.clone(), FULL);

    let (a, b) = (first.await.unwrap(), second.await.unwrap());
    assert!(!a.coalesced);
    assert!(b.coalesced);
    assert_eq!(a.sources, b.sources);
    // One fetch per source, not two
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test]
async fn waiting_refresh_takes_over_when_the_running_one_is_dropped() {
    let dir = TempDir::new().unwrap();
    let storage = LocalStorage::new(dir.path());
    let en = lang("en_US");
    let fetcher = seeded_fetcher(50);
    fetcher.set_delay(Duration::from_millis(200));
    let m = Arc::new(manager(Arc::clone(&fetcher), Arc::new(storage.clone())).await);

    let first = m.spawn_refresh(en.clone(), FULL);
    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = m.spawn_refresh(en.clone(), FULL);
    tokio::time::sleep(Duration::from_millis(50)).await;
    first.abort();
    assert!(first.await.unwrap_err().is_cancelled());

    let status = tokio::time::timeout(Duration::from_secs(5), second)
        .await
        .expect("waiting refresh should run on its own")
        .unwrap();
    assert!(!status.coalesced);
    assert!(status.applied, "{status:?}");
    // One fetch from the dropped refresh, two from the one that took over
    assert_eq!(fetcher.calls(), 3);

    let on_disk = storage.load(&en).await.unwrap().unwrap();
    assert_eq!(on_disk.records.quests.len(), 50);
    assert_eq!(m.get_quest_rewards(&en).unwrap().len(), 50);
}

#[tokio::test]
async fn reset_during_refresh_is_not_undone() {
    let dir = TempDir::new().unwrap();
    let storage = LocalStorage::new(dir.path());
    let en = lang("en_US");
    let fetcher = seeded_fetcher(50);
    let m = Arc::new(manager(Arc::clone(&fetcher), Arc::new(storage.clone())).await);
    m.refresh(&en, FULL).await;

    fetcher.fail(
        &en,
        SourceKind::Quest,
        FetchError::Unreachable {
            url: "https://fixtures.test".into(),
            message: "connection reset".into(),
        },
    );
    fetcher.set_delay(Duration::from_millis(150));
    let refresh = m.spawn_refresh(en.clone(), FULL);
    tokio::time::sleep(Duration::from_millis(50)).await;

    m.reset(&en).await.unwrap();
    let status = refresh.await.unwrap();
    assert!(!status.sources[&SourceKind::Quest].applied);

    assert!(storage.load(&en).await.unwrap().is_none());
    assert!(matches!(
        m.get_quest_rewards(&en),
        Err(AppError::NoDataForLanguage(_))
    ));

    // A refresh after the reset starts from an empty partition
    fetcher.serve(&en, SourceKind::Quest, quest_page(3));
    let status = m.refresh(&en, FULL).await;
    assert!(status.applied, "{status:?}");
    assert_eq!(m.get_quest_rewards(&en).unwrap().len(), 3);
}

#[tokio::test]
async fn shutdown_cancels_refresh_before_persisting() {
    let dir = TempDir::new().unwrap();
    let storage = LocalStorage::new(dir.path());
    let en = lang("en_US");
    let fetcher = seeded_fetcher(50);
    fetcher.hang();
    let m = Arc::new(manager(Arc::clone(&fetcher), Arc::new(storage.clone())).await);

    let handle = m.spawn_refresh(en.clone(), FULL);
    tokio::time::sleep(Duration::from_millis(50)).await;
    m.shutdown();

    let status = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("refresh should stop after shutdown")
        .unwrap();
    assert!(!status.applied);
    assert!(status.detail.is_some());
    assert!(storage.load(&en).await.unwrap().is_none());
}

#[tokio::test]
async fn network_failure_keeps_cache_and_marks_stale() {
    let dir = TempDir::new().unwrap();
    let storage = LocalStorage::new(dir.path());
    let en = lang("en_US");
    let fetcher = seeded_fetcher(50);
    let m = manager(Arc::clone(&fetcher), Arc::new(storage.clone())).await;
    m.refresh(&en, FULL).await;

    fetcher.fail(
        &en,
        SourceKind::Quest,
        FetchError::Unreachable {
            url: "https://fixtures.test".into(),
            message: "connection reset".into(),
        },
    );
    let status = m.refresh(&en, FULL).await;
    assert_eq!(status.sources[&SourceKind::Quest].status, SourceStatus::Stale);
    assert_eq!(status.sources[&SourceKind::Vendor].status, SourceStatus::Ok);
    assert_eq!(m.get_quest_rewards(&en).unwrap().len(), 50);

    let meta = m.snapshot(&en).unwrap().metadata.clone();
    assert!(meta.last_error[&SourceKind::Quest].contains("connection reset"));
    assert!(m.data_status(&en).update_due);
}

#[tokio::test]
async fn schema_drift_marks_source_failed() {
    let dir = TempDir::new().unwrap();
    let en = lang("en_US");
    let fetcher = seeded_fetcher(50);
    let m = manager(Arc::clone(&fetcher), Arc::new(LocalStorage::new(dir.path()))).await;
    m.refresh(&en, FULL).await;

    fetcher.serve(&en, SourceKind::Quest, "<html><body><p>We moved!</p></body></html>");
    let status = m.refresh(&en, FULL).await;
    let quest = &status.sources[&SourceKind::Quest];
    assert_eq!(quest.status, SourceStatus::Failed);
    assert!(quest.detail.as_deref().unwrap().contains("no table matching"));
    assert_eq!(m.get_quest_rewards(&en).unwrap().len(), 50);
}

#[tokio::test]
async fn failed_first_fetch_is_an_explicit_empty_state() {
    let dir = TempDir::new().unwrap();
    let en = lang("en_US");
    let fetcher = FakeFetcher::new();
    fetcher.fail(&en, SourceKind::Quest, FetchError::Timeout { url: "u".into() });
    fetcher.serve(&en, SourceKind::Vendor, "<html></html>");
    let m = manager(Arc::clone(&fetcher), Arc::new(LocalStorage::new(dir.path()))).await;

    let status = m.refresh(&en, INC).await;
    assert!(!status.sources.values().any(|s| s.applied));

    let data = m.data_status(&en);
    assert!(!data.available);
    assert!(data.first_run);
    assert!(data.update_due);
    assert_eq!(data.sources[&SourceKind::Vendor], SourceStatus::Failed);
    assert!(matches!(
        m.get_quest_rewards(&en),
        Err(AppError::NoDataForLanguage(_))
    ));
}

#[tokio::test]
async fn class_views_and_status() {
    let dir = TempDir::new().unwrap();
    let en = lang("en_US");
    let fetcher = seeded_fetcher(50);
    let m = manager(Arc::clone(&fetcher), Arc::new(LocalStorage::new(dir.path()))).await;
    m.refresh(&en, FULL).await;

    let witch = m.quest_rewards_for_class(&en, CharacterClass::Witch).unwrap();
    assert_eq!(witch.len(), 50);
    assert!(witch.iter().all(|q| q
        .rewards
        .iter()
        .all(|r| r.classes.contains(CharacterClass::Witch))));
    assert!(witch[0].rewards.iter().any(|r| r.gem == "Freezing Pulse"));

    // Vendor fixture: 6 quests x 3 rows, one gem per row
    assert_eq!(m.get_vendor_rewards(&en).unwrap().len(), 18);
    let shadow = m.vendor_rewards_for_class(&en, CharacterClass::Shadow).unwrap();
    assert_eq!(shadow.len(), 6);
    assert!(shadow.iter().all(|v| v.quest.starts_with("Vendor Quest")));

    let data = m.data_status(&en);
    assert!(data.available);
    assert!(!data.first_run);
    assert!(!data.update_due);
    assert_eq!(data.record_counts[&SourceKind::Quest], 50);
}

#[tokio::test]
async fn refresh_all_and_reset() {
    let dir = TempDir::new().unwrap();
    let storage = LocalStorage::new(dir.path());
    let (en, pt) = (lang("en_US"), lang("pt_BR"));
    let fetcher = seeded_fetcher(50);
    let m = manager(Arc::clone(&fetcher), Arc::new(storage.clone())).await;

    let statuses = m.refresh_all(FULL).await;
    assert_eq!(statuses.len(), 2);
    assert_eq!(statuses[0].language, en);
    assert!(statuses.iter().all(|s| s.is_ok()), "{statuses:?}");

    m.reset(&pt).await.unwrap();
    assert!(storage.load(&pt).await.unwrap().is_none());
    assert!(m.get_quest_rewards(&pt).is_err());
    assert_eq!(m.get_quest_rewards(&en).unwrap().len(), 50);
}

#[tokio::test]
async fn cache_survives_restart() {
    let dir = TempDir::new().unwrap();
    let en = lang("en_US");
    let fetcher = seeded_fetcher(50);
    let m = manager(Arc::clone(&fetcher), Arc::new(LocalStorage::new(dir.path()))).await;
    m.refresh(&en, FULL).await;
    let quests = m.get_quest_rewards(&en).unwrap();
    drop(m);

    let offline = FakeFetcher::new();
    let m = manager(offline, Arc::new(LocalStorage::new(dir.path()))).await;
    assert_eq!(m.get_quest_rewards(&en).unwrap(), quests);
}
