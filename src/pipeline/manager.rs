//! The data manager.
//!
//! Single owner of the cached partitions. Reads are served from an in-memory
//! `Arc<Snapshot>` per language and never touch the network; a refresh builds
//! a new snapshot, persists it, and only then swaps the reference.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{AppError, FetchError, ParseError, RefreshError, Result};
use crate::models::{
    CharacterClass, CompiledSchema, Config, Language, QuestRewardRecord, SourceIdentity,
    SourceKind, SourceStatus, VendorRewardRecord,
};
use crate::pipeline::status::status_for;
use crate::pipeline::{
    DataStatus, MergeGuard, MergeGuardConfig, RefreshMode, RefreshStatus, SourceReport,
};
use crate::services::{Batch, Fetcher, HttpFetcher, Normalizer, TableParser, select_backend};
use crate::storage::{LocalStorage, Snapshot, SnapshotStorage};

type Inflight = HashMap<Language, watch::Receiver<Option<RefreshStatus>>>;

/// Orchestrates refreshes and serves cached reward data.
pub struct DataManager {
    config: Config,
    fetcher: Arc<dyn Fetcher>,
    parser: Box<dyn TableParser>,
    storage: Arc<dyn SnapshotStorage>,
    guard: MergeGuard,
    schemas: HashMap<String, CompiledSchema>,
    snapshots: RwLock<HashMap<Language, Arc<Snapshot>>>,
    inflight: Mutex<Inflight>,
    shutdown: watch::Sender<bool>,
}

impl DataManager {
    /// Create a manager from its collaborators. Nothing is loaded yet.
    pub fn new(
        config: Config,
        fetcher: Arc<dyn Fetcher>,
        parser: Box<dyn TableParser>,
        storage: Arc<dyn SnapshotStorage>,
    ) -> Result<Self> {
        config.validate()?;
        let schemas = config
            .schemas
            .iter()
            .map(|schema| Ok((schema.name.clone(), schema.compile()?)))
            .collect::<Result<HashMap<_, _>>>()?;

        Ok(Self {
            guard: MergeGuard::new(MergeGuardConfig::from(&config.cache)),
            config,
            fetcher,
            parser,
            storage,
            schemas,
            snapshots: RwLock::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
            shutdown: watch::channel(false).0,
        })
    }

    /// Build the default stack (HTTP fetcher, best parser, local storage under
    /// `base_dir`) and load every configured partition from disk.
    pub async fn open(config: Config, base_dir: &Path) -> Result<Self> {
        let storage = LocalStorage::new(config.cache_dir(base_dir));
        let fetcher = HttpFetcher::new(&config)?;
        let parser = select_backend()?;
        let manager = Self::new(config, Arc::new(fetcher), parser, Arc::new(storage))?;
        manager.load_all().await;
        Ok(manager)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Load every configured language from storage into memory.
    ///
    /// An unreadable partition is logged and left out, so the next refresh
    /// rebuilds it.
    pub async fn load_all(&self) {
        for language in self.config.languages() {
            match self.storage.load(&language).await {
                Ok(Some(snapshot)) => {
                    log::info!(
                        "[{}] Loaded {} quest and {} vendor records from cache",
                        language,
                        snapshot.records.quests.len(),
                        snapshot.records.vendors.len()
                    );
                    self.write_snapshots().insert(language, Arc::new(snapshot));
                }
                Ok(None) => log::info!("[{}] No cached data yet", language),
                Err(e) => log::error!("[{}] Ignoring unreadable cache: {}", language, e),
            }
        }
    }

    // ---------------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------------

    /// Current snapshot of a partition that has served data at least once.
    pub fn snapshot(&self, language: &Language) -> Result<Arc<Snapshot>> {
        self.read_snapshots()
            .get(language)
            .filter(|s| s.metadata.last_updated.is_some())
            .cloned()
            .ok_or_else(|| AppError::NoDataForLanguage(language.clone()))
    }

    pub fn get_quest_rewards(&self, language: &Language) -> Result<Vec<QuestRewardRecord>> {
        Ok(self.snapshot(language)?.records.quests.clone())
    }

    pub fn get_vendor_rewards(&self, language: &Language) -> Result<Vec<VendorRewardRecord>> {
        Ok(self.snapshot(language)?.records.vendors.clone())
    }

    /// Quests offering something to `class`, with rewards narrowed to that class.
    pub fn quest_rewards_for_class(
        &self,
        language: &Language,
        class: CharacterClass,
    ) -> Result<Vec<QuestRewardRecord>> {
        let snapshot = self.snapshot(language)?;
        Ok(snapshot
            .records
            .quests
            .iter()
            .filter(|quest| quest.applicable_classes.contains(class))
            .map(|quest| QuestRewardRecord {
                rewards: quest.rewards_for(class).cloned().collect(),
                ..quest.clone()
            })
            .filter(|quest| !quest.rewards.is_empty())
            .collect())
    }

    /// Vendor rewards purchasable by `class`.
    pub fn vendor_rewards_for_class(
        &self,
        language: &Language,
        class: CharacterClass,
    ) -> Result<Vec<VendorRewardRecord>> {
        let snapshot = self.snapshot(language)?;
        Ok(snapshot
            .records
            .vendors
            .iter()
            .filter(|vendor| vendor.requirements.classes.contains(class))
            .cloned()
            .collect())
    }

    /// Availability report for a language.
    pub fn data_status(&self, language: &Language) -> DataStatus {
        let now = Utc::now();
        let kinds = self.config.kinds_for(language);
        let snapshot = self
            .read_snapshots()
            .get(language)
            .cloned()
            .unwrap_or_else(|| Arc::new(Snapshot::never_fetched(kinds.iter().copied())));
        let meta = &snapshot.metadata;
        let record_count: usize = SourceKind::ALL
            .into_iter()
            .map(|kind| snapshot.records.count(kind))
            .sum();

        DataStatus {
            language: language.clone(),
            available: meta.last_updated.is_some() && record_count > 0,
            first_run: meta.last_updated.is_none(),
            age_hours: meta.age_hours(now),
            update_due: !self.is_fresh(&snapshot, &kinds),
            sources: kinds.iter().map(|k| (*k, meta.status(*k))).collect(),
            record_counts: kinds
                .iter()
                .map(|k| (*k, snapshot.records.count(*k)))
                .collect(),
        }
    }

    // ---------------------------------------------------------------------
    // Refresh
    // ---------------------------------------------------------------------

    /// Refresh one language. Never fails; the outcome is in the status.
    ///
    /// A second call for a language whose refresh is in flight waits for
    /// that refresh and returns its status with `coalesced` set.
    pub async fn refresh(&self, language: &Language, mode: RefreshMode) -> RefreshStatus {
        loop {
            match self.claim(language) {
                Role::Leader(tx) => {
                    let _entry = InflightEntry {
                        inflight: &self.inflight,
                        language,
                    };
                    let status = self.run_refresh(language, mode).await;
                    tx.send_replace(Some(status.clone()));
                    return status;
                }
                Role::Follower(mut rx) => {
                    log::info!("[{}] Joining refresh already in flight", language);
                    let joined = match rx.wait_for(Option::is_some).await {
                        Ok(status) => status.clone(),
                        // Leader was dropped, or the slot was held by a reset
                        Err(_) => None,
                    };
                    if let Some(mut status) = joined {
                        status.coalesced = true;
                        return status;
                    }
                }
            }
        }
    }

    /// Take the in-flight slot of a language, or get a handle on its holder.
    fn claim(&self, language: &Language) -> Role {
        let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        match inflight.get(language) {
            Some(rx) => Role::Follower(rx.clone()),
            None => {
                let (tx, rx) = watch::channel(None);
                inflight.insert(language.clone(), rx);
                Role::Leader(tx)
            }
        }
    }

    /// Run `refresh` on a background task.
    pub fn spawn_refresh(
        self: &Arc<Self>,
        language: Language,
        mode: RefreshMode,
    ) -> JoinHandle<RefreshStatus> {
        let manager = Arc::clone(self);
        tokio::spawn(async move { manager.refresh(&language, mode).await })
    }

    /// Refresh every configured language, at most `fetch.max_concurrent` at once.
    pub async fn refresh_all(&self, mode: RefreshMode) -> Vec<RefreshStatus> {
        let mut statuses: Vec<RefreshStatus> = stream::iter(self.config.languages())
            .map(|language| async move { self.refresh(&language, mode).await })
            .buffer_unordered(self.config.fetch.max_concurrent)
            .collect()
            .await;
        statuses.sort_by(|a, b| a.language.cmp(&b.language));
        statuses
    }

    /// Delete a partition from disk and memory.
    ///
    /// Waits for a refresh of the language that is in flight, and holds the
    /// language's slot while deleting, so no refresh started from the old
    /// snapshot can write it back. Refreshes requested meanwhile start over
    /// from the empty partition.
    pub async fn reset(&self, language: &Language) -> Result<()> {
        loop {
            match self.claim(language) {
                Role::Leader(_tx) => {
                    let _entry = InflightEntry {
                        inflight: &self.inflight,
                        language,
                    };
                    self.storage.remove(language).await?;
                    self.write_snapshots().remove(language);
                    log::info!("[{}] Cache reset", language);
                    return Ok(());
                }
                Role::Follower(mut rx) => {
                    log::info!("[{}] Waiting for in-flight refresh before reset", language);
                    // Returns once the holder has released the slot
                    while rx.changed().await.is_ok() {}
                }
            }
        }
    }

    /// Signal in-flight and future refreshes to stop before persisting.
    pub fn shutdown(&self) {
        log::info!("Shutting down data manager");
        self.shutdown.send_replace(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    async fn run_refresh(&self, language: &Language, mode: RefreshMode) -> RefreshStatus {
        let mut status = RefreshStatus::new(language);
        let kinds = self.config.kinds_for(language);
        if kinds.is_empty() {
            status.detail = Some(format!("no sources configured for {language}"));
            return status;
        }

        let current = self
            .read_snapshots()
            .get(language)
            .cloned()
            .unwrap_or_else(|| Arc::new(Snapshot::never_fetched(kinds.iter().copied())));

        if mode == RefreshMode::Incremental && self.is_fresh(&current, &kinds) {
            log::info!(
                "[{}] Cache is fresh ({:.1}h old), skipping refresh",
                language,
                current.metadata.age_hours(Utc::now()).unwrap_or_default()
            );
            status.skipped = true;
            status.sources = kinds
                .iter()
                .map(|kind| (*kind, unchanged(&current, *kind, None)))
                .collect();
            return status;
        }

        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow() {
            return cancelled(status, &current, &kinds);
        }

        let stop = async {
            let _ = shutdown.wait_for(|stop| *stop).await;
        };
        let (next, reports) = tokio::select! {
            _ = stop => {
                log::warn!("[{}] Refresh cancelled", language);
                return cancelled(status, &current, &kinds);
            }
            collected = self.collect(language, mode, &current, &kinds) => collected,
        };
        status.sources = reports;

        if *next == *current {
            log::info!("[{}] Snapshot unchanged, nothing to write", language);
            return status;
        }
        if self.is_shutting_down() {
            return cancelled(status, &current, &kinds);
        }

        match self.storage.save(language, &next).await {
            Ok(()) => {
                self.write_snapshots().insert(language.clone(), next);
                status.applied = status.sources.values().any(|s| s.applied);
            }
            Err(e) => {
                log::error!("[{}] Snapshot not saved, keeping previous data: {}", language, e);
                let err = RefreshError::Persistence(e.to_string());
                for (kind, report) in status.sources.iter_mut() {
                    *report = unchanged(&current, *kind, Some(err.to_string()));
                }
                status.detail = Some(err.to_string());
            }
        }
        status
    }

    /// Run every source of a language and build the snapshot to persist.
    async fn collect(
        &self,
        language: &Language,
        mode: RefreshMode,
        current: &Snapshot,
        kinds: &[SourceKind],
    ) -> (Arc<Snapshot>, BTreeMap<SourceKind, SourceReport>) {
        let mut next = current.clone();
        let mut reports = BTreeMap::new();
        let mut any_applied = false;

        for &kind in kinds {
            let previous = current.records.count(kind);
            match self.refresh_source(language, kind, previous, mode).await {
                Ok((batch, identity)) => {
                    let records = batch.len();
                    batch.apply_to(&mut next.records);
                    let meta = &mut next.metadata;
                    meta.source_status.insert(kind, SourceStatus::Ok);
                    meta.record_counts.insert(kind, records);
                    meta.sources.insert(kind, identity);
                    meta.last_error.remove(&kind);
                    any_applied = true;
                    reports.insert(
                        kind,
                        SourceReport {
                            status: SourceStatus::Ok,
                            records,
                            applied: true,
                            detail: None,
                        },
                    );
                }
                Err(error) => {
                    let source_status = status_for(&error);
                    if source_status == SourceStatus::Failed {
                        log::error!("[{}] {} source failed: {}", language, kind, error);
                    } else {
                        log::warn!("[{}] {} source kept stale: {}", language, kind, error);
                    }
                    next.metadata.source_status.insert(kind, source_status);
                    next.metadata.last_error.insert(kind, error.to_string());
                    reports.insert(
                        kind,
                        SourceReport {
                            status: source_status,
                            records: previous,
                            applied: false,
                            detail: Some(error.to_string()),
                        },
                    );
                }
            }
        }

        if any_applied {
            next.metadata.last_updated = Some(Utc::now());
        }
        (Arc::new(next), reports)
    }

    /// Fetch, parse, normalize and guard one source.
    async fn refresh_source(
        &self,
        language: &Language,
        kind: SourceKind,
        previous: usize,
        mode: RefreshMode,
    ) -> std::result::Result<(Batch, SourceIdentity), RefreshError> {
        let source = self
            .config
            .source(language, kind)
            .ok_or_else(|| FetchError::NotConfigured {
                kind: kind.to_string(),
                language: language.to_string(),
            })?;
        let schema = self
            .schemas
            .get(&source.schema)
            .ok_or_else(|| ParseError::NoMatchingTable {
                schema: source.schema.clone(),
            })?;

        let document = self.fetcher.fetch(kind, language).await?;
        let table = self.parser.parse(&document.body, schema)?;
        let (batch, report) =
            Normalizer::new(schema, &self.config.gem_colors, language).normalize(&table);

        if batch.is_empty() && previous == 0 {
            return Err(RefreshError::NoRecords {
                dropped: report.dropped,
            });
        }
        self.guard.validate(batch.len(), previous, mode)?;

        Ok((
            batch,
            SourceIdentity {
                url: document.url,
                schema: source.schema.clone(),
            },
        ))
    }

    fn is_fresh(&self, snapshot: &Snapshot, kinds: &[SourceKind]) -> bool {
        let hours = i64::try_from(self.config.cache.freshness_hours).unwrap_or(i64::MAX);
        let window = chrono::Duration::try_hours(hours).unwrap_or(chrono::Duration::MAX);
        kinds
            .iter()
            .all(|kind| snapshot.metadata.status(*kind) == SourceStatus::Ok)
            && snapshot.metadata.is_fresh(Utc::now(), window)
    }

    fn read_snapshots(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, HashMap<Language, Arc<Snapshot>>> {
        self.snapshots.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_snapshots(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<Language, Arc<Snapshot>>> {
        self.snapshots.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Report for a source whose cached records stay in place.
fn unchanged(current: &Snapshot, kind: SourceKind, detail: Option<String>) -> SourceReport {
    SourceReport {
        status: current.metadata.status(kind),
        records: current.records.count(kind),
        applied: false,
        detail,
    }
}

fn cancelled(mut status: RefreshStatus, current: &Snapshot, kinds: &[SourceKind]) -> RefreshStatus {
    let detail = AppError::ShuttingDown.to_string();
    status.sources = kinds
        .iter()
        .map(|kind| (*kind, unchanged(current, *kind, Some(detail.clone()))))
        .collect();
    status.applied = false;
    status.detail = Some(detail);
    status
}

enum Role {
    Leader(watch::Sender<Option<RefreshStatus>>),
    Follower(watch::Receiver<Option<RefreshStatus>>),
}

/// Removes a language from the in-flight map when its leader finishes or is dropped.
struct InflightEntry<'a> {
    inflight: &'a Mutex<Inflight>,
    language: &'a Language,
}

impl Drop for InflightEntry<'_> {
    fn drop(&mut self) {
        self.inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(self.language);
    }
}
