//! Shared fixtures for integration tests: generated reward pages, an
//! in-memory fetcher and a storage wrapper that can be made to fail.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use reward_cache::error::{AppError, FetchError, Result};
use reward_cache::models::{Config, Language, SourceKind};
use reward_cache::pipeline::DataManager;
use reward_cache::services::{Fetcher, RawDocument, select_backend};
use reward_cache::storage::{LocalStorage, Snapshot, SnapshotStorage};

pub const QUEST_CLASSES: [&str; 7] = [
    "Marauder", "Witch", "Scion", "Ranger", "Duelist", "Shadow", "Templar",
];

pub const VENDOR_CLASSES: [&str; 7] = [
    "Witch", "Shadow", "Ranger", "Duelist", "Marauder", "Templar", "Scion",
];

const GEMS: [&str; 7] = [
    "Ground Slam",
    "Freezing Pulse",
    "Spectral Throw",
    "Split Arrow",
    "Heavy Strike",
    "Viper Strike",
    "Rolling Magma",
];

pub fn lang(code: &str) -> Language {
    Language::new(code).unwrap()
}

/// Act of the `i`-th of `n` generated quests, spread over acts 1..=10.
pub fn act_of(i: usize, n: usize) -> usize {
    (i * 10 / n.max(1) + 1).min(10)
}

/// A poedb-style quest reward page with `n` quests grouped under act rows.
pub fn quest_page(n: usize) -> String {
    let mut html = String::from(
        "<!DOCTYPE html><html><head><title>Quest Rewards</title></head><body>\n\
         <table class=\"nav\"><tr><td><a href=\"/\">Home</a></td><td>Search</td></tr></table>\n\
         <table class=\"table\"><thead><tr><th>Quest</th>",
    );
    for class in QUEST_CLASSES {
        html.push_str(&format!("<th>{class}</th>"));
    }
    html.push_str("</tr></thead>\n<tbody>\n");

    let mut current_act = 0;
    for i in 0..n {
        let act = act_of(i, n);
        if act != current_act {
            html.push_str(&format!("<tr><td colspan=\"8\">Act {act}</td></tr>\n"));
            current_act = act;
        }
        html.push_str(&format!("<tr><td><a href=\"/q{i}\">Quest {i}</a></td>"));
        for (c, _) in QUEST_CLASSES.iter().enumerate() {
            html.push_str(&format!(
                "<td><a href=\"/g\">{}</a>&nbsp;<a href=\"/g\">{}</a></td>",
                GEMS[c],
                GEMS[(c + i) % GEMS.len()]
            ));
        }
        html.push_str("</tr>\n");
    }
    html.push_str("</tbody></table></body></html>\n");
    html
}

/// A poewiki-style vendor page: each quest spans `per_quest` rows and only
/// the first row carries the quest link.
pub fn vendor_page(quests: usize, per_quest: usize) -> String {
    let mut html = String::from("<html><body><table class=\"wikitable\">\n<tr><th>Quest</th><th>Act</th>");
    for class in VENDOR_CLASSES {
        html.push_str(&format!("<th>{class}</th>"));
    }
    html.push_str("</tr>\n");

    for q in 0..quests {
        for r in 0..per_quest {
            let quest_cell = if r == 0 {
                format!("<td><a href=\"/v{q}\">Vendor Quest {q}</a></td>")
            } else {
                "<td></td>".to_string()
            };
            html.push_str(&format!("<tr>{quest_cell}<td>{}</td>", q % 10 + 1));
            for (c, _) in VENDOR_CLASSES.iter().enumerate() {
                if c == r % 7 {
                    html.push_str(&format!("<td><a>Gem {q}-{r}</a></td>"));
                } else {
                    html.push_str("<td></td>");
                }
            }
            html.push_str("</tr>\n");
        }
    }
    html.push_str("</table></body></html>\n");
    html
}

/// In-memory fetcher whose documents can be swapped between refreshes.
#[derive(Default)]
pub struct FakeFetcher {
    documents: Mutex<HashMap<(Language, SourceKind), std::result::Result<String, FetchError>>>,
    calls: AtomicUsize,
    delay: Mutex<Option<Duration>>,
    hang: AtomicBool,
}

impl FakeFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn serve(&self, language: &Language, kind: SourceKind, body: impl Into<String>) {
        self.documents
            .lock()
            .unwrap()
            .insert((language.clone(), kind), Ok(body.into()));
    }

    pub fn fail(&self, language: &Language, kind: SourceKind, error: FetchError) {
        self.documents
            .lock()
            .unwrap()
            .insert((language.clone(), kind), Err(error));
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Make every fetch wait forever.
    pub fn hang(&self) {
        self.hang.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch(
        &self,
        kind: SourceKind,
        language: &Language,
    ) -> std::result::Result<RawDocument, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let url = format!("https://fixtures.test/{language}/{kind}");
        let entry = self
            .documents
            .lock()
            .unwrap()
            .get(&(language.clone(), kind))
            .cloned();
        match entry {
            Some(Ok(body)) => Ok(RawDocument { url, body }),
            Some(Err(e)) => Err(e),
            None => Err(FetchError::Status { url, status: 404 }),
        }
    }
}

/// Local storage whose saves can be made to fail.
pub struct FlakyStorage {
    pub inner: LocalStorage,
    fail_saves: AtomicBool,
}

impl FlakyStorage {
    pub fn new(inner: LocalStorage) -> Arc<Self> {
        Arc::new(Self {
            inner,
            fail_saves: AtomicBool::new(false),
        })
    }

    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl SnapshotStorage for FlakyStorage {
    async fn load(&self, language: &Language) -> Result<Option<Snapshot>> {
        self.inner.load(language).await
    }

    async fn save(&self, language: &Language, snapshot: &Snapshot) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            // Stage for real, then fail before promoting
            let staged = self.inner.stage(language, snapshot).await?;
            drop(staged);
            return Err(AppError::persistence(language, "disk full"));
        }
        self.inner.save(language, snapshot).await
    }

    async fn remove(&self, language: &Language) -> Result<()> {
        self.inner.remove(language).await
    }
}

/// Default config with a one-hour freshness window.
pub fn config() -> Config {
    let mut config = Config::default();
    config.cache.freshness_hours = 1;
    config
}

pub async fn manager(
    fetcher: Arc<FakeFetcher>,
    storage: Arc<dyn SnapshotStorage>,
) -> DataManager {
    let manager = DataManager::new(config(), fetcher, select_backend().unwrap(), storage).unwrap();
    manager.load_all().await;
    manager
}

/// Push a partition's `last_updated` into the past so incremental refreshes run.
pub async fn age_partition(storage: &LocalStorage, language: &Language, hours: i64) {
    let mut snapshot = storage.load(language).await.unwrap().unwrap();
    snapshot.metadata.last_updated = Some(Utc::now() - chrono::Duration::hours(hours));
    storage.save(language, &snapshot).await.unwrap();
}
