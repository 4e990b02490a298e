//! Application configuration structures.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::{
    CharacterClass, ColumnRole, ColumnSpec, GemColor, Language, SourceKind, TableSchema,
};

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP behaviour of the fetch layer
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Cache location and refresh policy
    #[serde(default)]
    pub cache: CacheConfig,

    /// Upstream documents per (language, kind)
    #[serde(default = "defaults::sources")]
    pub sources: Vec<SourceConfig>,

    /// Table formats referenced by `sources`
    #[serde(default = "defaults::schemas")]
    pub schemas: Vec<TableSchema>,

    /// Keyword lists used to guess gem colours
    #[serde(default)]
    pub gem_colors: GemColorRules,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.fetch.user_agent.trim().is_empty() {
            return Err(AppError::validation("fetch.user_agent is empty"));
        }
        if self.fetch.timeout_secs == 0 {
            return Err(AppError::validation("fetch.timeout_secs must be > 0"));
        }
        if self.fetch.max_concurrent == 0 {
            return Err(AppError::validation("fetch.max_concurrent must be > 0"));
        }
        if self.cache.freshness_hours == 0 {
            return Err(AppError::validation("cache.freshness_hours must be > 0"));
        }
        if self.cache.min_viable_percent > 100 {
            return Err(AppError::validation(
                "cache.min_viable_percent must be in 0..=100",
            ));
        }
        if self.sources.is_empty() {
            return Err(AppError::validation("No sources defined"));
        }

        for schema in &self.schemas {
            schema.validate()?;
        }

        let mut seen = std::collections::HashSet::new();
        for source in &self.sources {
            url::Url::parse(&source.url)?;
            let schema = self.schema(&source.schema).ok_or_else(|| {
                AppError::config(format!(
                    "source {} {} references unknown schema '{}'",
                    source.language, source.kind, source.schema
                ))
            })?;
            if schema.kind != source.kind {
                return Err(AppError::config(format!(
                    "schema '{}' produces {} records but source {} is {}",
                    schema.name, schema.kind, source.language, source.kind
                )));
            }
            if !seen.insert((source.language.clone(), source.kind)) {
                return Err(AppError::config(format!(
                    "duplicate {} source for {}",
                    source.kind, source.language
                )));
            }
        }
        Ok(())
    }

    pub fn schema(&self, name: &str) -> Option<&TableSchema> {
        self.schemas.iter().find(|s| s.name == name)
    }

    pub fn source(&self, language: &Language, kind: SourceKind) -> Option<&SourceConfig> {
        self.sources
            .iter()
            .find(|s| &s.language == language && s.kind == kind)
    }

    /// Source kinds configured for a language, in `SourceKind` order.
    pub fn kinds_for(&self, language: &Language) -> Vec<SourceKind> {
        SourceKind::ALL
            .into_iter()
            .filter(|kind| self.source(language, *kind).is_some())
            .collect()
    }

    /// Every language with at least one source, sorted and deduplicated.
    pub fn languages(&self) -> Vec<Language> {
        let mut languages: Vec<Language> = self.sources.iter().map(|s| s.language.clone()).collect();
        languages.sort();
        languages.dedup();
        languages
    }

    /// Resolve the cache directory relative to a base directory.
    pub fn cache_dir(&self, base: &Path) -> PathBuf {
        base.join(&self.cache.dir)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fetch: FetchConfig::default(),
            cache: CacheConfig::default(),
            sources: defaults::sources(),
            schemas: defaults::schemas(),
            gem_colors: GemColorRules::default(),
        }
    }
}

/// HTTP client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Retries after a transient failure
    #[serde(default = "defaults::max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry; doubles per retry
    #[serde(default = "defaults::retry_backoff")]
    pub retry_backoff_ms: u64,

    /// Languages refreshed concurrently by `refresh_all`
    #[serde(default = "defaults::max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            max_retries: defaults::max_retries(),
            retry_backoff_ms: defaults::retry_backoff(),
            max_concurrent: defaults::max_concurrent(),
        }
    }
}

/// Cache location and merge policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Snapshot directory, relative to the storage directory
    #[serde(default = "defaults::cache_dir")]
    pub dir: String,

    /// Incremental refreshes skip the network within this window
    #[serde(default = "defaults::freshness_hours")]
    pub freshness_hours: u64,

    /// A new record set smaller than this share of the previous one is suspect
    #[serde(default = "defaults::min_viable_percent")]
    pub min_viable_percent: u8,

    /// Previous counts below this skip the proportional check
    #[serde(default = "defaults::min_baseline")]
    pub min_baseline: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: defaults::cache_dir(),
            freshness_hours: defaults::freshness_hours(),
            min_viable_percent: defaults::min_viable_percent(),
            min_baseline: defaults::min_baseline(),
        }
    }
}

/// One upstream document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub language: Language,
    pub kind: SourceKind,
    pub url: String,
    /// Name of the `[[schemas]]` entry used to parse it
    pub schema: String,
}

/// Keyword lists used to classify gem colours; red is checked first and
/// anything matching neither list is blue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GemColorRules {
    #[serde(default = "defaults::red_keywords")]
    pub red: Vec<String>,
    #[serde(default = "defaults::green_keywords")]
    pub green: Vec<String>,
}

impl Default for GemColorRules {
    fn default() -> Self {
        Self {
            red: defaults::red_keywords(),
            green: defaults::green_keywords(),
        }
    }
}

impl GemColorRules {
    /// Guess a gem's colour from its name. Unknown gems are blue.
    pub fn classify(&self, gem: &str) -> GemColor {
        let gem = gem.to_lowercase();
        let hit = |words: &[String]| words.iter().any(|w| gem.contains(&w.to_lowercase()));
        if hit(&self.red) {
            GemColor::Red
        } else if hit(&self.green) {
            GemColor::Green
        } else {
            GemColor::Blue
        }
    }
}

mod defaults {
    use super::*;

    // Fetch defaults
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; reward-cache/0.1)".into()
    }
    pub fn timeout() -> u64 {
        30
    }
    pub fn max_retries() -> u32 {
        1
    }
    pub fn retry_backoff() -> u64 {
        1000
    }
    pub fn max_concurrent() -> usize {
        2
    }

    // Cache defaults
    pub fn cache_dir() -> String {
        "data".into()
    }
    pub fn freshness_hours() -> u64 {
        7 * 24
    }
    pub fn min_viable_percent() -> u8 {
        50
    }
    pub fn min_baseline() -> usize {
        5
    }

    fn lang(code: &'static str) -> Language {
        Language::from_static(code)
    }

    // Source defaults
    const VENDOR_TABLE_URL: &str = "https://www.poewiki.net/wiki/List_of_vendor_rewards";

    pub fn sources() -> Vec<SourceConfig> {
        vec![
            SourceConfig {
                language: lang("en_US"),
                kind: SourceKind::Quest,
                url: "https://poedb.tw/us/QuestRewards".into(),
                schema: "poedb_quest_rewards".into(),
            },
            SourceConfig {
                language: lang("pt_BR"),
                kind: SourceKind::Quest,
                url: "https://poedb.tw/pt/QuestRewards".into(),
                schema: "poedb_quest_rewards".into(),
            },
            SourceConfig {
                language: lang("en_US"),
                kind: SourceKind::Vendor,
                url: VENDOR_TABLE_URL.into(),
                schema: "poewiki_vendor_rewards".into(),
            },
            // No localized vendor table exists; pt_BR serves the English one
            SourceConfig {
                language: lang("pt_BR"),
                kind: SourceKind::Vendor,
                url: VENDOR_TABLE_URL.into(),
                schema: "poewiki_vendor_rewards".into(),
            },
        ]
    }

    fn class_column(class: CharacterClass, headers: &[&str], position: usize) -> ColumnSpec {
        ColumnSpec {
            role: ColumnRole::Class,
            class: Some(class),
            headers: headers.iter().map(|h| h.to_string()).collect(),
            position: Some(position),
        }
    }

    fn class_headers(class: CharacterClass) -> &'static [&'static str] {
        match class {
            CharacterClass::Marauder => &["Marauder"],
            CharacterClass::Witch => &["Witch", "Bruxa"],
            CharacterClass::Scion => &["Scion"],
            CharacterClass::Ranger => &["Ranger"],
            CharacterClass::Duelist => &["Duelist", "Duelista"],
            CharacterClass::Shadow => &["Shadow", "Sombra"],
            CharacterClass::Templar => &["Templar", "Templário"],
        }
    }

    fn anchors() -> Vec<String> {
        CharacterClass::ALL
            .into_iter()
            .flat_map(|c| class_headers(c).iter().map(|h| h.to_string()))
            .collect()
    }

    // Schema defaults
    pub fn schemas() -> Vec<TableSchema> {
        use CharacterClass::*;

        let quest_order = [Marauder, Witch, Scion, Ranger, Duelist, Shadow, Templar];
        let vendor_order = [Witch, Shadow, Ranger, Duelist, Marauder, Templar, Scion];

        let mut quest_columns = vec![ColumnSpec {
            role: ColumnRole::Name,
            class: None,
            headers: vec!["Quest".into(), "Missão".into()],
            position: Some(0),
        }];
        quest_columns.extend(
            quest_order
                .iter()
                .enumerate()
                .map(|(i, c)| class_column(*c, class_headers(*c), i + 1)),
        );

        let mut vendor_columns = vec![
            ColumnSpec {
                role: ColumnRole::Name,
                class: None,
                headers: vec!["Quest".into(), "Missão".into()],
                position: Some(0),
            },
            ColumnSpec {
                role: ColumnRole::Act,
                class: None,
                headers: vec!["Act".into(), "Ato".into()],
                position: None,
            },
            ColumnSpec {
                role: ColumnRole::Level,
                class: None,
                headers: vec!["Level".into(), "Req. level".into(), "Nível".into()],
                position: None,
            },
        ];
        vendor_columns.extend(
            vendor_order
                .iter()
                .enumerate()
                .map(|(i, c)| class_column(*c, class_headers(*c), i + 1)),
        );

        vec![
            TableSchema {
                name: "poedb_quest_rewards".into(),
                kind: SourceKind::Quest,
                anchor_headers: anchors(),
                min_anchor_matches: 3,
                min_row_len: 8,
                columns: quest_columns,
                section_pattern: Some(r"(?i)^\s*(?:act|ato)\s*\d+\b".into()),
                act_pattern: r"(?i)\b(?:act|ato)\s*(\d+)".into(),
            },
            TableSchema {
                name: "poewiki_vendor_rewards".into(),
                kind: SourceKind::Vendor,
                anchor_headers: anchors(),
                min_anchor_matches: 3,
                min_row_len: 8,
                columns: vendor_columns,
                section_pattern: Some(r"(?i)^\s*(?:act|ato)\s*\d+\b".into()),
                act_pattern: r"(?i)\b(?:act|ato)\s*(\d+)".into(),
            },
        ]
    }

    // Gem colour defaults
    fn words(list: &[&str]) -> Vec<String> {
        list.iter().map(|w| w.to_string()).collect()
    }
    pub fn red_keywords() -> Vec<String> {
        words(&[
            "strike", "slam", "smite", "cleave", "sweep", "molten", "infernal", "heavy",
            "ground", "shield", "perforate", "ruthless", "melee", "fortify", "multistrike",
            "ancestral", "rage", "berserk", "intimidating", "brutality", "ignite", "combustion",
            "immolate", "concentrated", "added fire", "anger", "warcry", "leap", "vitality",
        ])
    }
    pub fn green_keywords() -> Vec<String> {
        words(&[
            "arrow", "shot", "bow", "projectile", "pierce", "fork", "chain", "split",
            "barrage", "rain", "tornado", "whirling", "flicker", "viper", "cobra", "poison",
            "toxic", "caustic", "puncture", "bleed", "lacerate", "blade", "spectral", "ethereal",
            "frost", "ice", "cold", "trap", "mine", "ballista", "mirage", "dash", "grace",
        ])
    }
}
