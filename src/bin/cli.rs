//! Reward Cache CLI
//!
//! Refreshes the cache and prints cached reward data as JSON.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use reward_cache::{
    error::{AppError, Result},
    models::{CharacterClass, Config, Language},
    pipeline::{DataManager, RefreshMode, RefreshStatus},
};

/// Path of Exile quest and vendor reward cache
#[derive(Parser, Debug)]
#[command(
    name = "reward-cache",
    version,
    about = "Fetch and cache Path of Exile quest and vendor rewards"
)]
struct Cli {
    /// Path to storage directory containing config.toml and the cache
    #[arg(short, long, default_value = "storage")]
    storage_dir: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Refresh one language, or every configured language
    Refresh {
        #[arg(long)]
        lang: Option<Language>,

        /// Fetch even when the cache is fresh and accept large count drops
        #[arg(long)]
        force: bool,
    },

    /// Print cached quest rewards
    Quests {
        #[arg(long)]
        lang: Language,

        /// Only rewards available to this class
        #[arg(long)]
        class: Option<CharacterClass>,
    },

    /// Print cached vendor rewards
    Vendors {
        #[arg(long)]
        lang: Language,

        /// Only rewards purchasable by this class
        #[arg(long)]
        class: Option<CharacterClass>,
    },

    /// Show cache status per language
    Status {
        #[arg(long)]
        lang: Option<Language>,
    },

    /// Validate configuration files
    Validate,

    /// Delete the cached data of a language
    Reset {
        #[arg(long)]
        lang: Language,
    },
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn log_refresh(status: &RefreshStatus) {
    if status.skipped {
        log::info!("[{}] Up to date", status.language);
        return;
    }
    for (kind, report) in &status.sources {
        match &report.detail {
            Some(detail) => log::warn!(
                "[{}] {}: {:?} ({} records) - {}",
                status.language,
                kind,
                report.status,
                report.records,
                detail
            ),
            None => log::info!(
                "[{}] {}: {:?} ({} records)",
                status.language,
                kind,
                report.status,
                report.records
            ),
        }
    }
    if let Some(detail) = &status.detail {
        log::error!("[{}] {}", status.language, detail);
    }
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // Load configuration
    let config_path = cli.storage_dir.join("config.toml");
    let config = Config::load_or_default(&config_path);

    log::debug!("Loaded configuration from {}", config_path.display());

    if let Command::Validate = cli.command {
        log::info!("Validating configuration...");
        if let Err(e) = config.validate() {
            log::error!("Config validation failed: {}", e);
            return Err(e);
        }
        log::info!(
            "✓ Config OK ({} sources, {} schemas, languages: {})",
            config.sources.len(),
            config.schemas.len(),
            config
                .languages()
                .iter()
                .map(Language::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        );
        return Ok(());
    }

    let manager = Arc::new(DataManager::open(config, &cli.storage_dir).await?);

    match cli.command {
        Command::Refresh { lang, force } => {
            let mode = if force {
                RefreshMode::ForceFull
            } else {
                RefreshMode::Incremental
            };

            // Ctrl-C stops refreshes before anything is persisted
            let watcher = {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        manager.shutdown();
                    }
                })
            };

            let statuses = match lang {
                Some(lang) => vec![manager.refresh(&lang, mode).await],
                None => manager.refresh_all(mode).await,
            };
            watcher.abort();

            statuses.iter().for_each(log_refresh);
            let failed = statuses.iter().filter(|s| !s.is_ok()).count();
            if failed > 0 {
                log::warn!("{} of {} languages not fully refreshed", failed, statuses.len());
            }
        }

        Command::Quests { lang, class } => {
            let quests = match class {
                Some(class) => manager.quest_rewards_for_class(&lang, class)?,
                None => manager.get_quest_rewards(&lang)?,
            };
            print_json(&quests)?;
        }

        Command::Vendors { lang, class } => {
            let vendors = match class {
                Some(class) => manager.vendor_rewards_for_class(&lang, class)?,
                None => manager.get_vendor_rewards(&lang)?,
            };
            print_json(&vendors)?;
        }

        Command::Status { lang } => {
            let languages = match lang {
                Some(lang) => vec![lang],
                None => manager.config().languages(),
            };
            let statuses: Vec<_> = languages.iter().map(|l| manager.data_status(l)).collect();
            print_json(&statuses)?;
        }

        Command::Reset { lang } => {
            if manager.config().kinds_for(&lang).is_empty() {
                return Err(AppError::config(format!("{lang} is not a configured language")));
            }
            manager.reset(&lang).await?;
        }

        Command::Validate => {}
    }

    Ok(())
}
