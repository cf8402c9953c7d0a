use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};

use saucer::backend::ascii2d::Ascii2d;
use saucer::backend::iqdb::Iqdb;
use saucer::backend::saucenao::SauceNao;
use saucer::backend::tracemoe::TraceMoe;
use saucer::cache::sqlite::SqliteCache;
use saucer::chain::{Backends, ProviderChain};
use saucer::config::{Config, KNOWN_KEYS, Settings};
use saucer::consts::default_db_path;
use saucer::engine::search::SearchEngine;
use saucer::engine::{Engine, ImageOutcome, SearchRequest};
use saucer::image::{ImageRef, Selector};
use saucer::quota::QuotaManager;
use saucer::quota::sqlite::SqliteQuota;
use saucer::requester::console::ConsoleRequester;

#[derive(Parser)]
#[command(name = "saucer", version, about = "Find where a picture came from.")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// SQLite database for cache, quota and settings (use :memory: for ephemeral)
    #[arg(short, long, global = true)]
    db: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Search one or more image URLs
    Search {
        /// Image URLs
        #[arg(required = true)]
        urls: Vec<String>,

        /// Backend selector: all, pixiv, danbooru, doujin, anime, ascii2d, iqdb
        #[arg(short, long, default_value = "all")]
        selector: Selector,

        /// User the quota is charged to
        #[arg(short, long, default_value = "cli")]
        user: String,

        /// Ignore cached results and search again
        #[arg(long, default_value_t = false)]
        purge: bool,

        /// SauceNAO API key
        #[arg(long, env = "SAUCENAO_API_KEY", hide_env_values = true)]
        saucenao_key: Option<String>,
    },
    /// Read or change persistent settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show how much of the search budget a user has spent
    Quota {
        #[arg(default_value = "cli")]
        user: String,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print a stored value
    Get { key: String },
    /// Store a value
    Set { key: String, value: String },
    /// Remove a stored value, falling back to the default
    Unset { key: String },
    /// Print every known key with its stored value
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();
    let db = resolve_db(cli.db)?;
    let config = Config::open(&db)?;

    match cli.command {
        Command::Search {
            urls,
            selector,
            user,
            purge,
            saucenao_key,
        } => handle_search(&db, &config, urls, selector, user, purge, saucenao_key).await,
        Command::Config { action } => handle_config(&config, action),
        Command::Quota { user } => {
            let settings = Settings::load(&config)?;
            let quota = QuotaManager::new(Arc::new(SqliteQuota::open(&db)?), settings.quota);
            if quota.is_privileged(&user) {
                println!("{user}: unlimited");
            } else {
                let used = quota.usage(&user).await?;
                println!("{user}: {used}/{} used", quota.limit());
            }
            Ok(())
        }
    }
}

/// Use the given path, or `~/.saucer/saucer.db` with its directory created.
fn resolve_db(db: Option<String>) -> anyhow::Result<String> {
    if let Some(db) = db {
        return Ok(db);
    }
    let path: PathBuf = default_db_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    path.to_str()
        .map(String::from)
        .context("database path is not valid UTF-8")
}

async fn handle_search(
    db: &str,
    config: &Config,
    urls: Vec<String>,
    selector: Selector,
    user: String,
    purge: bool,
    saucenao_key: Option<String>,
) -> anyhow::Result<()> {
    let settings = Settings::load(config)?;

    let cache = SqliteCache::open(db, settings.cache_ttl)?;
    let purged = cache.purge_expired()?;
    if purged > 0 {
        tracing::debug!(purged, "dropped expired cache entries");
    }
    let quota = QuotaManager::new(Arc::new(SqliteQuota::open(db)?), settings.quota);

    let backends = Backends {
        similarity: Arc::new(SauceNao::new(saucenao_key, settings.saucenao_min_similarity)?),
        feature: Arc::new(Ascii2d::new()?),
        perceptual: Arc::new(Iqdb::new(settings.iqdb_min_similarity)?),
        anime: Arc::new(TraceMoe::new()?),
    };
    let chain = ProviderChain::new(backends, settings.chain);
    let engine = SearchEngine::new(chain, Arc::new(cache), quota);

    let images: Vec<ImageRef> = urls.iter().map(|url| ImageRef::from_url(url)).collect();
    let outcomes = engine
        .search(SearchRequest {
            images: images.clone(),
            selector,
            requester: Arc::new(ConsoleRequester::new(user)),
            purge,
        })
        .await?;

    for (image, outcome) in images.iter().zip(&outcomes) {
        let label = match outcome {
            ImageOutcome::Cached => "cached",
            ImageOutcome::Searched { succeeded: true } => "found",
            ImageOutcome::Searched { succeeded: false } => "not found",
            ImageOutcome::Joined | ImageOutcome::AlreadyWaiting => "joined",
            ImageOutcome::QuotaDenied => "quota denied",
            ImageOutcome::Skipped => "skipped",
        };
        eprintln!("{label}: {}", image.url());
    }
    Ok(())
}

fn handle_config(config: &Config, action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            check_key(&key)?;
            match config.get(&key)? {
                Some(value) => println!("{value}"),
                None => println!("(unset)"),
            }
        }
        ConfigAction::Set { key, value } => {
            check_key(&key)?;
            let previous = config.get(&key)?;
            config.set(&key, &value)?;
            if let Err(err) = Settings::load(config) {
                match previous {
                    Some(old) => config.set(&key, &old)?,
                    None => config.remove(&key)?,
                }
                return Err(err);
            }
            println!("✓ {key} = {value}");
        }
        ConfigAction::Unset { key } => {
            check_key(&key)?;
            config.remove(&key)?;
            println!("✓ {key} unset");
        }
        ConfigAction::List => {
            for key in KNOWN_KEYS {
                let value = config.get(key)?.unwrap_or_else(|| "(unset)".to_string());
                println!("{key} = {value}");
            }
        }
    }
    Ok(())
}

fn check_key(key: &str) -> anyhow::Result<()> {
    if !KNOWN_KEYS.contains(&key) {
        bail!("unknown config key {key:?}; known keys: {}", KNOWN_KEYS.join(", "));
    }
    Ok(())
}
