use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chapterfeed::config::Config;
use chapterfeed::service::FeedService;
use chapterfeed::storage::{KvStore, MemoryStore, SqliteStore};
use chapterfeed::upstream::ContentType;

/// Get the config directory path (~/.config/chapterfeed/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("chapterfeed"))
}

#[derive(Parser, Debug)]
#[command(name = "chapterfeed", about = "Chapter-release feeds for ComicK titles")]
struct Args {
    /// Config file (default: ~/.config/chapterfeed/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Keep mappings and cached chapters in memory for this run only
    #[arg(long, global = true)]
    memory: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store a feed for the given title slugs and print its id
    Create {
        #[arg(long, default_value = "en")]
        lang: String,
        #[arg(required = true)]
        slugs: Vec<String>,
    },
    /// Show the titles and language behind a feed id
    Resolve { feed_id: String },
    /// Print the merged chapters of a stored feed
    Feed { feed_id: String },
    /// Print merged chapters for titles without storing a feed
    Custom {
        #[arg(long, default_value = "en")]
        lang: String,
        #[arg(required = true)]
        slugs: Vec<String>,
    },
    /// Print the latest chapters across all titles
    Recent {
        #[arg(long, default_value = "en")]
        lang: String,
        /// sfw or nsfw
        #[arg(long, default_value = "sfw")]
        content: ContentType,
        #[arg(long, default_value_t = 1)]
        page: u32,
    },
    /// Print the genre list
    Genres,
    /// List titles without a fresh chapter cache entry
    Status {
        #[arg(long, default_value = "en")]
        lang: String,
        #[arg(required = true)]
        slugs: Vec<String>,
    },
    /// Fill the chapter cache for a stored feed, or for explicit titles
    Warm {
        #[arg(conflicts_with = "slugs", required_unless_present = "slugs")]
        feed_id: Option<String>,
        #[arg(long = "slug")]
        slugs: Vec<String>,
        #[arg(long, default_value = "en")]
        lang: String,
    },
    /// Delete expired mappings and cache entries
    Purge,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("Failed to encode output")?;
    println!("{out}");
    Ok(())
}

fn open_store(args: &Args, config: &Config, config_dir: &Path) -> Result<Arc<dyn KvStore>> {
    if args.memory {
        tracing::debug!("Using in-memory store");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let db_path = config_dir.join(&config.database_path);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create database directory '{}'", parent.display()))?;
    }
    let db_path = db_path
        .to_str()
        .context("Database path contains invalid UTF-8")?
        .to_string();
    let store = SqliteStore::open(&db_path)
        .with_context(|| format!("Failed to open database '{db_path}'"))?;
    Ok(Arc::new(store))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path).context("Failed to load configuration")?;

    let store = open_store(&args, &config, &config_dir)?;
    let service = FeedService::from_config(&config, store)?;

    match args.command {
        Command::Create { lang, slugs } => {
            let feed_id = service.create_feed(&slugs, &lang).await?;
            println!("{feed_id}");
        }
        Command::Resolve { feed_id } => print_json(&service.resolve_feed(&feed_id).await?)?,
        Command::Feed { feed_id } => print_json(&service.feed_chapters(&feed_id).await?)?,
        Command::Custom { lang, slugs } => {
            print_json(&service.aggregated_chapters(&slugs, &lang).await?)?
        }
        Command::Recent {
            lang,
            content,
            page,
        } => print_json(&service.recent_chapters(&lang, content, page).await?)?,
        Command::Genres => print_json(service.genres().await.as_ref())?,
        Command::Status { lang, slugs } => {
            print_json(&service.check_cache_status(&slugs, &lang).await?)?
        }
        Command::Warm {
            feed_id,
            slugs,
            lang,
        } => {
            let report = match feed_id {
                Some(id) => service.warm_feed(&id).await?,
                None => service.warm(&slugs, &lang).await?,
            };
            print_json(&report)?;
        }
        Command::Purge => {
            let purged = service.purge_expired().await?;
            println!("Purged {purged} expired records");
        }
    }

    Ok(())
}
