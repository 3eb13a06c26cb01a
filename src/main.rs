use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use feedsync::config::{default_config_dir, Config};
use feedsync::engine::FeedEngine;
use feedsync::storage::{Database, DatabaseError, FeedFilter, ReadStatus};
use feedsync::util::strip_control_chars;

#[derive(Parser, Debug)]
#[command(name = "feedsync", version, about = "Incremental RSS/Atom feed synchronizer")]
struct Args {
    /// Config file (default: ~/.config/feedsync/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Subscribe to every feed found at URL (a feed or an HTML page)
    Add { url: String },
    /// Unsubscribe from a feed and delete its articles
    Remove { feed_url: String },
    /// List subscriptions with unread counts
    Feeds {
        #[arg(long)]
        json: bool,
    },
    /// Refresh every feed once
    Refresh,
    /// Refresh on the configured interval until interrupted
    Watch,
    /// List articles, newest first
    Articles {
        /// Only articles of this feed
        #[arg(long, value_name = "URL")]
        feed: Option<String>,
        /// Hide articles already read
        #[arg(long)]
        hide_read: bool,
        #[arg(long, value_name = "N")]
        limit: Option<u32>,
        /// Mark the listed articles as read once the listing ends
        #[arg(long)]
        mark_seen: bool,
    },
    /// Mark every article (or every article of one feed) as read
    ReadAll {
        #[arg(long, value_name = "URL")]
        feed: Option<String>,
    },
    /// Search article titles and descriptions
    Search { term: String },
}

/// Creates the config directory restricted to the current user.
fn ensure_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700)) {
            tracing::warn!(
                path = %dir.display(),
                error = %e,
                "Failed to set directory permissions to 0700"
            );
        }
    }

    Ok(())
}

async fn open_engine(args: &Args) -> Result<(FeedEngine, Config)> {
    let (config_path, config_dir) = match &args.config {
        Some(path) => {
            let dir = path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            (path.clone(), dir)
        }
        None => {
            let dir = default_config_dir()
                .context("Neither XDG_CONFIG_HOME nor HOME is set; pass --config")?;
            (dir.join("config.toml"), dir)
        }
    };

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config: {}", config_path.display()))?;

    let db_path = config.database_path(&config_dir);
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        ensure_dir(parent)?;
    }
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;

    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            anyhow::bail!("Another feedsync process has the database locked; try again later")
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open database: {}", e)),
    };

    let engine = FeedEngine::from_config(db, &config).context("Failed to build HTTP client")?;
    Ok((engine, config))
}

async fn filter_for(engine: &FeedEngine, feed_url: Option<&str>) -> Result<FeedFilter> {
    match feed_url {
        None => Ok(FeedFilter::All),
        Some(url) => {
            let feed = engine
                .feed_by_url(url)
                .await?
                .with_context(|| format!("Not subscribed to {url}"))?;
            Ok(FeedFilter::Feed(feed.id))
        }
    }
}

async fn add(engine: &FeedEngine, url: &str) -> Result<()> {
    let feeds = engine
        .resolve_feeds(url)
        .await
        .with_context(|| format!("Failed to discover feeds at {url}"))?;

    if feeds.is_empty() {
        println!("No feeds found at {url}");
        return Ok(());
    }

    for feed in &feeds {
        match engine.add_feed(feed).await {
            Ok(stored) => println!("Subscribed: {} <{}>", strip_control_chars(&stored.name), stored.url),
            Err(DatabaseError::DuplicateFeed(url)) => println!("Already subscribed: {url}"),
            Err(e) => return Err(e).context("Failed to store feed"),
        }
    }
    Ok(())
}

async fn list_feeds(engine: &FeedEngine, json: bool) -> Result<()> {
    let counts = engine.unread_counts_by_feed().await?;

    if json {
        let rows: Vec<_> = counts
            .iter()
            .map(|(feed, unread)| serde_json::json!({ "feed": feed, "unread": unread }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if counts.is_empty() {
        println!("No subscriptions. Add one with: feedsync add <URL>");
    }
    for (feed, unread) in counts {
        println!("{:>5}  {}  <{}>", unread, strip_control_chars(&feed.name), feed.url);
    }
    Ok(())
}

/// Prints articles as one viewing session; with `mark_seen`, everything shown
/// goes grey and the session is finalized at the end.
async fn list_articles(
    engine: &FeedEngine,
    feed: Option<&str>,
    hide_read: bool,
    limit: Option<u32>,
    mark_seen: bool,
) -> Result<()> {
    let filter = filter_for(engine, feed).await?;
    let articles = engine.articles(filter, hide_read, limit).await?;
    let total = engine.article_count(filter, hide_read).await?;

    for article in &articles {
        let marker = match article.read_status {
            ReadStatus::Unread => '*',
            ReadStatus::Grey => '~',
            ReadStatus::Read => ' ',
        };
        println!(
            "{} {}  {}\n    {}",
            marker,
            article.publication_date.format("%Y-%m-%d %H:%M"),
            strip_control_chars(&article.title),
            article.link
        );
        if mark_seen {
            engine.mark_article_grey(article).await?;
        }
    }
    println!("{} of {} articles", articles.len(), total);

    if mark_seen {
        engine.finalize_grey_session().await?;
    }
    Ok(())
}

async fn watch(engine: &FeedEngine, interval: std::time::Duration) {
    let shutdown = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Interrupted, stopping"),
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await
            }
        }
    };
    engine.run_scheduled(interval, shutdown).await;
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let (engine, config) = open_engine(&args).await?;

    match args.command {
        Command::Add { url } => add(&engine, &url).await?,
        Command::Remove { feed_url } => {
            let feed = engine
                .feed_by_url(&feed_url)
                .await?
                .with_context(|| format!("Not subscribed to {feed_url}"))?;
            engine.remove_feed(&feed).await?;
            println!("Unsubscribed: {}", strip_control_chars(&feed.name));
        }
        Command::Feeds { json } => list_feeds(&engine, json).await?,
        Command::Refresh => {
            engine.refresh().await;
            list_feeds(&engine, false).await?;
        }
        Command::Watch => watch(&engine, config.refresh_interval()).await,
        Command::Articles {
            feed,
            hide_read,
            limit,
            mark_seen,
        } => list_articles(&engine, feed.as_deref(), hide_read, limit, mark_seen).await?,
        Command::ReadAll { feed } => {
            let filter = filter_for(&engine, feed.as_deref()).await?;
            let changed = engine.mark_all_read(filter).await?;
            println!("Marked {changed} articles as read");
        }
        Command::Search { term } => {
            for hit in engine.search_articles(&term).await? {
                println!(
                    "{}  [{}]  {}\n    {}",
                    hit.article.publication_date.format("%Y-%m-%d"),
                    strip_control_chars(&hit.feed_name),
                    strip_control_chars(&hit.article.title),
                    hit.article.link
                );
            }
        }
    }

    Ok(())
}
