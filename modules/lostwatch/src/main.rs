use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use feed_client::FeedClient;
use lostwatch::{
    notify::{backend::NotifyBackend, noop::NoopBackend, slack::SlackWebhook},
    rank_cache::CachedRankAuthority,
    sources::{PlatformFeed, PlatformRanks, PlatformResolver},
    store::PgStore,
    traits::RankAuthority,
    types::RunResult,
    watcher::{WatchDeps, Watcher},
};
use lostwatch_common::{Config, RankTag};

/// Exit status asking the scheduler to try again later (EX_TEMPFAIL).
const EXIT_RETRY: u8 = 75;

/// Exit status for a run cut short by SIGINT.
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser)]
#[command(name = "lostwatch")]
#[command(about = "Detect new posts that drop out of the recent actions feed")]
#[command(version)]
struct Cli {
    /// Feed locale (overrides FEED_LOCALE)
    #[arg(long, global = true)]
    locale: Option<String>,

    /// Minimum author rank to track (overrides MIN_RANK)
    #[arg(long, global = true)]
    min_rank: Option<RankTag>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one watch invocation and exit
    Run,

    /// Run on a fixed interval until interrupted
    Watch,

    /// List current suspects
    Suspects,

    /// List current lost posts
    Lost,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("lostwatch=info".parse()?))
        .init();

    let cli = Cli::parse();

    let config = Config::from_env()?;
    config.log_redacted();
    let locale = cli.locale.unwrap_or_else(|| config.locale.clone());
    let threshold = cli.min_rank.unwrap_or(config.min_rank);

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let store = Arc::new(PgStore::new(pool));
    store.migrate().await?;

    let watcher = Watcher::new(build_deps(&config, store));

    match cli.command {
        Commands::Run => {
            info!(locale = %locale, threshold = %threshold, "Lost post watch starting");
            match watcher.run_until(&locale, threshold, interrupted()).await {
                Some(result) => Ok(exit_code(&result)),
                None => Ok(ExitCode::from(EXIT_INTERRUPTED)),
            }
        }
        Commands::Watch => {
            watch(&watcher, &locale, threshold, config.run_interval()).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Suspects => {
            for record in watcher.suspects().await? {
                println!("{}", serde_json::to_string(&record)?);
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Lost => {
            for record in watcher.lost().await? {
                println!("{}", serde_json::to_string(&record)?);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn build_deps(config: &Config, store: Arc<PgStore>) -> WatchDeps {
    let primary = FeedClient::new(&config.feed_base_url);
    let mirror = config.feed_mirror_url.as_deref().map(FeedClient::new);

    // Build notification backend: Slack if configured, otherwise Noop
    let notifier: Arc<dyn NotifyBackend> = match &config.slack_webhook_url {
        Some(url) => {
            info!("Slack notifications enabled");
            Arc::new(SlackWebhook::new(url.clone(), post_url_base(&config.feed_base_url)))
        }
        None => {
            info!("No SLACK_WEBHOOK_URL set, notifications disabled");
            Arc::new(NoopBackend)
        }
    };

    let deps = WatchDeps::builder()
        .feed(Arc::new(PlatformFeed::new(primary.clone(), mirror)))
        .resolver(Arc::new(PlatformResolver::new(primary.clone())))
        .store(store.clone())
        .watermark(store)
        .notifier(notifier)
        .policy(config.window_policy())
        .detail_concurrency(config.detail_concurrency);

    if config.normalize_ranks {
        let ranks: Arc<dyn RankAuthority> = Arc::new(CachedRankAuthority::new(
            Arc::new(PlatformRanks::new(primary)),
            config.rank_cache_ttl(),
        ));
        deps.ranks(ranks).build()
    } else {
        deps.build()
    }
}

/// Scheduled loop. Each run is awaited before the next tick; ticks missed
/// during a long run are skipped, not queued.
async fn watch(watcher: &Watcher, locale: &str, threshold: RankTag, every: Duration) -> Result<()> {
    info!(every_secs = every.as_secs(), "Watch loop starting");
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                return Ok(());
            }
        }

        match watcher.run_until(locale, threshold, interrupted()).await {
            Some(result) if !result.is_success() => {
                warn!(outcome = %result, "Run did not complete, next tick retries");
            }
            Some(_) => {}
            None => return Ok(()),
        }
    }
}

/// Resolves on Ctrl-C. A failure to install the handler never resolves, so
/// the run is left to finish on its own.
async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

fn exit_code(result: &RunResult) -> ExitCode {
    match result {
        RunResult::Success(_) => ExitCode::SUCCESS,
        RunResult::Retry(_) => ExitCode::from(EXIT_RETRY),
        RunResult::Failure(_) => ExitCode::from(1),
    }
}

/// `https://codeforces.com/api` → `https://codeforces.com/blog/entry/`
fn post_url_base(api_base: &str) -> String {
    let site = api_base.trim_end_matches('/').trim_end_matches("/api");
    format!("{site}/blog/entry/")
}
