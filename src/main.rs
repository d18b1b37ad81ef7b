use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use linkwall::channels::{HttpFallbackSource, HttpMentionsSource, LiveSource, WsLiveSource};
use linkwall::config::{load_or_default, Config, SettingsStore};
use linkwall::feed::{now_ms, Feed, FeedOptions, Sources};
use linkwall::gateway::ApiServer;

const DEFAULT_CONFIG_PATH: &str = "linkwall.toml";

#[derive(Parser)]
#[command(name = "linkwall")]
#[command(about = "Wall of links shared in chat, merged from mentions, search and live streams")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the feed and its HTTP API
    Run,
    /// Validate configuration and settings, then exit
    Test,
    /// Show version
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Run);

    if let Commands::Version = command {
        println!("linkwall v{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config = load_or_default(&cli.config, cli.config == DEFAULT_CONFIG_PATH)
        .with_context(|| format!("Failed to load config from {}", cli.config))?;

    init_logging(&config.logging.level)?;

    config
        .validate()
        .with_context(|| "Configuration validation failed")?;

    match command {
        Commands::Run => run(config).await,
        Commands::Test => test_config(&config),
        Commands::Version => Ok(()),
    }
}

async fn run(config: Config) -> Result<()> {
    tracing::info!("Starting linkwall v{}", env!("CARGO_PKG_VERSION"));

    let store = SettingsStore::new(config.settings_path()?);
    let mut settings = store
        .load(now_ms())
        .with_context(|| format!("Failed to load settings from {}", store.path().display()))?;
    if settings.terms.is_empty() && !config.feed.initial_terms.is_empty() {
        settings.set_terms(&config.feed.initial_terms);
    }
    tracing::info!(terms = ?settings.terms, "Settings loaded from {}", store.path().display());

    let sources = build_sources(&config)?;
    let feed = Arc::new(Feed::new(
        sources,
        settings,
        Some(store),
        FeedOptions::from_config(&config),
    ));

    let api_server = ApiServer::new(config.api.bind.clone());
    let api_feed = Arc::clone(&feed);
    tokio::spawn(async move {
        if let Err(e) = api_server.start(api_feed).await {
            tracing::error!("API server error: {}", e);
        }
    });

    let start_feed = Arc::clone(&feed);
    tokio::spawn(async move {
        let status = start_feed.start().await;
        tracing::info!(?status, "Initial fetch finished");
    });

    wait_for_shutdown().await?;

    tracing::info!("Received shutdown signal, stopping feed...");
    feed.shutdown();

    Ok(())
}

fn build_sources(config: &Config) -> Result<Sources> {
    let mut sources = Sources::default();

    let mentions = &config.sources.mentions;
    if mentions.is_active() {
        let source = HttpMentionsSource::new(
            &mentions.base_url,
            &mentions.platform,
            &mentions.channel,
            Duration::from_secs(mentions.timeout_secs),
        )
        .with_context(|| "Failed to create mentions source")?;
        sources.mentions = Some(Arc::new(source));
    }

    let fallback = &config.sources.fallback;
    if fallback.is_active() {
        let source = HttpFallbackSource::new(
            &fallback.base_url,
            &fallback.platform,
            &fallback.channel,
            Duration::from_secs(fallback.timeout_secs),
        )
        .with_context(|| "Failed to create search source")?;
        sources.fallback = Some(Arc::new(source));
    }

    for live in &config.sources.live {
        let source = WsLiveSource::new(&live.name, &live.url, &live.platform, &live.channel)
            .with_reconnect_delay(Duration::from_secs(live.reconnect_secs));
        sources.live.push(Arc::new(source) as Arc<dyn LiveSource>);
    }

    tracing::info!(
        mentions = sources.mentions.is_some(),
        fallback = sources.fallback.is_some(),
        live = sources.live.len(),
        "Sources configured"
    );
    Ok(sources)
}

fn test_config(config: &Config) -> Result<()> {
    println!("Testing configuration...");
    println!("✓ Configuration is valid");

    build_sources(config)?;
    println!("✓ Sources can be constructed");

    let path = config.settings_path()?;
    let settings = SettingsStore::new(&path)
        .load(now_ms())
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    println!("✓ Settings are readable ({})", path.display());
    println!("  Terms: {}", settings.terms.join(", "));

    println!("\nConfiguration test completed successfully!");
    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .context("Failed to install SIGTERM handler")?;
    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .context("Failed to install SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        },
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT");
        },
        _ = signal::ctrl_c() => {
            tracing::info!("Received Ctrl+C");
        }
    }

    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    let filter = match level.to_lowercase().as_str() {
        "error" => tracing::Level::ERROR,
        "warn" => tracing::Level::WARN,
        "info" => tracing::Level::INFO,
        "debug" => tracing::Level::DEBUG,
        "trace" => tracing::Level::TRACE,
        _ => tracing::Level::INFO,
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter.to_string())),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .compact(),
        )
        .init();

    Ok(())
}
