use anyhow::Context;
use clap::Parser;
use forge_client::{
    Credentials, ForgeClient, OctocrabClient, RotatingCredentials, TokenResolver,
};
use log::{debug, error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use sync_bot::dispatcher::Dispatcher;
use sync_bot::events::{self, Delivery};
use sync_bot::git::GitClient;
use sync_bot::logger;
use sync_bot::retry::RetryPolicy;
use sync_bot_config::BotConfig;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinSet;

/// Replays pull requests onto other branches on `/sync` request
///
/// Reads webhook deliveries from stdin, one JSON object per line:
/// `{"event": "<X-GitHub-Event>", "payload": {...}}`.
#[derive(Parser, Debug)]
#[command(name = "sync-bot")]
#[command(version, about)]
struct Cli {
    /// Config file (default: ./.sync-bot.toml, then ~/.sync-bot.toml)
    #[arg(long, value_name = "FILE", env = "SYNC_BOT_CONFIG")]
    config: Option<PathBuf>,

    /// Directory for cached working copies
    #[arg(long, value_name = "DIR")]
    cache_root: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace), overrides the config
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Missing .env is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let mut config = BotConfig::load(cli.config.as_deref()).context("Failed to load config")?;
    if let Some(root) = cli.cache_root {
        config.cache_root = Some(root);
    }
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }

    logger::init(&config.log_level);
    info!("Starting sync-bot for {}", config.forge_host);

    let dispatcher = build_dispatcher(config).await?;
    run(dispatcher).await;

    info!("Exiting sync-bot");
    Ok(())
}

async fn build_dispatcher(config: BotConfig) -> anyhow::Result<Arc<Dispatcher>> {
    let token = TokenResolver::new(config.token_file.clone())
        .resolve(&config.forge_host)
        .context("No forge token")?;

    let forge: Arc<dyn ForgeClient> = Arc::new(
        OctocrabClient::connect(config.api_base_url().as_deref(), token.clone())
            .context("Failed to create forge client")?,
    );
    let credentials = Arc::new(RotatingCredentials::new(Some(Credentials::new(
        config.bot_user.clone(),
        token,
    ))));

    let cache_root = config.cache_root()?;
    tokio::fs::create_dir_all(&cache_root)
        .await
        .with_context(|| format!("Failed to create {}", cache_root.display()))?;
    info!("Caching working copies in {}", cache_root.display());

    let mut git = GitClient::new(cache_root, config.git_base_url(), credentials)
        .with_large_repositories(config.large_repositories.clone())
        .with_retry_policy(RetryPolicy::from(config.git_retry));
    if let Some(email) = &config.bot_email {
        git = git.with_identity(config.bot_user.clone(), email.clone());
    }

    let dispatcher = Dispatcher::new(Arc::new(config), Arc::clone(&forge), Arc::new(git))
        .context("Failed to compile command patterns")?;
    Ok(Arc::new(dispatcher))
}

/// Handle deliveries from stdin until EOF, then wait for running handlers
/// and delayed comments
async fn run(dispatcher: Arc<Dispatcher>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut tasks = JoinSet::new();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("Reading stdin failed: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let delivery: Delivery = match serde_json::from_str(&line) {
            Ok(delivery) => delivery,
            Err(e) => {
                warn!("Skipping malformed delivery: {}", e);
                continue;
            }
        };

        let dispatcher = Arc::clone(&dispatcher);
        tasks.spawn(async move { handle_delivery(&dispatcher, delivery).await });

        // Reap finished handlers so the set does not grow without bound
        while let Some(done) = tasks.try_join_next() {
            if let Err(e) = done {
                error!("Delivery handler panicked: {}", e);
            }
        }
    }

    if !tasks.is_empty() {
        info!("Waiting for {} running deliveries", tasks.len());
    }
    while let Some(done) = tasks.join_next().await {
        if let Err(e) = done {
            error!("Delivery handler panicked: {}", e);
        }
    }
    dispatcher.shutdown().await;
}

async fn handle_delivery(dispatcher: &Dispatcher, delivery: Delivery) {
    let id = delivery.id.clone().unwrap_or_else(|| "-".to_string());
    debug!("Delivery {} ({})", id, delivery.event);

    let decoded = match events::decode(&delivery) {
        Ok(decoded) => decoded,
        Err(e) => {
            warn!("Delivery {}: cannot decode {} payload: {}", id, delivery.event, e);
            return;
        }
    };

    match events::resolve(decoded, dispatcher.forge()).await {
        Ok(Some(event)) => dispatcher.handle(event).await,
        Ok(None) => debug!("Delivery {}: nothing to do", id),
        Err(e) => error!("Delivery {}: {:#}", id, e),
    }
}
