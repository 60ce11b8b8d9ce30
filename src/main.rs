use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use refalert::config::Config;
use refalert::identity::IdentityResolver;
use refalert::notifier::Notifier;
use refalert::server::{self, AppState};
use refalert::sources::{HttpVoteSource, SourceEndpoints};
use refalert::store::Store;
use refalert::telegram::TelegramClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Load config
    let config_path = Path::new("refalert.toml");
    let (config, from_file) = if config_path.exists() {
        (Config::load(config_path)?, true)
    } else {
        (Config::from_env(), false)
    };

    // Initialize logging
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    if config.logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .init();
    }

    info!("refalert v{} starting", env!("CARGO_PKG_VERSION"));
    if !from_file {
        info!("no refalert.toml found, using env-only config");
    }
    config.require_secrets()?;
    if !config.has_subscan_key() {
        info!("no SUBSCAN_API_KEY set - Subscan skipped, Polkassembly only, no identity lookups");
    }

    let store = Arc::new(Store::open(Path::new(&config.db.path))?);

    let timeout = Duration::from_secs(config.poll.fetch_timeout_secs);
    let api_key = config.has_subscan_key().then(|| config.subscan.api_key.clone());

    let source = Arc::new(HttpVoteSource::new(timeout, api_key.clone())?.with_endpoints(
        SourceEndpoints {
            subscan_url: config.sources.subscan_url.clone(),
            polkassembly_url: config.sources.polkassembly_url.clone(),
        },
    ));
    let telegram = Arc::new(TelegramClient::new(
        &config.telegram.api_url,
        &config.telegram.token,
        timeout,
    )?);
    let identity = IdentityResolver::new(timeout, api_key)?;

    let notifier = Arc::new(Notifier::new(
        store.clone(),
        source.clone(),
        telegram.clone(),
        Some(identity),
        Duration::from_secs(config.poll.pass_deadline_secs),
    ));

    // Scheduled passes. The notifier's own guard keeps a slow pass from
    // overlapping a manual /run trigger.
    let scheduled = notifier.clone();
    let interval_secs = config.poll.interval_secs;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let summary = scheduled.run_pass().await;
            debug!(?summary, "scheduled pass finished");
        }
    });

    let state = AppState {
        store,
        notifier,
        telegram,
        source,
        webhook_secret: config.telegram.webhook_secret.clone(),
        has_telegram_token: !config.telegram.token.is_empty(),
        has_subscan_key: config.has_subscan_key(),
    };

    server::serve(state, &config.server.bind_addr).await
}
