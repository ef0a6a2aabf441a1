//! Daemon command: wires the store, publishers, engine and dispatcher
//! together and runs until interrupted.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use miette::Result;
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crosspost_model::{Platform, RetryPolicy};
use crosspost_publisher::{
    AccountCredentials, FacebookPublisher, InstagramPublisher, LinkedinPublisher,
    PublisherRegistry,
};
use crosspost_scheduler::{
    Dispatcher, ExecutionEngine, MemoryPostStore, PostService, StaticAccounts,
};

/// Configuration for the daemon.
pub struct DaemonConfig {
    /// Optional JSON file of connected accounts; see [`AccountEntry`].
    pub accounts_file: Option<PathBuf>,
    /// Reconciliation sweep interval in seconds.
    pub sweep_interval: u64,
    /// Per-platform publish call timeout in seconds.
    pub publish_timeout: u64,
    /// Maximum retry backoff in seconds.
    pub max_backoff: u64,
    /// How long completed posts are retained, in days.
    pub retention_days: u32,
    /// Cleanup pass interval in seconds.
    pub cleanup_interval: u64,
}

/// One connected account in the accounts file.
#[derive(Debug, Deserialize)]
struct AccountEntry {
    owner_id: String,
    platform: Platform,
    account_id: String,
    access_token: String,
    #[serde(default = "default_active")]
    active: bool,
}

fn default_active() -> bool {
    true
}

async fn load_accounts(path: &PathBuf) -> Result<Arc<StaticAccounts>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| miette::miette!("failed to read accounts file {}: {}", path.display(), e))?;
    let entries: Vec<AccountEntry> = serde_json::from_str(&raw)
        .map_err(|e| miette::miette!("failed to parse accounts file: {}", e))?;

    let accounts = Arc::new(StaticAccounts::new());
    let mut loaded = 0usize;
    for entry in entries {
        accounts
            .connect(
                entry.owner_id.clone(),
                entry.platform,
                AccountCredentials::new(entry.account_id, entry.access_token),
            )
            .await;
        if !entry.active {
            accounts
                .set_active(&entry.owner_id, entry.platform, false)
                .await;
        }
        loaded += 1;
    }
    info!(loaded, "loaded connected accounts");
    Ok(accounts)
}

pub async fn run(config: DaemonConfig) -> Result<()> {
    info!("starting crosspost daemon");

    let accounts = match &config.accounts_file {
        Some(path) => load_accounts(path).await?,
        None => {
            warn!("no accounts file configured; every publish will require reconnection");
            Arc::new(StaticAccounts::new())
        }
    };

    let mut registry = PublisherRegistry::new();
    registry.register(Arc::new(FacebookPublisher::new()));
    registry.register(Arc::new(InstagramPublisher::new()));
    registry.register(Arc::new(LinkedinPublisher::new()));

    let store = Arc::new(MemoryPostStore::new());
    let engine = Arc::new(
        ExecutionEngine::new(store.clone(), Arc::new(registry), accounts)
            .with_retry_policy(RetryPolicy::new(config.max_backoff))
            .with_publish_timeout(Duration::from_secs(config.publish_timeout)),
    );
    let dispatcher = Arc::new(
        Dispatcher::new(engine.clone(), store.clone())
            .with_sweep_interval(Duration::from_secs(config.sweep_interval)),
    );
    let service = Arc::new(PostService::new(
        store.clone(),
        dispatcher.clone(),
        engine.clone(),
    ));

    // Re-arm timers for posts that were pending when we last stopped.
    dispatcher
        .load_pending()
        .await
        .map_err(|e| miette::miette!("failed to load pending posts: {}", e))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sweep_handle = tokio::spawn(Arc::clone(&dispatcher).run(shutdown_rx.clone()));

    let cleanup_handle = {
        let service = Arc::clone(&service);
        let mut shutdown = shutdown_rx;
        let retention = chrono::Duration::days(i64::from(config.retention_days));
        let interval = Duration::from_secs(config.cleanup_interval);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match service.cleanup_completed(retention).await {
                            Ok(deleted) => {
                                if deleted > 0 {
                                    info!(deleted, "cleanup pass removed completed posts");
                                }
                            }
                            Err(e) => error!(error = %e, "cleanup pass failed"),
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    };

    info!(
        sweep_interval = config.sweep_interval,
        retention_days = config.retention_days,
        "daemon running, press ctrl-c to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| miette::miette!("failed to listen for ctrl-c: {}", e))?;
    info!("shutdown requested");

    shutdown_tx
        .send(true)
        .map_err(|e| miette::miette!("failed to signal shutdown: {}", e))?;
    let _ = sweep_handle.await;
    let _ = cleanup_handle.await;

    info!("daemon stopped");
    Ok(())
}
