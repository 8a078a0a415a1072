//! moldap-syncd - directory change poller and account discriminator
//!
//! - `poll`: watch every configured search base and announce changed
//!   entities on the event channel until interrupted
//! - `poll --once`: run one cycle per search base and print the reports
//! - `discriminate`: pick the authoritative account out of candidate DNs

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use moldap_events::{ChannelSink, EventError, EventSink};
use moldap_ldap::{LdapConnector, LdapError};
use moldap_sync::{
    ChangePoller, Discriminator, DiscriminatorError, EventEmitter, PgWatermarkStore,
    PollerManager, SyncError,
};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

mod config;
mod logging;

use config::AppConfig;

/// Capacity of the in-process event channel used without a broker.
const LOCAL_CHANNEL_CAPACITY: usize = 1024;

/// MO/LDAP synchronisation service
#[derive(Parser)]
#[command(name = "moldap-syncd")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the directory for changes and publish them
    Poll(PollArgs),

    /// Pick the authoritative account among candidate DNs
    Discriminate(DiscriminateArgs),
}

#[derive(Args)]
struct PollArgs {
    /// Run one cycle per search base, print the reports and exit
    #[arg(long)]
    once: bool,
}

#[derive(Args)]
struct DiscriminateArgs {
    /// Candidate account DN (repeatable)
    #[arg(long = "candidate", value_name = "DN", required = true)]
    candidates: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
enum AppError {
    #[error("database connection failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Directory(#[from] LdapError),

    #[error(transparent)]
    Event(#[from] EventError),

    #[error(transparent)]
    Discriminator(#[from] DiscriminatorError),

    #[error("failed to render output: {0}")]
    Output(#[from] serde_json::Error),

    #[error("healthcheck failed, dead scopes: {}", .0.join(", "))]
    Unhealthy(Vec<String>),
}

#[tokio::main]
async fn main() {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let config = match AppConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(1);
        }
    };

    logging::init_logging(&config.log_filter);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        ldap = %config.ldap.url(),
        scopes = config.search_bases.len(),
        error_policy = ?config.error_policy,
        "Starting moldap-sync"
    );

    let directory = match LdapConnector::new(config.ldap.clone()) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            eprintln!("LDAP configuration error: {e}");
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Poll(args) => run_poll(&config, Arc::clone(&directory), args).await,
        Commands::Discriminate(args) => {
            run_discriminate(&config, Arc::clone(&directory), args).await
        }
    };

    if let Err(e) = directory.dispose().await {
        warn!(error = %e, "Failed to close LDAP connection");
    }

    if let Err(e) = result {
        error!(error = %e, "moldap-sync exited with an error");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run_poll(
    config: &AppConfig,
    directory: Arc<LdapConnector>,
    args: PollArgs,
) -> Result<(), AppError> {
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&config.database_url)
        .await?;
    info!("Database connection established");

    let store = Arc::new(PgWatermarkStore::new(pool));
    store.run_migrations().await?;

    let (sink, drain) = build_sink(config)?;
    let poller = Arc::new(ChangePoller::new(directory, config.poller.clone()));
    let emitter = Arc::new(EventEmitter::new(sink, config.routing_key.clone()));
    let manager = PollerManager::new(store, poller, emitter, config.manager_settings());

    let result = if args.once {
        poll_once(&manager).await
    } else {
        manager.start().await?;
        let result = supervise(&manager, config.healthcheck_interval).await;
        manager.stop().await;
        result
    };

    // Dropping the manager closes the local channel so the drain task ends.
    drop(manager);
    if let Some(drain) = drain {
        if let Err(e) = drain.await {
            warn!(error = %e, "Event log task failed");
        }
    }

    result
}

async fn poll_once(manager: &PollerManager) -> Result<(), AppError> {
    for scope in manager.scopes() {
        let report = manager.poll_now(scope).await?;
        println!("{}", serde_json::to_string(&report)?);
    }
    Ok(())
}

/// Run until a shutdown signal, checking task health every `interval`.
///
/// A dead scope task ends the process so a supervisor can restart it.
async fn supervise(manager: &PollerManager, interval: Duration) -> Result<(), AppError> {
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            () = &mut shutdown => return Ok(()),
            _ = ticker.tick() => {
                if manager.is_healthy().await {
                    debug!("Healthcheck passed");
                } else {
                    let dead = manager.dead_scopes().await;
                    error!(dead_scopes = ?dead, "Healthcheck failed");
                    return Err(AppError::Unhealthy(dead));
                }
            }
        }
    }
}

/// Pick the event sink: Kafka when configured, otherwise a local channel
/// whose messages are logged.
fn build_sink(
    config: &AppConfig,
) -> Result<(Arc<dyn EventSink>, Option<JoinHandle<()>>), AppError> {
    match &config.kafka {
        #[cfg(feature = "kafka")]
        Some(kafka) => {
            let sink = moldap_events::KafkaSink::new(kafka.clone())?;
            info!(brokers = %kafka.bootstrap_servers, "Publishing change events to Kafka");
            return Ok((Arc::new(sink), None));
        }
        #[cfg(not(feature = "kafka"))]
        Some(_) => {
            warn!("KAFKA_BOOTSTRAP_SERVERS is set but Kafka support is not compiled in");
        }
        None => {}
    }

    warn!("No event broker configured, change events are only logged");
    let (sink, mut events) = ChannelSink::new(LOCAL_CHANNEL_CAPACITY);
    let drain = tokio::spawn(async move {
        while let Some(message) = events.recv().await {
            info!(
                routing_key = %message.routing_key,
                key = %message.key,
                "Change event"
            );
        }
    });
    Ok((Arc::new(sink), Some(drain)))
}

async fn run_discriminate(
    config: &AppConfig,
    directory: Arc<LdapConnector>,
    args: DiscriminateArgs,
) -> Result<(), AppError> {
    let discriminator = Discriminator::new(directory, &config.discriminator)?;
    let candidates: BTreeSet<String> = args.candidates.into_iter().collect();

    let winner = discriminator.resolve_candidates(&candidates).await?;
    match &winner {
        Some(dn) => info!(winner = %dn, candidates = candidates.len(), "Candidate selected"),
        None => info!(candidates = candidates.len(), "No candidate selected"),
    }

    println!("{}", serde_json::json!({ "winner": winner }));
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}
