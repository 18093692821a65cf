//! saem-notify - Main entry point
//!
//! `serve` (the default) runs the daily digest trigger, the pairing poll and the
//! health endpoint until Ctrl+C or SIGTERM. The other subcommands run one
//! engine operation and print its result as JSON.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use saem_common::config::{LoggingConfig, RootFolderInitializer, RootFolderResolver, TomlConfig};
use saem_common::time::parse_calendar_date;
use serde::Serialize;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use saem_notify::engine::{DispatchPolicy, EngineContext, NotificationEngine, PhoneNormalizer};
use saem_notify::messaging::{BridgeClient, MessagingClient};
use saem_notify::repository::{Repositories, Roster};
use saem_notify::scheduler::{run_daily_digest_loop, run_pairing_poll, DailySchedule};
use saem_notify::{build_router, AppState};

/// Command-line arguments for saem-notify
#[derive(Parser, Debug)]
#[command(name = "saem-notify")]
#[command(about = "WhatsApp notifications for ensemble rehearsals and events")]
#[command(version)]
struct Args {
    /// Config file (default: ~/.config/saem/config.toml, then /etc/saem/config.toml)
    #[arg(short, long, env = "SAEM_CONFIG")]
    config: Option<PathBuf>,

    /// Root folder for the database and messaging session
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scheduler and health endpoint (default)
    Serve,
    /// Run the daily digest once
    Digest {
        /// Day to run for (YYYY-MM-DD), default today
        #[arg(long)]
        date: Option<String>,
    },
    /// Send assignment notices for one rehearsal or event
    Notify {
        #[command(subcommand)]
        target: NotifyTarget,
    },
    /// Send the test message to a phone number
    SendTest { phone: String },
    /// Show the messaging session state
    Status,
    /// Tear down the messaging session and start it again
    Reconnect,
    /// Show recent notification attempts
    Attempts {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Import musicians, rehearsals and events from a JSON roster
    Import { file: PathBuf },
}

#[derive(Subcommand, Debug)]
enum NotifyTarget {
    Rehearsal { id: String },
    Event { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logging settings come from the config file, so read it before tracing exists
    let loaded = TomlConfig::load_or_default(args.config.as_deref());
    let default_logging = LoggingConfig::default();
    init_tracing(
        loaded
            .as_ref()
            .map(|(config, _)| &config.logging)
            .unwrap_or(&default_logging),
    )?;

    info!(
        "Starting saem-notify v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let (mut config, source) = loaded.context("Failed to load configuration")?;
    match source {
        Some(path) => info!("Loaded config from {}", path.display()),
        None => warn!("No config file found, using built-in defaults"),
    }
    config.apply_env_overrides();

    let root_folder = RootFolderResolver::new(args.root_folder.clone(), &config).resolve();
    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .context("Failed to create root folder")?;
    info!("Root folder: {}", initializer.root().display());

    let repos = Repositories::open(&config.storage, &initializer)
        .await
        .context("Failed to open storage")?;

    if let Some(Command::Import { file }) = &args.command {
        let roster = Roster::load(file)
            .await
            .with_context(|| format!("Failed to read roster {}", file.display()))?;
        let summary = roster.import(&repos).await.context("Roster import failed")?;
        return print_json(&summary);
    }

    let client = Arc::new(
        BridgeClient::new(&config.messaging, initializer.session_dir(&config.messaging))
            .context("Failed to create messaging client")?,
    );
    let policy = DispatchPolicy::from_config(&config.messaging);
    let ctx = EngineContext::new(repos, client.clone(), policy)
        .with_phones(PhoneNormalizer::new(config.phone.country_prefix.as_str()));
    let engine = Arc::new(NotificationEngine::new(ctx));

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(engine, client, &config).await,
        Command::Digest { date } => {
            let report = match date {
                Some(date) => {
                    let day = parse_calendar_date(&date)?;
                    engine.run_daily_digest_on(day).await?
                }
                None => engine.run_daily_digest().await?,
            };
            print_json(&report)
        }
        Command::Notify { target } => {
            client.initialize().await;
            let outcome = match target {
                NotifyTarget::Rehearsal { id } => engine.notify_rehearsal(&id).await?,
                NotifyTarget::Event { id } => engine.notify_event(&id).await?,
            };
            print_json(&outcome)
        }
        Command::SendTest { phone } => {
            client.initialize().await;
            client.refresh().await;
            let sent = engine.send_test(&phone).await?;
            if !sent {
                anyhow::bail!("Test message to {} was not delivered", phone);
            }
            info!("Test message delivered");
            Ok(())
        }
        Command::Status => {
            client.initialize().await;
            print_json(&client.refresh().await)
        }
        Command::Reconnect => {
            if !engine.reconnect_transport().await {
                warn!("Messaging transport did not come back");
            }
            print_json(&engine.connection_status())
        }
        Command::Attempts { limit } => print_json(&engine.recent_attempts(limit).await?),
        Command::Import { .. } => Ok(()),
    }
}

async fn serve(
    engine: Arc<NotificationEngine>,
    client: Arc<BridgeClient>,
    config: &TomlConfig,
) -> Result<()> {
    let cancel = CancellationToken::new();

    if !client.initialize().await {
        warn!("WhatsApp bridge unreachable; the next digest will try again");
    }

    let mut tasks = Vec::new();

    if config.schedule.enabled {
        let schedule =
            DailySchedule::from_config(&config.schedule).context("Invalid digest schedule")?;
        tasks.push(tokio::spawn(run_daily_digest_loop(engine.clone(), schedule, cancel.clone())));
    } else {
        info!("Daily digest trigger disabled");
    }

    let poll_client: Arc<dyn MessagingClient> = client.clone();
    tasks.push(tokio::spawn(run_pairing_poll(
        poll_client,
        Duration::from_secs(config.messaging.pairing_poll_secs.max(1)),
        cancel.clone(),
    )));

    let app = build_router(AppState::new(engine));
    let addr = format!("{}:{}", config.http.host, config.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("saem-notify listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    cancel.cancel();
    for task in tasks {
        if let Err(e) = task.await {
            error!(error = %e, "Background task ended abnormally");
        }
    }

    info!("Shutdown complete");
    Ok(())
}

/// RUST_LOG wins over the configured level; a log file disables colors
fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));

    match &logging.file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
