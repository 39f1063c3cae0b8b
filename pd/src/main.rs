//! progressd - pipeline progress tracking daemon
//!
//! CLI entry point for the daemon lifecycle and the pull/push inspection
//! commands.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use tracing::{debug, info};

use progressd::cli::{Cli, Command, DaemonCommand, OutputFormat, get_log_path};
use progressd::client::{open_cache, watch_session, ConnectionState, WatchEvent};
use progressd::config::Config;
use progressd::daemon::DaemonManager;
use progressd::events::create_snapshot_bus;
use progressd::ipc::{self, ProgressClient};
use progressd::progress::{Phase, SessionSnapshot};
use progressd::server::ProgressServer;
use snapstore::SnapStore;

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    let log_path = get_log_path();
    if let Some(log_dir) = log_path.parent() {
        fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    }

    // Log level priority: CLI --log-level > config file > default (INFO)
    let level_str = cli_log_level.or(config_log_level);
    let level = if let Some(s) = level_str {
        match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        }
    } else {
        tracing::Level::INFO
    };

    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());

    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    config.validate()?;

    debug!("main: dispatching command");
    match cli.command {
        Command::Daemon { command } => match command {
            DaemonCommand::Start { foreground } => cmd_start(&config, foreground).await,
            DaemonCommand::Stop => cmd_stop().await,
            DaemonCommand::Status { format } => cmd_daemon_status(format).await,
            DaemonCommand::Ping => cmd_ping().await,
        },
        Command::Status { session_id, format } => cmd_status(&session_id, format).await,
        Command::Watch { session_id } => cmd_watch(&config, &session_id).await,
        Command::Delete { session_id } => cmd_delete(&session_id).await,
        Command::RunDaemon => run_daemon(&config).await,
    }
}

/// Start the daemon
async fn cmd_start(config: &Config, foreground: bool) -> Result<()> {
    let daemon = DaemonManager::new();

    if daemon.is_running() {
        if let Some(pid) = daemon.running_pid() {
            println!("progressd is already running (PID: {})", pid);
        } else {
            println!("progressd is already running");
        }
        return Ok(());
    }

    if foreground {
        println!("Running progressd in foreground. Press Ctrl+C to stop.");
        return run_daemon(config).await;
    }

    let pid = daemon.start()?;
    println!("progressd started (PID: {})", pid);
    Ok(())
}

/// Stop the daemon
///
/// Tries IPC shutdown first for graceful stop, falls back to SIGTERM if IPC fails.
async fn cmd_stop() -> Result<()> {
    let daemon = DaemonManager::new();

    if !daemon.is_running() {
        println!("progressd is not running");
        return Ok(());
    }

    let pid = daemon.running_pid();

    let client = ProgressClient::new();
    if client.socket_exists() {
        debug!("cmd_stop: trying IPC shutdown");
        match client.shutdown().await {
            Ok(()) => {
                // Wait for process to exit
                let mut attempts = 0;
                while daemon.is_running() && attempts < 50 {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    attempts += 1;
                }
                if !daemon.is_running() {
                    if let Some(pid) = pid {
                        println!("progressd stopped gracefully via IPC (was PID: {})", pid);
                    } else {
                        println!("progressd stopped gracefully via IPC");
                    }
                    return Ok(());
                }
                debug!("cmd_stop: IPC shutdown timed out, falling back to SIGTERM");
            }
            Err(e) => {
                debug!(error = %e, "cmd_stop: IPC shutdown failed, falling back to SIGTERM");
            }
        }
    }

    daemon.stop()?;
    if let Some(pid) = pid {
        println!("progressd stopped (was PID: {})", pid);
    } else {
        println!("progressd stopped");
    }
    Ok(())
}

/// Show daemon status
async fn cmd_daemon_status(format: OutputFormat) -> Result<()> {
    let daemon = DaemonManager::new();
    let status = daemon.status();

    match format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "running": status.running,
                "pid": status.pid,
                "pid_file": status.pid_file.display().to_string(),
                "version": daemon.read_version(),
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Text => {
            if status.running {
                let pid = status.pid.map(|p| p.to_string()).unwrap_or_default();
                println!("{} progressd is running (PID: {})", "●".green(), pid);
                if let Some(version) = daemon.read_version() {
                    println!("  version: {}", version);
                }
            } else {
                println!("{} progressd is not running", "●".red());
            }
        }
    }
    Ok(())
}

/// Ping the daemon
async fn cmd_ping() -> Result<()> {
    let client = ProgressClient::new();

    if !client.socket_exists() {
        println!("{} progressd socket not found - daemon not running?", "✗".red());
        return Ok(());
    }

    match client.ping().await {
        Ok(version) => {
            println!("{} progressd is alive (version: {})", "✓".green(), version);
            Ok(())
        }
        Err(e) => {
            println!("{} progressd did not respond: {}", "✗".red(), e);
            Ok(())
        }
    }
}

/// Pull and print the latest snapshot for a session
async fn cmd_status(session_id: &str, format: OutputFormat) -> Result<()> {
    let client = ProgressClient::new();
    let snapshot = client.get(session_id).await?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        OutputFormat::Text => {
            print_snapshot(&snapshot);
        }
    }
    Ok(())
}

/// Follow a session until it terminates
///
/// The recovery cache provides an instant last-known line before the stream
/// connects, and every received snapshot refreshes it so the next watch (or
/// another view) starts warm. A lost or silent stream degrades to polling
/// the pull endpoint rather than aborting the watch.
async fn cmd_watch(config: &Config, session_id: &str) -> Result<()> {
    let cache = open_cache(Path::new(&config.cache.dir), config.cache.enabled);
    if let Some(cached) = cache.load(session_id) {
        println!(
            "{:>3}% {} {} {}",
            cached.overall_percentage,
            cached.current_phase.as_str().cyan(),
            cached.status_message,
            "(cached)".dimmed()
        );
    }

    let client = ProgressClient::new();
    let idle_timeout = Duration::from_millis(config.push.heartbeat_interval_ms.saturating_mul(3));
    let poll_interval = Duration::from_millis(config.tracker.flush_interval_ms);

    watch_session(&client, session_id, idle_timeout, poll_interval, |event| match event {
        WatchEvent::Snapshot(snapshot) => {
            print_watch_line(&snapshot);
            cache.save(&snapshot);
        }
        WatchEvent::Heartbeat => {
            debug!("cmd_watch: heartbeat");
        }
        WatchEvent::Connection(ConnectionState::Disconnected) => {
            println!("{}", "(stream lost, polling for updates)".dimmed());
        }
        WatchEvent::Connection(_) => {}
    })
    .await?;
    Ok(())
}

fn print_watch_line(snapshot: &SessionSnapshot) {
    match snapshot.current_phase {
        Phase::Completed => println!("{} {}", "✓".green(), snapshot.status_message),
        Phase::Failed => {
            let message = snapshot
                .error
                .as_ref()
                .map(|e| e.message.clone())
                .unwrap_or_else(|| snapshot.status_message.clone());
            println!("{} {}", "✗".red(), message);
        }
        _ => println!(
            "{:>3}% {} {}",
            snapshot.overall_percentage,
            snapshot.current_phase.as_str().cyan(),
            snapshot.status_message
        ),
    }
}

/// Remove the stored snapshot for a session
async fn cmd_delete(session_id: &str) -> Result<()> {
    let client = ProgressClient::new();
    client.delete(session_id).await?;
    println!("Deleted snapshot for session {}", session_id);
    Ok(())
}

fn print_snapshot(snapshot: &SessionSnapshot) {
    println!("Session:  {}", snapshot.session_id.bold());
    println!("Phase:    {}", snapshot.current_phase.as_str().cyan());
    println!("Overall:  {}%", snapshot.overall_percentage);
    println!("Message:  {}", snapshot.status_message);
    println!("Updated:  {}", snapshot.last_update.to_rfc3339());

    if let Some(phases) = &snapshot.phases {
        println!("Phases:");
        for (name, progress) in phases {
            println!("  {:<20} {:>3}%  {:?}", name, progress.percentage, progress.status);
        }
    }

    if let Some(error) = &snapshot.error {
        println!("{}  [{}] {}", "Error:".red(), error.error_type, error.message);
    }
}

/// Run the daemon process (called by `daemon start` or `run-daemon`)
async fn run_daemon(config: &Config) -> Result<()> {
    info!("progressd starting");

    let daemon = DaemonManager::new();
    daemon.register_self()?;

    let store = Arc::new(SnapStore::open(&config.storage.snapstore_dir).context("Failed to open snapshot store")?);
    info!(dir = %config.storage.snapstore_dir, "Snapshot store opened");

    let bus = create_snapshot_bus();

    let (listener, socket_path) = ipc::create_listener()?;
    info!(?socket_path, "IPC socket listening");

    let heartbeat = Duration::from_millis(config.push.heartbeat_interval_ms);
    let server = ProgressServer::new(store, bus, heartbeat);

    let (shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);

    // Signal-driven graceful shutdown
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        let shutdown_tx = shutdown_tx.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = sigint.recv() => info!("SIGINT received"),
                _ = sigterm.recv() => info!("SIGTERM received"),
            }
            let _ = shutdown_tx.send(()).await;
        });
    }

    let result = server.run(listener, shutdown_rx).await;

    ipc::cleanup_socket(&socket_path);
    info!("progressd stopped");
    result
}
