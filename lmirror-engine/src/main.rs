//! LanguageMirror drill runner (lmirror-drill) - Main entry point
//!
//! Runs a practice set from the command line over the simulated transport,
//! logging every practice event. Also lists recent sessions and shows or
//! changes the practice settings.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use lmirror_common::config::TomlConfig;
use lmirror_common::events::{EventBus, PracticeEvent, StopReason};
use lmirror_common::models::{PracticeSet, SessionKey, Track};
use lmirror_engine::config::{Config, ConfigOverrides};
use lmirror_engine::db::settings;
use lmirror_engine::session_store::{MemorySessionStore, SessionStore, SqliteSessionStore};
use lmirror_engine::transport::SimulatedTransport;
use lmirror_engine::{PlaybackScheduler, SchedulerHandle, StartRequest};
use serde::Deserialize;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for lmirror-drill
#[derive(Parser, Debug)]
#[command(name = "lmirror-drill")]
#[command(about = "Clip-based listening drills for LanguageMirror")]
#[command(version)]
struct Cli {
    /// TOML bootstrap file (default: ~/.config/lmirror/config.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Root folder containing the packs' audio files
    #[arg(short, long, global = true)]
    root_folder: Option<PathBuf>,

    /// SQLite database file
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Drill a practice set until it finishes or Ctrl+C
    Practice(PracticeArgs),

    /// List recently practiced tracks
    Recent {
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },

    /// Show practice settings, or change one with `--set KEY VALUE`
    Settings {
        #[arg(long, num_args = 2, value_names = ["KEY", "VALUE"])]
        set: Option<Vec<String>>,
    },
}

#[derive(Args, Debug)]
struct PracticeArgs {
    /// JSON file with `track` and `practice_set`
    bundle: PathBuf,

    /// Continue the latest saved session for this practice set
    #[arg(long)]
    resume: bool,

    /// Wrap to the first drill clip instead of finishing
    #[arg(long)]
    forever: bool,

    /// Keep progress in memory only
    #[arg(long)]
    no_persist: bool,

    /// Do not require the audio file to exist under the root folder
    #[arg(long)]
    no_file_check: bool,
}

/// Input file for the `practice` subcommand
#[derive(Debug, Deserialize)]
struct PracticeBundle {
    track: Track,
    practice_set: PracticeSet,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let toml_config =
        TomlConfig::load_or_default(cli.config.as_deref()).context("Failed to read config file")?;

    // Initialize tracing
    let default_filter = format!(
        "lmirror_engine={level},lmirror_common={level}",
        level = toml_config.logging.level
    );
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let overrides = ConfigOverrides {
        config_file: cli.config.clone(),
        database_path: cli.database.clone(),
        root_folder: cli.root_folder.clone(),
    };
    let config = Config::from_toml(toml_config, overrides)
        .await
        .context("Failed to load configuration")?;

    match cli.command {
        Command::Practice(args) => practice(&config, args).await,
        Command::Recent { limit } => recent(&config, limit).await,
        Command::Settings { set } => show_or_update_settings(&config, set).await,
    }
}

async fn practice(config: &Config, args: PracticeArgs) -> Result<()> {
    let content = tokio::fs::read_to_string(&args.bundle)
        .await
        .with_context(|| format!("Failed to read {}", args.bundle.display()))?;
    let bundle: PracticeBundle =
        serde_json::from_str(&content).context("Failed to parse practice bundle")?;

    if bundle.practice_set.track_id != bundle.track.id {
        bail!(
            "Practice set {} belongs to track {}, not {}",
            bundle.practice_set.id,
            bundle.practice_set.track_id,
            bundle.track.id
        );
    }

    let store: Arc<dyn SessionStore> = if args.no_persist {
        Arc::new(MemorySessionStore::new())
    } else {
        Arc::new(SqliteSessionStore::new(config.db_pool.clone()))
    };

    let key = SessionKey::new(
        bundle.track.pack_id.clone(),
        bundle.track.id.clone(),
        bundle.practice_set.id.clone(),
    );
    let resume = if args.resume {
        let session = store.load(&key).await.context("Failed to load saved session")?;
        if session.is_none() {
            info!(key = %key, "No saved session, starting fresh");
        }
        session
    } else {
        None
    };

    let transport_root = if args.no_file_check {
        None
    } else {
        Some(config.root_folder.clone())
    };
    let (transport, transport_events) =
        SimulatedTransport::new(transport_root, config.runtime.time_update_interval());
    let bus = EventBus::new(config.runtime.event_bus_capacity);
    let scheduler = PlaybackScheduler::new(transport, store, bus);
    let (handle, task) = SchedulerHandle::spawn(scheduler, transport_events);

    let mut events = handle.subscribe();
    let session_id = handle
        .start(StartRequest {
            track: bundle.track,
            practice_set_id: bundle.practice_set.id,
            clips: bundle.practice_set.clips,
            config: config.runtime.practice.clone(),
            resume,
            forever_mode: args.forever,
        })
        .await
        .context("Failed to start practice run")?;
    info!(%session_id, "Practice run started");

    let reason = tokio::select! {
        reason = watch_events(&mut events) => reason,
        _ = shutdown_signal() => {
            handle.stop().await?;
            drain_events(&mut events)
        }
    };

    handle.shutdown().await?;
    task.await.context("Scheduler task panicked")?;

    match reason {
        Some(StopReason::TransportFailure { code, message }) => {
            bail!("Playback failed ({:?}): {}", code, message)
        }
        Some(reason) => info!(%reason, "Practice run complete"),
        None => warn!("Event stream ended without a stop event"),
    }
    Ok(())
}

/// Log events until the run stops
async fn watch_events(events: &mut broadcast::Receiver<PracticeEvent>) -> Option<StopReason> {
    loop {
        match events.recv().await {
            Ok(event) => {
                if let PracticeEvent::PlaybackStopped { reason, .. } = &event {
                    log_event(&event);
                    return Some(reason.clone());
                }
                log_event(&event);
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "Event log fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

/// Log whatever is already queued, returning the stop reason if present
fn drain_events(events: &mut broadcast::Receiver<PracticeEvent>) -> Option<StopReason> {
    let mut reason = None;
    while let Ok(event) = events.try_recv() {
        log_event(&event);
        if let PracticeEvent::PlaybackStopped { reason: r, .. } = event {
            reason = Some(r);
        }
    }
    reason
}

fn log_event(event: &PracticeEvent) {
    match event {
        PracticeEvent::PlaybackStarted {
            session_id,
            track_id,
            ..
        } => info!(%session_id, %track_id, "Playback started"),
        PracticeEvent::PlaybackStopped { reason, .. } => info!(%reason, "Playback stopped"),
        PracticeEvent::ClipChanged { clip_id, .. } => info!(%clip_id, "Clip changed"),
        PracticeEvent::LoopCompleted {
            clip_id,
            loop_index,
            ..
        } => info!(%clip_id, loop_index, "Repeat completed"),
        PracticeEvent::SpeedChanged { new_speed, .. } => info!(new_speed, "Speed changed"),
        PracticeEvent::TimeUpdate {
            track_time_ms,
            clip_start_ms,
            clip_end_ms,
            ..
        } => debug!(track_time_ms, clip_start_ms, clip_end_ms, "Position"),
        PracticeEvent::SchedulerStateChanged {
            old_state,
            new_state,
            ..
        } => debug!(%old_state, %new_state, "State changed"),
    }
}

async fn recent(config: &Config, limit: usize) -> Result<()> {
    let store = SqliteSessionStore::new(config.db_pool.clone());
    let sessions = store
        .list_recent(limit)
        .await
        .context("Failed to list recent sessions")?;

    if sessions.is_empty() {
        println!("No practice sessions yet");
    }
    for s in sessions {
        println!(
            "{}  {}/{}  (set {})",
            s.last_updated_at.format("%Y-%m-%d %H:%M:%S"),
            s.pack_id,
            s.track_id,
            s.practice_set_id
        );
    }
    Ok(())
}

async fn show_or_update_settings(config: &Config, set: Option<Vec<String>>) -> Result<()> {
    if let Some(pair) = set {
        let [key, value] = pair.as_slice() else {
            bail!("--set takes exactly KEY VALUE");
        };
        settings::update_practice_setting(&config.db_pool, key, value)
            .await
            .with_context(|| format!("Failed to update '{}'", key))?;
        info!(%key, %value, "Setting updated");
    }

    let practice = settings::load_practice_configuration(&config.db_pool).await?;
    let interval = settings::get_time_update_interval_ms(&config.db_pool).await?;
    let capacity = settings::get_event_bus_capacity(&config.db_pool).await?;

    println!("{}", serde_json::to_string_pretty(&practice)?);
    println!("time_update_interval_ms = {}", interval);
    println!("event_bus_capacity = {}", capacity);
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
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
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping practice run");
        },
        _ = terminate => {
            info!("Received terminate signal, stopping practice run");
        },
    }
}
