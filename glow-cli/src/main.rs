use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use glow_core::app::CoreServices;
use glow_core::config::Config;
use glow_core::sync::{NetworkMonitor, NetworkState};
use serde::Serialize;
use tracing::{error, info};

/// glow: operate a user's photo backup and try the AI features from a
/// terminal.
#[derive(Parser)]
#[command(name = "glow")]
struct Args {
    /// Treat the connection as cellular: uploads stay queued.
    #[arg(long, env = "GLOW_CELLULAR")]
    cellular: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Backup setting, pending uploads and local storage.
    Status {
        #[arg(long, env = "GLOW_USER_ID")]
        user: String,
    },
    /// Upload everything pending now.
    Sync,
    /// Turn cloud backup on or off.
    Backup {
        #[arg(long, env = "GLOW_USER_ID")]
        user: String,
        #[arg(long, conflicts_with = "off")]
        on: bool,
        #[arg(long)]
        off: bool,
        /// With --off, also delete the remote copies.
        #[arg(long, requires = "off")]
        delete_remote: bool,
    },
    /// Capture a photo from a file.
    Capture {
        #[arg(long, env = "GLOW_USER_ID")]
        user: String,
        image: PathBuf,
    },
    /// Download every backed-up photo onto this device.
    Restore {
        #[arg(long, env = "GLOW_USER_ID")]
        user: String,
    },
    /// Check that every remote pointer still has a blob.
    Verify {
        #[arg(long, env = "GLOW_USER_ID")]
        user: String,
    },
    /// Print the photo key for safekeeping.
    ExportKey {
        #[arg(long, env = "GLOW_USER_ID")]
        user: String,
    },
    /// Install a previously exported photo key.
    ImportKey {
        #[arg(long, env = "GLOW_USER_ID")]
        user: String,
        /// Hex-encoded key (64 hex chars = 32 bytes).
        #[arg(long, env = "GLOW_PHOTO_KEY")]
        key: String,
    },
    /// Analyze the skin in a photo.
    Analyze { image: PathBuf },
    /// Analyze a photo, then suggest routines for it.
    Routines {
        image: PathBuf,
        /// Repeat for several goals.
        #[arg(long = "goal")]
        goals: Vec<String>,
    },
}

fn configure_logging() {
    use tracing_subscriber::prelude::*;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_line_number(true)
        .with_target(false)
        .with_file(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn fail(message: impl std::fmt::Display) -> ! {
    error!("{message}");
    std::process::exit(1);
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(e) => fail(format!("Failed to encode output: {e}")),
    }
}

fn read_image(path: &Path) -> Vec<u8> {
    std::fs::read(path)
        .unwrap_or_else(|e| fail(format!("Failed to read {}: {e}", path.display())))
}

#[derive(Serialize)]
struct Status {
    backup_enabled: bool,
    pending_uploads: usize,
    free_bytes: u64,
    used_bytes: u64,
    photo_count: usize,
    low_storage: bool,
}

#[tokio::main]
async fn main() {
    configure_logging();
    let args = Args::parse();

    glow_core::config::init_keyring();
    let config = Config::load().unwrap_or_else(|e| fail(format!("Failed to load config: {e}")));

    let network = NetworkMonitor::new(if args.cellular {
        NetworkState::CELLULAR
    } else {
        NetworkState::WIFI
    });
    let core = CoreServices::from_config(config, network)
        .await
        .unwrap_or_else(|e| fail(format!("Failed to start: {e}")));

    match args.command {
        Command::Status { user } => {
            let backup_enabled = core
                .backup
                .is_enabled(&user)
                .await
                .unwrap_or_else(|e| fail(e));
            let storage = core.local.storage_info().await.unwrap_or_else(|e| fail(e));
            let low_storage = core.local.is_low_storage().unwrap_or_else(|e| fail(e));
            print_json(&Status {
                backup_enabled,
                pending_uploads: core.sync_queue.len().await,
                free_bytes: storage.free_bytes,
                used_bytes: storage.used_bytes,
                photo_count: storage.photo_count,
                low_storage,
            });
        }
        Command::Sync => {
            let uploaded = core.sync_queue.sync_now().await.unwrap_or_else(|e| fail(e));
            let remaining = core.sync_queue.len().await;
            info!(uploaded, remaining, "Sync finished");
        }
        Command::Backup {
            user,
            on,
            off,
            delete_remote,
        } => {
            if on {
                let queued = core
                    .backup
                    .enable_backup(&user)
                    .await
                    .unwrap_or_else(|e| fail(e));
                info!(queued, "Backup enabled");
            } else if off {
                let deleted = core
                    .backup
                    .disable_backup(&user, delete_remote)
                    .await
                    .unwrap_or_else(|e| fail(e));
                info!(deleted, "Backup disabled");
            } else {
                let enabled = core.backup.is_enabled(&user).await.unwrap_or_else(|e| fail(e));
                println!("{}", if enabled { "on" } else { "off" });
            }
        }
        Command::Capture { user, image } => {
            let record = core
                .capture_photo(&user, &read_image(&image))
                .await
                .unwrap_or_else(|e| fail(e));
            print_json(&record);
        }
        Command::Restore { user } => {
            let result = core
                .restoration
                .restore_all(&user, |p| {
                    info!("Restored {}/{} ({:.0}%)", p.current, p.total, p.percentage)
                })
                .await
                .unwrap_or_else(|e| fail(e));
            print_json(&result);
        }
        Command::Verify { user } => {
            let report = core
                .restoration
                .verify_integrity(&user)
                .await
                .unwrap_or_else(|e| fail(e));
            print_json(&report);
            if !report.is_intact() {
                std::process::exit(2);
            }
        }
        Command::ExportKey { user } => match core.keys.export_photo_key(&user) {
            Ok(Some(key)) => println!("{key}"),
            Ok(None) => fail(format!("No photo key stored for {user}")),
            Err(e) => fail(e),
        },
        Command::ImportKey { user, key } => {
            core.keys
                .set_photo_key(&user, &key)
                .unwrap_or_else(|e| fail(e));
            info!("Photo key imported for {user}");
        }
        Command::Analyze { image } => {
            let ai = core
                .ai
                .as_ref()
                .unwrap_or_else(|| fail("No AI API key stored"));
            let analysis = ai
                .analyze_skin(&read_image(&image))
                .await
                .unwrap_or_else(|e| fail(e));
            print_json(&analysis);
        }
        Command::Routines { image, goals } => {
            let ai = core
                .ai
                .as_ref()
                .unwrap_or_else(|| fail("No AI API key stored"));
            let analysis = ai
                .analyze_skin(&read_image(&image))
                .await
                .unwrap_or_else(|e| fail(e));
            let routines = ai.generate_routines(&analysis, &goals).await;
            print_json(&routines);
        }
    }

    core.sessions.flush().await;
}
