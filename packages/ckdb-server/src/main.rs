//! The `ckdb` binary: flag parsing, logging, bootstrap, and the
//! listener's lifetime.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use ckdb_server::{network, DbConfig, ServerConfig, ShutdownController, Store};

#[derive(Parser, Debug)]
#[command(name = "ckdb", about = "Mining pool accounting and persistence daemon")]
struct Args {
    /// Configuration file path (recorded only; nothing is read from it
    /// yet).
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Log level, syslog style 0-7.
    #[arg(short = 'l', long = "log-level", default_value_t = 5)]
    log_level: u8,

    /// Process name; also names the default socket directory.
    #[arg(short = 'n', long = "name", default_value = "ckdb")]
    name: String,

    /// Directory for the listener socket. Defaults to /opt/<name>.
    #[arg(short = 's', long = "socket-dir")]
    socket_dir: Option<PathBuf>,

    /// Database role.
    #[arg(short = 'u', long = "db-user", default_value = "postgres")]
    db_user: String,

    /// Database password. Prefer the environment variable over the flag
    /// so it stays out of the process list.
    #[arg(short = 'p', long = "db-pass", env = "CKDB_DB_PASS", hide_env_values = true)]
    db_pass: Option<String>,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        let socket_dir = self
            .socket_dir
            .unwrap_or_else(|| PathBuf::from(format!("/opt/{}", self.name)));
        ServerConfig {
            name: self.name,
            socket_dir,
            db: DbConfig {
                user: self.db_user,
                pass: self.db_pass,
                ..DbConfig::default()
            },
        }
    }
}

fn init_tracing(level: u8) {
    let default = match level {
        0..=3 => "error",
        4 => "warn",
        5 | 6 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn ensure_socket_dir(dir: &std::path::Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    if !dir.exists() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to make directory {}", dir.display()))?;
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))
            .with_context(|| format!("failed to restrict {}", dir.display()))?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_level);
    if let Some(config) = &args.config {
        debug!("config file {} noted", config.display());
    }
    let cfg = args.into_config();

    ensure_socket_dir(&cfg.socket_dir)?;

    // The initial session is the one fatal database interaction.
    let pool = ckdb_server::db::connect(&cfg.db)
        .await
        .context("failed to connect to db")?;

    let store = Arc::new(Store::new());
    store
        .fill_all(&pool)
        .await
        .context("failed to load the working set")?;
    info!("working set loaded");

    let controller = Arc::new(ShutdownController::new());

    let signal_controller = Arc::clone(&controller);
    tokio::spawn(async move {
        let mut term = match signal(SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(err) => {
                error!("cannot install SIGTERM handler: {err}");
                return;
            }
        };
        let mut int = match signal(SignalKind::interrupt()) {
            Ok(stream) => stream,
            Err(err) => {
                error!("cannot install SIGINT handler: {err}");
                return;
            }
        };
        tokio::select! {
            _ = term.recv() => {}
            _ = int.recv() => {}
        }
        warn!("termination signal received, shutting down");
        signal_controller.trigger();
    });

    network::run(&cfg.socket_path(), store, pool, &controller).await?;
    info!("{} exiting", cfg.name);
    Ok(())
}
