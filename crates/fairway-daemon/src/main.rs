//! fairway-daemon: the Fairway notification daemon.
//!
//! Single OS process running a Tokio async runtime. UI surfaces talk to it
//! via JSON-RPC over a Unix socket and receive view changes as pushed
//! notifications.

mod commands;
mod config;
mod rpc;

use std::sync::Arc;

use fairway_notify::backend::SqliteBackend;
use fairway_notify::{SessionRegistry, Store};
use fairway_realtime::ChangeFeed;
use tracing::{error, info};

use crate::config::DaemonConfig;
use crate::rpc::RpcServer;

/// Daemon-wide shared state.
pub struct DaemonState {
    /// Configuration.
    pub config: DaemonConfig,
    /// SQLite stores, publishing every write to the change feed.
    pub backend: SqliteBackend,
    /// One shared engine per signed-in user.
    pub sessions: Arc<SessionRegistry>,
}

impl DaemonState {
    pub fn new(config: DaemonConfig, conn: rusqlite::Connection) -> Arc<Self> {
        let feed = ChangeFeed::new(config.realtime.feed_capacity)
            .with_dedup_window(config.realtime.dedup_window);
        let backend = SqliteBackend::new(conn, feed.clone());
        let store: Arc<dyn Store> = Arc::new(backend.clone());
        let sessions = SessionRegistry::new(store, feed, config.notifications.clone());
        Arc::new(Self {
            config,
            backend,
            sessions,
        })
    }

    /// State over a fresh in-memory database.
    #[cfg(test)]
    pub fn in_memory() -> anyhow::Result<Arc<Self>> {
        Ok(Self::new(DaemonConfig::default(), fairway_db::open_memory()?))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load config
    let config = DaemonConfig::load()?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(config.log_directive().parse()?),
        )
        .init();

    info!("Fairway daemon starting");

    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)?;

    // 2. Open database
    let conn = fairway_db::open(&config.db_path())?;

    // 3. Build daemon state (change feed, stores, session registry)
    let state = DaemonState::new(config, conn);

    // 4. Start IPC server
    let socket_path = state.config.data_dir().join("daemon.sock");
    let rpc_server = RpcServer::new(state.clone(), socket_path.clone());

    info!("Starting JSON-RPC server on {:?}", socket_path);

    // 5. Run the RPC server until shutdown
    tokio::select! {
        result = rpc_server.run() => {
            if let Err(e) = result {
                error!("RPC server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down");
        }
    }

    info!(
        active_sessions = state.sessions.active_sessions(),
        row_changes = state.backend.feed().sequence(),
        "Daemon shutting down gracefully"
    );

    // Clean up socket file
    let _ = std::fs::remove_file(&socket_path);

    info!("Daemon stopped");
    Ok(())
}
