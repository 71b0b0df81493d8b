use crate::auth::Authenticator;
use crate::config::ServerConfig;
use crate::error::ParleysError;
use crate::liveness::LivenessMonitor;
use crate::registry::ConnectionRegistry;
use crate::router::MessageRouter;
use crate::session::handle_connection;
use crate::store::{run_sweeper, MemoryStore, PendingStore};
use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// How long shutdown waits for open sessions to finish.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared state for the relay server.
pub struct ServerState {
    /// Runtime server configuration.
    pub config: ServerConfig,
    /// Identifier to live connection table.
    pub registry: Arc<ConnectionRegistry>,
    /// Buffered messages keyed by recipient.
    pub store: Arc<dyn PendingStore>,
    /// Buffers and pushes `message` frames.
    pub router: MessageRouter,
    /// Validates `authenticate` claims.
    pub authenticator: Box<dyn Authenticator>,
    /// Per-IP connection counter for enforcing connection limits.
    pub ip_connections: DashMap<IpAddr, usize>,
    /// Number of open transport connections.
    pub active_connections: AtomicUsize,
}

impl ServerState {
    /// State backed by an in-memory store built from `config`.
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        let store: Arc<dyn PendingStore> = Arc::new(MemoryStore::new(config.retention()));
        Self::with_store(config, store)
    }

    /// State backed by the given store.
    #[must_use]
    pub fn with_store(config: ServerConfig, store: Arc<dyn PendingStore>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = MessageRouter::new(registry.clone(), store.clone(), config.max_payload);
        Self {
            authenticator: config.identity.authenticator(),
            registry,
            store,
            router,
            ip_connections: DashMap::new(),
            active_connections: AtomicUsize::new(0),
            config,
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Arc<Self> {
        Arc::new(Self::new(ServerConfig::default()))
    }
}

/// Run the server until the process is killed.
///
/// # Errors
///
/// Returns an error if the listener's local address cannot be read.
pub async fn run(listener: TcpListener, state: Arc<ServerState>) -> Result<(), ParleysError> {
    let (_shutdown_tx, shutdown_rx) = watch::channel(());
    run_with_shutdown(listener, state, shutdown_rx).await
}

/// Run the server accept loop with an externally-controlled shutdown signal.
///
/// Sending on, or dropping, the paired sender stops the accept loop, the
/// sweeper and the liveness monitor, and closes every open session. Sessions
/// get [`DRAIN_TIMEOUT`] to finish.
///
/// # Errors
///
/// Returns an error if the listener's local address cannot be read.
pub async fn run_with_shutdown(
    listener: TcpListener,
    state: Arc<ServerState>,
    mut shutdown: watch::Receiver<()>,
) -> Result<(), ParleysError> {
    let local_addr = listener.local_addr().map_err(ParleysError::Io)?;
    info!("server listening on {}", local_addr);

    let mut background = JoinSet::new();
    background.spawn(run_sweeper(
        state.store.clone(),
        Duration::from_secs(state.config.sweep_interval),
        shutdown.clone(),
    ));
    background.spawn(
        LivenessMonitor::new(
            state.registry.clone(),
            Duration::from_secs(state.config.ping_interval),
        )
        .run(shutdown.clone()),
    );

    let mut sessions = JoinSet::new();
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        let state = Arc::clone(&state);
                        let shutdown = shutdown.clone();
                        sessions.spawn(async move {
                            if let Err(e) = handle_connection(stream, addr, state, shutdown).await {
                                debug!("connection from {} closed: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("failed to accept connection: {}", e);
                    }
                }
            }
            Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
            _ = shutdown.changed() => {
                info!("shutdown signal received, draining {} connections", sessions.len());
                break;
            }
        }
    }
    drop(listener);

    let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
        while sessions.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!(
            "drain timeout reached with {} connections still active",
            sessions.len()
        );
        sessions.abort_all();
    }
    background.abort_all();
    while background.join_next().await.is_some() {}

    info!("server shut down gracefully");
    Ok(())
}
