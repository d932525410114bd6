//! HTTP listener lifecycle: startup, drain, and forced shutdown.

use std::net::SocketAddr;
use std::path::Path;
use std::pin::pin;
use std::time::Duration;

use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnectionBuilder;
use hyper_util::service::TowerToHyperService;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::create_app_with_sessions;
use crate::error::ServerError;
use crate::mcp::McpSessionManager;

/// Grace period for in-flight connections before forced termination.
pub const FORCE_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// A running rootspace server instance.
///
/// Owns its own session registry, so multiple instances can coexist in one
/// process (ephemeral-port test servers included).
pub struct Server {
    addr: SocketAddr,
    sessions: McpSessionManager,
    shutdown: CancellationToken,
    serve_task: Mutex<Option<JoinHandle<()>>>,
}

/// Create the server's working storage location if absent. Idempotent.
pub async fn ensure_data_dir(path: &Path) -> Result<(), ServerError> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|source| ServerError::DataDir {
            path: path.to_path_buf(),
            source,
        })
}

/// Accept connections until the shutdown token fires, then drain.
///
/// Each accepted socket is served on its own task in `connections`. On
/// shutdown the listener stops accepting, every open connection finishes
/// its in-flight exchange before closing, and this function returns once
/// the last connection task has ended. The `JoinSet` also carries the
/// forced path: aborting the task running this function drops the set,
/// which aborts every connection task with it.
async fn serve(listener: TcpListener, app: Router, shutdown: CancellationToken) {
    let mut connections = JoinSet::new();

    loop {
        let socket = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((socket, _)) => socket,
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    continue;
                }
            },
        };

        let service = TowerToHyperService::new(app.clone());
        let shutdown = shutdown.clone();
        connections.spawn(async move {
            let builder = ConnectionBuilder::new(TokioExecutor::new());
            let connection =
                builder.serve_connection_with_upgrades(TokioIo::new(socket), service);
            let mut connection = pin!(connection);

            tokio::select! {
                result = connection.as_mut() => {
                    if let Err(e) = result {
                        debug!("Connection error: {}", e);
                    }
                }
                _ = shutdown.cancelled() => {
                    // Let the in-flight exchange finish, then close.
                    connection.as_mut().graceful_shutdown();
                    if let Err(e) = connection.as_mut().await {
                        debug!("Connection error during drain: {}", e);
                    }
                }
            }
        });
    }

    drop(listener);
    while connections.join_next().await.is_some() {}
}

impl Server {
    /// Ensure the data directory exists, bind the configured port, and
    /// start serving.
    ///
    /// A bind failure is fatal: the error propagates to the caller and no
    /// half-started server is left behind.
    pub async fn start(config: &Config) -> Result<Self, ServerError> {
        ensure_data_dir(&config.data_dir).await?;

        // Bind to 0.0.0.0 to be accessible from all interfaces
        let bind_addr = SocketAddr::from(([0, 0, 0, 0], config.port));
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: bind_addr.to_string(),
                source,
            })?;
        let addr = listener.local_addr().map_err(|source| ServerError::Bind {
            addr: bind_addr.to_string(),
            source,
        })?;

        let sessions = McpSessionManager::new();
        let app = create_app_with_sessions(sessions.clone());

        let shutdown = CancellationToken::new();
        let serve_task = tokio::spawn(serve(listener, app, shutdown.clone()));

        info!("Rootspace server listening on {}", addr);
        info!("Data directory: {}", config.data_dir.display());

        Ok(Self {
            addr,
            sessions,
            shutdown,
            serve_task: Mutex::new(Some(serve_task)),
        })
    }

    /// The address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// The session manager of this instance.
    pub fn sessions(&self) -> &McpSessionManager {
        &self.sessions
    }

    /// Stop the server: stop accepting connections, close all protocol
    /// sessions, wait for in-flight exchanges to finish and their sockets
    /// to close, and force-terminate stragglers after
    /// [`FORCE_CLOSE_TIMEOUT`].
    ///
    /// Idempotent: a second call returns immediately. Returns only once the
    /// serve task has ended, gracefully or by force; aborting the serve
    /// task drops its connection set, which tears down every remaining
    /// connection. The deadline timer is dropped the moment graceful
    /// completion wins the race.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        self.sessions.close_all().await;

        let handle = self.serve_task.lock().await.take();
        let Some(mut handle) = handle else {
            return;
        };

        tokio::select! {
            _ = &mut handle => {
                info!("Server stopped gracefully");
            }
            _ = tokio::time::sleep(FORCE_CLOSE_TIMEOUT) => {
                warn!(
                    "Connections still open after {:?} grace period, forcing shutdown",
                    FORCE_CLOSE_TIMEOUT
                );
                handle.abort();
                let _ = handle.await;
            }
        }
    }
}
