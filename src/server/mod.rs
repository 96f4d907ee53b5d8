//! Static content server exposed through the hidden service.

pub mod routes;

pub use routes::build_router;

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Errors that can occur while running the content server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Root directory not found: {0}")]
    RootNotFound(PathBuf),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("Server error: {0}")]
    Serve(#[from] io::Error),

    #[error("Server task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Server stopped unexpectedly")]
    Exited,

    #[error("Server did not stop within {0:?}")]
    ShutdownTimeout(Duration),
}

/// Result type for server operations
pub type ServerResult<T> = Result<T, ServerError>;

/// Configuration for the content server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Directory to serve.
    pub root: PathBuf,
    /// Address to bind; all interfaces by default.
    pub host: IpAddr,
    /// Port to bind. 0 picks a free port.
    pub port: u16,
}

impl ServerConfig {
    pub fn new(root: impl Into<PathBuf>, port: u16) -> Self {
        Self {
            root: root.into(),
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port,
        }
    }
}

/// Handle to a running content server
///
/// The server runs on its own task until [`ServerHandle::stop`] is called.
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<io::Result<()>>>,
}

impl ServerHandle {
    /// Address the server is bound to
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Port the server is bound to
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Resolve once the server task ends without having been asked to stop.
    ///
    /// While the server is healthy this never resolves. Cancel safe.
    pub async fn closed(&mut self) -> ServerError {
        let Some(task) = self.task.as_mut() else {
            return std::future::pending().await;
        };

        let joined = task.await;
        self.task = None;
        match joined {
            Ok(Ok(())) => ServerError::Exited,
            Ok(Err(e)) => ServerError::Serve(e),
            Err(e) => ServerError::Task(e),
        }
    }

    /// Stop accepting connections and wait up to `grace` for in-flight
    /// requests to finish.
    ///
    /// When the grace period runs out the server task is aborted and
    /// `ShutdownTimeout` is returned; the server is stopped either way.
    pub async fn stop(&mut self, grace: Duration) -> ServerResult<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        let Some(mut task) = self.task.take() else {
            return Ok(());
        };

        match tokio::time::timeout(grace, &mut task).await {
            Ok(joined) => {
                joined??;
                debug!(addr = %self.addr, "Server stopped");
                Ok(())
            }
            Err(_) => {
                task.abort();
                Err(ServerError::ShutdownTimeout(grace))
            }
        }
    }
}

/// Bind the listener and start serving `config.root` on a background task.
pub async fn start_server(config: ServerConfig) -> ServerResult<ServerHandle> {
    if !config.root.is_dir() {
        return Err(ServerError::RootNotFound(config.root));
    }

    let addr = SocketAddr::new(config.host, config.port);
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;
    let addr = listener.local_addr()?;

    let app = build_router(&config.root);
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    info!(%addr, root = %config.root.display(), "Content server listening");

    Ok(ServerHandle {
        addr,
        shutdown_tx: Some(shutdown_tx),
        task: Some(task),
    })
}
