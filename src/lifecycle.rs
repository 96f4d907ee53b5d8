//! Run lifecycle: tor, the onion address, and the content server
//!
//! A run moves strictly forward through [`Stage`]s:
//!
//! ```text
//! Idle → DirectoriesReady → ConfigWritten → DaemonRunning → AddressResolved
//!      → Serving | Forwarding → ShuttingDown → Terminated
//! ```
//!
//! Failures before `DaemonRunning` return straight away; nothing needs
//! stopping yet. From `DaemonRunning` on, every path goes through
//! `ShuttingDown`, and tor is killed before `run` returns.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use crate::config::{Config, ConfigError};
use crate::server::{start_server, ServerConfig, ServerError, ServerHandle};
use crate::shutdown::Shutdown;
use crate::tor::{
    check_installation, wait_for_onion_address, write_torrc, OnionAddress, PollPolicy,
    RuntimeLayout, TorError, TorProcess, TorrcParams,
};

/// Grace period for in-flight requests once shutdown starts
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Upper bound for the forwarding target reachability probe
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Position of a run in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    DirectoriesReady,
    ConfigWritten,
    DaemonRunning,
    AddressResolved,
    Serving,
    Forwarding,
    ShuttingDown,
    Terminated,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Idle => "idle",
            Stage::DirectoriesReady => "directories-ready",
            Stage::ConfigWritten => "config-written",
            Stage::DaemonRunning => "daemon-running",
            Stage::AddressResolved => "address-resolved",
            Stage::Serving => "serving",
            Stage::Forwarding => "forwarding",
            Stage::ShuttingDown => "shutting-down",
            Stage::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Errors that end a run
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    TorNotInstalled(TorError),

    #[error("Port forwarding error: {addr} is not reachable: {source}")]
    ForwardUnreachable {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Setup(TorError),

    #[error(transparent)]
    Spawn(TorError),

    #[error(transparent)]
    Server(#[from] ServerError),
}

impl RunError {
    /// Whether the run was refused before touching the filesystem
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            RunError::Config(_)
                | RunError::TorNotInstalled(_)
                | RunError::ForwardUnreachable { .. }
        )
    }
}

/// What a completed run observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// The onion address, if tor published one in time
    pub onion_address: Option<OnionAddress>,
    /// Address the content server listened on; `None` when forwarding
    pub server_addr: Option<SocketAddr>,
    /// Whether in-flight requests outlived the shutdown grace period
    pub shutdown_timed_out: bool,
}

/// Sequences one run of tor plus the content server.
pub struct Coordinator {
    config: Config,
    layout: RuntimeLayout,
    poll: PollPolicy,
    grace: Duration,
    stage: watch::Sender<Stage>,
    stages: broadcast::Sender<Stage>,
}

impl Coordinator {
    /// Coordinate a run with its runtime files below `base_dir`.
    pub fn new(config: Config, base_dir: &Path) -> Self {
        let (stage, _) = watch::channel(Stage::Idle);
        let (stages, _) = broadcast::channel(16);
        Self {
            config,
            layout: RuntimeLayout::new(base_dir),
            poll: PollPolicy::default(),
            grace: SHUTDOWN_GRACE,
            stage,
            stages,
        }
    }

    /// Override how long to wait for the onion address.
    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    /// Override the shutdown grace period for the content server.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn layout(&self) -> &RuntimeLayout {
        &self.layout
    }

    /// The stage the run is currently in.
    pub fn stage(&self) -> Stage {
        *self.stage.borrow()
    }

    /// Receive every stage transition made after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Stage> {
        self.stages.subscribe()
    }

    /// Run until `shutdown` is triggered or the content server fails.
    pub async fn run(&self, shutdown: &Shutdown) -> Result<RunReport, RunError> {
        self.check_preconditions().await?;

        self.layout.prepare().map_err(RunError::Setup)?;
        self.advance(Stage::DirectoriesReady);

        let params = TorrcParams {
            data_dir: self.layout.data_dir(),
            port: self.config.port,
            forward: self.config.forward_target(),
        };
        write_torrc(self.layout.torrc(), &params).map_err(RunError::Setup)?;
        self.advance(Stage::ConfigWritten);

        // From here on `tor` is killed on every path out of this function,
        // including panics, by its Drop impl.
        let mut tor =
            TorProcess::spawn(&self.config.tor_path, self.layout.torrc()).map_err(RunError::Spawn)?;
        self.advance(Stage::DaemonRunning);

        let onion_address = match wait_for_onion_address(self.layout.hostname(), self.poll).await {
            Ok(address) => {
                println!("Onion address: {}", address);
                Some(address)
            }
            Err(e) => {
                warn!(error = %e, "Continuing without an onion address");
                println!("Failed to get .onion address: {}", e);
                None
            }
        };
        self.advance(Stage::AddressResolved);

        let (mut server, mut failure) = self.start_serving().await;

        if failure.is_none() {
            failure = wait_for_end(shutdown, server.as_mut()).await;
        }

        self.advance(Stage::ShuttingDown);
        println!("Shutting down...");

        let server_addr = server.as_ref().map(ServerHandle::addr);
        let mut shutdown_timed_out = false;
        if let Some(ref mut server) = server {
            match server.stop(self.grace).await {
                Ok(()) => {}
                Err(ServerError::ShutdownTimeout(grace)) => {
                    warn!(?grace, "Content server did not drain in time");
                    println!("Server forced to shutdown after {:?}", grace);
                    shutdown_timed_out = true;
                }
                Err(e) => warn!(error = %e, "Content server stopped with an error"),
            }
        }

        if let Err(e) = tor.terminate().await {
            error!(error = %e, "Failed to kill tor process");
            println!("Failed to kill Tor process: {}", e);
        }

        self.advance(Stage::Terminated);
        println!("Stopped");

        match failure {
            Some(e) => Err(RunError::Server(e)),
            None => Ok(RunReport {
                onion_address,
                server_addr,
                shutdown_timed_out,
            }),
        }
    }

    async fn check_preconditions(&self) -> Result<(), RunError> {
        self.config.validate()?;

        let version = check_installation(&self.config.tor_path)
            .await
            .map_err(RunError::TorNotInstalled)?;
        info!(version = %version, "Using tor");

        if let Some(target) = self.config.forward_target() {
            probe_forward_target(target).await?;
        }

        Ok(())
    }

    /// Start the content server, or announce forwarding.
    ///
    /// A start failure is handed back instead of returned so the caller can
    /// still run the shutdown sequence.
    async fn start_serving(&self) -> (Option<ServerHandle>, Option<ServerError>) {
        if let Some(target) = self.config.forward_target() {
            println!("Forwarding traffic to {}", target);
            self.advance(Stage::Forwarding);
            return (None, None);
        }

        let server_config = ServerConfig::new(&self.config.root, self.config.port);
        match start_server(server_config).await {
            Ok(handle) => {
                println!("Starting server on http://localhost:{}", handle.port());
                println!("Serving directory: {}", self.config.root.display());
                self.advance(Stage::Serving);
                (Some(handle), None)
            }
            Err(e) => {
                error!(error = %e, "Failed to start content server");
                (None, Some(e))
            }
        }
    }

    fn advance(&self, stage: Stage) {
        info!(%stage, "Lifecycle stage");
        self.stage.send_replace(stage);
        // No subscribers is fine
        let _ = self.stages.send(stage);
    }
}

/// Block until shutdown is requested or the content server dies.
async fn wait_for_end(shutdown: &Shutdown, server: Option<&mut ServerHandle>) -> Option<ServerError> {
    match server {
        Some(server) => tokio::select! {
            _ = shutdown.wait() => None,
            e = server.closed() => {
                error!(error = %e, "Content server failed");
                Some(e)
            }
        },
        None => {
            shutdown.wait().await;
            None
        }
    }
}

/// Check that something is listening at the forwarding target.
///
/// Connects and immediately closes the connection.
pub async fn probe_forward_target(addr: &str) -> Result<(), RunError> {
    let unreachable = |source: io::Error| RunError::ForwardUnreachable {
        addr: addr.to_string(),
        source,
    };

    let stream = tokio::time::timeout(PROBE_TIMEOUT, TcpStream::connect(addr))
        .await
        .map_err(|_| unreachable(io::Error::new(io::ErrorKind::TimedOut, "connection timed out")))?
        .map_err(unreachable)?;
    drop(stream);

    debug!(addr, "Forwarding target is reachable");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_stage_display() {
        assert_eq!(Stage::DirectoriesReady.to_string(), "directories-ready");
        assert_eq!(Stage::Terminated.to_string(), "terminated");
    }

    #[test]
    fn test_coordinator_defaults() {
        let coordinator = Coordinator::new(Config::default(), Path::new("/srv/site"));

        assert_eq!(coordinator.grace, Duration::from_secs(5));
        assert_eq!(coordinator.poll, PollPolicy::default());
        assert_eq!(coordinator.layout().root(), Path::new("/srv/site/.subway"));
        assert_eq!(coordinator.stage(), Stage::Idle);
    }

    #[tokio::test]
    async fn test_probe_reachable_target() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        probe_forward_target(&addr).await.unwrap();
    }

    #[tokio::test]
    async fn test_probe_unreachable_target() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let result = probe_forward_target(&addr).await;
        match result {
            Err(e @ RunError::ForwardUnreachable { .. }) => assert!(e.is_precondition()),
            other => panic!("Expected ForwardUnreachable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_tor_fails_before_side_effects() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config {
            tor_path: temp_dir.path().join("no-such-tor"),
            ..Config::default()
        };
        let coordinator = Coordinator::new(config, temp_dir.path());
        let mut stages = coordinator.subscribe();

        let result = coordinator.run(&Shutdown::new()).await;

        assert!(matches!(result, Err(RunError::TorNotInstalled(_))));
        assert!(!coordinator.layout().root().exists());
        assert!(stages.try_recv().is_err());
        assert_eq!(coordinator.stage(), Stage::Idle);
    }

    #[tokio::test]
    async fn test_port_zero_fails_before_side_effects() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config {
            port: 0,
            ..Config::default()
        };
        let coordinator = Coordinator::new(config, temp_dir.path());

        let result = coordinator.run(&Shutdown::new()).await;

        match result {
            Err(e @ RunError::Config(ConfigError::InvalidPort)) => assert!(e.is_precondition()),
            other => panic!("Expected InvalidPort, got {other:?}"),
        }
        assert!(!coordinator.layout().root().exists());
        assert_eq!(coordinator.stage(), Stage::Idle);
    }
}
