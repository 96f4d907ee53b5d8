//! Tor daemon management
//!
//! Everything needed to run a private `tor` instance for one hidden service:
//! the runtime directory layout, the generated `torrc`, the supervised child
//! process, and discovery of the `.onion` hostname tor writes once the
//! service is provisioned.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

mod hostname;
mod layout;
mod process;
mod torrc;

pub use hostname::{wait_for_onion_address, OnionAddress, PollPolicy};
pub use layout::{RuntimeLayout, DATA_DIR_NAME, HOSTNAME_FILE, TORRC_FILE, WORK_DIR_NAME};
pub use process::{check_installation, TorProcess};
pub use torrc::{render_torrc, write_torrc, TorrcParams, HIDDEN_SERVICE_VIRTUAL_PORT, SOCKS_PORT};

/// Error types for tor operations
#[derive(Debug, Error)]
pub enum TorError {
    #[error("Tor is not installed or {path} is not a working tor executable: {reason}")]
    NotInstalled { path: PathBuf, reason: String },

    #[error("Failed to create directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Path is not valid UTF-8: {0}")]
    NonUtf8Path(PathBuf),

    #[error("Invalid forwarding target: {0:?}")]
    InvalidForwardTarget(String),

    #[error("Failed to render torrc: {0}")]
    Template(#[from] minijinja::Error),

    #[error("Failed to write torrc to {path}: {source}")]
    Render {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to start tor from {path}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Timed out waiting for onion hostname at {path}: {source}")]
    AddressTimeout {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Result type for tor operations
pub type TorResult<T> = Result<T, TorError>;
