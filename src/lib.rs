//! subway: serve a local directory as a Tor hidden service.
//!
//! A run prepares a private working directory, writes a `torrc`, starts tor
//! as a child process, waits for the onion address and serves the configured
//! directory until SIGINT/SIGTERM. See [`lifecycle::Coordinator`].

pub mod cleanup;
pub mod config;
pub mod lifecycle;
pub mod logging;
pub mod server;
pub mod shutdown;
pub mod tor;
