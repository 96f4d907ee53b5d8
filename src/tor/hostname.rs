//! Discovery of the hidden service's onion address
//!
//! Tor writes `<HiddenServiceDir>/hostname` once the service keys exist.
//! There is no notification for that, so the file is polled with a bounded
//! wait.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use tracing::{debug, trace};

use super::{TorError, TorResult};

/// The `.onion` address of the hidden service, as written by tor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnionAddress(String);

impl OnionAddress {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OnionAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How long to wait for the hostname file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Delay between existence checks
    pub interval: Duration,
    /// Number of existence checks before giving up
    pub attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            attempts: 30,
        }
    }
}

impl PollPolicy {
    /// Longest time spent polling before the final read
    pub fn max_wait(&self) -> Duration {
        self.interval * self.attempts
    }
}

/// Wait for tor to write the hostname file and return its trimmed contents.
///
/// Checks for the file every `interval`, at most `attempts` times. Whether or
/// not the file showed up, one final read is attempted: the file can exist
/// before tor has finished writing it, and only a failing read is an error.
/// An existing but empty file therefore yields an empty address.
pub async fn wait_for_onion_address(path: &Path, policy: PollPolicy) -> TorResult<OnionAddress> {
    for attempt in 1..=policy.attempts {
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            debug!(attempt, path = %path.display(), "Hostname file found");
            break;
        }
        trace!(attempt, "Hostname file not there yet");
        tokio::time::sleep(policy.interval).await;
    }

    match tokio::fs::read_to_string(path).await {
        Ok(contents) => Ok(OnionAddress(contents.trim().to_string())),
        Err(source) => Err(TorError::AddressTimeout {
            path: path.to_path_buf(),
            source,
        }),
    }
}
