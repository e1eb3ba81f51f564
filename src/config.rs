//! Tunable parameters, supplied explicitly at construction rather than read
//! from mutable module-level globals.

use std::time::Duration;

/// Default socket timeout applied to every blocking recv/send/accept/connect.
pub const DEFAULT_SOCKET_TIMEOUT: Duration = Duration::from_secs(10);

/// Default status-reporting window.
pub const DEFAULT_STATUS_INTERVAL: Duration = Duration::from_secs(600);

/// Timeouts and reporting cadence shared by connections and servers.
///
/// `SocketConfig::default()` reproduces the original module-level constants
/// (`SOCKET_TIMEOUT = 10.0`, `STATUS_INTERVAL = 600.0`); callers that need
/// something else build with the `with_*` methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketConfig {
    socket_timeout: Duration,
    status_interval: Duration,
    idle_timeout: Option<Duration>,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            socket_timeout: DEFAULT_SOCKET_TIMEOUT,
            status_interval: DEFAULT_STATUS_INTERVAL,
            idle_timeout: None,
        }
    }
}

impl SocketConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound on every accept/connect/recv/send call.
    pub fn socket_timeout(&self) -> Duration {
        self.socket_timeout
    }

    /// Window after which the statistics aggregator emits and resets.
    pub fn status_interval(&self) -> Duration {
        self.status_interval
    }

    /// Optional per-connection inbound idle cutoff. `None` means a recv
    /// timeout never escalates to a fatal teardown on its own.
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }

    pub fn with_socket_timeout(mut self, timeout: Duration) -> Self {
        self.socket_timeout = timeout;
        self
    }

    pub fn with_status_interval(mut self, interval: Duration) -> Self {
        self.status_interval = interval;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }
}
