//! Backend connection pool configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ConnectionPoolConfig {
    /// Connections dialed at startup.
    #[serde(default = "default_min_idle")]
    pub min_idle: usize,

    /// Upper bound on connections lent out or idle at once.
    #[serde(default = "default_max_size")]
    pub max_size: usize,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// How long a session waits for a free connection when the pool is exhausted.
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,

    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,
}

impl ConnectionPoolConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }
}

impl Default for ConnectionPoolConfig {
    fn default() -> Self {
        Self {
            min_idle: default_min_idle(),
            max_size: default_max_size(),
            connect_timeout_ms: default_connect_timeout_ms(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            keepalive_secs: default_keepalive_secs(),
        }
    }
}

fn default_min_idle() -> usize {
    5
}

fn default_max_size() -> usize {
    30
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_acquire_timeout_ms() -> u64 {
    5000
}

fn default_keepalive_secs() -> u64 {
    60
}
