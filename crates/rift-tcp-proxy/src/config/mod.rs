//! Configuration types for the Rift TCP proxy.

mod listen;
mod plan_file;
mod pool;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use listen::{BackendConfig, ListenConfig, SubstituteTarget};
pub use plan_file::{load_plan, PlanFile};
pub use pool::ConnectionPoolConfig;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub listen: ListenConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub connection_pool: ConnectionPoolConfig,
    /// Plan file hydrating the rule store at startup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<PathBuf>,
    /// Where `return_empty`/`return_err` substitutes are written.
    #[serde(default)]
    pub substitute_to: SubstituteTarget,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.listen.proxy.is_empty() {
            anyhow::bail!("'listen.proxy' must not be empty");
        }
        if self.backend.addr.is_empty() {
            anyhow::bail!("'backend.addr' must not be empty");
        }

        let pool = &self.connection_pool;
        if pool.max_size == 0 {
            anyhow::bail!("'connection_pool.max_size' must be at least 1");
        }
        if pool.min_idle > pool.max_size {
            anyhow::bail!(
                "'connection_pool.min_idle' ({}) cannot exceed 'connection_pool.max_size' ({})",
                pool.min_idle,
                pool.max_size
            );
        }
        if pool.connect_timeout_ms == 0 {
            anyhow::bail!("'connection_pool.connect_timeout_ms' must be greater than 0");
        }

        Ok(())
    }
}
