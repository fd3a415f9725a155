//! Listener and backend address configuration.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ListenConfig {
    /// Address clients connect to instead of the backend.
    #[serde(default = "default_proxy_addr")]
    pub proxy: String,
    /// HTTP management API. Enabled by default; `null` disables it.
    #[serde(default = "default_admin_addr", skip_serializing_if = "Option::is_none")]
    pub admin: Option<String>,
    /// RESP control protocol listener. Enabled by default; `null` disables it.
    #[serde(default = "default_control_addr", skip_serializing_if = "Option::is_none")]
    pub control: Option<String>,
}

fn default_proxy_addr() -> String {
    "127.0.0.1:8083".to_string()
}

fn default_admin_addr() -> Option<String> {
    Some("127.0.0.1:8081".to_string())
}

fn default_control_addr() -> Option<String> {
    Some("127.0.0.1:6380".to_string())
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            proxy: default_proxy_addr(),
            admin: default_admin_addr(),
            control: default_control_addr(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Address of the real key-value server.
    #[serde(default = "default_backend_addr")]
    pub addr: String,
}

fn default_backend_addr() -> String {
    "127.0.0.1:6379".to_string()
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            addr: default_backend_addr(),
        }
    }
}

/// Connection a `return_empty`/`return_err` reply is written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SubstituteTarget {
    /// Send the substitute to the backend in place of the client chunk.
    #[default]
    Backend,
    /// Answer the client directly; the backend never sees the chunk.
    Client,
}

impl SubstituteTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubstituteTarget::Backend => "backend",
            SubstituteTarget::Client => "client",
        }
    }
}

impl std::str::FromStr for SubstituteTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "backend" => Ok(SubstituteTarget::Backend),
            "client" => Ok(SubstituteTarget::Client),
            other => Err(format!(
                "Unknown substitute target '{other}' (expected 'backend' or 'client')"
            )),
        }
    }
}
