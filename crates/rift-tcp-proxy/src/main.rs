use anyhow::Context;
use clap::{Parser, ValueEnum};
use rift_tcp_proxy::admin_api::{AdminApiServer, AdminState};
use rift_tcp_proxy::config::{load_plan, Config, SubstituteTarget};
use rift_tcp_proxy::control::ControlServer;
use rift_tcp_proxy::plan::Plan;
use rift_tcp_proxy::pool::BackendPool;
use rift_tcp_proxy::proxy::ProxyServer;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "rift-tcp-proxy")]
#[command(author, version, about = "Fault-injecting proxy for key-value servers")]
struct Args {
    /// YAML configuration file; flags override its values
    #[arg(short, long, env = "RIFT_TCP_CONFIG")]
    config: Option<PathBuf>,

    /// Plan file (JSON, or YAML by extension) loaded at startup
    #[arg(short, long, env = "RIFT_TCP_PLAN")]
    plan: Option<PathBuf>,

    /// Backend server address
    #[arg(short, long, alias = "redis", env = "RIFT_TCP_BACKEND")]
    backend: Option<String>,

    /// Proxy listen address
    #[arg(short, long, env = "RIFT_TCP_ADDR")]
    addr: Option<String>,

    /// HTTP management API listen address
    #[arg(long, env = "RIFT_TCP_ADMIN_ADDR", conflicts_with = "no_admin")]
    admin_addr: Option<String>,

    /// Do not start the HTTP management API
    #[arg(long, env = "RIFT_TCP_NO_ADMIN")]
    no_admin: bool,

    /// RESP control protocol listen address
    #[arg(long, env = "RIFT_TCP_CONTROL_ADDR", conflicts_with = "no_control")]
    control_addr: Option<String>,

    /// Do not start the RESP control listener
    #[arg(long, env = "RIFT_TCP_NO_CONTROL")]
    no_control: bool,

    /// Where return_empty/return_err replies are written (backend|client)
    #[arg(long, env = "RIFT_TCP_SUBSTITUTE_TO")]
    substitute_to: Option<SubstituteTarget>,

    /// Backend connections opened at startup
    #[arg(long, env = "RIFT_TCP_POOL_MIN_IDLE")]
    pool_min_idle: Option<usize>,

    /// Maximum backend connections in use at once
    #[arg(long, env = "RIFT_TCP_POOL_MAX_SIZE")]
    pool_max_size: Option<usize>,

    /// Log output format
    #[arg(long, value_enum, default_value = "text", env = "RIFT_TCP_LOG_FORMAT")]
    log_format: LogFormat,
}

impl Args {
    /// Resolve the effective configuration: file values, then flags.
    fn into_config(self) -> Result<Config, anyhow::Error> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => Config::default(),
        };

        if let Some(plan) = self.plan {
            config.plan = Some(plan);
        }
        if let Some(backend) = self.backend {
            config.backend.addr = backend;
        }
        if let Some(addr) = self.addr {
            config.listen.proxy = addr;
        }
        if let Some(admin) = self.admin_addr {
            config.listen.admin = Some(admin);
        }
        if self.no_admin {
            config.listen.admin = None;
        }
        if let Some(control) = self.control_addr {
            config.listen.control = Some(control);
        }
        if self.no_control {
            config.listen.control = None;
        }
        if let Some(target) = self.substitute_to {
            config.substitute_to = target;
        }
        if let Some(min_idle) = self.pool_min_idle {
            config.connection_pool.min_idle = min_idle;
        }
        if let Some(max_size) = self.pool_max_size {
            config.connection_pool.max_size = max_size;
        }

        config.validate()?;
        Ok(config)
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format);

    let config = args.into_config()?;

    let plan = match &config.plan {
        Some(path) => load_plan(path)?,
        None => Plan::new(),
    };
    let plan = Arc::new(plan);

    let pool = BackendPool::connect(&config.backend.addr, config.connection_pool.clone())
        .await
        .with_context(|| format!("Failed to connect to backend {}", config.backend.addr))?;

    if let Some(addr) = &config.listen.admin {
        let server = AdminApiServer::bind(
            addr,
            AdminState {
                plan: Arc::clone(&plan),
                pool: Some(pool.clone()),
            },
        )
        .await?;
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Admin API server error: {}", e);
            }
        });
    }

    if let Some(addr) = &config.listen.control {
        let server = ControlServer::bind(addr, Arc::clone(&plan)).await?;
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Control server error: {}", e);
            }
        });
    }

    let proxy = ProxyServer::bind(&config.listen.proxy, plan, pool, config.substitute_to).await?;

    tokio::select! {
        result = proxy.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_from(args: &[&str]) -> Config {
        Args::try_parse_from(std::iter::once("rift-tcp-proxy").chain(args.iter().copied()))
            .unwrap()
            .into_config()
            .unwrap()
    }

    #[test]
    fn test_listeners_enabled_by_default() {
        let config = config_from(&[]);
        assert_eq!(config.listen.admin.as_deref(), Some("127.0.0.1:8081"));
        assert_eq!(config.listen.control.as_deref(), Some("127.0.0.1:6380"));
    }

    #[test]
    fn test_listeners_can_be_disabled() {
        let config = config_from(&["--no-admin", "--no-control"]);
        assert!(config.listen.admin.is_none());
        assert!(config.listen.control.is_none());
    }

    #[test]
    fn test_flags_override_defaults() {
        let config = config_from(&[
            "--backend",
            "10.0.0.9:6379",
            "--admin-addr",
            "0.0.0.0:9000",
            "--substitute-to",
            "client",
            "--pool-max-size",
            "8",
            "--pool-min-idle",
            "2",
        ]);
        assert_eq!(config.backend.addr, "10.0.0.9:6379");
        assert_eq!(config.listen.admin.as_deref(), Some("0.0.0.0:9000"));
        assert_eq!(config.substitute_to, SubstituteTarget::Client);
        assert_eq!(config.connection_pool.max_size, 8);
        assert_eq!(config.connection_pool.min_idle, 2);
    }

    #[test]
    fn test_disable_conflicts_with_address() {
        let parsed = Args::try_parse_from([
            "rift-tcp-proxy",
            "--no-admin",
            "--admin-addr",
            "0.0.0.0:9000",
        ]);
        assert!(parsed.is_err());
    }
}
