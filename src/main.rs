//! Gateway reverse proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌──────────────────────────────────────────────┐
//!                      │                   GATEWAY                     │
//!   Client Request     │  ┌──────────┐   ┌─────────┐   ┌────────────┐ │
//!   ───────────────────┼─▶│ listener │──▶│ handler │──▶│ proxy      │─┼──┐
//!                      │  └──────────┘   └─────────┘   │ client     │ │  │
//!                      │       ▲                       └────────────┘ │  │
//!                      │  ┌────┴─────────────┐                        │  │
//!                      │  │ shutdown         │◀── SIGTERM / SIGINT    │  │
//!                      │  │ coordinator      │                        │  │
//!                      │  └──────────────────┘                        │  │
//!                      └──────────────────────────────────────────────┘  │
//!            ┌───────────────────────────────────────────────────────────┘
//!            ├─ direct_dial ─────────────────────────────────▶ Backend
//!            └─ bus_tunnel ──▶ NATS ──▶ tunnel-responder ────▶ Backend
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use url::Url;

use gateway_proxy::config::{self, GatewayConfig, TransportSettings};
use gateway_proxy::lifecycle::{signals, Shutdown, ShutdownCoordinator};
use gateway_proxy::net::Listener;
use gateway_proxy::observability::{logging, metrics};
use gateway_proxy::proxy::{self, ReverseProxyClient};
use gateway_proxy::transport::{BusTunnelResponder, BusTunnelTransport};

#[derive(Parser)]
#[command(name = "gateway")]
#[command(about = "Reverse proxy forwarding to an upstream over direct TCP or a NATS tunnel", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`.
    #[arg(long)]
    bind: Option<String>,

    /// Override `upstream.base_url`.
    #[arg(long)]
    upstream: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Clone, Copy, Default)]
enum Command {
    /// Accept HTTP and forward it upstream (default).
    #[default]
    Serve,
    /// Execute requests arriving over the bus tunnel against a local backend.
    TunnelResponder,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load(&cli)?;

    logging::init(&config.observability)?;
    tracing::info!("gateway v{} starting", env!("CARGO_PKG_VERSION"));

    if config.observability.metrics_enabled {
        metrics::init_metrics(config.observability.metrics_address.parse()?)?;
    }

    let shutdown = Shutdown::new();
    signals::spawn_signal_handler(shutdown.clone());

    let result = match cli.command.unwrap_or_default() {
        Command::Serve => serve(config, shutdown).await,
        Command::TunnelResponder => tunnel_responder(config, shutdown).await,
    };

    match &result {
        Ok(()) => tracing::info!("Shutdown complete"),
        Err(e) => tracing::error!(error = %e, "Gateway stopped with error"),
    }
    result
}

fn load(cli: &Cli) -> Result<GatewayConfig, config::ConfigError> {
    let mut config = match &cli.config {
        Some(path) => config::read_config(path)?,
        None => GatewayConfig::default(),
    };
    if let Some(bind) = &cli.bind {
        config.listener.bind_address = bind.clone();
    }
    if let Some(upstream) = &cli.upstream {
        config.upstream.base_url = upstream.clone();
    }
    config::validate_config(&config).map_err(config::ConfigError::Validation)?;
    Ok(config)
}

async fn serve(config: GatewayConfig, shutdown: Shutdown) -> Result<(), Box<dyn std::error::Error>> {
    let client = Arc::new(ReverseProxyClient::from_config(&config.upstream).await?);
    let base_url = config.upstream.parsed_base_url()?;
    let router = proxy::router(client, base_url);

    let listener = Listener::bind(&config.listener).await?;
    let coordinator = ShutdownCoordinator::new(config.shutdown.grace_period());
    coordinator.serve(listener, router, shutdown.signal()).await?;
    Ok(())
}

async fn tunnel_responder(config: GatewayConfig, shutdown: Shutdown) -> Result<(), Box<dyn std::error::Error>> {
    let TransportSettings::BusTunnel {
        address,
        port,
        subject_prefix,
    } = &config.upstream.transport
    else {
        return Err("tunnel-responder requires upstream.transport.kind = \"bus_tunnel\"".into());
    };

    let timeout = config.upstream.timeout();
    let backend_url = Url::parse(&config.responder.backend_url)?;
    let backend = ReverseProxyClient::direct_dial(
        &backend_url,
        timeout,
        config.responder.max_idle_conns,
        config.responder.max_idle_conns_per_host,
    )?;
    let bus = BusTunnelTransport::connect(address, *port, subject_prefix, timeout).await?;

    let responder = BusTunnelResponder::new(bus.client(), bus.subject_prefix(), Arc::new(backend), backend_url);
    responder.run(shutdown.signal()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_apply_before_validation() {
        let path = std::env::temp_dir().join(format!("gateway-cli-{}.toml", std::process::id()));
        std::fs::write(&path, "[listener]\nbind_address = \"nowhere\"\n").unwrap();
        let path_arg = path.to_string_lossy().into_owned();

        let cli = Cli::parse_from(["gateway", "--config", path_arg.as_str(), "--bind", "127.0.0.1:9000"]);
        let config = load(&cli).unwrap();
        assert_eq!(config.listener.bind_address, "127.0.0.1:9000");

        let cli = Cli::parse_from(["gateway", "--config", path_arg.as_str()]);
        assert!(matches!(load(&cli), Err(config::ConfigError::Validation(_))));

        std::fs::remove_file(&path).unwrap();
    }
}
