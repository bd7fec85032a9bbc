//! Connect sidecar bridge
//!
//! Runs next to a service, follows its connect registration in the service
//! registry and keeps a local proxy configured and running.
//!
//! # Architecture Overview
//!
//! ```text
//!   ┌──────────────────────────── CONNECT BRIDGE ────────────────────────────┐
//!   │                                                                        │
//!   │  ┌──────────┐  roots / leaf   ┌──────────┐  secret   ┌─────────────┐   │
//!   │  │ registry │────────────────▶│  runner  │──────────▶│ secret store│   │
//!   │  │ fetcher  │                 └────┬─────┘           └─────────────┘   │
//!   │  └────┬─────┘                      │ bundle                            │
//!   │       │ proxy config               ▼                                   │
//!   │       ▼                     ┌────────────┐  --restart-epoch N          │
//!   │  ┌────────────┐  role       │   envoy    │───────────────────────▶ proxy
//!   │  │ translator │──────────▶  │ supervisor │                             │
//!   │  └────────────┘ role store  └────────────┘                             │
//!   │                                                                        │
//!   │  cross-cutting: config · observability · lifecycle                     │
//!   └────────────────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};

use connect_bridge::config::identity::ProxyIdentity;
use connect_bridge::config::loader::{apply_env_overrides, read_config, validate};
use connect_bridge::lifecycle::signals::cancel_on_signal;
use connect_bridge::observability::{logging, metrics};
use connect_bridge::{BridgeConfig, BridgeError, Runner, Shutdown};

#[derive(Parser)]
#[command(name = "connect-bridge", version)]
#[command(about = "Sidecar bridge between a service registry and a local proxy", long_about = None)]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long, global = true, env = "CONNECT_BRIDGE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch connect configuration and supervise the proxy
    Bridge(BridgeArgs),
}

#[derive(Args, Debug, Default)]
struct BridgeArgs {
    /// Control plane address the proxy fetches discovery from
    #[arg(long)]
    xds_address: Option<String>,

    /// Control plane port
    #[arg(long)]
    xds_port: Option<u16>,

    /// Reach the control plane over a generated unix socket
    #[arg(long)]
    xds_uds: bool,

    /// Directory for the bootstrap and certificate files
    #[arg(long)]
    conf_dir: Option<PathBuf>,

    /// Proxy binary to launch
    #[arg(long)]
    envoy_path: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

impl BridgeArgs {
    /// Flags win over the file and the environment.
    fn apply(self, config: &mut BridgeConfig) {
        if let Some(address) = self.xds_address {
            config.control_plane.address = address;
        }
        if let Some(port) = self.xds_port {
            config.control_plane.port = port;
        }
        if self.xds_uds {
            config.control_plane.use_uds = true;
        }
        if let Some(dir) = self.conf_dir {
            config.config_dir = Some(dir);
        }
        if let Some(binary) = self.envoy_path {
            config.envoy.binary = binary;
        }
        if let Some(level) = self.log_level {
            config.observability.log_level = level;
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Bridge failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), BridgeError> {
    let Commands::Bridge(args) = cli.command;

    let mut config = read_config(cli.config.as_deref())?;
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    args.apply(&mut config);
    let config = validate(config)?;

    if let Err(e) = logging::init_logging(&config.observability.log_level) {
        eprintln!("warning: logging already initialized: {e}");
    }

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "connect-bridge starting");
    tracing::info!(
        registry = %config.registry.address,
        scheme = %config.registry.scheme,
        proxy_binary = %config.envoy.binary,
        use_uds = config.control_plane.use_uds,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics exporter");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let identity = ProxyIdentity::from_env()?;
    let shutdown = Shutdown::new();
    let signals = cancel_on_signal(shutdown.clone()).map_err(BridgeError::Signals)?;

    let runner = Runner::from_config(config, identity)?;
    let result = runner.run(shutdown).await;
    signals.abort();

    tracing::info!("Shutdown complete");
    result
}
