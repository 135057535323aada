//! Aura tunnel CLI
//!
//! `run` hosts the tunnel controller and its control socket in the
//! foreground; `start`, `stop` and `status` talk to a running instance
//! through that socket.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use aura_engine::{
    ControlClient, ControlServer, Socks5Connector, TunnelConfig, TunnelController, TunnelEngine,
    DEFAULT_SOCKET_PATH,
};
use aura_tun::NativeProvider;

/// Aura - DNS-tunnel VPN client
#[derive(Parser)]
#[command(name = "aura")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the control socket
    #[arg(short, long, default_value = DEFAULT_SOCKET_PATH)]
    socket: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Host the tunnel service in the foreground
    Run {
        /// Start the tunnel immediately for this domain (absolute form)
        #[arg(long)]
        domain: Option<String>,

        /// DNS server as host or host:port (default: public resolver)
        #[arg(long)]
        dns_server: Option<String>,
    },

    /// Start the tunnel on a running instance
    Start {
        /// Tunnel domain (absolute form, e.g. "tunnel.example.com.")
        #[arg(long)]
        domain: String,

        /// DNS server as host or host:port (default: public resolver)
        #[arg(long)]
        dns_server: Option<String>,

        /// Intercept only these application identifiers
        #[arg(long = "allow-app")]
        allowed_apps: Vec<String>,
    },

    /// Stop the tunnel on a running instance
    Stop,

    /// Query tunnel status from a running instance
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level);

    match cli.command {
        Commands::Run { domain, dns_server } => run_service(cli.socket, domain, dns_server).await,
        Commands::Start {
            domain,
            dns_server,
            allowed_apps,
        } => {
            let client = ControlClient::new(&cli.socket);
            let config = TunnelConfig {
                dns_server,
                domain,
                allowed_apps: if allowed_apps.is_empty() {
                    None
                } else {
                    Some(allowed_apps)
                },
            };
            client.start(config).await.context("start failed")?;
            println!("tunnel started");
            Ok(())
        }
        Commands::Stop => {
            let client = ControlClient::new(&cli.socket);
            client.stop().await.context("stop failed")?;
            println!("tunnel stopped");
            Ok(())
        }
        Commands::Status => {
            let client = ControlClient::new(&cli.socket);
            let status = client.status().await.context("status query failed")?;
            println!(
                "state: {} (engine {})",
                status.state,
                if status.engine_running {
                    "running"
                } else {
                    "stopped"
                }
            );
            println!(
                "out: {} packets / {} bytes, in: {} packets / {} bytes",
                status.packets_out, status.bytes_out, status.packets_in, status.bytes_in
            );
            Ok(())
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[cfg(feature = "ffi-engine")]
fn tunnel_engine() -> Arc<dyn TunnelEngine> {
    Arc::new(aura_engine::engine::ffi::FfiEngine::new())
}

/// Placeholder engine for builds without the engine library linked in
#[cfg(not(feature = "ffi-engine"))]
struct UnlinkedEngine;

#[cfg(not(feature = "ffi-engine"))]
impl TunnelEngine for UnlinkedEngine {
    fn start_tunnel(&self, _dns_server: &str, _domain: &str) -> String {
        "tunnel engine library is not linked into this build \
         (rebuild with --features ffi-engine)"
            .to_string()
    }

    fn stop_tunnel(&self) -> String {
        String::new()
    }

    fn is_running(&self) -> bool {
        false
    }
}

#[cfg(not(feature = "ffi-engine"))]
fn tunnel_engine() -> Arc<dyn TunnelEngine> {
    Arc::new(UnlinkedEngine)
}

async fn run_service(
    socket: PathBuf,
    domain: Option<String>,
    dns_server: Option<String>,
) -> Result<()> {
    info!("starting tunnel service...");

    let controller = TunnelController::new(
        Arc::new(NativeProvider::new()),
        tunnel_engine(),
        Arc::new(Socks5Connector::default()),
    );

    let server = ControlServer::new(&socket, controller.clone());
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.serve().await {
            error!("control socket error: {}", e);
        }
    });
    info!("control socket at {:?}", socket);

    if let Some(domain) = domain {
        let config = TunnelConfig::new(dns_server, domain);
        match controller.start(config).await {
            Ok(()) => info!("tunnel started"),
            Err(e) => error!("failed to start tunnel: {}", e),
        }
    }

    wait_for_shutdown().await;
    info!("shutting down...");

    if let Err(e) = controller.stop().await {
        error!("error stopping tunnel: {}", e);
    }

    server_handle.abort();
    Ok(())
}

async fn wait_for_shutdown() {
    match signal::ctrl_c().await {
        Ok(()) => {}
        Err(e) => error!("failed to listen for shutdown signal: {}", e),
    }
}
