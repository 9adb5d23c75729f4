//! deskpilot - MCP stdio server for remote display automation.
//!
//! stdout carries the JSON-RPC stream; logs go to stderr and to a daily
//! file under `<home>/logs`.

mod handler;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use deskpilot_core::config::{default_config_path, deskpilot_home};
use deskpilot_core::{Automation, DeskpilotConfig, RfbConnector};
use deskpilot_mcp::McpServer;

use crate::handler::DaemonHandler;

#[derive(Parser, Debug)]
#[command(name = "deskpilot", version, about = "Remote display automation over MCP stdio")]
struct Args {
    /// Config file (default: $DESKPILOT_CONFIG, or <home>/config.yaml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Data directory for logs and screenshots (default: $DESKPILOT_HOME or ~/.deskpilot)
    #[arg(long)]
    home: Option<PathBuf>,

    /// Log directory (default: <home>/logs)
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Skip connecting presets marked autoconnect
    #[arg(long)]
    no_autoconnect: bool,
}

fn log_filter() -> tracing_subscriber::EnvFilter {
    let level = if let Ok(v) = std::env::var("RUST_LOG") {
        v
    } else if let Ok(v) = std::env::var("DESKPILOT_LOG_LEVEL") {
        match v.as_str() {
            "silent" => "off".to_string(),
            "fatal" => "error".to_string(),
            other => other.to_string(),
        }
    } else {
        "info".to_string()
    };

    tracing_subscriber::EnvFilter::try_new(level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
}

fn load_config(args: &Args, home: &Path) -> Result<DeskpilotConfig> {
    let path = match (&args.config, &args.home) {
        (Some(path), _) => path.clone(),
        (None, Some(_)) => home.join("config.yaml"),
        (None, None) => default_config_path(),
    };
    let mut config = DeskpilotConfig::load(&path)
        .with_context(|| format!("loading config {}", path.display()))?;
    config.apply_env_overrides();
    config.validate().context("invalid configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let home = args.home.clone().unwrap_or_else(deskpilot_home);
    std::fs::create_dir_all(&home).ok();

    let log_dir = args.log_dir.clone().unwrap_or_else(|| home.join("logs"));
    std::fs::create_dir_all(&log_dir).ok();
    let file_appender = tracing_appender::rolling::daily(&log_dir, "deskpilot.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    tracing_subscriber::registry()
        .with(log_filter())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false),
        )
        .init();

    std::panic::set_hook(Box::new(|info| {
        let payload = if let Some(s) = info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };
        let location = info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_default();
        eprintln!("PANIC at {}: {}", location, payload);
        tracing::error!(location = %location, "DAEMON PANIC: {}", payload);
    }));

    let config = load_config(&args, &home)?;
    let connector = Arc::new(RfbConnector::new(config.io_timeout()));
    let automation = Arc::new(Automation::new(config, connector));

    if !args.no_autoconnect {
        let connected = automation.autoconnect().await;
        if connected == 0 && automation.config().sessions.iter().any(|p| p.autoconnect) {
            warn!("No autoconnect preset could be reached");
        }
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        home = %home.display(),
        workers = automation.config().worker_threads,
        "deskpilot starting"
    );

    let handler = DaemonHandler::new(Arc::clone(&automation), home.join("screenshots"));
    let mut server = McpServer::new(handler);
    let served = server.run().await;

    automation.shutdown().await;
    info!("deskpilot stopped");
    served
}
