//! MRP daemon binary

use anyhow::Context;
use clap::Parser;
use mrp_server::{Config, LogFormat, MrpServer};
use std::path::PathBuf;
use tokio::signal::unix::{Signal, SignalKind, signal};

/// Command-line arguments.
#[derive(Parser)]
#[command(name = "mrp_server", version, about = "Media Redundancy Protocol daemon")]
struct Cli {
    /// Configuration file, instead of the default search paths
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level or filter, overrides the configuration file
    #[arg(short, long)]
    log_level: Option<String>,

    /// Log as JSON
    #[arg(long)]
    json: bool,

    /// Control socket path, overrides the configuration file
    #[arg(long)]
    control_socket: Option<String>,
}

struct Signals {
    terminate: Signal,
    interrupt: Signal,
    hangup: Signal,
}

impl Signals {
    fn install() -> std::io::Result<Self> {
        Ok(Self {
            terminate: signal(SignalKind::terminate())?,
            interrupt: signal(SignalKind::interrupt())?,
            hangup: signal(SignalKind::hangup())?,
        })
    }

    async fn wait(mut self) {
        tokio::select! {
            _ = self.terminate.recv() => tracing::info!("SIGTERM received"),
            _ = self.interrupt.recv() => tracing::info!("SIGINT received"),
            _ = self.hangup.recv() => tracing::info!("SIGHUP received"),
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(path) = cli.control_socket {
        config.server.control_socket = path;
    }

    let level = cli
        .log_level
        .or_else(|| config.logging.level.clone())
        .unwrap_or_else(|| "info".to_string());
    if cli.json || config.logging.format == LogFormat::Json {
        common::logging::init_json(&level);
    } else {
        common::logging::init(&level);
    }

    tracing::info!("MRP server starting");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build runtime")?;

    runtime.block_on(async {
        let signals = Signals::install().context("Failed to install signal handlers")?;
        let server = MrpServer::bind(&config).context("Failed to start MRP server")?;
        server.run(signals.wait()).await.context("MRP server failed")
    })
}
