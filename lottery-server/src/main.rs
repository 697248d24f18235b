use anyhow::Context;
use clap::Parser;
use lottery_core::{Ledger, ProtocolConfig, ServerConfig};
use lottery_round::RoundCoordinator;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "lottery-server")]
#[command(about = "Central server collecting agency bets and announcing winners")]
#[command(version)]
struct Cli {
    /// Address both listeners bind to
    #[arg(long, env = "SERVER_BIND", default_value = "0.0.0.0")]
    bind: IpAddr,

    /// Port accepting bet submissions
    #[arg(long, env = "SERVER_PORT", default_value_t = 12345)]
    port: u16,

    /// Port answering winners queries
    #[arg(long, env = "RESULTS_PORT", default_value_t = 12346)]
    results_port: u16,

    #[arg(long, env = "LISTEN_BACKLOG", default_value_t = 5)]
    listen_backlog: u32,

    /// Number of participating agencies
    #[arg(short = 'n', long, env = "AGENCIES", default_value_t = 5)]
    agencies: u32,

    /// Append-only bets file
    #[arg(long, env = "LEDGER_PATH", default_value = "./bets.csv")]
    ledger: PathBuf,

    /// Seconds to wait for every agency to finish submitting
    #[arg(long, env = "SUBMISSION_TIMEOUT", default_value_t = 300)]
    submission_timeout: u64,

    /// Seconds to wait for every agency to collect its winners
    #[arg(long, env = "RESULTS_TIMEOUT", default_value_t = 120)]
    results_timeout: u64,

    /// Seconds in-flight workers get before being aborted
    #[arg(long, env = "JOIN_TIMEOUT", default_value_t = 10)]
    join_timeout: u64,

    /// JSON file with wire protocol settings
    #[arg(long, env = "PROTOCOL_CONFIG")]
    protocol_config: Option<PathBuf>,

    /// Stop after this many rounds
    #[arg(long)]
    rounds: Option<u64>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn server_config(&self) -> anyhow::Result<ServerConfig> {
        let protocol = ProtocolConfig::load(self.protocol_config.as_deref())
            .context("Failed to load protocol config")?;

        Ok(ServerConfig {
            submissions_addr: SocketAddr::new(self.bind, self.port),
            results_addr: SocketAddr::new(self.bind, self.results_port),
            listen_backlog: self.listen_backlog,
            agencies: self.agencies,
            ledger_path: self.ledger.clone(),
            submission_timeout: Duration::from_secs(self.submission_timeout),
            results_timeout: Duration::from_secs(self.results_timeout),
            join_timeout: Duration::from_secs(self.join_timeout),
            protocol,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "lottery_server={},lottery_round={},lottery_core={}",
                log_level, log_level, log_level
            ))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run(cli).await {
        tracing::error!(action = "server", result = "fail", error = %e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = cli.server_config()?;
    config.validate()?;

    tracing::info!(
        action = "config",
        result = "success",
        submissions = %config.submissions_addr,
        results = %config.results_addr,
        listen_backlog = config.listen_backlog,
        agencies = config.agencies,
        ledger = %config.ledger_path.display(),
        max_packet_size = config.protocol.max_packet_size,
    );

    let ledger = Ledger::open(&config.ledger_path)
        .await
        .with_context(|| format!("Failed to open ledger {}", config.ledger_path.display()))?;

    let shutdown = CancellationToken::new();
    let coordinator = RoundCoordinator::bind(config, Arc::new(ledger), shutdown.clone()).await?;

    tokio::spawn(watch_signals(shutdown));

    coordinator.run(cli.rounds).await?;
    Ok(())
}

/// Cancel `shutdown` on Ctrl-C or SIGTERM.
async fn watch_signals(shutdown: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::pin!(terminate);

    tokio::select! {
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => {
                tracing::info!(action = "handle_signal", result = "in_progress", signal = "SIGINT");
            }
            Err(e) => {
                tracing::warn!("Cannot listen for Ctrl-C: {}", e);
                (&mut terminate).await;
                tracing::info!(action = "handle_signal", result = "in_progress", signal = "SIGTERM");
            }
        },
        _ = &mut terminate => {
            tracing::info!(action = "handle_signal", result = "in_progress", signal = "SIGTERM");
        }
    }

    shutdown.cancel();
}
