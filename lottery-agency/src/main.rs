mod commands;
mod config;

use clap::Parser;
use commands::AgencyCommands;
use config::AgencyConfig;
use lottery_core::{AgencyId, ProtocolConfig};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "agency")]
#[command(about = "Lottery agency - submit bets and collect winners")]
#[command(version)]
struct Cli {
    /// Agency identifier
    #[arg(long, env = "CLI_ID", global = true, default_value_t = 1)]
    id: AgencyId,

    /// Lottery server host
    #[arg(long, env = "SERVER_IP", global = true, default_value = "127.0.0.1")]
    server: String,

    /// Bet submission port
    #[arg(long, env = "SERVER_PORT", global = true, default_value_t = 12345)]
    port: u16,

    /// Winners query port
    #[arg(long, env = "RESULTS_PORT", global = true, default_value_t = 12346)]
    results_port: u16,

    /// Headerless CSV of first_name,last_name,document,birthdate,number
    #[arg(long, env = "BETS_FILE", global = true, default_value = "./agency.csv")]
    bets_file: PathBuf,

    /// Maximum bets per batch
    #[arg(long, env = "BATCH_SIZE", global = true, default_value_t = 100)]
    batch_size: usize,

    /// JSON file with wire protocol settings
    #[arg(long, env = "PROTOCOL_CONFIG", global = true)]
    protocol_config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: AgencyCommands,
}

impl Cli {
    fn agency_config(&self) -> anyhow::Result<AgencyConfig> {
        let config = AgencyConfig {
            agency: self.id,
            server_host: self.server.clone(),
            submissions_port: self.port,
            results_port: self.results_port,
            bets_file: self.bets_file.clone(),
            batch_size: self.batch_size,
            protocol: ProtocolConfig::load(self.protocol_config.as_deref())?,
        };
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("agency={},lottery_core={}", log_level, log_level))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match cli.agency_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    };

    tracing::debug!(?config, "Agency configuration");

    let result = tokio::select! {
        result = commands::handle_command(cli.command, &config) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!(action = "handle_signal", result = "success", agency = config.agency);
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
