pub mod results;
pub mod submit;

use crate::config::AgencyConfig;
use clap::Subcommand;

pub use results::{print_winners, query_winners};
pub use submit::submit_bets;

#[derive(Subcommand)]
pub enum AgencyCommands {
    /// Submit the bets file, then wait for this round's winners
    Run,
    /// Submit the bets file only
    Submit,
    /// Query this round's winners only
    Results,
}

pub async fn handle_command(cmd: AgencyCommands, config: &AgencyConfig) -> anyhow::Result<()> {
    match cmd {
        AgencyCommands::Run => {
            submit(config).await?;
            results(config).await?;
        }
        AgencyCommands::Submit => submit(config).await?,
        AgencyCommands::Results => results(config).await?,
    }

    Ok(())
}

async fn submit(config: &AgencyConfig) -> anyhow::Result<()> {
    let report = submit_bets(config).await?;
    println!(
        "Agency {} submitted {} bet(s) in {} batch(es)",
        config.agency, report.bets, report.batches
    );
    Ok(())
}

async fn results(config: &AgencyConfig) -> anyhow::Result<()> {
    let winners = query_winners(config).await?;
    print_winners(config.agency, &winners);
    Ok(())
}
