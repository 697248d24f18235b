use crate::config::AgencyConfig;
use anyhow::Context;
use comfy_table::{presets::UTF8_FULL, Table};
use lottery_core::types::FIELD_DELIMITER;
use lottery_core::{AgencyId, Framer};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Ask the server for this agency's winning documents.
pub async fn query_winners(config: &AgencyConfig) -> anyhow::Result<Vec<String>> {
    let stream = TcpStream::connect(config.results_addr())
        .await
        .with_context(|| format!("Failed to connect to {}", config.results_addr()))?;
    let mut framer = Framer::new(stream, config.protocol.clone());

    query_from(&mut framer, config.agency).await
}

pub async fn query_from<S>(framer: &mut Framer<S>, agency: AgencyId) -> anyhow::Result<Vec<String>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    framer.send_message(&agency.to_string(), true).await?;

    let (payload, _eof) = framer.receive_message().await.map_err(|e| {
        tracing::error!(action = "query_winners", result = "fail", agency, error = %e);
        e
    })?;
    framer.send_ack(true).await?;

    let winners: Vec<String> = payload
        .split(FIELD_DELIMITER)
        .filter(|document| !document.is_empty())
        .map(str::to_string)
        .collect();

    tracing::info!(
        action = "query_winners",
        result = "success",
        agency,
        winners = winners.len(),
    );
    Ok(winners)
}

pub fn print_winners(agency: AgencyId, winners: &[String]) {
    if winners.is_empty() {
        println!("Agency {} has no winners this round.", agency);
        return;
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["#", "Document"]);

    for (i, document) in winners.iter().enumerate() {
        table.add_row(vec![(i + 1).to_string(), document.clone()]);
    }

    println!("Winners for agency {}:", agency);
    println!("{table}");
}
