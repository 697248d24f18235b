use chrono::NaiveDate;
use lottery_core::{codec, draw, Bet, Ledger, WINNING_NUMBER};
use tempfile::tempdir;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let temp_dir = tempdir()?;
    let ledger = Ledger::open(temp_dir.path().join("bets.csv")).await?;
    println!("Using ledger: {:?}", ledger.path());

    let birthdate = NaiveDate::from_ymd_opt(1999, 3, 17).ok_or("invalid date")?;
    let bets = vec![
        Bet::new(1, "Santiago Lionel", "Lorca", "30904465", birthdate, WINNING_NUMBER)?,
        Bet::new(1, "Ana", "Gil", "24807259", birthdate, 123)?,
    ];

    // What an agency would put on the wire
    let payload = codec::encode(1, &bets)?;
    println!("Encoded batch: {}", payload);

    let decoded = codec::decode(&payload)?;
    let stored = ledger.append(&decoded.bets).await?;
    println!("Stored {} bet(s) for agency {}", stored, decoded.agency);

    let winners = draw(&ledger, 2).await?;
    for agency in winners.agencies() {
        println!(
            "Agency {}: {:?}",
            agency,
            winners.get(agency).unwrap_or_default()
        );
    }

    Ok(())
}
