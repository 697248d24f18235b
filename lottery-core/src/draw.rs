use crate::error::Result;
use crate::storage::Ledger;
use crate::types::{AgencyId, Bet, WinnersTable};

/// Group the winning documents of `bets` by agency.
///
/// Every agency in `1..=agencies` gets an entry, empty when it has no
/// winners. Bets from agencies outside that range are skipped.
pub fn compute_winners<I>(bets: I, agencies: AgencyId) -> WinnersTable
where
    I: IntoIterator<Item = Bet>,
{
    let mut table = WinnersTable::with_agencies(agencies);

    for bet in bets.into_iter().filter(Bet::has_won) {
        if !table.record(&bet) {
            tracing::warn!(
                agency = bet.agency(),
                document = bet.document(),
                "Winning bet from an agency outside the roster, skipping"
            );
        }
    }

    table
}

/// Run the draw over the whole ledger history.
pub async fn draw(ledger: &Ledger, agencies: AgencyId) -> Result<WinnersTable> {
    let bets = ledger.load_all().await?;
    let scanned = bets.len();
    let table = compute_winners(bets, agencies);

    tracing::info!(
        action = "draw",
        result = "success",
        scanned,
        winners = table.total_winners(),
        "Draw completed"
    );
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WINNING_NUMBER;
    use chrono::NaiveDate;
    use tempfile::tempdir;

    fn bet(agency: AgencyId, document: &str, number: u64) -> Bet {
        let birthdate = NaiveDate::from_ymd_opt(1990, 12, 1).unwrap();
        Bet::new(agency, "Juan", "Perez", document, birthdate, number).unwrap()
    }

    #[test]
    fn test_compute_winners() {
        let bets = vec![
            bet(1, "11", WINNING_NUMBER),
            bet(1, "12", 1),
            bet(3, "31", WINNING_NUMBER),
            bet(3, "32", WINNING_NUMBER),
            bet(7, "71", WINNING_NUMBER),
        ];

        let table = compute_winners(bets, 3);
        assert_eq!(table.get(1).unwrap(), ["11"]);
        assert!(table.get(2).unwrap().is_empty());
        assert_eq!(table.get(3).unwrap(), ["31", "32"]);
        assert_eq!(table.get(7), None);
    }

    #[tokio::test]
    async fn test_draw_is_idempotent() {
        let dir = tempdir().unwrap();
        let ledger = Ledger::open(dir.path().join("bets.csv")).await.unwrap();
        ledger
            .append(&[bet(1, "11", WINNING_NUMBER), bet(2, "21", 123)])
            .await
            .unwrap();

        let first = draw(&ledger, 2).await.unwrap();
        let second = draw(&ledger, 2).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first, compute_winners(ledger.load_all().await.unwrap(), 2));
        assert_eq!(first.get(1).unwrap(), ["11"]);
        assert!(first.get(2).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_draw_skips_agencies_outside_roster() {
        let dir = tempdir().unwrap();
        let ledger = Ledger::open(dir.path().join("bets.csv")).await.unwrap();
        ledger.append(&[bet(1, "11", WINNING_NUMBER)]).await.unwrap();
        ledger.append(&[bet(4, "41", WINNING_NUMBER)]).await.unwrap();

        let table = draw(&ledger, 2).await.unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.total_winners(), 1);
        assert_eq!(table.get(4), None);
    }
}
