use crate::error::{LotteryError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Agencies are numbered densely from 1.
pub type AgencyId = u32;

/// The published winning number of the draw.
pub const WINNING_NUMBER: u64 = 7574;

/// Separates the fields of one bet record.
pub const FIELD_DELIMITER: char = ',';

/// Separates bet records inside one batch.
pub const BATCH_DELIMITER: char = ';';

const BIRTHDATE_FORMAT: &str = "%Y-%m-%d";

/// A single lottery bet placed at an agency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bet {
    agency: AgencyId,
    first_name: String,
    last_name: String,
    document: String,
    birthdate: NaiveDate,
    number: u64,
}

impl Bet {
    pub fn new(
        agency: AgencyId,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        document: impl Into<String>,
        birthdate: NaiveDate,
        number: u64,
    ) -> Result<Self> {
        if agency == 0 {
            return Err(LotteryError::invalid_bet("agency must be a positive integer"));
        }

        let bet = Self {
            agency,
            first_name: first_name.into(),
            last_name: last_name.into(),
            document: document.into(),
            birthdate,
            number,
        };

        for (name, value) in [
            ("first_name", &bet.first_name),
            ("last_name", &bet.last_name),
            ("document", &bet.document),
        ] {
            if value.contains(FIELD_DELIMITER) || value.contains(BATCH_DELIMITER) {
                return Err(LotteryError::invalid_bet(format!(
                    "{} {:?} contains a reserved delimiter",
                    name, value
                )));
            }
        }

        Ok(bet)
    }

    /// Build a bet from its six textual fields, in record order.
    pub fn parse(fields: &[&str]) -> Result<Self> {
        let [agency, first_name, last_name, document, birthdate, number] = fields else {
            return Err(LotteryError::invalid_bet(format!(
                "expected 6 fields, got {}",
                fields.len()
            )));
        };

        let agency = parse_agency(agency)?;
        let birthdate = NaiveDate::parse_from_str(birthdate.trim(), BIRTHDATE_FORMAT)
            .map_err(|e| LotteryError::invalid_bet(format!("birthdate {:?}: {}", birthdate, e)))?;
        let number = number
            .trim()
            .parse::<u64>()
            .map_err(|e| LotteryError::invalid_bet(format!("number {:?}: {}", number, e)))?;

        Self::new(agency, *first_name, *last_name, *document, birthdate, number)
    }

    pub fn agency(&self) -> AgencyId {
        self.agency
    }

    pub fn first_name(&self) -> &str {
        &self.first_name
    }

    pub fn last_name(&self) -> &str {
        &self.last_name
    }

    pub fn document(&self) -> &str {
        &self.document
    }

    pub fn birthdate(&self) -> NaiveDate {
        self.birthdate
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn has_won(&self) -> bool {
        self.number == WINNING_NUMBER
    }

    /// Fields in record order, as written to the wire and the ledger.
    pub fn to_fields(&self) -> [String; 6] {
        [
            self.agency.to_string(),
            self.first_name.clone(),
            self.last_name.clone(),
            self.document.clone(),
            self.birthdate.format(BIRTHDATE_FORMAT).to_string(),
            self.number.to_string(),
        ]
    }

    pub fn to_record(&self) -> String {
        self.to_fields().join(&FIELD_DELIMITER.to_string())
    }
}

pub fn parse_agency(raw: &str) -> Result<AgencyId> {
    let agency = raw
        .trim()
        .parse::<AgencyId>()
        .map_err(|e| LotteryError::invalid_bet(format!("agency {:?}: {}", raw, e)))?;
    if agency == 0 {
        return Err(LotteryError::invalid_bet("agency must be a positive integer"));
    }
    Ok(agency)
}

/// Winning documents per agency, one entry for every agency in `1..=N`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WinnersTable {
    winners: BTreeMap<AgencyId, Vec<String>>,
}

impl WinnersTable {
    pub fn with_agencies(agencies: AgencyId) -> Self {
        Self {
            winners: (1..=agencies).map(|id| (id, Vec::new())).collect(),
        }
    }

    /// Returns false when the agency is not part of the table.
    pub fn record(&mut self, bet: &Bet) -> bool {
        match self.winners.get_mut(&bet.agency) {
            Some(documents) => {
                documents.push(bet.document.clone());
                true
            }
            None => false,
        }
    }

    pub fn get(&self, agency: AgencyId) -> Option<&[String]> {
        self.winners.get(&agency).map(Vec::as_slice)
    }

    pub fn agencies(&self) -> impl Iterator<Item = AgencyId> + '_ {
        self.winners.keys().copied()
    }

    pub fn total_winners(&self) -> usize {
        self.winners.values().map(Vec::len).sum()
    }

    pub fn len(&self) -> usize {
        self.winners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.winners.is_empty()
    }
}
