//! Text encoding of a batch of bets into a single framed payload.
//!
//! Records are joined with `;` and fields with `,`. An empty batch, which is
//! only sent as an agency's final message, carries the bare agency id so the
//! receiver still knows who reached end-of-stream.

use crate::error::{LotteryError, Result};
use crate::types::{parse_agency, AgencyId, Bet, BATCH_DELIMITER, FIELD_DELIMITER};

/// Bets decoded from one payload, all placed at the same agency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedBatch {
    pub agency: AgencyId,
    pub bets: Vec<Bet>,
}

pub fn encode(agency: AgencyId, records: &[Bet]) -> Result<String> {
    if let Some(foreign) = records.iter().find(|bet| bet.agency() != agency) {
        return Err(LotteryError::decode(format!(
            "bet {} belongs to agency {}, not {}",
            foreign.document(),
            foreign.agency(),
            agency
        )));
    }

    if records.is_empty() {
        return Ok(agency.to_string());
    }

    Ok(records
        .iter()
        .map(Bet::to_record)
        .collect::<Vec<_>>()
        .join(&BATCH_DELIMITER.to_string()))
}

pub fn decode(payload: &str) -> Result<DecodedBatch> {
    if !payload.contains(FIELD_DELIMITER) {
        let agency = parse_agency(payload)
            .map_err(|e| LotteryError::decode(format!("empty batch header: {}", e)))?;
        return Ok(DecodedBatch {
            agency,
            bets: Vec::new(),
        });
    }

    let mut bets = Vec::new();
    for (index, record) in payload.split(BATCH_DELIMITER).enumerate() {
        let fields: Vec<&str> = record.split(FIELD_DELIMITER).collect();
        let bet = Bet::parse(&fields)
            .map_err(|e| LotteryError::decode(format!("record {}: {}", index, e)))?;
        bets.push(bet);
    }

    let agency = bets[0].agency();
    if let Some(foreign) = bets.iter().find(|bet| bet.agency() != agency) {
        return Err(LotteryError::decode(format!(
            "batch mixes agencies {} and {}",
            agency,
            foreign.agency()
        )));
    }

    Ok(DecodedBatch { agency, bets })
}
