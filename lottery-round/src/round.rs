use crate::barrier::{AgencyBarrier, Phase};
use crate::error::{Result, RoundError};
use chrono::{DateTime, Utc};
use lottery_core::{AgencyId, WinnersTable};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Where a round is in its submission-draw-results cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundPhase {
    CollectingSubmissions,
    DrawPending,
    DistributingResults,
    RoundComplete,
    Aborted { reason: String },
}

/// How a round ended, as reported by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundOutcome {
    Completed {
        round: u64,
        winners: usize,
        delivered: usize,
    },
    Aborted {
        round: u64,
        reason: String,
    },
    Shutdown,
}

/// Bookkeeping for a single round. A fresh one is built for every cycle so
/// nothing leaks from one round into the next.
#[derive(Debug)]
pub struct Round {
    id: Uuid,
    number: u64,
    agencies: AgencyId,
    phase: RoundPhase,
    started_at: DateTime<Utc>,
    submissions: AgencyBarrier,
    results: AgencyBarrier,
    winners: Option<Arc<WinnersTable>>,
}

impl Round {
    pub fn new(number: u64, agencies: AgencyId) -> Self {
        Self {
            id: Uuid::new_v4(),
            number,
            agencies,
            phase: RoundPhase::CollectingSubmissions,
            started_at: Utc::now(),
            submissions: AgencyBarrier::new(Phase::Submissions, agencies),
            results: AgencyBarrier::new(Phase::Results, agencies),
            winners: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn agencies(&self) -> AgencyId {
        self.agencies
    }

    pub fn phase(&self) -> &RoundPhase {
        &self.phase
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn submissions(&self) -> &AgencyBarrier {
        &self.submissions
    }

    pub fn results(&self) -> &AgencyBarrier {
        &self.results
    }

    pub fn winners(&self) -> Option<&Arc<WinnersTable>> {
        self.winners.as_ref()
    }

    /// Move to the draw once every agency has finished submitting.
    pub fn begin_draw(&mut self) -> Result<()> {
        if !matches!(self.phase, RoundPhase::CollectingSubmissions) {
            return Err(RoundError::invalid_state(format!(
                "Cannot start draw from {:?}",
                self.phase
            )));
        }

        if !self.submissions.is_complete() {
            return Err(RoundError::invalid_state(format!(
                "Agencies {:?} have not finished submitting",
                self.submissions.snapshot().pending()
            )));
        }

        self.phase = RoundPhase::DrawPending;
        tracing::info!("Round {} ({}) entering draw", self.number, self.id);
        Ok(())
    }

    /// Freeze the draw result and open the results phase.
    pub fn publish(&mut self, winners: WinnersTable) -> Result<Arc<WinnersTable>> {
        if !matches!(self.phase, RoundPhase::DrawPending) {
            return Err(RoundError::invalid_state(format!(
                "Cannot publish winners from {:?}",
                self.phase
            )));
        }

        let winners = Arc::new(winners);
        self.winners = Some(Arc::clone(&winners));
        self.phase = RoundPhase::DistributingResults;

        tracing::info!(
            "Round {} ({}) distributing results for {} winner(s)",
            self.number,
            self.id,
            winners.total_winners()
        );
        Ok(winners)
    }

    pub fn complete(&mut self) -> Result<()> {
        if !matches!(self.phase, RoundPhase::DistributingResults) {
            return Err(RoundError::invalid_state(format!(
                "Cannot complete round from {:?}",
                self.phase
            )));
        }

        self.phase = RoundPhase::RoundComplete;
        tracing::info!(
            "Round {} ({}) complete after {}",
            self.number,
            self.id,
            Utc::now() - self.started_at
        );
        Ok(())
    }

    pub fn abort(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::warn!("Round {} ({}) aborted: {}", self.number, self.id, reason);
        self.phase = RoundPhase::Aborted { reason };
    }
}
