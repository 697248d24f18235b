use crate::barrier::BarrierHandle;
use crate::error::{Result, RoundError};
use lottery_core::codec::{self, DecodedBatch};
use lottery_core::{AgencyId, Framer, Ledger, LotteryError, ProtocolConfig};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

/// Steps of draining one agency's batch stream.
#[derive(Debug)]
enum SubmissionState {
    AwaitBatch,
    Persisting { batch: DecodedBatch, eof: bool },
    Acknowledging { agency: AgencyId, eof: bool },
    Done,
}

/// What one submission connection delivered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmissionSummary {
    pub agency: Option<AgencyId>,
    pub batches: usize,
    pub bets: usize,
    pub eof: bool,
}

/// Receives batches until end-of-stream, storing and acknowledging each one.
pub struct SubmissionWorker<S> {
    framer: Framer<S>,
    peer: String,
    ledger: Arc<Ledger>,
    barrier: BarrierHandle,
    summary: SubmissionSummary,
}

impl<S> SubmissionWorker<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(
        stream: S,
        peer: impl Into<String>,
        protocol: ProtocolConfig,
        ledger: Arc<Ledger>,
        barrier: BarrierHandle,
    ) -> Self {
        Self {
            framer: Framer::new(stream, protocol),
            peer: peer.into(),
            ledger,
            barrier,
            summary: SubmissionSummary::default(),
        }
    }

    /// Run to completion. Failures are logged and, while the connection is
    /// still up, answered with a negative ack; they never propagate to the
    /// caller.
    pub async fn serve(mut self) -> SubmissionSummary {
        match self.run().await {
            Ok(()) => {
                tracing::info!(
                    action = "receive_bets",
                    result = "success",
                    peer = %self.peer,
                    agency = ?self.summary.agency,
                    batches = self.summary.batches,
                    bets = self.summary.bets,
                    eof = self.summary.eof,
                    "Submission connection finished"
                );
            }
            Err(e) => {
                tracing::error!(
                    action = "receive_bets",
                    result = "fail",
                    peer = %self.peer,
                    agency = ?self.summary.agency,
                    error = %e,
                    "Submission stream failed"
                );

                if !e.is_transport() {
                    if let Err(nack_err) = self.framer.send_ack(false).await {
                        tracing::warn!(
                            action = "send_nack",
                            result = "fail",
                            peer = %self.peer,
                            error = %nack_err,
                            "Could not deliver negative ack"
                        );
                    }
                }
            }
        }

        self.summary
    }

    async fn run(&mut self) -> Result<()> {
        let mut state = SubmissionState::AwaitBatch;

        loop {
            state = match state {
                SubmissionState::AwaitBatch => match self.framer.try_receive_message().await? {
                    Some((payload, eof)) => {
                        let batch = codec::decode(&payload)?;
                        SubmissionState::Persisting { batch, eof }
                    }
                    None => {
                        // The agency may carry on over another connection.
                        tracing::debug!(
                            "Agency {:?} at {} hung up between batches",
                            self.summary.agency,
                            self.peer
                        );
                        SubmissionState::Done
                    }
                },
                SubmissionState::Persisting { batch, eof } => {
                    if batch.bets.is_empty() && !eof {
                        return Err(LotteryError::decode(format!(
                            "empty batch from agency {} without end-of-stream",
                            batch.agency
                        ))
                        .into());
                    }
                    self.claim(batch.agency)?;
                    let stored = self.ledger.append(&batch.bets).await?;
                    self.summary.batches += 1;
                    self.summary.bets += stored;
                    SubmissionState::Acknowledging {
                        agency: batch.agency,
                        eof,
                    }
                }
                SubmissionState::Acknowledging { agency, eof } => {
                    self.framer.send_ack(true).await?;
                    if eof {
                        self.summary.eof = true;
                        if !self.barrier.arrive(agency)? {
                            tracing::debug!(
                                "Agency {} sent end-of-stream again from {}",
                                agency,
                                self.peer
                            );
                        }
                        SubmissionState::Done
                    } else {
                        SubmissionState::AwaitBatch
                    }
                }
                SubmissionState::Done => return Ok(()),
            };
        }
    }

    /// A connection speaks for exactly one agency of the roster.
    fn claim(&mut self, agency: AgencyId) -> Result<()> {
        if !self.barrier.is_member(agency) {
            return Err(RoundError::UnknownAgency(agency));
        }

        match self.summary.agency {
            Some(expected) if expected != agency => Err(RoundError::MixedAgencies {
                expected,
                found: agency,
            }),
            _ => {
                self.summary.agency = Some(agency);
                Ok(())
            }
        }
    }
}
