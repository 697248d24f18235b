use crate::barrier::BarrierHandle;
use crate::error::{Result, RoundError};
use lottery_core::types::{parse_agency, FIELD_DELIMITER};
use lottery_core::{AgencyId, Framer, LotteryError, ProtocolConfig, WinnersTable};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

/// Answers one agency's winners query.
pub struct ResultsWorker<S> {
    framer: Framer<S>,
    peer: String,
    winners: Arc<WinnersTable>,
    barrier: BarrierHandle,
}

impl<S> ResultsWorker<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(
        stream: S,
        peer: impl Into<String>,
        protocol: ProtocolConfig,
        winners: Arc<WinnersTable>,
        barrier: BarrierHandle,
    ) -> Self {
        Self {
            framer: Framer::new(stream, protocol),
            peer: peer.into(),
            winners,
            barrier,
        }
    }

    /// Run the exchange. Any failure closes the connection; the agency that
    /// was served, if any, is returned.
    pub async fn serve(mut self) -> Option<AgencyId> {
        match self.run().await {
            Ok(agency) => {
                tracing::info!(
                    action = "send_winners",
                    result = "success",
                    peer = %self.peer,
                    agency,
                    "Winners delivered"
                );
                Some(agency)
            }
            Err(e) => {
                tracing::error!(
                    action = "send_winners",
                    result = "fail",
                    peer = %self.peer,
                    error = %e,
                    "Closing results connection"
                );
                None
            }
        }
    }

    async fn run(&mut self) -> Result<AgencyId> {
        let (payload, _eof) = self.framer.receive_message().await?;
        let agency = parse_agency(&payload).map_err(|e| {
            LotteryError::decode(format!("agency identifier {:?}: {}", payload, e))
        })?;

        let documents = self
            .winners
            .get(agency)
            .ok_or(RoundError::IdentifierNotFound(agency))?
            .join(&FIELD_DELIMITER.to_string());

        self.framer.send_message(&documents, true).await?;

        if self.framer.receive_ack().await? {
            self.barrier.arrive(agency)?;
        } else {
            tracing::warn!(
                "Agency {} at {} rejected its winners list",
                agency,
                self.peer
            );
        }

        Ok(agency)
    }
}
