use crate::barrier::AgencyBarrier;
use crate::error::{Result, RoundError};
use crate::round::{Round, RoundOutcome};
use crate::worker::{ResultsWorker, SubmissionWorker};
use lottery_core::{draw, Ledger, ServerConfig, WinnersTable};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpSocket};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// How an accept phase ended.
enum PhaseEnd {
    Complete,
    TimedOut(RoundError),
    Shutdown,
}

/// Drives rounds: collect every agency's submissions, draw once, hand out
/// results, start over.
pub struct RoundCoordinator {
    config: ServerConfig,
    submissions: TcpListener,
    results: TcpListener,
    ledger: Arc<Ledger>,
    shutdown: CancellationToken,
    workers: JoinSet<()>,
    rounds: u64,
}

impl RoundCoordinator {
    /// Bind both listeners up front so agencies can queue on either port
    /// before its phase opens.
    pub async fn bind(
        config: ServerConfig,
        ledger: Arc<Ledger>,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        config.validate()?;

        let submissions = bind_listener(config.submissions_addr, config.listen_backlog)?;
        let results = bind_listener(config.results_addr, config.listen_backlog)?;

        tracing::info!(
            "Lottery server listening for submissions on {} and results on {} ({} agencies)",
            submissions.local_addr()?,
            results.local_addr()?,
            config.agencies
        );

        Ok(Self {
            config,
            submissions,
            results,
            ledger,
            shutdown,
            workers: JoinSet::new(),
            rounds: 0,
        })
    }

    pub fn submissions_addr(&self) -> Result<SocketAddr> {
        Ok(self.submissions.local_addr()?)
    }

    pub fn results_addr(&self) -> Result<SocketAddr> {
        Ok(self.results.local_addr()?)
    }

    pub fn rounds_started(&self) -> u64 {
        self.rounds
    }

    /// Run rounds until shutdown is requested or `max_rounds` have ended,
    /// then release the listeners and join outstanding workers.
    pub async fn run(mut self, max_rounds: Option<u64>) -> Result<()> {
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }
            if max_rounds.is_some_and(|max| self.rounds >= max) {
                break;
            }

            match self.run_round().await? {
                RoundOutcome::Completed {
                    round,
                    winners,
                    delivered,
                } => {
                    tracing::info!(
                        action = "round",
                        result = "success",
                        round,
                        winners,
                        delivered,
                        "Round finished"
                    );
                }
                RoundOutcome::Aborted { round, reason } => {
                    tracing::error!(
                        action = "round",
                        result = "fail",
                        round,
                        reason = %reason,
                        "Round abandoned"
                    );
                }
                RoundOutcome::Shutdown => break,
            }
        }

        self.close().await;
        Ok(())
    }

    /// Run a single round from submission collection to result delivery.
    pub async fn run_round(&mut self) -> Result<RoundOutcome> {
        self.rounds += 1;
        let mut round = Round::new(self.rounds, self.config.agencies);

        tracing::info!(
            action = "round",
            result = "in_progress",
            round = round.number(),
            id = %round.id(),
            "Collecting submissions"
        );

        match self.collect_submissions(round.submissions()).await? {
            PhaseEnd::Complete => {}
            PhaseEnd::TimedOut(e) => {
                // No worker of an abandoned round may outlive it.
                self.drain_workers().await;
                round.abort(e.to_string());
                return Ok(RoundOutcome::Aborted {
                    round: round.number(),
                    reason: e.to_string(),
                });
            }
            PhaseEnd::Shutdown => {
                round.abort("shutdown requested");
                return Ok(RoundOutcome::Shutdown);
            }
        }

        // The ledger must be quiet before it is scanned.
        self.drain_workers().await;
        round.begin_draw()?;

        let winners = match draw(&self.ledger, self.config.agencies).await {
            Ok(winners) => winners,
            Err(e) => {
                let reason = format!("draw failed: {}", e);
                round.abort(reason.clone());
                return Ok(RoundOutcome::Aborted {
                    round: round.number(),
                    reason,
                });
            }
        };
        let winners = round.publish(winners)?;

        match self
            .distribute_results(round.results(), Arc::clone(&winners))
            .await?
        {
            PhaseEnd::Complete => {}
            PhaseEnd::TimedOut(e) => {
                tracing::warn!(
                    action = "distribute_results",
                    result = "fail",
                    round = round.number(),
                    pending = ?round.results().snapshot().pending(),
                    error = %e,
                    "Not every agency collected its results"
                );
            }
            PhaseEnd::Shutdown => {
                round.abort("shutdown requested");
                return Ok(RoundOutcome::Shutdown);
            }
        }

        self.drain_workers().await;
        round.complete()?;

        Ok(RoundOutcome::Completed {
            round: round.number(),
            winners: winners.total_winners(),
            delivered: round.results().snapshot().arrived(),
        })
    }

    async fn collect_submissions(&mut self, barrier: &AgencyBarrier) -> Result<PhaseEnd> {
        let wait = barrier.wait(self.config.submission_timeout);
        tokio::pin!(wait);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(PhaseEnd::Shutdown),
                waited = &mut wait => return phase_end(waited),
                accepted = self.submissions.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tracing::info!(
                            action = "accept_connections",
                            result = "success",
                            ip = %peer.ip(),
                            "Accepted submission connection"
                        );
                        let worker = SubmissionWorker::new(
                            stream,
                            peer.to_string(),
                            self.config.protocol.clone(),
                            Arc::clone(&self.ledger),
                            barrier.handle(),
                        );
                        self.workers.spawn(async move {
                            worker.serve().await;
                        });
                    }
                    Err(e) => accept_failed("submission", e).await,
                },
            }
        }
    }

    async fn distribute_results(
        &mut self,
        barrier: &AgencyBarrier,
        winners: Arc<WinnersTable>,
    ) -> Result<PhaseEnd> {
        let wait = barrier.wait(self.config.results_timeout);
        tokio::pin!(wait);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(PhaseEnd::Shutdown),
                waited = &mut wait => return phase_end(waited),
                accepted = self.results.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tracing::info!(
                            action = "accept_connections",
                            result = "success",
                            ip = %peer.ip(),
                            "Accepted results connection"
                        );
                        let worker = ResultsWorker::new(
                            stream,
                            peer.to_string(),
                            self.config.protocol.clone(),
                            Arc::clone(&winners),
                            barrier.handle(),
                        );
                        self.workers.spawn(async move {
                            worker.serve().await;
                        });
                    }
                    Err(e) => accept_failed("results", e).await,
                },
            }
        }
    }

    async fn drain_workers(&mut self) {
        join_workers(&mut self.workers, self.config.join_timeout).await;
    }

    /// Stop listening, then give in-flight workers the join timeout to finish.
    async fn close(mut self) {
        tracing::info!(action = "shutdown", result = "in_progress", "Closing listeners");

        drop(self.submissions);
        drop(self.results);
        join_workers(&mut self.workers, self.config.join_timeout).await;

        tracing::info!(action = "shutdown", result = "success", "Coordinator stopped");
    }
}

/// Log a failed accept and pause, so a persistent error such as running
/// out of file descriptors does not spin the accept loop.
async fn accept_failed(listener: &str, e: std::io::Error) {
    tracing::error!(
        action = "accept_connections",
        result = "fail",
        listener,
        error = %e,
        "Failed to accept connection"
    );
    tokio::time::sleep(ACCEPT_BACKOFF).await;
}

fn phase_end(waited: Result<()>) -> Result<PhaseEnd> {
    match waited {
        Ok(()) => Ok(PhaseEnd::Complete),
        Err(e @ RoundError::BarrierTimeout { .. }) => {
            tracing::error!(action = "barrier", result = "fail", error = %e, "Barrier timed out");
            Ok(PhaseEnd::TimedOut(e))
        }
        Err(e) => Err(e),
    }
}

fn bind_listener(addr: SocketAddr, backlog: u32) -> Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    Ok(socket.listen(backlog)?)
}

async fn join_workers(workers: &mut JoinSet<()>, timeout: Duration) {
    if workers.is_empty() {
        return;
    }

    let joined = tokio::time::timeout(timeout, async {
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                if e.is_panic() {
                    tracing::error!("Worker panicked: {}", e);
                }
            }
        }
    })
    .await;

    if joined.is_err() {
        tracing::warn!(
            "{} worker(s) still running after {:?}, aborting",
            workers.len(),
            timeout
        );
        workers.abort_all();
        while workers.join_next().await.is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use tokio::time::Instant;

    #[tokio::test]
    async fn test_failed_accept_backs_off() {
        let started = Instant::now();
        accept_failed("submission", io::Error::from_raw_os_error(24)).await;
        assert!(started.elapsed() >= ACCEPT_BACKOFF);
    }
}
