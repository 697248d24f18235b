use crate::error::{Result, RoundError};
use lottery_core::AgencyId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Which half of a round a barrier guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Submissions,
    Results,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Submissions => write!(f, "submissions"),
            Phase::Results => write!(f, "results"),
        }
    }
}

/// Per-agency arrival flags for one phase of one round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arrivals {
    flags: BTreeMap<AgencyId, bool>,
}

impl Arrivals {
    fn new(agencies: AgencyId) -> Self {
        Self {
            flags: (1..=agencies).map(|id| (id, false)).collect(),
        }
    }

    pub fn arrived(&self) -> usize {
        self.flags.values().filter(|&&done| done).count()
    }

    pub fn expected(&self) -> usize {
        self.flags.len()
    }

    pub fn is_complete(&self) -> bool {
        self.flags.values().all(|&done| done)
    }

    pub fn has_arrived(&self, agency: AgencyId) -> bool {
        self.flags.get(&agency).copied().unwrap_or(false)
    }

    pub fn pending(&self) -> Vec<AgencyId> {
        self.flags
            .iter()
            .filter(|&(_, &done)| !done)
            .map(|(&id, _)| id)
            .collect()
    }
}

/// Rendezvous that completes once every agency of the roster has arrived.
///
/// Workers hold a [`BarrierHandle`] and call [`BarrierHandle::arrive`]; the
/// coordinator blocks in [`AgencyBarrier::wait`] until all agencies are in
/// or the timeout fires.
#[derive(Debug)]
pub struct AgencyBarrier {
    phase: Phase,
    state: Arc<watch::Sender<Arrivals>>,
}

impl AgencyBarrier {
    pub fn new(phase: Phase, agencies: AgencyId) -> Self {
        let (state, _) = watch::channel(Arrivals::new(agencies));
        Self {
            phase,
            state: Arc::new(state),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn handle(&self) -> BarrierHandle {
        BarrierHandle {
            phase: self.phase,
            state: Arc::clone(&self.state),
        }
    }

    pub fn snapshot(&self) -> Arrivals {
        self.state.borrow().clone()
    }

    pub fn is_complete(&self) -> bool {
        self.state.borrow().is_complete()
    }

    pub async fn wait(&self, timeout: Duration) -> Result<()> {
        let mut rx = self.state.subscribe();
        let waited = tokio::time::timeout(timeout, async {
            rx.wait_for(Arrivals::is_complete).await.map(|_| ())
        })
        .await;

        match waited {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(RoundError::internal(format!(
                "{} barrier closed while waiting",
                self.phase
            ))),
            Err(_) => {
                let arrivals = self.state.borrow();
                Err(RoundError::BarrierTimeout {
                    phase: self.phase,
                    arrived: arrivals.arrived(),
                    expected: arrivals.expected(),
                })
            }
        }
    }
}

/// Worker-side handle of an [`AgencyBarrier`].
#[derive(Debug, Clone)]
pub struct BarrierHandle {
    phase: Phase,
    state: Arc<watch::Sender<Arrivals>>,
}

impl BarrierHandle {
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_member(&self, agency: AgencyId) -> bool {
        self.state.borrow().flags.contains_key(&agency)
    }

    /// Mark `agency` as arrived. Returns `false` if it had already arrived.
    pub fn arrive(&self, agency: AgencyId) -> Result<bool> {
        let mut outcome = Err(RoundError::UnknownAgency(agency));

        self.state.send_if_modified(|arrivals| match arrivals.flags.get_mut(&agency) {
            Some(done) => {
                let first = !*done;
                *done = true;
                outcome = Ok(first);
                first
            }
            None => false,
        });

        if let Ok(true) = outcome {
            let arrivals = self.state.borrow();
            tracing::debug!(
                "Agency {} arrived at {} barrier ({}/{})",
                agency,
                self.phase,
                arrivals.arrived(),
                arrivals.expected()
            );
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_completes_when_every_agency_arrives() {
        let barrier = AgencyBarrier::new(Phase::Submissions, 3);
        let handle = barrier.handle();

        let arrivals = tokio::spawn(async move {
            for agency in [2, 1, 3] {
                tokio::time::sleep(Duration::from_millis(10)).await;
                handle.arrive(agency).unwrap();
            }
        });

        barrier.wait(Duration::from_secs(5)).await.unwrap();
        arrivals.await.unwrap();
        assert!(barrier.is_complete());
    }

    #[tokio::test]
    async fn test_times_out_with_missing_agency() {
        let barrier = AgencyBarrier::new(Phase::Submissions, 3);
        let handle = barrier.handle();
        handle.arrive(1).unwrap();
        handle.arrive(3).unwrap();

        let err = barrier.wait(Duration::from_millis(50)).await.unwrap_err();
        match err {
            RoundError::BarrierTimeout {
                phase,
                arrived,
                expected,
            } => {
                assert_eq!(phase, Phase::Submissions);
                assert_eq!(arrived, 2);
                assert_eq!(expected, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(barrier.snapshot().pending(), vec![2]);
    }

    #[test]
    fn test_repeated_arrival_counts_once() {
        let barrier = AgencyBarrier::new(Phase::Results, 2);
        let handle = barrier.handle();

        assert!(handle.arrive(1).unwrap());
        assert!(!handle.arrive(1).unwrap());
        assert_eq!(barrier.snapshot().arrived(), 1);
        assert!(barrier.snapshot().has_arrived(1));
        assert!(!barrier.is_complete());
    }

    #[test]
    fn test_unknown_agency_is_rejected() {
        let barrier = AgencyBarrier::new(Phase::Results, 2);
        let handle = barrier.handle();

        assert!(!handle.is_member(3));
        assert!(matches!(handle.arrive(3), Err(RoundError::UnknownAgency(3))));
        assert_eq!(barrier.snapshot().arrived(), 0);
    }
}
