use crate::barrier::Phase;
use lottery_core::AgencyId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RoundError>;

#[derive(Error, Debug)]
pub enum RoundError {
    #[error("Lottery core error: {0}")]
    Core(#[from] lottery_core::LotteryError),

    #[error("{phase} barrier timed out: {arrived} of {expected} agencies arrived")]
    BarrierTimeout {
        phase: Phase,
        arrived: usize,
        expected: usize,
    },

    #[error("No results for agency: {0}")]
    IdentifierNotFound(AgencyId),

    #[error("Agency {0} is not part of this lottery")]
    UnknownAgency(AgencyId),

    #[error("Batch from agency {found} on a connection opened by agency {expected}")]
    MixedAgencies { expected: AgencyId, found: AgencyId },

    #[error("Invalid round state: {0}")]
    InvalidState(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RoundError {
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// The connection is gone, so nothing more can be sent on it.
    pub fn is_transport(&self) -> bool {
        match self {
            Self::Core(e) => e.is_transport(),
            Self::Io(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lottery_core::LotteryError;

    #[test]
    fn test_transport_errors_are_recognised() {
        assert!(RoundError::from(LotteryError::connection_closed("gone")).is_transport());
        assert!(!RoundError::from(LotteryError::decode("bad record")).is_transport());
        assert!(!RoundError::UnknownAgency(7).is_transport());
    }
}
