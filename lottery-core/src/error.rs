use thiserror::Error;

pub type Result<T> = std::result::Result<T, LotteryError>;

#[derive(Error, Debug)]
pub enum LotteryError {
    #[error("Connection broken: {0}")]
    ConnectionBroken(String),

    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Invalid bet: {0}")]
    InvalidBet(String),

    #[error("Storage error: {0}")]
    Storage(#[from] csv_async::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LotteryError {
    pub fn connection_broken(msg: impl Into<String>) -> Self {
        Self::ConnectionBroken(msg.into())
    }

    pub fn connection_closed(msg: impl Into<String>) -> Self {
        Self::ConnectionClosed(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn invalid_bet(msg: impl Into<String>) -> Self {
        Self::InvalidBet(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Transport failures leave the connection unusable; anything else may
    /// still be answered with a negative ack.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::ConnectionBroken(_) | Self::ConnectionClosed(_) | Self::Io(_)
        )
    }
}
