use lottery_core::{AgencyId, LotteryError, ProtocolConfig, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgencyConfig {
    pub agency: AgencyId,
    pub server_host: String,
    pub submissions_port: u16,
    pub results_port: u16,
    pub bets_file: PathBuf,
    pub batch_size: usize,
    pub protocol: ProtocolConfig,
}

impl Default for AgencyConfig {
    fn default() -> Self {
        Self {
            agency: 1,
            server_host: "127.0.0.1".to_string(),
            submissions_port: 12345,
            results_port: 12346,
            bets_file: PathBuf::from("./agency.csv"),
            batch_size: 100,
            protocol: ProtocolConfig::default(),
        }
    }
}

impl AgencyConfig {
    pub fn submissions_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.submissions_port)
    }

    pub fn results_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.results_port)
    }

    pub fn validate(&self) -> Result<()> {
        if self.agency == 0 {
            return Err(LotteryError::config("Agency id must be a positive integer"));
        }

        if self.batch_size == 0 {
            return Err(LotteryError::config("Batch size must be greater than 0"));
        }

        self.protocol.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_addresses() {
        let config = AgencyConfig {
            server_host: "server".to_string(),
            ..AgencyConfig::default()
        };
        assert_eq!(config.submissions_addr(), "server:12345");
        assert_eq!(config.results_addr(), "server:12346");
    }

    #[test]
    fn test_rejects_zero_batch_size() {
        let config = AgencyConfig {
            batch_size: 0,
            ..AgencyConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
