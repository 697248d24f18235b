use crate::error::{LotteryError, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Byte widths and sentinel values shared by every peer on the wire.
///
/// These are fixed for the lifetime of a deployment and never negotiated
/// per message, so the server and every agency must load the same values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub length_width: usize,
    pub eof_width: usize,
    pub ack_width: usize,
    pub max_packet_size: usize,
    pub success: u64,
    pub error: u64,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            length_width: 4,
            eof_width: 1,
            ack_width: 1,
            max_packet_size: 8192,
            success: 1,
            error: 0,
        }
    }
}

impl ProtocolConfig {
    /// Read an optional JSON file, then let environment variables override
    /// individual fields.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    LotteryError::config(format!(
                        "Failed to read protocol config {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                serde_json::from_str(&raw)?
            }
            None => Self::default(),
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        env_override("LENGTH_WIDTH", &mut self.length_width)?;
        env_override("EOF_WIDTH", &mut self.eof_width)?;
        env_override("ACK_WIDTH", &mut self.ack_width)?;
        env_override("MAX_PACKET_SIZE", &mut self.max_packet_size)?;
        env_override("SUCCESS", &mut self.success)?;
        env_override("ERROR", &mut self.error)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        for (name, width) in [
            ("length_width", self.length_width),
            ("eof_width", self.eof_width),
            ("ack_width", self.ack_width),
        ] {
            if width == 0 || width > 8 {
                return Err(LotteryError::config(format!(
                    "{} must be between 1 and 8 bytes, got {}",
                    name, width
                )));
            }
        }

        if self.max_packet_size == 0 {
            return Err(LotteryError::config("Max packet size must be greater than 0"));
        }

        if self.success == self.error {
            return Err(LotteryError::config(
                "Success and error sentinels must differ",
            ));
        }

        let narrowest = self.eof_width.min(self.ack_width);
        for (name, value) in [("success", self.success), ("error", self.error)] {
            if !fits_in(value, narrowest) {
                return Err(LotteryError::config(format!(
                    "{} sentinel {} does not fit in {} byte(s)",
                    name, value, narrowest
                )));
            }
        }

        Ok(())
    }

    /// Largest payload the length prefix can describe.
    pub fn max_payload_len(&self) -> u64 {
        if self.length_width >= 8 {
            u64::MAX
        } else {
            (1u64 << (8 * self.length_width)) - 1
        }
    }
}

/// Everything the round coordinator needs at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub submissions_addr: SocketAddr,
    pub results_addr: SocketAddr,
    pub listen_backlog: u32,
    pub agencies: u32,
    pub ledger_path: PathBuf,
    pub submission_timeout: Duration,
    pub results_timeout: Duration,
    pub join_timeout: Duration,
    pub protocol: ProtocolConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            submissions_addr: SocketAddr::from(([0, 0, 0, 0], 12345)),
            results_addr: SocketAddr::from(([0, 0, 0, 0], 12346)),
            listen_backlog: 5,
            agencies: 5,
            ledger_path: PathBuf::from("./bets.csv"),
            submission_timeout: Duration::from_secs(300),
            results_timeout: Duration::from_secs(120),
            join_timeout: Duration::from_secs(10),
            protocol: ProtocolConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.agencies == 0 {
            return Err(LotteryError::config("Agency count must be greater than 0"));
        }

        if self.listen_backlog == 0 {
            return Err(LotteryError::config("Listen backlog must be greater than 0"));
        }

        if self.submissions_addr.port() != 0 && self.submissions_addr == self.results_addr {
            return Err(LotteryError::config(
                "Submissions and results must listen on different addresses",
            ));
        }

        if self.submission_timeout.is_zero() || self.results_timeout.is_zero() {
            return Err(LotteryError::config("Round timeouts must be greater than 0"));
        }

        self.protocol.validate()
    }
}

fn fits_in(value: u64, width: usize) -> bool {
    width >= 8 || value < (1u64 << (8 * width))
}

fn env_override<T>(name: &str, slot: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: Display,
{
    if let Ok(raw) = std::env::var(name) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|e| LotteryError::config(format!("{}={:?}: {}", name, raw, e)))?;
    }
    Ok(())
}
