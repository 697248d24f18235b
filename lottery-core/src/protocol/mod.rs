//! Length-prefixed framing shared by the server and the agencies.
//!
//! Every message is `length (L bytes) | eof flag (F bytes) | payload`, all
//! integers big-endian. Acknowledgements are a single `A`-byte field. The
//! eof flag and the ack field carry one of two configured sentinel values
//! rather than a plain 0/1.

pub mod framer;

pub use framer::Framer;

use crate::config::ProtocolConfig;
use crate::error::{LotteryError, Result};
use serde::{Deserialize, Serialize};

/// The two sentinel states a flag or ack field can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    Set,
    Clear,
}

impl Signal {
    pub fn code(self, config: &ProtocolConfig) -> u64 {
        match self {
            Signal::Set => config.success,
            Signal::Clear => config.error,
        }
    }

    pub fn from_code(code: u64, config: &ProtocolConfig) -> Result<Self> {
        if code == config.success {
            Ok(Signal::Set)
        } else if code == config.error {
            Ok(Signal::Clear)
        } else {
            Err(LotteryError::decode(format!(
                "unknown sentinel value {}",
                code
            )))
        }
    }

    pub fn is_set(self) -> bool {
        matches!(self, Signal::Set)
    }
}

impl From<bool> for Signal {
    fn from(value: bool) -> Self {
        if value {
            Signal::Set
        } else {
            Signal::Clear
        }
    }
}

impl From<Signal> for bool {
    fn from(signal: Signal) -> Self {
        signal.is_set()
    }
}

/// Big-endian encoding of `value` in `width` bytes, truncated below eight
/// bytes and zero-padded above.
pub(crate) fn encode_uint(value: u64, width: usize) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let mut out = vec![0u8; width.saturating_sub(bytes.len())];
    out.extend_from_slice(&bytes[bytes.len() - width.min(bytes.len())..]);
    out
}

pub(crate) fn decode_uint(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .fold(0u64, |acc, &byte| (acc << 8) | u64::from(byte))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uint_encoding_is_big_endian() {
        assert_eq!(encode_uint(0x0102, 4), vec![0, 0, 1, 2]);
        assert_eq!(encode_uint(7, 1), vec![7]);
        assert_eq!(decode_uint(&[0, 0, 1, 2]), 0x0102);
    }

    #[test]
    fn test_uint_wider_than_u64_is_zero_padded() {
        let encoded = encode_uint(0x0102, 10);
        assert_eq!(encoded, vec![0, 0, 0, 0, 0, 0, 0, 0, 1, 2]);
        assert_eq!(decode_uint(&encoded), 0x0102);
        assert!(encode_uint(5, 0).is_empty());
    }

    #[test]
    fn test_signal_codes() {
        let config = ProtocolConfig {
            success: 9,
            error: 4,
            ..ProtocolConfig::default()
        };

        assert_eq!(Signal::Set.code(&config), 9);
        assert_eq!(Signal::from_code(4, &config).unwrap(), Signal::Clear);
        assert!(Signal::from_code(1, &config).is_err());
        assert!(bool::from(Signal::from(true)));
    }
}
