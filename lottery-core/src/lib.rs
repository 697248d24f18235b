//! Lottery core - wire protocol, bet model, ledger and draw
//!
//! This library holds everything the agencies and the central server share:
//! the length-prefixed framing, the text encoding of bet batches, the
//! append-only ledger and the deterministic draw over it.

pub mod codec;
pub mod config;
pub mod draw;
pub mod error;
pub mod protocol;
pub mod storage;
pub mod types;

pub use codec::DecodedBatch;
pub use config::{ProtocolConfig, ServerConfig};
pub use draw::{compute_winners, draw};
pub use error::{LotteryError, Result};
pub use protocol::{Framer, Signal};
pub use storage::Ledger;
pub use types::{AgencyId, Bet, WinnersTable, WINNING_NUMBER};
