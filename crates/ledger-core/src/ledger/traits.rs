//! Ledger trait definition.

use crate::types::{Address, GameId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from ledger operations
#[derive(Clone, Debug, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum LedgerError {
    #[error("Insufficient funds: need {need}, have {available}")]
    InsufficientFunds { need: u64, available: u64 },

    #[error("Escrow of game {game} overdrawn: need {need}, holds {available}")]
    EscrowOverdrawn {
        game: GameId,
        need: u64,
        available: u64,
    },

    #[error("Transfer rejected: {0}")]
    TransferRejected(String),
}

/// Trait for the ledger the game engine runs on
///
/// The ledger supplies the clock (block height), a per-block entropy value
/// and atomic value transfer between accounts and per-game escrow accounts.
/// Implementations can be:
/// - MockLedger for testing and demos
/// - An adapter onto a real chain or payment network
pub trait Ledger: Send + Sync {
    /// Current monotonic block height
    fn block_height(&self) -> u64;

    /// Entropy associated with the current block (e.g. its hash)
    fn block_entropy(&self) -> [u8; 32];

    /// Move attached value from `from` into the escrow of `game`
    fn debit(&self, game: GameId, from: &Address, amount: u64) -> Result<(), LedgerError>;

    /// Pay `amount` out of the escrow of `game` to `to`
    ///
    /// Must fail with [`LedgerError::EscrowOverdrawn`] rather than let the
    /// escrow go negative.
    fn credit(&self, game: GameId, to: &Address, amount: u64) -> Result<(), LedgerError>;
}
