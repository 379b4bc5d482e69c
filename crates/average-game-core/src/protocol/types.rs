//! Protocol types.

use super::GameEvent;
use ledger_core::Address;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Phase of a game; only ever advances CommitPhase -> RevealPhase -> Ended
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum GamePhase {
    CommitPhase,
    RevealPhase,
    Ended,
}

impl fmt::Display for GamePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GamePhase::CommitPhase => write!(f, "commit phase"),
            GamePhase::RevealPhase => write!(f, "reveal phase"),
            GamePhase::Ended => write!(f, "ended"),
        }
    }
}

/// Outcome of a player's reveal
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RevealState {
    #[default]
    NotRevealed,
    Revealed,
    /// Revealed pair did not match the commitment
    Invalid,
}

/// Display icon chosen at game creation
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GameIcon {
    #[default]
    Cards,
    CasinoChip,
    Coin,
    Crown,
    Diamond,
    Medal,
    Rocket,
    Shamrock,
    Star,
}

/// Who is calling, with how much value, at which block
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallContext {
    pub caller: Address,
    /// Value attached to the call
    pub value: u64,
    pub block_height: u64,
    /// Entropy of the current block, only used for tie-breaking
    pub block_entropy: [u8; 32],
}

impl CallContext {
    /// A call without attached value
    pub fn new(caller: Address, block_height: u64) -> Self {
        Self {
            caller,
            value: 0,
            block_height,
            block_entropy: [0u8; 32],
        }
    }

    pub fn with_value(mut self, value: u64) -> Self {
        self.value = value;
        self
    }

    pub fn with_entropy(mut self, entropy: [u8; 32]) -> Self {
        self.block_entropy = entropy;
        self
    }
}

/// Value movement requested by an operation, executed after its effects
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transfer {
    /// Pull attached value from the caller into the game escrow
    Deposit { from: Address, amount: u64 },
    /// Pay out of the game escrow
    Payout { to: Address, amount: u64 },
}

/// Result of a successful state-changing operation
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Outcome {
    pub transfer: Option<Transfer>,
    pub events: Vec<GameEvent>,
}

impl Outcome {
    pub fn event(event: GameEvent) -> Self {
        Self {
            transfer: None,
            events: vec![event],
        }
    }

    pub fn with_transfer(mut self, transfer: Transfer) -> Self {
        self.transfer = Some(transfer);
        self
    }

    pub fn and(mut self, event: GameEvent) -> Self {
        self.events.push(event);
        self
    }

    /// Amount paid out by this outcome, zero for deposits
    pub fn payout(&self) -> u64 {
        match self.transfer {
            Some(Transfer::Payout { amount, .. }) => amount,
            _ => 0,
        }
    }
}
