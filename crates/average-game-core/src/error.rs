//! Error types for game operations.
//!
//! Every guard failure aborts the whole call with no state change. The
//! structured payloads survive to the caller so a client can render, for
//! example, "wait N more blocks" instead of a generic failure.

use crate::protocol::GamePhase;
use ledger_core::{GameId, LedgerError};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GameError>;

#[derive(Clone, Debug, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum GameError {
    #[error("Access denied: {0}")]
    AccessDenied(AccessDenied),

    #[error("Wrong phase: expected {expected}, game is in {actual}")]
    WrongPhase {
        expected: GamePhase,
        actual: GamePhase,
    },

    #[error("Timing violation: {0}")]
    TimingViolation(TimingViolation),

    #[error("Insufficient value: entry requires {required}, attached {attached}")]
    InsufficientValue { required: u64, attached: u64 },

    #[error("Duplicate action: {0}")]
    DuplicateAction(DuplicateAction),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Game ended without a winner")]
    NoWinner,

    #[error("Not enough players: {joined} joined, {required} required")]
    NotEnoughPlayers { joined: usize, required: usize },

    #[error("Game is full ({max_players} players)")]
    GameFull { max_players: usize },

    #[error("Game not found: {0}")]
    GameNotFound(GameId),

    /// A call reached the game while another call on it was still paying out
    #[error("Game {0} is busy with a call in flight")]
    CallInFlight(GameId),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

/// Role a caller lacked
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessDenied {
    NotGameMaster,
    NotPlayer,
    NotWinner,
    /// Winner, unrevealed or invalid players hold no collateral share
    NotShareholder,
}

impl fmt::Display for AccessDenied {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessDenied::NotGameMaster => write!(f, "caller is not the game master"),
            AccessDenied::NotPlayer => write!(f, "caller has not joined this game"),
            AccessDenied::NotWinner => write!(f, "caller is not the winner"),
            AccessDenied::NotShareholder => {
                write!(f, "caller is not entitled to a collateral share")
            }
        }
    }
}

/// Action that may only happen once
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DuplicateAction {
    AlreadyJoined,
    AlreadyRevealed,
    RewardClaimed,
    FeeClaimed,
    CollateralShareClaimed,
    AlreadyRefunded,
}

impl fmt::Display for DuplicateAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DuplicateAction::AlreadyJoined => "already joined",
            DuplicateAction::AlreadyRevealed => "already revealed",
            DuplicateAction::RewardClaimed => "price pool already withdrawn",
            DuplicateAction::FeeClaimed => "game fees already withdrawn",
            DuplicateAction::CollateralShareClaimed => "collateral share already withdrawn",
            DuplicateAction::AlreadyRefunded => "already refunded",
        };
        f.write_str(text)
    }
}

/// Which block-height guard failed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimingGuard {
    /// The commit phase has not lasted the minimum join window yet
    MinimumJoinWindow,
    /// The caller's reveal slot has not opened yet
    RevealNotStarted,
    /// The caller's reveal slot is over
    RevealWindowClosed,
    /// Some player's reveal slot is still running
    RevealPhaseOpen,
    /// Quorum is met and the refund timeout has not passed
    RefundLocked,
}

/// A failed block-height comparison with the values it compared
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingViolation {
    pub guard: TimingGuard,
    pub window_start: u64,
    pub current: u64,
    /// Width of the window in blocks
    pub required: u64,
}

impl TimingViolation {
    /// Blocks until the guarded action becomes possible, if it ever will
    pub fn blocks_to_wait(&self) -> Option<u64> {
        match self.guard {
            TimingGuard::RevealNotStarted => Some(self.window_start.saturating_sub(self.current)),
            TimingGuard::RevealWindowClosed => None,
            TimingGuard::MinimumJoinWindow
            | TimingGuard::RevealPhaseOpen
            | TimingGuard::RefundLocked => Some(
                self.window_start
                    .saturating_add(self.required)
                    .saturating_sub(self.current),
            ),
        }
    }

    /// Blocks elapsed since a closed reveal slot ended
    pub fn blocks_overdue(&self) -> Option<u64> {
        match self.guard {
            TimingGuard::RevealWindowClosed => Some(
                self.current
                    .saturating_sub(self.window_start.saturating_add(self.required)),
            ),
            _ => None,
        }
    }
}

impl fmt::Display for TimingViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} (window start {}, current block {}, width {})",
            self.guard, self.window_start, self.current, self.required
        )?;
        if let Some(wait) = self.blocks_to_wait() {
            write!(f, ", wait {} more blocks", wait)?;
        }
        Ok(())
    }
}

impl GameError {
    pub(crate) fn timing(guard: TimingGuard, window_start: u64, current: u64, required: u64) -> Self {
        GameError::TimingViolation(TimingViolation {
            guard,
            window_start,
            current,
            required,
        })
    }

    /// The structured timing payload, if this is a timing violation
    pub fn timing_violation(&self) -> Option<&TimingViolation> {
        match self {
            GameError::TimingViolation(violation) => Some(violation),
            _ => None,
        }
    }
}
