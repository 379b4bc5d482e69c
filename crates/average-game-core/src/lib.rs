//! Average Game Core Library
//!
//! Engine for the two-thirds-of-the-average guessing game:
//! - Commit-reveal primitives (Secret, Commitment)
//! - Winner selection with pluggable tie-breaking
//! - Per-game escrow accounting and the GameInstance state machine
//! - GameRegistry, the factory that runs calls against a ledger

pub mod config;
pub mod crypto;
pub mod error;
pub mod game;
pub mod protocol;
pub mod registry;

pub use config::{
    CollateralShareRecipients, GameConfig, TieBreakRule, COLLATERAL_MULTIPLIER, GUESS_CEILING,
};
pub use crypto::{Commitment, Secret};
pub use error::{AccessDenied, DuplicateAction, GameError, Result, TimingGuard, TimingViolation};
pub use game::{
    CreateGameParams, EscrowLedger, GameInstance, GameView, RevealWindow, TieBreaker,
    WinnerSelector,
};
pub use protocol::{CallContext, GameEvent, GameIcon, GamePhase, Outcome, RevealState, Transfer};
pub use registry::GameRegistry;

pub use ledger_core::{Address, GameId, Ledger, LedgerError, MockLedger};
