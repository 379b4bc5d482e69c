//! Game engine: winner selection, escrow accounting and the per-game state machine.

pub mod escrow;
pub mod instance;
pub mod selector;

pub use escrow::{EscrowLedger, SettlementTerms};
pub use instance::{CreateGameParams, GameInstance, GameView, PlayerRecord, RevealWindow};
pub use selector::{
    BlockEntropyTieBreaker, FirstJoinedTieBreaker, Selection, TieBreakSeed, TieBreaker,
    WinnerSelector,
};
