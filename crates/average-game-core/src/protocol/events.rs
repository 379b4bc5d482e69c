//! Notifications published for committed state changes.

use super::RevealState;
use ledger_core::{Address, GameId};
use serde::{Deserialize, Serialize};

/// Game notification, published only after the emitting call committed
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GameEvent {
    GameCreated {
        game_id: GameId,
        game_master: Address,
        /// Number of games created so far, this one included
        sequence: u64,
    },
    PlayerJoined {
        game_id: GameId,
        player: Address,
        total_players: usize,
    },
    RevealPhaseStarted {
        game_id: GameId,
        reveal_start_block: u64,
    },
    GuessRevealed {
        game_id: GameId,
        player: Address,
        guess: u64,
        reveal_state: RevealState,
    },
    CollateralReleased {
        game_id: GameId,
        player: Address,
        amount: u64,
    },
    GameEnded {
        game_id: GameId,
        winner: Option<Address>,
        target: Option<u64>,
    },
    PrizeAwarded {
        game_id: GameId,
        winner: Address,
        recipient: Address,
        amount: u64,
    },
    FeeCollected {
        game_id: GameId,
        game_master: Address,
        amount: u64,
    },
    PlayerRefunded {
        game_id: GameId,
        player: Address,
        amount: u64,
    },
    CollateralShareReleased {
        game_id: GameId,
        player: Address,
        amount: u64,
    },
}

impl GameEvent {
    pub fn game_id(&self) -> GameId {
        match self {
            GameEvent::GameCreated { game_id, .. }
            | GameEvent::PlayerJoined { game_id, .. }
            | GameEvent::RevealPhaseStarted { game_id, .. }
            | GameEvent::GuessRevealed { game_id, .. }
            | GameEvent::CollateralReleased { game_id, .. }
            | GameEvent::GameEnded { game_id, .. }
            | GameEvent::PrizeAwarded { game_id, .. }
            | GameEvent::FeeCollected { game_id, .. }
            | GameEvent::PlayerRefunded { game_id, .. }
            | GameEvent::CollateralShareReleased { game_id, .. } => *game_id,
        }
    }
}
