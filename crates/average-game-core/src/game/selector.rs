//! Winner selection: closest guess to two-thirds of the average.

use crate::config::TieBreakRule;
use ledger_core::{Address, GameId};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;

/// Ledger state available when the game ends, used to break ties
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TieBreakSeed {
    pub entropy: [u8; 32],
    pub block_height: u64,
    pub game_id: GameId,
}

/// Picks one player out of several tied for the closest guess
///
/// Tie-breaking is best-effort fairness only. Whatever an implementation
/// returns, the selector clamps it into the tied set.
pub trait TieBreaker: Send + Sync + fmt::Debug {
    /// Index into `tied` (given in join order) of the winner
    fn pick(&self, tied: &[Address], seed: &TieBreakSeed) -> usize;
}

/// Uniform pick driven by the block entropy
///
/// The entropy is visible to whoever produces the block, so this is not
/// secure against a block producer that also plays.
#[derive(Clone, Copy, Debug, Default)]
pub struct BlockEntropyTieBreaker;

impl TieBreaker for BlockEntropyTieBreaker {
    fn pick(&self, tied: &[Address], seed: &TieBreakSeed) -> usize {
        if tied.len() < 2 {
            return 0;
        }
        let mut hasher = Sha256::new();
        hasher.update(seed.entropy);
        hasher.update(seed.block_height.to_be_bytes());
        hasher.update(seed.game_id.to_be_bytes());
        for player in tied {
            hasher.update(player.as_bytes());
        }
        let mut rng = StdRng::from_seed(hasher.finalize().into());
        rng.gen_range(0..tied.len())
    }
}

/// The earliest joiner among the tied players wins
#[derive(Clone, Copy, Debug, Default)]
pub struct FirstJoinedTieBreaker;

impl TieBreaker for FirstJoinedTieBreaker {
    fn pick(&self, _tied: &[Address], _seed: &TieBreakSeed) -> usize {
        0
    }
}

impl TieBreakRule {
    pub fn tie_breaker(&self) -> Arc<dyn TieBreaker> {
        match self {
            TieBreakRule::BlockEntropy => Arc::new(BlockEntropyTieBreaker),
            TieBreakRule::FirstJoined => Arc::new(FirstJoinedTieBreaker),
        }
    }
}

/// Result of winner selection
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub winner: Address,
    /// Every player tied for the smallest distance, in join order
    pub potential_winners: Vec<Address>,
    pub target: u64,
}

pub struct WinnerSelector;

impl WinnerSelector {
    /// floor(2/3 × average), computed exactly on integers
    pub fn target(guesses: &[u64]) -> Option<u64> {
        if guesses.is_empty() {
            return None;
        }
        let sum: u128 = guesses.iter().map(|&g| g as u128).sum();
        let target = (2 * sum) / (3 * guesses.len() as u128);
        Some(target as u64)
    }

    /// Calculate distance from guess to target
    fn distance(guess: u64, target: u64) -> u64 {
        if guess > target {
            guess - target
        } else {
            target - guess
        }
    }

    /// Target and the players tied for closest to it
    pub fn potential_winners(revealed: &[(Address, u64)]) -> Option<(u64, Vec<Address>)> {
        let guesses: Vec<u64> = revealed.iter().map(|(_, guess)| *guess).collect();
        let target = Self::target(&guesses)?;

        let best = revealed
            .iter()
            .map(|(_, guess)| Self::distance(*guess, target))
            .min()?;

        let tied = revealed
            .iter()
            .filter(|(_, guess)| Self::distance(*guess, target) == best)
            .map(|(player, _)| *player)
            .collect();

        Some((target, tied))
    }

    /// Run the full selection over the valid reveals, in join order
    ///
    /// Returns `None` when nobody revealed validly.
    pub fn select(
        revealed: &[(Address, u64)],
        tie_breaker: &dyn TieBreaker,
        seed: &TieBreakSeed,
    ) -> Option<Selection> {
        let (target, potential_winners) = Self::potential_winners(revealed)?;

        let index = if potential_winners.len() == 1 {
            0
        } else {
            tie_breaker.pick(&potential_winners, seed) % potential_winners.len()
        };

        Some(Selection {
            winner: potential_winners[index],
            potential_winners,
            target,
        })
    }
}
