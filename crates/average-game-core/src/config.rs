//! Game configuration.
//!
//! The registry stamps every new game from one `GameConfig`. Defaults can be
//! overridden through `AVG_GAME_*` environment variables.

use crate::error::{GameError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Collateral is always this multiple of the bet
pub const COLLATERAL_MULTIPLIER: u64 = 3;

/// Guesses never go above this; a configuration may only lower it
pub const GUESS_CEILING: u64 = 1000;

/// How ties for the closest guess are broken
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreakRule {
    /// Sample from the tied players using the block entropy as seed
    #[default]
    BlockEntropy,
    /// The tied player who joined first wins
    FirstJoined,
}

/// Who shares the forfeited collateral
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollateralShareRecipients {
    /// Every valid revealer except the winner
    #[default]
    NonWinningRevealers,
    /// Only potential winners that lost the tie-break
    TiedRunnersUp,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    /// Players required before the reveal phase may start
    pub min_players: usize,
    /// Largest accepted guess, inclusive
    pub max_guess: u64,
    /// Blocks the commit phase must last before reveal can start
    pub min_join_window_blocks: u64,
    /// Width of each player's reveal slot
    pub reveal_window_blocks: u64,
    /// Blocks between reveal phase start and the first slot
    pub reveal_grace_blocks: u64,
    /// Blocks after which a stalled commit phase can be left with a refund
    pub refund_timeout_blocks: u64,
    pub tie_break: TieBreakRule,
    pub collateral_share_recipients: CollateralShareRecipients,
    /// Buffered notifications per subscriber
    pub event_capacity: usize,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            min_players: 3,
            max_guess: GUESS_CEILING,
            min_join_window_blocks: 10,
            reveal_window_blocks: 5,
            reveal_grace_blocks: 0,
            refund_timeout_blocks: 100,
            tie_break: TieBreakRule::BlockEntropy,
            collateral_share_recipients: CollateralShareRecipients::NonWinningRevealers,
            event_capacity: 256,
        }
    }
}

impl GameConfig {
    /// Defaults overlaid with `AVG_GAME_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values from `lookup`
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        override_from(&lookup, "AVG_GAME_MIN_PLAYERS", &mut config.min_players);
        override_from(&lookup, "AVG_GAME_MAX_GUESS", &mut config.max_guess);
        override_from(
            &lookup,
            "AVG_GAME_MIN_JOIN_WINDOW_BLOCKS",
            &mut config.min_join_window_blocks,
        );
        override_from(
            &lookup,
            "AVG_GAME_REVEAL_WINDOW_BLOCKS",
            &mut config.reveal_window_blocks,
        );
        override_from(
            &lookup,
            "AVG_GAME_REVEAL_GRACE_BLOCKS",
            &mut config.reveal_grace_blocks,
        );
        override_from(
            &lookup,
            "AVG_GAME_REFUND_TIMEOUT_BLOCKS",
            &mut config.refund_timeout_blocks,
        );
        override_from(&lookup, "AVG_GAME_EVENT_CAPACITY", &mut config.event_capacity);

        if let Some(rule) = lookup("AVG_GAME_TIE_BREAK") {
            match rule.as_str() {
                "block_entropy" => config.tie_break = TieBreakRule::BlockEntropy,
                "first_joined" => config.tie_break = TieBreakRule::FirstJoined,
                other => tracing::warn!("Ignoring AVG_GAME_TIE_BREAK={}", other),
            }
        }

        if let Some(recipients) = lookup("AVG_GAME_COLLATERAL_SHARE_RECIPIENTS") {
            match recipients.as_str() {
                "non_winning_revealers" => {
                    config.collateral_share_recipients =
                        CollateralShareRecipients::NonWinningRevealers
                }
                "tied_runners_up" => {
                    config.collateral_share_recipients = CollateralShareRecipients::TiedRunnersUp
                }
                other => tracing::warn!("Ignoring AVG_GAME_COLLATERAL_SHARE_RECIPIENTS={}", other),
            }
        }

        config
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_players < 3 {
            return Err(GameError::InvalidInput(format!(
                "min_players must be at least 3, got {}",
                self.min_players
            )));
        }
        if self.max_guess > GUESS_CEILING {
            return Err(GameError::InvalidInput(format!(
                "max_guess must be at most {}, got {}",
                GUESS_CEILING, self.max_guess
            )));
        }
        if self.reveal_window_blocks == 0 {
            return Err(GameError::InvalidInput(
                "reveal_window_blocks must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn override_from<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, field: &mut T) {
    if let Some(raw) = lookup(key) {
        match raw.trim().parse() {
            Ok(value) => *field = value,
            Err(_) => tracing::warn!("Ignoring unparseable {}={}", key, raw),
        }
    }
}
