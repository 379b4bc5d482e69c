//! The per-game state machine.
//!
//! A `GameInstance` owns its player records and its escrow. Operations take
//! the caller context, run every guard before touching state, apply their
//! effects and return the value transfer for the host to execute afterwards.

use super::escrow::{EscrowLedger, SettlementTerms};
use super::selector::{TieBreakSeed, TieBreaker, WinnerSelector};
use crate::config::{CollateralShareRecipients, GameConfig, COLLATERAL_MULTIPLIER};
use crate::crypto::{Commitment, Secret};
use crate::error::{AccessDenied, DuplicateAction, GameError, Result, TimingGuard};
use crate::protocol::{CallContext, GameEvent, GameIcon, GamePhase, Outcome, RevealState, Transfer};
use ledger_core::{Address, GameId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

/// Terms chosen by the game master at creation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateGameParams {
    pub name: String,
    pub max_players: usize,
    pub bet_amount: u64,
    pub game_fee_amount: u64,
    #[serde(default)]
    pub icon: GameIcon,
}

/// A joined player
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub address: Address,
    pub commitment: Commitment,
    pub reveal_state: RevealState,
    /// Set iff `reveal_state == Revealed`
    pub guess: Option<u64>,
}

/// Blocks `[start, end)` in which one player may reveal
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevealWindow {
    pub start: u64,
    pub end: u64,
}

impl RevealWindow {
    pub fn contains(&self, block: u64) -> bool {
        block >= self.start && block < self.end
    }
}

/// Read-only snapshot for clients
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameView {
    pub id: GameId,
    pub name: String,
    pub icon: GameIcon,
    pub game_master: Address,
    pub max_players: usize,
    pub bet_amount: u64,
    pub collateral_amount: u64,
    pub game_fee_amount: u64,
    pub entry_value: u64,
    pub state: GamePhase,
    pub players: Vec<Address>,
    pub reveal_states: Vec<RevealState>,
    pub total_bet_amount: u64,
    pub total_collateral_amount: u64,
    pub winner: Option<Address>,
    pub potential_winners: Vec<Address>,
    pub target: Option<u64>,
    pub reward_claimed: bool,
    pub fee_claimed: bool,
    pub collateral_share: u64,
    pub price_pool: u64,
    pub game_fee_total: u64,
    pub commit_start_block: u64,
    pub reveal_start_block: Option<u64>,
}

#[derive(Clone, Debug)]
pub struct GameInstance {
    id: GameId,
    name: String,
    icon: GameIcon,
    game_master: Address,
    max_players: usize,
    bet_amount: u64,
    collateral_amount: u64,
    game_fee_amount: u64,
    entry_value: u64,
    config: GameConfig,
    tie_breaker: Arc<dyn TieBreaker>,
    state: GamePhase,
    /// Join order decides each player's reveal slot
    players: Vec<PlayerRecord>,
    commit_start_block: u64,
    reveal_start_block: Option<u64>,
    winner: Option<Address>,
    potential_winners: Vec<Address>,
    target: Option<u64>,
    escrow: EscrowLedger,
}

impl GameInstance {
    /// Initialise a game in the commit phase
    pub fn new(
        id: GameId,
        game_master: Address,
        params: &CreateGameParams,
        config: &GameConfig,
        block_height: u64,
    ) -> Result<Self> {
        config.validate()?;

        if params.name.trim().is_empty() {
            return Err(GameError::InvalidInput("game name is empty".to_string()));
        }
        if params.max_players < config.min_players {
            return Err(GameError::InvalidInput(format!(
                "max_players must be at least {}, got {}",
                config.min_players, params.max_players
            )));
        }
        if params.bet_amount == 0 {
            return Err(GameError::InvalidInput("bet_amount must be positive".to_string()));
        }

        let overflow = || GameError::InvalidInput("entry terms overflow".to_string());
        let collateral_amount = params
            .bet_amount
            .checked_mul(COLLATERAL_MULTIPLIER)
            .ok_or_else(overflow)?;
        let entry_value = params
            .bet_amount
            .checked_add(collateral_amount)
            .and_then(|v| v.checked_add(params.game_fee_amount))
            .ok_or_else(overflow)?;
        entry_value
            .checked_mul(params.max_players as u64)
            .ok_or_else(overflow)?;

        info!(
            "Created game {} '{}' by {}: bet {}, collateral {}, fee {}, up to {} players",
            id,
            params.name,
            game_master,
            params.bet_amount,
            collateral_amount,
            params.game_fee_amount,
            params.max_players
        );

        Ok(Self {
            id,
            name: params.name.clone(),
            icon: params.icon,
            game_master,
            max_players: params.max_players,
            bet_amount: params.bet_amount,
            collateral_amount,
            game_fee_amount: params.game_fee_amount,
            entry_value,
            config: config.clone(),
            tie_breaker: config.tie_break.tie_breaker(),
            state: GamePhase::CommitPhase,
            players: Vec::new(),
            commit_start_block: block_height,
            reveal_start_block: None,
            winner: None,
            potential_winners: Vec::new(),
            target: None,
            escrow: EscrowLedger::new(id),
        })
    }

    /// Replace the tie-break strategy
    pub fn with_tie_breaker(mut self, tie_breaker: Arc<dyn TieBreaker>) -> Self {
        self.tie_breaker = tie_breaker;
        self
    }

    // Guards

    fn require_phase(&self, expected: GamePhase) -> Result<()> {
        if self.state != expected {
            return Err(GameError::WrongPhase {
                expected,
                actual: self.state,
            });
        }
        Ok(())
    }

    fn require_game_master(&self, ctx: &CallContext) -> Result<()> {
        if ctx.caller != self.game_master {
            return Err(GameError::AccessDenied(AccessDenied::NotGameMaster));
        }
        Ok(())
    }

    fn require_player(&self, player: &Address) -> Result<usize> {
        self.index_of(player)
            .ok_or(GameError::AccessDenied(AccessDenied::NotPlayer))
    }

    fn require_winner(&self) -> Result<Address> {
        self.winner.ok_or(GameError::NoWinner)
    }

    fn index_of(&self, player: &Address) -> Option<usize> {
        self.players.iter().position(|p| p.address == *player)
    }

    fn slot(&self, index: usize, reveal_start: u64) -> RevealWindow {
        let width = self.config.reveal_window_blocks;
        let start = reveal_start
            .saturating_add(self.config.reveal_grace_blocks)
            .saturating_add(width.saturating_mul(index as u64));
        RevealWindow {
            start,
            end: start.saturating_add(width),
        }
    }

    // Operations

    /// Pay the entry value and store a commitment
    pub fn join(&mut self, ctx: &CallContext, commitment: Commitment) -> Result<Outcome> {
        self.require_phase(GamePhase::CommitPhase)?;
        if self.index_of(&ctx.caller).is_some() {
            return Err(GameError::DuplicateAction(DuplicateAction::AlreadyJoined));
        }
        if self.players.len() >= self.max_players {
            return Err(GameError::GameFull {
                max_players: self.max_players,
            });
        }
        if ctx.value < self.entry_value {
            return Err(GameError::InsufficientValue {
                required: self.entry_value,
                attached: ctx.value,
            });
        }
        if ctx.value > self.entry_value {
            return Err(GameError::InvalidInput(format!(
                "attached {} exceeds the entry value {}",
                ctx.value, self.entry_value
            )));
        }

        self.escrow
            .deposit(self.bet_amount, self.collateral_amount, self.game_fee_amount)?;
        self.escrow.clear_refund(&ctx.caller);
        self.players.push(PlayerRecord {
            address: ctx.caller,
            commitment,
            reveal_state: RevealState::NotRevealed,
            guess: None,
        });

        info!(
            "Player {} joined game {} ({}/{})",
            ctx.caller,
            self.id,
            self.players.len(),
            self.max_players
        );

        Ok(Outcome::event(GameEvent::PlayerJoined {
            game_id: self.id,
            player: ctx.caller,
            total_players: self.players.len(),
        })
        .with_transfer(Transfer::Deposit {
            from: ctx.caller,
            amount: self.entry_value,
        }))
    }

    /// Close the commit phase
    pub fn start_reveal(&mut self, ctx: &CallContext) -> Result<Outcome> {
        self.require_phase(GamePhase::CommitPhase)?;
        self.require_game_master(ctx)?;
        if self.players.len() < self.config.min_players {
            return Err(GameError::NotEnoughPlayers {
                joined: self.players.len(),
                required: self.config.min_players,
            });
        }
        let elapsed = ctx.block_height.saturating_sub(self.commit_start_block);
        if elapsed < self.config.min_join_window_blocks {
            return Err(GameError::timing(
                TimingGuard::MinimumJoinWindow,
                self.commit_start_block,
                ctx.block_height,
                self.config.min_join_window_blocks,
            ));
        }

        self.state = GamePhase::RevealPhase;
        self.reveal_start_block = Some(ctx.block_height);

        info!(
            "Game {} entered reveal phase at block {} with {} players",
            self.id,
            ctx.block_height,
            self.players.len()
        );

        Ok(Outcome::event(GameEvent::RevealPhaseStarted {
            game_id: self.id,
            reveal_start_block: ctx.block_height,
        }))
    }

    /// Disclose a guess and secret inside the caller's reveal slot
    ///
    /// A matching pair releases the caller's collateral at once. A pair that
    /// does not match the commitment marks the player invalid and forfeits
    /// the collateral; the call itself still succeeds.
    pub fn reveal(&mut self, ctx: &CallContext, guess: u64, secret: &Secret) -> Result<Outcome> {
        self.require_phase(GamePhase::RevealPhase)?;
        let index = self.require_player(&ctx.caller)?;
        if self.players[index].reveal_state != RevealState::NotRevealed {
            return Err(GameError::DuplicateAction(DuplicateAction::AlreadyRevealed));
        }

        let reveal_start = self.reveal_start_block.unwrap_or(ctx.block_height);
        let window = self.slot(index, reveal_start);
        if ctx.block_height < window.start {
            return Err(GameError::timing(
                TimingGuard::RevealNotStarted,
                window.start,
                ctx.block_height,
                self.config.reveal_window_blocks,
            ));
        }
        if ctx.block_height >= window.end {
            return Err(GameError::timing(
                TimingGuard::RevealWindowClosed,
                window.start,
                ctx.block_height,
                self.config.reveal_window_blocks,
            ));
        }
        if guess > self.config.max_guess {
            return Err(GameError::InvalidInput(format!(
                "guess {} outside [0, {}]",
                guess, self.config.max_guess
            )));
        }

        if !self.players[index].commitment.verify(guess, secret) {
            self.players[index].reveal_state = RevealState::Invalid;
            warn!(
                "Player {} revealed a pair not matching the commitment in game {}, collateral forfeited",
                ctx.caller, self.id
            );
            return Ok(Outcome::event(GameEvent::GuessRevealed {
                game_id: self.id,
                player: ctx.caller,
                guess,
                reveal_state: RevealState::Invalid,
            }));
        }

        let released = self.escrow.release_collateral(self.collateral_amount)?;
        let record = &mut self.players[index];
        record.reveal_state = RevealState::Revealed;
        record.guess = Some(guess);

        info!(
            "Player {} revealed {} in game {}, releasing {} collateral",
            ctx.caller, guess, self.id, released
        );

        Ok(Outcome::event(GameEvent::GuessRevealed {
            game_id: self.id,
            player: ctx.caller,
            guess,
            reveal_state: RevealState::Revealed,
        })
        .and(GameEvent::CollateralReleased {
            game_id: self.id,
            player: ctx.caller,
            amount: released,
        })
        .with_transfer(Transfer::Payout {
            to: ctx.caller,
            amount: released,
        }))
    }

    /// Close the reveal phase and determine the winner
    pub fn end_game(&mut self, ctx: &CallContext) -> Result<Outcome> {
        self.require_phase(GamePhase::RevealPhase)?;
        self.require_game_master(ctx)?;

        let reveal_start = self.reveal_start_block.unwrap_or(ctx.block_height);
        let all_resolved = self
            .players
            .iter()
            .all(|p| p.reveal_state != RevealState::NotRevealed);
        let last_window = self.slot(self.players.len(), reveal_start);
        if !all_resolved && ctx.block_height < last_window.start {
            return Err(GameError::timing(
                TimingGuard::RevealPhaseOpen,
                reveal_start,
                ctx.block_height,
                last_window.start - reveal_start,
            ));
        }

        let revealed: Vec<(Address, u64)> = self
            .players
            .iter()
            .filter_map(|p| p.guess.map(|guess| (p.address, guess)))
            .collect();
        let seed = TieBreakSeed {
            entropy: ctx.block_entropy,
            block_height: ctx.block_height,
            game_id: self.id,
        };

        match WinnerSelector::select(&revealed, self.tie_breaker.as_ref(), &seed) {
            Some(selection) => {
                let shareholders: BTreeSet<Address> = match self.config.collateral_share_recipients {
                    CollateralShareRecipients::NonWinningRevealers => revealed
                        .iter()
                        .map(|(player, _)| *player)
                        .filter(|player| *player != selection.winner)
                        .collect(),
                    CollateralShareRecipients::TiedRunnersUp => selection
                        .potential_winners
                        .iter()
                        .copied()
                        .filter(|player| *player != selection.winner)
                        .collect(),
                };
                self.escrow.settle(SettlementTerms {
                    game_fee_per_player: self.game_fee_amount,
                    valid_reveals: revealed.len() as u64,
                    shareholders,
                })?;

                info!(
                    "Game {} ended: target {}, winner {} out of {} potential winners, price pool {}",
                    self.id,
                    selection.target,
                    selection.winner,
                    selection.potential_winners.len(),
                    self.escrow.price_pool()
                );

                self.winner = Some(selection.winner);
                self.target = Some(selection.target);
                self.potential_winners = selection.potential_winners;
            }
            None => {
                warn!(
                    "Game {} ended without any valid reveal, players may request refunds",
                    self.id
                );
            }
        }

        self.state = GamePhase::Ended;

        Ok(Outcome::event(GameEvent::GameEnded {
            game_id: self.id,
            winner: self.winner,
            target: self.target,
        }))
    }

    /// Leave a stalled or under-populated commit phase, or reclaim the
    /// deposit of a game that ended without a winner
    pub fn request_refund(&mut self, ctx: &CallContext) -> Result<Outcome> {
        let index = match self.state {
            GamePhase::CommitPhase => {
                let index = self.require_player(&ctx.caller)?;
                let quorum_unmet = self.players.len() < self.config.min_players;
                let stalled = ctx.block_height.saturating_sub(self.commit_start_block)
                    >= self.config.refund_timeout_blocks;
                if !quorum_unmet && !stalled {
                    return Err(GameError::timing(
                        TimingGuard::RefundLocked,
                        self.commit_start_block,
                        ctx.block_height,
                        self.config.refund_timeout_blocks,
                    ));
                }
                index
            }
            GamePhase::Ended if self.winner.is_none() => self.require_player(&ctx.caller)?,
            actual => {
                return Err(GameError::WrongPhase {
                    expected: GamePhase::CommitPhase,
                    actual,
                })
            }
        };

        let collateral = if self.players[index].reveal_state == RevealState::Revealed {
            0
        } else {
            self.collateral_amount
        };
        let amount = self.escrow.refund(
            &ctx.caller,
            self.bet_amount,
            collateral,
            self.game_fee_amount,
        )?;

        if self.state == GamePhase::CommitPhase {
            self.players.remove(index);
        }

        info!(
            "Player {} refunded {} from game {} ({})",
            ctx.caller, amount, self.id, self.state
        );

        Ok(Outcome::event(GameEvent::PlayerRefunded {
            game_id: self.id,
            player: ctx.caller,
            amount,
        })
        .with_transfer(Transfer::Payout {
            to: ctx.caller,
            amount,
        }))
    }

    /// Pay the price pool to `to`; only the winner may call
    pub fn withdraw_pricepool(&mut self, ctx: &CallContext, to: Address) -> Result<Outcome> {
        self.require_phase(GamePhase::Ended)?;
        let winner = self.require_winner()?;
        if ctx.caller != winner {
            return Err(GameError::AccessDenied(AccessDenied::NotWinner));
        }
        if to == Address::ZERO {
            return Err(GameError::InvalidInput("recipient is the zero address".to_string()));
        }

        let amount = self.escrow.claim_price_pool()?;

        info!(
            "Winner {} of game {} withdrew price pool {} to {}",
            winner, self.id, amount, to
        );

        Ok(Outcome::event(GameEvent::PrizeAwarded {
            game_id: self.id,
            winner,
            recipient: to,
            amount,
        })
        .with_transfer(Transfer::Payout { to, amount }))
    }

    /// Pay the game master the fees of every valid revealer
    pub fn withdraw_game_fees(&mut self, ctx: &CallContext) -> Result<Outcome> {
        self.require_phase(GamePhase::Ended)?;
        self.require_game_master(ctx)?;
        self.require_winner()?;

        let amount = self.escrow.claim_game_fees()?;

        info!(
            "Game master {} collected {} in fees from game {}",
            ctx.caller, amount, self.id
        );

        let outcome = Outcome::event(GameEvent::FeeCollected {
            game_id: self.id,
            game_master: ctx.caller,
            amount,
        });
        if amount == 0 {
            return Ok(outcome);
        }
        Ok(outcome.with_transfer(Transfer::Payout {
            to: ctx.caller,
            amount,
        }))
    }

    /// Pay the caller's share of the forfeited collateral
    pub fn withdraw_collateral_share(&mut self, ctx: &CallContext) -> Result<Outcome> {
        self.require_phase(GamePhase::Ended)?;
        let winner = self.require_winner()?;
        let index = self.require_player(&ctx.caller)?;
        if ctx.caller == winner || self.players[index].reveal_state != RevealState::Revealed {
            return Err(GameError::AccessDenied(AccessDenied::NotShareholder));
        }

        let amount = self.escrow.claim_collateral_share(&ctx.caller)?;

        info!(
            "Player {} withdrew collateral share {} from game {}",
            ctx.caller, amount, self.id
        );

        Ok(Outcome::event(GameEvent::CollateralShareReleased {
            game_id: self.id,
            player: ctx.caller,
            amount,
        })
        .with_transfer(Transfer::Payout {
            to: ctx.caller,
            amount,
        }))
    }

    // Queries

    pub fn id(&self) -> GameId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn icon(&self) -> GameIcon {
        self.icon
    }

    pub fn game_master(&self) -> Address {
        self.game_master
    }

    pub fn max_players(&self) -> usize {
        self.max_players
    }

    pub fn bet_amount(&self) -> u64 {
        self.bet_amount
    }

    pub fn collateral_amount(&self) -> u64 {
        self.collateral_amount
    }

    pub fn game_fee_amount(&self) -> u64 {
        self.game_fee_amount
    }

    /// bet + collateral + fee
    pub fn entry_value(&self) -> u64 {
        self.entry_value
    }

    pub fn state(&self) -> GamePhase {
        self.state
    }

    /// Players in join order
    pub fn players(&self) -> Vec<Address> {
        self.players.iter().map(|p| p.address).collect()
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn player(&self, player: &Address) -> Option<&PlayerRecord> {
        self.index_of(player).map(|i| &self.players[i])
    }

    pub fn reveal_state(&self, player: &Address) -> RevealState {
        self.player(player)
            .map(|p| p.reveal_state)
            .unwrap_or_default()
    }

    pub fn revealed_guess(&self, player: &Address) -> Option<u64> {
        self.player(player).and_then(|p| p.guess)
    }

    /// The player's reveal slot, once the reveal phase has started
    pub fn reveal_window(&self, player: &Address) -> Option<RevealWindow> {
        let reveal_start = self.reveal_start_block?;
        self.index_of(player)
            .map(|index| self.slot(index, reveal_start))
    }

    pub fn commit_start_block(&self) -> u64 {
        self.commit_start_block
    }

    pub fn reveal_start_block(&self) -> Option<u64> {
        self.reveal_start_block
    }

    pub fn total_bet_amount(&self) -> u64 {
        self.escrow.total_bet_amount()
    }

    pub fn total_collateral_amount(&self) -> u64 {
        self.escrow.total_collateral_amount()
    }

    pub fn winner(&self) -> Option<Address> {
        self.winner
    }

    pub fn potential_winners(&self) -> &[Address] {
        &self.potential_winners
    }

    pub fn is_potential_winner(&self, player: &Address) -> bool {
        self.potential_winners.contains(player)
    }

    pub fn target(&self) -> Option<u64> {
        self.target
    }

    pub fn reward_claimed(&self) -> bool {
        self.escrow.reward_claimed()
    }

    pub fn fee_claimed(&self) -> bool {
        self.escrow.fee_claimed()
    }

    pub fn collateral_share(&self) -> u64 {
        self.escrow.collateral_share()
    }

    pub fn price_pool(&self) -> u64 {
        self.escrow.price_pool()
    }

    pub fn game_fee_total(&self) -> u64 {
        self.escrow.game_fee_total()
    }

    pub fn escrow(&self) -> &EscrowLedger {
        &self.escrow
    }

    pub fn view(&self) -> GameView {
        GameView {
            id: self.id,
            name: self.name.clone(),
            icon: self.icon,
            game_master: self.game_master,
            max_players: self.max_players,
            bet_amount: self.bet_amount,
            collateral_amount: self.collateral_amount,
            game_fee_amount: self.game_fee_amount,
            entry_value: self.entry_value,
            state: self.state,
            players: self.players(),
            reveal_states: self.players.iter().map(|p| p.reveal_state).collect(),
            total_bet_amount: self.total_bet_amount(),
            total_collateral_amount: self.total_collateral_amount(),
            winner: self.winner,
            potential_winners: self.potential_winners.clone(),
            target: self.target,
            reward_claimed: self.reward_claimed(),
            fee_claimed: self.fee_claimed(),
            collateral_share: self.collateral_share(),
            price_pool: self.price_pool(),
            game_fee_total: self.game_fee_total(),
            commit_start_block: self.commit_start_block,
            reveal_start_block: self.reveal_start_block,
        }
    }

    /// Verify the data model invariants, describing the first violation
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        if self.collateral_amount != COLLATERAL_MULTIPLIER * self.bet_amount {
            return Err("collateral is not 3x the bet".to_string());
        }
        if self.players.len() > self.max_players {
            return Err("more players than max_players".to_string());
        }
        let unique: BTreeSet<Address> = self.players.iter().map(|p| p.address).collect();
        if unique.len() != self.players.len() {
            return Err("a player appears twice".to_string());
        }
        for record in &self.players {
            if record.guess.is_some() != (record.reveal_state == RevealState::Revealed) {
                return Err(format!("guess/reveal state mismatch for {}", record.address));
            }
        }
        if self.state != GamePhase::Ended && self.winner.is_some() {
            return Err("winner set before the game ended".to_string());
        }
        if self.escrow.reward_claimed() && self.winner.is_none() {
            return Err("reward claimed without a winner".to_string());
        }
        if let Some(winner) = self.winner {
            if !self.potential_winners.contains(&winner) {
                return Err("winner is not a potential winner".to_string());
            }
        }
        if self.escrow.total_out() > self.escrow.total_in() {
            return Err("escrow paid out more than it received".to_string());
        }
        Ok(())
    }
}
