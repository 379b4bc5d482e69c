//! Shared fixture: one game on a mock ledger with funded players.

#![allow(dead_code)]

use average_game_core::{
    Address, Commitment, CreateGameParams, GameConfig, GameIcon, GameId, GameRegistry, Ledger,
    MockLedger, Outcome, Result, Secret, TieBreakRule,
};
use std::sync::Arc;

pub const BET: u64 = 100;
pub const FEE: u64 = 10;
pub const ENTRY: u64 = BET + 3 * BET + FEE;
pub const FUNDS: u64 = 10_000;

pub struct Table {
    pub ledger: Arc<MockLedger>,
    pub registry: Arc<GameRegistry>,
    pub game: GameId,
    pub master: Address,
    pub players: Vec<Address>,
    pub secrets: Vec<Secret>,
}

impl Table {
    /// A game whose ties go to the earliest joiner
    pub fn new(max_players: usize) -> Self {
        Self::with_config(
            max_players,
            GameConfig {
                tie_break: TieBreakRule::FirstJoined,
                ..GameConfig::default()
            },
        )
    }

    pub fn with_config(max_players: usize, config: GameConfig) -> Self {
        let ledger = Arc::new(MockLedger::new(1_000));
        let registry = Arc::new(GameRegistry::new(ledger.clone(), config).unwrap());
        let master = Address::random();
        let game = registry
            .create_game(
                master,
                CreateGameParams {
                    name: "Two Thirds Of The Average".to_string(),
                    max_players,
                    bet_amount: BET,
                    game_fee_amount: FEE,
                    icon: GameIcon::Diamond,
                },
            )
            .unwrap();

        Self {
            ledger,
            registry,
            game,
            master,
            players: Vec::new(),
            secrets: Vec::new(),
        }
    }

    /// Fund a fresh player and join with a commitment to `guess`
    pub fn join(&mut self, guess: u64) -> Address {
        let player = Address::random();
        let secret = Secret::random();
        self.ledger.fund(&player, FUNDS);
        self.registry
            .join(self.game, player, ENTRY, Commitment::new(guess, &secret))
            .unwrap();
        self.players.push(player);
        self.secrets.push(secret);
        player
    }

    pub fn join_all(&mut self, guesses: &[u64]) {
        for &guess in guesses {
            self.join(guess);
        }
    }

    pub fn advance_to(&self, block: u64) {
        let now = self.ledger.block_height();
        if block > now {
            self.ledger.advance_blocks(block - now);
        }
    }

    /// Wait out the join window and start the reveal phase
    pub fn open_reveal(&self) {
        self.ledger
            .advance_blocks(self.registry.config().min_join_window_blocks);
        self.registry.start_reveal(self.game, self.master).unwrap();
    }

    /// Move into player `index`'s slot and reveal `guess` with their secret
    pub fn reveal(&self, index: usize, guess: u64) -> Result<Outcome> {
        let player = self.players[index];
        let window = self
            .registry
            .reveal_window(self.game, &player)
            .unwrap()
            .unwrap();
        self.advance_to(window.start);
        self.registry
            .reveal(self.game, player, guess, &self.secrets[index])
    }

    /// Move past every reveal slot and end the game
    pub fn finish(&self) -> Result<Outcome> {
        let view = self.registry.view(self.game).unwrap();
        let config = self.registry.config();
        let reveal_start = view.reveal_start_block.unwrap();
        self.advance_to(
            reveal_start
                + config.reveal_grace_blocks
                + config.reveal_window_blocks * view.players.len() as u64,
        );
        self.registry.end_game(self.game, self.master)
    }

    /// Join, reveal every guess honestly and end the game
    pub fn play(guesses: &[u64]) -> Self {
        let mut table = Self::new(guesses.len());
        table.join_all(guesses);
        table.open_reveal();
        for (index, &guess) in guesses.iter().enumerate() {
            table.reveal(index, guess).unwrap();
        }
        table.finish().unwrap();
        table
    }

    pub fn winner(&self) -> Address {
        self.registry.view(self.game).unwrap().winner.unwrap()
    }

    /// Total of every account balance plus the game's escrow
    pub fn money_supply(&self) -> u64 {
        let accounts: u64 = self
            .players
            .iter()
            .chain(std::iter::once(&self.master))
            .map(|account| self.ledger.balance(account))
            .sum();
        accounts + self.ledger.escrow(self.game).balance
    }
}
