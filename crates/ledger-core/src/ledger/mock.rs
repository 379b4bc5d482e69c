//! In-memory mock ledger for testing.

use super::traits::{Ledger, LedgerError};
use crate::types::{Address, GameId};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Callback invoked while a credit is in flight (after funds moved)
///
/// Lets tests play a recipient that calls back into the game engine.
pub type CreditHook = Arc<dyn Fn(GameId, &Address, u64) + Send + Sync>;

/// Escrow account of a single game
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowAccount {
    /// Funds currently held
    pub balance: u64,
    /// Sum of all deposits
    pub total_in: u128,
    /// Sum of all payouts
    pub total_out: u128,
}

#[derive(Default)]
struct MockLedgerState {
    balances: HashMap<Address, u64>,
    escrows: HashMap<GameId, EscrowAccount>,
}

/// In-memory ledger with a manually driven block clock
pub struct MockLedger {
    state: Mutex<MockLedgerState>,
    block_height: AtomicU64,
    entropy: Mutex<[u8; 32]>,
    credit_hook: RwLock<Option<CreditHook>>,
    fail_next_credit: AtomicBool,
    /// Run the hook, then reject the credit without moving funds
    reject_after_hook: AtomicBool,
}

impl MockLedger {
    /// Create a new mock ledger starting at the given block height
    pub fn new(start_height: u64) -> Self {
        Self {
            state: Mutex::new(MockLedgerState::default()),
            block_height: AtomicU64::new(start_height),
            entropy: Mutex::new([0u8; 32]),
            credit_hook: RwLock::new(None),
            fail_next_credit: AtomicBool::new(false),
            reject_after_hook: AtomicBool::new(false),
        }
    }

    /// Give an account spendable funds
    pub fn fund(&self, account: &Address, amount: u64) {
        let mut state = self.state.lock();
        let balance = state.balances.entry(*account).or_insert(0);
        *balance = balance.saturating_add(amount);
    }

    /// Get the spendable balance of an account
    pub fn balance(&self, account: &Address) -> u64 {
        self.state.lock().balances.get(account).copied().unwrap_or(0)
    }

    /// Get the escrow account of a game
    pub fn escrow(&self, game: GameId) -> EscrowAccount {
        self.state
            .lock()
            .escrows
            .get(&game)
            .copied()
            .unwrap_or_default()
    }

    /// Mine `blocks` empty blocks
    pub fn advance_blocks(&self, blocks: u64) -> u64 {
        self.block_height.fetch_add(blocks, Ordering::SeqCst) + blocks
    }

    /// Set the entropy reported for the current block
    pub fn set_entropy(&self, entropy: [u8; 32]) {
        *self.entropy.lock() = entropy;
    }

    /// Install a hook that runs during every credit
    pub fn set_credit_hook(&self, hook: CreditHook) {
        *self.credit_hook.write() = Some(hook);
    }

    /// Remove the credit hook
    pub fn clear_credit_hook(&self) {
        *self.credit_hook.write() = None;
    }

    /// Make the next credit fail with [`LedgerError::TransferRejected`]
    pub fn fail_next_credit(&self) {
        self.fail_next_credit.store(true, Ordering::SeqCst);
    }

    /// Make the next credit run the hook and then fail, as a recipient
    /// that calls back in and reverts afterwards
    pub fn reject_next_credit_after_hook(&self) {
        self.reject_after_hook.store(true, Ordering::SeqCst);
    }

    fn run_credit_hook(&self, game: GameId, to: &Address, amount: u64) {
        // No ledger lock is held here so the hook can call back into the engine
        let hook = self.credit_hook.read().clone();
        if let Some(hook) = hook {
            hook(game, to, amount);
        }
    }
}

impl Default for MockLedger {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Ledger for MockLedger {
    fn block_height(&self) -> u64 {
        self.block_height.load(Ordering::SeqCst)
    }

    fn block_entropy(&self) -> [u8; 32] {
        *self.entropy.lock()
    }

    fn debit(&self, game: GameId, from: &Address, amount: u64) -> Result<(), LedgerError> {
        let mut state = self.state.lock();
        let available = state.balances.get(from).copied().unwrap_or(0);
        if available < amount {
            return Err(LedgerError::InsufficientFunds {
                need: amount,
                available,
            });
        }

        state.balances.insert(*from, available - amount);
        let escrow = state.escrows.entry(game).or_default();
        escrow.balance += amount;
        escrow.total_in += u128::from(amount);

        tracing::debug!("Ledger: {} deposited {} into game {}", from, amount, game);
        Ok(())
    }

    fn credit(&self, game: GameId, to: &Address, amount: u64) -> Result<(), LedgerError> {
        if self.fail_next_credit.swap(false, Ordering::SeqCst) {
            return Err(LedgerError::TransferRejected(format!(
                "recipient {} refused payment",
                to
            )));
        }
        if self.reject_after_hook.swap(false, Ordering::SeqCst) {
            self.run_credit_hook(game, to, amount);
            return Err(LedgerError::TransferRejected(format!(
                "recipient {} reverted after the callback",
                to
            )));
        }

        {
            let mut state = self.state.lock();
            let escrow = state.escrows.entry(game).or_default();
            if escrow.balance < amount {
                return Err(LedgerError::EscrowOverdrawn {
                    game,
                    need: amount,
                    available: escrow.balance,
                });
            }
            escrow.balance -= amount;
            escrow.total_out += u128::from(amount);

            let balance = state.balances.entry(*to).or_insert(0);
            *balance = balance.saturating_add(amount);
        }

        tracing::debug!("Ledger: game {} paid {} to {}", game, amount, to);

        self.run_credit_hook(game, to, amount);
        Ok(())
    }
}
