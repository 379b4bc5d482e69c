//! Per-game escrow accounting.
//!
//! Tracks what the game holds per pool and who has already been paid.
//! Every claim validates the entitlement and consumes it before returning
//! the amount; the caller transfers funds only afterwards.

use crate::error::{AccessDenied, DuplicateAction, GameError, Result};
use ledger_core::{Address, GameId, LedgerError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Inputs to the end-of-game split
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SettlementTerms {
    pub game_fee_per_player: u64,
    /// Players whose reveal was valid
    pub valid_reveals: u64,
    /// Players entitled to a collateral share
    pub shareholders: BTreeSet<Address>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowLedger {
    game_id: GameId,
    bet_pool: u64,
    /// Collateral still at risk
    collateral_pool: u64,
    fee_pool: u64,
    /// Forfeited funds reserved for collateral shares
    forfeited_pool: u64,
    /// Forfeited funds that did not divide evenly, paid with the price pool
    surplus: u64,
    collateral_share: u64,
    settled: bool,
    reward_claimed: bool,
    fee_claimed: bool,
    shareholders: BTreeSet<Address>,
    shares_claimed: BTreeSet<Address>,
    refunded: BTreeSet<Address>,
    /// Cumulative, so repeated join and refund cycles keep growing it
    total_in: u128,
    total_out: u128,
}

impl EscrowLedger {
    pub fn new(game_id: GameId) -> Self {
        Self {
            game_id,
            bet_pool: 0,
            collateral_pool: 0,
            fee_pool: 0,
            forfeited_pool: 0,
            surplus: 0,
            collateral_share: 0,
            settled: false,
            reward_claimed: false,
            fee_claimed: false,
            shareholders: BTreeSet::new(),
            shares_claimed: BTreeSet::new(),
            refunded: BTreeSet::new(),
            total_in: 0,
            total_out: 0,
        }
    }

    pub fn total_bet_amount(&self) -> u64 {
        self.bet_pool
    }

    pub fn total_collateral_amount(&self) -> u64 {
        self.collateral_pool
    }

    pub fn total_fee_amount(&self) -> u64 {
        self.fee_pool
    }

    /// Sum of all deposits
    pub fn total_in(&self) -> u128 {
        self.total_in
    }

    /// Sum of all payouts
    pub fn total_out(&self) -> u128 {
        self.total_out
    }

    /// Funds currently held
    pub fn held(&self) -> u64 {
        u64::try_from(self.total_in.saturating_sub(self.total_out)).unwrap_or(u64::MAX)
    }

    /// Prize for the winner; zero until settled and after it was paid
    pub fn price_pool(&self) -> u64 {
        if self.settled && !self.reward_claimed {
            self.bet_pool + self.surplus
        } else {
            0
        }
    }

    /// Fees owed to the game master once settled
    pub fn game_fee_total(&self) -> u64 {
        if self.settled && !self.fee_claimed {
            self.fee_pool
        } else {
            0
        }
    }

    /// Amount each shareholder may withdraw
    pub fn collateral_share(&self) -> u64 {
        self.collateral_share
    }

    pub fn is_settled(&self) -> bool {
        self.settled
    }

    pub fn reward_claimed(&self) -> bool {
        self.reward_claimed
    }

    pub fn fee_claimed(&self) -> bool {
        self.fee_claimed
    }

    pub fn is_shareholder(&self, player: &Address) -> bool {
        self.shareholders.contains(player)
    }

    pub fn share_claimed(&self, player: &Address) -> bool {
        self.shares_claimed.contains(player)
    }

    pub fn is_refunded(&self, player: &Address) -> bool {
        self.refunded.contains(player)
    }

    fn ensure_solvent(&self, amount: u64) -> Result<()> {
        if amount > self.held() {
            return Err(LedgerError::EscrowOverdrawn {
                game: self.game_id,
                need: amount,
                available: self.held(),
            }
            .into());
        }
        Ok(())
    }

    /// Record a player's entry payment
    pub fn deposit(&mut self, bet: u64, collateral: u64, fee: u64) -> Result<()> {
        let overflow = || GameError::InvalidInput("deposit overflows the escrow pools".to_string());
        let bet_pool = self.bet_pool.checked_add(bet).ok_or_else(overflow)?;
        let collateral_pool = self
            .collateral_pool
            .checked_add(collateral)
            .ok_or_else(overflow)?;
        let fee_pool = self.fee_pool.checked_add(fee).ok_or_else(overflow)?;

        self.bet_pool = bet_pool;
        self.collateral_pool = collateral_pool;
        self.fee_pool = fee_pool;
        self.total_in += u128::from(bet) + u128::from(collateral) + u128::from(fee);
        Ok(())
    }

    /// Hand back a valid revealer's collateral
    pub fn release_collateral(&mut self, amount: u64) -> Result<u64> {
        if amount > self.collateral_pool {
            return Err(GameError::InvalidInput(format!(
                "collateral pool holds {}, cannot release {}",
                self.collateral_pool, amount
            )));
        }
        self.ensure_solvent(amount)?;

        self.collateral_pool -= amount;
        self.total_out += u128::from(amount);
        Ok(amount)
    }

    /// Return a player's unreleased deposit parts
    pub fn refund(&mut self, player: &Address, bet: u64, collateral: u64, fee: u64) -> Result<u64> {
        if self.refunded.contains(player) {
            return Err(GameError::DuplicateAction(DuplicateAction::AlreadyRefunded));
        }
        if bet > self.bet_pool || collateral > self.collateral_pool || fee > self.fee_pool {
            return Err(GameError::InvalidInput(
                "refund exceeds the pools held for this game".to_string(),
            ));
        }
        let amount = bet + collateral + fee;
        self.ensure_solvent(amount)?;

        self.refunded.insert(*player);
        self.bet_pool -= bet;
        self.collateral_pool -= collateral;
        self.fee_pool -= fee;
        self.total_out += u128::from(amount);
        Ok(amount)
    }

    /// Forget a refund so the player may join again
    pub fn clear_refund(&mut self, player: &Address) {
        self.refunded.remove(player);
    }

    /// Split the held funds between winner, game master and shareholders
    ///
    /// Forfeited funds are the collateral still at risk plus the fees of
    /// players without a valid reveal. Whatever does not divide evenly
    /// among shareholders goes to the price pool.
    pub fn settle(&mut self, terms: SettlementTerms) -> Result<()> {
        if self.settled {
            return Err(GameError::InvalidInput("escrow already settled".to_string()));
        }
        let game_fee_total = terms
            .game_fee_per_player
            .checked_mul(terms.valid_reveals)
            .filter(|total| *total <= self.fee_pool)
            .ok_or_else(|| {
                GameError::InvalidInput("fee total exceeds the fee pool".to_string())
            })?;

        let forfeited = self.collateral_pool + (self.fee_pool - game_fee_total);
        let holders = terms.shareholders.len() as u64;
        let share = if holders == 0 { 0 } else { forfeited / holders };

        self.surplus = forfeited - share * holders;
        self.forfeited_pool = share * holders;
        self.collateral_share = share;
        self.collateral_pool = 0;
        self.fee_pool = game_fee_total;
        self.shareholders = if share > 0 {
            terms.shareholders
        } else {
            BTreeSet::new()
        };
        self.settled = true;
        Ok(())
    }

    /// Consume the winner's entitlement
    pub fn claim_price_pool(&mut self) -> Result<u64> {
        if self.reward_claimed {
            return Err(GameError::DuplicateAction(DuplicateAction::RewardClaimed));
        }
        let amount = self.price_pool();
        if amount == 0 {
            return Err(GameError::InvalidInput("price pool is empty".to_string()));
        }
        self.ensure_solvent(amount)?;

        self.reward_claimed = true;
        self.bet_pool = 0;
        self.surplus = 0;
        self.total_out += u128::from(amount);
        Ok(amount)
    }

    /// Consume the game master's fee entitlement
    pub fn claim_game_fees(&mut self) -> Result<u64> {
        if self.fee_claimed {
            return Err(GameError::DuplicateAction(DuplicateAction::FeeClaimed));
        }
        let amount = self.game_fee_total();
        self.ensure_solvent(amount)?;

        self.fee_claimed = true;
        self.fee_pool = 0;
        self.total_out += u128::from(amount);
        Ok(amount)
    }

    /// Consume a shareholder's collateral share
    pub fn claim_collateral_share(&mut self, player: &Address) -> Result<u64> {
        if !self.shareholders.contains(player) || self.collateral_share == 0 {
            return Err(GameError::AccessDenied(AccessDenied::NotShareholder));
        }
        if self.shares_claimed.contains(player) {
            return Err(GameError::DuplicateAction(
                DuplicateAction::CollateralShareClaimed,
            ));
        }
        let amount = self.collateral_share;
        self.ensure_solvent(amount)?;

        self.shares_claimed.insert(*player);
        self.forfeited_pool -= amount;
        self.total_out += u128::from(amount);
        Ok(amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BET: u64 = 100;
    const COLLATERAL: u64 = 300;
    const FEE: u64 = 10;

    fn funded(players: u64) -> EscrowLedger {
        let mut escrow = EscrowLedger::new(GameId(0));
        for _ in 0..players {
            escrow.deposit(BET, COLLATERAL, FEE).unwrap();
        }
        escrow
    }

    fn holders(n: u8) -> BTreeSet<Address> {
        (1..=n).map(|i| Address::from_bytes([i; 20])).collect()
    }

    #[test]
    fn test_deposit_updates_pools() {
        let escrow = funded(3);
        assert_eq!(escrow.total_bet_amount(), 300);
        assert_eq!(escrow.total_collateral_amount(), 900);
        assert_eq!(escrow.total_fee_amount(), 30);
        assert_eq!(escrow.held(), 1230);
        assert_eq!(escrow.price_pool(), 0);
    }

    #[test]
    fn test_overflowing_deposit_changes_nothing() {
        let mut escrow = funded(1);
        let before = escrow.clone();

        let err = escrow.deposit(BET, u64::MAX, FEE).unwrap_err();
        assert!(matches!(err, GameError::InvalidInput(_)));
        assert_eq!(escrow, before);
    }

    #[test]
    fn test_totals_outgrow_a_single_pool() {
        let mut escrow = EscrowLedger::new(GameId(0));
        let player = Address::from_bytes([1; 20]);
        let bet = u64::MAX / 15;
        for _ in 0..10 {
            escrow.deposit(bet, 3 * bet, bet).unwrap();
            assert_eq!(escrow.refund(&player, bet, 3 * bet, bet).unwrap(), 5 * bet);
            escrow.clear_refund(&player);
        }
        assert_eq!(escrow.held(), 0);
        assert_eq!(escrow.total_in(), 50 * u128::from(bet));
        assert_eq!(escrow.total_out(), escrow.total_in());
    }

    #[test]
    fn test_settlement_splits_everything() {
        // 5 players, 3 valid reveals (collateral released), 2 forfeited
        let mut escrow = funded(5);
        for _ in 0..3 {
            escrow.release_collateral(COLLATERAL).unwrap();
        }
        escrow
            .settle(SettlementTerms {
                game_fee_per_player: FEE,
                valid_reveals: 3,
                shareholders: holders(2),
            })
            .unwrap();

        // forfeited = 2 * 300 + 2 * 10 = 620, split in two
        assert_eq!(escrow.collateral_share(), 310);
        assert_eq!(escrow.price_pool(), 500);
        assert_eq!(escrow.game_fee_total(), 30);

        let paid = escrow.claim_price_pool().unwrap()
            + escrow.claim_game_fees().unwrap()
            + escrow.claim_collateral_share(&Address::from_bytes([1; 20])).unwrap()
            + escrow.claim_collateral_share(&Address::from_bytes([2; 20])).unwrap();
        assert_eq!(paid, 500 + 30 + 620);
        assert_eq!(escrow.held(), 0);
        assert_eq!(escrow.total_in(), escrow.total_out());
    }

    #[test]
    fn test_uneven_split_goes_to_price_pool() {
        let mut escrow = funded(4);
        escrow.release_collateral(COLLATERAL).unwrap();
        escrow
            .settle(SettlementTerms {
                game_fee_per_player: FEE,
                valid_reveals: 1,
                shareholders: holders(3),
            })
            .unwrap();

        // forfeited = 3 * 300 + 3 * 10 = 930 = 3 * 310
        assert_eq!(escrow.collateral_share(), 310);
        assert_eq!(escrow.price_pool(), 400);

        let mut odd = funded(3);
        odd.release_collateral(COLLATERAL).unwrap();
        odd.settle(SettlementTerms {
            game_fee_per_player: FEE,
            valid_reveals: 1,
            shareholders: holders(3),
        })
        .unwrap();
        // forfeited = 620, share 206, remainder 2
        assert_eq!(odd.collateral_share(), 206);
        assert_eq!(odd.price_pool(), 302);
    }

    #[test]
    fn test_no_shareholders_sends_forfeits_to_price_pool() {
        let mut escrow = funded(3);
        escrow.release_collateral(COLLATERAL).unwrap();
        escrow
            .settle(SettlementTerms {
                game_fee_per_player: FEE,
                valid_reveals: 1,
                shareholders: BTreeSet::new(),
            })
            .unwrap();

        assert_eq!(escrow.collateral_share(), 0);
        assert_eq!(escrow.price_pool(), 300 + 620);
        assert!(matches!(
            escrow.claim_collateral_share(&Address::from_bytes([1; 20])),
            Err(GameError::AccessDenied(AccessDenied::NotShareholder))
        ));
    }

    #[test]
    fn test_claims_are_one_shot() {
        let mut escrow = funded(3);
        for _ in 0..2 {
            escrow.release_collateral(COLLATERAL).unwrap();
        }
        escrow
            .settle(SettlementTerms {
                game_fee_per_player: FEE,
                valid_reveals: 2,
                shareholders: holders(1),
            })
            .unwrap();

        escrow.claim_price_pool().unwrap();
        assert_eq!(
            escrow.claim_price_pool(),
            Err(GameError::DuplicateAction(DuplicateAction::RewardClaimed))
        );

        escrow.claim_game_fees().unwrap();
        assert_eq!(
            escrow.claim_game_fees(),
            Err(GameError::DuplicateAction(DuplicateAction::FeeClaimed))
        );

        let holder = Address::from_bytes([1; 20]);
        escrow.claim_collateral_share(&holder).unwrap();
        assert_eq!(
            escrow.claim_collateral_share(&holder),
            Err(GameError::DuplicateAction(
                DuplicateAction::CollateralShareClaimed
            ))
        );
        assert_eq!(escrow.held(), 0);
    }

    #[test]
    fn test_refund_once() {
        let mut escrow = funded(2);
        let player = Address::random();

        assert_eq!(escrow.refund(&player, BET, COLLATERAL, FEE).unwrap(), 410);
        assert_eq!(
            escrow.refund(&player, BET, COLLATERAL, FEE),
            Err(GameError::DuplicateAction(DuplicateAction::AlreadyRefunded))
        );
        assert_eq!(escrow.held(), 410);

        escrow.clear_refund(&player);
        assert!(!escrow.is_refunded(&player));
    }

    #[test]
    fn test_cannot_release_more_than_held() {
        let mut escrow = funded(1);
        assert!(escrow.release_collateral(COLLATERAL + 1).is_err());
        assert_eq!(escrow.total_out(), 0);
    }

    #[test]
    fn test_settle_twice_fails() {
        let mut escrow = funded(3);
        let terms = SettlementTerms {
            game_fee_per_player: FEE,
            valid_reveals: 3,
            shareholders: BTreeSet::new(),
        };
        escrow.settle(terms.clone()).unwrap();
        assert!(escrow.settle(terms).is_err());
    }
}
