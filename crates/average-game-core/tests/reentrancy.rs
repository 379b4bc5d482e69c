//! Claims under hostile recipients, failing transfers and contention.

mod common;

use average_game_core::{
    Address, Commitment, CreateGameParams, DuplicateAction, GameError, GameEvent, GameIcon, GameId,
    GamePhase, GameRegistry, LedgerError, RevealState, Secret,
};
use common::{Table, BET, ENTRY, FEE};
use parking_lot::Mutex;
use proptest::prelude::*;
use std::sync::Arc;

type Attempts<T> = Arc<Mutex<Vec<T>>>;

/// Recipient that runs `claim` every time it is paid
fn install_reentrant_hook<T: Send + 'static>(
    table: &Table,
    claim: impl Fn(&GameRegistry, GameId, Address) -> T + Send + Sync + 'static,
) -> Attempts<T> {
    let attempts: Attempts<T> = Arc::new(Mutex::new(Vec::new()));
    let seen = attempts.clone();
    let registry = Arc::downgrade(&table.registry);
    table
        .ledger
        .set_credit_hook(Arc::new(move |game: GameId, to: &Address, _amount: u64| {
            if let Some(registry) = registry.upgrade() {
                seen.lock().push(claim(&registry, game, *to));
            }
        }));
    attempts
}

#[test]
fn test_reentrant_prize_withdrawal_is_rejected() {
    let table = Table::play(&[9, 18, 27, 36, 45]);
    let winner = table.winner();
    let before = table.ledger.balance(&winner);
    let attempts = install_reentrant_hook(&table, |registry, game, to| {
        let consumed = registry.view(game).unwrap().reward_claimed;
        (consumed, registry.withdraw_pricepool(game, to, to).map(|o| o.payout()))
    });

    let outcome = table
        .registry
        .withdraw_pricepool(table.game, winner, winner)
        .unwrap();
    table.ledger.clear_credit_hook();

    assert_eq!(outcome.payout(), 5 * BET);
    // The recipient already sees the prize as claimed and cannot claim again
    assert_eq!(
        *attempts.lock(),
        vec![(true, Err(GameError::CallInFlight(table.game)))]
    );
    assert_eq!(table.ledger.balance(&winner), before + 5 * BET);
    assert!(table.registry.view(table.game).unwrap().reward_claimed);
}

#[test]
fn test_reentrant_collateral_share_is_rejected() {
    let mut table = Table::new(4);
    table.join_all(&[10, 20, 30, 40]);
    table.open_reveal();
    for (index, guess) in [10, 20, 30].into_iter().enumerate() {
        table.reveal(index, guess).unwrap();
    }
    table.finish().unwrap();

    let winner = table.winner();
    let shareholder = table
        .players
        .iter()
        .copied()
        .find(|p| {
            *p != winner
                && table.registry.reveal_state(table.game, p).unwrap() == RevealState::Revealed
        })
        .unwrap();
    let share = table.registry.view(table.game).unwrap().collateral_share;
    let before = table.ledger.balance(&shareholder);

    let attempts = install_reentrant_hook(&table, |registry, game, to| {
        let consumed = registry
            .read(game, |g| g.escrow().share_claimed(&to))
            .unwrap();
        let retry = registry
            .withdraw_collateral_share(game, to)
            .map(|o| o.payout());
        (consumed, retry)
    });
    table
        .registry
        .withdraw_collateral_share(table.game, shareholder)
        .unwrap();
    table.ledger.clear_credit_hook();

    assert_eq!(
        *attempts.lock(),
        vec![(true, Err(GameError::CallInFlight(table.game)))]
    );
    assert_eq!(table.ledger.balance(&shareholder), before + share);
}

#[test]
fn test_reentrant_refund_is_rejected() {
    let mut table = Table::new(5);
    table.join_all(&[1, 2]);
    let leaver = table.players[0];

    let attempts = install_reentrant_hook(&table, |registry, game, to| {
        registry.request_refund(game, to).map(|o| o.payout())
    });
    table.registry.request_refund(table.game, leaver).unwrap();
    table.ledger.clear_credit_hook();

    assert_eq!(
        *attempts.lock(),
        vec![Err(GameError::CallInFlight(table.game))]
    );
    assert!(table.registry.view(table.game).unwrap().players.iter().all(|p| *p != leaver));
    assert_eq!(table.ledger.escrow(table.game).balance, ENTRY);
}

#[test]
fn test_failed_payout_reverts_the_claim() {
    let table = Table::play(&[9, 18, 27, 36, 45]);
    let winner = table.winner();
    let before = table.ledger.balance(&winner);
    let mut events = table.registry.subscribe();

    table.ledger.fail_next_credit();
    let err = table
        .registry
        .withdraw_pricepool(table.game, winner, winner)
        .unwrap_err();

    assert!(matches!(
        err,
        GameError::Ledger(LedgerError::TransferRejected(_))
    ));
    let view = table.registry.view(table.game).unwrap();
    assert!(!view.reward_claimed);
    assert_eq!(view.price_pool, 5 * BET);
    assert_eq!(table.ledger.balance(&winner), before);
    assert!(events.try_recv().is_err());

    // A retry goes through
    table
        .registry
        .withdraw_pricepool(table.game, winner, winner)
        .unwrap();
    assert_eq!(table.ledger.balance(&winner), before + 5 * BET);
}

/// Four players, three valid reveals: two runners-up share the forfeited deposit
fn table_with_two_shareholders() -> (Table, Address, Address) {
    let mut table = Table::new(4);
    table.join_all(&[10, 20, 30, 40]);
    table.open_reveal();
    for (index, guess) in [10, 20, 30].into_iter().enumerate() {
        table.reveal(index, guess).unwrap();
    }
    table.finish().unwrap();

    let winner = table.winner();
    let holders: Vec<Address> = table
        .players
        .iter()
        .copied()
        .filter(|p| table.registry.read(table.game, |g| g.escrow().is_shareholder(p)).unwrap())
        .collect();
    assert_eq!(holders.len(), 2);
    assert!(!holders.contains(&winner));
    (table, holders[0], holders[1])
}

#[test]
fn test_claim_inside_reverted_payout_cannot_be_paid_twice() {
    let (table, first, second) = table_with_two_shareholders();
    let game = table.game;
    let share = table.registry.view(game).unwrap().collateral_share;
    assert_eq!(share, (3 * BET + FEE) / 2);
    let (first_before, second_before) = (table.ledger.balance(&first), table.ledger.balance(&second));

    // The first shareholder's payout calls in for the second one, then reverts
    let attempts = install_reentrant_hook(&table, move |registry, game, _to| {
        registry
            .withdraw_collateral_share(game, second)
            .map(|o| o.payout())
    });
    table.ledger.reject_next_credit_after_hook();
    let err = table
        .registry
        .withdraw_collateral_share(game, first)
        .unwrap_err();
    table.ledger.clear_credit_hook();

    assert!(matches!(err, GameError::Ledger(LedgerError::TransferRejected(_))));
    assert_eq!(*attempts.lock(), vec![Err(GameError::CallInFlight(game))]);
    assert_eq!(table.ledger.balance(&first), first_before);
    assert_eq!(table.ledger.balance(&second), second_before);

    // Each share is paid exactly once afterwards
    for holder in [first, second] {
        assert_eq!(
            table
                .registry
                .withdraw_collateral_share(game, holder)
                .unwrap()
                .payout(),
            share
        );
        assert_eq!(
            table.registry.withdraw_collateral_share(game, holder),
            Err(GameError::DuplicateAction(
                DuplicateAction::CollateralShareClaimed
            ))
        );
    }
    assert_eq!(table.ledger.balance(&first), first_before + share);
    assert_eq!(table.ledger.balance(&second), second_before + share);

    let winner = table.winner();
    table
        .registry
        .withdraw_pricepool(game, winner, winner)
        .unwrap();
    table
        .registry
        .withdraw_game_fees(game, table.master)
        .unwrap();
    assert_eq!(table.ledger.escrow(game).balance, 0);
    assert_eq!(table.registry.read(game, |g| g.escrow().held()).unwrap(), 0);
}

#[test]
fn test_events_of_calls_made_during_a_payout_follow_the_payout() {
    let table = Table::play(&[9, 18, 27, 36, 45]);
    let winner = table.winner();
    let mut events = table.registry.subscribe();

    // The winner opens a game of their own from inside the payout
    let created = install_reentrant_hook(&table, |registry, _game, to| {
        let params = CreateGameParams {
            name: "Rematch".to_string(),
            max_players: 3,
            bet_amount: BET,
            game_fee_amount: FEE,
            icon: GameIcon::Star,
        };
        registry.create_game(to, params).unwrap()
    });
    table
        .registry
        .withdraw_pricepool(table.game, winner, winner)
        .unwrap();
    table.ledger.clear_credit_hook();
    let rematch = created.lock()[0];

    assert_eq!(
        events.try_recv().unwrap(),
        GameEvent::PrizeAwarded {
            game_id: table.game,
            winner,
            recipient: winner,
            amount: 5 * BET,
        }
    );
    assert!(matches!(
        events.try_recv().unwrap(),
        GameEvent::GameCreated { game_id, game_master, .. } if game_id == rematch && game_master == winner
    ));
    assert!(events.try_recv().is_err());
}

#[test]
fn test_failed_collateral_release_keeps_player_unrevealed() {
    let mut table = Table::new(3);
    table.join_all(&[10, 20, 30]);
    table.open_reveal();

    table.ledger.fail_next_credit();
    assert!(table.reveal(0, 10).is_err());
    assert_eq!(
        table
            .registry
            .reveal_state(table.game, &table.players[0])
            .unwrap(),
        RevealState::NotRevealed
    );

    table.reveal(0, 10).unwrap();
    assert_eq!(
        table.registry.view(table.game).unwrap().total_collateral_amount,
        6 * BET
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_prize_claims_pay_once() {
    let table = Table::play(&[9, 18, 27, 36, 45]);
    let winner = table.winner();
    let before = table.ledger.balance(&winner);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let registry = table.registry.clone();
            let game = table.game;
            tokio::task::spawn_blocking(move || registry.withdraw_pricepool(game, winner, winner))
        })
        .collect();

    let mut paid = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(outcome) => paid += outcome.payout(),
            Err(GameError::DuplicateAction(DuplicateAction::RewardClaimed)) => rejected += 1,
            Err(other) => panic!("unexpected error: {}", other),
        }
    }

    assert_eq!(paid, 5 * BET);
    assert_eq!(rejected, 7);
    assert_eq!(table.ledger.balance(&winner), before + 5 * BET);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_joins_respect_capacity() {
    let table = Table::new(3);
    let players: Vec<Address> = (0..10).map(|_| Address::random()).collect();
    for player in &players {
        table.ledger.fund(player, ENTRY);
    }

    let handles: Vec<_> = players
        .iter()
        .map(|player| {
            let registry = table.registry.clone();
            let (game, player) = (table.game, *player);
            tokio::task::spawn_blocking(move || {
                let secret = Secret::random();
                registry.join(
                    game,
                    player,
                    ENTRY,
                    Commitment::new(7, &secret),
                )
            })
        })
        .collect();

    let mut joined = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => joined += 1,
            Err(err) => assert_eq!(err, GameError::GameFull { max_players: 3 }),
        }
    }

    assert_eq!(joined, 3);
    assert_eq!(table.ledger.escrow(table.game).balance, 3 * ENTRY);
}

#[derive(Clone, Copy, Debug)]
enum Reveal {
    Honest,
    Wrong,
    Skip,
}

fn reveal_strategy() -> impl Strategy<Value = Reveal> {
    prop_oneof![Just(Reveal::Honest), Just(Reveal::Wrong), Just(Reveal::Skip)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_escrow_never_pays_more_than_it_took(
        players in prop::collection::vec((0u64..=1000, reveal_strategy()), 3..8),
        extra_claims in prop::collection::vec(0usize..8, 0..12),
    ) {
        let mut table = Table::new(players.len());
        let guesses: Vec<u64> = players.iter().map(|(guess, _)| *guess).collect();
        table.join_all(&guesses);
        let supply = table.money_supply();
        table.open_reveal();

        for (index, (guess, reveal)) in players.iter().enumerate() {
            match reveal {
                Reveal::Honest => { table.reveal(index, *guess).unwrap(); }
                Reveal::Wrong => { table.reveal(index, (*guess + 1) % 1001).unwrap(); }
                Reveal::Skip => {}
            }
        }
        table.finish().unwrap();

        let (game, registry) = (table.game, table.registry.clone());
        let everyone: Vec<Address> = table.players.iter().copied()
            .chain(std::iter::once(table.master))
            .collect();

        // Everybody tries everything, some of them repeatedly
        let order = (0..everyone.len()).chain(extra_claims.into_iter().map(|i| i % everyone.len()));
        for index in order {
            let caller = everyone[index];
            let _ = registry.withdraw_pricepool(game, caller, caller);
            let _ = registry.withdraw_game_fees(game, caller);
            let _ = registry.withdraw_collateral_share(game, caller);
            let _ = registry.request_refund(game, caller);

            let escrow = table.ledger.escrow(game);
            prop_assert!(escrow.total_out <= escrow.total_in);
            prop_assert_eq!(registry.read(game, |g| g.escrow().held()).unwrap(), escrow.balance);
        }

        // Every entitlement has been collected, so only rounding dust may remain
        let view = registry.view(game).unwrap();
        let escrow = table.ledger.escrow(game);
        prop_assert_eq!(table.money_supply(), supply);
        prop_assert_eq!(view.price_pool, 0);
        prop_assert_eq!(view.game_fee_total, 0);
        prop_assert_eq!(escrow.balance, 0);
        prop_assert_eq!(view.state, GamePhase::Ended);
        if let Some(winner) = view.winner {
            prop_assert!(view.potential_winners.contains(&winner));
        }
    }
}
