//! Average Game Demo
//!
//! Plays one game of "guess two thirds of the average" on an in-memory
//! ledger: every player commits, one reveals a wrong secret, one never
//! reveals, and every payout is collected afterwards.
//!
//! Environment:
//! - `DEMO_PLAYERS` - number of players (default 5, at least 3)
//! - `DEMO_BET` - bet per player (default 1000)
//! - `DEMO_FEE` - game fee per player (default 50)
//! - `DEMO_SEED` - seed for the players' guesses (random when unset)
//! - `AVG_GAME_*` - game configuration, see `GameConfig::from_env`
//! - `RUST_LOG` - log filter (default `info`)

use average_game_core::{
    Address, Commitment, CreateGameParams, GameConfig, GameEvent, GameIcon, GameId,
    GameRegistry, Ledger, MockLedger, Secret,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

type DemoResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("Ignoring unparseable {}={}", key, raw);
            default
        }),
        Err(_) => default,
    }
}

struct Contestant {
    address: Address,
    guess: u64,
    secret: Secret,
}

/// Mine blocks until the ledger reaches `block`
fn advance_to(ledger: &MockLedger, block: u64) {
    let now = ledger.block_height();
    if block > now {
        ledger.advance_blocks(block - now);
    }
}

#[tokio::main]
async fn main() -> DemoResult<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = GameConfig::from_env();
    let player_count: usize = env_or("DEMO_PLAYERS", 5usize).max(config.min_players);
    let bet: u64 = env_or("DEMO_BET", 1_000);
    let fee: u64 = env_or("DEMO_FEE", 50);
    let mut rng = match std::env::var("DEMO_SEED").ok().and_then(|s| s.parse().ok()) {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let ledger = Arc::new(MockLedger::new(1));
    ledger.set_entropy(rng.gen());
    let registry = GameRegistry::new(ledger.clone(), config.clone())?;

    let mut events = registry.subscribe();
    let listener = tokio::spawn(async move {
        let mut seen = 0usize;
        loop {
            match events.recv().await {
                Ok(event) => {
                    seen += 1;
                    match serde_json::to_string(&event) {
                        Ok(json) => info!("event: {}", json),
                        Err(err) => warn!("Could not encode {:?}: {}", event, err),
                    }
                    if let GameEvent::GameEnded { winner: None, .. } = event {
                        warn!("Nobody revealed validly, deposits will be refunded");
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!("Event listener skipped {} events", skipped),
                Err(RecvError::Closed) => break,
            }
        }
        seen
    });

    let master = Address::random();
    let game = registry.create_game(
        master,
        CreateGameParams {
            name: "Two Thirds Of The Average".to_string(),
            max_players: player_count,
            bet_amount: bet,
            game_fee_amount: fee,
            icon: GameIcon::Medal,
        },
    )?;
    let entry = registry.view(game)?.entry_value;
    info!("Game master {} opened game {} (entry value {})", master, game, entry);

    let mut contestants = Vec::with_capacity(player_count);
    for _ in 0..player_count {
        let contestant = Contestant {
            address: Address::random(),
            guess: rng.gen_range(0..=config.max_guess),
            secret: Secret::random(),
        };
        ledger.fund(&contestant.address, entry);
        registry.join(
            game,
            contestant.address,
            entry,
            Commitment::new(contestant.guess, &contestant.secret),
        )?;
        contestants.push(contestant);
    }

    ledger.advance_blocks(config.min_join_window_blocks);
    registry.start_reveal(game, master)?;

    reveal_all(&registry, &ledger, game, &contestants)?;

    let view = registry.view(game)?;
    let reveal_start = view.reveal_start_block.unwrap_or_else(|| ledger.block_height());
    advance_to(
        &ledger,
        reveal_start
            + config.reveal_grace_blocks
            + config.reveal_window_blocks * contestants.len() as u64,
    );
    registry.end_game(game, master)?;

    settle(&registry, game, master, &contestants)?;

    let view = registry.view(game)?;
    let escrow = ledger.escrow(game);
    drop(registry);
    let seen = listener.await?;

    println!("{}", serde_json::to_string_pretty(&view)?);
    println!(
        "escrow: {} in, {} out, {} held ({} events)",
        escrow.total_in, escrow.total_out, escrow.balance, seen
    );
    for contestant in &contestants {
        println!(
            "{} guessed {:>4}, balance {}",
            contestant.address,
            contestant.guess,
            ledger.balance(&contestant.address)
        );
    }
    println!("{} (game master), balance {}", master, ledger.balance(&master));

    Ok(())
}

/// The second to last player reveals a wrong guess, the last one never reveals
fn reveal_all(
    registry: &GameRegistry,
    ledger: &MockLedger,
    game: GameId,
    contestants: &[Contestant],
) -> DemoResult<()> {
    let cheater = contestants.len() - 2;
    let absent = contestants.len() - 1;
    let max_guess = registry.config().max_guess;

    for (index, contestant) in contestants.iter().enumerate() {
        if index == absent {
            info!("Player {} does not reveal", contestant.address);
            continue;
        }
        let Some(window) = registry.reveal_window(game, &contestant.address)? else {
            continue;
        };
        advance_to(ledger, window.start);

        let guess = if index == cheater {
            (contestant.guess + 1) % (max_guess + 1)
        } else {
            contestant.guess
        };
        registry.reveal(game, contestant.address, guess, &contestant.secret)?;
    }
    Ok(())
}

/// Collect every payout the game owes
fn settle(
    registry: &GameRegistry,
    game: GameId,
    master: Address,
    contestants: &[Contestant],
) -> DemoResult<()> {
    let Some(winner) = registry.view(game)?.winner else {
        for contestant in contestants {
            registry.request_refund(game, contestant.address)?;
        }
        return Ok(());
    };

    registry.withdraw_pricepool(game, winner, winner)?;
    registry.withdraw_game_fees(game, master)?;
    for contestant in contestants {
        match registry.withdraw_collateral_share(game, contestant.address) {
            Ok(outcome) => info!(
                "Player {} collected a collateral share of {}",
                contestant.address,
                outcome.payout()
            ),
            Err(err) => info!("Player {} has no collateral share: {}", contestant.address, err),
        }
    }
    Ok(())
}
