//! Game registry.
//!
//! Creates games from one configuration template, indexes them by sequence
//! number and game master, and runs every state-changing call as a
//! transaction against the shared ledger.

use crate::config::GameConfig;
use crate::crypto::{Commitment, Secret};
use crate::error::{GameError, Result};
use crate::game::{CreateGameParams, GameInstance, GameView, RevealWindow};
use crate::protocol::{CallContext, GameEvent, Outcome, RevealState, Transfer};
use ledger_core::{Address, GameId, Ledger};
use parking_lot::{ReentrantMutex, RwLock};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// A game guarded for reentrant same-thread access
///
/// The `RefCell` borrow is never held across a ledger call, so a recipient
/// calling back into the registry reads the state the outer call applied.
/// It cannot change that state: `in_flight` refuses any second call until
/// the first one has committed or rolled back.
struct GameSlot {
    game: RefCell<GameInstance>,
    in_flight: Cell<bool>,
}

type GameCell = Arc<ReentrantMutex<GameSlot>>;

/// Marks a game busy for the lifetime of one call
struct InFlight<'a>(&'a Cell<bool>);

impl<'a> InFlight<'a> {
    fn enter(flag: &'a Cell<bool>) -> Option<Self> {
        if flag.replace(true) {
            None
        } else {
            Some(Self(flag))
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

type Deferred = Vec<(broadcast::Sender<GameEvent>, GameEvent)>;

thread_local! {
    /// Events of calls that committed inside another call's transfer
    static DEFERRED: RefCell<Option<Deferred>> = const { RefCell::new(None) };
}

/// Publication scope of one call
///
/// Calls made from inside a transfer commit before the call that paid out.
/// Their events are held back until the outermost call on the thread has
/// published its own, so subscribers see them in causal order.
struct EventScope {
    outermost: bool,
}

impl EventScope {
    fn enter() -> Self {
        let outermost = DEFERRED.with(|deferred| {
            let mut deferred = deferred.borrow_mut();
            if deferred.is_some() {
                return false;
            }
            *deferred = Some(Vec::new());
            true
        });
        Self { outermost }
    }

    fn publish(&self, sender: &broadcast::Sender<GameEvent>, events: &[GameEvent]) {
        if self.outermost {
            send_all(sender, events.iter().cloned());
            return;
        }
        DEFERRED.with(|deferred| {
            if let Some(queue) = deferred.borrow_mut().as_mut() {
                queue.extend(events.iter().map(|event| (sender.clone(), event.clone())));
            }
        });
    }
}

impl Drop for EventScope {
    fn drop(&mut self) {
        if !self.outermost {
            return;
        }
        let queued = DEFERRED.with(|deferred| deferred.borrow_mut().take());
        for (sender, event) in queued.unwrap_or_default() {
            send_all(&sender, std::iter::once(event));
        }
    }
}

fn send_all(sender: &broadcast::Sender<GameEvent>, events: impl Iterator<Item = GameEvent>) {
    for event in events {
        // No subscribers is not an error
        let _ = sender.send(event);
    }
}

pub struct GameRegistry {
    ledger: Arc<dyn Ledger>,
    config: GameConfig,
    games: RwLock<Vec<GameCell>>,
    /// Game master of each game, by sequence number
    masters: RwLock<Vec<Address>>,
    owners: RwLock<HashMap<Address, Vec<GameId>>>,
    events: broadcast::Sender<GameEvent>,
}

impl GameRegistry {
    pub fn new(ledger: Arc<dyn Ledger>, config: GameConfig) -> Result<Self> {
        config.validate()?;
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Ok(Self {
            ledger,
            config,
            games: RwLock::new(Vec::new()),
            masters: RwLock::new(Vec::new()),
            owners: RwLock::new(HashMap::new()),
            events,
        })
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    /// Receive every event published after this call
    pub fn subscribe(&self) -> broadcast::Receiver<GameEvent> {
        self.events.subscribe()
    }

    /// Stamp a new game from the template; `creator` becomes its game master
    pub fn create_game(&self, creator: Address, params: CreateGameParams) -> Result<GameId> {
        let block_height = self.ledger.block_height();
        let scope = EventScope::enter();

        let mut games = self.games.write();
        let id = GameId(games.len() as u64);
        let game = GameInstance::new(id, creator, &params, &self.config, block_height)?;
        games.push(Arc::new(ReentrantMutex::new(GameSlot {
            game: RefCell::new(game),
            in_flight: Cell::new(false),
        })));
        let sequence = games.len() as u64;
        self.masters.write().push(creator);
        self.owners.write().entry(creator).or_default().push(id);
        drop(games);

        info!("Registered game {} ({} total)", id, sequence);
        scope.publish(
            &self.events,
            &[GameEvent::GameCreated {
                game_id: id,
                game_master: creator,
                sequence,
            }],
        );
        Ok(id)
    }

    // Index queries

    pub fn total_games(&self) -> u64 {
        self.games.read().len() as u64
    }

    /// Game created at position `index`
    pub fn game_at(&self, index: u64) -> Result<GameId> {
        if index < self.total_games() {
            Ok(GameId(index))
        } else {
            Err(GameError::GameNotFound(GameId(index)))
        }
    }

    pub fn game_master_at(&self, index: u64) -> Result<Address> {
        self.masters
            .read()
            .get(index as usize)
            .copied()
            .ok_or(GameError::GameNotFound(GameId(index)))
    }

    /// Game master of every game, in creation order
    pub fn game_masters(&self) -> Vec<Address> {
        self.masters.read().clone()
    }

    pub fn games_of(&self, owner: &Address) -> Vec<GameId> {
        self.owners.read().get(owner).cloned().unwrap_or_default()
    }

    // Game calls

    /// Join with exactly the entry value attached
    pub fn join(
        &self,
        game_id: GameId,
        player: Address,
        value: u64,
        commitment: Commitment,
    ) -> Result<Outcome> {
        self.transact(game_id, player, value, |game, ctx| game.join(ctx, commitment))
    }

    pub fn start_reveal(&self, game_id: GameId, caller: Address) -> Result<Outcome> {
        self.transact(game_id, caller, 0, |game, ctx| game.start_reveal(ctx))
    }

    pub fn reveal(
        &self,
        game_id: GameId,
        player: Address,
        guess: u64,
        secret: &Secret,
    ) -> Result<Outcome> {
        self.transact(game_id, player, 0, |game, ctx| game.reveal(ctx, guess, secret))
    }

    pub fn end_game(&self, game_id: GameId, caller: Address) -> Result<Outcome> {
        self.transact(game_id, caller, 0, |game, ctx| game.end_game(ctx))
    }

    pub fn request_refund(&self, game_id: GameId, player: Address) -> Result<Outcome> {
        self.transact(game_id, player, 0, |game, ctx| game.request_refund(ctx))
    }

    pub fn withdraw_pricepool(&self, game_id: GameId, caller: Address, to: Address) -> Result<Outcome> {
        self.transact(game_id, caller, 0, |game, ctx| game.withdraw_pricepool(ctx, to))
    }

    pub fn withdraw_game_fees(&self, game_id: GameId, caller: Address) -> Result<Outcome> {
        self.transact(game_id, caller, 0, |game, ctx| game.withdraw_game_fees(ctx))
    }

    pub fn withdraw_collateral_share(&self, game_id: GameId, caller: Address) -> Result<Outcome> {
        self.transact(game_id, caller, 0, |game, ctx| game.withdraw_collateral_share(ctx))
    }

    // Read-only

    pub fn view(&self, game_id: GameId) -> Result<GameView> {
        self.read(game_id, |game| game.view())
    }

    pub fn reveal_state(&self, game_id: GameId, player: &Address) -> Result<RevealState> {
        self.read(game_id, |game| game.reveal_state(player))
    }

    pub fn is_potential_winner(&self, game_id: GameId, player: &Address) -> Result<bool> {
        self.read(game_id, |game| game.is_potential_winner(player))
    }

    pub fn reveal_window(&self, game_id: GameId, player: &Address) -> Result<Option<RevealWindow>> {
        self.read(game_id, |game| game.reveal_window(player))
    }

    /// Run `f` against a game without the transaction machinery
    pub fn read<T>(&self, game_id: GameId, f: impl FnOnce(&GameInstance) -> T) -> Result<T> {
        let cell = self.cell(game_id)?;
        let slot = cell.lock();
        let game = slot.game.borrow();
        Ok(f(&game))
    }

    fn cell(&self, game_id: GameId) -> Result<GameCell> {
        self.games
            .read()
            .get(game_id.index())
            .cloned()
            .ok_or(GameError::GameNotFound(game_id))
    }

    /// Execute one call atomically
    ///
    /// The operation validates and applies its effects; the transfer it asks
    /// for runs afterwards with the borrow released. A failed transfer rolls
    /// the game back to its state before the call. While the transfer runs
    /// the game refuses other calls, so nothing can commit on top of state
    /// that may still be rolled back. Events go out only once the call has
    /// committed.
    fn transact<F>(&self, game_id: GameId, caller: Address, value: u64, op: F) -> Result<Outcome>
    where
        F: FnOnce(&mut GameInstance, &CallContext) -> Result<Outcome>,
    {
        let cell = self.cell(game_id)?;
        let slot = cell.lock();
        let Some(_in_flight) = InFlight::enter(&slot.in_flight) else {
            warn!("Refusing call by {} on game {} during a transfer", caller, game_id);
            return Err(GameError::CallInFlight(game_id));
        };
        let scope = EventScope::enter();

        let ctx = CallContext::new(caller, self.ledger.block_height())
            .with_value(value)
            .with_entropy(self.ledger.block_entropy());

        let snapshot = slot.game.borrow().clone();
        let outcome = {
            let mut game = slot.game.borrow_mut();
            op(&mut game, &ctx)?
        };

        if let Some(transfer) = outcome.transfer {
            let executed = match transfer {
                Transfer::Deposit { from, amount } => self.ledger.debit(game_id, &from, amount),
                Transfer::Payout { to, amount } => self.ledger.credit(game_id, &to, amount),
            };
            if let Err(err) = executed {
                warn!(
                    "Transfer {:?} for game {} failed, reverting: {}",
                    transfer, game_id, err
                );
                *slot.game.borrow_mut() = snapshot;
                return Err(err.into());
            }
            debug!("Game {} executed {:?}", game_id, transfer);
        }

        debug_assert!(
            slot.game.borrow().check_invariants().is_ok(),
            "game {} violated its invariants",
            game_id
        );

        scope.publish(&self.events, &outcome.events);
        Ok(outcome)
    }
}
