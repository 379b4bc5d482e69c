//! Ledger Core Library
//!
//! Shared substrate primitives consumed by the game engine:
//! - Identities (Address) and game identifiers (GameId)
//! - Ledger trait for block height, entropy and escrowed value transfer
//! - MockLedger for tests and demos

pub mod ledger;
pub mod types;

pub use ledger::{CreditHook, EscrowAccount, Ledger, LedgerError, MockLedger};
pub use types::{Address, GameId};
