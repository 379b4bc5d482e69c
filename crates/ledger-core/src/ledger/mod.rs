//! Ledger substrate abstraction.

mod mock;
mod traits;

pub use mock::{CreditHook, EscrowAccount, MockLedger};
pub use traits::{Ledger, LedgerError};
