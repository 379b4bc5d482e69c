//! Protocol types and notifications.

mod events;
mod types;

pub use events::GameEvent;
pub use types::{CallContext, GameIcon, GamePhase, Outcome, RevealState, Transfer};
