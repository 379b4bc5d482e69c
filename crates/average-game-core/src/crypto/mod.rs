//! Cryptographic primitives for the commit-reveal scheme.
//!
//! This module provides:
//! - Secret, the player-chosen string blinding a guess
//! - Commitment = H(guess || secret), stored at join and checked at reveal

mod commitment;

pub use commitment::{Commitment, Secret};
