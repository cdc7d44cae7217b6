//! Coinflip - oracle-settled coin flip
//!
//! A game contract requests randomness from a Randomizer-style oracle,
//! escrows the wager and the prepaid fee, and settles once the oracle calls
//! back. Fee surplus is refunded against the player's next game. A
//! WebSocket client watches the oracle's sequencer for early previews.

pub mod config;
pub mod errors;
pub mod games;
pub mod ledger_store;
pub mod preview;

pub use config::{CoinflipConfig, ConfigLoader};
pub use errors::{CoinflipError, CoinflipResult};
pub use games::{Bank, CoinFlip, GameLedger, MockRandomizer, RandomnessOracle};
pub use preview::{listen_for_preview, PreviewClient};
