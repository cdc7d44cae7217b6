pub mod bank;
pub mod coinflip;
pub mod ledger;
pub mod outcome;
pub mod randomizer;
pub mod settlement;
pub mod types;

pub use bank::Bank;
pub use coinflip::CoinFlip;
pub use ledger::{GameLedger, RefundCredit};
pub use randomizer::{MockRandomizer, RandomizerCallback, RandomnessOracle};
pub use settlement::{CreditResolution, RefundPaid, Settlement, SettlementAccounts, SettlementEngine};
pub use types::*;
