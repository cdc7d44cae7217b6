//! Pure outcome derivation from oracle randomness
//!
//! Nothing here touches balances or the ledger, so the coin landing and the
//! payout for a request can be checked in isolation from settlement.

use crate::games::types::{Amount, CoinChoice, GameOutcome, GameRequest, Outcome, Randomness};

/// Basis points denominator for payout multipliers
pub const BPS_DENOMINATOR: u128 = 10_000;

/// Compute coin flip result from oracle randomness.
///
/// The value is read as a big-endian 256-bit integer; even lands heads.
pub fn compute_coinflip(randomness: &Randomness) -> CoinChoice {
    if randomness[31] % 2 == 0 {
        CoinChoice::Heads
    } else {
        CoinChoice::Tails
    }
}

/// Payout owed for a winning wager
pub fn win_payout(wager: Amount, payout_multiplier_bps: u32) -> Amount {
    wager.saturating_mul(payout_multiplier_bps as u128) / BPS_DENOMINATOR
}

/// Derive the outcome of `request` from `randomness`.
pub fn settle(request: &GameRequest, randomness: &Randomness, payout_multiplier_bps: u32) -> Outcome {
    let result = compute_coinflip(randomness);
    let outcome = if result == request.prediction {
        GameOutcome::Win
    } else {
        GameOutcome::Loss
    };

    let payout = match outcome {
        GameOutcome::Win => win_payout(request.wager, payout_multiplier_bps),
        GameOutcome::Loss => 0,
    };

    Outcome {
        result,
        outcome,
        payout,
    }
}
