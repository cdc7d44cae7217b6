//! Settlement engine
//!
//! Settling a request happens in two phases that are testable on their own:
//!
//! 1. the outcome of the request is derived purely from its own data and the
//!    delivered randomness ([`SettlementEngine::outcome`]);
//! 2. the requester's outstanding refund credits, left behind by their
//!    earlier settled games, are resolved against the oracle's final charges
//!    ([`SettlementEngine::resolve_credits`]).
//!
//! [`SettlementEngine::settle`] runs every check before moving any value so a
//! failed settlement leaves balances and the ledger exactly as they were.

use crate::config::GameConfig;
use crate::errors::{SettlementError, SettlementResult};
use crate::games::bank::Bank;
use crate::games::ledger::{GameLedger, RefundCredit};
use crate::games::outcome;
use crate::games::randomizer::RandomnessOracle;
use crate::games::types::{
    Address, Amount, GameEvent, GameRequest, GameStatus, Outcome, Randomness, RequestId,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Surplus fee paid back during a settlement
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RefundPaid {
    pub amount: Amount,
    /// The earlier game whose prepaid fee produced the surplus
    pub refunded_game: RequestId,
}

/// Everything one settlement call applied
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Settlement {
    pub request: GameRequest,
    pub seed: Randomness,
    pub outcome: Outcome,
    pub refund: Option<RefundPaid>,
}

impl Settlement {
    /// One `FlipResult` and at most one `Refund`, in emission order
    pub fn events(&self) -> Vec<GameEvent> {
        let mut events = vec![GameEvent::FlipResult {
            player: self.request.requester,
            id: self.request.id,
            seed: self.seed,
            prediction: self.request.prediction,
            result: self.outcome.result,
            outcome: self.outcome.outcome,
            payout: self.outcome.payout,
        }];

        if let Some(refund) = self.refund {
            events.push(GameEvent::Refund {
                player: self.request.requester,
                amount: refund.amount,
                refunded_game: refund.refunded_game,
            });
        }
        events
    }
}

/// What a requester's outstanding credits allow at one settlement
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreditResolution {
    /// Oldest billed credit with a surplus, and that surplus
    pub payable: Option<(RefundCredit, Amount)>,
    /// Credits this settlement closes: the payable one and billed ones with nothing left over
    pub cleared: Vec<RequestId>,
    /// Credits whose game the oracle has not billed yet
    pub unbilled: Vec<RequestId>,
}

/// Accounts a settlement moves value between
pub struct SettlementAccounts<'a, O: RandomnessOracle + ?Sized> {
    pub bank: &'a Bank,
    pub oracle: &'a O,
    /// The game contract: holds wagers and the house pool, owns the oracle deposit
    pub house: Address,
}

/// Derives outcomes and applies payouts and refunds
#[derive(Debug, Clone)]
pub struct SettlementEngine {
    payout_multiplier_bps: u32,
}

impl SettlementEngine {
    pub fn new(payout_multiplier_bps: u32) -> Self {
        Self {
            payout_multiplier_bps,
        }
    }

    pub fn from_config(config: &GameConfig) -> Self {
        Self::new(config.payout_multiplier_bps)
    }

    /// Phase one: outcome of `request` from its own data only
    pub fn outcome(&self, request: &GameRequest, randomness: &Randomness) -> Outcome {
        outcome::settle(request, randomness, self.payout_multiplier_bps)
    }

    /// Phase two: what `requester`'s outstanding credits are worth.
    ///
    /// At most one surplus is paid per settlement, the oldest. Credits for
    /// games the oracle has not billed yet are carried forward untouched.
    pub fn resolve_credits<O: RandomnessOracle + ?Sized>(
        ledger: &GameLedger,
        oracle: &O,
        requester: &Address,
    ) -> CreditResolution {
        let mut resolution = CreditResolution::default();
        for credit in ledger.outstanding_credits(requester) {
            let Some(charge) = oracle.fee_charged(credit.game) else {
                resolution.unbilled.push(credit.game);
                continue;
            };
            let amount = credit.resolve(charge);
            if amount == 0 {
                resolution.cleared.push(credit.game);
            } else if resolution.payable.is_none() {
                resolution.payable = Some((*credit, amount));
                resolution.cleared.push(credit.game);
            }
        }

        if !resolution.unbilled.is_empty() {
            warn!(
                %requester,
                games = ?resolution.unbilled,
                "Oracle charge not final for credited games, carrying credits forward"
            );
        }
        resolution
    }

    /// Settle request `id` with `randomness`.
    ///
    /// Pays the requester's oldest billed surplus out of the oracle deposit,
    /// pays the win payout from the house pool, marks the request settled
    /// and adds it to the requester's outstanding credits.
    pub fn settle<O: RandomnessOracle + ?Sized>(
        &self,
        ledger: &mut GameLedger,
        accounts: &SettlementAccounts<'_, O>,
        id: RequestId,
        randomness: Randomness,
    ) -> SettlementResult<Settlement> {
        let request = ledger.pending(id)?.clone();
        let outcome = self.outcome(&request, &randomness);
        let resolution = Self::resolve_credits(ledger, accounts.oracle, &request.requester);

        // Checks first, nothing has moved yet
        if outcome.payout > 0 {
            let held = accounts.bank.balance(&accounts.house);
            let other_escrow = ledger.escrowed_wagers().saturating_sub(request.wager);
            let available = held.saturating_sub(other_escrow);
            if outcome.payout > available {
                return Err(SettlementError::InsufficientHouseLiquidity {
                    needed: outcome.payout,
                    available,
                });
            }
        }

        let refund = resolution.payable.map(|(credit, amount)| RefundPaid {
            amount,
            refunded_game: credit.game,
        });
        if let Some(refund) = refund {
            let available = accounts.oracle.client_balance(&accounts.house);
            if refund.amount > available {
                return Err(SettlementError::InsufficientRefundableBalance {
                    refunded_game: refund.refunded_game,
                    amount: refund.amount,
                    available,
                });
            }
        }

        // Oracle withdrawal first: a refusal leaves nothing to undo
        if let Some(refund) = refund {
            accounts
                .oracle
                .client_withdraw_to(accounts.house, request.requester, refund.amount)?;
        }
        if outcome.payout > 0 {
            if let Err(e) = accounts
                .bank
                .transfer(accounts.house, request.requester, outcome.payout)
            {
                if let Some(refund) = refund {
                    accounts
                        .oracle
                        .client_deposit(request.requester, accounts.house, refund.amount)?;
                }
                return Err(e.into());
            }
        }

        ledger.mark_settled(id)?;
        ledger.clear_credits(&request.requester, &resolution.cleared);
        ledger.add_credit(
            request.requester,
            RefundCredit {
                game: id,
                prepaid_fee: request.prepaid_fee,
            },
        );

        info!(
            id,
            player = %request.requester,
            result = %outcome.result,
            outcome = ?outcome.outcome,
            payout = %outcome.payout,
            "🪙 Flip settled"
        );
        if let Some(refund) = refund {
            debug!(
                id,
                refunded_game = refund.refunded_game,
                amount = %refund.amount,
                "Paid fee surplus of earlier game"
            );
        }

        Ok(Settlement {
            request: GameRequest {
                status: GameStatus::Settled,
                ..request
            },
            seed: randomness,
            outcome,
            refund,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{OracleError, OracleResult};
    use crate::games::randomizer::MockRandomizer;
    use crate::games::types::{CoinChoice, GameOutcome};
    use dashmap::DashMap;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    const HOUSE: Address = Address([0xaa; 20]);
    const PLAYER: Address = Address([0x01; 20]);
    const BILLING: Address = Address([0xbb; 20]);
    const ELSEWHERE: Address = Address([0x77; 20]);

    /// Randomizer whose billing and withdrawals are driven by hand
    struct ScriptedOracle {
        inner: MockRandomizer,
        bank: Bank,
        charges: DashMap<RequestId, Amount>,
        refuse_withdrawals: AtomicBool,
        /// Taken out of the house during each withdrawal
        house_drain: AtomicU64,
    }

    impl ScriptedOracle {
        /// Bill `id` for `charge` out of the house deposit
        fn bill(&self, id: RequestId, charge: Amount) {
            self.inner.client_withdraw_to(HOUSE, BILLING, charge).unwrap();
            self.charges.insert(id, charge);
        }
    }

    impl RandomnessOracle for ScriptedOracle {
        fn address(&self) -> Address {
            self.inner.address()
        }

        fn estimate_fee(&self, callback_gas_limit: u64) -> Amount {
            self.inner.estimate_fee(callback_gas_limit)
        }

        fn request(&self, client: Address, callback_gas_limit: u64) -> OracleResult<RequestId> {
            self.inner.request(client, callback_gas_limit)
        }

        fn cancel(&self, client: Address, id: RequestId) -> OracleResult<()> {
            self.inner.cancel(client, id)
        }

        fn client_deposit(&self, from: Address, client: Address, value: Amount) -> OracleResult<()> {
            self.inner.client_deposit(from, client, value)
        }

        fn client_withdraw_to(&self, client: Address, to: Address, amount: Amount) -> OracleResult<()> {
            if self.refuse_withdrawals.load(Ordering::SeqCst) {
                return Err(OracleError::InsufficientDeposit {
                    client,
                    requested: amount,
                    available: 0,
                });
            }
            self.inner.client_withdraw_to(client, to, amount)?;
            let drain = self.house_drain.load(Ordering::SeqCst) as Amount;
            self.bank.transfer(HOUSE, ELSEWHERE, drain)?;
            Ok(())
        }

        fn client_balance(&self, client: &Address) -> Amount {
            self.inner.client_balance(client)
        }

        fn fee_charged(&self, id: RequestId) -> Option<Amount> {
            self.charges.get(&id).map(|c| *c)
        }
    }

    struct Fixture {
        bank: Bank,
        oracle: ScriptedOracle,
        ledger: GameLedger,
        engine: SettlementEngine,
    }

    impl Fixture {
        fn new() -> Self {
            let bank = Bank::new();
            bank.mint(HOUSE, 1_000);
            bank.mint(PLAYER, 1_000);
            let oracle = ScriptedOracle {
                inner: MockRandomizer::new(Address([0xee; 20]), bank.clone(), 1, 30),
                bank: bank.clone(),
                charges: DashMap::new(),
                refuse_withdrawals: AtomicBool::new(false),
                house_drain: AtomicU64::new(0),
            };
            Self {
                bank,
                oracle,
                ledger: GameLedger::new(),
                engine: SettlementEngine::new(20_000),
            }
        }

        /// Escrow a wager and fee the way the game contract does
        fn open(&mut self, prediction: CoinChoice, wager: Amount, fee: Amount) -> RequestId {
            self.bank.transfer(PLAYER, HOUSE, wager).unwrap();
            self.oracle.client_deposit(PLAYER, HOUSE, fee).unwrap();
            let id = self.oracle.request(HOUSE, 10).unwrap();
            self.ledger
                .record_pending(GameRequest {
                    id,
                    requester: PLAYER,
                    prediction,
                    wager,
                    prepaid_fee: fee,
                    status: GameStatus::Pending,
                })
                .unwrap();
            id
        }

        fn settle(&mut self, id: RequestId, randomness: Randomness) -> SettlementResult<Settlement> {
            let accounts = SettlementAccounts {
                bank: &self.bank,
                oracle: &self.oracle,
                house: HOUSE,
            };
            self.engine.settle(&mut self.ledger, &accounts, id, randomness)
        }

        fn credit_games(&self) -> Vec<RequestId> {
            self.ledger
                .outstanding_credits(&PLAYER)
                .iter()
                .map(|c| c.game)
                .collect()
        }
    }

    const HEADS: Randomness = [0; 32];
    const TAILS: Randomness = {
        let mut v = [0; 32];
        v[31] = 1;
        v
    };

    #[test]
    fn test_win_pays_from_house() {
        let mut fx = Fixture::new();
        let id = fx.open(CoinChoice::Heads, 100, 50);

        let settlement = fx.settle(id, HEADS).unwrap();

        assert_eq!(settlement.outcome.outcome, GameOutcome::Win);
        assert_eq!(settlement.outcome.payout, 200);
        assert_eq!(fx.bank.balance(&PLAYER), 1_000 - 100 - 50 + 200);
        assert_eq!(fx.bank.balance(&HOUSE), 1_000 + 100 - 200);
        assert!(settlement.refund.is_none());
        assert_eq!(settlement.events().len(), 1);
    }

    #[test]
    fn test_loss_keeps_wager() {
        let mut fx = Fixture::new();
        let id = fx.open(CoinChoice::Heads, 100, 50);

        let settlement = fx.settle(id, TAILS).unwrap();

        assert_eq!(settlement.outcome.outcome, GameOutcome::Loss);
        assert_eq!(fx.bank.balance(&HOUSE), 1_100);
    }

    #[test]
    fn test_settled_game_becomes_credit() {
        let mut fx = Fixture::new();
        let id = fx.open(CoinChoice::Heads, 100, 50);
        fx.settle(id, TAILS).unwrap();

        assert_eq!(
            fx.ledger.outstanding_credits(&PLAYER),
            &[RefundCredit { game: id, prepaid_fee: 50 }]
        );
    }

    #[test]
    fn test_unbilled_credit_is_carried_forward() {
        let mut fx = Fixture::new();
        let g1 = fx.open(CoinChoice::Heads, 100, 50);
        fx.settle(g1, TAILS).unwrap();

        // g1 is not billed yet when g2 settles
        let g2 = fx.open(CoinChoice::Heads, 100, 50);
        let second = fx.settle(g2, TAILS).unwrap();
        assert!(second.refund.is_none());
        assert_eq!(fx.credit_games(), vec![g1, g2]);

        fx.oracle.bill(g1, 20);
        fx.oracle.bill(g2, 30);

        // one surplus per settlement, oldest first
        let g3 = fx.open(CoinChoice::Heads, 100, 50);
        let third = fx.settle(g3, TAILS).unwrap();
        assert_eq!(third.refund, Some(RefundPaid { amount: 30, refunded_game: g1 }));
        assert_eq!(fx.credit_games(), vec![g2, g3]);

        let g4 = fx.open(CoinChoice::Heads, 100, 50);
        let fourth = fx.settle(g4, TAILS).unwrap();
        assert_eq!(fourth.refund, Some(RefundPaid { amount: 20, refunded_game: g2 }));
        assert_eq!(fx.credit_games(), vec![g3, g4]);
        assert_eq!(fx.bank.balance(&PLAYER), 1_000 - 4 * 150 + 30 + 20);
    }

    #[test]
    fn test_fully_billed_credit_is_cleared_without_refund() {
        let mut fx = Fixture::new();
        let g1 = fx.open(CoinChoice::Heads, 100, 50);
        fx.settle(g1, TAILS).unwrap();
        fx.oracle.bill(g1, 50);

        let g2 = fx.open(CoinChoice::Heads, 100, 50);
        let settlement = fx.settle(g2, TAILS).unwrap();

        assert!(settlement.refund.is_none());
        assert_eq!(settlement.events().len(), 1);
        assert_eq!(fx.credit_games(), vec![g2]);
    }

    #[test]
    fn test_no_credit_for_unknown_player() {
        let fx = Fixture::new();
        assert_eq!(
            SettlementEngine::resolve_credits(&fx.ledger, &fx.oracle, &HOUSE),
            CreditResolution::default()
        );
    }

    #[test]
    fn test_duplicate_settlement_changes_nothing() {
        let mut fx = Fixture::new();
        let id = fx.open(CoinChoice::Heads, 100, 50);
        fx.settle(id, HEADS).unwrap();
        let ledger_before = fx.ledger.clone();
        let player_before = fx.bank.balance(&PLAYER);

        assert_eq!(fx.settle(id, HEADS), Err(SettlementError::AlreadySettled(id)));
        assert_eq!(fx.ledger, ledger_before);
        assert_eq!(fx.bank.balance(&PLAYER), player_before);
    }

    #[test]
    fn test_illiquid_house_aborts_without_changes() {
        let mut fx = Fixture::new();
        fx.bank.mint(PLAYER, 100);
        let id = fx.open(CoinChoice::Heads, 900, 50);
        let other = fx.open(CoinChoice::Tails, 50, 50);
        fx.bank.transfer(HOUSE, ELSEWHERE, 200).unwrap();
        let ledger_before = fx.ledger.clone();

        // house holds 1_750 of which 50 is the other escrowed wager; a win needs 1_800

        let err = fx.settle(id, HEADS).unwrap_err();
        assert!(matches!(err, SettlementError::InsufficientHouseLiquidity { needed: 1_800, .. }));
        assert!(fx.ledger.pending(other).is_ok());
        assert_eq!(fx.ledger, ledger_before);
        assert_eq!(fx.bank.balance(&HOUSE), 1_750);
    }

    #[test]
    fn test_refused_withdrawal_moves_nothing() {
        let mut fx = Fixture::new();
        let g1 = fx.open(CoinChoice::Heads, 100, 50);
        fx.settle(g1, TAILS).unwrap();
        fx.oracle.bill(g1, 20);
        let g2 = fx.open(CoinChoice::Heads, 100, 50);

        let ledger_before = fx.ledger.clone();
        let player_before = fx.bank.balance(&PLAYER);
        let house_before = fx.bank.balance(&HOUSE);
        let deposit_before = fx.oracle.client_balance(&HOUSE);
        fx.oracle.refuse_withdrawals.store(true, Ordering::SeqCst);

        let err = fx.settle(g2, HEADS).unwrap_err();

        assert!(matches!(
            err,
            SettlementError::Oracle(OracleError::InsufficientDeposit { requested: 30, .. })
        ));
        assert_eq!(fx.ledger, ledger_before);
        assert!(fx.ledger.pending(g2).is_ok());
        assert_eq!(fx.bank.balance(&PLAYER), player_before);
        assert_eq!(fx.bank.balance(&HOUSE), house_before);
        assert_eq!(fx.oracle.client_balance(&HOUSE), deposit_before);
    }

    #[test]
    fn test_failed_payout_returns_the_refund() {
        let mut fx = Fixture::new();
        let g1 = fx.open(CoinChoice::Heads, 100, 50);
        fx.settle(g1, TAILS).unwrap();
        fx.oracle.bill(g1, 20);
        let g2 = fx.open(CoinChoice::Heads, 100, 50);

        let ledger_before = fx.ledger.clone();
        let player_before = fx.bank.balance(&PLAYER);
        let deposit_before = fx.oracle.client_balance(&HOUSE);
        // passes the liquidity check at 1_200, then the house is emptied mid-settlement
        fx.oracle.house_drain.store(1_100, Ordering::SeqCst);

        let err = fx.settle(g2, HEADS).unwrap_err();

        assert!(matches!(
            err,
            SettlementError::Oracle(OracleError::InsufficientFunds { needed: 200, .. })
        ));
        assert_eq!(fx.ledger, ledger_before);
        assert_eq!(fx.bank.balance(&PLAYER), player_before);
        assert_eq!(fx.oracle.client_balance(&HOUSE), deposit_before);
        assert_eq!(fx.bank.balance(&HOUSE), 100);
    }
}
