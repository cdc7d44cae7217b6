//! Coin flip game contract
//!
//! Players escrow a wager plus a prepaid oracle fee and receive a request id.
//! The oracle later calls back with randomness and the game settles the flip,
//! paying any fee surplus the player is owed from their previous game.

use crate::config::{CoinflipConfig, GameConfig, OracleConfig};
use crate::errors::{OracleError, OracleResult, SettlementError, SettlementResult};
use crate::games::bank::Bank;
use crate::games::ledger::GameLedger;
use crate::games::randomizer::{RandomizerCallback, RandomnessOracle};
use crate::games::settlement::{Settlement, SettlementAccounts, SettlementEngine};
use crate::games::types::{
    Address, Amount, CoinChoice, FlipParams, GameEvent, GameRequest, GameStatus, Randomness,
    RequestId,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Coin flip game bound to one randomness oracle
pub struct CoinFlip<O: RandomnessOracle> {
    address: Address,
    owner: Address,
    oracle: Arc<O>,
    bank: Bank,
    ledger: GameLedger,
    engine: SettlementEngine,
    oracle_config: OracleConfig,
    game_config: GameConfig,
    events: Vec<GameEvent>,
    event_tx: broadcast::Sender<GameEvent>,
}

impl<O: RandomnessOracle> CoinFlip<O> {
    /// Deploy a fresh game at `address`, owned by `owner`
    pub fn deploy(
        address: Address,
        owner: Address,
        oracle: Arc<O>,
        bank: Bank,
        config: &CoinflipConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        info!(%address, %owner, oracle = %oracle.address(), "Coin flip deployed");

        Self {
            address,
            owner,
            oracle,
            bank,
            ledger: GameLedger::new(),
            engine: SettlementEngine::from_config(&config.game),
            oracle_config: config.oracle.clone(),
            game_config: config.game.clone(),
            events: Vec::new(),
            event_tx,
        }
    }

    /// Resume from a previously saved ledger
    pub fn with_ledger(mut self, ledger: GameLedger) -> Self {
        info!(
            games = ledger.games().count(),
            pending = ledger.pending_count(),
            "Restored game ledger"
        );
        self.ledger = ledger;
        self
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn owner(&self) -> Address {
        self.owner
    }

    pub fn oracle(&self) -> &Arc<O> {
        &self.oracle
    }

    pub fn ledger(&self) -> &GameLedger {
        &self.ledger
    }

    /// Smallest prepaid fee the oracle accepts for one flip
    pub fn minimum_fee(&self) -> Amount {
        self.oracle.estimate_fee(self.oracle_config.callback_gas_limit)
    }

    /// Open a flip for `player`, escrowing the wager and prepaying the oracle fee
    pub fn request(
        &mut self,
        player: Address,
        params: FlipParams,
        prepaid_fee: Amount,
    ) -> OracleResult<RequestId> {
        let min_wager = self.game_config.min_wager_wei as Amount;
        if params.wager < min_wager {
            return Err(OracleError::BelowMinimumWager {
                wager: params.wager,
                minimum: min_wager,
            });
        }

        let minimum_fee = self.minimum_fee();
        if prepaid_fee < minimum_fee {
            return Err(OracleError::InsufficientFee {
                paid: prepaid_fee,
                minimum: minimum_fee,
            });
        }

        let needed = params.wager.saturating_add(prepaid_fee);
        let available = self.bank.balance(&player);
        if available < needed {
            return Err(OracleError::InsufficientFunds {
                account: player,
                needed,
                available,
            });
        }

        self.bank.transfer(player, self.address, params.wager)?;
        if let Err(e) = self.oracle.client_deposit(player, self.address, prepaid_fee) {
            self.bank.transfer(self.address, player, params.wager)?;
            return Err(e);
        }

        let id = match self
            .oracle
            .request(self.address, self.oracle_config.callback_gas_limit)
        {
            Ok(id) => id,
            Err(e) => {
                self.oracle
                    .client_withdraw_to(self.address, player, prepaid_fee)?;
                self.bank.transfer(self.address, player, params.wager)?;
                return Err(e);
            }
        };

        let recorded = self.ledger.record_pending(GameRequest {
            id,
            requester: player,
            prediction: params.prediction,
            wager: params.wager,
            prepaid_fee,
            status: GameStatus::Pending,
        });
        if let Err(e) = recorded {
            warn!(id, error = %e, "Oracle issued an id the ledger already holds, rolling back");
            self.oracle.cancel(self.address, id)?;
            self.oracle
                .client_withdraw_to(self.address, player, prepaid_fee)?;
            self.bank.transfer(self.address, player, params.wager)?;
            return Err(e);
        }

        self.emit(GameEvent::Flip {
            player,
            id,
            prediction: params.prediction,
        });
        Ok(id)
    }

    /// Shorthand for [`CoinFlip::request`]
    pub fn flip(
        &mut self,
        player: Address,
        prediction: CoinChoice,
        wager: Amount,
        prepaid_fee: Amount,
    ) -> OracleResult<RequestId> {
        self.request(player, FlipParams { prediction, wager }, prepaid_fee)
    }

    /// Settle `id` with the oracle's randomness.
    ///
    /// Only the oracle may call this. Unknown and already settled ids are
    /// rejected without touching any state.
    pub fn on_callback(
        &mut self,
        id: RequestId,
        randomness: Randomness,
        sender: Address,
    ) -> SettlementResult<Settlement> {
        if sender != self.oracle.address() {
            warn!(id, %sender, "Rejected callback from unauthorized sender");
            return Err(SettlementError::UnauthorizedCallback(sender));
        }

        let accounts = SettlementAccounts {
            bank: &self.bank,
            oracle: self.oracle.as_ref(),
            house: self.address,
        };
        let settlement = match self.engine.settle(&mut self.ledger, &accounts, id, randomness) {
            Ok(settlement) => settlement,
            Err(e @ (SettlementError::UnknownRequest(_) | SettlementError::AlreadySettled(_))) => {
                debug!(id, error = %e, "Dropped callback");
                return Err(e);
            }
            Err(e) => {
                warn!(id, error = %e, "Settlement aborted");
                return Err(e);
            }
        };

        for event in settlement.events() {
            self.emit(event);
        }
        Ok(settlement)
    }

    /// Add `amount` from `from` to the house pool
    pub fn fund_house(&self, from: Address, amount: Amount) -> OracleResult<()> {
        self.bank.transfer(from, self.address, amount)?;
        info!(%from, amount = %amount, "House funded");
        Ok(())
    }

    /// House pool balance not held against pending wagers
    pub fn house_liquidity(&self) -> Amount {
        self.bank
            .balance(&self.address)
            .saturating_sub(self.ledger.escrowed_wagers())
    }

    /// Oracle deposit that pending requests or outstanding credits may still claim
    pub fn reserved_deposit(&self) -> Amount {
        let credited: Amount = self
            .ledger
            .credits()
            .map(|(_, credit)| match self.oracle.fee_charged(credit.game) {
                Some(charge) => credit.resolve(charge),
                None => credit.prepaid_fee,
            })
            .sum();
        self.ledger.pending_fees() + credited
    }

    /// Owner-only withdrawal of unreserved oracle deposit
    pub fn withdraw_oracle_deposit(&self, caller: Address, amount: Amount) -> OracleResult<()> {
        if caller != self.owner {
            return Err(OracleError::NotOwner(caller));
        }

        let available = self
            .oracle
            .client_balance(&self.address)
            .saturating_sub(self.reserved_deposit());
        if amount > available {
            return Err(OracleError::InsufficientDeposit {
                client: self.address,
                requested: amount,
                available,
            });
        }

        self.oracle.client_withdraw_to(self.address, self.owner, amount)?;
        info!(amount = %amount, "Withdrew oracle deposit");
        Ok(())
    }

    /// Live stream of events emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<GameEvent> {
        self.event_tx.subscribe()
    }

    /// Every event emitted so far
    pub fn events(&self) -> &[GameEvent] {
        &self.events
    }

    fn emit(&mut self, event: GameEvent) {
        debug!(event = event.name(), "Emitting event");
        self.events.push(event.clone());
        // no live subscribers is fine
        let _ = self.event_tx.send(event);
    }
}

impl<O: RandomnessOracle> RandomizerCallback for CoinFlip<O> {
    fn randomizer_callback(
        &mut self,
        sender: Address,
        id: RequestId,
        value: Randomness,
    ) -> SettlementResult<Settlement> {
        self.on_callback(id, value, sender)
    }
}
