//! Randomness oracle interfaces
//!
//! [`RandomnessOracle`] is the outbound side the game uses to deposit fees
//! and request randomness; [`RandomizerCallback`] is the inbound side the
//! oracle invokes once randomness is available. [`MockRandomizer`] is an
//! in-process oracle that bills each request only after its callback has
//! run, the way the hosted Randomizer settles gas after the callback
//! transaction.

use crate::errors::{OracleError, OracleResult, SettlementError, SettlementResult};
use crate::games::bank::Bank;
use crate::games::settlement::Settlement;
use crate::games::types::{Address, Amount, Randomness, RequestId};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// Outbound interface to the randomness oracle
pub trait RandomnessOracle: Send + Sync {
    /// Address the oracle calls back from
    fn address(&self) -> Address;

    /// Minimum prepaid fee for a request with the given callback gas limit
    fn estimate_fee(&self, callback_gas_limit: u64) -> Amount;

    /// Open a request on behalf of `client`, returning a fresh id
    fn request(&self, client: Address, callback_gas_limit: u64) -> OracleResult<RequestId>;

    /// Withdraw an open request of `client` before it is fulfilled
    fn cancel(&self, client: Address, id: RequestId) -> OracleResult<()>;

    /// Move `value` from `from` into `client`'s fee deposit
    fn client_deposit(&self, from: Address, client: Address, value: Amount) -> OracleResult<()>;

    /// Pay `amount` out of `client`'s fee deposit to `to`
    fn client_withdraw_to(&self, client: Address, to: Address, amount: Amount) -> OracleResult<()>;

    /// Current fee deposit of `client`
    fn client_balance(&self, client: &Address) -> Amount;

    /// Final fee charged for `id`, known once its callback has completed
    fn fee_charged(&self, id: RequestId) -> Option<Amount>;
}

/// Inbound interface the oracle invokes with the randomness for a request
pub trait RandomizerCallback {
    fn randomizer_callback(
        &mut self,
        sender: Address,
        id: RequestId,
        value: Randomness,
    ) -> SettlementResult<Settlement>;
}

#[derive(Debug, Clone, Copy)]
struct OpenRequest {
    client: Address,
    callback_gas_limit: u64,
}

/// In-process randomizer for local sessions and tests
pub struct MockRandomizer {
    address: Address,
    bank: Bank,
    gas_price_wei: u64,
    callback_charge_wei: AtomicU64,
    next_id: AtomicU64,
    open: DashMap<RequestId, OpenRequest>,
    deposits: DashMap<Address, Amount>,
    fees: DashMap<RequestId, Amount>,
}

impl MockRandomizer {
    /// Create a randomizer quoting `gas_price_wei` per callback gas and billing
    /// `callback_charge_wei` per delivered callback.
    pub fn new(address: Address, bank: Bank, gas_price_wei: u64, callback_charge_wei: u64) -> Self {
        Self {
            address,
            bank,
            gas_price_wei,
            callback_charge_wei: AtomicU64::new(callback_charge_wei),
            next_id: AtomicU64::new(1),
            open: DashMap::new(),
            deposits: DashMap::new(),
            fees: DashMap::new(),
        }
    }

    /// Continue numbering after `last_id` (resuming a saved ledger)
    pub fn resume_after(self, last_id: RequestId) -> Self {
        self.next_id.store(last_id + 1, Ordering::SeqCst);
        self
    }

    /// Change what subsequent callbacks are billed
    pub fn set_callback_charge(&self, charge_wei: u64) {
        self.callback_charge_wei.store(charge_wei, Ordering::SeqCst);
    }

    pub fn is_open(&self, id: RequestId) -> bool {
        self.open.contains_key(&id)
    }

    /// Deliver `value` for request `id` to `client`, then bill the request.
    ///
    /// A failed callback is not billed and the request stays open.
    pub fn submit_random<C>(&self, client: &mut C, id: RequestId, value: Randomness) -> SettlementResult<Settlement>
    where
        C: RandomizerCallback + ?Sized,
    {
        let request = self
            .open
            .get(&id)
            .map(|r| *r)
            .ok_or(SettlementError::Oracle(OracleError::UnknownOracleRequest(id)))?;

        let settlement = client.randomizer_callback(self.address, id, value)?;

        let charge = {
            let mut deposit = self.deposits.entry(request.client).or_insert(0);
            let charge = (self.callback_charge_wei.load(Ordering::SeqCst) as Amount).min(*deposit);
            *deposit -= charge;
            charge
        };
        self.fees.insert(id, charge);
        self.open.remove(&id);

        debug!(
            id,
            charge = %charge,
            gas_limit = request.callback_gas_limit,
            "Billed randomizer callback"
        );
        Ok(settlement)
    }

    /// Deterministic 32-byte value for `id` derived from `seed`
    pub fn derive_value(seed: &[u8], id: RequestId) -> Randomness {
        let mut hasher = Sha256::new();
        hasher.update(seed);
        hasher.update(id.to_be_bytes());
        hasher.finalize().into()
    }
}

impl RandomnessOracle for MockRandomizer {
    fn address(&self) -> Address {
        self.address
    }

    fn estimate_fee(&self, callback_gas_limit: u64) -> Amount {
        callback_gas_limit as Amount * self.gas_price_wei as Amount
    }

    fn request(&self, client: Address, callback_gas_limit: u64) -> OracleResult<RequestId> {
        let minimum = self.estimate_fee(callback_gas_limit);
        let available = self.client_balance(&client);
        if available < minimum {
            return Err(OracleError::InsufficientDeposit {
                client,
                requested: minimum,
                available,
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.open.insert(
            id,
            OpenRequest {
                client,
                callback_gas_limit,
            },
        );

        info!(id, %client, callback_gas_limit, "🎲 Randomness requested");
        Ok(id)
    }

    fn cancel(&self, client: Address, id: RequestId) -> OracleResult<()> {
        match self.open.remove_if(&id, |_, request| request.client == client) {
            Some(_) => {
                debug!(id, %client, "Randomness request cancelled");
                Ok(())
            }
            None => Err(OracleError::UnknownOracleRequest(id)),
        }
    }

    fn client_deposit(&self, from: Address, client: Address, value: Amount) -> OracleResult<()> {
        self.bank.transfer(from, self.address, value)?;
        *self.deposits.entry(client).or_insert(0) += value;
        Ok(())
    }

    fn client_withdraw_to(&self, client: Address, to: Address, amount: Amount) -> OracleResult<()> {
        {
            let mut deposit = self.deposits.entry(client).or_insert(0);
            if *deposit < amount {
                return Err(OracleError::InsufficientDeposit {
                    client,
                    requested: amount,
                    available: *deposit,
                });
            }
            *deposit -= amount;
        }

        if let Err(e) = self.bank.transfer(self.address, to, amount) {
            *self.deposits.entry(client).or_insert(0) += amount;
            return Err(e);
        }
        Ok(())
    }

    fn client_balance(&self, client: &Address) -> Amount {
        self.deposits.get(client).map(|d| *d).unwrap_or(0)
    }

    fn fee_charged(&self, id: RequestId) -> Option<Amount> {
        self.fees.get(&id).map(|f| *f)
    }
}
