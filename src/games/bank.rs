use crate::errors::{OracleError, OracleResult};
use crate::games::types::{Address, Amount};
use dashmap::DashMap;
use std::sync::Arc;

/// Native balances of every account the game and the oracle touch.
///
/// Transfers are the only way value moves, so the sum of all balances is
/// constant apart from explicit `mint` calls used to fund fixtures.
#[derive(Clone, Default)]
pub struct Bank {
    balances: Arc<DashMap<Address, Amount>>,
}

impl Bank {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create value out of thin air (genesis allocations and test fixtures)
    pub fn mint(&self, account: Address, amount: Amount) {
        *self.balances.entry(account).or_insert(0) += amount;
    }

    pub fn balance(&self, account: &Address) -> Amount {
        self.balances.get(account).map(|b| *b).unwrap_or(0)
    }

    /// Move `amount` from `from` to `to`, failing without side effects when
    /// `from` cannot cover it.
    pub fn transfer(&self, from: Address, to: Address, amount: Amount) -> OracleResult<()> {
        if amount == 0 || from == to {
            return Ok(());
        }

        {
            let mut source = self.balances.entry(from).or_insert(0);
            if *source < amount {
                return Err(OracleError::InsufficientFunds {
                    account: from,
                    needed: amount,
                    available: *source,
                });
            }
            *source -= amount;
        }

        *self.balances.entry(to).or_insert(0) += amount;
        Ok(())
    }

    /// Sum of all balances
    pub fn total_supply(&self) -> Amount {
        self.balances.iter().map(|entry| *entry.value()).sum()
    }
}
