//! Game ledger: per-request state and per-player refund credits

use crate::errors::{OracleError, OracleResult, SettlementError, SettlementResult};
use crate::games::types::{Address, Amount, GameRequest, GameStatus, RequestId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Fee surplus a player is owed for a settled game whose final oracle charge
/// was not yet known when it settled.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RefundCredit {
    pub game: RequestId,
    pub prepaid_fee: Amount,
}

impl RefundCredit {
    /// Amount owed once the oracle's final charge for `game` is known
    pub fn resolve(&self, charge: Amount) -> Amount {
        self.prepaid_fee.saturating_sub(charge)
    }
}

/// Requests keyed by id plus outstanding credits keyed by requester.
///
/// A requester's credits are kept oldest first. A credit stays until the
/// oracle has billed its game and the surplus has been paid.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GameLedger {
    games: BTreeMap<RequestId, GameRequest>,
    credits: BTreeMap<Address, Vec<RefundCredit>>,
}

impl GameLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a freshly requested game as pending
    pub fn record_pending(&mut self, mut request: GameRequest) -> OracleResult<()> {
        if self.games.contains_key(&request.id) {
            return Err(OracleError::DuplicateRequestId(request.id));
        }
        request.status = GameStatus::Pending;
        self.games.insert(request.id, request);
        Ok(())
    }

    pub fn get(&self, id: RequestId) -> Option<&GameRequest> {
        self.games.get(&id)
    }

    /// The request for `id` if it can still be settled
    pub fn pending(&self, id: RequestId) -> SettlementResult<&GameRequest> {
        match self.games.get(&id) {
            None => Err(SettlementError::UnknownRequest(id)),
            Some(request) if request.status == GameStatus::Settled => {
                Err(SettlementError::AlreadySettled(id))
            }
            Some(request) => Ok(request),
        }
    }

    /// Pending -> Settled; any other transition is rejected
    pub fn mark_settled(&mut self, id: RequestId) -> SettlementResult<()> {
        match self.games.get_mut(&id) {
            None => Err(SettlementError::UnknownRequest(id)),
            Some(request) if request.status == GameStatus::Settled => {
                Err(SettlementError::AlreadySettled(id))
            }
            Some(request) => {
                request.status = GameStatus::Settled;
                Ok(())
            }
        }
    }

    /// Credits `requester` is still owed, oldest first
    pub fn outstanding_credits(&self, requester: &Address) -> &[RefundCredit] {
        self.credits.get(requester).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn add_credit(&mut self, requester: Address, credit: RefundCredit) {
        self.credits.entry(requester).or_default().push(credit);
    }

    /// Drop the credits for `games` from `requester`'s list
    pub fn clear_credits(&mut self, requester: &Address, games: &[RequestId]) {
        if games.is_empty() {
            return;
        }
        if let Some(credits) = self.credits.get_mut(requester) {
            credits.retain(|c| !games.contains(&c.game));
            if credits.is_empty() {
                self.credits.remove(requester);
            }
        }
    }

    pub fn credits(&self) -> impl Iterator<Item = (&Address, &RefundCredit)> {
        self.credits
            .iter()
            .flat_map(|(requester, credits)| credits.iter().map(move |c| (requester, c)))
    }

    pub fn games(&self) -> impl Iterator<Item = &GameRequest> {
        self.games.values()
    }

    pub fn pending_count(&self) -> usize {
        self.games.values().filter(|g| g.is_pending()).count()
    }

    /// Wagers held against pending requests
    pub fn escrowed_wagers(&self) -> Amount {
        self.games
            .values()
            .filter(|g| g.is_pending())
            .map(|g| g.wager)
            .sum()
    }

    /// Prepaid fees of pending requests, not yet billed by the oracle
    pub fn pending_fees(&self) -> Amount {
        self.games
            .values()
            .filter(|g| g.is_pending())
            .map(|g| g.prepaid_fee)
            .sum()
    }

    /// Highest id recorded so far
    pub fn last_id(&self) -> Option<RequestId> {
        self.games.keys().next_back().copied()
    }
}
