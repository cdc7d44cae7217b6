//! Off-chain preview of oracle results
//!
//! The sequencer publishes the randomness for a request before the callback
//! transaction lands. Previews are for responsive feedback only; the callback
//! remains the authoritative settlement.

pub(crate) mod backoff;
pub mod client;
pub mod messages;
pub mod registry;

pub use client::PreviewClient;
pub use messages::{randomness_from_result, ClientMessage, ServerMessage};
pub use registry::WatchRegistry;

use crate::config::PreviewConfig;
use crate::errors::PreviewResult;
use crate::games::types::RequestId;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde_json::Value;
use std::sync::Arc;

/// Process-wide clients, one per chain
static CLIENTS: Lazy<DashMap<u64, Arc<PreviewClient>>> = Lazy::new(DashMap::new);

/// The shared client for `chain_id`, created on first use.
///
/// The first call for a chain fixes its configuration for the rest of the process.
pub fn shared_client(chain_id: u64, config: &PreviewConfig) -> PreviewResult<Arc<PreviewClient>> {
    if let Some(client) = CLIENTS.get(&chain_id) {
        return Ok(client.value().clone());
    }

    let client = Arc::new(PreviewClient::for_chain(chain_id, config)?);
    Ok(CLIENTS.entry(chain_id).or_insert(client).value().clone())
}

/// Wait for the preview of `id` on `chain_id` over the shared connection
pub async fn listen_for_preview(
    id: RequestId,
    chain_id: u64,
    config: &PreviewConfig,
) -> PreviewResult<Value> {
    shared_client(chain_id, config)?.listen_for_preview(id).await
}
