//! Persistent ledger snapshots stored as JSON.

use crate::errors::StorageError;
use crate::games::ledger::GameLedger;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{debug, info};

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct LedgerSnapshot {
    version: u32,
    ledger: GameLedger,
}

/// Write `ledger` to `path`, replacing any previous snapshot atomically
pub fn save_snapshot(path: impl AsRef<Path>, ledger: &GameLedger) -> Result<(), StorageError> {
    let path = path.as_ref();
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let snapshot = LedgerSnapshot {
        version: SNAPSHOT_VERSION,
        ledger: ledger.clone(),
    };
    let bytes = serde_json::to_vec_pretty(&snapshot)
        .map_err(|e| StorageError::WriteFailed(format!("Failed to encode ledger: {}", e)))?;

    let mut file = NamedTempFile::new_in(dir)
        .map_err(|e| StorageError::WriteFailed(format!("Failed to create temp file: {}", e)))?;
    file.write_all(&bytes)
        .and_then(|_| file.as_file().sync_all())
        .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
    file.persist(path)
        .map_err(|e| StorageError::WriteFailed(format!("Failed to replace {}: {}", path.display(), e.error)))?;

    info!(path = %path.display(), games = ledger.games().count(), "Saved ledger snapshot");
    Ok(())
}

/// Read the snapshot at `path`; a missing file is an empty ledger
pub fn load_snapshot(path: impl AsRef<Path>) -> Result<GameLedger, StorageError> {
    let path = path.as_ref();
    if !path.exists() {
        debug!(path = %path.display(), "No ledger snapshot, starting empty");
        return Ok(GameLedger::new());
    }

    let bytes = std::fs::read(path)?;
    let snapshot: LedgerSnapshot = serde_json::from_slice(&bytes)
        .map_err(|e| StorageError::CorruptedData(format!("{}: {}", path.display(), e)))?;
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(StorageError::CorruptedData(format!(
            "Unsupported snapshot version {}",
            snapshot.version
        )));
    }

    info!(path = %path.display(), games = snapshot.ledger.games().count(), "Loaded ledger snapshot");
    Ok(snapshot.ledger)
}
