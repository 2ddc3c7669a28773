//! Per-`(product, warehouse)` async locks.
//!
//! Keys are always locked in ascending `StockKey` order, so two multi-key
//! submissions (transfers) cannot deadlock each other.  Submissions on
//! disjoint keys never wait for one another.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use msk_ledger::StockKey;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::EngineError;

/// Held locks; released on drop.
#[derive(Debug)]
pub struct KeyGuards {
    keys: Vec<StockKey>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl KeyGuards {
    pub fn keys(&self) -> &[StockKey] {
        &self.keys
    }
}

#[derive(Debug, Default)]
pub struct KeyLocks {
    slots: Mutex<HashMap<StockKey, Arc<Mutex<()>>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    async fn slot(&self, key: &StockKey) -> Arc<Mutex<()>> {
        let mut slots = self.slots.lock().await;
        slots.entry(key.clone()).or_default().clone()
    }

    /// Lock every key in `keys`, waiting at most `timeout` for each.
    ///
    /// # Errors
    /// [`EngineError::ConcurrencyConflict`] naming the key that timed out.
    /// Locks taken before the timeout are released.
    pub async fn acquire(&self, keys: &[StockKey], timeout: Duration) -> Result<KeyGuards, EngineError> {
        let mut sorted: Vec<StockKey> = keys.to_vec();
        sorted.sort();
        sorted.dedup();

        let mut guards = Vec::with_capacity(sorted.len());
        for key in &sorted {
            let slot = self.slot(key).await;
            match tokio::time::timeout(timeout, slot.lock_owned()).await {
                Ok(g) => guards.push(g),
                Err(_) => {
                    tracing::warn!(key = %key, timeout_ms = timeout.as_millis() as u64, "stock key lock timed out");
                    return Err(EngineError::lock_timeout(key));
                }
            }
        }
        Ok(KeyGuards {
            keys: sorted,
            _guards: guards,
        })
    }
}
