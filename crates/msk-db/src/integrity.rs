//! Checks and repairs against the ledger.
//!
//! `movements` is the source of truth.  `stock_levels` and
//! `reconciliation_records` are maintained incrementally by
//! [`crate::record_movement`]; the functions here re-derive both from the
//! ledger and compare.

use std::collections::{BTreeSet, HashMap};

use anyhow::{anyhow, Context, Result};
use msk_ledger::{replay, Qty, StockKey};
use msk_reconcile::{ReconciliationBook, ReconciliationRecord};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::ledger::{fetch_movements, fetch_reconciliation_records, fetch_stock_levels, upsert_record};

// ---------------------------------------------------------------------------
// Stock levels vs ledger replay
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LevelMismatch {
    pub key: StockKey,
    pub stored: Qty,
    pub replayed: Qty,
}

#[derive(Debug, Clone, Serialize)]
pub struct LevelCheck {
    pub movements: usize,
    pub mismatches: Vec<LevelMismatch>,
}

impl LevelCheck {
    pub fn is_ok(&self) -> bool {
        self.mismatches.is_empty()
    }
}

/// Replay `movements` and compare with `stock_levels`, key by key.
///
/// Both tables are read from one repeatable-read snapshot.  A key missing
/// on either side counts as zero.
pub async fn verify_stock_levels(pool: &PgPool) -> Result<LevelCheck> {
    let mut tx = pool.begin().await.context("begin verify tx failed")?;
    sqlx::query("set transaction isolation level repeatable read, read only")
        .execute(&mut *tx)
        .await
        .context("set verify isolation failed")?;

    let movements = fetch_movements(&mut *tx).await?;
    let stored = fetch_stock_levels(&mut *tx).await?;
    tx.commit().await.context("commit verify tx failed")?;

    let replayed = replay(&movements);
    let keys: BTreeSet<&StockKey> = stored.iter().chain(replayed.iter()).map(|(k, _)| k).collect();
    let mismatches: Vec<LevelMismatch> = keys
        .into_iter()
        .filter_map(|k| {
            let (s, r) = (stored.get(k), replayed.get(k));
            (s != r).then(|| LevelMismatch {
                key: k.clone(),
                stored: s,
                replayed: r,
            })
        })
        .collect();

    if mismatches.is_empty() {
        tracing::info!(movements = movements.len(), "stock_levels match ledger replay");
    } else {
        for m in &mismatches {
            tracing::error!(key = %m.key, stored = %m.stored, replayed = %m.replayed, "stock level diverges from ledger");
        }
    }

    Ok(LevelCheck {
        movements: movements.len(),
        mismatches,
    })
}

// ---------------------------------------------------------------------------
// Reconciliation repair
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct ReconcileRepair {
    /// Every record the ledger implies, in dispatch order.
    pub records: Vec<ReconciliationRecord>,
    /// Records that were missing or stale and have been rewritten.
    pub rewritten: Vec<ReconciliationRecord>,
}

impl ReconcileRepair {
    /// The record a movement opened (dispatch) or settled (entry).
    pub fn record_for(&self, movement_id: Uuid) -> Option<&ReconciliationRecord> {
        self.records
            .iter()
            .find(|r| r.dispatch_movement_id == movement_id || r.entry_movement_id == Some(movement_id))
    }
}

/// Rebuild the reconciliation book from the ledger and rewrite every
/// `reconciliation_records` row that is missing or differs from it.
///
/// Runs in one transaction holding `reconciliation_records` in exclusive
/// mode, so movements recorded meanwhile reconcile after the repair.
pub async fn repair_reconciliation(pool: &PgPool) -> Result<ReconcileRepair> {
    let mut tx = pool.begin().await.context("begin repair tx failed")?;
    sqlx::query("lock table reconciliation_records in exclusive mode")
        .execute(&mut *tx)
        .await
        .context("lock reconciliation_records failed")?;

    let movements = fetch_movements(&mut *tx).await?;
    let book = ReconciliationBook::rebuild(&movements).map_err(|e| anyhow!("rebuild reconciliation: {e}"))?;
    let stored: HashMap<Uuid, ReconciliationRecord> = fetch_reconciliation_records(&mut *tx)
        .await?
        .into_iter()
        .map(|r| (r.dispatch_movement_id, r))
        .collect();

    let mut rewritten = Vec::new();
    for r in book.records() {
        if stored.get(&r.dispatch_movement_id) != Some(r) {
            upsert_record(&mut tx, r).await?;
            rewritten.push(r.clone());
        }
    }
    tx.commit().await.context("commit repair tx failed")?;

    if rewritten.is_empty() {
        tracing::debug!(records = book.len(), "reconciliation_records already match ledger");
    } else {
        tracing::warn!(
            records = book.len(),
            rewritten = rewritten.len(),
            "reconciliation_records repaired from ledger"
        );
    }

    Ok(ReconcileRepair {
        records: book.records().to_vec(),
        rewritten,
    })
}
