//! StockService: the SINGLE choke-point for stock movements.
//!
//! # Submission pipeline
//!
//! Every call to [`StockService::submit`] runs, in order:
//!
//! 1. `validate`: admission rules; refusal writes nothing
//! 2. `SubmissionPolicy`: actor authorization; refusal writes nothing
//! 3. `KeyLocks`: per-key locks, sorted, bounded by a timeout
//! 4. `plan`: level changes under the overdraw policy
//! 5. `MovementStore::commit`: movement + level changes, all or nothing
//! 6. reconciliation: book update under the same locks, then a
//!    best-effort store write; failures are queued for retry and never undo
//!    step 5
//!
//! Nothing outside this type writes movements to a store.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use msk_ledger::{
    plan, replay, validate, LevelChange, Movement, MovementDraft, MovementKind, MovementRecord,
    OverdrawPolicy, Qty, StockKey, StockLevels, ValidatedMovement,
};
use msk_reconcile::{ReconciliationBook, ReconciliationRecord};
use msk_report::{DailyRow, DateRange, HistoryQuery, StockRow, VarianceFilter, VarianceReport};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::locks::{KeyGuards, KeyLocks};
use crate::policy::{Actor, RolePolicy, SubmissionPolicy};
use crate::store::MovementStore;
use crate::EngineError;

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(5_000);
pub const DEFAULT_MAX_RETRY_ATTEMPTS: u32 = 5;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceOptions {
    pub overdraw_policy: OverdrawPolicy,
    pub lock_timeout: Duration,
    /// Failed reconciliation writes are retried this many times, then
    /// moved to the dead-letter list.
    pub max_retry_attempts: u32,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            overdraw_policy: OverdrawPolicy::Clamp,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            max_retry_attempts: DEFAULT_MAX_RETRY_ATTEMPTS,
        }
    }
}

/// What one successful submission did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Submission {
    pub movement: Movement,
    pub level_changes: Vec<LevelChange>,
    /// Record opened (dispatch) or settled (entry) by this movement.
    pub reconciliation: Option<ReconciliationRecord>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryOutcome {
    pub saved: usize,
    pub requeued: usize,
    pub dead_lettered: usize,
}

#[derive(Debug)]
struct RetryItem {
    dispatch_movement_id: Uuid,
    attempts: u32,
}

#[derive(Debug, Default)]
struct RetryQueue {
    items: VecDeque<RetryItem>,
    dead_letter: Vec<Uuid>,
}

impl RetryQueue {
    fn enqueue(&mut self, dispatch_movement_id: Uuid) {
        if !self
            .items
            .iter()
            .any(|i| i.dispatch_movement_id == dispatch_movement_id)
        {
            self.items.push_back(RetryItem {
                dispatch_movement_id,
                attempts: 0,
            });
        }
    }

    fn forget(&mut self, dispatch_movement_id: &Uuid) {
        self.items
            .retain(|i| &i.dispatch_movement_id != dispatch_movement_id);
    }
}

// ---------------------------------------------------------------------------
// StockService
// ---------------------------------------------------------------------------

pub struct StockService<S, P = RolePolicy> {
    store: S,
    policy: P,
    options: ServiceOptions,
    locks: KeyLocks,
    book: Mutex<ReconciliationBook>,
    retry: Mutex<RetryQueue>,
}

impl<S, P> StockService<S, P>
where
    S: MovementStore,
    P: SubmissionPolicy,
{
    /// Open a service over `store`.
    ///
    /// The reconciliation book is rebuilt from the stored ledger.  Rebuilt
    /// records the store is missing (or holds in an older state) are queued
    /// for [`Self::retry_pending_reconciliation`].
    pub fn new(store: S, policy: P, options: ServiceOptions) -> Result<Self, EngineError> {
        let movements = store.movements()?;
        let book = ReconciliationBook::rebuild(&movements)
            .map_err(|e| EngineError::PersistenceFailure(e.to_string()))?;

        let stored = store.reconciliation_records()?;
        let mut retry = RetryQueue::default();
        for rec in book.records() {
            let in_store = stored
                .iter()
                .find(|s| s.dispatch_movement_id == rec.dispatch_movement_id);
            if in_store != Some(rec) {
                retry.enqueue(rec.dispatch_movement_id);
            }
        }

        tracing::info!(
            movements = movements.len(),
            reconciliation_records = book.len(),
            queued_for_retry = retry.items.len(),
            overdraw_policy = ?options.overdraw_policy,
            "stock service opened"
        );

        Ok(Self {
            store,
            policy,
            options,
            locks: KeyLocks::new(),
            book: Mutex::new(book),
            retry: Mutex::new(retry),
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn options(&self) -> &ServiceOptions {
        &self.options
    }

    // -----------------------------------------------------------------------
    // Write surface
    // -----------------------------------------------------------------------

    /// Validate, authorize and atomically record one movement.
    ///
    /// `created_by` is stamped from `actor`.
    pub async fn submit(&self, actor: &Actor, mut draft: MovementDraft) -> Result<Submission, EngineError> {
        draft.created_by = actor.user_id.clone();
        let body = validate(draft).map_err(|e| {
            tracing::debug!(error = %e, user = %actor.user_id, "movement rejected by validation");
            e
        })?;
        self.authorize(actor, &body)?;

        let guards = self
            .locks
            .acquire(&body.keys(), self.options.lock_timeout)
            .await?;
        self.commit_locked(&guards, body).await
    }

    /// Bring one stock level to `target` with a compensating adjustment.
    ///
    /// Returns `Ok(None)` when the level already equals `target`.
    pub async fn adjust_to(
        &self,
        actor: &Actor,
        product_id: &str,
        warehouse_id: &str,
        target: Qty,
        reason: &str,
        occurred_at: DateTime<Utc>,
    ) -> Result<Option<Submission>, EngineError> {
        if target.is_negative() {
            return Err(msk_ledger::ValidationError::InvalidQuantity { quantity: target }.into());
        }
        // Same normalization `validate` applies, so the locked key is the
        // key the adjustment will touch.
        let (product_id, warehouse_id) = (product_id.trim(), warehouse_id.trim());
        if product_id.is_empty() {
            return Err(msk_ledger::ValidationError::MissingProduct.into());
        }
        if warehouse_id.is_empty() {
            return Err(msk_ledger::ValidationError::MissingDestination {
                kind: MovementKind::Adjustment,
            }
            .into());
        }
        let key = StockKey::new(product_id, warehouse_id);
        let guards = self
            .locks
            .acquire(std::slice::from_ref(&key), self.options.lock_timeout)
            .await?;

        let current = self.store.level(&key)?;
        let diff = target - current;
        if diff.is_zero() {
            tracing::debug!(key = %key, level = %current, "adjust_to: already at target");
            return Ok(None);
        }

        let mut draft = MovementDraft::new(
            MovementKind::Adjustment,
            product_id,
            diff.abs(),
            occurred_at,
            actor.user_id.clone(),
        )
        .reference(format!("ADJ-{product_id}-{warehouse_id}"))
        .notes(reason);
        draft = if diff.is_negative() {
            draft.from(warehouse_id).decrease()
        } else {
            draft.to(warehouse_id)
        };

        let body = validate(draft)?;
        self.authorize(actor, &body)?;
        self.commit_locked(&guards, body).await.map(Some)
    }

    fn authorize(&self, actor: &Actor, body: &ValidatedMovement) -> Result<(), EngineError> {
        self.policy.authorize(actor, body).map_err(|reason| {
            tracing::warn!(
                user = %actor.user_id,
                role = ?actor.role,
                kind = %body.kind(),
                reason = %reason,
                "movement refused by policy"
            );
            EngineError::Unauthorized { reason }
        })
    }

    /// Steps 4-6.  `guards` must cover `body.keys()`.
    async fn commit_locked(&self, guards: &KeyGuards, body: ValidatedMovement) -> Result<Submission, EngineError> {
        debug_assert!(body.keys().iter().all(|k| guards.keys().contains(k)));

        let mut current = StockLevels::new();
        for key in guards.keys() {
            current.set(key.clone(), self.store.level(key)?);
        }
        let changes = plan(&body, |k| current.get(k), self.options.overdraw_policy).map_err(|e| {
            tracing::info!(key = %e.key, available = %e.available, requested = %e.requested, "overdraw refused");
            e
        })?;

        let movement = self
            .store
            .commit(Uuid::new_v4(), body, &changes)
            .map_err(|e| {
                tracing::error!(error = %e, "movement commit failed; nothing retained");
                EngineError::from(e)
            })?;

        for c in changes.iter().filter(|c| c.clamped) {
            tracing::warn!(
                movement_id = %movement.id,
                key = %c.key,
                available = %c.before,
                requested = %movement.quantity(),
                "decrement floored at zero"
            );
        }
        tracing::info!(
            movement_id = %movement.id,
            seq_no = movement.seq_no,
            kind = %movement.kind(),
            product = %movement.product_id(),
            quantity = %movement.quantity(),
            "movement recorded"
        );

        let reconciliation = self.reconcile(&movement).await;
        Ok(Submission {
            movement,
            level_changes: changes,
            reconciliation,
        })
    }

    async fn reconcile(&self, movement: &Movement) -> Option<ReconciliationRecord> {
        let record = {
            let mut book = self.book.lock().await;
            match book.on_movement_appended(movement) {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(movement_id = %movement.id, error = %e, "reconciliation skipped");
                    return None;
                }
            }
        }?;

        let mut retry = self.retry.lock().await;
        match self.store.save_reconciliation(&record) {
            Ok(()) => retry.forget(&record.dispatch_movement_id),
            Err(e) => {
                tracing::warn!(
                    dispatch_movement_id = %record.dispatch_movement_id,
                    status = %record.status,
                    error = %e,
                    "reconciliation write failed; queued for retry"
                );
                retry.enqueue(record.dispatch_movement_id);
            }
        }
        Some(record)
    }

    /// Write queued reconciliation records again.
    ///
    /// The current book state is written, never a stale snapshot.  Items
    /// that keep failing are dead-lettered after `max_retry_attempts`.
    pub async fn retry_pending_reconciliation(&self) -> RetryOutcome {
        let book = self.book.lock().await;
        let mut retry = self.retry.lock().await;
        let mut outcome = RetryOutcome::default();

        let items: Vec<RetryItem> = retry.items.drain(..).collect();
        for mut item in items {
            let Some(record) = book.get(&item.dispatch_movement_id) else {
                continue;
            };
            match self.store.save_reconciliation(record) {
                Ok(()) => outcome.saved += 1,
                Err(e) => {
                    item.attempts += 1;
                    if item.attempts >= self.options.max_retry_attempts {
                        tracing::error!(
                            dispatch_movement_id = %item.dispatch_movement_id,
                            attempts = item.attempts,
                            error = %e,
                            "reconciliation write dead-lettered"
                        );
                        retry.dead_letter.push(item.dispatch_movement_id);
                        outcome.dead_lettered += 1;
                    } else {
                        tracing::warn!(
                            dispatch_movement_id = %item.dispatch_movement_id,
                            attempts = item.attempts,
                            error = %e,
                            "reconciliation retry failed"
                        );
                        retry.items.push_back(item);
                        outcome.requeued += 1;
                    }
                }
            }
        }
        outcome
    }

    pub async fn pending_retries(&self) -> usize {
        self.retry.lock().await.items.len()
    }

    pub async fn dead_lettered(&self) -> Vec<Uuid> {
        self.retry.lock().await.dead_letter.clone()
    }

    // -----------------------------------------------------------------------
    // Read surface (operators are pinned to their own warehouse)
    // -----------------------------------------------------------------------

    pub fn level(&self, key: &StockKey) -> Result<Qty, EngineError> {
        Ok(self.store.level(key)?)
    }

    pub fn stock_summary(&self, actor: &Actor, warehouse_id: Option<&str>) -> Result<Vec<StockRow>, EngineError> {
        let levels = self.store.levels()?;
        Ok(msk_report::stock_summary(&levels, actor.scope(warehouse_id)))
    }

    pub fn low_stock_alerts(
        &self,
        actor: &Actor,
        threshold: Qty,
        warehouse_id: Option<&str>,
    ) -> Result<Vec<StockRow>, EngineError> {
        let levels = self.store.levels()?;
        Ok(msk_report::low_stock_alerts(&levels, threshold, actor.scope(warehouse_id)))
    }

    pub async fn variance_report(
        &self,
        actor: &Actor,
        range: DateRange,
        warehouse_id: Option<&str>,
        filter: VarianceFilter,
    ) -> VarianceReport {
        let book = self.book.lock().await;
        msk_report::variance_report(book.records(), range, actor.scope(warehouse_id), filter)
    }

    pub async fn pending_dispatches(&self, actor: &Actor, warehouse_id: Option<&str>) -> Vec<ReconciliationRecord> {
        let book = self.book.lock().await;
        book.pending(actor.scope(warehouse_id))
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn daily_dispatch_vs_entries(
        &self,
        actor: &Actor,
        range: DateRange,
        warehouse_id: Option<&str>,
    ) -> Result<Vec<DailyRow>, EngineError> {
        let movements = self.store.movements()?;
        Ok(msk_report::daily_dispatch_vs_entries(
            &movements,
            range,
            actor.scope(warehouse_id),
        ))
    }

    pub fn movement_history(&self, actor: &Actor, mut query: HistoryQuery) -> Result<Vec<MovementRecord>, EngineError> {
        query.warehouse_id = actor
            .scope(query.warehouse_id.as_deref())
            .map(str::to_string);
        let movements = self.store.movements()?;
        Ok(msk_report::movement_history(&movements, &query))
    }

    /// Replay the stored ledger and compare with the stored levels.
    pub fn verify_integrity(&self) -> Result<bool, EngineError> {
        let movements = self.store.movements()?;
        let replayed = replay(&movements);
        let stored = self.store.levels()?;
        let ok = replayed == stored;
        if !ok {
            tracing::error!(movements = movements.len(), "stock levels diverge from ledger replay");
        }
        Ok(ok)
    }
}
