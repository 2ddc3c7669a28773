//! Persistence seam.
//!
//! A [`MovementStore`] owns the ledger and the stock levels.  Its one write
//! for movements is [`MovementStore::commit`]: the movement and every level
//! change planned for it land together, or nothing lands.
//!
//! Methods are synchronous; [`crate::StockService`] calls them while holding
//! the per-key locks for the keys involved.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use msk_ledger::{
    LevelChange, Ledger, LedgerError, Movement, OverdrawPolicy, Qty, StockKey, StockLevels,
    ValidatedMovement,
};
use msk_reconcile::ReconciliationRecord;
use uuid::Uuid;

use crate::StoreError;

pub trait MovementStore: Send + Sync {
    fn level(&self, key: &StockKey) -> Result<Qty, StoreError>;

    /// Append `body` with the next sequence number and write `changes`.
    ///
    /// Every change's `before` must equal the stored level, otherwise the
    /// store refuses with [`StoreError::Conflict`].
    fn commit(
        &self,
        id: Uuid,
        body: ValidatedMovement,
        changes: &[LevelChange],
    ) -> Result<Movement, StoreError>;

    /// The whole ledger in sequence order.
    fn movements(&self) -> Result<Vec<Movement>, StoreError>;

    fn levels(&self) -> Result<StockLevels, StoreError>;

    /// Insert or replace the record for its dispatch.
    fn save_reconciliation(&self, record: &ReconciliationRecord) -> Result<(), StoreError>;

    fn reconciliation_records(&self) -> Result<Vec<ReconciliationRecord>, StoreError>;
}

impl<T: MovementStore + ?Sized> MovementStore for Box<T> {
    fn level(&self, key: &StockKey) -> Result<Qty, StoreError> {
        (**self).level(key)
    }

    fn commit(
        &self,
        id: Uuid,
        body: ValidatedMovement,
        changes: &[LevelChange],
    ) -> Result<Movement, StoreError> {
        (**self).commit(id, body, changes)
    }

    fn movements(&self) -> Result<Vec<Movement>, StoreError> {
        (**self).movements()
    }

    fn levels(&self) -> Result<StockLevels, StoreError> {
        (**self).levels()
    }

    fn save_reconciliation(&self, record: &ReconciliationRecord) -> Result<(), StoreError> {
        (**self).save_reconciliation(record)
    }

    fn reconciliation_records(&self) -> Result<Vec<ReconciliationRecord>, StoreError> {
        (**self).reconciliation_records()
    }
}

/// Map a ledger refusal onto the store contract.
pub fn ledger_refusal(e: LedgerError) -> StoreError {
    match e {
        LedgerError::StaleChange { key, .. } => StoreError::Conflict(key.to_string()),
        LedgerError::OutOfOrderSeqNo { supplied, last } => {
            StoreError::Conflict(format!("seq_no {supplied} after {last}"))
        }
        LedgerError::InsufficientStock(e) => StoreError::Backend(e.to_string()),
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// One-shot failure injection for [`InMemoryStore`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FailPoint {
    /// Fail the next commit before anything is written.
    BeforeAppend,
    /// Fail the next commit after `n` of its level writes were staged.
    /// Only fires on a commit with more than `n` changes.
    AfterLevelWrites(usize),
    /// Fail the next reconciliation write.
    ReconciliationWrite,
}

#[derive(Debug, Default)]
struct Inner {
    ledger: Ledger,
    reconciliation: Vec<ReconciliationRecord>,
    by_dispatch: HashMap<Uuid, usize>,
    fail: Option<FailPoint>,
}

/// Process-local store.  Used by tests and as the cache behind the journal.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from already-persisted movements (clamp replay).
    pub fn from_movements(movements: Vec<Movement>) -> Result<Self, StoreError> {
        let mut ledger = Ledger::new(OverdrawPolicy::Clamp);
        msk_ledger::replay_canonical(&mut ledger, movements).map_err(ledger_refusal)?;
        Ok(Self {
            inner: Mutex::new(Inner {
                ledger,
                ..Inner::default()
            }),
        })
    }

    /// Sequence number the next commit will receive.
    pub fn next_seq_no(&self) -> Result<u64, StoreError> {
        Ok(self.lock()?.ledger.next_seq_no())
    }

    pub fn inject(&self, fail: FailPoint) -> Result<(), StoreError> {
        self.lock()?.fail = Some(fail);
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Backend("in-memory store mutex poisoned".into()))
    }

    /// Trip `wanted` if it is armed; other armed points stay armed.
    fn trip(inner: &mut Inner, wanted: impl Fn(FailPoint) -> bool) -> Option<FailPoint> {
        match inner.fail {
            Some(fp) if wanted(fp) => inner.fail.take(),
            _ => None,
        }
    }
}

impl MovementStore for InMemoryStore {
    fn level(&self, key: &StockKey) -> Result<Qty, StoreError> {
        Ok(self.lock()?.ledger.level(key))
    }

    fn commit(
        &self,
        id: Uuid,
        body: ValidatedMovement,
        changes: &[LevelChange],
    ) -> Result<Movement, StoreError> {
        let mut inner = self.lock()?;

        let n_changes = changes.len();
        let tripped = Self::trip(&mut inner, |fp| match fp {
            FailPoint::BeforeAppend => true,
            FailPoint::AfterLevelWrites(n) => n < n_changes,
            FailPoint::ReconciliationWrite => false,
        });
        match tripped {
            Some(FailPoint::BeforeAppend) => {
                return Err(StoreError::Backend("injected failure before append".into()));
            }
            Some(FailPoint::AfterLevelWrites(n)) => {
                // Staged writes are discarded with the failed commit.
                return Err(StoreError::Backend(format!(
                    "injected failure after {n} of {n_changes} level writes"
                )));
            }
            _ => {}
        }

        let movement = Movement::new(id, inner.ledger.next_seq_no(), body);
        inner
            .ledger
            .commit(movement.clone(), changes)
            .map_err(ledger_refusal)?;
        Ok(movement)
    }

    fn movements(&self) -> Result<Vec<Movement>, StoreError> {
        Ok(self.lock()?.ledger.entries().to_vec())
    }

    fn levels(&self) -> Result<StockLevels, StoreError> {
        Ok(self.lock()?.ledger.levels().clone())
    }

    fn save_reconciliation(&self, record: &ReconciliationRecord) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if Self::trip(&mut inner, |fp| fp == FailPoint::ReconciliationWrite).is_some() {
            return Err(StoreError::Backend(
                "injected failure on reconciliation write".into(),
            ));
        }
        match inner.by_dispatch.get(&record.dispatch_movement_id).copied() {
            Some(i) => inner.reconciliation[i] = record.clone(),
            None => {
                let i = inner.reconciliation.len();
                inner.by_dispatch.insert(record.dispatch_movement_id, i);
                inner.reconciliation.push(record.clone());
            }
        }
        Ok(())
    }

    fn reconciliation_records(&self) -> Result<Vec<ReconciliationRecord>, StoreError> {
        Ok(self.lock()?.reconciliation.clone())
    }
}
