//! Journal-backed [`MovementStore`].
//!
//! The journal file is the durable copy; an [`InMemoryStore`] holds the
//! replayed state.  Every write hits the journal first and the cache only
//! after the line is synced, so a failed append leaves both untouched.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use msk_engine::{InMemoryStore, MovementStore, StoreError};
use msk_ledger::{LevelChange, Movement, Qty, StockKey, StockLevels, ValidatedMovement};
use msk_reconcile::ReconciliationRecord;
use uuid::Uuid;

use crate::{JournalEvent, JournalWriter};

#[derive(Debug)]
pub struct JournalStore {
    writer: Mutex<JournalWriter>,
    cache: InMemoryStore,
}

impl JournalStore {
    /// Open `path`, verify its chain and replay it.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let (writer, entries) = JournalWriter::open(path.as_ref())?;

        let mut movements = Vec::new();
        let mut records = Vec::new();
        for entry in entries {
            match entry.event {
                JournalEvent::Movement(rec) => {
                    let id = rec.id;
                    let m = rec
                        .into_movement()
                        .with_context(|| format!("journal movement {id} no longer validates"))?;
                    movements.push(m);
                }
                JournalEvent::Reconciliation(r) => records.push(r),
            }
        }

        let n_movements = movements.len();
        let cache = InMemoryStore::from_movements(movements)
            .map_err(|e| anyhow::anyhow!("replay journal: {e}"))?;
        // Later lines supersede earlier ones for the same dispatch.
        for r in &records {
            cache
                .save_reconciliation(r)
                .map_err(|e| anyhow::anyhow!("restore reconciliation record: {e}"))?;
        }

        tracing::info!(
            path = %path.as_ref().display(),
            movements = n_movements,
            reconciliation_writes = records.len(),
            "journal replayed"
        );

        Ok(Self {
            writer: Mutex::new(writer),
            cache,
        })
    }

    fn writer(&self) -> Result<MutexGuard<'_, JournalWriter>, StoreError> {
        self.writer
            .lock()
            .map_err(|_| StoreError::Backend("journal writer mutex poisoned".into()))
    }

    /// Hash of the newest journal line.
    pub fn head_hash(&self) -> Result<Option<String>, StoreError> {
        Ok(self.writer()?.last_hash().map(str::to_string))
    }
}

fn backend(e: anyhow::Error) -> StoreError {
    StoreError::Backend(format!("{e:#}"))
}

impl MovementStore for JournalStore {
    fn level(&self, key: &StockKey) -> Result<Qty, StoreError> {
        self.cache.level(key)
    }

    fn commit(
        &self,
        id: Uuid,
        body: ValidatedMovement,
        changes: &[LevelChange],
    ) -> Result<Movement, StoreError> {
        let mut writer = self.writer()?;

        for c in changes {
            let found = self.cache.level(&c.key)?;
            if found != c.before {
                return Err(StoreError::Conflict(c.key.to_string()));
            }
        }

        let movement = Movement::new(id, self.cache.next_seq_no()?, body);
        writer
            .append(JournalEvent::Movement(movement.to_record()))
            .map_err(backend)?;

        // Checked above under the writer lock; the cache cannot refuse now.
        self.cache.commit(movement.id, movement.body().clone(), changes)
    }

    fn movements(&self) -> Result<Vec<Movement>, StoreError> {
        self.cache.movements()
    }

    fn levels(&self) -> Result<StockLevels, StoreError> {
        self.cache.levels()
    }

    fn save_reconciliation(&self, record: &ReconciliationRecord) -> Result<(), StoreError> {
        let mut writer = self.writer()?;
        writer
            .append(JournalEvent::Reconciliation(record.clone()))
            .map_err(backend)?;
        self.cache.save_reconciliation(record)
    }

    fn reconciliation_records(&self) -> Result<Vec<ReconciliationRecord>, StoreError> {
        self.cache.reconciliation_records()
    }
}
