use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use msk_ledger::{Movement, MovementKind, StockKey};
use thiserror::Error;
use uuid::Uuid;

use crate::{ReconciliationRecord, ReconciliationStatus};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    #[error("movement {movement_id} was already reconciled")]
    AlreadyApplied { movement_id: Uuid },
}

/// All reconciliation records plus the FIFO queues of pending dispatches.
///
/// Queues are keyed by `(product_id, destination_warehouse_id)` and hold
/// record indices in dispatch order, so matching never crosses products or
/// warehouses.
#[derive(Clone, Debug, Default)]
pub struct ReconciliationBook {
    records: Vec<ReconciliationRecord>,
    by_dispatch: HashMap<Uuid, usize>,
    pending: BTreeMap<StockKey, VecDeque<usize>>,
    applied: HashSet<Uuid>,
}

impl ReconciliationBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from a ledger, in ledger order.
    pub fn rebuild<'a, I>(movements: I) -> Result<Self, ReconcileError>
    where
        I: IntoIterator<Item = &'a Movement>,
    {
        let mut book = Self::new();
        for m in movements {
            book.on_movement_appended(m)?;
        }
        Ok(book)
    }

    /// Feed one appended movement.
    ///
    /// - dispatch: opens a pending record, returned.
    /// - entry: settles the oldest pending record on its key, returned; with
    ///   nothing pending the entry stays unmatched and `None` is returned.
    /// - anything else: `None`.
    ///
    /// Each movement id is accepted once.
    pub fn on_movement_appended(
        &mut self,
        m: &Movement,
    ) -> Result<Option<ReconciliationRecord>, ReconcileError> {
        if self.applied.contains(&m.id) {
            return Err(ReconcileError::AlreadyApplied { movement_id: m.id });
        }

        let out = match m.kind() {
            MovementKind::Dispatch => self.open(m),
            MovementKind::Entry => self.settle_oldest(m),
            MovementKind::Exit | MovementKind::Transfer | MovementKind::Adjustment => None,
        };

        self.applied.insert(m.id);
        Ok(out)
    }

    fn open(&mut self, dispatch: &Movement) -> Option<ReconciliationRecord> {
        let record = ReconciliationRecord::open(dispatch)?;
        let idx = self.records.len();
        self.pending.entry(record.key()).or_default().push_back(idx);
        self.by_dispatch.insert(record.dispatch_movement_id, idx);
        self.records.push(record.clone());
        Some(record)
    }

    fn settle_oldest(&mut self, entry: &Movement) -> Option<ReconciliationRecord> {
        let warehouse = entry.body().receiving_warehouse()?;
        let key = StockKey::new(entry.product_id(), warehouse);
        let idx = self.pending.get_mut(&key)?.pop_front()?;
        let settled = self.records[idx].settle(entry);
        self.records[idx] = settled.clone();
        Some(settled)
    }

    // -----------------------------------------------------------------------
    // Read surface
    // -----------------------------------------------------------------------

    /// Records in dispatch order.
    pub fn records(&self) -> &[ReconciliationRecord] {
        &self.records
    }

    pub fn get(&self, dispatch_movement_id: &Uuid) -> Option<&ReconciliationRecord> {
        self.by_dispatch
            .get(dispatch_movement_id)
            .map(|&i| &self.records[i])
    }

    /// Unmatched dispatches, oldest first, optionally for one warehouse.
    pub fn pending(&self, warehouse_id: Option<&str>) -> Vec<&ReconciliationRecord> {
        self.records
            .iter()
            .filter(|r| r.status == ReconciliationStatus::Pending)
            .filter(|r| warehouse_id.map_or(true, |w| r.warehouse_id == w))
            .collect()
    }

    pub fn has_applied(&self, movement_id: &Uuid) -> bool {
        self.applied.contains(movement_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
