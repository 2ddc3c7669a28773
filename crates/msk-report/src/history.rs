use msk_ledger::{Movement, MovementKind, MovementRecord};
use serde::{Deserialize, Serialize};

use crate::DateRange;

pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Filters for [`movement_history`].  All filters are conjunctive.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryQuery {
    /// Matches either side of the movement.
    pub warehouse_id: Option<String>,
    pub kind: Option<MovementKind>,
    pub product_id: Option<String>,
    #[serde(default)]
    pub range: DateRange,
    /// `None` means [`DEFAULT_HISTORY_LIMIT`].
    pub limit: Option<usize>,
}

impl HistoryQuery {
    pub fn warehouse(mut self, warehouse_id: impl Into<String>) -> Self {
        self.warehouse_id = Some(warehouse_id.into());
        self
    }

    pub fn kind(mut self, kind: MovementKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn product(mut self, product_id: impl Into<String>) -> Self {
        self.product_id = Some(product_id.into());
        self
    }

    pub fn range(mut self, range: DateRange) -> Self {
        self.range = range;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches(&self, m: &Movement) -> bool {
        let d = m.draft();
        if let Some(w) = self.warehouse_id.as_deref() {
            if !d.warehouses().any(|x| x.trim() == w) {
                return false;
            }
        }
        if self.kind.is_some_and(|k| k != d.kind) {
            return false;
        }
        if let Some(p) = self.product_id.as_deref() {
            if d.product_id != p {
                return false;
            }
        }
        self.range.contains(d.occurred_at)
    }
}

/// Movements matching `query`, newest first (ties broken by ledger position,
/// latest first), truncated to the query limit.
pub fn movement_history(movements: &[Movement], query: &HistoryQuery) -> Vec<MovementRecord> {
    let mut hits: Vec<&Movement> = movements.iter().filter(|m| query.matches(m)).collect();
    hits.sort_by(|a, b| {
        b.occurred_at()
            .cmp(&a.occurred_at())
            .then_with(|| b.seq_no.cmp(&a.seq_no))
    });
    hits.truncate(query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT));
    hits.into_iter().map(Movement::to_record).collect()
}
