use chrono::{DateTime, Utc};
use msk_ledger::{Movement, Qty, StockKey};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of comparing a dispatch with the entry that confirmed it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationStatus {
    /// No entry has confirmed the dispatch yet.
    Pending,
    MatchedExact,
    /// Less was received than dispatched (variance > 0).
    Shortfall,
    /// More was received than dispatched (variance < 0).
    Excess,
}

impl ReconciliationStatus {
    /// Status of a settled record from its `dispatched - received` variance.
    pub fn classify(variance: Qty) -> Self {
        if variance.is_zero() {
            ReconciliationStatus::MatchedExact
        } else if variance.is_positive() {
            ReconciliationStatus::Shortfall
        } else {
            ReconciliationStatus::Excess
        }
    }

    pub fn is_terminal(self) -> bool {
        self != ReconciliationStatus::Pending
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReconciliationStatus::Pending => "pending",
            ReconciliationStatus::MatchedExact => "matched_exact",
            ReconciliationStatus::Shortfall => "shortfall",
            ReconciliationStatus::Excess => "excess",
        }
    }
}

impl std::fmt::Display for ReconciliationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ReconciliationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ReconciliationStatus::Pending),
            "matched_exact" => Ok(ReconciliationStatus::MatchedExact),
            "shortfall" => Ok(ReconciliationStatus::Shortfall),
            "excess" => Ok(ReconciliationStatus::Excess),
            other => Err(format!("unknown reconciliation status: {other}")),
        }
    }
}

/// One dispatch and, once it arrives, the entry that confirmed it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationRecord {
    pub dispatch_movement_id: Uuid,
    pub dispatch_seq_no: u64,
    pub product_id: String,
    pub warehouse_id: String,
    pub ship_id: Option<String>,
    pub dispatched_at: DateTime<Utc>,
    pub dispatched_quantity: Qty,
    pub entry_movement_id: Option<Uuid>,
    pub received_at: Option<DateTime<Utc>>,
    pub received_quantity: Option<Qty>,
    pub variance: Option<Qty>,
    pub status: ReconciliationStatus,
}

impl ReconciliationRecord {
    /// Open a pending record for a dispatch movement.
    ///
    /// Returns `None` when `dispatch` has no receiving warehouse, which
    /// validation rules out for real dispatches.
    pub fn open(dispatch: &Movement) -> Option<Self> {
        let warehouse_id = dispatch.body().receiving_warehouse()?.to_string();
        Some(Self {
            dispatch_movement_id: dispatch.id,
            dispatch_seq_no: dispatch.seq_no,
            product_id: dispatch.product_id().to_string(),
            warehouse_id,
            ship_id: dispatch.draft().ship_id.clone(),
            dispatched_at: dispatch.occurred_at(),
            dispatched_quantity: dispatch.quantity(),
            entry_movement_id: None,
            received_at: None,
            received_quantity: None,
            variance: None,
            status: ReconciliationStatus::Pending,
        })
    }

    /// The settled version of this record for `entry`.  `self` is untouched.
    pub fn settle(&self, entry: &Movement) -> Self {
        let received = entry.quantity();
        let variance = self.dispatched_quantity - received;
        Self {
            entry_movement_id: Some(entry.id),
            received_at: Some(entry.occurred_at()),
            received_quantity: Some(received),
            variance: Some(variance),
            status: ReconciliationStatus::classify(variance),
            ..self.clone()
        }
    }

    pub fn key(&self) -> StockKey {
        StockKey::new(self.product_id.clone(), self.warehouse_id.clone())
    }

    pub fn is_pending(&self) -> bool {
        self.status == ReconciliationStatus::Pending
    }

    /// `variance / dispatched * 100`; `None` while pending.
    pub fn variance_pct(&self) -> Option<f64> {
        self.variance?.percent_of(self.dispatched_quantity)
    }
}
