use std::collections::BTreeMap;

use chrono::NaiveDate;
use msk_ledger::{Movement, MovementKind, Placement, Qty};
use msk_reconcile::{ReconciliationRecord, ReconciliationStatus};
use serde::{Deserialize, Serialize};

use crate::DateRange;

// ---------------------------------------------------------------------------
// Per-dispatch variance report
// ---------------------------------------------------------------------------

/// Which non-exact records a variance report lists.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarianceFilter {
    /// Every record that is not `matched_exact`.
    #[default]
    All,
    Shortfall,
    Excess,
    Pending,
}

impl VarianceFilter {
    fn admits(self, status: ReconciliationStatus) -> bool {
        match self {
            VarianceFilter::All => status != ReconciliationStatus::MatchedExact,
            VarianceFilter::Shortfall => status == ReconciliationStatus::Shortfall,
            VarianceFilter::Excess => status == ReconciliationStatus::Excess,
            VarianceFilter::Pending => status == ReconciliationStatus::Pending,
        }
    }
}

impl std::str::FromStr for VarianceFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(VarianceFilter::All),
            "shortfall" => Ok(VarianceFilter::Shortfall),
            "excess" => Ok(VarianceFilter::Excess),
            "pending" => Ok(VarianceFilter::Pending),
            other => Err(format!("unknown variance filter: {other}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VarianceRow {
    #[serde(flatten)]
    pub record: ReconciliationRecord,
    pub variance_pct: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseVariance {
    pub warehouse_id: String,
    pub count: usize,
    /// Sum of settled variances; pending records contribute nothing.
    pub total_variance: Qty,
}

/// Totals over every record in scope, before the status filter.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VarianceStats {
    pub total_records: usize,
    pub total_dispatched: Qty,
    pub total_received: Qty,
    pub conforming: usize,
    pub shortfalls: usize,
    pub excesses: usize,
    pub pending: usize,
    /// `conforming / settled * 100`; `None` when nothing is settled.
    pub conformity_rate: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VarianceReport {
    pub range: DateRange,
    pub warehouse_id: Option<String>,
    pub filter: VarianceFilter,
    pub records: Vec<VarianceRow>,
    pub by_warehouse: Vec<WarehouseVariance>,
    pub stats: VarianceStats,
}

/// Variance report over reconciliation records.
///
/// Scope is decided by the dispatch's `occurred_at` (inclusive day bounds)
/// and the destination warehouse.  Listed records never include
/// `matched_exact`; `filter` narrows further.  Rows are ordered by dispatch
/// time then ledger position.
pub fn variance_report(
    records: &[ReconciliationRecord],
    range: DateRange,
    warehouse_id: Option<&str>,
    filter: VarianceFilter,
) -> VarianceReport {
    let in_scope: Vec<&ReconciliationRecord> = records
        .iter()
        .filter(|r| range.contains(r.dispatched_at))
        .filter(|r| warehouse_id.map_or(true, |w| r.warehouse_id == w))
        .collect();

    let mut stats = VarianceStats {
        total_records: in_scope.len(),
        ..VarianceStats::default()
    };
    for r in &in_scope {
        stats.total_dispatched = stats.total_dispatched.saturating_add(r.dispatched_quantity);
        if let Some(q) = r.received_quantity {
            stats.total_received = stats.total_received.saturating_add(q);
        }
        match r.status {
            ReconciliationStatus::MatchedExact => stats.conforming += 1,
            ReconciliationStatus::Shortfall => stats.shortfalls += 1,
            ReconciliationStatus::Excess => stats.excesses += 1,
            ReconciliationStatus::Pending => stats.pending += 1,
        }
    }
    let settled = stats.conforming + stats.shortfalls + stats.excesses;
    if settled > 0 {
        stats.conformity_rate = Some(stats.conforming as f64 / settled as f64 * 100.0);
    }

    let mut listed: Vec<&ReconciliationRecord> = in_scope
        .into_iter()
        .filter(|r| filter.admits(r.status))
        .collect();
    listed.sort_by(|a, b| {
        a.dispatched_at
            .cmp(&b.dispatched_at)
            .then_with(|| a.dispatch_seq_no.cmp(&b.dispatch_seq_no))
    });

    let mut per_wh: BTreeMap<&str, (usize, Qty)> = BTreeMap::new();
    for r in &listed {
        let e = per_wh.entry(r.warehouse_id.as_str()).or_insert((0, Qty::ZERO));
        e.0 += 1;
        if let Some(v) = r.variance {
            e.1 = e.1.saturating_add(v);
        }
    }
    let by_warehouse = per_wh
        .into_iter()
        .map(|(w, (count, total))| WarehouseVariance {
            warehouse_id: w.to_string(),
            count,
            total_variance: total,
        })
        .collect();

    VarianceReport {
        range,
        warehouse_id: warehouse_id.map(str::to_string),
        filter,
        records: listed
            .into_iter()
            .map(|r| VarianceRow {
                variance_pct: r.variance_pct(),
                record: r.clone(),
            })
            .collect(),
        by_warehouse,
        stats,
    }
}

// ---------------------------------------------------------------------------
// Daily aggregate (dispatched vs entered vs exited)
// ---------------------------------------------------------------------------

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DailyStatus {
    Conforming,
    Shortfall,
    Excess,
}

/// Sums for one `(day, warehouse, product)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DailyRow {
    pub day: NaiveDate,
    pub warehouse_id: String,
    pub product_id: String,
    pub dispatched: Qty,
    pub entered: Qty,
    pub exited: Qty,
    /// `dispatched - entered`.
    pub variance: Qty,
    /// `variance / dispatched * 100`, zero when nothing was dispatched.
    pub variance_pct: f64,
    /// `entered / exited`; `None` when nothing left the warehouse.
    pub entry_exit_ratio: Option<f64>,
    pub status: DailyStatus,
}

/// Aggregate comparison of dispatched, entered and exited tonnage per day.
///
/// This is a sum-based view: it does not pair dispatches with entries.
/// Rows are ordered newest day first, then warehouse, then product.
pub fn daily_dispatch_vs_entries(
    movements: &[Movement],
    range: DateRange,
    warehouse_id: Option<&str>,
) -> Vec<DailyRow> {
    // (day, warehouse, product) -> (dispatched, entered, exited)
    let mut acc: BTreeMap<(NaiveDate, String, String), (Qty, Qty, Qty)> = BTreeMap::new();

    for m in movements {
        let day = m.occurred_at().date_naive();
        if !range.contains_day(day) {
            continue;
        }
        let (warehouse, slot) = match (m.kind(), m.body().placement()) {
            (MovementKind::Dispatch, Placement::Into { warehouse }) => (warehouse, 0),
            (MovementKind::Entry, Placement::Into { warehouse }) => (warehouse, 1),
            (MovementKind::Exit, Placement::OutOf { warehouse }) => (warehouse, 2),
            _ => continue,
        };
        if warehouse_id.is_some_and(|w| w != warehouse.as_str()) {
            continue;
        }
        let e = acc
            .entry((day, warehouse.clone(), m.product_id().to_string()))
            .or_insert((Qty::ZERO, Qty::ZERO, Qty::ZERO));
        let q = m.quantity();
        match slot {
            0 => e.0 = e.0.saturating_add(q),
            1 => e.1 = e.1.saturating_add(q),
            _ => e.2 = e.2.saturating_add(q),
        }
    }

    let mut out: Vec<DailyRow> = acc
        .into_iter()
        .map(|((day, warehouse_id, product_id), (dispatched, entered, exited))| {
            let variance = dispatched - entered;
            let status = if variance.is_zero() {
                DailyStatus::Conforming
            } else if variance.is_positive() {
                DailyStatus::Shortfall
            } else {
                DailyStatus::Excess
            };
            DailyRow {
                day,
                warehouse_id,
                product_id,
                dispatched,
                entered,
                exited,
                variance,
                variance_pct: variance.percent_of(dispatched).unwrap_or(0.0),
                entry_exit_ratio: if exited.is_zero() {
                    None
                } else {
                    Some(entered.raw() as f64 / exited.raw() as f64)
                },
                status,
            }
        })
        .collect();

    out.sort_by(|a, b| {
        b.day
            .cmp(&a.day)
            .then_with(|| a.warehouse_id.cmp(&b.warehouse_id))
            .then_with(|| a.product_id.cmp(&b.product_id))
    });
    out
}
