use std::collections::BTreeMap;

use msk_ledger::{Qty, StockLevels};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRow {
    pub product_id: String,
    pub warehouse_id: String,
    pub quantity_available: Qty,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseTotal {
    pub warehouse_id: String,
    pub product_count: usize,
    pub total_quantity: Qty,
}

fn rows<'a>(levels: &'a StockLevels, warehouse_id: Option<&'a str>) -> impl Iterator<Item = StockRow> + 'a {
    levels
        .iter()
        .filter(move |(k, _)| warehouse_id.map_or(true, |w| k.warehouse_id == w))
        .map(|(k, q)| StockRow {
            product_id: k.product_id.clone(),
            warehouse_id: k.warehouse_id.clone(),
            quantity_available: q,
        })
}

/// Every level, including drained ones at zero, ordered by
/// `(product_id, warehouse_id)`.
pub fn stock_summary(levels: &StockLevels, warehouse_id: Option<&str>) -> Vec<StockRow> {
    rows(levels, warehouse_id).collect()
}

/// Per-warehouse totals, ordered by warehouse id.
pub fn stock_totals_by_warehouse(levels: &StockLevels) -> Vec<WarehouseTotal> {
    let mut acc: BTreeMap<&str, (usize, Qty)> = BTreeMap::new();
    for (k, q) in levels.iter() {
        let e = acc.entry(k.warehouse_id.as_str()).or_insert((0, Qty::ZERO));
        e.0 += 1;
        e.1 = e.1.saturating_add(q);
    }
    acc.into_iter()
        .map(|(w, (n, total))| WarehouseTotal {
            warehouse_id: w.to_string(),
            product_count: n,
            total_quantity: total,
        })
        .collect()
}

/// Levels at or below `threshold`, lowest first.
pub fn low_stock_alerts(levels: &StockLevels, threshold: Qty, warehouse_id: Option<&str>) -> Vec<StockRow> {
    let mut out: Vec<StockRow> = rows(levels, warehouse_id)
        .filter(|r| r.quantity_available <= threshold)
        .collect();
    // Stable: ties keep key order.
    out.sort_by_key(|r| r.quantity_available);
    out
}
