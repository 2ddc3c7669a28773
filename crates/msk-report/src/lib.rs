//! msk-report
//!
//! Read-only reporting over the ledger, the stock projection and the
//! reconciliation records.  Every function takes plain slices/views and
//! returns serde-serializable structs for export collaborators.
//!
//! Output ordering is always deterministic.

mod history;
mod range;
mod stock;
mod variance;

pub use history::{movement_history, HistoryQuery, DEFAULT_HISTORY_LIMIT};
pub use range::DateRange;
pub use stock::{low_stock_alerts, stock_summary, stock_totals_by_warehouse, StockRow, WarehouseTotal};
pub use variance::{
    daily_dispatch_vs_entries, variance_report, DailyRow, DailyStatus, VarianceFilter,
    VarianceReport, VarianceRow, VarianceStats, WarehouseVariance,
};
