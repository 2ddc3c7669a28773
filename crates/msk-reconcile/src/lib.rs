//! msk-reconcile
//!
//! Dispatch-vs-entry reconciliation.
//! - Every dispatch opens a pending record for (product, destination)
//! - The next entry on that key settles the oldest pending record (FIFO)
//! - Variance = dispatched - received; status classified from its sign
//! - Settled records are final
//!
//! Deterministic, pure logic. No IO.

mod engine;
mod types;

pub use engine::{ReconcileError, ReconciliationBook};
pub use types::*;
