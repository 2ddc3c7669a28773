//! Canonical movement ordering.
//!
//! Movements loaded from storage (journal lines, table rows, merged exports)
//! may arrive in any order.  Replaying them in canonical order is mandatory:
//! FIFO reconciliation and the exit floor are both order-sensitive.
//!
//! # Canonical sort key
//!
//! `(seq_no, occurred_at, id)` ascending.  `seq_no` is unique within one
//! ledger; the remaining fields only break ties in merged batches.

use crate::{Ledger, LedgerError, Movement};

/// Sort `movements` into canonical order **in place**.
pub fn sort_movements_canonical(movements: &mut [Movement]) {
    movements.sort_by(|a, b| {
        a.seq_no
            .cmp(&b.seq_no)
            .then_with(|| a.occurred_at().cmp(&b.occurred_at()))
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Sort `movements` canonically then restore them into `ledger`.
///
/// # Errors
///
/// [`LedgerError::OutOfOrderSeqNo`] if two movements share a `seq_no` or a
/// movement is not newer than what the ledger already holds.
pub fn replay_canonical(ledger: &mut Ledger, mut movements: Vec<Movement>) -> Result<(), LedgerError> {
    sort_movements_canonical(&mut movements);
    for m in movements {
        ledger.restore(m)?;
    }
    Ok(())
}
