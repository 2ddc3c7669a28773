//! Scenario: Dispatches are settled by entries in FIFO order
//!
//! # Invariants under test
//!
//! 1. With D1=100 then D2=50 pending on one key, an entry of 90 settles D1
//!    (shortfall, variance 10) and leaves D2 pending.
//!
//! 2. 75 dispatched / 75 received is matched_exact with zero variance.
//!
//! 3. 40 dispatched / 45 received is excess with variance -5.
//!
//! 4. Rebuilding the book from the same ledger yields the same records.
//!
//! All tests are pure; no IO, no DB, no network.

use chrono::{Duration, TimeZone, Utc};
use msk_ledger::{validate, Movement, MovementDraft, MovementKind, Qty};
use msk_reconcile::{ReconciliationBook, ReconciliationStatus};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn movement(seq_no: u64, kind: MovementKind, tonnes: i64) -> Movement {
    let at = Utc.with_ymd_and_hms(2024, 4, 10, 6, 0, 0).unwrap() + Duration::hours(seq_no as i64);
    let mut draft = MovementDraft::new(kind, "P-UREA", Qty::tonnes(tonnes), at, "mgr-1").to("W-NORTH");
    if kind == MovementKind::Dispatch {
        draft = draft.ship("S-MARIA").reference(format!("BL-{seq_no}"));
    }
    Movement::new(
        Uuid::from_u128(seq_no as u128),
        seq_no,
        validate(draft).unwrap(),
    )
}

fn feed(book: &mut ReconciliationBook, ledger: &[Movement]) {
    for m in ledger {
        book.on_movement_appended(m).unwrap();
    }
}

// ---------------------------------------------------------------------------
// 1. FIFO
// ---------------------------------------------------------------------------

#[test]
fn oldest_dispatch_is_settled_first() {
    let ledger = vec![
        movement(1, MovementKind::Dispatch, 100),
        movement(2, MovementKind::Dispatch, 50),
        movement(3, MovementKind::Entry, 90),
    ];
    let mut book = ReconciliationBook::new();
    feed(&mut book, &ledger);

    let d1 = book.get(&ledger[0].id).unwrap();
    assert_eq!(d1.status, ReconciliationStatus::Shortfall);
    assert_eq!(d1.variance, Some(Qty::tonnes(10)));
    assert_eq!(d1.received_quantity, Some(Qty::tonnes(90)));
    assert_eq!(d1.entry_movement_id, Some(ledger[2].id));
    assert!((d1.variance_pct().unwrap() - 10.0).abs() < 1e-9);

    let d2 = book.get(&ledger[1].id).unwrap();
    assert_eq!(d2.status, ReconciliationStatus::Pending);
    assert_eq!(d2.variance, None);
    assert_eq!(d2.variance_pct(), None);

    let pending = book.pending(Some("W-NORTH"));
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].dispatch_movement_id, ledger[1].id);
}

// ---------------------------------------------------------------------------
// 2 + 3. Classification
// ---------------------------------------------------------------------------

#[test]
fn exact_match_has_zero_variance() {
    let ledger = vec![
        movement(1, MovementKind::Dispatch, 75),
        movement(2, MovementKind::Entry, 75),
    ];
    let mut book = ReconciliationBook::new();
    feed(&mut book, &ledger);

    let rec = &book.records()[0];
    assert_eq!(rec.status, ReconciliationStatus::MatchedExact);
    assert_eq!(rec.variance, Some(Qty::ZERO));
}

#[test]
fn over_receipt_is_excess_with_negative_variance() {
    let ledger = vec![
        movement(1, MovementKind::Dispatch, 40),
        movement(2, MovementKind::Entry, 45),
    ];
    let mut book = ReconciliationBook::new();
    feed(&mut book, &ledger);

    let rec = &book.records()[0];
    assert_eq!(rec.status, ReconciliationStatus::Excess);
    assert_eq!(rec.variance, Some(Qty::tonnes(-5)));
    assert!((rec.variance_pct().unwrap() + 12.5).abs() < 1e-9);
}

// ---------------------------------------------------------------------------
// 4. Rebuild
// ---------------------------------------------------------------------------

#[test]
fn rebuild_is_deterministic() {
    let ledger = vec![
        movement(1, MovementKind::Dispatch, 100),
        movement(2, MovementKind::Dispatch, 50),
        movement(3, MovementKind::Entry, 90),
        movement(4, MovementKind::Entry, 55),
        movement(5, MovementKind::Entry, 10),
    ];
    let a = ReconciliationBook::rebuild(&ledger).unwrap();
    let b = ReconciliationBook::rebuild(&ledger).unwrap();
    assert_eq!(a.records(), b.records());

    assert_eq!(a.records()[1].status, ReconciliationStatus::Excess);
    assert!(a.pending(None).is_empty());
}
