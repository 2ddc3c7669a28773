//! msk-ledger
//!
//! Movement ledger and stock projection.
//! - Fixed-point tonnage (`Qty`, 1e-6 tonne)
//! - Movement admission rules (`validate`)
//! - Stock effects + floor-at-zero projection (`projector`)
//! - Append-only `Ledger` façade with replay verification
//! - Pure deterministic logic (no IO, no clock, no storage)

mod ordering;
mod quantity;
mod types;
mod validate;

pub mod ledger;
pub mod projector;

pub use ledger::{Ledger, LedgerError, LedgerSnapshot};
pub use ordering::{replay_canonical, sort_movements_canonical};
pub use projector::{
    apply, effects, plan, replay, InsufficientStock, LevelChange, OverdrawPolicy, StockEffect,
    StockLevels,
};
pub use quantity::{Qty, QtyParseError, QTY_SCALE};
pub use types::{
    AdjustmentDirection, Movement, MovementDraft, MovementKind, MovementRecord, Placement,
    StockKey, ValidatedMovement,
};
pub use validate::{validate, ValidationError};
