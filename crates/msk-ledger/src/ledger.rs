//! Append-only movement ledger with its stock projection.
//!
//! # Purpose
//! [`projector`](crate::projector) owns the stock rules.  This module wraps
//! them behind a typed, append-only [`Ledger`] façade that:
//!
//! - Enforces strictly increasing `seq_no` on every append.
//! - Applies the overdraw policy before anything is written.
//! - Keeps movements and levels in lock-step: an append either records the
//!   movement and all its level changes, or neither.
//! - Can verify itself by replaying the movements from empty state.
//!
//! # Usage
//! ```ignore
//! let mut ledger = Ledger::new(OverdrawPolicy::Clamp);
//! let body = validate(MovementDraft::new(MovementKind::Entry, "P1", Qty::tonnes(10), at, "u").to("W1"))?;
//! ledger.append(Uuid::new_v4(), body)?;
//! assert_eq!(ledger.level(&StockKey::new("P1", "W1")), Qty::tonnes(10));
//! ```
//!
//! # Determinism
//! No IO, no clock, no randomness: ids and timestamps are supplied by the
//! caller.  Two ledgers fed the same movements hold identical state.

use thiserror::Error;
use uuid::Uuid;

use crate::projector::{plan, replay, InsufficientStock, LevelChange, OverdrawPolicy, StockLevels};
use crate::types::{Movement, StockKey, ValidatedMovement};
use crate::Qty;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// The sequence number supplied is not strictly greater than the last.
    #[error("ledger invariant: seq_no {supplied} is not > last {last}")]
    OutOfOrderSeqNo { supplied: u64, last: u64 },
    #[error(transparent)]
    InsufficientStock(#[from] InsufficientStock),
    /// Level changes handed to `commit` were planned against stale levels.
    #[error("ledger invariant: stale level change at {key}: expected {expected}, found {found}")]
    StaleChange {
        key: StockKey,
        expected: Qty,
        found: Qty,
    },
}

// ---------------------------------------------------------------------------
// Snapshot (read-only view)
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub levels: StockLevels,
    /// Total number of movements appended.
    pub entry_count: usize,
    /// The last sequence number seen (0 if empty).
    pub last_seq_no: u64,
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default)]
pub struct Ledger {
    entries: Vec<Movement>,
    levels: StockLevels,
    last_seq_no: u64,
    policy: OverdrawPolicy,
}

impl Ledger {
    pub fn new(policy: OverdrawPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    pub fn policy(&self) -> OverdrawPolicy {
        self.policy
    }

    // -----------------------------------------------------------------------
    // Write surface
    // -----------------------------------------------------------------------

    /// Resolve `body` against current levels without writing anything.
    pub fn plan(&self, body: &ValidatedMovement) -> Result<Vec<LevelChange>, LedgerError> {
        Ok(plan(body, |k| self.levels.get(k), self.policy)?)
    }

    pub fn next_seq_no(&self) -> u64 {
        self.last_seq_no + 1
    }

    /// Record a movement together with level changes planned for it.
    ///
    /// Every change's `before` must match the current level.  The ledger is
    /// **not** mutated on error.
    pub fn commit(&mut self, movement: Movement, changes: &[LevelChange]) -> Result<(), LedgerError> {
        if movement.seq_no <= self.last_seq_no {
            return Err(LedgerError::OutOfOrderSeqNo {
                supplied: movement.seq_no,
                last: self.last_seq_no,
            });
        }
        for c in changes {
            let found = self.levels.get(&c.key);
            if found != c.before {
                return Err(LedgerError::StaleChange {
                    key: c.key.clone(),
                    expected: c.before,
                    found,
                });
            }
        }
        self.levels.commit(changes);
        self.last_seq_no = movement.seq_no;
        self.entries.push(movement);
        Ok(())
    }

    /// Plan and commit in one step, assigning the next sequence number.
    pub fn append(&mut self, id: Uuid, body: ValidatedMovement) -> Result<(Movement, Vec<LevelChange>), LedgerError> {
        let changes = self.plan(&body)?;
        let movement = Movement::new(id, self.next_seq_no(), body);
        self.commit(movement.clone(), &changes)?;
        Ok((movement, changes))
    }

    /// Re-admit a movement loaded from storage.
    ///
    /// Stored movements were accepted under whatever policy was active when
    /// they were written, so replay always clamps.
    pub fn restore(&mut self, movement: Movement) -> Result<Vec<LevelChange>, LedgerError> {
        let changes = plan(movement.body(), |k| self.levels.get(k), OverdrawPolicy::Clamp)?;
        self.commit(movement, &changes)?;
        Ok(changes)
    }

    // -----------------------------------------------------------------------
    // Read surface
    // -----------------------------------------------------------------------

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            levels: self.levels.clone(),
            entry_count: self.entries.len(),
            last_seq_no: self.last_seq_no,
        }
    }

    pub fn level(&self, key: &StockKey) -> Qty {
        self.levels.get(key)
    }

    pub fn levels(&self) -> &StockLevels {
        &self.levels
    }

    pub fn entries(&self) -> &[Movement] {
        &self.entries
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn last_seq_no(&self) -> u64 {
        self.last_seq_no
    }

    /// Replay every movement from empty state and compare with the running
    /// projection.  O(n); for tests, startup checks and audits.
    pub fn verify_integrity(&self) -> bool {
        replay(&self.entries) == self.levels
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
