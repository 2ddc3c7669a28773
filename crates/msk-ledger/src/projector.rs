//! Stock projection: movement -> effects -> level changes.
//!
//! A movement is first reduced to its [`StockEffect`]s, a backend-neutral
//! list of "add here / take there" instructions.  [`plan`] resolves effects
//! against current levels into concrete [`LevelChange`]s; every backend
//! (in-memory, journal, Postgres) writes exactly those changes.
//!
//! Rules:
//! - entry, dispatch, adjustment increase: add at the receiving warehouse.
//! - exit, adjustment decrease: subtract at the source, floored at zero.
//! - transfer: floored subtract at source, add the full quantity at
//!   destination.  Both changes are committed together or not at all.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Placement, StockKey, ValidatedMovement};
use crate::{Movement, Qty};

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// What to do when a decrement exceeds the available quantity.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverdrawPolicy {
    /// Floor the level at zero and admit the movement.
    #[default]
    Clamp,
    /// Refuse the movement with [`InsufficientStock`].
    Reject,
}

impl std::str::FromStr for OverdrawPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "clamp" => Ok(OverdrawPolicy::Clamp),
            "reject" => Ok(OverdrawPolicy::Reject),
            other => Err(format!("unknown overdraw policy: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("insufficient stock at {key}: available {available}, requested {requested}")]
pub struct InsufficientStock {
    pub key: StockKey,
    pub available: Qty,
    pub requested: Qty,
}

// ---------------------------------------------------------------------------
// Effects
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StockEffect {
    Increase { key: StockKey, qty: Qty },
    DecreaseFloored { key: StockKey, qty: Qty },
}

impl StockEffect {
    pub fn key(&self) -> &StockKey {
        match self {
            StockEffect::Increase { key, .. } | StockEffect::DecreaseFloored { key, .. } => key,
        }
    }
}

/// Effects of a movement, decrements first.
pub fn effects(m: &ValidatedMovement) -> Vec<StockEffect> {
    let product = m.product_id();
    let qty = m.quantity();
    match m.placement() {
        Placement::Into { warehouse } => vec![StockEffect::Increase {
            key: StockKey::new(product, warehouse.as_str()),
            qty,
        }],
        Placement::OutOf { warehouse } => vec![StockEffect::DecreaseFloored {
            key: StockKey::new(product, warehouse.as_str()),
            qty,
        }],
        Placement::Between {
            source,
            destination,
        } => vec![
            StockEffect::DecreaseFloored {
                key: StockKey::new(product, source.as_str()),
                qty,
            },
            StockEffect::Increase {
                key: StockKey::new(product, destination.as_str()),
                qty,
            },
        ],
    }
}

// ---------------------------------------------------------------------------
// Level changes
// ---------------------------------------------------------------------------

/// One stock-level write produced by a movement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelChange {
    pub key: StockKey,
    pub before: Qty,
    pub after: Qty,
    /// `true` when a decrement was floored at zero.
    pub clamped: bool,
}

/// Resolve a movement's effects against current levels.
///
/// `lookup` returns the current quantity for a key (zero when the level does
/// not exist yet).  Nothing is written; callers commit the returned changes.
pub fn plan<F>(
    m: &ValidatedMovement,
    lookup: F,
    policy: OverdrawPolicy,
) -> Result<Vec<LevelChange>, InsufficientStock>
where
    F: Fn(&StockKey) -> Qty,
{
    let mut changes: Vec<LevelChange> = Vec::with_capacity(2);
    for effect in effects(m) {
        let key = effect.key().clone();
        let before = changes
            .iter()
            .rev()
            .find(|c| c.key == key)
            .map(|c| c.after)
            .unwrap_or_else(|| lookup(&key));

        let change = match effect {
            StockEffect::Increase { qty, .. } => LevelChange {
                key,
                before,
                after: before.saturating_add(qty),
                clamped: false,
            },
            StockEffect::DecreaseFloored { qty, .. } => {
                let clamped = qty > before;
                if clamped && policy == OverdrawPolicy::Reject {
                    return Err(InsufficientStock {
                        key,
                        available: before,
                        requested: qty,
                    });
                }
                LevelChange {
                    key,
                    before,
                    after: before.floored_sub(qty),
                    clamped,
                }
            }
        };
        changes.push(change);
    }
    Ok(changes)
}

// ---------------------------------------------------------------------------
// StockLevels
// ---------------------------------------------------------------------------

/// Materialized per-key quantities.
///
/// Levels are created lazily on first effect and never removed; a level that
/// drains stays at zero.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StockLevels {
    levels: BTreeMap<StockKey, Qty>,
}

impl StockLevels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &StockKey) -> Qty {
        self.levels.get(key).copied().unwrap_or(Qty::ZERO)
    }

    pub fn contains(&self, key: &StockKey) -> bool {
        self.levels.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StockKey, Qty)> {
        self.levels.iter().map(|(k, q)| (k, *q))
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn set(&mut self, key: StockKey, qty: Qty) {
        self.levels.insert(key, qty);
    }

    pub fn commit(&mut self, changes: &[LevelChange]) {
        for c in changes {
            self.levels.insert(c.key.clone(), c.after);
        }
    }
}

impl FromIterator<(StockKey, Qty)> for StockLevels {
    fn from_iter<I: IntoIterator<Item = (StockKey, Qty)>>(iter: I) -> Self {
        Self {
            levels: iter.into_iter().collect(),
        }
    }
}

/// Apply one movement with the clamp rule.
pub fn apply(m: &ValidatedMovement, levels: &mut StockLevels) -> Vec<LevelChange> {
    // Clamp never refuses.
    let changes = plan(m, |k| levels.get(k), OverdrawPolicy::Clamp).unwrap_or_default();
    levels.commit(&changes);
    changes
}

/// Rebuild levels from empty state by applying `movements` in order.
pub fn replay<'a, I>(movements: I) -> StockLevels
where
    I: IntoIterator<Item = &'a Movement>,
{
    let mut levels = StockLevels::new();
    for m in movements {
        apply(m.body(), &mut levels);
    }
    levels
}
