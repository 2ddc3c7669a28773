use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Qty;

/// The closed set of movement kinds.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementKind {
    /// Goods received into a warehouse.
    Entry,
    /// Goods leaving a warehouse (delivery to a client).
    Exit,
    /// Goods moved from one warehouse to another.
    Transfer,
    /// Manual correction after a count.
    Adjustment,
    /// Ship cargo allocated to a warehouse, awaiting entry confirmation.
    Dispatch,
}

impl MovementKind {
    pub const ALL: [MovementKind; 5] = [
        MovementKind::Entry,
        MovementKind::Exit,
        MovementKind::Transfer,
        MovementKind::Adjustment,
        MovementKind::Dispatch,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MovementKind::Entry => "entry",
            MovementKind::Exit => "exit",
            MovementKind::Transfer => "transfer",
            MovementKind::Adjustment => "adjustment",
            MovementKind::Dispatch => "dispatch",
        }
    }
}

impl std::fmt::Display for MovementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MovementKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "entry" => Ok(MovementKind::Entry),
            "exit" => Ok(MovementKind::Exit),
            "transfer" => Ok(MovementKind::Transfer),
            "adjustment" => Ok(MovementKind::Adjustment),
            "dispatch" => Ok(MovementKind::Dispatch),
            other => Err(format!("unknown movement kind: {other}")),
        }
    }
}

/// Sign of an adjustment. Ignored for every other kind.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentDirection {
    #[default]
    Increase,
    Decrease,
}

impl AdjustmentDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            AdjustmentDirection::Increase => "increase",
            AdjustmentDirection::Decrease => "decrease",
        }
    }
}

impl FromStr for AdjustmentDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "increase" | "+" => Ok(AdjustmentDirection::Increase),
            "decrease" | "-" => Ok(AdjustmentDirection::Decrease),
            other => Err(format!("unknown adjustment direction: {other}")),
        }
    }
}

/// Key of one stock level: `(product_id, warehouse_id)`.
///
/// Ordering is lexicographic on product then warehouse; multi-key lock
/// acquisition relies on it.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StockKey {
    pub product_id: String,
    pub warehouse_id: String,
}

impl StockKey {
    pub fn new(product_id: impl Into<String>, warehouse_id: impl Into<String>) -> Self {
        Self {
            product_id: product_id.into(),
            warehouse_id: warehouse_id.into(),
        }
    }
}

impl std::fmt::Display for StockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.product_id, self.warehouse_id)
    }
}

// ---------------------------------------------------------------------------
// Draft (caller input, not yet validated)
// ---------------------------------------------------------------------------

/// A movement as submitted by a caller.
///
/// Nothing here is trusted: [`crate::validate`] turns a draft into a
/// [`ValidatedMovement`] or explains why it cannot be admitted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementDraft {
    pub kind: MovementKind,
    pub product_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_warehouse_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_warehouse_id: Option<String>,
    pub quantity: Qty,
    #[serde(default)]
    pub direction: AdjustmentDirection,
    #[serde(default)]
    pub document_reference: String,
    pub occurred_at: DateTime<Utc>,
    pub created_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ship_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl MovementDraft {
    /// Start a draft with no warehouses; chain the builder methods below.
    pub fn new(
        kind: MovementKind,
        product_id: impl Into<String>,
        quantity: Qty,
        occurred_at: DateTime<Utc>,
        created_by: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            product_id: product_id.into(),
            source_warehouse_id: None,
            destination_warehouse_id: None,
            quantity,
            direction: AdjustmentDirection::Increase,
            document_reference: String::new(),
            occurred_at,
            created_by: created_by.into(),
            ship_id: None,
            notes: None,
        }
    }

    pub fn from(mut self, warehouse_id: impl Into<String>) -> Self {
        self.source_warehouse_id = Some(warehouse_id.into());
        self
    }

    pub fn to(mut self, warehouse_id: impl Into<String>) -> Self {
        self.destination_warehouse_id = Some(warehouse_id.into());
        self
    }

    pub fn ship(mut self, ship_id: impl Into<String>) -> Self {
        self.ship_id = Some(ship_id.into());
        self
    }

    pub fn reference(mut self, document_reference: impl Into<String>) -> Self {
        self.document_reference = document_reference.into();
        self
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn decrease(mut self) -> Self {
        self.direction = AdjustmentDirection::Decrease;
        self
    }

    /// Every warehouse id named by the draft, source first.
    pub fn warehouses(&self) -> impl Iterator<Item = &str> {
        self.source_warehouse_id
            .as_deref()
            .into_iter()
            .chain(self.destination_warehouse_id.as_deref())
    }
}

// ---------------------------------------------------------------------------
// Validated movement
// ---------------------------------------------------------------------------

/// Where a validated movement lands.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Placement {
    /// Stock is added at `warehouse` (entry, dispatch, adjustment increase).
    Into { warehouse: String },
    /// Stock is removed at `warehouse` (exit, adjustment decrease).
    OutOf { warehouse: String },
    /// Stock leaves `source` and arrives at `destination`.
    Between { source: String, destination: String },
}

/// A draft that passed every admission rule.
///
/// Only [`crate::validate`] constructs one, so holding a `ValidatedMovement`
/// is proof the invariants hold.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatedMovement {
    pub(crate) draft: MovementDraft,
    pub(crate) placement: Placement,
}

impl ValidatedMovement {
    pub fn draft(&self) -> &MovementDraft {
        &self.draft
    }

    pub fn placement(&self) -> &Placement {
        &self.placement
    }

    pub fn kind(&self) -> MovementKind {
        self.draft.kind
    }

    pub fn product_id(&self) -> &str {
        &self.draft.product_id
    }

    pub fn quantity(&self) -> Qty {
        self.draft.quantity
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.draft.occurred_at
    }

    /// Stock keys touched by this movement, sorted and deduplicated.
    pub fn keys(&self) -> Vec<StockKey> {
        let product = &self.draft.product_id;
        let mut keys = match &self.placement {
            Placement::Into { warehouse } | Placement::OutOf { warehouse } => {
                vec![StockKey::new(product.clone(), warehouse.clone())]
            }
            Placement::Between {
                source,
                destination,
            } => vec![
                StockKey::new(product.clone(), source.clone()),
                StockKey::new(product.clone(), destination.clone()),
            ],
        };
        keys.sort();
        keys.dedup();
        keys
    }

    /// The warehouse that receives stock, if any.
    pub fn receiving_warehouse(&self) -> Option<&str> {
        match &self.placement {
            Placement::Into { warehouse } => Some(warehouse),
            Placement::Between { destination, .. } => Some(destination),
            Placement::OutOf { .. } => None,
        }
    }

    pub fn into_draft(self) -> MovementDraft {
        self.draft
    }
}

// ---------------------------------------------------------------------------
// Ledger movement (appended, immutable)
// ---------------------------------------------------------------------------

/// A movement admitted to the ledger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Movement {
    pub id: Uuid,
    pub seq_no: u64,
    body: ValidatedMovement,
}

impl Movement {
    pub fn new(id: Uuid, seq_no: u64, body: ValidatedMovement) -> Self {
        Self { id, seq_no, body }
    }

    pub fn body(&self) -> &ValidatedMovement {
        &self.body
    }

    pub fn draft(&self) -> &MovementDraft {
        &self.body.draft
    }

    pub fn kind(&self) -> MovementKind {
        self.body.kind()
    }

    pub fn product_id(&self) -> &str {
        self.body.product_id()
    }

    pub fn quantity(&self) -> Qty {
        self.body.quantity()
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.body.occurred_at()
    }

    pub fn to_record(&self) -> MovementRecord {
        MovementRecord {
            id: self.id,
            seq_no: self.seq_no,
            draft: self.body.draft.clone(),
        }
    }
}

/// Flat, serializable form of a [`Movement`] used by the journal, the
/// database layer and report consumers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRecord {
    pub id: Uuid,
    pub seq_no: u64,
    #[serde(flatten)]
    pub draft: MovementDraft,
}

impl MovementRecord {
    /// Re-run admission rules on a stored record.
    pub fn into_movement(self) -> Result<Movement, crate::ValidationError> {
        let body = crate::validate(self.draft)?;
        Ok(Movement::new(self.id, self.seq_no, body))
    }
}
