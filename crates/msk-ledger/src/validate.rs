//! Movement admission rules.
//!
//! `validate` is pure: it never looks at stock levels or the ledger. Rules
//! that depend on current state (overdraw under `OverdrawPolicy::Reject`)
//! live in the projector.

use thiserror::Error;

use crate::types::{AdjustmentDirection, MovementDraft, MovementKind, Placement, ValidatedMovement};
use crate::Qty;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("quantity must be > 0, got {quantity}")]
    InvalidQuantity { quantity: Qty },
    #[error("product id must not be empty")]
    MissingProduct,
    #[error("{kind} movement requires a destination warehouse")]
    MissingDestination { kind: MovementKind },
    #[error("{kind} movement requires a source warehouse")]
    MissingSource { kind: MovementKind },
    #[error("transfer source and destination are both {warehouse_id}")]
    InvalidTransfer { warehouse_id: String },
    #[error("dispatch requires a ship id")]
    MissingShip,
}

/// Check every admission rule and resolve where the movement lands.
///
/// Identifiers are trimmed once here; blank ones (empty or whitespace) are
/// treated as absent. The accepted draft carries the normalized ids, so
/// every stock key derived from it agrees with the placement.
pub fn validate(mut draft: MovementDraft) -> Result<ValidatedMovement, ValidationError> {
    normalize(&mut draft);

    if !draft.quantity.is_positive() {
        return Err(ValidationError::InvalidQuantity {
            quantity: draft.quantity,
        });
    }
    if draft.product_id.is_empty() {
        return Err(ValidationError::MissingProduct);
    }

    let kind = draft.kind;
    let source = draft.source_warehouse_id.clone();
    let destination = draft.destination_warehouse_id.clone();

    let placement = match kind {
        MovementKind::Entry => Placement::Into {
            warehouse: destination.ok_or(ValidationError::MissingDestination { kind })?,
        },
        MovementKind::Dispatch => {
            let warehouse = destination.ok_or(ValidationError::MissingDestination { kind })?;
            if draft.ship_id.is_none() {
                return Err(ValidationError::MissingShip);
            }
            Placement::Into { warehouse }
        }
        MovementKind::Exit => Placement::OutOf {
            warehouse: source.ok_or(ValidationError::MissingSource { kind })?,
        },
        MovementKind::Transfer => {
            let source = source.ok_or(ValidationError::MissingSource { kind })?;
            let destination = destination.ok_or(ValidationError::MissingDestination { kind })?;
            if source == destination {
                return Err(ValidationError::InvalidTransfer {
                    warehouse_id: source,
                });
            }
            Placement::Between {
                source,
                destination,
            }
        }
        MovementKind::Adjustment => match draft.direction {
            AdjustmentDirection::Increase => Placement::Into {
                warehouse: destination
                    .or(source)
                    .ok_or(ValidationError::MissingDestination { kind })?,
            },
            AdjustmentDirection::Decrease => Placement::OutOf {
                warehouse: source
                    .or(destination)
                    .ok_or(ValidationError::MissingSource { kind })?,
            },
        },
    };

    Ok(ValidatedMovement { draft, placement })
}

fn normalize(draft: &mut MovementDraft) {
    draft.product_id = draft.product_id.trim().to_string();
    draft.created_by = draft.created_by.trim().to_string();
    draft.source_warehouse_id = present(draft.source_warehouse_id.take());
    draft.destination_warehouse_id = present(draft.destination_warehouse_id.take());
    draft.ship_id = present(draft.ship_id.take());
}

fn present(id: Option<String>) -> Option<String> {
    id.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}
