//! Submission authorization.
//!
//! [`crate::StockService::submit`] asks its [`SubmissionPolicy`] before
//! locking or writing anything.  The default [`RolePolicy`]:
//!
//! - managers and admins may submit any kind;
//! - operators may submit only `entry`, `exit` and `adjustment`, and every
//!   warehouse such a movement names must be their own.

use std::str::FromStr;

use msk_ledger::{MovementKind, ValidatedMovement};
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Operator,
    Manager,
    Admin,
    SuperAdmin,
}

impl Role {
    pub fn is_manager_or_above(self) -> bool {
        !matches!(self, Role::Operator)
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "operator" => Ok(Role::Operator),
            "manager" => Ok(Role::Manager),
            "admin" => Ok(Role::Admin),
            "super_admin" => Ok(Role::SuperAdmin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Who is submitting.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: String,
    pub role: Role,
    /// Home warehouse; operators without one cannot touch stock.
    pub warehouse_id: Option<String>,
}

impl Actor {
    pub fn operator(user_id: impl Into<String>, warehouse_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role: Role::Operator,
            warehouse_id: Some(warehouse_id.into()),
        }
    }

    pub fn manager(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role: Role::Manager,
            warehouse_id: None,
        }
    }

    /// Warehouse scope for read queries: operators see their own warehouse
    /// only, whatever they asked for.
    pub fn scope<'a>(&'a self, requested: Option<&'a str>) -> Option<&'a str> {
        match self.role {
            Role::Operator => self.warehouse_id.as_deref(),
            _ => requested,
        }
    }
}

pub trait SubmissionPolicy: Send + Sync {
    /// `Err(reason)` refuses the submission.
    fn authorize(&self, actor: &Actor, movement: &ValidatedMovement) -> Result<(), String>;
}

/// Role-based default policy.
#[derive(Copy, Clone, Debug, Default)]
pub struct RolePolicy;

impl SubmissionPolicy for RolePolicy {
    fn authorize(&self, actor: &Actor, movement: &ValidatedMovement) -> Result<(), String> {
        if actor.role.is_manager_or_above() {
            return Ok(());
        }

        let kind = movement.kind();
        match kind {
            MovementKind::Entry | MovementKind::Exit | MovementKind::Adjustment => {}
            MovementKind::Dispatch | MovementKind::Transfer => {
                return Err(format!("{:?} may not submit {kind} movements", actor.role));
            }
        }

        let Some(home) = actor.warehouse_id.as_deref() else {
            return Err(format!("operator {} has no warehouse", actor.user_id));
        };

        if movement.draft().warehouses().all(|w| w == home.trim()) {
            Ok(())
        } else {
            Err(format!(
                "operator {} is limited to warehouse {home}",
                actor.user_id
            ))
        }
    }
}

/// Accept everything (tests, trusted batch imports).
#[derive(Copy, Clone, Debug, Default)]
pub struct AllowAll;

impl SubmissionPolicy for AllowAll {
    fn authorize(&self, _actor: &Actor, _movement: &ValidatedMovement) -> Result<(), String> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use msk_ledger::{validate, MovementDraft, Qty};

    fn vm(kind: MovementKind, from: Option<&str>, to: Option<&str>) -> ValidatedMovement {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut d = MovementDraft::new(kind, "P1", Qty::tonnes(1), at, "u").ship("S1");
        d.source_warehouse_id = from.map(str::to_string);
        d.destination_warehouse_id = to.map(str::to_string);
        validate(d).unwrap()
    }

    #[test]
    fn only_managers_dispatch() {
        let m = vm(MovementKind::Dispatch, None, Some("W1"));
        assert!(RolePolicy.authorize(&Actor::manager("m"), &m).is_ok());
        assert!(RolePolicy.authorize(&Actor::operator("o", "W1"), &m).is_err());
    }

    #[test]
    fn operator_bound_to_own_warehouse() {
        let op = Actor::operator("o", "W1");
        assert!(RolePolicy.authorize(&op, &vm(MovementKind::Entry, None, Some("W1"))).is_ok());
        assert!(RolePolicy.authorize(&op, &vm(MovementKind::Entry, None, Some("W2"))).is_err());
        assert!(RolePolicy.authorize(&op, &vm(MovementKind::Exit, Some("W1"), None)).is_ok());
        assert!(RolePolicy.authorize(&op, &vm(MovementKind::Exit, Some("W3"), None)).is_err());
        assert!(RolePolicy
            .authorize(&op, &vm(MovementKind::Adjustment, None, Some("W2")))
            .is_err());
    }

    #[test]
    fn operators_may_not_transfer() {
        let op = Actor::operator("o", "W1");
        let err = RolePolicy
            .authorize(&op, &vm(MovementKind::Transfer, Some("W1"), Some("W2")))
            .unwrap_err();
        assert!(err.contains("may not submit transfer"), "{err}");
        assert!(RolePolicy
            .authorize(&op, &vm(MovementKind::Transfer, Some("W2"), Some("W1")))
            .is_err());
        assert!(RolePolicy
            .authorize(&Actor::manager("m"), &vm(MovementKind::Transfer, Some("W1"), Some("W2")))
            .is_ok());
    }

    #[test]
    fn operator_without_warehouse_is_refused() {
        let op = Actor {
            user_id: "o".into(),
            role: Role::Operator,
            warehouse_id: None,
        };
        assert!(RolePolicy.authorize(&op, &vm(MovementKind::Entry, None, Some("W1"))).is_err());
    }

    #[test]
    fn read_scope_pins_operators() {
        let op = Actor::operator("o", "W1");
        assert_eq!(op.scope(Some("W9")), Some("W1"));
        assert_eq!(op.scope(None), Some("W1"));
        assert_eq!(Actor::manager("m").scope(Some("W9")), Some("W9"));
    }
}
