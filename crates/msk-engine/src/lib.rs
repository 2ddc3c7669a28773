//! msk-engine
//!
//! The submission choke-point for stock movements.
//! - `StockService`: validate -> authorize -> lock -> plan -> commit ->
//!   reconcile, one logical transaction per movement
//! - `MovementStore`: persistence seam (in-memory store here; journal and
//!   Postgres backends live in their own crates)
//! - `KeyLocks`: per-(product, warehouse) async locks, sorted acquisition
//! - `SubmissionPolicy`: actor authorization, role-based by default

mod error;
mod locks;
mod policy;
mod service;
mod store;

pub use error::{EngineError, StoreError};
pub use locks::{KeyGuards, KeyLocks};
pub use policy::{Actor, AllowAll, Role, RolePolicy, SubmissionPolicy};
pub use service::{
    RetryOutcome, ServiceOptions, StockService, Submission, DEFAULT_LOCK_TIMEOUT,
    DEFAULT_MAX_RETRY_ATTEMPTS,
};
pub use store::{ledger_refusal, FailPoint, InMemoryStore, MovementStore};
