//! Scenario: Postgres movement recording.
//!
//! # Invariants under test
//! - A movement row and its level updates commit together.
//! - A refused movement (validation, policy, overdraw) writes nothing.
//! - Dispatch opens a pending record; the next entry settles it FIFO.
//! - Replaying `movements` reproduces `stock_levels`.
//! - The ledger table refuses UPDATE / DELETE.
//! - A lost reconciliation row is rewritten from the ledger, and the FIFO
//!   order it implies is restored.
//! - A `stock_levels` row that drifts from the ledger replay is reported.
//!
//! These tests require a live Postgres instance (MSK_DATABASE_URL).

use chrono::Utc;
use msk_engine::{Actor, EngineError, RolePolicy, ServiceOptions};
use msk_ledger::{replay, MovementDraft, MovementKind, OverdrawPolicy, Qty, StockKey};
use msk_reconcile::ReconciliationStatus;
use uuid::Uuid;

async fn pool() -> anyhow::Result<sqlx::PgPool> {
    let url = std::env::var(msk_db::ENV_DB_URL).unwrap_or_else(|_| {
        panic!("DB tests require {}; run with -- --include-ignored", msk_db::ENV_DB_URL)
    });
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(4)
        .connect(&url)
        .await?;
    msk_db::migrate(&pool).await?;
    Ok(pool)
}

/// Unique product id so runs against a shared database do not collide.
fn product() -> String {
    format!("P-{}", Uuid::new_v4().simple())
}

#[tokio::test]
#[ignore = "requires MSK_DATABASE_URL"]
async fn dispatch_then_entry_settles_and_levels_match_replay() -> anyhow::Result<()> {
    let pool = pool().await?;
    let p = product();
    let mgr = Actor::manager("m1");
    let opts = ServiceOptions::default();

    let dispatched = msk_db::record_movement(
        &pool,
        &RolePolicy,
        &mgr,
        MovementDraft::new(MovementKind::Dispatch, &p, Qty::tonnes(100), Utc::now(), "").to("W1").ship("MV-1"),
        &opts,
    )
    .await?;
    let opened = dispatched.reconciliation.expect("dispatch opens a record");
    assert_eq!(opened.status, ReconciliationStatus::Pending);

    let entry = msk_db::record_movement(
        &pool,
        &RolePolicy,
        &mgr,
        MovementDraft::new(MovementKind::Entry, &p, Qty::tonnes(90), Utc::now(), "").to("W1"),
        &opts,
    )
    .await?;
    let settled = entry.reconciliation.expect("entry settles the dispatch");
    assert_eq!(settled.dispatch_movement_id, opened.dispatch_movement_id);
    assert_eq!(settled.status, ReconciliationStatus::Shortfall);
    assert_eq!(settled.variance, Some(Qty::tonnes(10)));

    let levels = msk_db::fetch_stock_levels(&pool).await?;
    assert_eq!(levels.get(&StockKey::new(&p, "W1")), Qty::tonnes(190));

    let movements = msk_db::fetch_movements(&pool).await?;
    let replayed = replay(&movements);
    for (key, qty) in levels.iter() {
        assert_eq!(replayed.get(key), qty, "level for {key} diverges from replay");
    }

    let stored = msk_db::fetch_reconciliation_records(&pool).await?;
    assert!(stored.iter().any(|r| r == &settled));
    Ok(())
}

#[tokio::test]
#[ignore = "requires MSK_DATABASE_URL"]
async fn refused_overdraw_writes_nothing() -> anyhow::Result<()> {
    let pool = pool().await?;
    let p = product();
    let mgr = Actor::manager("m1");
    let reject = ServiceOptions {
        overdraw_policy: OverdrawPolicy::Reject,
        ..ServiceOptions::default()
    };

    let before = msk_db::fetch_movements(&pool).await?.len();
    let err = msk_db::record_movement(
        &pool,
        &RolePolicy,
        &mgr,
        MovementDraft::new(MovementKind::Exit, &p, Qty::tonnes(5), Utc::now(), "").from("W1"),
        &reject,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, EngineError::InsufficientStock(_)));
    assert_eq!(msk_db::fetch_movements(&pool).await?.len(), before);
    Ok(())
}

#[tokio::test]
#[ignore = "requires MSK_DATABASE_URL"]
async fn exit_from_empty_warehouse_floors_at_zero() -> anyhow::Result<()> {
    let pool = pool().await?;
    let p = product();

    let sub = msk_db::record_movement(
        &pool,
        &RolePolicy,
        &Actor::operator("op", "W1"),
        MovementDraft::new(MovementKind::Exit, &p, Qty::tonnes(5), Utc::now(), "").from("W1"),
        &ServiceOptions::default(),
    )
    .await?;
    assert!(sub.level_changes[0].clamped);

    let levels = msk_db::fetch_stock_levels(&pool).await?;
    assert_eq!(levels.get(&StockKey::new(&p, "W1")), Qty::ZERO);
    assert!(levels.contains(&StockKey::new(&p, "W1")));
    Ok(())
}

#[tokio::test]
#[ignore = "requires MSK_DATABASE_URL"]
async fn ledger_rows_cannot_be_edited() -> anyhow::Result<()> {
    let pool = pool().await?;
    let p = product();
    msk_db::record_movement(
        &pool,
        &RolePolicy,
        &Actor::manager("m1"),
        MovementDraft::new(MovementKind::Entry, &p, Qty::tonnes(1), Utc::now(), "").to("W1"),
        &ServiceOptions::default(),
    )
    .await?;

    let res = sqlx::query("update movements set quantity = 1 where product_id = $1")
        .bind(&p)
        .execute(&pool)
        .await;
    assert!(res.is_err(), "movements must be append-only");

    let res = sqlx::query("delete from movements where product_id = $1")
        .bind(&p)
        .execute(&pool)
        .await;
    assert!(res.is_err(), "movements must be append-only");
    Ok(())
}

#[tokio::test]
#[ignore = "requires MSK_DATABASE_URL"]
async fn migrate_is_idempotent() -> anyhow::Result<()> {
    let pool = pool().await?;
    msk_db::migrate(&pool).await?;
    let st = msk_db::status(&pool).await?;
    assert!(st.ok && st.has_movements_table);
    Ok(())
}

async fn record(pool: &sqlx::PgPool, draft: MovementDraft) -> anyhow::Result<msk_engine::Submission> {
    Ok(msk_db::record_movement(pool, &RolePolicy, &Actor::manager("m1"), draft, &ServiceOptions::default()).await?)
}

#[tokio::test]
#[ignore = "requires MSK_DATABASE_URL"]
async fn lost_reconciliation_row_is_rebuilt_fifo() -> anyhow::Result<()> {
    let pool = pool().await?;
    let p = product();
    let d1 = record(
        &pool,
        MovementDraft::new(MovementKind::Dispatch, &p, Qty::tonnes(100), Utc::now(), "").to("W1").ship("MV-1"),
    )
    .await?;
    let d2 = record(
        &pool,
        MovementDraft::new(MovementKind::Dispatch, &p, Qty::tonnes(50), Utc::now(), "").to("W1").ship("MV-2"),
    )
    .await?;

    // The older dispatch loses its row; the next entry settles the younger one.
    sqlx::query("delete from reconciliation_records where dispatch_movement_id = $1")
        .bind(d1.movement.id)
        .execute(&pool)
        .await?;
    let e = record(
        &pool,
        MovementDraft::new(MovementKind::Entry, &p, Qty::tonnes(90), Utc::now(), "").to("W1"),
    )
    .await?;
    assert_eq!(
        e.reconciliation.map(|r| r.dispatch_movement_id),
        Some(d2.movement.id)
    );

    let repair = msk_db::repair_reconciliation(&pool).await?;
    let ours: Vec<_> = repair.rewritten.iter().filter(|r| r.product_id == p).collect();
    assert_eq!(ours.len(), 2);

    let stored = msk_db::fetch_reconciliation_records(&pool).await?;
    let first = stored.iter().find(|r| r.dispatch_movement_id == d1.movement.id).expect("row restored");
    assert_eq!(first.status, ReconciliationStatus::Shortfall);
    assert_eq!(first.entry_movement_id, Some(e.movement.id));
    assert_eq!(first.variance, Some(Qty::tonnes(10)));
    let second = stored.iter().find(|r| r.dispatch_movement_id == d2.movement.id).expect("row kept");
    assert_eq!(second.status, ReconciliationStatus::Pending);
    assert_eq!(second.entry_movement_id, None);

    // A second pass finds nothing left to rewrite for this product.
    let again = msk_db::repair_reconciliation(&pool).await?;
    assert!(again.rewritten.iter().all(|r| r.product_id != p));
    Ok(())
}

#[tokio::test]
#[ignore = "requires MSK_DATABASE_URL"]
async fn drifted_stock_level_is_reported() -> anyhow::Result<()> {
    let pool = pool().await?;
    let p = product();
    let key = StockKey::new(&p, "W1");
    record(
        &pool,
        MovementDraft::new(MovementKind::Entry, &p, Qty::tonnes(12), Utc::now(), "").to("W1"),
    )
    .await?;

    let check = msk_db::verify_stock_levels(&pool).await?;
    assert!(check.mismatches.iter().all(|m| m.key != key));

    sqlx::query("update stock_levels set quantity = quantity + 1 where product_id = $1")
        .bind(&p)
        .execute(&pool)
        .await?;
    let check = msk_db::verify_stock_levels(&pool).await?;
    let m = check.mismatches.iter().find(|m| m.key == key).expect("drift reported");
    assert_eq!(m.stored, Qty::new(12_000_001));
    assert_eq!(m.replayed, Qty::tonnes(12));
    assert!(!check.is_ok());

    sqlx::query("update stock_levels set quantity = quantity - 1 where product_id = $1")
        .bind(&p)
        .execute(&pool)
        .await?;
    let check = msk_db::verify_stock_levels(&pool).await?;
    assert!(check.mismatches.iter().all(|m| m.key != key));
    Ok(())
}
