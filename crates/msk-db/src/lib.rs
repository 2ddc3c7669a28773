//! msk-db
//!
//! PostgreSQL persistence for the stock ledger.
//! - `movements`: append-only ledger (trigger-enforced), `seq_no` identity
//! - `stock_levels`: one row per `(product, warehouse)`, never negative
//! - `reconciliation_records`: one row per dispatch
//!
//! Quantities are stored as BIGINT micro-tonnes, the raw value of `Qty`.

mod integrity;
mod ledger;

pub use integrity::{
    repair_reconciliation, verify_stock_levels, LevelCheck, LevelMismatch, ReconcileRepair,
};
pub use ledger::{
    fetch_movements, fetch_reconciliation_records, fetch_stock_levels, load_store,
    record_movement,
};

use anyhow::{Context, Result};
use sqlx::{postgres::PgPoolOptions, PgPool};

pub const ENV_DB_URL: &str = "MSK_DATABASE_URL";

/// Connect to Postgres using `MSK_DATABASE_URL`.
pub async fn connect_from_env() -> Result<PgPool> {
    connect_from_env_var(ENV_DB_URL).await
}

/// Connect using the URL held in env var `name`.
pub async fn connect_from_env_var(name: &str) -> Result<PgPool> {
    let url = std::env::var(name).with_context(|| format!("missing env var {name}"))?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .context("failed to connect to Postgres")?;

    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_movements_table: bool,
}

/// Connectivity + schema presence.
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='movements'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok: one == 1,
        has_movements_table: exists,
    })
}
