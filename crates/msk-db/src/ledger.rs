//! Ledger writes and reads.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use msk_engine::{
    Actor, EngineError, InMemoryStore, MovementStore, ServiceOptions, Submission, SubmissionPolicy,
};
use msk_ledger::{
    plan, validate, Movement, MovementDraft, MovementKind, MovementRecord, Qty, StockKey,
    StockLevels,
};
use msk_reconcile::{ReconciliationRecord, ReconciliationStatus};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgExecutor, PgPool, Row};
use uuid::Uuid;

/// SQLSTATEs that mean "someone else holds what you need, try again":
/// serialization_failure, deadlock_detected, lock_not_available.
const CONFLICT_CODES: &[&str] = &["40001", "40P01", "55P03"];

fn classify(err: sqlx::Error, keys: &[StockKey]) -> EngineError {
    if let sqlx::Error::Database(db_err) = &err {
        if let Some(code) = db_err.code() {
            if CONFLICT_CODES.iter().any(|c| code == *c) {
                let key = keys
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(",");
                return EngineError::ConcurrencyConflict { key };
            }
        }
    }
    EngineError::PersistenceFailure(err.to_string())
}

fn micro(q: Qty) -> i64 {
    q.raw()
}

fn seq_no_from_db(v: i64) -> Result<u64, EngineError> {
    u64::try_from(v).map_err(|_| EngineError::PersistenceFailure(format!("negative seq_no {v}")))
}

// ---------------------------------------------------------------------------
// Write path
// ---------------------------------------------------------------------------

/// Validate, authorize and record one movement in a single transaction.
///
/// Inside the transaction: touched level rows are locked `FOR UPDATE` in
/// ascending key order, level changes are planned under
/// `options.overdraw_policy`, then the movement row and the new levels are
/// written.  Reconciliation runs in a savepoint: if it fails the savepoint
/// is rolled back, the movement still commits, and the records are then
/// repaired from the ledger with [`crate::repair_reconciliation`].  A failed
/// repair is logged; the next repair catches up.
///
/// Lock waits are bounded by `options.lock_timeout`; timeouts, deadlocks
/// and serialization failures surface as
/// [`EngineError::ConcurrencyConflict`].
pub async fn record_movement<P: SubmissionPolicy>(
    pool: &PgPool,
    policy: &P,
    actor: &Actor,
    mut draft: MovementDraft,
    options: &ServiceOptions,
) -> Result<Submission, EngineError> {
    draft.created_by = actor.user_id.clone();
    let body = validate(draft)?;
    policy
        .authorize(actor, &body)
        .map_err(|reason| EngineError::Unauthorized { reason })?;

    let keys = body.keys();
    let fail = |e: sqlx::Error| classify(e, &keys);

    let mut tx = pool.begin().await.map_err(fail)?;

    let timeout_ms = options.lock_timeout.as_millis();
    sqlx::query(&format!("set local lock_timeout = '{timeout_ms}ms'"))
        .execute(&mut *tx)
        .await
        .map_err(fail)?;

    let mut current = StockLevels::new();
    for key in &keys {
        sqlx::query(
            r#"
            insert into stock_levels (product_id, warehouse_id)
            values ($1, $2)
            on conflict (product_id, warehouse_id) do nothing
            "#,
        )
        .bind(&key.product_id)
        .bind(&key.warehouse_id)
        .execute(&mut *tx)
        .await
        .map_err(fail)?;

        let q: i64 = sqlx::query_scalar(
            r#"
            select quantity from stock_levels
            where product_id = $1 and warehouse_id = $2
            for update
            "#,
        )
        .bind(&key.product_id)
        .bind(&key.warehouse_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(fail)?;
        current.set(key.clone(), Qty::new(q));
    }

    let changes = plan(&body, |k| current.get(k), options.overdraw_policy)?;

    let id = Uuid::new_v4();
    let d = body.draft();
    let seq_no: i64 = sqlx::query_scalar(
        r#"
        insert into movements (
          movement_id, kind, product_id, source_warehouse_id, destination_warehouse_id,
          quantity, direction, document_reference, occurred_at, created_by, ship_id, notes
        ) values (
          $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12
        )
        returning seq_no
        "#,
    )
    .bind(id)
    .bind(d.kind.as_str())
    .bind(&d.product_id)
    .bind(d.source_warehouse_id.as_deref())
    .bind(d.destination_warehouse_id.as_deref())
    .bind(micro(d.quantity))
    .bind(d.direction.as_str())
    .bind(&d.document_reference)
    .bind(d.occurred_at)
    .bind(&d.created_by)
    .bind(d.ship_id.as_deref())
    .bind(d.notes.as_deref())
    .fetch_one(&mut *tx)
    .await
    .map_err(fail)?;

    for c in &changes {
        sqlx::query(
            r#"
            update stock_levels
            set quantity = $3, updated_at = now()
            where product_id = $1 and warehouse_id = $2
            "#,
        )
        .bind(&c.key.product_id)
        .bind(&c.key.warehouse_id)
        .bind(micro(c.after))
        .execute(&mut *tx)
        .await
        .map_err(fail)?;
    }

    let movement = Movement::new(id, seq_no_from_db(seq_no)?, body);

    sqlx::query("savepoint reconcile")
        .execute(&mut *tx)
        .await
        .map_err(fail)?;
    let reconciled = match reconcile(&mut tx, &movement).await {
        Ok(r) => {
            sqlx::query("release savepoint reconcile")
                .execute(&mut *tx)
                .await
                .map_err(fail)?;
            Some(r)
        }
        Err(e) => {
            tracing::warn!(movement_id = %movement.id, error = %format!("{e:#}"), "reconciliation write failed; movement kept");
            sqlx::query("rollback to savepoint reconcile")
                .execute(&mut *tx)
                .await
                .map_err(fail)?;
            None
        }
    };

    tx.commit().await.map_err(fail)?;

    let reconciliation = match reconciled {
        Some(r) => r,
        None => match crate::repair_reconciliation(pool).await {
            Ok(repair) => repair.record_for(movement.id).cloned(),
            Err(e) => {
                tracing::warn!(movement_id = %movement.id, error = %format!("{e:#}"), "reconciliation repair failed; records stale until next repair");
                None
            }
        },
    };

    tracing::info!(
        movement_id = %movement.id,
        seq_no = movement.seq_no,
        kind = %movement.kind(),
        product = %movement.product_id(),
        quantity = %movement.quantity(),
        "movement recorded (postgres)"
    );

    Ok(Submission {
        movement,
        level_changes: changes,
        reconciliation,
    })
}

/// Open (dispatch) or settle (entry, oldest pending first) a record.
async fn reconcile(conn: &mut PgConnection, m: &Movement) -> Result<Option<ReconciliationRecord>> {
    match m.kind() {
        MovementKind::Dispatch => {
            let Some(rec) = ReconciliationRecord::open(m) else {
                return Ok(None);
            };
            upsert_record(conn, &rec).await?;
            Ok(Some(rec))
        }
        MovementKind::Entry => {
            let Some(warehouse) = m.body().receiving_warehouse() else {
                return Ok(None);
            };
            let row = sqlx::query(
                r#"
                select * from reconciliation_records
                where product_id = $1 and warehouse_id = $2 and status = 'pending'
                order by dispatch_seq_no
                limit 1
                for update
                "#,
            )
            .bind(m.product_id())
            .bind(warehouse)
            .fetch_optional(&mut *conn)
            .await
            .context("select oldest pending dispatch failed")?;

            let Some(row) = row else {
                return Ok(None);
            };
            let settled = record_from_row(&row)?.settle(m);
            upsert_record(conn, &settled).await?;
            Ok(Some(settled))
        }
        MovementKind::Exit | MovementKind::Transfer | MovementKind::Adjustment => Ok(None),
    }
}

pub(crate) async fn upsert_record(conn: &mut PgConnection, r: &ReconciliationRecord) -> Result<()> {
    sqlx::query(
        r#"
        insert into reconciliation_records (
          dispatch_movement_id, dispatch_seq_no, product_id, warehouse_id, ship_id,
          dispatched_at, dispatched_quantity, entry_movement_id, received_at,
          received_quantity, variance, status
        ) values (
          $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12
        )
        on conflict (dispatch_movement_id) do update set
          entry_movement_id = excluded.entry_movement_id,
          received_at = excluded.received_at,
          received_quantity = excluded.received_quantity,
          variance = excluded.variance,
          status = excluded.status
        "#,
    )
    .bind(r.dispatch_movement_id)
    .bind(i64::try_from(r.dispatch_seq_no).context("dispatch_seq_no out of range")?)
    .bind(&r.product_id)
    .bind(&r.warehouse_id)
    .bind(r.ship_id.as_deref())
    .bind(r.dispatched_at)
    .bind(micro(r.dispatched_quantity))
    .bind(r.entry_movement_id)
    .bind(r.received_at)
    .bind(r.received_quantity.map(micro))
    .bind(r.variance.map(micro))
    .bind(r.status.as_str())
    .execute(conn)
    .await
    .context("upsert reconciliation record failed")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Read path
// ---------------------------------------------------------------------------

fn record_from_row(row: &PgRow) -> Result<ReconciliationRecord> {
    let status: String = row.try_get("status")?;
    Ok(ReconciliationRecord {
        dispatch_movement_id: row.try_get("dispatch_movement_id")?,
        dispatch_seq_no: u64::try_from(row.try_get::<i64, _>("dispatch_seq_no")?)
            .context("negative dispatch_seq_no")?,
        product_id: row.try_get("product_id")?,
        warehouse_id: row.try_get("warehouse_id")?,
        ship_id: row.try_get("ship_id")?,
        dispatched_at: row.try_get("dispatched_at")?,
        dispatched_quantity: Qty::new(row.try_get("dispatched_quantity")?),
        entry_movement_id: row.try_get("entry_movement_id")?,
        received_at: row.try_get::<Option<DateTime<Utc>>, _>("received_at")?,
        received_quantity: row.try_get::<Option<i64>, _>("received_quantity")?.map(Qty::new),
        variance: row.try_get::<Option<i64>, _>("variance")?.map(Qty::new),
        status: status
            .parse::<ReconciliationStatus>()
            .map_err(|e| anyhow!(e))?,
    })
}

fn movement_from_row(row: &PgRow) -> Result<Movement> {
    let kind: String = row.try_get("kind")?;
    let direction: String = row.try_get("direction")?;
    let id: Uuid = row.try_get("movement_id")?;

    let record = MovementRecord {
        id,
        seq_no: u64::try_from(row.try_get::<i64, _>("seq_no")?).context("negative seq_no")?,
        draft: MovementDraft {
            kind: kind.parse().map_err(|e: String| anyhow!(e))?,
            product_id: row.try_get("product_id")?,
            source_warehouse_id: row.try_get("source_warehouse_id")?,
            destination_warehouse_id: row.try_get("destination_warehouse_id")?,
            quantity: Qty::new(row.try_get("quantity")?),
            direction: direction.parse().map_err(|e: String| anyhow!(e))?,
            document_reference: row.try_get("document_reference")?,
            occurred_at: row.try_get("occurred_at")?,
            created_by: row.try_get("created_by")?,
            ship_id: row.try_get("ship_id")?,
            notes: row.try_get("notes")?,
        },
    };
    record
        .into_movement()
        .with_context(|| format!("stored movement {id} no longer validates"))
}

/// The whole ledger in `seq_no` order.
pub async fn fetch_movements<'e, E: PgExecutor<'e>>(db: E) -> Result<Vec<Movement>> {
    let rows = sqlx::query("select * from movements order by seq_no")
        .fetch_all(db)
        .await
        .context("fetch_movements failed")?;
    rows.iter().map(movement_from_row).collect()
}

pub async fn fetch_stock_levels<'e, E: PgExecutor<'e>>(db: E) -> Result<StockLevels> {
    let rows: Vec<(String, String, i64)> = sqlx::query_as(
        "select product_id, warehouse_id, quantity from stock_levels order by product_id, warehouse_id",
    )
    .fetch_all(db)
    .await
    .context("fetch_stock_levels failed")?;

    Ok(rows
        .into_iter()
        .map(|(p, w, q)| (StockKey::new(p, w), Qty::new(q)))
        .collect())
}

/// Records in dispatch order.
pub async fn fetch_reconciliation_records<'e, E: PgExecutor<'e>>(db: E) -> Result<Vec<ReconciliationRecord>> {
    let rows = sqlx::query("select * from reconciliation_records order by dispatch_seq_no")
        .fetch_all(db)
        .await
        .context("fetch_reconciliation_records failed")?;
    rows.iter().map(record_from_row).collect()
}

/// Snapshot the database into an [`InMemoryStore`] for reporting.
///
/// Levels are rebuilt by replaying the ledger; the stored reconciliation
/// rows are carried over as-is.
pub async fn load_store(pool: &PgPool) -> Result<InMemoryStore> {
    let movements = fetch_movements(pool).await?;
    let store = InMemoryStore::from_movements(movements).map_err(|e| anyhow!("replay: {e}"))?;
    for r in fetch_reconciliation_records(pool).await? {
        store
            .save_reconciliation(&r)
            .map_err(|e| anyhow!("restore reconciliation record: {e}"))?;
    }
    Ok(store)
}
