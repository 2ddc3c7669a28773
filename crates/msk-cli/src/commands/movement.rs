//! `msk movement ...`

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Args, Subcommand};
use msk_config::EngineSettings;
use msk_engine::{Actor, RolePolicy, Submission};
use msk_ledger::{MovementDraft, MovementKind, Qty};
use msk_report::{DateRange, HistoryQuery, DEFAULT_HISTORY_LIMIT};
use serde_json::json;

use super::{open_service, print_json, SourceArgs};

#[derive(Subcommand)]
pub enum MovementCmd {
    /// Validate, apply and append one movement.
    Record(RecordArgs),

    /// List movements, newest first.
    History(HistoryArgs),
}

#[derive(Args)]
pub struct RecordArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// entry | exit | transfer | adjustment | dispatch
    #[arg(long)]
    pub kind: MovementKind,

    #[arg(long)]
    pub product: String,

    /// Tonnes, up to 6 decimals
    #[arg(long)]
    pub quantity: Qty,

    /// Source warehouse
    #[arg(long = "from")]
    pub source_warehouse: Option<String>,

    /// Destination warehouse
    #[arg(long = "to")]
    pub destination_warehouse: Option<String>,

    /// Ship id (required for dispatch)
    #[arg(long)]
    pub ship: Option<String>,

    #[arg(long, default_value = "")]
    pub reference: String,

    #[arg(long)]
    pub notes: Option<String>,

    /// Adjustment lowers the level
    #[arg(long, default_value_t = false)]
    pub decrease: bool,

    /// RFC 3339 timestamp; defaults to now
    #[arg(long)]
    pub occurred_at: Option<DateTime<Utc>>,
}

impl RecordArgs {
    fn draft(&self) -> MovementDraft {
        let mut d = MovementDraft::new(
            self.kind,
            self.product.clone(),
            self.quantity,
            self.occurred_at.unwrap_or_else(Utc::now),
            String::new(),
        )
        .reference(self.reference.clone());
        d.source_warehouse_id = self.source_warehouse.clone();
        d.destination_warehouse_id = self.destination_warehouse.clone();
        d.ship_id = self.ship.clone();
        d.notes = self.notes.clone();
        if self.decrease {
            d = d.decrease();
        }
        d
    }
}

#[derive(Args)]
pub struct HistoryArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    #[arg(long)]
    pub warehouse: Option<String>,

    #[arg(long)]
    pub kind: Option<MovementKind>,

    #[arg(long)]
    pub product: Option<String>,

    /// First day (inclusive), YYYY-MM-DD
    #[arg(long = "since")]
    pub since: Option<NaiveDate>,

    /// Last day (inclusive), YYYY-MM-DD
    #[arg(long = "until")]
    pub until: Option<NaiveDate>,

    #[arg(long, default_value_t = DEFAULT_HISTORY_LIMIT)]
    pub limit: usize,
}

pub async fn run(cmd: MovementCmd, actor: &Actor, settings: &EngineSettings) -> Result<()> {
    match cmd {
        MovementCmd::Record(args) => {
            let draft = args.draft();
            let sub = if args.source.db {
                let pool = msk_db::connect_from_env_var(&settings.database_url_env).await?;
                msk_db::record_movement(&pool, &RolePolicy, actor, draft, &settings.service_options())
                    .await?
            } else {
                let svc = open_service(&args.source, settings).await?;
                svc.submit(actor, draft).await?
            };
            print_submission(&sub)
        }

        MovementCmd::History(args) => {
            let svc = open_service(&args.source, settings).await?;
            let mut query = HistoryQuery::default()
                .range(DateRange {
                    from: args.since,
                    to: args.until,
                })
                .limit(args.limit);
            if let Some(w) = args.warehouse {
                query = query.warehouse(w);
            }
            if let Some(k) = args.kind {
                query = query.kind(k);
            }
            if let Some(p) = args.product {
                query = query.product(p);
            }
            print_json(&svc.movement_history(actor, query)?)
        }
    }
}

pub fn print_submission(sub: &Submission) -> Result<()> {
    print_json(&json!({
        "movement": sub.movement.to_record(),
        "level_changes": sub.level_changes,
        "reconciliation": sub.reconciliation,
    }))
}
