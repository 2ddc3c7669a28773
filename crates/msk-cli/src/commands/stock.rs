//! `msk stock ...`

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Subcommand};
use msk_config::EngineSettings;
use msk_engine::{Actor, MovementStore};
use msk_ledger::Qty;

use super::movement::print_submission;
use super::{open_service, print_json, SourceArgs};

#[derive(Subcommand)]
pub enum StockCmd {
    /// Current levels, one row per (product, warehouse).
    Summary {
        #[command(flatten)]
        source: SourceArgs,

        #[arg(long)]
        warehouse: Option<String>,
    },

    /// Per-warehouse product count and total tonnage.
    Totals {
        #[command(flatten)]
        source: SourceArgs,
    },

    /// Levels at or below a threshold, lowest first.
    Alerts {
        #[command(flatten)]
        source: SourceArgs,

        /// Tonnes; defaults to /stock/low_stock_threshold
        #[arg(long)]
        threshold: Option<Qty>,

        #[arg(long)]
        warehouse: Option<String>,
    },

    /// Bring one level to a counted target with a compensating adjustment.
    Adjust(AdjustArgs),
}

#[derive(Args)]
pub struct AdjustArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    #[arg(long)]
    pub product: String,

    #[arg(long)]
    pub warehouse: String,

    /// Counted quantity in tonnes
    #[arg(long)]
    pub target: Qty,

    #[arg(long, default_value = "inventory count")]
    pub reason: String,

    #[arg(long)]
    pub occurred_at: Option<DateTime<Utc>>,
}

pub async fn run(cmd: StockCmd, actor: &Actor, settings: &EngineSettings) -> Result<()> {
    match cmd {
        StockCmd::Summary { source, warehouse } => {
            let svc = open_service(&source, settings).await?;
            print_json(&svc.stock_summary(actor, warehouse.as_deref())?)
        }

        StockCmd::Totals { source } => {
            let svc = open_service(&source, settings).await?;
            let levels = svc.store().levels()?;
            print_json(&msk_report::stock_totals_by_warehouse(&levels))
        }

        StockCmd::Alerts {
            source,
            threshold,
            warehouse,
        } => {
            let svc = open_service(&source, settings).await?;
            let threshold = threshold.unwrap_or(settings.low_stock_threshold);
            print_json(&svc.low_stock_alerts(actor, threshold, warehouse.as_deref())?)
        }

        StockCmd::Adjust(args) => {
            if args.source.db {
                bail!("stock adjust needs --journal; record an adjustment movement against --db instead");
            }
            let svc = open_service(&args.source, settings).await?;
            let occurred_at = args.occurred_at.unwrap_or_else(Utc::now);
            match svc
                .adjust_to(actor, &args.product, &args.warehouse, args.target, &args.reason, occurred_at)
                .await?
            {
                Some(sub) => print_submission(&sub),
                None => {
                    println!("adjusted=false reason=already_at_target");
                    Ok(())
                }
            }
        }
    }
}
