//! `msk report ...`

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Args, Subcommand};
use msk_config::EngineSettings;
use msk_engine::Actor;
use msk_report::{DateRange, VarianceFilter};

use super::{open_service, print_json, SourceArgs};

#[derive(Args, Debug, Clone)]
pub struct RangeArgs {
    /// First day (inclusive), YYYY-MM-DD
    #[arg(long = "since", alias = "from")]
    pub since: Option<NaiveDate>,

    /// Last day (inclusive), YYYY-MM-DD
    #[arg(long = "until", alias = "to")]
    pub until: Option<NaiveDate>,
}

impl RangeArgs {
    fn range(&self) -> DateRange {
        DateRange {
            from: self.since,
            to: self.until,
        }
    }
}

#[derive(Subcommand)]
pub enum ReportCmd {
    /// Dispatch-versus-entry variance, one row per dispatch.
    Variance {
        #[command(flatten)]
        source: SourceArgs,

        #[command(flatten)]
        range: RangeArgs,

        #[arg(long)]
        warehouse: Option<String>,

        /// all | shortfall | excess | pending
        #[arg(long, default_value = "all")]
        filter: VarianceFilter,
    },

    /// Per-day dispatched / entered / exited totals.
    Daily {
        #[command(flatten)]
        source: SourceArgs,

        #[command(flatten)]
        range: RangeArgs,

        #[arg(long)]
        warehouse: Option<String>,
    },

    /// Dispatches still waiting for their entry.
    Pending {
        #[command(flatten)]
        source: SourceArgs,

        #[arg(long)]
        warehouse: Option<String>,
    },
}

pub async fn run(cmd: ReportCmd, actor: &Actor, settings: &EngineSettings) -> Result<()> {
    match cmd {
        ReportCmd::Variance {
            source,
            range,
            warehouse,
            filter,
        } => {
            let svc = open_service(&source, settings).await?;
            let report = svc
                .variance_report(actor, range.range(), warehouse.as_deref(), filter)
                .await;
            print_json(&report)
        }

        ReportCmd::Daily {
            source,
            range,
            warehouse,
        } => {
            let svc = open_service(&source, settings).await?;
            print_json(&svc.daily_dispatch_vs_entries(actor, range.range(), warehouse.as_deref())?)
        }

        ReportCmd::Pending { source, warehouse } => {
            let svc = open_service(&source, settings).await?;
            print_json(&svc.pending_dispatches(actor, warehouse.as_deref()).await)
        }
    }
}
