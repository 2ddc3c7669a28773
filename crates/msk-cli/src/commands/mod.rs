//! Command handler modules for msk-cli.
//!
//! Shared utilities used by multiple command paths live here.
//! Command-specific logic lives in the submodules.

pub mod ledger;
pub mod movement;
pub mod report;
pub mod stock;

use anyhow::{bail, Context, Result};
use clap::Args;
use msk_config::{report_unused_keys, EngineSettings, UnusedKeyPolicy};
use msk_engine::{Actor, MovementStore, Role, RolePolicy, StockService};
use msk_journal::JournalStore;
use serde::Serialize;
use std::path::PathBuf;

pub type Service = StockService<Box<dyn MovementStore>, RolePolicy>;

/// Where the ledger lives.
#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    /// Hash-chained JSONL journal file (created on first write)
    #[arg(long, conflicts_with = "db", required_unless_present = "db")]
    pub journal: Option<PathBuf>,

    /// Use Postgres (env var named by /database/url_env)
    #[arg(long, default_value_t = false)]
    pub db: bool,
}

/// Who is acting.
#[derive(Args, Debug, Clone)]
pub struct ActorArgs {
    /// User id stamped on recorded movements
    #[arg(long = "user", global = true, default_value = "cli")]
    pub user: String,

    /// operator | manager | admin | super_admin
    #[arg(long = "role", global = true, default_value = "manager")]
    pub role: Role,

    /// Home warehouse (required for operators)
    #[arg(long = "home-warehouse", global = true)]
    pub home_warehouse: Option<String>,
}

impl ActorArgs {
    pub fn actor(&self) -> Actor {
        Actor {
            user_id: self.user.clone(),
            role: self.role,
            warehouse_id: self.home_warehouse.clone(),
        }
    }
}

/// Load layered config (if any) into typed settings.  Unused keys are
/// logged, not fatal.
pub fn load_settings(config_paths: &[String]) -> Result<EngineSettings> {
    if config_paths.is_empty() {
        return Ok(EngineSettings::default());
    }
    let refs: Vec<&str> = config_paths.iter().map(|s| s.as_str()).collect();
    let loaded = msk_config::load_layered_yaml(&refs)?;

    let report = report_unused_keys(&loaded.config_json, UnusedKeyPolicy::Warn)?;
    for ptr in &report.unused_leaf_pointers {
        tracing::warn!(pointer = %ptr, "unused config key");
    }
    tracing::debug!(config_hash = %loaded.config_hash, "config loaded");
    loaded.settings()
}

/// Open a service over the journal, or over a snapshot of the database.
///
/// Database snapshots are read-only views: writes go through
/// `msk_db::record_movement`.
pub async fn open_service(source: &SourceArgs, settings: &EngineSettings) -> Result<Service> {
    let store: Box<dyn MovementStore> = match (&source.journal, source.db) {
        (Some(path), false) => Box::new(
            JournalStore::open(path).with_context(|| format!("open journal {}", path.display()))?,
        ),
        (None, true) => {
            let pool = msk_db::connect_from_env_var(&settings.database_url_env).await?;
            Box::new(msk_db::load_store(&pool).await?)
        }
        _ => bail!("pass exactly one of --journal <path> or --db"),
    };

    let svc = StockService::new(store, RolePolicy, settings.service_options())?;
    if source.journal.is_some() && svc.pending_retries().await > 0 {
        let out = svc.retry_pending_reconciliation().await;
        tracing::info!(
            saved = out.saved,
            requeued = out.requeued,
            dead_lettered = out.dead_lettered,
            "reconciliation records caught up"
        );
    }
    Ok(svc)
}

pub fn print_json<T: Serialize>(v: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(v).context("json stringify failed")?
    );
    Ok(())
}
