//! `msk ledger ...`

use anyhow::{bail, Result};
use clap::Subcommand;
use msk_config::EngineSettings;
use msk_journal::VerifyResult;
use std::path::Path;

use super::{open_service, SourceArgs};

#[derive(Subcommand)]
pub enum LedgerCmd {
    /// Journal: check the hash chain, then replay it against the levels.
    /// Database: replay `movements` against the `stock_levels` table.
    Verify {
        #[command(flatten)]
        source: SourceArgs,
    },
}

pub async fn run(cmd: LedgerCmd, settings: &EngineSettings) -> Result<()> {
    match cmd {
        LedgerCmd::Verify { source } => match &source.journal {
            Some(journal) => verify_journal(journal, &source, settings).await,
            None => verify_db(settings).await,
        },
    }
}

async fn verify_journal(journal: &Path, source: &SourceArgs, settings: &EngineSettings) -> Result<()> {
    match msk_journal::verify_chain(journal)? {
        VerifyResult::Valid { lines } => {
            println!("chain_ok=true lines={lines}");
        }
        VerifyResult::Broken { line, reason } => {
            println!("chain_ok=false line={line}");
            bail!("journal chain broken at line {line}: {reason}");
        }
    }

    let svc = open_service(source, settings).await?;
    let ok = svc.verify_integrity()?;
    println!("replay_ok={ok}");
    if !ok {
        bail!("stock levels diverge from ledger replay");
    }
    Ok(())
}

async fn verify_db(settings: &EngineSettings) -> Result<()> {
    let pool = msk_db::connect_from_env_var(&settings.database_url_env).await?;
    let check = msk_db::verify_stock_levels(&pool).await?;
    println!("levels_ok={} movements={}", check.is_ok(), check.movements);
    for m in &check.mismatches {
        println!("mismatch key={} stored={} replayed={}", m.key, m.stored, m.replayed);
    }
    if !check.is_ok() {
        bail!("{} stock level(s) diverge from ledger replay", check.mismatches.len());
    }
    Ok(())
}
