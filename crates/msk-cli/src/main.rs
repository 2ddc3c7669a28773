mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::ledger::LedgerCmd;
use commands::movement::MovementCmd;
use commands::report::ReportCmd;
use commands::stock::StockCmd;
use commands::ActorArgs;

#[derive(Parser)]
#[command(name = "msk")]
#[command(about = "Maritime stock ledger CLI", long_about = None)]
struct Cli {
    /// Layered config paths in merge order (base -> site -> overrides)
    #[arg(long = "config", global = true)]
    config: Vec<String>,

    #[command(flatten)]
    actor: ActorArgs,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Record and list movements
    Movement {
        #[command(subcommand)]
        cmd: MovementCmd,
    },

    /// Stock levels
    Stock {
        #[command(subcommand)]
        cmd: StockCmd,
    },

    /// Reconciliation and movement reports
    Report {
        #[command(subcommand)]
        cmd: ReportCmd,
    },

    /// Ledger integrity
    Ledger {
        #[command(subcommand)]
        cmd: LedgerCmd,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,

    /// Apply SQL migrations.
    Migrate,

    /// Rewrite reconciliation records that drifted from the ledger.
    Reconcile,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env.local if present (dev convenience).
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let cli = Cli::parse();
    let actor = cli.actor.actor();

    match cli.cmd {
        Commands::Db { cmd } => {
            let settings = commands::load_settings(&cli.config)?;
            let pool = msk_db::connect_from_env_var(&settings.database_url_env).await?;
            match cmd {
                DbCmd::Status => {
                    let s = msk_db::status(&pool).await?;
                    println!("db_ok={} has_movements_table={}", s.ok, s.has_movements_table);
                }
                DbCmd::Migrate => {
                    msk_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
                DbCmd::Reconcile => {
                    let repair = msk_db::repair_reconciliation(&pool).await?;
                    println!(
                        "reconciliation_records={} rewritten={}",
                        repair.records.len(),
                        repair.rewritten.len()
                    );
                }
            }
        }

        Commands::ConfigHash { paths } => {
            let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
            let loaded = msk_config::load_layered_yaml(&path_refs)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::Movement { cmd } => {
            let settings = commands::load_settings(&cli.config)?;
            commands::movement::run(cmd, &actor, &settings).await?;
        }

        Commands::Stock { cmd } => {
            let settings = commands::load_settings(&cli.config)?;
            commands::stock::run(cmd, &actor, &settings).await?;
        }

        Commands::Report { cmd } => {
            let settings = commands::load_settings(&cli.config)?;
            commands::report::run(cmd, &actor, &settings).await?;
        }

        Commands::Ledger { cmd } => {
            let settings = commands::load_settings(&cli.config)?;
            commands::ledger::run(cmd, &settings).await?;
        }
    }

    Ok(())
}

/// Logs go to stderr; stdout carries command output only.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}
