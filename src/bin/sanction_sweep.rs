//! Nightly job: activates embargoes and registration approvals whose pending
//! window elapsed, and makes registrations public once their embargo ends.

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sanction_workflow::{HandlerRegistry, Settings, Store, Sweeper};

#[derive(Parser, Debug)]
#[command(name = "sanction-sweep", about = "Promote or complete pending sanctions")]
struct Args {
    /// Log what would change without writing anything
    #[arg(long)]
    dry_run: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sanction_workflow=info,sanction_sweep=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::load().context("failed to load configuration")?;
    let store = Store::open(&settings.database.path)?;
    let registry = HandlerRegistry::with_defaults();

    info!(dry_run = args.dry_run, db = %settings.database.path, "starting sanction sweep");

    let sweeper = Sweeper::new(&store, &registry, settings.pending_approval_window());
    // per-item failures are logged by the sweeper and do not fail the run
    let report = sweeper.run(Utc::now(), args.dry_run)?;
    store.flush()?;

    info!(?report, "done");
    Ok(())
}
