//! Deletes activity records older than the retention window.
//!
//! Run daily from cron or a scheduler:
//! `activity_log_clean --days 90`

use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use schoolhub_backend::{
    config::{Config, MAX_ACTIVITY_LOG_RETENTION_DAYS},
    db::connection::create_pool,
    repositories::PgActivityLogStore,
    services::ActivityLogService,
};

#[derive(Debug, Parser)]
#[command(name = "activity_log_clean", about = "Prune old activity log records")]
struct Args {
    /// Delete records older than this many days. Defaults to
    /// ACTIVITY_LOG_RETENTION_DAYS.
    #[arg(long, value_parser = clap::value_parser!(i64).range(1..=MAX_ACTIVITY_LOG_RETENTION_DAYS))]
    days: Option<i64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "activity_log_clean=info,schoolhub_backend=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let config = Config::load()?;
    let days = args.days.unwrap_or(config.activity_log_retention_days);

    let pool = create_pool(&config.database_url).await?;
    let service = ActivityLogService::new(Arc::new(PgActivityLogStore::new(pool)));

    println!("Cleaning activity logs older than {} days...", days);
    let deleted = service.clean_old_activities(days).await?;
    println!("Deleted {} old activity log records.", deleted);
    println!("Activity log cleanup completed.");

    Ok(())
}
