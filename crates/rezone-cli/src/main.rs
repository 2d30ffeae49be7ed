use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use rezone_core::{RecordType, ZoningStatus};
use rezone_storage::{RecordsFilter, Tier, TypeFilter};
use rezone_sync::{building_type_breakdown, date_field_for_status, SyncConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "rezone-cli")]
#[command(about = "Planning record reconciliation command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Reconcile extraction bundles into the working tier.
    Sync,
    /// Snapshot the working tier; a draft check-in also publishes it as final.
    CheckIn,
    /// Print the per-year building type breakdown of the final tier as JSON.
    Analytics {
        #[arg(long, default_value = "rezoning")]
        record_type: RecordType,
        #[arg(long, default_value = "applied")]
        status: ZoningStatus,
    },
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("rezone=info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let summary = rezone_sync::run_sync_once_from_env().await?;
            println!(
                "sync complete: run_id={} cities={} bundles={} created={} merged={} failed={} review={} reports={}",
                summary.run_id,
                summary.enabled_cities,
                summary.bundles,
                summary.created,
                summary.merged,
                summary.failed,
                summary.review,
                summary.reports_dir
            );
        }
        Commands::CheckIn => {
            let entry = SyncConfig::from_env().repository().final_check_in().await?;
            println!(
                "checked in {} records from {}: {} (sha256 {})",
                entry.records, entry.tier, entry.snapshot_path, entry.sha256
            );
            if let Some(target) = entry.promoted_to {
                println!("promoted to {target}");
            }
        }
        Commands::Analytics {
            record_type,
            status,
        } => {
            let date_field = date_field_for_status(status)
                .ok_or_else(|| anyhow!("status `{status}` has no milestone date"))?;
            let records = SyncConfig::from_env()
                .repository_for(Tier::Final)
                .get_records(TypeFilter::Only(record_type), &RecordsFilter::default())
                .await?
                .data;
            info!(%record_type, %status, records = records.len(), "building type breakdown");
            let data = building_type_breakdown(&records, date_field, status);
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({ "data": data }))?
            );
        }
        Commands::Serve => {
            rezone_web::serve_from_env().await?;
        }
    }

    Ok(())
}
