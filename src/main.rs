use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

use flowdesk::config::Config;
use flowdesk::logger;
use flowdesk::records::EntityType;
use flowdesk::sync::{MigrationProgress, MigrationSummary, ServiceStatus, SyncService, ValidationReport};

#[derive(Parser)]
#[command(name = "flowdesk")]
#[command(about = "Flowdesk storage tools: mode status, migration and local cache export")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to ./flowdesk.toml, then the XDG config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the storage mode and connectivity diagnostics
    Status {
        /// Print the status as JSON
        #[arg(long)]
        json: bool,
    },
    /// Migrate local records to the remote store
    Migrate {
        /// Only migrate this entity type (task, setting_set, session, achievement, streak_counter)
        #[arg(long)]
        entity: Option<EntityType>,
        /// Compare remote counts afterwards
        #[arg(long)]
        validate: bool,
    },
    /// Compare remote counts against the last migration
    Validate,
    /// Write a JSON snapshot of the local cache
    Export { path: PathBuf },
    /// Generate a default configuration file
    InitConfig { path: Option<PathBuf> },
}

/// Load the configuration, install logging and build the service.
async fn open_service(config_path: Option<&Path>) -> Result<SyncService> {
    let config = match config_path {
        Some(path) => Config::load_from_file(path)?,
        None => Config::load()?,
    };
    logger::init(&config.logging)?;
    SyncService::from_config(&config).await
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::InitConfig { path } => {
            let path = match path {
                Some(path) => path,
                None => Config::get_default_config_path()?,
            };
            Config::generate_default_config(&path)?;
        }
        Commands::Status { json } => {
            let service = open_service(config_path).await?;
            let status = service.status();
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print_status(&status);
            }
        }
        Commands::Migrate { entity, validate } => {
            let service = open_service(config_path).await?;
            let (tx, rx) = mpsc::unbounded_channel();
            let printer = tokio::spawn(print_progress(rx));
            let summary = service.migrate_with(entity, Some(tx), None).await?;
            printer.await.ok();

            print_summary(&summary);
            if validate {
                let report = service.validate_migration(&summary, None).await?;
                print_validation(&report);
            }
            if !summary.success {
                anyhow::bail!("Migration incomplete: {} records failed", summary.errors.len());
            }
        }
        Commands::Validate => {
            let service = open_service(config_path).await?;
            let summary = service
                .last_migration()
                .context("No migration has run yet, run `flowdesk migrate` first")?;
            let report = service.validate_migration(&summary, None).await?;
            print_validation(&report);
        }
        Commands::Export { path } => {
            let service = open_service(config_path).await?;
            let snapshot = service.local().export_snapshot()?;
            let content = serde_json::to_string_pretty(&snapshot)?;
            std::fs::write(&path, content)
                .with_context(|| format!("Failed to write snapshot: {}", path.display()))?;
            println!(
                "✅ Exported {} records to {}",
                snapshot.total_records(),
                path.display()
            );
        }
    }

    Ok(())
}

fn print_status(status: &ServiceStatus) {
    let mode = &status.mode;
    println!("Mode:                 {}", mode.current_mode);
    if let Some(forced) = mode.forced_mode {
        println!("Forced by config:     {forced}");
    }
    println!(
        "Remote backend:       {}",
        status.remote_backend.as_deref().unwrap_or("not configured")
    );
    println!("Online:               {}", mode.is_online);
    println!("Remote available:     {}", mode.availability.available);
    println!("Consecutive failures: {}", mode.consecutive_failures);
    println!("Reconnect attempts:   {}", mode.retry_attempts);
    println!("Fallback enabled:     {}", status.fallback_enabled);
    println!("Unsynced local writes: {}", mode.local_changes_pending);
    match mode.last_switch {
        Some(at) => println!("Last mode switch:     {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("Last mode switch:     never"),
    }
    if let Some(summary) = &status.last_migration {
        println!(
            "Last migration:       {} ({}/{} records)",
            summary.finished_at.format("%Y-%m-%d %H:%M:%S UTC"),
            summary.migrated_records,
            summary.total_records
        );
    }
    if status.degraded {
        println!("\n⚠️  Running on the local cache, changes will be migrated once the remote store is back");
    }
}

async fn print_progress(mut rx: mpsc::UnboundedReceiver<MigrationProgress>) {
    while let Some(progress) = rx.recv().await {
        let entity = progress.entity_type.map(|e| format!(" {e}")).unwrap_or_default();
        eprintln!(
            "[{}{}] {}/{} ({:.0}%), {} errors",
            progress.stage, entity, progress.completed, progress.total, progress.percentage, progress.errors
        );
    }
}

fn print_summary(summary: &MigrationSummary) {
    let icon = if summary.success { "✅" } else { "⚠️ " };
    println!(
        "{icon} Migrated {}/{} records in {} ms",
        summary.migrated_records, summary.total_records, summary.duration_ms
    );
    for counts in &summary.entity_counts {
        println!(
            "  {:<15} {:>5} migrated, {:>3} failed",
            counts.entity_type.as_str(),
            counts.migrated,
            counts.failed
        );
    }
    for error in &summary.errors {
        println!("  ❌ {} '{}': {}", error.entity_type, error.record_id, error.reason);
    }
    if summary.cancelled {
        println!("  Migration was cancelled before every record was attempted");
    }
}

fn print_validation(report: &ValidationReport) {
    if report.is_consistent() {
        println!("✅ Remote counts match the migrated snapshot");
        return;
    }
    for issue in &report.issues {
        println!(
            "  ⚠️  {}: local {}, remote {}: {}",
            issue.entity_type,
            issue.local_count,
            issue
                .remote_count
                .map(|count| count.to_string())
                .unwrap_or_else(|| "?".to_string()),
            issue.message
        );
    }
}
