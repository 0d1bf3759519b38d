use std::env;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use keel_core::config::SyncSettings;
use keel_core::sync::{CycleOutcome, HttpSyncTransport, SyncOrchestrator};

use crate::commands::common::{format_timestamp, open_store};
use crate::error::CliError;

pub async fn run_sync(endpoint_override: Option<&str>, db_path: &Path) -> Result<(), CliError> {
    let Ok(token) = env::var("KEEL_API_TOKEN") else {
        return Err(CliError::SyncNotConfigured);
    };
    if token.trim().is_empty() {
        return Err(CliError::SyncNotConfigured);
    }

    let mut settings = SyncSettings::from_env();
    if let Some(endpoint) = endpoint_override {
        settings.endpoint = endpoint.to_string();
    }

    let transport = HttpSyncTransport::new(
        &settings.endpoint,
        token,
        Duration::from_secs(settings.request_timeout_secs),
    )?;

    let store = open_store(db_path).await?;
    let orchestrator = SyncOrchestrator::new(store, Arc::new(transport), settings);

    match orchestrator.run_cycle().await? {
        CycleOutcome::Completed(summary) => {
            println!(
                "Sync completed: {} applied, {} failed, {} conflicts, {} pulled",
                summary.applied, summary.failed, summary.conflicts, summary.server_changes
            );
            if summary.conflicts > 0 {
                println!("Run `keel conflicts list` to review.");
            }
        }
        CycleOutcome::Coalesced => println!("Sync already in progress"),
    }
    Ok(())
}

pub async fn run_status(db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    let cursor = store.cursor().await?;
    let counts = store.outbox_counts().await?;
    let conflicts = store.list_conflicts().await?;

    println!("Device:        {}", cursor.device_id);
    match cursor.last_sync_timestamp {
        Some(ts) => println!("Last sync:     {}", format_timestamp(ts)),
        None => println!("Last sync:     never"),
    }
    if let Some(error) = cursor.last_error {
        println!("Last error:    {error}");
    }
    println!("Outbox:        {} pending, {} failed", counts.pending, counts.failed);
    println!("Conflicts:     {}", conflicts.len());
    Ok(())
}

pub async fn run_reset(db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    store.reset_cursor().await?;
    println!("Cursor cleared; next sync pulls the entire dataset");
    Ok(())
}

pub async fn run_outbox(failed: bool, limit: usize, db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path).await?;

    let operations = if failed {
        store.list_failed(limit).await?
    } else {
        store
            .next_batch(limit, chrono::Utc::now().timestamp_millis())
            .await?
    };

    if operations.is_empty() {
        println!("Outbox is empty.");
        return Ok(());
    }

    for op in operations {
        let mut line = format!(
            "{}  {:<6} {:<9} {}",
            op.id,
            op.kind.as_str(),
            op.table.as_str(),
            op.record_id
        );
        if let Some(error) = &op.last_error {
            line.push_str(&format!("  ({error})"));
        }
        println!("{line}");
    }
    Ok(())
}
