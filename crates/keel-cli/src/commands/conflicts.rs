use std::path::Path;

use keel_core::models::OperationId;
use keel_core::sync::{resolve_conflict, ConflictChoice, Resolution};
use serde_json::Value;

use crate::cli::KeepChoice;
use crate::commands::common::{format_timestamp, open_store};
use crate::error::CliError;

pub async fn run_list(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    let conflicts = store.list_conflicts().await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&conflicts)?);
        return Ok(());
    }

    if conflicts.is_empty() {
        println!("No unresolved conflicts.");
        return Ok(());
    }

    for conflict in conflicts {
        println!(
            "{}  {:<15} {:<9} server at {}",
            conflict.operation_id,
            conflict.conflict_type.as_str(),
            conflict.table.as_str(),
            format_timestamp(conflict.server_timestamp)
        );
    }
    println!("\nResolve with `keel conflicts resolve <operation-id> --keep <client|server|merge>`");
    Ok(())
}

pub async fn run_resolve(
    operation_id: &str,
    keep: KeepChoice,
    raw_data: Option<&str>,
    db_path: &Path,
) -> Result<(), CliError> {
    let operation_id: OperationId = operation_id
        .trim()
        .parse()
        .map_err(|_| CliError::InvalidOperationId(operation_id.to_string()))?;

    let choice = match keep {
        KeepChoice::Client => ConflictChoice::Client,
        KeepChoice::Server => ConflictChoice::Server,
        KeepChoice::Merge => ConflictChoice::Merge,
    };

    let merged = match (keep, raw_data) {
        (KeepChoice::Merge, None) => return Err(CliError::MergeRequiresData),
        (KeepChoice::Merge, Some(raw)) => Some(serde_json::from_str::<Value>(raw)?),
        _ => None,
    };

    let store = open_store(db_path).await?;
    match resolve_conflict(&store, &operation_id, choice, merged).await? {
        Resolution::Discarded => println!("Kept server state; local change discarded"),
        Resolution::Reenqueued(id) => {
            println!("Queued replacement operation {id}; run `keel sync` to submit");
        }
    }
    Ok(())
}
