use std::path::Path;

use keel_core::models::{Operation, OperationKind, Priority, SyncTable};
use serde_json::{json, Value};

use crate::commands::common::{format_timestamp, open_store};
use crate::error::CliError;

/// Queue a create or update. Which one it is depends on whether the record
/// is already known locally; the server revalidates either way.
pub async fn run_put(
    table: SyncTable,
    raw_data: &str,
    priority: Priority,
    db_path: &Path,
) -> Result<(), CliError> {
    let data: Value = serde_json::from_str(raw_data)?;
    let Some(record_id) = data.get("id").and_then(Value::as_str).map(str::to_string) else {
        return Err(CliError::InvalidPayload);
    };

    let store = open_store(db_path).await?;
    let known = store
        .get_record(table, &record_id)
        .await?
        .is_some_and(|record| !record.is_deleted);
    let kind = if known {
        OperationKind::Update
    } else {
        OperationKind::Create
    };

    let op = Operation::new(kind, table, record_id, data, priority);
    store.enqueue(&op).await?;
    println!("{} {}", kind.as_str(), op.id);
    Ok(())
}

pub async fn run_rm(table: SyncTable, id: &str, db_path: &Path) -> Result<(), CliError> {
    let id = id.trim();
    if id.is_empty() {
        return Err(CliError::EmptyRecordId);
    }

    let store = open_store(db_path).await?;
    let op = Operation::new(
        OperationKind::Delete,
        table,
        id,
        json!({"id": id}),
        Priority::Normal,
    );
    store.enqueue(&op).await?;
    println!("delete {}", op.id);
    Ok(())
}

pub async fn run_list(table: SyncTable, as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    let records = store.list_records(table).await?;

    if as_json {
        let payloads: Vec<&Value> = records.iter().map(|record| &record.data).collect();
        println!("{}", serde_json::to_string_pretty(&payloads)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No {} records cached locally. Run `keel sync`?", table);
        return Ok(());
    }

    for record in records {
        println!(
            "{:<36}  {}  {}",
            record.id,
            format_timestamp(record.updated_at),
            record.data.get("name").and_then(Value::as_str).unwrap_or("")
        );
    }
    Ok(())
}
