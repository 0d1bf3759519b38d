//! Keel CLI - offline-first personal finance planning from the terminal
//!
//! Every mutation queues locally and reaches the server on `keel sync`.

mod cli;
mod commands;
mod error;

use std::io::{self, Write};
use std::path::Path;

use clap::{CommandFactory, Parser};
use clap_complete::aot::Generator;
use clap_complete::{generate, shells};

use cli::{Cli, Commands, CompletionShell, ConflictCommands};
use error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("keel=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    let db_path = commands::common::resolve_db_path(cli.db_path);

    match cli.command {
        Commands::Put {
            table,
            data,
            priority,
        } => {
            commands::records::run_put(table.into(), &data, priority.into(), &db_path).await?;
        }
        Commands::Rm { table, id } => {
            commands::records::run_rm(table.into(), &id, &db_path).await?;
        }
        Commands::List { table, json } => {
            commands::records::run_list(table.into(), json, &db_path).await?;
        }
        Commands::Sync => {
            commands::sync::run_sync(cli.endpoint.as_deref(), &db_path).await?;
        }
        Commands::Status => commands::sync::run_status(&db_path).await?,
        Commands::Outbox { failed, limit } => {
            commands::sync::run_outbox(failed, limit, &db_path).await?;
        }
        Commands::Conflicts { command } => match command {
            ConflictCommands::List { json } => {
                commands::conflicts::run_list(json, &db_path).await?;
            }
            ConflictCommands::Resolve {
                operation_id,
                keep,
                data,
            } => {
                commands::conflicts::run_resolve(&operation_id, keep, data.as_deref(), &db_path)
                    .await?;
            }
        },
        Commands::Reset => commands::sync::run_reset(&db_path).await?,
        Commands::Completions { shell, output } => {
            run_completions(shell, output.as_deref())?;
        }
    }

    Ok(())
}

fn run_completions(shell: CompletionShell, output_path: Option<&Path>) -> Result<(), CliError> {
    let mut command = Cli::command();
    let mut buffer = Vec::new();

    match shell {
        CompletionShell::Bash => generate_for_shell(shells::Bash, &mut command, &mut buffer),
        CompletionShell::Zsh => generate_for_shell(shells::Zsh, &mut command, &mut buffer),
        CompletionShell::Fish => generate_for_shell(shells::Fish, &mut command, &mut buffer),
    }

    if let Some(path) = output_path {
        std::fs::write(path, &buffer)?;
        println!("{}", path.display());
    } else {
        io::stdout().write_all(&buffer)?;
    }

    Ok(())
}

fn generate_for_shell<G: Generator>(
    generator: G,
    command: &mut clap::Command,
    buffer: &mut Vec<u8>,
) {
    generate(generator, command, "keel", buffer);
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    use keel_core::models::SyncTable;
    use keel_core::services::ClientStore;
    use pretty_assertions::assert_eq;

    use super::commands::records::{run_list, run_put, run_rm};
    use super::error::CliError;
    use keel_core::models::Priority;

    fn unique_test_db_path() -> PathBuf {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |duration| duration.as_nanos());
        std::env::temp_dir().join(format!("keel-cli-test-{timestamp}-{}.db", std::process::id()))
    }

    fn cleanup_db_files(path: &PathBuf) {
        let _ = std::fs::remove_file(path);
        let _ = std::fs::remove_file(path.with_extension("db-shm"));
        let _ = std::fs::remove_file(path.with_extension("db-wal"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn put_queues_a_create_for_an_unknown_record() {
        let db_path = unique_test_db_path();

        run_put(
            SyncTable::Accounts,
            r#"{"id": "acct-1", "name": "Checking"}"#,
            Priority::Normal,
            &db_path,
        )
        .await
        .unwrap();

        let store = ClientStore::open(&db_path).await.unwrap();
        let counts = store.outbox_counts().await.unwrap();
        assert_eq!(counts.pending, 1);

        cleanup_db_files(&db_path);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn put_rejects_payload_without_id() {
        let db_path = unique_test_db_path();

        let error = run_put(
            SyncTable::Accounts,
            r#"{"name": "Checking"}"#,
            Priority::Normal,
            &db_path,
        )
        .await
        .unwrap_err();
        assert!(matches!(error, CliError::InvalidPayload));

        cleanup_db_files(&db_path);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rm_rejects_blank_id() {
        let db_path = unique_test_db_path();

        let error = run_rm(SyncTable::Goals, "  ", &db_path).await.unwrap_err();
        assert!(matches!(error, CliError::EmptyRecordId));

        cleanup_db_files(&db_path);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn list_of_empty_table_succeeds() {
        let db_path = unique_test_db_path();
        run_list(SyncTable::Scenarios, false, &db_path).await.unwrap();
        cleanup_db_files(&db_path);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sync_without_token_reports_configuration() {
        let db_path = unique_test_db_path();

        // Guard against ambient configuration leaking into the test.
        std::env::remove_var("KEEL_API_TOKEN");
        let error = super::commands::sync::run_sync(None, &db_path)
            .await
            .unwrap_err();
        assert!(matches!(error, CliError::SyncNotConfigured));

        cleanup_db_files(&db_path);
    }
}
