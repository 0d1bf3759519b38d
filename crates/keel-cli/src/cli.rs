use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use keel_core::models::{Priority, SyncTable};

#[derive(Parser)]
#[command(name = "keel")]
#[command(about = "Offline-first personal finance planning from the command line")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Sync endpoint override (defaults to KEEL_SYNC_ENDPOINT)
    #[arg(long, global = true, value_name = "URL")]
    pub endpoint: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create or update a record; queued locally until the next sync
    Put {
        /// Target table
        #[arg(value_enum)]
        table: CliTable,
        /// Full record as JSON, including its `id`
        data: String,
        /// Dequeue priority
        #[arg(long, value_enum, default_value_t = CliPriority::Normal)]
        priority: CliPriority,
    },
    /// Delete a record; queued locally until the next sync
    Rm {
        /// Target table
        #[arg(value_enum)]
        table: CliTable,
        /// Record ID
        id: String,
    },
    /// List locally cached records
    List {
        /// Target table
        #[arg(value_enum)]
        table: CliTable,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run one sync cycle against the server
    Sync,
    /// Show the local sync status and outbox occupancy
    Status,
    /// Show queued operations
    Outbox {
        /// Show permanently failed operations instead
        #[arg(long)]
        failed: bool,
        /// Number of operations to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Inspect and resolve sync conflicts
    Conflicts {
        #[command(subcommand)]
        command: ConflictCommands,
    },
    /// Forget the local cursor so the next sync pulls the entire dataset
    Reset,
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum ConflictCommands {
    /// List unresolved conflicts
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Resolve one conflict
    Resolve {
        /// Operation ID of the conflicted mutation
        operation_id: String,
        /// Which side to keep
        #[arg(long, value_enum)]
        keep: KeepChoice,
        /// Merged record JSON (required with --keep merge)
        #[arg(long, value_name = "JSON")]
        data: Option<String>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CliTable {
    Accounts,
    Goals,
    Scenarios,
}

impl From<CliTable> for SyncTable {
    fn from(table: CliTable) -> Self {
        match table {
            CliTable::Accounts => Self::Accounts,
            CliTable::Goals => Self::Goals,
            CliTable::Scenarios => Self::Scenarios,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CliPriority {
    Low,
    Normal,
    High,
    Critical,
}

impl From<CliPriority> for Priority {
    fn from(priority: CliPriority) -> Self {
        match priority {
            CliPriority::Low => Self::Low,
            CliPriority::Normal => Self::Normal,
            CliPriority::High => Self::High,
            CliPriority::Critical => Self::Critical,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum KeepChoice {
    Client,
    Server,
    Merge,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}
