//! Syncable entity kinds

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Closed allow-list of entity kinds the sync engine will carry.
///
/// The wire format transmits table names as strings; parsing them through
/// this enum is what enforces the allow-list. An unknown name is rejected
/// per-operation, never silently passed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTable {
    Accounts,
    Goals,
    Scenarios,
}

impl SyncTable {
    /// Every syncable table, in the order server changes are pulled.
    pub const ALL: [Self; 3] = [Self::Accounts, Self::Goals, Self::Scenarios];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Accounts => "accounts",
            Self::Goals => "goals",
            Self::Scenarios => "scenarios",
        }
    }
}

impl fmt::Display for SyncTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A wire table name that is not in the allow-list
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown syncable table: {0}")]
pub struct UnknownTable(pub String);

impl FromStr for SyncTable {
    type Err = UnknownTable;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accounts" => Ok(Self::Accounts),
            "goals" => Ok(Self::Goals),
            "scenarios" => Ok(Self::Scenarios),
            other => Err(UnknownTable(other.to_string())),
        }
    }
}
