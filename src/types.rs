//! Type-safe run parameters for modmigrate
//!
//! The target dialect and the requested action are proper enums so the
//! orchestrator can match on them exhaustively instead of comparing flags.

use serde::{Deserialize, Serialize};
use std::fmt;
use strum::{Display, EnumIter, EnumString};

/// Target database dialect.
///
/// The dialect only selects which fragment set the contribution modules
/// supply; it does not translate SQL between dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(ascii_case_insensitive)]
pub enum Dialect {
    #[strum(serialize = "MSSQL")]
    Mssql,
    #[strum(serialize = "ORACLE")]
    Oracle,
    #[strum(serialize = "POSTGRES")]
    Postgres,
    #[strum(serialize = "H2")]
    H2,
}

impl Dialect {
    /// Directory (under the contributions root) holding this dialect's descriptors
    pub const fn fragment_dir(self) -> &'static str {
        match self {
            Self::Mssql => "mssql",
            Self::Oracle => "oracle",
            Self::Postgres => "postgres",
            Self::H2 => "h2",
        }
    }
}

/// Action requested for a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Action {
    /// `-C`: only verify the database connection
    ConnectionOnly,
    /// `-I`: fresh install of every unrecorded module
    Install,
    /// `-U`: incremental update of every recorded module
    Update,
    /// `--uninstall`: teardown of all installed modules, dependents first
    Uninstall,
    /// `-FU<module>`: teardown of one module, bypassing the ordering check
    ForceUninstall(String),
    /// `-O`: run the optimize block of every installed module
    Optimize,
    /// `-A`: install or update each module as needed, then optimize
    All,
    /// `-S`: report recorded vs. available versions
    Status,
}

impl Action {
    /// Short flag this action is selected with on the command line
    pub fn flag(&self) -> String {
        match self {
            Self::ConnectionOnly => "-C".to_string(),
            Self::Install => "-I".to_string(),
            Self::Update => "-U".to_string(),
            Self::Uninstall => "--uninstall".to_string(),
            Self::ForceUninstall(module) => format!("-FU{}", module),
            Self::Optimize => "-O".to_string(),
            Self::All => "-A".to_string(),
            Self::Status => "-S".to_string(),
        }
    }

    /// Returns true if the action stops after RESOLVING (never executes a plan)
    pub fn short_circuits(&self) -> bool {
        matches!(self, Self::ConnectionOnly | Self::Status)
    }

    /// Returns true if the action tears modules down
    pub fn is_teardown(&self) -> bool {
        matches!(self, Self::Uninstall | Self::ForceUninstall(_))
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionOnly => write!(f, "CONNECTION_ONLY"),
            Self::Install => write!(f, "INSTALL"),
            Self::Update => write!(f, "UPDATE"),
            Self::Uninstall => write!(f, "UNINSTALL"),
            Self::ForceUninstall(module) => write!(f, "FORCE_UNINSTALL<{}>", module),
            Self::Optimize => write!(f, "OPTIMIZE"),
            Self::All => write!(f, "ALL"),
            Self::Status => write!(f, "STATUS"),
        }
    }
}
