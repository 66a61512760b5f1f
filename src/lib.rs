//! modmigrate library
//!
//! Versioned schema migrations for applications built from pluggable
//! contribution modules. Each module ships descriptors of version-tagged
//! SQL fragments and code units; a run brings the database from the
//! versions it records to the versions the descriptors declare.

pub mod cli;
pub mod config;
pub mod console;
pub mod contribution;
pub mod db;
pub mod engine;
pub mod error;
pub mod markers;
pub mod orchestrator;
pub mod run_state;
pub mod types;
pub mod unit_loader;
pub mod unit_manifest;
pub mod unit_traits;
pub mod units;

// Re-export main types for convenience
pub use config::MigratorConfig;
pub use console::{Console, ConsoleLevel, MemoryConsole, TerminalConsole};
pub use contribution::{
    ContributionError, ModuleContribution, OperationEntry, OperationKind, Version, VersionBlock,
    discover_modules, load_descriptor, parse_descriptor,
};
pub use db::{Database, DbError, SqliteDatabase, connect};
pub use error::{MigrateError, Result};
pub use markers::MarkerStore;
pub use orchestrator::{Orchestrator, RunOptions, RunSummary};
pub use run_state::{RunContext, RunStage, RunTransitionError};
pub use types::{Action, Dialect};
pub use unit_loader::{UnitLoader, UnitRegistry};
pub use unit_manifest::{ManifestError, ManifestRegistry, UnitManifest};
pub use unit_traits::{HomePaths, MigrationUnit, UnitEnvironment, UnitError};

// Engine
pub use engine::{
    ExecutionPlan, Executor, ExecutorOptions, ModuleOutcome, ModuleResolution, ModuleStatus,
    PlanStep, RunReport, VersionTag, resolve, split_statements,
};
