//! Error handling module for modmigrate
//!
//! Provides centralized error handling with proper error types using thiserror.
//! Domain errors (descriptor parsing, database calls, unit failures, state
//! transitions) convert into `MigrateError` so every layer can use `?`.

use crate::contribution::{ContributionError, Version};
use crate::db::DbError;
use crate::run_state::RunTransitionError;
use crate::unit_manifest::ManifestError;
use crate::unit_traits::UnitError;
use thiserror::Error;

/// Main error type for modmigrate
#[derive(Error, Debug)]
pub enum MigrateError {
    /// A module descriptor could not be parsed or violates its invariants
    #[error("Malformed contribution: {0}")]
    MalformedContribution(#[from] ContributionError),

    /// The database records a newer version than the descriptor provides
    #[error(
        "Version skew in module '{module}': database is at {recorded} but the newest available version is {latest}"
    )]
    VersionSkew {
        module: String,
        recorded: Version,
        latest: Version,
    },

    /// A version tag points at a block the module does not declare
    #[error("Module '{module}' declares no version block {version}")]
    MissingVersionBlock { module: String, version: Version },

    /// A unit class name is unknown to every loading layer
    #[error("Cannot resolve unit class '{class}'")]
    ClassResolution { class: String },

    /// A unit class was found but could not be constructed
    #[error("Cannot instantiate unit class '{class}': {reason}")]
    Instantiation { class: String, reason: String },

    /// A statement of a `sqlstatementlist` fragment failed
    #[error("Statement {index} of {file} failed (module '{module}', block {block}): {source}")]
    StatementExecution {
        module: String,
        block: String,
        file: String,
        index: usize,
        #[source]
        source: DbError,
    },

    /// A dynamic unit's entry point returned an error
    #[error("Unit {class}.{method} failed (module '{module}', block {block}): {source}")]
    Unit {
        module: String,
        block: String,
        class: String,
        method: String,
        #[source]
        source: UnitError,
    },

    /// A fragment file could not be read
    #[error("Cannot read fragment {file} (module '{module}', block {block}): {source}")]
    Fragment {
        module: String,
        block: String,
        file: String,
        #[source]
        source: std::io::Error,
    },

    /// Command-line usage errors (missing or contradictory flags)
    #[error("Usage error: {0}")]
    Usage(String),

    /// The target database could not be reached
    #[error("Connection error: {0}")]
    Connection(String),

    /// A module named on the command line was not discovered
    #[error("Unknown module '{0}'")]
    UnknownModule(String),

    /// A module was asked to tear down but declares no uninstall block
    #[error("Module '{0}' declares no uninstall block")]
    NoTeardown(String),

    /// Normal uninstall refused because a later module is still installed
    #[error("Cannot uninstall '{module}' while '{dependent}' is still installed")]
    DependencyBlocked { module: String, dependent: String },

    /// Reading or writing the version marker table failed
    #[error("Version marker {operation} failed: {source}")]
    Marker {
        operation: String,
        #[source]
        source: DbError,
    },

    /// A recorded marker value is not a version number
    #[error("Module '{module}' has an unreadable recorded version '{value}'")]
    CorruptMarker { module: String, value: String },

    /// Configuration errors (loading, validation)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Orchestrator state machine transition errors
    #[error("Run transition error: {0}")]
    Transition(#[from] RunTransitionError),

    /// Plugin-directory unit manifest errors
    #[error("Unit manifest error: {0}")]
    Manifest(#[from] ManifestError),

    /// IO errors (descriptor directories, plan output)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for modmigrate operations
pub type Result<T> = std::result::Result<T, MigrateError>;

impl MigrateError {
    /// Create a usage error
    pub fn usage(msg: impl Into<String>) -> Self {
        Self::Usage(msg.into())
    }

    /// Create a connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Returns true if the error only concerns one module's plan.
    ///
    /// Module-local failures stop that module's remaining blocks but leave
    /// sibling modules running; anything else aborts the run.
    pub fn is_module_local(&self) -> bool {
        matches!(
            self,
            Self::StatementExecution { .. }
                | Self::Unit { .. }
                | Self::Fragment { .. }
                | Self::ClassResolution { .. }
                | Self::Instantiation { .. }
                | Self::DependencyBlocked { .. }
                | Self::Marker { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MigrateError::usage("missing -T");
        assert_eq!(err.to_string(), "Usage error: missing -T");

        let err = MigrateError::VersionSkew {
            module: "versioning".to_string(),
            recorded: Version::new(13, 3),
            latest: Version::new(12, 3),
        };
        let msg = err.to_string();
        assert!(msg.contains("versioning"));
        assert!(msg.contains("013"));
        assert!(msg.contains("012"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: MigrateError = io_err.into();
        assert!(matches!(err, MigrateError::Io(_)));
    }

    #[test]
    fn test_module_local_classification() {
        let local = MigrateError::ClassResolution {
            class: "com.example.Missing".to_string(),
        };
        assert!(local.is_module_local());

        let fatal = MigrateError::connection("refused");
        assert!(!fatal.is_module_local());

        let skew = MigrateError::VersionSkew {
            module: "m".to_string(),
            recorded: Version::new(2, 3),
            latest: Version::new(1, 3),
        };
        assert!(!skew.is_module_local());
    }
}
