//! Dynamic unit contract.
//!
//! A dynamic unit is a piece of migration logic that is not expressible as
//! plain SQL. Descriptors refer to units by class name; the loader resolves
//! the name to a constructor, creates a fresh instance and injects the
//! run's environment before the executor invokes it.
//!
//! # Contract
//!
//! - `set_console()` and `set_home_paths()` are each accepted exactly once;
//!   a second call fails with `UnitError::AlreadyInjected`.
//! - `run()` is the entry point; `migrate()` defaults to `run()`.
//! - The database connection is lent for the duration of one invocation.
//!   Units must not keep it.
//!
//! # Example
//!
//! ```ignore
//! use modmigrate::unit_traits::{MigrationUnit, UnitEnvironment, UnitError};
//!
//! struct Touch {
//!     env: UnitEnvironment,
//! }
//!
//! impl MigrationUnit for Touch {
//!     fn class_name(&self) -> &str { "example.Touch" }
//!     fn environment(&self) -> &UnitEnvironment { &self.env }
//!     fn environment_mut(&mut self) -> &mut UnitEnvironment { &mut self.env }
//!     fn run(&mut self, db: &mut dyn Database) -> Result<(), UnitError> {
//!         db.execute("UPDATE pages SET touched = 1")?;
//!         self.env.console()?.info("pages touched");
//!         Ok(())
//!     }
//! }
//! ```

use crate::console::Console;
use crate::db::{Database, DbError};
use std::path::PathBuf;
use std::rc::Rc;
use thiserror::Error;

/// Entry point invoked when a descriptor says `methodname="run"`
pub const METHOD_RUN: &str = "run";

/// Entry point invoked when a descriptor says `methodname="migrate"`
pub const METHOD_MIGRATE: &str = "migrate";

/// Errors raised by dynamic units
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UnitError {
    /// A set-once property was injected twice
    #[error("{what} was already injected")]
    AlreadyInjected { what: &'static str },

    /// The unit ran before its environment was injected
    #[error("{what} has not been injected")]
    NotInjected { what: &'static str },

    /// The descriptor names an entry point the unit does not have
    #[error("unknown entry point '{0}'")]
    UnknownMethod(String),

    /// A required constructor parameter is absent
    #[error("missing parameter '{0}'")]
    MissingParameter(String),

    /// A constructor parameter has an unusable value
    #[error("invalid parameter {name}='{value}'")]
    InvalidParameter { name: String, value: String },

    /// The database rejected one of the unit's statements
    #[error(transparent)]
    Database(#[from] DbError),

    /// The unit reported a failure of its own
    #[error("{0}")]
    Failed(String),
}

/// Installation directories handed to every unit
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HomePaths {
    /// Application installation root
    pub app_home: PathBuf,
    /// Data directory the application writes to
    pub data_home: PathBuf,
}

/// A value that may be set exactly once
#[derive(Debug)]
pub struct InjectOnce<T> {
    what: &'static str,
    value: Option<T>,
}

impl<T> InjectOnce<T> {
    pub const fn new(what: &'static str) -> Self {
        Self { what, value: None }
    }

    pub fn set(&mut self, value: T) -> Result<(), UnitError> {
        if self.value.is_some() {
            return Err(UnitError::AlreadyInjected { what: self.what });
        }
        self.value = Some(value);
        Ok(())
    }

    pub fn get(&self) -> Result<&T, UnitError> {
        self.value
            .as_ref()
            .ok_or(UnitError::NotInjected { what: self.what })
    }

    #[inline]
    pub fn is_set(&self) -> bool {
        self.value.is_some()
    }
}

/// The injected half of a unit: console and home paths
pub struct UnitEnvironment {
    console: InjectOnce<Rc<dyn Console>>,
    home: InjectOnce<HomePaths>,
}

impl Default for UnitEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

impl UnitEnvironment {
    pub fn new() -> Self {
        Self {
            console: InjectOnce::new("console"),
            home: InjectOnce::new("home paths"),
        }
    }

    pub fn console(&self) -> Result<&Rc<dyn Console>, UnitError> {
        self.console.get()
    }

    pub fn home_paths(&self) -> Result<&HomePaths, UnitError> {
        self.home.get()
    }

    /// Returns true once both properties are injected
    pub fn is_ready(&self) -> bool {
        self.console.is_set() && self.home.is_set()
    }
}

/// Trait implemented by every dynamic unit.
pub trait MigrationUnit {
    /// Class name the unit was resolved under
    fn class_name(&self) -> &str;

    fn environment(&self) -> &UnitEnvironment;

    fn environment_mut(&mut self) -> &mut UnitEnvironment;

    /// Inject the operator console (set-once)
    fn set_console(&mut self, console: Rc<dyn Console>) -> Result<(), UnitError> {
        self.environment_mut().console.set(console)
    }

    /// Inject the installation directories (set-once)
    fn set_home_paths(&mut self, paths: HomePaths) -> Result<(), UnitError> {
        self.environment_mut().home.set(paths)
    }

    /// Main entry point
    fn run(&mut self, db: &mut dyn Database) -> Result<(), UnitError>;

    /// Alternate entry point used by version-upgrade entries
    fn migrate(&mut self, db: &mut dyn Database) -> Result<(), UnitError> {
        self.run(db)
    }

    /// Dispatch on the descriptor's `methodname`
    fn invoke(&mut self, method: &str, db: &mut dyn Database) -> Result<(), UnitError> {
        if !self.environment().is_ready() {
            let what = if self.environment().console.is_set() { "home paths" } else { "console" };
            return Err(UnitError::NotInjected { what });
        }
        match method {
            METHOD_RUN => self.run(db),
            METHOD_MIGRATE => self.migrate(db),
            other => Err(UnitError::UnknownMethod(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::MemoryConsole;
    use crate::db::SqliteDatabase;

    struct Counter {
        env: UnitEnvironment,
        runs: u32,
    }

    impl Counter {
        fn new() -> Self {
            Self {
                env: UnitEnvironment::new(),
                runs: 0,
            }
        }
    }

    impl MigrationUnit for Counter {
        fn class_name(&self) -> &str {
            "test.Counter"
        }

        fn environment(&self) -> &UnitEnvironment {
            &self.env
        }

        fn environment_mut(&mut self) -> &mut UnitEnvironment {
            &mut self.env
        }

        fn run(&mut self, _db: &mut dyn Database) -> Result<(), UnitError> {
            self.runs += 1;
            Ok(())
        }
    }

    fn injected() -> Counter {
        let mut unit = Counter::new();
        unit.set_console(Rc::new(MemoryConsole::new(false))).unwrap();
        unit.set_home_paths(HomePaths::default()).unwrap();
        unit
    }

    #[test]
    fn test_second_injection_rejected() {
        let mut unit = injected();
        let err = unit.set_console(Rc::new(MemoryConsole::new(false))).unwrap_err();
        assert_eq!(err, UnitError::AlreadyInjected { what: "console" });

        let err = unit.set_home_paths(HomePaths::default()).unwrap_err();
        assert_eq!(err, UnitError::AlreadyInjected { what: "home paths" });
    }

    #[test]
    fn test_invoke_requires_injection() {
        let mut db = SqliteDatabase::open_in_memory().unwrap();
        let mut unit = Counter::new();
        unit.set_console(Rc::new(MemoryConsole::new(false))).unwrap();

        let err = unit.invoke(METHOD_RUN, &mut db).unwrap_err();
        assert_eq!(err, UnitError::NotInjected { what: "home paths" });
        assert_eq!(unit.runs, 0);
    }

    #[test]
    fn test_migrate_defaults_to_run() {
        let mut db = SqliteDatabase::open_in_memory().unwrap();
        let mut unit = injected();

        unit.invoke(METHOD_MIGRATE, &mut db).unwrap();
        unit.invoke(METHOD_RUN, &mut db).unwrap();
        assert_eq!(unit.runs, 2);
    }

    #[test]
    fn test_unknown_method_rejected() {
        let mut db = SqliteDatabase::open_in_memory().unwrap();
        let mut unit = injected();
        let err = unit.invoke("execute", &mut db).unwrap_err();
        assert_eq!(err, UnitError::UnknownMethod("execute".to_string()));
    }
}
