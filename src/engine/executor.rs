//! Execution Engine
//!
//! Walks an [`ExecutionPlan`] against one database connection, strictly in
//! order, entry by entry.
//!
//! # Failure Semantics
//!
//! - A module-local error (see [`MigrateError::is_module_local`]) stops that
//!   module's remaining blocks and leaves its marker untouched. Later modules
//!   still run unless the run is strict or simulated.
//! - Any other error aborts the run and is returned to the caller.
//! - Markers are written once per module, after every selected block of
//!   that module succeeded.

use super::plan::{ExecutionPlan, PlanStep};
use super::resolver::ModuleResolution;
use super::statements::split_statements;
use crate::console::Console;
use crate::contribution::{OperationEntry, OperationKind, Version};
use crate::db::Database;
use crate::error::{MigrateError, Result};
use crate::markers::MarkerStore;
use crate::unit_loader::UnitLoader;
use crate::unit_traits::{METHOD_MIGRATE, METHOD_RUN, UnitError};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::rc::Rc;

/// Switches that change how a plan is walked
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutorOptions {
    /// Read, split and resolve everything but execute nothing
    pub simulate: bool,
    /// Stop the run at the first module failure
    pub strict: bool,
}

/// What happened to one module
#[derive(Debug)]
pub enum ModuleOutcome {
    /// Every selected block ran. `to` is `None` after a teardown.
    Applied {
        from: Option<Version>,
        to: Option<Version>,
        steps: usize,
    },
    /// Nothing was selected for the module
    UpToDate,
    /// Walked in simulate mode
    Simulated { steps: usize },
    Failed { error: MigrateError },
    /// Not touched, with the reason
    Skipped { reason: String },
}

impl ModuleOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

impl fmt::Display for ModuleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |v: &Option<Version>| v.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string());
        match self {
            Self::Applied { from, to, steps } => {
                write!(f, "applied {} -> {} ({} blocks)", show(from), show(to), steps)
            }
            Self::UpToDate => write!(f, "up to date"),
            Self::Simulated { steps } => write!(f, "simulated ({} blocks)", steps),
            Self::Failed { error } => write!(f, "FAILED: {}", error),
            Self::Skipped { reason } => write!(f, "skipped: {}", reason),
        }
    }
}

#[derive(Debug)]
pub struct ModuleReport {
    pub module: String,
    pub outcome: ModuleOutcome,
}

/// Per-module outcomes of one plan walk
#[derive(Debug, Default)]
pub struct RunReport {
    pub modules: Vec<ModuleReport>,
    /// Set when strict or simulate mode stopped the walk early
    pub aborted: bool,
}

impl RunReport {
    pub fn has_failures(&self) -> bool {
        self.modules.iter().any(|m| m.outcome.is_failure())
    }

    pub fn outcome(&self, module: &str) -> Option<&ModuleOutcome> {
        self.modules
            .iter()
            .find(|m| m.module == module)
            .map(|m| &m.outcome)
    }

    pub fn failed_modules(&self) -> Vec<&str> {
        self.modules
            .iter()
            .filter(|m| m.outcome.is_failure())
            .map(|m| m.module.as_str())
            .collect()
    }

    /// Returns a summary of the run for logging/display.
    pub fn summary(&self) -> String {
        let mut lines = Vec::with_capacity(self.modules.len() + 1);
        for report in &self.modules {
            lines.push(format!("  {:<24} {}", report.module, report.outcome));
        }
        if self.aborted {
            lines.push("  (run stopped at the first failure)".to_string());
        }
        lines.join("\n")
    }
}

/// Runs plans against a database
pub struct Executor {
    loader: UnitLoader,
    markers: MarkerStore,
    console: Rc<dyn Console>,
    fragments_dir: PathBuf,
    options: ExecutorOptions,
}

impl Executor {
    pub fn new(
        loader: UnitLoader,
        markers: MarkerStore,
        console: Rc<dyn Console>,
        fragments_dir: impl Into<PathBuf>,
        options: ExecutorOptions,
    ) -> Self {
        Self {
            loader,
            markers,
            console,
            fragments_dir: fragments_dir.into(),
            options,
        }
    }

    pub fn options(&self) -> ExecutorOptions {
        self.options
    }

    /// Walk `plan` module by module, in the order of `resolutions`.
    ///
    /// # Errors
    ///
    /// Returns the first error that is not local to one module. Module-local
    /// failures are recorded in the report instead.
    pub fn execute(
        &self,
        db: &mut dyn Database,
        plan: &ExecutionPlan,
        resolutions: &[ModuleResolution],
    ) -> Result<RunReport> {
        let mut report = RunReport::default();
        let mut installed: HashSet<String> = resolutions
            .iter()
            .filter(|r| r.recorded.is_some())
            .map(|r| r.module.clone())
            .collect();

        log::info!(
            "Executing {} blocks ({})",
            plan.len(),
            if self.options.simulate { "simulate" } else { "live" }
        );

        for resolution in resolutions {
            let steps: Vec<&PlanStep> = plan.steps_for(&resolution.module).collect();

            if steps.is_empty() {
                let outcome = match &resolution.warning {
                    Some(reason) => ModuleOutcome::Skipped { reason: reason.clone() },
                    None => ModuleOutcome::UpToDate,
                };
                report.modules.push(ModuleReport {
                    module: resolution.module.clone(),
                    outcome,
                });
                continue;
            }

            let outcome = match self.run_module(db, resolution, &steps, &mut installed) {
                Ok(outcome) => outcome,
                Err(error) if error.is_module_local() => {
                    self.console.error(&error.to_string());
                    log::error!("Module '{}' failed: {}", resolution.module, error);
                    ModuleOutcome::Failed { error }
                }
                Err(error) => return Err(error),
            };

            let stop = outcome.is_failure() && (self.options.strict || self.options.simulate);
            report.modules.push(ModuleReport {
                module: resolution.module.clone(),
                outcome,
            });
            if stop {
                log::warn!("Stopping after failure of '{}'", resolution.module);
                report.aborted = true;
                break;
            }
        }

        Ok(report)
    }

    fn run_module(
        &self,
        db: &mut dyn Database,
        resolution: &ModuleResolution,
        steps: &[&PlanStep],
        installed: &mut HashSet<String>,
    ) -> Result<ModuleOutcome> {
        let module = resolution.module.as_str();

        if resolution.is_teardown() {
            if let Some(dependent) = resolution.dependents.iter().find(|d| installed.contains(*d)) {
                return Err(MigrateError::DependencyBlocked {
                    module: module.to_string(),
                    dependent: dependent.clone(),
                });
            }
        }

        for step in steps {
            self.console.info(&format!("{} {}", module, step.tag));
            for entry in &step.entries {
                self.execute_entry(db, step, entry)?;
            }
        }

        // Simulated runs track installs in memory so later teardowns see them
        let simulate = self.options.simulate;
        let to = if resolution.is_teardown() {
            if !simulate {
                self.markers.delete(db, module)?;
            }
            installed.remove(module);
            None
        } else if let Some(target) = resolution.target_version() {
            if !simulate {
                self.markers.write(db, module, target)?;
            }
            installed.insert(module.to_string());
            Some(target)
        } else {
            resolution.recorded
        };

        if simulate {
            return Ok(ModuleOutcome::Simulated { steps: steps.len() });
        }

        Ok(ModuleOutcome::Applied {
            from: resolution.recorded,
            to,
            steps: steps.len(),
        })
    }

    fn execute_entry(&self, db: &mut dyn Database, step: &PlanStep, entry: &OperationEntry) -> Result<()> {
        match &entry.kind {
            OperationKind::SqlStatementList {
                file,
                delimiter,
                keep_delimiter,
            } => self.run_statement_list(db, step, file, delimiter, *keep_delimiter),
            OperationKind::Unit {
                class_name,
                method_name,
                ..
            } => self.run_unit(db, step, class_name, method_name),
        }
    }

    fn run_statement_list(
        &self,
        db: &mut dyn Database,
        step: &PlanStep,
        file: &str,
        delimiter: &str,
        keep_delimiter: bool,
    ) -> Result<()> {
        let path = self.fragments_dir.join(file);
        let text = std::fs::read_to_string(&path).map_err(|source| MigrateError::Fragment {
            module: step.module.clone(),
            block: step.label(),
            file: file.to_string(),
            source,
        })?;

        let statements = split_statements(&text, delimiter, keep_delimiter);
        log::debug!("{}: {} statements", file, statements.len());

        for (index, statement) in statements.iter().enumerate() {
            self.console.detail(statement);
            if self.options.simulate {
                continue;
            }
            db.execute(statement)
                .map_err(|source| MigrateError::StatementExecution {
                    module: step.module.clone(),
                    block: step.label(),
                    file: file.to_string(),
                    index: index + 1,
                    source,
                })?;
        }
        Ok(())
    }

    fn run_unit(&self, db: &mut dyn Database, step: &PlanStep, class: &str, method: &str) -> Result<()> {
        let unit_failure = |source: UnitError| MigrateError::Unit {
            module: step.module.clone(),
            block: step.label(),
            class: class.to_string(),
            method: method.to_string(),
            source,
        };

        let mut unit = self.loader.load_dynamic_part(class)?;

        if self.options.simulate {
            if method != METHOD_RUN && method != METHOD_MIGRATE {
                return Err(unit_failure(UnitError::UnknownMethod(method.to_string())));
            }
            self.console.detail(&format!("would invoke {}.{}", class, method));
            return Ok(());
        }

        log::debug!("Invoking {}.{}", unit.class_name(), method);
        unit.invoke(method, db).map_err(unit_failure)
    }
}
