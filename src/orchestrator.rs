//! Orchestrator
//!
//! Drives one run through `IDLE → RESOLVING → MERGING → EXECUTING → DONE`:
//! verify the connection, discover the dialect's modules, read their
//! markers, resolve tags, merge the plan and hand it to the executor.
//!
//! Everything a run needs (configuration, console, unit registry, the
//! connection) is owned here or lent in by the caller. Nothing is global.

use crate::config::MigratorConfig;
use crate::console::Console;
use crate::contribution::{ModuleContribution, Version, discover_modules};
use crate::db::{Database, connect, redact_url};
use crate::engine::{
    ExecutionPlan, Executor, ExecutorOptions, ModuleStatus, RunReport, resolve, statuses,
};
use crate::error::{MigrateError, Result};
use crate::markers::{MarkerStore, parse_marker};
use crate::run_state::{RunContext, RunStage};
use crate::types::{Action, Dialect};
use crate::unit_loader::{UnitLoader, UnitRegistry};
use crate::unit_manifest::ManifestRegistry;
use std::collections::HashMap;
use std::rc::Rc;

/// What the command line asked for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub action: Action,
    pub dialect: Dialect,
    pub verbose: bool,
    pub simulate: bool,
}

impl RunOptions {
    pub fn new(action: Action, dialect: Dialect) -> Self {
        Self {
            action,
            dialect,
            verbose: false,
            simulate: false,
        }
    }
}

/// Result of a run that reached a terminal stage
#[derive(Debug)]
pub struct RunSummary {
    pub action: Action,
    pub stage: RunStage,
    pub failed_at: Option<RunStage>,
    /// STATUS triples (STATUS runs only)
    pub statuses: Vec<ModuleStatus>,
    pub plan: ExecutionPlan,
    pub report: RunReport,
}

impl RunSummary {
    fn short_circuit(action: &Action, ctx: &RunContext, statuses: Vec<ModuleStatus>) -> Self {
        Self {
            action: action.clone(),
            stage: ctx.current_stage(),
            failed_at: ctx.failed_at(),
            statuses,
            plan: ExecutionPlan::default(),
            report: RunReport::default(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.stage == RunStage::Done
    }
}

pub struct Orchestrator {
    config: MigratorConfig,
    options: RunOptions,
    console: Rc<dyn Console>,
    units: UnitRegistry,
}

impl Orchestrator {
    pub fn new(config: MigratorConfig, options: RunOptions, console: Rc<dyn Console>) -> Self {
        Self {
            config,
            options,
            console,
            units: UnitRegistry::with_builtins(),
        }
    }

    /// Replace the compiled-in unit layer
    pub fn with_unit_registry(mut self, registry: UnitRegistry) -> Self {
        self.units = registry;
        self
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Connect to the configured database and run
    pub fn run(self) -> Result<RunSummary> {
        log::info!("Connecting to {}", redact_url(&self.config.database_url));
        let mut db = connect(&self.config.database_url)
            .map_err(|e| MigrateError::connection(e.to_string()))?;
        self.run_on(db.as_mut())
    }

    /// Run against an already open connection
    pub fn run_on(self, db: &mut dyn Database) -> Result<RunSummary> {
        let action = self.options.action.clone();
        let mut ctx = RunContext::new(action.short_circuits());
        ctx.advance()?;

        self.console.info(&format!(
            "{} for {} ({}{})",
            action,
            self.options.dialect,
            db.driver(),
            if self.options.simulate { ", simulate" } else { "" }
        ));

        if let Err(e) = db.ping() {
            ctx.fail()?;
            return Err(MigrateError::connection(e.to_string()));
        }
        ctx.confirm_connection();

        if action == Action::ConnectionOnly {
            self.console.info("Connection OK");
            ctx.transition_to(RunStage::Done)?;
            return Ok(RunSummary::short_circuit(&action, &ctx, Vec::new()));
        }

        let markers = or_fail(&mut ctx, MarkerStore::new(&self.config.marker_table))?;
        let modules = or_fail(&mut ctx, self.discover())?;
        let recorded = or_fail(&mut ctx, read_recorded(db, &markers, &modules))?;

        if action == Action::Status {
            let statuses = statuses(&modules, &recorded);
            self.print_status(&statuses);
            ctx.transition_to(RunStage::Done)?;
            return Ok(RunSummary::short_circuit(&action, &ctx, statuses));
        }

        let resolutions = or_fail(&mut ctx, resolve(&action, &modules, &recorded))?;
        for warning in resolutions.iter().filter_map(|r| r.warning.as_deref()) {
            self.console.warn(warning);
        }

        ctx.advance()?;
        let plan = or_fail(&mut ctx, ExecutionPlan::merge(&modules, &resolutions))?;
        log::debug!("{}", plan.summary());
        if let Some(path) = &self.config.plan_output {
            or_fail(&mut ctx, plan.write_to(path))?;
        }

        ctx.advance()?;
        if plan.is_empty() {
            self.console.info("Nothing to do");
        }
        let executor = Executor::new(
            or_fail(&mut ctx, self.unit_loader())?,
            markers,
            Rc::clone(&self.console),
            self.config.fragments_root(),
            ExecutorOptions {
                simulate: self.options.simulate,
                strict: self.config.strict,
            },
        );
        let report = or_fail(&mut ctx, executor.execute(db, &plan, &resolutions))?;

        if !report.modules.is_empty() {
            self.console.info(&format!("Result:\n{}", report.summary()));
        }

        if report.has_failures() {
            ctx.fail()?;
            self.console.error(&format!(
                "Run FAILED: {}",
                report.failed_modules().join(", ")
            ));
        } else {
            ctx.advance()?;
            self.console.info("Run DONE");
        }

        Ok(RunSummary {
            action,
            stage: ctx.current_stage(),
            failed_at: ctx.failed_at(),
            statuses: Vec::new(),
            plan,
            report,
        })
    }

    fn discover(&self) -> Result<Vec<ModuleContribution>> {
        let dir = self.config.dialect_dir(self.options.dialect);
        let modules = discover_modules(&dir, &self.config.module_order)?;
        if modules.is_empty() {
            self.console
                .warn(&format!("No module descriptors found in {}", dir.display()));
        }
        log::info!("Discovered {} modules in {}", modules.len(), dir.display());
        Ok(modules)
    }

    fn unit_loader(&self) -> Result<UnitLoader> {
        let mut plugins = ManifestRegistry::new();
        if let Some(dir) = &self.config.units_dir {
            let count = plugins.load_from_directory(dir)?;
            log::debug!("Loaded {} unit manifests from {}", count, dir.display());
        }
        Ok(UnitLoader::new(
            self.units.clone(),
            plugins,
            Rc::clone(&self.console),
            self.config.home_paths(),
        ))
    }

    fn print_status(&self, statuses: &[ModuleStatus]) {
        self.console.info(&format!(
            "{:<24} {:>8} {:>8}  {}",
            "MODULE", "RECORDED", "LATEST", "STATE"
        ));
        for status in statuses {
            self.console.info(&status.to_string());
        }
        let pending = statuses.iter().filter(|s| s.is_pending()).count();
        self.console
            .info(&format!("{} of {} modules pending", pending, statuses.len()));
    }
}

/// Move the run to FAILED when `result` is an error
fn or_fail<T, E: Into<MigrateError>>(ctx: &mut RunContext, result: std::result::Result<T, E>) -> Result<T> {
    match result {
        Ok(value) => Ok(value),
        Err(e) => {
            let error = e.into();
            log::error!("Run failed during {}: {}", ctx.current_stage(), error);
            ctx.fail()?;
            Err(error)
        }
    }
}

/// Recorded versions of the discovered modules
fn read_recorded(
    db: &mut dyn Database,
    markers: &MarkerStore,
    modules: &[ModuleContribution],
) -> Result<HashMap<String, Version>> {
    let raw = markers.read_all(db)?;
    let mut recorded = HashMap::with_capacity(raw.len());
    for module in modules {
        if let Some(version) = parse_marker(module.id(), raw.get(module.id()), module.width())? {
            recorded.insert(module.id().to_string(), version);
        }
    }
    for orphan in raw.keys().filter(|id| !modules.iter().any(|m| m.id() == id.as_str())) {
        log::debug!("Marker for '{}' has no descriptor", orphan);
    }
    Ok(recorded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::{ConsoleLevel, MemoryConsole};
    use crate::db::SqliteDatabase;
    use std::fs;
    use tempfile::TempDir;

    const DESCRIPTOR: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<contributions>
  <module id="core" version="001">
    <create type="sqlstatementlist" name="h2/core/001.sql"/>
  </module>
  <module id="core" version="002">
    <create type="sqlstatementlist" name="h2/core/002.sql"/>
  </module>
  <uninstall id="core">
    <drop type="sqlstatementlist" name="h2/core/drop.sql"/>
  </uninstall>
</contributions>
"#;

    fn contributions() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("h2/core")).unwrap();
        fs::write(root.join("h2/core.xml"), DESCRIPTOR).unwrap();
        fs::write(root.join("h2/core/001.sql"), "CREATE TABLE core_item (id INTEGER, name TEXT);").unwrap();
        fs::write(
            root.join("h2/core/002.sql"),
            "CREATE TABLE core_item (id INTEGER, name TEXT, body TEXT);",
        )
        .unwrap();
        fs::write(root.join("h2/core/drop.sql"), "DROP TABLE core_item;").unwrap();
        dir
    }

    fn orchestrator(dir: &TempDir, action: Action, console: &Rc<MemoryConsole>) -> Orchestrator {
        let config = MigratorConfig {
            database_url: "sqlite::memory:".to_string(),
            contributions_dir: dir.path().to_path_buf(),
            ..MigratorConfig::default()
        };
        let console: Rc<dyn Console> = console.clone();
        Orchestrator::new(config, RunOptions::new(action, Dialect::H2), console)
    }

    #[test]
    fn test_connection_only_short_circuits() {
        let dir = contributions();
        let console = Rc::new(MemoryConsole::new(false));
        let summary = orchestrator(&dir, Action::ConnectionOnly, &console).run().unwrap();

        assert!(summary.succeeded());
        assert!(summary.plan.is_empty());
        assert!(console.contains(ConsoleLevel::Info, "Connection OK"));
    }

    #[test]
    fn test_unsupported_url_is_connection_error() {
        let dir = contributions();
        let console = Rc::new(MemoryConsole::new(false));
        let mut orchestrator = orchestrator(&dir, Action::ConnectionOnly, &console);
        orchestrator.config.database_url = "mysql://localhost/cms".to_string();

        assert!(matches!(orchestrator.run().unwrap_err(), MigrateError::Connection(_)));
    }

    #[test]
    fn test_install_then_status() {
        let dir = contributions();
        let mut db = SqliteDatabase::open_in_memory().unwrap();
        let console = Rc::new(MemoryConsole::new(false));

        let summary = orchestrator(&dir, Action::Install, &console).run_on(&mut db).unwrap();
        assert!(summary.succeeded());
        assert_eq!(summary.plan.len(), 1);

        let summary = orchestrator(&dir, Action::Status, &console).run_on(&mut db).unwrap();
        assert_eq!(summary.statuses.len(), 1);
        assert_eq!(summary.statuses[0].recorded, Some(Version::new(2, 3)));
        assert!(console.contains(ConsoleLevel::Info, "0 of 1 modules pending"));
    }

    #[test]
    fn test_status_never_creates_marker_table() {
        let dir = contributions();
        let mut db = SqliteDatabase::open_in_memory().unwrap();
        let console = Rc::new(MemoryConsole::new(false));

        orchestrator(&dir, Action::Status, &console).run_on(&mut db).unwrap();
        assert!(!MarkerStore::default().exists(&mut db).unwrap());
        assert!(console.contains(ConsoleLevel::Info, "not installed"));
    }

    #[test]
    fn test_version_skew_aborts_before_execution() {
        let dir = contributions();
        let mut db = SqliteDatabase::open_in_memory().unwrap();
        MarkerStore::default().write(&mut db, "core", Version::new(5, 3)).unwrap();
        let console = Rc::new(MemoryConsole::new(false));

        let err = orchestrator(&dir, Action::Update, &console).run_on(&mut db).unwrap_err();
        assert!(matches!(err, MigrateError::VersionSkew { .. }));
        assert!(db.query("SELECT * FROM core_item").is_err());
    }

    #[test]
    fn test_failed_module_ends_in_failed_stage() {
        let dir = contributions();
        fs::write(dir.path().join("h2/core/002.sql"), "ALTER TABLE nowhere ADD COLUMN x TEXT;").unwrap();
        let mut db = SqliteDatabase::open_in_memory().unwrap();
        let console = Rc::new(MemoryConsole::new(false));

        let summary = orchestrator(&dir, Action::Install, &console).run_on(&mut db).unwrap();
        assert!(!summary.succeeded());
        assert_eq!(summary.failed_at, Some(RunStage::Executing));
        assert!(console.contains(ConsoleLevel::Error, "Run FAILED: core"));
    }

    #[test]
    fn test_plan_output_written() {
        let dir = contributions();
        let mut db = SqliteDatabase::open_in_memory().unwrap();
        let console = Rc::new(MemoryConsole::new(false));
        let plan_path = dir.path().join("merged.xml");

        let mut orchestrator = orchestrator(&dir, Action::Install, &console);
        orchestrator.config.plan_output = Some(plan_path.clone());
        orchestrator.run_on(&mut db).unwrap();

        let written = fs::read_to_string(&plan_path).unwrap();
        assert!(written.contains("<module id=\"core\" version=\"002\">\r\n"));
    }

    #[test]
    fn test_empty_dialect_dir_warns() {
        let dir = contributions();
        let mut db = SqliteDatabase::open_in_memory().unwrap();
        let console = Rc::new(MemoryConsole::new(false));

        let mut orchestrator = orchestrator(&dir, Action::Install, &console);
        orchestrator.options.dialect = Dialect::Oracle;
        let summary = orchestrator.run_on(&mut db).unwrap();

        assert!(summary.succeeded());
        assert!(console.contains(ConsoleLevel::Warn, "No module descriptors"));
    }
}
