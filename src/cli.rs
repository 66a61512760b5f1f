use crate::config::MigratorConfig;
use crate::contribution::is_valid_module_id;
use crate::orchestrator::RunOptions;
use crate::types::{Action, Dialect};
use clap::{ArgGroup, Parser};
use std::ffi::OsString;
use std::path::PathBuf;

/// Spelling of FORCE_UNINSTALL with the module glued to the flag
const LEGACY_FORCE_UNINSTALL: &str = "-FU";

/// modmigrate - versioned schema migrations for modular applications
#[derive(Parser, Debug)]
#[command(name = "modmigrate")]
#[command(about = "Install, update and tear down module schemas from versioned descriptors")]
#[command(version)]
#[command(group(
    ArgGroup::new("action")
        .required(true)
        .args(["connection_only", "install", "update", "optimize", "all", "status", "uninstall", "force_uninstall"])
))]
pub struct Cli {
    /// Only verify the database connection
    #[arg(short = 'C', long)]
    pub connection_only: bool,

    /// Fresh install of every module without a recorded version
    #[arg(short = 'I', long)]
    pub install: bool,

    /// Apply pending versions of every installed module
    #[arg(short = 'U', long)]
    pub update: bool,

    /// Run the optimize block of every installed module
    #[arg(short = 'O', long)]
    pub optimize: bool,

    /// Install or update each module as needed, then optimize
    #[arg(short = 'A', long)]
    pub all: bool,

    /// Report recorded and available versions
    #[arg(short = 'S', long)]
    pub status: bool,

    /// Tear down every installed module, later modules first
    #[arg(long)]
    pub uninstall: bool,

    /// Tear down one module regardless of the others (also `-FU<module>`)
    #[arg(long, value_name = "MODULE", value_parser = parse_module_id)]
    pub force_uninstall: Option<String>,

    /// Target dialect
    #[arg(short = 'T', long = "target", value_name = "MSSQL|ORACLE|POSTGRES|H2")]
    pub dialect: Dialect,

    /// Print every statement and unit invocation
    #[arg(short, long)]
    pub verbose: bool,

    /// Walk the plan without touching the database
    #[arg(short, long)]
    pub simulate: bool,

    /// Configuration file (JSON)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Database URL, overrides the configuration
    #[arg(long, value_name = "URL")]
    pub url: Option<String>,

    /// Descriptor root, overrides the configuration
    #[arg(long, value_name = "DIR")]
    pub contributions: Option<PathBuf>,

    /// Plugin unit manifest directory, overrides the configuration
    #[arg(long, value_name = "DIR")]
    pub units: Option<PathBuf>,

    /// Write the merged plan document to FILE
    #[arg(long, value_name = "FILE")]
    pub write_plan: Option<PathBuf>,

    /// Stop the run at the first module failure
    #[arg(long)]
    pub strict: bool,
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as clap::Parser>::parse_from(normalize_args(std::env::args_os()))
    }

    /// Parse after rewriting `-FU<module>` into `--force-uninstall <module>`
    pub fn try_parse_normalized<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString>,
    {
        Self::try_parse_from(normalize_args(args))
    }

    /// The selected action
    pub fn action(&self) -> Action {
        if let Some(module) = &self.force_uninstall {
            return Action::ForceUninstall(module.clone());
        }
        // The required action group guarantees exactly one flag is set
        if self.connection_only {
            Action::ConnectionOnly
        } else if self.install {
            Action::Install
        } else if self.update {
            Action::Update
        } else if self.optimize {
            Action::Optimize
        } else if self.all {
            Action::All
        } else if self.uninstall {
            Action::Uninstall
        } else {
            Action::Status
        }
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            action: self.action(),
            dialect: self.dialect,
            verbose: self.verbose,
            simulate: self.simulate,
        }
    }

    /// Apply command-line overrides on top of file and environment settings
    pub fn apply_to(&self, config: &mut MigratorConfig) {
        if let Some(url) = &self.url {
            config.database_url = url.clone();
        }
        if let Some(dir) = &self.contributions {
            config.contributions_dir = dir.clone();
        }
        if let Some(dir) = &self.units {
            config.units_dir = Some(dir.clone());
        }
        if let Some(path) = &self.write_plan {
            config.plan_output = Some(path.clone());
        }
        if self.strict {
            config.strict = true;
        }
    }
}

/// Rewrite `-FU<module>` into `--force-uninstall <module>`
pub fn normalize_args<I, T>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let mut out = Vec::new();
    for arg in args.into_iter().map(Into::into) {
        let legacy = arg
            .to_str()
            .and_then(|s| s.strip_prefix(LEGACY_FORCE_UNINSTALL))
            .map(str::to_string);
        match legacy {
            Some(module) => {
                out.push(OsString::from("--force-uninstall"));
                if !module.is_empty() {
                    out.push(OsString::from(module));
                }
            }
            None => out.push(arg),
        }
    }
    out
}

fn parse_module_id(value: &str) -> Result<String, String> {
    if is_valid_module_id(value) {
        Ok(value.to_string())
    } else {
        Err(format!("'{}' is not a valid module id", value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_no_args() {
        let result = Cli::try_parse_normalized(["modmigrate"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_update() {
        let cli = Cli::try_parse_normalized(["modmigrate", "-U", "-T", "POSTGRES"]).unwrap();
        assert_eq!(cli.action(), Action::Update);
        assert_eq!(cli.dialect, Dialect::Postgres);
        assert!(!cli.verbose);
        assert!(!cli.simulate);
    }

    #[test]
    fn test_cli_dialect_case_insensitive() {
        let cli = Cli::try_parse_normalized(["modmigrate", "-S", "-T", "h2"]).unwrap();
        assert_eq!(cli.dialect, Dialect::H2);
        assert_eq!(cli.action(), Action::Status);
    }

    #[test]
    fn test_cli_dialect_required() {
        assert!(Cli::try_parse_normalized(["modmigrate", "-I"]).is_err());
    }

    #[test]
    fn test_cli_unknown_dialect() {
        assert!(Cli::try_parse_normalized(["modmigrate", "-I", "-T", "MYSQL"]).is_err());
    }

    #[test]
    fn test_cli_contradictory_actions() {
        let result = Cli::try_parse_normalized(["modmigrate", "-I", "-U", "-T", "H2"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_legacy_force_uninstall() {
        let cli = Cli::try_parse_normalized(["modmigrate", "-FUversioning", "-T", "ORACLE"]).unwrap();
        assert_eq!(cli.action(), Action::ForceUninstall("versioning".to_string()));
    }

    #[test]
    fn test_cli_force_uninstall_needs_module() {
        assert!(Cli::try_parse_normalized(["modmigrate", "-FU", "-T", "H2"]).is_err());
        assert!(Cli::try_parse_normalized(["modmigrate", "--force-uninstall", "bad id", "-T", "H2"]).is_err());
    }

    #[test]
    fn test_cli_verbose_simulate() {
        let cli = Cli::try_parse_normalized(["modmigrate", "-A", "-T", "MSSQL", "-v", "-s"]).unwrap();
        let options = cli.run_options();
        assert_eq!(options.action, Action::All);
        assert!(options.verbose);
        assert!(options.simulate);
    }

    #[test]
    fn test_cli_overrides_config() {
        let cli = Cli::try_parse_normalized([
            "modmigrate",
            "-C",
            "-T",
            "H2",
            "--url",
            "sqlite::memory:",
            "--contributions",
            "/srv/contrib",
            "--write-plan",
            "/tmp/plan.xml",
            "--strict",
        ])
        .unwrap();

        let mut config = MigratorConfig::default();
        cli.apply_to(&mut config);
        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.contributions_dir, PathBuf::from("/srv/contrib"));
        assert_eq!(config.plan_output, Some(PathBuf::from("/tmp/plan.xml")));
        assert!(config.strict);
        assert_eq!(cli.action(), Action::ConnectionOnly);
    }

    #[test]
    fn test_normalize_leaves_other_args() {
        let args = normalize_args(["modmigrate", "-U", "-T", "H2"]);
        assert_eq!(args.len(), 4);
        assert_eq!(args[1], OsString::from("-U"));
    }
}
