//! modmigrate - Main entry point
//!
//! Parses the command line, layers configuration, runs one migration and
//! maps the outcome to the process exit code.

use log::{debug, error, info};
use modmigrate::cli::Cli;
use modmigrate::{Console, MigrateError, MigratorConfig, Orchestrator, RunSummary, TerminalConsole};
use std::process::ExitCode;
use std::rc::Rc;

/// Exit code for usage errors, matching clap's own
const EXIT_USAGE: u8 = 2;

/// Initialize the logger with appropriate settings
fn init_logger(verbose: bool) {
    use env_logger::Builder;
    use std::io::Write;

    Builder::from_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}:{}] {}",
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .filter_level(if verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .parse_default_env() // Allows RUST_LOG env var to override
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse_args();
    init_logger(cli.verbose);
    info!("modmigrate starting up");
    debug!("CLI arguments parsed: {:?}", cli);

    let console: Rc<dyn Console> = Rc::new(TerminalConsole::new(cli.verbose));

    match run(&cli, Rc::clone(&console)) {
        Ok(summary) if summary.succeeded() => ExitCode::SUCCESS,
        Ok(summary) => {
            error!("Run ended in {} (failed during {:?})", summary.stage, summary.failed_at);
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("{:#}", e);
            console.error(&format!("{:#}", e));
            let usage = matches!(
                e.downcast_ref::<MigrateError>(),
                Some(MigrateError::Usage(_) | MigrateError::UnknownModule(_))
            );
            if usage {
                ExitCode::from(EXIT_USAGE)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

/// Load configuration (file, then environment, then flags) and run
fn run(cli: &Cli, console: Rc<dyn Console>) -> anyhow::Result<RunSummary> {
    let mut config = match &cli.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            MigratorConfig::load_from_file(path)?
        }
        None => MigratorConfig::default(),
    };
    config.apply_env_overrides();
    cli.apply_to(&mut config);
    config.validate()?;

    let summary = Orchestrator::new(config, cli.run_options(), console).run()?;
    Ok(summary)
}
