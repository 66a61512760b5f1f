//! Engine modules: the part that turns discovered contributions into work.
//!
//! Resolution and merging are pure functions of their inputs. Only the
//! executor talks to the database.

pub mod executor;
pub mod plan;
pub mod resolver;
pub mod statements;

pub use executor::{Executor, ExecutorOptions, ModuleOutcome, ModuleReport, RunReport};
pub use plan::{ExecutionPlan, PlanStep};
pub use resolver::{ModuleResolution, ModuleStatus, VersionTag, resolve, resolve_upgrade, statuses};
pub use statements::split_statements;
