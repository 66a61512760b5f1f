//! Plan Merger
//!
//! Turns the resolver's per-module tags into one ordered execution plan.
//!
//! # Design
//!
//! - **Pure logic**: merging reads the contributions and never mutates them
//! - **Order-preserving**: steps follow resolution order, so one module's
//!   blocks are contiguous and never interleave with another module's
//! - **Byte-exact entries**: entries keep their raw attributes, so the
//!   aggregate document written by [`ExecutionPlan::to_xml`] repeats the
//!   source text of every entry

use super::resolver::{ModuleResolution, VersionTag};
use crate::contribution::{
    DEFAULT_VERSION_WIDTH, ELEMENT_MODULE, ELEMENT_OPTIMIZE, ELEMENT_UNINSTALL, ModuleContribution,
    OperationEntry,
};
use crate::error::{MigrateError, Result};
use std::fmt;
use std::path::Path;

const LINE_END: &str = "\r\n";
const INDENT: &str = "  ";

/// One block of one module, ready to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanStep {
    pub module: String,
    pub tag: VersionTag,
    pub entries: Vec<OperationEntry>,
}

impl PlanStep {
    /// Label used in messages: the version, or `uninstall` / `optimize`
    pub fn label(&self) -> String {
        match self.tag {
            VersionTag::Current(v) | VersionTag::Previous(v) => v.to_string(),
            VersionTag::Uninstall => ELEMENT_UNINSTALL.to_string(),
            VersionTag::Optimize => ELEMENT_OPTIMIZE.to_string(),
        }
    }

    /// Opening element; blocks whose width differs from `root_width` carry their own
    fn open_tag(&self, root_width: usize) -> String {
        match self.tag {
            VersionTag::Current(v) | VersionTag::Previous(v) if v.width() as usize != root_width => format!(
                "<{} id=\"{}\" version=\"{}\" width=\"{}\">",
                ELEMENT_MODULE,
                self.module,
                v,
                v.width()
            ),
            VersionTag::Current(v) | VersionTag::Previous(v) => {
                format!("<{} id=\"{}\" version=\"{}\">", ELEMENT_MODULE, self.module, v)
            }
            VersionTag::Uninstall => format!("<{} id=\"{}\">", ELEMENT_UNINSTALL, self.module),
            VersionTag::Optimize => format!("<{} id=\"{}\">", ELEMENT_OPTIMIZE, self.module),
        }
    }

    fn close_tag(&self) -> String {
        match self.tag {
            VersionTag::Current(_) | VersionTag::Previous(_) => format!("</{}>", ELEMENT_MODULE),
            VersionTag::Uninstall => format!("</{}>", ELEMENT_UNINSTALL),
            VersionTag::Optimize => format!("</{}>", ELEMENT_OPTIMIZE),
        }
    }
}

impl fmt::Display for PlanStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({} entries)", self.module, self.tag, self.entries.len())
    }
}

/// The ordered sequence of blocks a run executes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionPlan {
    steps: Vec<PlanStep>,
}

impl ExecutionPlan {
    /// Merge the tagged blocks of every resolution into a plan.
    ///
    /// # Errors
    ///
    /// - `UnknownModule` if a resolution names a module not in `modules`
    /// - `MissingVersionBlock` if a tag points at a version the module lacks
    /// - `NoTeardown` if an `Uninstall` tag meets a module without teardown
    pub fn merge(modules: &[ModuleContribution], resolutions: &[ModuleResolution]) -> Result<Self> {
        let mut steps = Vec::new();

        for resolution in resolutions {
            if resolution.tags.is_empty() {
                continue;
            }
            let module = modules
                .iter()
                .find(|m| m.id() == resolution.module)
                .ok_or_else(|| MigrateError::UnknownModule(resolution.module.clone()))?;

            for &tag in &resolution.tags {
                let entries = match tag {
                    VersionTag::Current(version) | VersionTag::Previous(version) => module
                        .block(version)
                        .map(|b| b.entries.clone())
                        .ok_or_else(|| MigrateError::MissingVersionBlock {
                            module: module.id().to_string(),
                            version,
                        })?,
                    VersionTag::Uninstall => module
                        .uninstall_entries()
                        .map(<[OperationEntry]>::to_vec)
                        .ok_or_else(|| MigrateError::NoTeardown(module.id().to_string()))?,
                    VersionTag::Optimize => match module.optimize_entries() {
                        Some(entries) => entries.to_vec(),
                        None => {
                            log::debug!("Module '{}' has no optimize block", module.id());
                            continue;
                        }
                    },
                };
                steps.push(PlanStep {
                    module: module.id().to_string(),
                    tag,
                    entries,
                });
            }
        }

        Ok(Self { steps })
    }

    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Steps of one module, in plan order
    pub fn steps_for<'a>(&'a self, module: &'a str) -> impl Iterator<Item = &'a PlanStep> + 'a {
        self.steps.iter().filter(move |s| s.module == module)
    }

    /// Total number of operation entries
    pub fn entry_count(&self) -> usize {
        self.steps.iter().map(|s| s.entries.len()).sum()
    }

    /// Returns a summary of the plan for logging/display.
    pub fn summary(&self) -> String {
        let mut lines = vec![format!(
            "Execution Plan: {} blocks, {} entries",
            self.steps.len(),
            self.entry_count()
        )];
        for (i, step) in self.steps.iter().enumerate() {
            lines.push(format!("  {}. {}", i + 1, step));
        }
        lines.join("\n")
    }

    /// Render the plan as an aggregate descriptor document
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        out.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
        out.push_str(LINE_END);

        let root_width = match self.declared_width() {
            Some(width) => {
                out.push_str(&format!("<contributions width=\"{}\">", width));
                width as usize
            }
            None => {
                out.push_str("<contributions>");
                DEFAULT_VERSION_WIDTH
            }
        };
        out.push_str(LINE_END);

        for step in &self.steps {
            out.push_str(INDENT);
            out.push_str(&step.open_tag(root_width));
            out.push_str(LINE_END);
            for entry in &step.entries {
                out.push_str(INDENT);
                out.push_str(INDENT);
                out.push_str(&entry.to_xml());
                out.push_str(LINE_END);
            }
            out.push_str(INDENT);
            out.push_str(&step.close_tag());
            out.push_str(LINE_END);
        }

        out.push_str("</contributions>");
        out.push_str(LINE_END);
        out
    }

    /// Write the aggregate document to `path`
    pub fn write_to(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_xml())?;
        log::info!("Wrote merged plan ({} blocks) to {}", self.steps.len(), path.display());
        Ok(())
    }

    /// Version width to declare on the root, when it is not the default
    fn declared_width(&self) -> Option<u8> {
        self.steps
            .iter()
            .find_map(|s| s.tag.version())
            .map(|v| v.width())
            .filter(|&w| w as usize != DEFAULT_VERSION_WIDTH)
    }
}
