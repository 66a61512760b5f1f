//! Version Resolver
//!
//! Decides, per module, which blocks an action selects given the module's
//! latest declared version and the version recorded in the database.
//!
//! # Resolution Rules
//!
//! | Action | Recorded | Tags |
//! |--------|----------|------|
//! | INSTALL | none | `Current(latest)` |
//! | INSTALL | some | none (warning) |
//! | UPDATE | `v < latest` | `Previous(v+1) .. Previous(latest)` |
//! | UPDATE | `v == latest` | none |
//! | UPDATE | `v > latest` | `VersionSkew` |
//! | UPDATE | none | none (warning) |
//! | ALL | any | INSTALL or UPDATE as applicable, then `Optimize` |
//! | OPTIMIZE | some | `Optimize` |
//! | UNINSTALL | some | `Uninstall`, modules in reverse discovery order |
//! | FORCE_UNINSTALL(m) | any | `Uninstall` for `m` only |
//! | STATUS, CONNECTION_ONLY | any | none |
//!
//! # Design
//!
//! - **Pure logic**: no I/O; recorded versions are read by the caller
//! - **Discovery order wins**: modules are never reordered by version number

use crate::contribution::{ModuleContribution, Version};
use crate::error::{MigrateError, Result};
use crate::types::Action;
use std::collections::HashMap;
use std::fmt;

/// Selector for one block of a module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VersionTag {
    /// Newest block, for fresh installs
    Current(Version),
    /// One historical block, for incremental updates
    Previous(Version),
    /// The module's teardown block set
    Uninstall,
    /// The module's optimize block set
    Optimize,
}

impl VersionTag {
    /// Version selected by this tag, for versioned tags
    pub fn version(self) -> Option<Version> {
        match self {
            Self::Current(v) | Self::Previous(v) => Some(v),
            Self::Uninstall | Self::Optimize => None,
        }
    }
}

impl fmt::Display for VersionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Current(v) => write!(f, "CURRENT@{}", v),
            Self::Previous(v) => write!(f, "PREVIOUS@{}", v),
            Self::Uninstall => write!(f, "UNINSTALL"),
            Self::Optimize => write!(f, "OPTIMIZE"),
        }
    }
}

/// `(module, recorded, latest)` triple reported by STATUS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleStatus {
    pub module: String,
    pub recorded: Option<Version>,
    pub latest: Version,
}

impl ModuleStatus {
    /// Returns true if an UPDATE or INSTALL would select blocks
    pub fn is_pending(&self) -> bool {
        self.recorded.is_none_or(|v| v < self.latest)
    }
}

impl fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let recorded = self
            .recorded
            .map(|v| v.to_string())
            .unwrap_or_else(|| "-".to_string());
        let state = match self.recorded {
            None => "not installed",
            Some(v) if v < self.latest => "update pending",
            Some(v) if v > self.latest => "database ahead",
            Some(_) => "current",
        };
        write!(
            f,
            "{:<24} {:>8} {:>8}  {}",
            self.module,
            recorded,
            self.latest.to_string(),
            state
        )
    }
}

/// What the resolver decided for one module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleResolution {
    pub module: String,
    pub recorded: Option<Version>,
    pub latest: Version,
    /// Tags in application order
    pub tags: Vec<VersionTag>,
    /// Why the module was skipped, when the skip deserves a warning
    pub warning: Option<String>,
    /// Modules that must be uninstalled first (normal UNINSTALL only)
    pub dependents: Vec<String>,
}

impl ModuleResolution {
    fn new(module: &ModuleContribution, recorded: Option<Version>) -> Self {
        Self {
            module: module.id().to_string(),
            recorded,
            latest: module.latest_version(),
            tags: Vec::new(),
            warning: None,
            dependents: Vec::new(),
        }
    }

    /// Highest version a successful run leaves recorded, if the tags advance it
    pub fn target_version(&self) -> Option<Version> {
        self.tags.iter().filter_map(|t| t.version()).max()
    }

    pub fn is_teardown(&self) -> bool {
        self.tags.contains(&VersionTag::Uninstall)
    }
}

/// Tags that bring one module from `recorded` up to `latest`.
///
/// `install` and `update` select which of the two cases the action covers;
/// ALL enables both.
pub fn resolve_upgrade(
    module: &str,
    latest: Version,
    recorded: Option<Version>,
    install: bool,
    update: bool,
) -> Result<(Vec<VersionTag>, Option<String>)> {
    match recorded {
        None if install => Ok((vec![VersionTag::Current(latest)], None)),
        None => Ok((
            Vec::new(),
            Some(format!("module '{}' is not installed, nothing to update", module)),
        )),
        Some(v) if v > latest => Err(MigrateError::VersionSkew {
            module: module.to_string(),
            recorded: v,
            latest,
        }),
        Some(_) if !update => Ok((
            Vec::new(),
            Some(format!("module '{}' is already installed, skipping", module)),
        )),
        Some(v) => {
            let tags = (v.number() + 1..=latest.number())
                .map(|n| VersionTag::Previous(Version::new(n, latest.width())))
                .collect();
            Ok((tags, None))
        }
    }
}

/// Resolve `action` for every discovered module.
///
/// The returned resolutions are in execution order: discovery order, or
/// reverse discovery order for UNINSTALL.
pub fn resolve(
    action: &Action,
    modules: &[ModuleContribution],
    recorded: &HashMap<String, Version>,
) -> Result<Vec<ModuleResolution>> {
    let mut resolutions = Vec::with_capacity(modules.len());

    match action {
        Action::ConnectionOnly | Action::Status => {
            for module in modules {
                resolutions.push(ModuleResolution::new(module, recorded.get(module.id()).copied()));
            }
        }

        Action::Install | Action::Update | Action::All => {
            let install = matches!(action, Action::Install | Action::All);
            let update = matches!(action, Action::Update | Action::All);
            for module in modules {
                let mut resolution = ModuleResolution::new(module, recorded.get(module.id()).copied());
                let (tags, warning) =
                    resolve_upgrade(module.id(), resolution.latest, resolution.recorded, install, update)?;
                resolution.tags = tags;
                resolution.warning = warning;
                if matches!(action, Action::All) && module.optimize_entries().is_some() {
                    resolution.tags.push(VersionTag::Optimize);
                    resolution.warning = None;
                }
                resolutions.push(resolution);
            }
        }

        Action::Optimize => {
            for module in modules {
                let mut resolution = ModuleResolution::new(module, recorded.get(module.id()).copied());
                if resolution.recorded.is_none() {
                    resolution.warning = Some(format!("module '{}' is not installed, nothing to optimize", module.id()));
                } else if module.optimize_entries().is_some() {
                    resolution.tags.push(VersionTag::Optimize);
                }
                resolutions.push(resolution);
            }
        }

        Action::Uninstall => {
            for (index, module) in modules.iter().enumerate().rev() {
                let mut resolution = ModuleResolution::new(module, recorded.get(module.id()).copied());
                if resolution.recorded.is_some() {
                    if module.uninstall_entries().is_some() {
                        resolution.tags.push(VersionTag::Uninstall);
                        resolution.dependents = modules[index + 1..]
                            .iter()
                            .map(|m| m.id().to_string())
                            .collect();
                    } else {
                        resolution.warning =
                            Some(format!("module '{}' declares no uninstall block, skipping", module.id()));
                    }
                }
                resolutions.push(resolution);
            }
        }

        Action::ForceUninstall(target) => {
            let module = modules
                .iter()
                .find(|m| m.id() == target)
                .ok_or_else(|| MigrateError::UnknownModule(target.clone()))?;
            if module.uninstall_entries().is_none() {
                return Err(MigrateError::NoTeardown(target.clone()));
            }
            let mut resolution = ModuleResolution::new(module, recorded.get(module.id()).copied());
            resolution.tags.push(VersionTag::Uninstall);
            resolutions.push(resolution);
        }
    }

    for resolution in &resolutions {
        if !resolution.tags.is_empty() {
            log::debug!(
                "Resolved {}: [{}]",
                resolution.module,
                resolution
                    .tags
                    .iter()
                    .map(|t| t.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
    }

    Ok(resolutions)
}

/// STATUS triples for every module, in discovery order
pub fn statuses(modules: &[ModuleContribution], recorded: &HashMap<String, Version>) -> Vec<ModuleStatus> {
    modules
        .iter()
        .map(|m| ModuleStatus {
            module: m.id().to_string(),
            recorded: recorded.get(m.id()).copied(),
            latest: m.latest_version(),
        })
        .collect()
}
