//! Plugin Unit Manifests
//!
//! The plugin layer of unit loading. A units directory holds one JSON
//! manifest per exposed class name; each manifest maps that class name onto
//! a built-in implementation plus constructor parameters. Plugin manifests
//! are consulted before the built-in registry, so a plugin may shadow a
//! built-in class name.
//!
//! # Manifest Format
//!
//! ```json
//! {
//!   "class": "com.example.cms.FixArticleTitles",
//!   "implementation": "builtin.HtmlUnescapeColumn",
//!   "description": "Unescape article titles written by the old editor",
//!   "params": { "table": "articles", "key": "id", "column": "title" }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during manifest operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ManifestError {
    /// Invalid manifest format
    #[error("Invalid unit manifest {origin}: {reason}")]
    InvalidFormat { origin: String, reason: String },

    /// Two manifests expose the same class name
    #[error("Class '{class}' is declared by more than one manifest")]
    DuplicateClass { class: String },

    /// IO error reading manifest
    #[error("Failed to read unit manifest: {reason}")]
    IoError { reason: String },
}

impl From<std::io::Error> for ManifestError {
    fn from(err: std::io::Error) -> Self {
        ManifestError::IoError {
            reason: err.to_string(),
        }
    }
}

/// Maps an exposed class name onto an implementation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnitManifest {
    /// Class name descriptors refer to
    pub class: String,

    /// Built-in implementation the class is backed by
    pub implementation: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Constructor parameters passed to the implementation
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl UnitManifest {
    /// Create a new manifest builder
    pub fn builder(class: impl Into<String>, implementation: impl Into<String>) -> ManifestBuilder {
        ManifestBuilder::new(class, implementation)
    }

    /// Load a manifest from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content, &path.display().to_string())
    }

    /// Load a manifest from a JSON string
    pub fn from_json(json: &str) -> Result<Self, ManifestError> {
        Self::parse(json, "<inline>")
    }

    fn parse(json: &str, origin: &str) -> Result<Self, ManifestError> {
        let manifest: Self = serde_json::from_str(json).map_err(|e| ManifestError::InvalidFormat {
            origin: origin.to_string(),
            reason: e.to_string(),
        })?;
        manifest.validate_structure(origin)?;
        Ok(manifest)
    }

    /// Validate the manifest structure itself
    fn validate_structure(&self, origin: &str) -> Result<(), ManifestError> {
        let invalid = |reason: String| ManifestError::InvalidFormat {
            origin: origin.to_string(),
            reason,
        };

        if self.class.trim().is_empty() {
            return Err(invalid("class must not be empty".to_string()));
        }
        if self.implementation.trim().is_empty() {
            return Err(invalid(format!("class '{}' has no implementation", self.class)));
        }
        // A manifest may not point at itself
        if self.class == self.implementation {
            return Err(invalid(format!("class '{}' is its own implementation", self.class)));
        }
        Ok(())
    }
}

/// Builder for creating UnitManifest instances
#[derive(Debug, Clone)]
pub struct ManifestBuilder {
    class: String,
    implementation: String,
    description: String,
    params: BTreeMap<String, String>,
}

impl ManifestBuilder {
    pub fn new(class: impl Into<String>, implementation: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            implementation: implementation.into(),
            description: String::new(),
            params: BTreeMap::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Add one constructor parameter
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> Result<UnitManifest, ManifestError> {
        let manifest = UnitManifest {
            class: self.class,
            implementation: self.implementation,
            description: self.description,
            params: self.params,
        };
        manifest.validate_structure("<builder>")?;
        Ok(manifest)
    }
}

/// Registry of plugin manifests keyed by class name
#[derive(Debug, Default)]
pub struct ManifestRegistry {
    manifests: HashMap<String, UnitManifest>,
}

impl ManifestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a manifest, rejecting a second manifest for the same class
    pub fn register(&mut self, manifest: UnitManifest) -> Result<(), ManifestError> {
        if self.manifests.contains_key(&manifest.class) {
            return Err(ManifestError::DuplicateClass {
                class: manifest.class,
            });
        }
        self.manifests.insert(manifest.class.clone(), manifest);
        Ok(())
    }

    pub fn get(&self, class: &str) -> Option<&UnitManifest> {
        self.manifests.get(class)
    }

    pub fn len(&self) -> usize {
        self.manifests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.manifests.is_empty()
    }

    /// Load all `*.json` manifests from a directory.
    ///
    /// A missing directory is not an error: the plugin layer is simply empty.
    pub fn load_from_directory(&mut self, dir: impl AsRef<Path>) -> Result<usize, ManifestError> {
        let dir = dir.as_ref();
        if !dir.exists() {
            return Ok(0);
        }

        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                paths.push(path);
            }
        }
        paths.sort();

        for path in &paths {
            let manifest = UnitManifest::from_file(path)?;
            log::debug!(
                "Plugin class '{}' -> {} ({})",
                manifest.class,
                manifest.implementation,
                path.display()
            );
            self.register(manifest)?;
        }

        Ok(paths.len())
    }

    /// Get all registered manifests
    pub fn all(&self) -> impl Iterator<Item = &UnitManifest> {
        self.manifests.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // UnitManifest Tests
    // =========================================================================

    #[test]
    fn test_manifest_from_json() {
        let json = r#"{
            "class": "com.example.FixTitles",
            "implementation": "builtin.HtmlUnescapeColumn",
            "params": {"table": "articles", "key": "id", "column": "title"}
        }"#;

        let manifest = UnitManifest::from_json(json).unwrap();
        assert_eq!(manifest.class, "com.example.FixTitles");
        assert_eq!(manifest.params.get("column").map(String::as_str), Some("title"));
        assert!(manifest.description.is_empty());
    }

    #[test]
    fn test_manifest_requires_implementation() {
        let json = r#"{"class": "com.example.A", "implementation": ""}"#;
        assert!(matches!(
            UnitManifest::from_json(json),
            Err(ManifestError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn test_manifest_self_reference_rejected() {
        let result = UnitManifest::builder("builtin.X", "builtin.X").build();
        assert!(result.is_err());
    }

    #[test]
    fn test_manifest_malformed_json() {
        assert!(matches!(
            UnitManifest::from_json("{ not json"),
            Err(ManifestError::InvalidFormat { .. })
        ));
    }

    // =========================================================================
    // Registry Tests
    // =========================================================================

    #[test]
    fn test_registry_rejects_duplicate_class() {
        let mut registry = ManifestRegistry::new();
        let manifest = UnitManifest::builder("com.example.A", "builtin.RemoveDuplicateRows")
            .build()
            .unwrap();
        registry.register(manifest.clone()).unwrap();
        assert!(matches!(
            registry.register(manifest),
            Err(ManifestError::DuplicateClass { .. })
        ));
    }

    #[test]
    fn test_registry_load_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("fix_titles.json"),
            r#"{"class": "com.example.FixTitles", "implementation": "builtin.HtmlUnescapeColumn"}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("README"), "not a manifest").unwrap();

        let mut registry = ManifestRegistry::new();
        let count = registry.load_from_directory(dir.path()).unwrap();
        assert_eq!(count, 1);
        assert!(registry.get("com.example.FixTitles").is_some());
    }

    #[test]
    fn test_registry_missing_directory_is_empty() {
        let mut registry = ManifestRegistry::new();
        let count = registry.load_from_directory("/nonexistent/units").unwrap();
        assert_eq!(count, 0);
        assert!(registry.is_empty());
    }
}
