//! Configuration file handling.
//!
//! A run is configured by a JSON file, then environment variables, then
//! command-line flags, each layer overriding the previous one.

use crate::contribution::is_valid_module_id;
use crate::markers::{DEFAULT_MARKER_TABLE, MarkerStore};
use crate::types::Dialect;
use crate::unit_traits::HomePaths;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Overrides `database_url`
pub const ENV_DATABASE_URL: &str = "MODMIGRATE_DATABASE_URL";

/// Overrides `contributions_dir`
pub const ENV_CONTRIBUTIONS_DIR: &str = "MODMIGRATE_CONTRIBUTIONS_DIR";

/// Migration engine configuration that can be saved/loaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigratorConfig {
    /// Target database (`sqlite:<path>`, `sqlite::memory:`, `postgres://...`)
    pub database_url: String,

    /// Descriptor root; descriptors live in `<dir>/<dialect>/*.xml`
    pub contributions_dir: PathBuf,

    /// Root that fragment `name` paths are relative to (defaults to `contributions_dir`)
    pub fragments_dir: Option<PathBuf>,

    /// Plugin unit manifests
    pub units_dir: Option<PathBuf>,

    /// Application home injected into units
    pub home: PathBuf,

    /// Data home injected into units
    pub data_home: PathBuf,

    pub marker_table: String,

    /// Stop the whole run at the first module failure
    pub strict: bool,

    /// Explicit module order; unlisted modules follow in scan order
    pub module_order: Vec<String>,

    /// Where to write the merged plan document, if anywhere
    pub plan_output: Option<PathBuf>,
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            contributions_dir: PathBuf::from("contributions"),
            fragments_dir: None,
            units_dir: None,
            home: PathBuf::from("."),
            data_home: PathBuf::from("data"),
            marker_table: DEFAULT_MARKER_TABLE.to_string(),
            strict: false,
            module_order: Vec::new(),
            plan_output: None,
        }
    }
}

impl MigratorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Save configuration to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .context("Failed to serialize configuration to JSON")?;

        fs::write(&path, json)
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read configuration from {:?}", path.as_ref()))?;

        let config: Self =
            serde_json::from_str(&content).context("Failed to parse configuration JSON")?;

        Ok(config)
    }

    /// Apply `MODMIGRATE_*` overrides from the process environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup (the environment in production)
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_DATABASE_URL).filter(|v| !v.trim().is_empty()) {
            log::debug!("{} overrides database_url", ENV_DATABASE_URL);
            self.database_url = url;
        }
        if let Some(dir) = lookup(ENV_CONTRIBUTIONS_DIR).filter(|v| !v.trim().is_empty()) {
            log::debug!("{} overrides contributions_dir", ENV_CONTRIBUTIONS_DIR);
            self.contributions_dir = PathBuf::from(dir);
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.database_url.trim().is_empty() {
            anyhow::bail!(
                "Database URL must be specified (config, {} or --url)",
                ENV_DATABASE_URL
            );
        }

        MarkerStore::new(&self.marker_table)
            .map_err(|e| anyhow::anyhow!("{}", e))?;

        let mut seen = HashSet::new();
        for id in &self.module_order {
            if !is_valid_module_id(id) {
                anyhow::bail!("module_order contains invalid module id '{}'", id);
            }
            if !seen.insert(id) {
                anyhow::bail!("module_order lists '{}' more than once", id);
            }
        }

        Ok(())
    }

    /// Directory holding `dialect`'s descriptors
    pub fn dialect_dir(&self, dialect: Dialect) -> PathBuf {
        self.contributions_dir.join(dialect.fragment_dir())
    }

    /// Root for fragment file paths
    pub fn fragments_root(&self) -> &Path {
        self.fragments_dir
            .as_deref()
            .unwrap_or(self.contributions_dir.as_path())
    }

    pub fn home_paths(&self) -> HomePaths {
        HomePaths {
            app_home: self.home.clone(),
            data_home: self.data_home.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_test_config() -> MigratorConfig {
        MigratorConfig {
            database_url: "sqlite::memory:".to_string(),
            contributions_dir: PathBuf::from("/opt/cms/contributions"),
            module_order: vec!["core".to_string(), "search".to_string()],
            ..MigratorConfig::default()
        }
    }

    #[test]
    fn test_roundtrip_save_load() {
        let config = create_test_config();
        let temp_file = NamedTempFile::new().unwrap();

        config.save_to_file(temp_file.path()).unwrap();
        let loaded = MigratorConfig::load_from_file(temp_file.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(br#"{"database_url": "sqlite:/tmp/app.db"}"#)
            .unwrap();
        temp_file.flush().unwrap();

        let loaded = MigratorConfig::load_from_file(temp_file.path()).unwrap();
        assert_eq!(loaded.marker_table, "schema_version");
        assert_eq!(loaded.contributions_dir, PathBuf::from("contributions"));
        assert!(!loaded.strict);
    }

    #[test]
    fn test_load_nonexistent_file() {
        assert!(MigratorConfig::load_from_file("/nonexistent/path").is_err());
    }

    #[test]
    fn test_load_invalid_json() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"{ invalid json }").unwrap();
        temp_file.flush().unwrap();

        assert!(MigratorConfig::load_from_file(temp_file.path()).is_err());
    }

    #[test]
    fn test_load_json_wrong_type_fails() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(br#"{"strict": "yes"}"#).unwrap();
        temp_file.flush().unwrap();

        assert!(MigratorConfig::load_from_file(temp_file.path()).is_err());
    }

    // =========================================================================
    // Validation Tests
    // =========================================================================

    #[test]
    fn test_validation_valid_config() {
        assert!(create_test_config().validate().is_ok());
    }

    #[test]
    fn test_validation_empty_url() {
        let config = MigratorConfig::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_bad_marker_table() {
        let mut config = create_test_config();
        config.marker_table = "schema version".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_duplicate_module_order() {
        let mut config = create_test_config();
        config.module_order = vec!["core".to_string(), "core".to_string()];
        assert!(config.validate().is_err());
    }

    // =========================================================================
    // Override Tests
    // =========================================================================

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_DATABASE_URL, "sqlite:/srv/cms.db"),
            (ENV_CONTRIBUTIONS_DIR, "/srv/contrib"),
        ]
        .into_iter()
        .collect();

        let mut config = create_test_config();
        config.apply_overrides_from(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.database_url, "sqlite:/srv/cms.db");
        assert_eq!(config.contributions_dir, PathBuf::from("/srv/contrib"));
    }

    #[test]
    fn test_empty_env_values_ignored() {
        let mut config = create_test_config();
        config.apply_overrides_from(|_| Some("  ".to_string()));
        assert_eq!(config.database_url, "sqlite::memory:");
    }

    #[test]
    fn test_paths() {
        let mut config = create_test_config();
        assert_eq!(
            config.dialect_dir(Dialect::Postgres),
            PathBuf::from("/opt/cms/contributions/postgres")
        );
        assert_eq!(config.fragments_root(), Path::new("/opt/cms/contributions"));

        config.fragments_dir = Some(PathBuf::from("/opt/cms/sql"));
        assert_eq!(config.fragments_root(), Path::new("/opt/cms/sql"));
    }
}
