//! Dynamic unit loading
//!
//! Two layers resolve a class name:
//!
//! 1. the plugin layer, built from JSON manifests in the units directory
//! 2. the base registry of built-in constructors
//!
//! Plugin manifests are consulted first, so a plugin may shadow a built-in
//! class name. Every call to [`UnitLoader::load_dynamic_part`] creates a
//! fresh instance and injects the run's console and home paths.

use crate::console::Console;
use crate::error::{MigrateError, Result};
use crate::unit_manifest::ManifestRegistry;
use crate::unit_traits::{HomePaths, MigrationUnit};
use crate::units::{UnitFactory, UnitParams, builtin_factories};
use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;

/// Base layer: class name to constructor
#[derive(Default, Clone)]
pub struct UnitRegistry {
    factories: HashMap<String, UnitFactory>,
}

impl UnitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in unit
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for (class, factory) in builtin_factories() {
            registry.register(class, factory);
        }
        registry
    }

    /// Register a constructor, replacing any previous one for `class`
    pub fn register(&mut self, class: impl Into<String>, factory: UnitFactory) {
        self.factories.insert(class.into(), factory);
    }

    pub fn get(&self, class: &str) -> Option<UnitFactory> {
        self.factories.get(class).copied()
    }

    pub fn contains(&self, class: &str) -> bool {
        self.factories.contains_key(class)
    }
}

/// Resolves class names and hands out injected unit instances
pub struct UnitLoader {
    base: UnitRegistry,
    plugins: ManifestRegistry,
    console: Rc<dyn Console>,
    home: HomePaths,
}

impl UnitLoader {
    pub fn new(base: UnitRegistry, plugins: ManifestRegistry, console: Rc<dyn Console>, home: HomePaths) -> Self {
        Self {
            base,
            plugins,
            console,
            home,
        }
    }

    /// Built-in registry plus every manifest found in `units_dir`
    pub fn from_directory(units_dir: &Path, console: Rc<dyn Console>, home: HomePaths) -> Result<Self> {
        let mut plugins = ManifestRegistry::new();
        let count = plugins.load_from_directory(units_dir)?;
        log::debug!("Loaded {} plugin unit manifests from {}", count, units_dir.display());
        Ok(Self::new(UnitRegistry::with_builtins(), plugins, console, home))
    }

    /// Returns true if `class` resolves in either layer
    pub fn can_resolve(&self, class: &str) -> bool {
        match self.plugins.get(class) {
            Some(manifest) => self.base.contains(&manifest.implementation),
            None => self.base.contains(class),
        }
    }

    /// Create a fresh, injected instance of `class`.
    ///
    /// # Errors
    ///
    /// - `ClassResolution` if no layer knows the class (or a plugin points at
    ///   an unknown implementation)
    /// - `Instantiation` if the constructor or the injection fails
    pub fn load_dynamic_part(&self, class: &str) -> Result<Box<dyn MigrationUnit>> {
        let (factory, params) = match self.plugins.get(class) {
            Some(manifest) => {
                let factory = self.base.get(&manifest.implementation).ok_or_else(|| {
                    MigrateError::ClassResolution {
                        class: format!("{} (implementation {})", class, manifest.implementation),
                    }
                })?;
                (factory, UnitParams::with_values(class, manifest.params.clone()))
            }
            None => {
                let factory = self.base.get(class).ok_or_else(|| MigrateError::ClassResolution {
                    class: class.to_string(),
                })?;
                (factory, UnitParams::new(class))
            }
        };

        let instantiation = |reason: String| MigrateError::Instantiation {
            class: class.to_string(),
            reason,
        };

        let mut unit = factory(&params).map_err(|e| instantiation(e.to_string()))?;
        unit.set_console(Rc::clone(&self.console))
            .map_err(|e| instantiation(e.to_string()))?;
        unit.set_home_paths(self.home.clone())
            .map_err(|e| instantiation(e.to_string()))?;

        log::debug!("Instantiated unit {}", class);
        Ok(unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::MemoryConsole;
    use crate::db::{Database, SqliteDatabase};
    use crate::unit_manifest::UnitManifest;
    use crate::unit_traits::{METHOD_RUN, UnitEnvironment, UnitError};
    use crate::units::{dedupe, html_unescape};

    struct Noop {
        env: UnitEnvironment,
    }

    impl MigrationUnit for Noop {
        fn class_name(&self) -> &str {
            "test.Noop"
        }
        fn environment(&self) -> &UnitEnvironment {
            &self.env
        }
        fn environment_mut(&mut self) -> &mut UnitEnvironment {
            &mut self.env
        }
        fn run(&mut self, _db: &mut dyn Database) -> std::result::Result<(), UnitError> {
            Ok(())
        }
    }

    fn noop(_params: &UnitParams) -> std::result::Result<Box<dyn MigrationUnit>, UnitError> {
        Ok(Box::new(Noop {
            env: UnitEnvironment::new(),
        }))
    }

    fn loader(plugins: ManifestRegistry) -> UnitLoader {
        let mut base = UnitRegistry::with_builtins();
        base.register("test.Noop", noop);
        UnitLoader::new(base, plugins, Rc::new(MemoryConsole::new(false)), HomePaths::default())
    }

    #[test]
    fn test_unknown_class_is_resolution_error() {
        let loader = loader(ManifestRegistry::new());
        assert!(!loader.can_resolve("com.example.Missing"));
        let err = loader.load_dynamic_part("com.example.Missing").err().unwrap();
        assert!(matches!(err, MigrateError::ClassResolution { .. }));
    }

    #[test]
    fn test_constructor_failure_is_instantiation_error() {
        // HtmlUnescapeColumn needs table/key/column parameters
        let loader = loader(ManifestRegistry::new());
        let err = loader.load_dynamic_part(html_unescape::CLASS_NAME).err().unwrap();
        assert!(matches!(err, MigrateError::Instantiation { .. }));
    }

    #[test]
    fn test_loaded_unit_is_injected_and_runnable() {
        let loader = loader(ManifestRegistry::new());
        let mut unit = loader.load_dynamic_part("test.Noop").unwrap();
        assert!(unit.environment().is_ready());

        let mut db = SqliteDatabase::open_in_memory().unwrap();
        unit.invoke(METHOD_RUN, &mut db).unwrap();
    }

    #[test]
    fn test_each_load_is_a_fresh_instance() {
        let loader = loader(ManifestRegistry::new());
        let mut first = loader.load_dynamic_part("test.Noop").unwrap();
        let mut second = loader.load_dynamic_part("test.Noop").unwrap();
        // Both accept nothing further: each was injected independently
        assert!(first.set_home_paths(HomePaths::default()).is_err());
        assert!(second.set_home_paths(HomePaths::default()).is_err());
    }

    #[test]
    fn test_plugin_binds_class_to_builtin_with_params() {
        let mut plugins = ManifestRegistry::new();
        plugins
            .register(
                UnitManifest::builder("com.example.DedupeTags", dedupe::CLASS_NAME)
                    .param("table", "tags")
                    .param("columns", "name")
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let loader = loader(plugins);

        let mut db = SqliteDatabase::open_in_memory().unwrap();
        db.execute("CREATE TABLE tags (id INTEGER PRIMARY KEY, name TEXT)").unwrap();
        db.execute("INSERT INTO tags (name) VALUES ('x'), ('x')").unwrap();

        let mut unit = loader.load_dynamic_part("com.example.DedupeTags").unwrap();
        assert_eq!(unit.class_name(), "com.example.DedupeTags");
        unit.invoke(METHOD_RUN, &mut db).unwrap();
        assert_eq!(db.query("SELECT COUNT(*) FROM tags").unwrap()[0][0].as_deref(), Some("1"));
    }

    #[test]
    fn test_plugin_shadows_builtin_name() {
        let mut plugins = ManifestRegistry::new();
        plugins
            .register(UnitManifest::builder(html_unescape::CLASS_NAME, "test.Noop").build().unwrap())
            .unwrap();
        let loader = loader(plugins);

        // Without the plugin this would fail for lack of parameters
        let unit = loader.load_dynamic_part(html_unescape::CLASS_NAME).unwrap();
        assert!(unit.environment().is_ready());
    }

    #[test]
    fn test_plugin_with_unknown_implementation() {
        let mut plugins = ManifestRegistry::new();
        plugins
            .register(UnitManifest::builder("com.example.A", "builtin.Nope").build().unwrap())
            .unwrap();
        let loader = loader(plugins);
        assert!(!loader.can_resolve("com.example.A"));
        assert!(matches!(
            loader.load_dynamic_part("com.example.A").err().unwrap(),
            MigrateError::ClassResolution { .. }
        ));
    }
}
