//! Version markers
//!
//! One row per installed module in the marker table:
//!
//! ```sql
//! CREATE TABLE schema_version (
//!     module_id VARCHAR(64) NOT NULL PRIMARY KEY,
//!     version   VARCHAR(16) NOT NULL
//! )
//! ```
//!
//! Versions are stored zero-padded. Plain integers written by older tools
//! are accepted on read. A missing table reads as "nothing installed"; the
//! table is only created by the first write.

use crate::contribution::Version;
use crate::db::{Database, DbError, sql_literal};
use crate::error::{MigrateError, Result};
use std::collections::BTreeMap;

/// Marker table used when the configuration names none
pub const DEFAULT_MARKER_TABLE: &str = "schema_version";

/// Reads and writes the per-module version markers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerStore {
    table: String,
}

impl Default for MarkerStore {
    fn default() -> Self {
        Self {
            table: DEFAULT_MARKER_TABLE.to_string(),
        }
    }
}

impl MarkerStore {
    pub fn new(table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        let valid = !table.is_empty()
            && table
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
            && !table.starts_with(|c: char| c.is_ascii_digit());
        if !valid {
            return Err(MigrateError::config(format!("invalid marker table name '{}'", table)));
        }
        Ok(Self { table })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Returns true if the marker table exists.
    ///
    /// A failing catalog lookup is an error, not an absent table.
    pub fn exists(&self, db: &mut dyn Database) -> Result<bool> {
        db.table_exists(&self.table)
            .map_err(|source| self.failure("lookup", source))
    }

    /// Create the marker table unless it already exists
    pub fn ensure_table(&self, db: &mut dyn Database) -> Result<()> {
        if self.exists(db)? {
            return Ok(());
        }
        log::info!("Creating version marker table {}", self.table);
        db.execute(&format!(
            "CREATE TABLE {} (module_id VARCHAR(64) NOT NULL PRIMARY KEY, version VARCHAR(16) NOT NULL)",
            self.table
        ))
        .map_err(|source| self.failure("table creation", source))?;
        Ok(())
    }

    /// Raw recorded values keyed by module id
    pub fn read_all(&self, db: &mut dyn Database) -> Result<BTreeMap<String, String>> {
        if !self.exists(db)? {
            return Ok(BTreeMap::new());
        }
        let rows = db
            .query(&format!("SELECT module_id, version FROM {}", self.table))
            .map_err(|source| self.failure("read", source))?;

        let mut markers = BTreeMap::new();
        for row in rows {
            if let (Some(Some(module)), Some(Some(version))) = (row.first(), row.get(1)) {
                markers.insert(module.trim().to_string(), version.trim().to_string());
            }
        }
        Ok(markers)
    }

    /// Recorded version of `module`, rendered with `width` digits
    pub fn read(&self, db: &mut dyn Database, module: &str, width: u8) -> Result<Option<Version>> {
        let markers = self.read_all(db)?;
        parse_marker(module, markers.get(module), width)
    }

    /// Record `version` for `module`, creating the table on first use
    pub fn write(&self, db: &mut dyn Database, module: &str, version: Version) -> Result<()> {
        self.ensure_table(db)?;
        let updated = db
            .execute(&format!(
                "UPDATE {} SET version = {} WHERE module_id = {}",
                self.table,
                sql_literal(&version.to_string()),
                sql_literal(module)
            ))
            .map_err(|source| self.failure("update", source))?;

        if updated == 0 {
            db.execute(&format!(
                "INSERT INTO {} (module_id, version) VALUES ({}, {})",
                self.table,
                sql_literal(module),
                sql_literal(&version.to_string())
            ))
            .map_err(|source| self.failure("insert", source))?;
        }
        log::debug!("Marker for '{}' set to {}", module, version);
        Ok(())
    }

    /// Remove the marker of `module`
    pub fn delete(&self, db: &mut dyn Database, module: &str) -> Result<()> {
        if !self.exists(db)? {
            return Ok(());
        }
        db.execute(&format!(
            "DELETE FROM {} WHERE module_id = {}",
            self.table,
            sql_literal(module)
        ))
        .map_err(|source| self.failure("delete", source))?;
        log::debug!("Marker for '{}' removed", module);
        Ok(())
    }

    fn failure(&self, operation: &str, source: DbError) -> MigrateError {
        MigrateError::Marker {
            operation: format!("{} on {}", operation, self.table),
            source,
        }
    }
}

/// Interpret a raw recorded value for `module`
pub fn parse_marker(module: &str, raw: Option<&String>, width: u8) -> Result<Option<Version>> {
    match raw {
        None => Ok(None),
        Some(value) => Version::parse_recorded(value, width)
            .map(Some)
            .ok_or_else(|| MigrateError::CorruptMarker {
                module: module.to_string(),
                value: value.clone(),
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteDatabase;

    #[test]
    fn test_missing_table_reads_empty_and_is_not_created() {
        let mut db = SqliteDatabase::open_in_memory().unwrap();
        let store = MarkerStore::default();

        assert!(store.read_all(&mut db).unwrap().is_empty());
        assert_eq!(store.read(&mut db, "core", 3).unwrap(), None);
        assert!(!store.exists(&mut db).unwrap());
    }

    #[test]
    fn test_write_creates_table_then_updates() {
        let mut db = SqliteDatabase::open_in_memory().unwrap();
        let store = MarkerStore::default();

        store.write(&mut db, "core", Version::new(1, 3)).unwrap();
        assert!(store.exists(&mut db).unwrap());
        store.write(&mut db, "core", Version::new(4, 3)).unwrap();

        let markers = store.read_all(&mut db).unwrap();
        assert_eq!(markers.len(), 1);
        assert_eq!(markers.get("core").map(String::as_str), Some("004"));
    }

    /// Delegates to SQLite but fails every query that reads the marker table
    struct LockedMarkers {
        inner: SqliteDatabase,
    }

    impl Database for LockedMarkers {
        fn driver(&self) -> &'static str {
            "sqlite"
        }

        fn ping(&mut self) -> std::result::Result<(), DbError> {
            self.inner.ping()
        }

        fn execute(&mut self, sql: &str) -> std::result::Result<u64, DbError> {
            self.inner.execute(sql)
        }

        fn query(&mut self, sql: &str) -> std::result::Result<Vec<crate::db::Row>, DbError> {
            if sql.contains(DEFAULT_MARKER_TABLE) {
                return Err(DbError::Statement {
                    statement: sql.to_string(),
                    reason: "database is locked".to_string(),
                });
            }
            self.inner.query(sql)
        }

        fn table_exists(&mut self, table: &str) -> std::result::Result<bool, DbError> {
            self.inner.table_exists(table)
        }
    }

    #[test]
    fn test_failed_read_is_not_an_empty_table() {
        let mut inner = SqliteDatabase::open_in_memory().unwrap();
        let store = MarkerStore::default();
        store.write(&mut inner, "versioning", Version::new(12, 3)).unwrap();

        let mut db = LockedMarkers { inner };
        let err = store.read_all(&mut db).unwrap_err();
        assert!(matches!(err, MigrateError::Marker { .. }));
        assert!(store.read(&mut db, "versioning", 3).is_err());
    }

    #[test]
    fn test_failed_catalog_lookup_propagates() {
        let mut db = SqliteDatabase::open_in_memory().unwrap();
        let store = MarkerStore::new("nosuchschema.schema_version").unwrap();
        assert!(matches!(store.read_all(&mut db), Err(MigrateError::Marker { .. })));
    }

    #[test]
    fn test_delete_removes_row() {
        let mut db = SqliteDatabase::open_in_memory().unwrap();
        let store = MarkerStore::default();
        store.write(&mut db, "core", Version::new(1, 3)).unwrap();
        store.write(&mut db, "search", Version::new(2, 3)).unwrap();

        store.delete(&mut db, "core").unwrap();
        let markers = store.read_all(&mut db).unwrap();
        assert!(!markers.contains_key("core"));
        assert!(markers.contains_key("search"));
    }

    #[test]
    fn test_delete_without_table_is_noop() {
        let mut db = SqliteDatabase::open_in_memory().unwrap();
        MarkerStore::default().delete(&mut db, "core").unwrap();
    }

    #[test]
    fn test_unpadded_recorded_value_accepted() {
        let mut db = SqliteDatabase::open_in_memory().unwrap();
        let store = MarkerStore::default();
        store.ensure_table(&mut db).unwrap();
        db.execute("INSERT INTO schema_version VALUES ('versioning', '9')").unwrap();

        let version = store.read(&mut db, "versioning", 3).unwrap().unwrap();
        assert_eq!(version.to_string(), "009");
    }

    #[test]
    fn test_corrupt_marker_reported() {
        let mut db = SqliteDatabase::open_in_memory().unwrap();
        let store = MarkerStore::default();
        store.ensure_table(&mut db).unwrap();
        db.execute("INSERT INTO schema_version VALUES ('core', 'v2')").unwrap();

        let err = store.read(&mut db, "core", 3).unwrap_err();
        assert!(matches!(err, MigrateError::CorruptMarker { .. }));
    }

    #[test]
    fn test_custom_table_name() {
        let mut db = SqliteDatabase::open_in_memory().unwrap();
        let store = MarkerStore::new("cms_versions").unwrap();
        store.write(&mut db, "core", Version::new(7, 3)).unwrap();
        assert!(db.query("SELECT version FROM cms_versions").is_ok());

        assert!(MarkerStore::new("bad name").is_err());
        assert!(MarkerStore::new("1st").is_err());
    }
}
