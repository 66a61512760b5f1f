//! Database connections
//!
//! A small synchronous seam over the drivers the engine can target. Each
//! fragment statement is sent as-is; the engine never rewrites SQL.
//!
//! # Supported URLs
//!
//! | URL | Driver |
//! |-----|--------|
//! | `sqlite::memory:` | in-memory SQLite |
//! | `sqlite:<path>` / `sqlite://<path>` | SQLite file |
//! | `postgres://...` / `postgresql://...` | PostgreSQL (feature `postgres`) |

use rusqlite::types::ValueRef;
use thiserror::Error;

/// One result row, every column rendered as text (`None` for SQL NULL)
pub type Row = Vec<Option<String>>;

/// Errors reported by a database driver
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DbError {
    /// The connection could not be established
    #[error("cannot connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    /// The URL names a driver this build does not provide
    #[error("unsupported database URL '{0}'")]
    UnsupportedUrl(String),

    /// A statement was rejected by the server
    #[error("{reason} (statement: {statement})")]
    Statement { statement: String, reason: String },
}

impl DbError {
    fn statement(sql: &str, reason: impl ToString) -> Self {
        Self::Statement {
            statement: abbreviate(sql),
            reason: reason.to_string(),
        }
    }
}

/// An open connection to the target database.
///
/// Implementations are used from a single thread; the executor lends the
/// connection to one operation at a time.
pub trait Database {
    /// Short driver name for messages (e.g. `sqlite`)
    fn driver(&self) -> &'static str;

    /// Verify the connection is usable
    fn ping(&mut self) -> Result<(), DbError>;

    /// Execute one statement, returning the affected row count
    fn execute(&mut self, sql: &str) -> Result<u64, DbError>;

    /// Run one query and collect its rows
    fn query(&mut self, sql: &str) -> Result<Vec<Row>, DbError>;

    /// Look `table` (optionally `schema.table`) up in the catalog.
    ///
    /// Errors from the catalog query are returned, never read as "absent".
    fn table_exists(&mut self, table: &str) -> Result<bool, DbError> {
        let (schema, name) = split_qualified(table);
        let mut sql = format!(
            "SELECT table_name FROM information_schema.tables WHERE lower(table_name) = lower({})",
            sql_literal(name)
        );
        if let Some(schema) = schema {
            sql.push_str(&format!(" AND lower(table_schema) = lower({})", sql_literal(schema)));
        }
        Ok(!self.query(&sql)?.is_empty())
    }
}

/// Open a connection for `url`
pub fn connect(url: &str) -> Result<Box<dyn Database>, DbError> {
    let trimmed = url.trim();

    if let Some(rest) = trimmed.strip_prefix("sqlite:") {
        let db = if rest == ":memory:" {
            SqliteDatabase::open_in_memory()?
        } else {
            SqliteDatabase::open(rest.strip_prefix("//").unwrap_or(rest))?
        };
        return Ok(Box::new(db));
    }

    if trimmed.starts_with("postgres://") || trimmed.starts_with("postgresql://") {
        #[cfg(feature = "postgres")]
        {
            return Ok(Box::new(postgres_driver::PostgresDatabase::connect(trimmed)?));
        }
        #[cfg(not(feature = "postgres"))]
        {
            return Err(DbError::Connect {
                url: redact_url(trimmed),
                reason: "this build was compiled without the `postgres` feature".to_string(),
            });
        }
    }

    Err(DbError::UnsupportedUrl(redact_url(trimmed)))
}

/// Hide the password part of a URL for logging
pub fn redact_url(url: &str) -> String {
    let Some(scheme_end) = url.find("://") else {
        return url.to_string();
    };
    let authority_start = scheme_end + 3;
    let rest = &url[authority_start..];
    let Some(at) = rest.find('@') else {
        return url.to_string();
    };
    let credentials = &rest[..at];
    match credentials.find(':') {
        Some(colon) => format!(
            "{}{}:****{}",
            &url[..authority_start],
            &credentials[..colon],
            &rest[at..]
        ),
        None => url.to_string(),
    }
}

/// Quote text as a SQL string literal
pub fn sql_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// Shorten a statement for error messages
fn abbreviate(sql: &str) -> String {
    const MAX: usize = 120;
    let flat: String = sql.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= MAX {
        flat
    } else {
        let cut: String = flat.chars().take(MAX).collect();
        format!("{}...", cut)
    }
}

// ============================================================================
// SQLite
// ============================================================================

/// Split `schema.table` into its parts
fn split_qualified(table: &str) -> (Option<&str>, &str) {
    match table.rsplit_once('.') {
        Some((schema, name)) => (Some(schema), name),
        None => (None, table),
    }
}

/// SQLite connection through rusqlite
pub struct SqliteDatabase {
    conn: rusqlite::Connection,
}

impl SqliteDatabase {
    pub fn open(path: &str) -> Result<Self, DbError> {
        let conn = rusqlite::Connection::open(path).map_err(|e| DbError::Connect {
            url: format!("sqlite:{}", path),
            reason: e.to_string(),
        })?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = rusqlite::Connection::open_in_memory().map_err(|e| DbError::Connect {
            url: "sqlite::memory:".to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { conn })
    }

    /// Wrap an existing rusqlite connection
    pub fn from_connection(conn: rusqlite::Connection) -> Self {
        Self { conn }
    }
}

impl Database for SqliteDatabase {
    fn driver(&self) -> &'static str {
        "sqlite"
    }

    fn table_exists(&mut self, table: &str) -> Result<bool, DbError> {
        let (schema, name) = split_qualified(table);
        let sql = format!(
            "SELECT name FROM {}.sqlite_master WHERE type = 'table' AND name = {} COLLATE NOCASE",
            schema.unwrap_or("main"),
            sql_literal(name)
        );
        Ok(!self.query(&sql)?.is_empty())
    }

    fn ping(&mut self) -> Result<(), DbError> {
        self.conn
            .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map(|_| ())
            .map_err(|e| DbError::statement("SELECT 1", e))
    }

    fn execute(&mut self, sql: &str) -> Result<u64, DbError> {
        let mut stmt = self.conn.prepare(sql).map_err(|e| DbError::statement(sql, e))?;
        if stmt.column_count() > 0 {
            // Row-returning statements are drained so they run to completion
            let mut rows = stmt.query([]).map_err(|e| DbError::statement(sql, e))?;
            while rows.next().map_err(|e| DbError::statement(sql, e))?.is_some() {}
            return Ok(0);
        }
        stmt.execute([])
            .map(|n| n as u64)
            .map_err(|e| DbError::statement(sql, e))
    }

    fn query(&mut self, sql: &str) -> Result<Vec<Row>, DbError> {
        let mut stmt = self.conn.prepare(sql).map_err(|e| DbError::statement(sql, e))?;
        let columns = stmt.column_count();
        let mut rows = stmt.query([]).map_err(|e| DbError::statement(sql, e))?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(|e| DbError::statement(sql, e))? {
            let mut values = Vec::with_capacity(columns);
            for i in 0..columns {
                let value = row.get_ref(i).map_err(|e| DbError::statement(sql, e))?;
                values.push(match value {
                    ValueRef::Null => None,
                    ValueRef::Integer(n) => Some(n.to_string()),
                    ValueRef::Real(f) => Some(f.to_string()),
                    ValueRef::Text(t) | ValueRef::Blob(t) => {
                        Some(String::from_utf8_lossy(t).into_owned())
                    }
                });
            }
            out.push(values);
        }
        Ok(out)
    }
}

// ============================================================================
// PostgreSQL
// ============================================================================

#[cfg(feature = "postgres")]
mod postgres_driver {
    use super::{Database, DbError, Row, redact_url};
    use postgres::{Client, NoTls, SimpleQueryMessage};

    /// PostgreSQL connection through the synchronous `postgres` client
    pub struct PostgresDatabase {
        client: Client,
    }

    impl PostgresDatabase {
        pub fn connect(url: &str) -> Result<Self, DbError> {
            let client = Client::connect(url, NoTls).map_err(|e| DbError::Connect {
                url: redact_url(url),
                reason: e.to_string(),
            })?;
            Ok(Self { client })
        }
    }

    impl Database for PostgresDatabase {
        fn driver(&self) -> &'static str {
            "postgres"
        }

        fn ping(&mut self) -> Result<(), DbError> {
            self.client
                .batch_execute("SELECT 1")
                .map_err(|e| DbError::statement("SELECT 1", e))
        }

        fn execute(&mut self, sql: &str) -> Result<u64, DbError> {
            self.client
                .execute(sql, &[])
                .map_err(|e| DbError::statement(sql, e))
        }

        fn query(&mut self, sql: &str) -> Result<Vec<Row>, DbError> {
            let messages = self
                .client
                .simple_query(sql)
                .map_err(|e| DbError::statement(sql, e))?;
            let mut rows = Vec::new();
            for message in messages {
                if let SimpleQueryMessage::Row(row) = message {
                    rows.push((0..row.len()).map(|i| row.get(i).map(str::to_string)).collect());
                }
            }
            Ok(rows)
        }
    }
}

#[cfg(feature = "postgres")]
pub use postgres_driver::PostgresDatabase;
