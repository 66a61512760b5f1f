//! Rewrites a text column that was stored HTML-escaped.
//!
//! Parameters: `table`, `key` (row identifier column), `column`.

use super::UnitParams;
use crate::db::{Database, sql_literal};
use crate::unit_traits::{MigrationUnit, UnitEnvironment, UnitError};
use std::borrow::Cow;

pub const CLASS_NAME: &str = "builtin.HtmlUnescapeColumn";

pub struct HtmlUnescapeColumn {
    class: String,
    table: String,
    key: String,
    column: String,
    env: UnitEnvironment,
}

pub fn create(params: &UnitParams) -> Result<Box<dyn MigrationUnit>, UnitError> {
    Ok(Box::new(HtmlUnescapeColumn {
        class: params.class().to_string(),
        table: params.identifier("table")?,
        key: params.identifier("key")?,
        column: params.identifier("column")?,
        env: UnitEnvironment::new(),
    }))
}

impl MigrationUnit for HtmlUnescapeColumn {
    fn class_name(&self) -> &str {
        &self.class
    }

    fn environment(&self) -> &UnitEnvironment {
        &self.env
    }

    fn environment_mut(&mut self) -> &mut UnitEnvironment {
        &mut self.env
    }

    fn run(&mut self, db: &mut dyn Database) -> Result<(), UnitError> {
        let console = self.env.console()?.clone();
        let rows = db.query(&format!(
            "SELECT {key}, {column} FROM {table} WHERE {column} LIKE '%&%'",
            key = self.key,
            column = self.column,
            table = self.table
        ))?;

        let mut changed = 0usize;
        for row in &rows {
            let (Some(Some(key)), Some(Some(value))) = (row.first(), row.get(1)) else {
                continue;
            };
            match unescape_html(value) {
                Some(Cow::Owned(unescaped)) => {
                    db.execute(&format!(
                        "UPDATE {table} SET {column} = {value} WHERE {key} = {id}",
                        table = self.table,
                        column = self.column,
                        value = sql_literal(&unescaped),
                        key = self.key,
                        id = sql_literal(key)
                    ))?;
                    changed += 1;
                }
                Some(Cow::Borrowed(_)) => {}
                None => console.warn(&format!(
                    "{}.{}: row {} has an unknown entity, left unchanged",
                    self.table, self.column, key
                )),
            }
        }

        console.info(&format!(
            "{}.{}: unescaped {} of {} candidate rows",
            self.table,
            self.column,
            changed,
            rows.len()
        ));
        Ok(())
    }
}

/// Decode HTML entities; `None` if an entity is unknown or malformed
fn unescape_html(text: &str) -> Option<Cow<'_, str>> {
    quick_xml::escape::unescape_with(text, resolve_entity).ok()
}

fn resolve_entity(name: &str) -> Option<&'static str> {
    Some(match name {
        "lt" => "<",
        "gt" => ">",
        "amp" => "&",
        "apos" => "'",
        "quot" => "\"",
        "nbsp" => "\u{a0}",
        "copy" => "\u{a9}",
        "reg" => "\u{ae}",
        "trade" => "\u{2122}",
        "hellip" => "\u{2026}",
        "ndash" => "\u{2013}",
        "mdash" => "\u{2014}",
        "lsquo" => "\u{2018}",
        "rsquo" => "\u{2019}",
        "ldquo" => "\u{201c}",
        "rdquo" => "\u{201d}",
        "euro" => "\u{20ac}",
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::{ConsoleLevel, MemoryConsole};
    use crate::db::SqliteDatabase;
    use crate::unit_traits::{HomePaths, METHOD_RUN};
    use std::rc::Rc;

    #[test]
    fn test_unescape_html() {
        assert_eq!(unescape_html("Tom &amp; Jerry").unwrap(), "Tom & Jerry");
        assert_eq!(unescape_html("caf&#233;").unwrap(), "caf\u{e9}");
        assert_eq!(unescape_html("a&nbsp;b").unwrap(), "a\u{a0}b");
        assert!(matches!(unescape_html("plain"), Some(Cow::Borrowed(_))));
        assert!(unescape_html("&bogus;").is_none());
    }

    #[test]
    fn test_missing_parameter_fails_construction() {
        let params = UnitParams::new(CLASS_NAME).with("table", "articles");
        assert!(matches!(create(&params), Err(UnitError::MissingParameter(_))));
    }

    #[test]
    fn test_run_rewrites_escaped_rows() {
        let mut db = SqliteDatabase::open_in_memory().unwrap();
        db.execute("CREATE TABLE articles (id INTEGER PRIMARY KEY, title TEXT)").unwrap();
        db.execute("INSERT INTO articles (title) VALUES ('Fish &amp; Chips'), ('Plain'), ('Q&amp;A &bogus;')")
            .unwrap();

        let params = UnitParams::new(CLASS_NAME)
            .with("table", "articles")
            .with("key", "id")
            .with("column", "title");
        let console = Rc::new(MemoryConsole::new(false));
        let mut unit = create(&params).unwrap();
        unit.set_console(console.clone()).unwrap();
        unit.set_home_paths(HomePaths::default()).unwrap();

        unit.invoke(METHOD_RUN, &mut db).unwrap();

        let rows = db.query("SELECT title FROM articles ORDER BY id").unwrap();
        assert_eq!(rows[0][0].as_deref(), Some("Fish & Chips"));
        assert_eq!(rows[1][0].as_deref(), Some("Plain"));
        assert_eq!(rows[2][0].as_deref(), Some("Q&amp;A &bogus;"));
        assert!(console.contains(ConsoleLevel::Warn, "unknown entity"));
        assert!(console.contains(ConsoleLevel::Info, "unescaped 1 of 2"));
    }
}
