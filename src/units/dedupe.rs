//! Deletes rows that repeat the same group columns, keeping the lowest id.
//!
//! Parameters: `table`, `columns` (comma-separated group columns), and
//! optionally `id` (defaults to `id`).

use super::UnitParams;
use crate::db::Database;
use crate::unit_traits::{MigrationUnit, UnitEnvironment, UnitError};

pub const CLASS_NAME: &str = "builtin.RemoveDuplicateRows";

pub struct RemoveDuplicateRows {
    class: String,
    table: String,
    columns: Vec<String>,
    id: String,
    env: UnitEnvironment,
}

pub fn create(params: &UnitParams) -> Result<Box<dyn MigrationUnit>, UnitError> {
    let table = params.identifier("table")?;
    let id = match params.get("id") {
        Some(_) => params.identifier("id")?,
        None => "id".to_string(),
    };

    let raw = params.require("columns")?;
    let mut columns = Vec::new();
    for column in raw.split(',').map(str::trim) {
        let single = UnitParams::new(params.class()).with("columns", column);
        columns.push(single.identifier("columns").map_err(|_| UnitError::InvalidParameter {
            name: "columns".to_string(),
            value: raw.to_string(),
        })?);
    }

    Ok(Box::new(RemoveDuplicateRows {
        class: params.class().to_string(),
        table,
        columns,
        id,
        env: UnitEnvironment::new(),
    }))
}

impl MigrationUnit for RemoveDuplicateRows {
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
        let sql = format!(
            "DELETE FROM {table} WHERE {id} NOT IN (SELECT MIN({id}) FROM {table} GROUP BY {group})",
            table = self.table,
            id = self.id,
            group = self.columns.join(", ")
        );
        let removed = db.execute(&sql)?;
        self.env
            .console()?
            .info(&format!("{}: removed {} duplicate rows", self.table, removed));
        Ok(())
    }
}
