//! Built-in dynamic units
//!
//! Units shipped with the engine. Descriptors reach them either directly by
//! their `builtin.*` class name or through a plugin manifest that binds a
//! custom class name and parameters to one of them.

pub mod dedupe;
pub mod html_unescape;

pub use dedupe::RemoveDuplicateRows;
pub use html_unescape::HtmlUnescapeColumn;

use crate::unit_traits::{MigrationUnit, UnitError};
use std::collections::BTreeMap;

/// Constructor for a dynamic unit
pub type UnitFactory = fn(&UnitParams) -> Result<Box<dyn MigrationUnit>, UnitError>;

/// Constructor arguments for one unit instance
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitParams {
    class: String,
    values: BTreeMap<String, String>,
}

impl UnitParams {
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            values: BTreeMap::new(),
        }
    }

    pub fn with_values(class: impl Into<String>, values: BTreeMap<String, String>) -> Self {
        Self {
            class: class.into(),
            values,
        }
    }

    /// Add one parameter
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Class name the instance is being created for
    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn require(&self, key: &str) -> Result<&str, UnitError> {
        self.get(key)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| UnitError::MissingParameter(key.to_string()))
    }

    /// A required parameter that must be a plain SQL identifier
    pub fn identifier(&self, key: &str) -> Result<String, UnitError> {
        let value = self.require(key)?;
        if is_identifier(value) {
            Ok(value.to_string())
        } else {
            Err(UnitError::InvalidParameter {
                name: key.to_string(),
                value: value.to_string(),
            })
        }
    }
}

/// `name` or `schema.name`, letters, digits and underscores only
fn is_identifier(value: &str) -> bool {
    !value.is_empty()
        && value.split('.').all(|part| {
            let mut chars = part.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

/// Every built-in class name with its constructor
pub fn builtin_factories() -> Vec<(&'static str, UnitFactory)> {
    vec![
        (html_unescape::CLASS_NAME, html_unescape::create as UnitFactory),
        (dedupe::CLASS_NAME, dedupe::create as UnitFactory),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_validation() {
        assert!(is_identifier("articles"));
        assert!(is_identifier("cms.articles_v2"));
        assert!(is_identifier("_hidden"));
        assert!(!is_identifier("2fast"));
        assert!(!is_identifier("title; DROP TABLE x"));
        assert!(!is_identifier("cms."));
    }

    #[test]
    fn test_require_rejects_missing_and_empty() {
        let params = UnitParams::new("builtin.X").with("table", "").with("key", "id");
        assert_eq!(params.require("key").unwrap(), "id");
        assert!(matches!(params.require("table"), Err(UnitError::MissingParameter(_))));
        assert!(matches!(params.require("column"), Err(UnitError::MissingParameter(_))));
    }

    #[test]
    fn test_builtin_class_names_are_unique() {
        let factories = builtin_factories();
        let mut names: Vec<&str> = factories.iter().map(|(n, _)| *n).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), factories.len());
    }
}
