use std::fmt;

use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// A `schema.table` reference to a table whose rows are counted.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TableReference {
    pub schema: String,
    pub table: String,
}

impl TableReference {
    /// Parses `schema.table`. Both parts must be non-empty and there must be exactly one dot.
    pub fn parse(value: &str) -> Result<Self, ValidationError> {
        let invalid = || ValidationError::InvalidTableReference(value.to_string());

        let (schema, table) = value.trim().split_once('.').ok_or_else(invalid)?;
        if schema.is_empty() || table.is_empty() || table.contains('.') {
            return Err(invalid());
        }

        Ok(Self {
            schema: schema.to_string(),
            table: table.to_string(),
        })
    }
}

impl TryFrom<String> for TableReference {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TableReference> for String {
    fn from(value: TableReference) -> Self {
        value.to_string()
    }
}

impl fmt::Display for TableReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_schema_and_table() {
        let reference = TableReference::parse("analytics.player_stats").unwrap();
        assert_eq!(reference.schema, "analytics");
        assert_eq!(reference.table, "player_stats");
        assert_eq!(reference.to_string(), "analytics.player_stats");
    }

    #[test]
    fn rejects_malformed_references() {
        assert!(TableReference::parse("player_stats").is_err());
        assert!(TableReference::parse(".player_stats").is_err());
        assert!(TableReference::parse("a.b.c").is_err());
    }
}
