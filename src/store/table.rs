//! Quoted Postgres identifiers for the knowledge tables.

use anyhow::{ensure, Result};

/// Schema-qualified table reference, quoted once when built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableName {
    qualified: String,
    index_prefix: String,
}

impl TableName {
    /// Validates and quotes `schema.table`.
    pub fn new(schema: &str, table: &str) -> Result<Self> {
        ensure!(!schema.trim().is_empty(), "schema name is required");
        ensure!(!table.trim().is_empty(), "table name is required");
        Ok(Self {
            qualified: format!("{}.{}", quoted(schema), quoted(table)),
            index_prefix: format!("{}_{}", index_safe(schema), index_safe(table)),
        })
    }

    /// `"schema"."table"`, ready to splice into SQL.
    pub fn qualified(&self) -> &str {
        &self.qualified
    }

    /// Unquoted index name for `column` on this table.
    pub fn index_name(&self, column: &str) -> String {
        format!("{}_{}_idx", self.index_prefix, index_safe(column))
    }
}

fn quoted(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn index_safe(ident: &str) -> String {
    ident
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() {
                ch.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}
