use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What the producer does with one table.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum TableRule {
    #[default]
    Include,
    /// Keep the schema but drop every row for which `predicate` is true.
    ExcludeRows { predicate: String },
    /// Leave the table out of the dump.
    Exclude,
}

/// Per-table dump rules. Tables without a rule are included.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TablePolicy {
    rules: HashMap<String, TableRule>,
}

impl TablePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rule(mut self, table: impl Into<String>, rule: TableRule) -> Self {
        self.set(table, rule);
        self
    }

    pub fn set(&mut self, table: impl Into<String>, rule: TableRule) {
        self.rules.insert(table.into(), rule);
    }

    /// Drop all rows of `table` but keep its schema.
    pub fn schema_only(self, table: impl Into<String>) -> Self {
        self.with_rule(
            table,
            TableRule::ExcludeRows {
                predicate: "1".to_string(),
            },
        )
    }

    pub fn rule(&self, table: &str) -> &TableRule {
        const INCLUDE: TableRule = TableRule::Include;
        self.rules.get(table).unwrap_or(&INCLUDE)
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// `WHERE` clause selecting the rows to keep, if any rows are excluded.
    pub fn row_filter(&self, table: &str) -> Option<String> {
        match self.rule(table) {
            TableRule::ExcludeRows { predicate } => {
                Some(format!("WHERE NOT COALESCE(({predicate}), 0)"))
            }
            _ => None,
        }
    }
}
