//! Materialized statement results.

use std::collections::HashMap;

use serde::Serialize;

use super::value::Value;

/// Rows and column names produced by one statement.
///
/// Every row is read before the statement completes, so indexing is cheap,
/// repeatable and can be restarted at any point.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultSet {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
    rows_affected: u64,
    insert_id: Option<i64>,
}

impl ResultSet {
    pub(crate) const fn new(
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
        rows_affected: u64,
        insert_id: Option<i64>,
    ) -> Self {
        Self {
            columns,
            rows,
            rows_affected,
            insert_id,
        }
    }

    /// Returns the column names in select-list order.
    #[must_use]
    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    /// Returns the number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns `true` when the statement produced no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns row `index`, if present.
    #[must_use]
    pub fn row(&self, index: usize) -> Option<Row<'_>> {
        self.rows.get(index).map(|values| Row {
            columns: &self.columns,
            values,
        })
    }

    /// Iterates over all rows in order.
    pub fn rows(&self) -> impl ExactSizeIterator<Item = Row<'_>> + '_ {
        self.rows.iter().map(|values| Row {
            columns: &self.columns,
            values,
        })
    }

    /// Number of rows changed by a data-modifying statement; zero for
    /// statements that return columns.
    #[must_use]
    pub const fn rows_affected(&self) -> u64 {
        self.rows_affected
    }

    /// Rowid of the row inserted by this statement, if it inserted one.
    #[must_use]
    pub const fn insert_id(&self) -> Option<i64> {
        self.insert_id
    }
}

/// Borrowed view of one row.
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    columns: &'a [String],
    values: &'a [Value],
}

impl<'a> Row<'a> {
    /// Looks a value up by column name.
    ///
    /// When several columns share a name the last one wins, matching what a
    /// name-to-value map built from the row would hold.
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&'a Value> {
        self.columns
            .iter()
            .rposition(|name| name == column)
            .and_then(|idx| self.values.get(idx))
    }

    /// Reads a value by position.
    #[must_use]
    pub fn value(&self, index: usize) -> Option<&'a Value> {
        self.values.get(index)
    }

    /// Returns all values in column order.
    #[must_use]
    pub const fn values(&self) -> &'a [Value] {
        self.values
    }

    /// Copies the row into a name-to-value map.
    #[must_use]
    pub fn to_map(&self) -> HashMap<String, Value> {
        self.columns
            .iter()
            .cloned()
            .zip(self.values.iter().cloned())
            .collect()
    }
}
