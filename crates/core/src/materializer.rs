use std::fmt;

use thiserror::Error;

use crate::source::RawResultSet;

pub const NULL_MARKER: &str = "NULL";

/// A single cell value; `Null` is distinct from empty text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cell {
    Null,
    Text(String),
}

impl Cell {
    #[must_use]
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Null => None,
            Self::Text(value) => Some(value),
        }
    }

    /// Text shown for the cell, with nulls rendered as the `NULL` marker.
    #[must_use]
    pub fn display_text(&self) -> &str {
        self.as_text().unwrap_or(NULL_MARKER)
    }
}

impl From<Option<String>> for Cell {
    fn from(value: Option<String>) -> Self {
        value.map_or(Self::Null, Self::Text)
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_text())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Row {
    pub cells: Vec<Cell>,
}

impl Row {
    #[must_use]
    pub fn new(cells: Vec<Cell>) -> Self {
        Self { cells }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    #[must_use]
    pub fn get(&self, column: usize) -> Option<&Cell> {
        self.cells.get(column)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MaterializeError {
    #[error("result set has no columns")]
    NoColumns,
    #[error("result set has {found} columns, schema has {expected}")]
    ColumnCount { expected: usize, found: usize },
    #[error("row {row} has {found} cells, expected {expected}")]
    RowWidth {
        row: usize,
        expected: usize,
        found: usize,
    },
}

pub fn discover_columns(result: &RawResultSet) -> Result<Vec<String>, MaterializeError> {
    if result.column_count() == 0 {
        return Err(MaterializeError::NoColumns);
    }
    Ok(result.column_names().to_vec())
}

/// Converts every row of `result` into a [`Row`] aligned with `expected_columns`.
pub fn materialize_rows(
    result: RawResultSet,
    expected_columns: usize,
) -> Result<Vec<Row>, MaterializeError> {
    let found = result.column_count();
    if found == 0 {
        return Err(MaterializeError::NoColumns);
    }
    if found != expected_columns {
        return Err(MaterializeError::ColumnCount {
            expected: expected_columns,
            found,
        });
    }

    if let Some(row) = (0..result.row_count())
        .find(|&row| result.row_width(row) != Some(expected_columns))
    {
        return Err(MaterializeError::RowWidth {
            row,
            expected: expected_columns,
            found: result.row_width(row).unwrap_or_default(),
        });
    }

    Ok(result
        .into_rows()
        .into_iter()
        .map(|cells| Row::new(cells.into_iter().map(Cell::from).collect()))
        .collect())
}
