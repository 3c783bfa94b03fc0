use thiserror::Error;
use tracing::debug;

use crate::materializer::{Cell, Row};
use crate::query_builder::RowLocator;
use crate::source::{CellUpdate, SourceError, SqlSource};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WriteError {
    #[error("update failed: {0}")]
    Source(#[from] SourceError),
    #[error("update matched {matched} rows instead of exactly one; nothing was written")]
    RowMatch { matched: u64 },
}

/// A single in-progress cell edit over the loaded rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditSession {
    row: usize,
    column: usize,
    original: Cell,
    scratch: String,
}

impl EditSession {
    /// Opens an edit seeded from `cell`; null cells start with an empty buffer.
    #[must_use]
    pub fn begin(row: usize, column: usize, cell: &Cell) -> Self {
        Self {
            row,
            column,
            original: cell.clone(),
            scratch: cell.as_text().unwrap_or_default().to_string(),
        }
    }

    #[must_use]
    pub fn row(&self) -> usize {
        self.row
    }

    #[must_use]
    pub fn column(&self) -> usize {
        self.column
    }

    #[must_use]
    pub fn original(&self) -> &Cell {
        &self.original
    }

    #[must_use]
    pub fn scratch(&self) -> &str {
        &self.scratch
    }

    pub fn scratch_mut(&mut self) -> &mut String {
        &mut self.scratch
    }

    #[must_use]
    pub fn targets(&self, row: usize, column: usize) -> bool {
        self.row == row && self.column == column
    }
}

/// Per-cell view of the loaded rows with the edit overlay applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellState<'a> {
    Display(&'a Cell),
    Editing { scratch: &'a str },
}

/// Picks the key column when it is part of the schema, else the whole row.
#[must_use]
pub fn locate_row<'a>(
    columns: &[String],
    row: &'a Row,
    key_column: Option<&str>,
) -> RowLocator<'a> {
    key_column
        .and_then(|key| columns.iter().position(|column| column == key))
        .and_then(|column| row.get(column).map(|value| RowLocator::Key { column, value }))
        .unwrap_or(RowLocator::FullRow(&row.cells))
}

pub(crate) async fn apply_cell_update<S: SqlSource>(
    source: &mut S,
    update: &CellUpdate,
) -> Result<u64, WriteError> {
    debug!(
        sql = %update.update.sql,
        params = update.update.params.len(),
        "applying cell update"
    );
    let outcome = source.apply_update(update).await?;
    if outcome.applied && outcome.rows_matched == 1 {
        Ok(outcome.rows_matched)
    } else {
        Err(WriteError::RowMatch {
            matched: outcome.rows_matched,
        })
    }
}
