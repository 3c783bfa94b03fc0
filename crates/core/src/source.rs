use async_trait::async_trait;
use thiserror::Error;

/// SQL text with `?` placeholders and the string values bound to them, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<String>,
}

impl Statement {
    #[must_use]
    pub fn new(sql: impl Into<String>, params: Vec<String>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    #[must_use]
    pub fn without_params(sql: impl Into<String>) -> Self {
        Self::new(sql, Vec::new())
    }
}

/// A single-cell write: `count` reports how many rows the locator matches and
/// `update` changes at most one of them, binding the same locator values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellUpdate {
    pub count: Statement,
    pub update: Statement,
}

/// Result set as returned by a data source; `None` marks an SQL NULL.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawResultSet {
    columns: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
}

impl RawResultSet {
    #[must_use]
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Option<String>>>) -> Self {
        Self { columns, rows }
    }

    #[must_use]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn column_name(&self, index: usize) -> Option<&str> {
        self.columns.get(index).map(String::as_str)
    }

    #[must_use]
    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    #[must_use]
    pub fn row_width(&self, row: usize) -> Option<usize> {
        self.rows.get(row).map(Vec::len)
    }

    #[must_use]
    pub fn value(&self, row: usize, column: usize) -> Option<&str> {
        self.rows
            .get(row)
            .and_then(|cells| cells.get(column))
            .and_then(Option::as_deref)
    }

    #[must_use]
    pub fn is_null(&self, row: usize, column: usize) -> bool {
        matches!(
            self.rows.get(row).and_then(|cells| cells.get(column)),
            Some(None)
        )
    }

    pub(crate) fn into_rows(self) -> Vec<Vec<Option<String>>> {
        self.rows
    }
}

/// What happened to an update that must touch exactly one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOutcome {
    pub rows_matched: u64,
    pub applied: bool,
}

impl WriteOutcome {
    #[must_use]
    pub fn single_row() -> Self {
        Self {
            rows_matched: 1,
            applied: true,
        }
    }

    #[must_use]
    pub fn rejected(rows_matched: u64) -> Self {
        Self {
            rows_matched,
            applied: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct SourceError {
    message: String,
}

impl SourceError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Request/response SQL execution against one shared connection.
///
/// Every call runs to completion before the next one is issued; the view
/// holds the source exclusively and never overlaps requests.
#[async_trait]
pub trait SqlSource: Send {
    async fn query(&mut self, statement: &Statement) -> Result<RawResultSet, SourceError>;

    /// Writes one cell when the locator matches exactly one row.
    ///
    /// The source runs `update.count` first and issues `update.update` only
    /// when it reads 1; otherwise nothing is written and the outcome carries
    /// `applied = false` with the counted matches.
    async fn apply_update(&mut self, update: &CellUpdate) -> Result<WriteOutcome, SourceError>;
}
