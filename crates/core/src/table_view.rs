use std::collections::BTreeSet;
use std::ops::RangeInclusive;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::ViewSettings;
use crate::edit_journal::{unix_timestamp_millis, EditOutcome, EditRecord, FileEditJournal};
use crate::edit_session::{apply_cell_update, locate_row, CellState, EditSession, WriteError};
use crate::materializer::{discover_columns, materialize_rows, Cell, MaterializeError, Row};
use crate::query_builder::{
    cell_update, existence_probe_sql, filtered_sorted_load_sql, initial_load_sql, FilterSet,
    PageWindow, SortSpec,
};
use crate::source::{SourceError, SqlSource};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("{0}")]
    Source(#[from] SourceError),
    #[error("malformed result: {0}")]
    MalformedResult(#[from] MaterializeError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("no table is selected")]
    NoTableSelected,
    #[error("table name cannot be empty")]
    EmptyTableName,
    #[error("query failed: {0}")]
    Query(#[from] QueryError),
    #[error("column {index} is out of range for {columns} columns")]
    InvalidColumn { index: usize, columns: usize },
    #[error("cell ({row}, {column}) is out of range")]
    InvalidCell { row: usize, column: usize },
    #[error("no cell edit is in progress")]
    NoActiveEdit,
    #[error("the view is read-only")]
    ReadOnly,
    #[error("write failed: {0}")]
    Write(#[from] WriteError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationState {
    pub offset: u64,
    pub page_size: u64,
    pub has_more_rows: bool,
}

impl PaginationState {
    #[must_use]
    pub fn new(page_size: u64) -> Self {
        Self {
            offset: 0,
            page_size,
            has_more_rows: false,
        }
    }

    /// One-based page number for the current offset.
    #[must_use]
    pub fn page_number(&self) -> u64 {
        self.offset / self.page_size.max(1) + 1
    }

    #[must_use]
    pub fn has_previous(&self) -> bool {
        self.offset > 0
    }
}

/// What the footer of the view shows: page position, or the match count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewSummary {
    Paged {
        page: u64,
        rows: Option<RangeInclusive<u64>>,
        has_previous: bool,
        has_more: bool,
    },
    Filtered {
        matches: usize,
    },
}

#[derive(Debug)]
struct LoadedPage {
    discovered_columns: Option<Vec<String>>,
    rows: Vec<Row>,
    has_more_rows: bool,
}

#[derive(Debug, Clone, Copy)]
struct PageRequest<'a> {
    table: &'a str,
    columns: &'a [String],
    filters: &'a FilterSet,
    sort: SortSpec,
    window: PageWindow,
}

/// Browser/editor state for one table at a time over a single SQL source.
#[derive(Debug)]
pub struct TableView<S: SqlSource> {
    source: S,
    settings: ViewSettings,
    journal: Option<FileEditJournal>,
    table: Option<String>,
    columns: Vec<String>,
    rows: Vec<Row>,
    /// Rows written since the last load; only these may have drifted from
    /// the server's filter match.
    edited_rows: BTreeSet<usize>,
    filters: FilterSet,
    sort: SortSpec,
    pagination: PaginationState,
    edit: Option<EditSession>,
}

impl<S: SqlSource> TableView<S> {
    #[must_use]
    pub fn new(source: S, settings: ViewSettings) -> Self {
        let journal = if settings.journal {
            FileEditJournal::load_default()
                .map_err(|error| warn!(%error, "edit journal disabled"))
                .ok()
        } else {
            None
        };

        Self {
            source,
            pagination: PaginationState::new(settings.page_size.get()),
            settings,
            journal,
            table: None,
            columns: Vec::new(),
            rows: Vec::new(),
            edited_rows: BTreeSet::new(),
            filters: FilterSet::default(),
            sort: SortSpec::default(),
            edit: None,
        }
    }

    #[must_use]
    pub fn with_journal(mut self, journal: FileEditJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    #[must_use]
    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    #[must_use]
    pub fn into_source(self) -> S {
        self.source
    }

    #[must_use]
    pub fn settings(&self) -> &ViewSettings {
        &self.settings
    }

    #[must_use]
    pub fn table(&self) -> Option<&str> {
        self.table.as_deref()
    }

    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    #[must_use]
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    #[must_use]
    pub fn filters(&self) -> &FilterSet {
        &self.filters
    }

    #[must_use]
    pub fn sort(&self) -> SortSpec {
        self.sort
    }

    #[must_use]
    pub fn pagination(&self) -> PaginationState {
        self.pagination
    }

    #[must_use]
    pub fn edit_session(&self) -> Option<&EditSession> {
        self.edit.as_ref()
    }

    #[must_use]
    pub fn is_filter_active(&self) -> bool {
        self.filters.is_active()
    }

    fn page_size(&self) -> u64 {
        self.settings.page_size.get()
    }

    /// Switches to `name` and loads its first page; reselecting the current
    /// table does nothing.
    pub async fn select_table(&mut self, name: &str) -> Result<(), EngineError> {
        if name.trim().is_empty() {
            return Err(EngineError::EmptyTableName);
        }
        if self.table.as_deref() == Some(name) {
            debug!(table = name, "table already selected");
            return Ok(());
        }

        let fresh_filters = FilterSet::default();
        let page = fetch_page(
            &mut self.source,
            PageRequest {
                table: name,
                columns: &[],
                filters: &fresh_filters,
                sort: SortSpec::default(),
                window: PageWindow::new(self.settings.page_size.get(), 0),
            },
        )
        .await?;

        self.table = Some(name.to_string());
        self.columns.clear();
        self.sort = SortSpec::default();
        self.apply_page(page, 0);
        info!(
            table = name,
            columns = self.columns.len(),
            rows = self.rows.len(),
            "table selected"
        );
        Ok(())
    }

    /// Reloads the current table at `offset` with the active filters and sort.
    pub async fn load(&mut self, offset: u64) -> Result<(), EngineError> {
        self.reload_with(self.filters.clone(), self.sort, offset).await
    }

    pub async fn set_filter(&mut self, column: usize, pattern: &str) -> Result<(), EngineError> {
        let staged = self
            .filters
            .with_pattern(column, pattern)
            .ok_or(EngineError::InvalidColumn {
                index: column,
                columns: self.columns.len(),
            })?;
        self.reload_with(staged, self.sort, 0).await
    }

    pub async fn clear_all_filters(&mut self) -> Result<(), EngineError> {
        self.reload_with(self.filters.cleared(), self.sort, 0).await
    }

    /// Changes the sort column and direction, keeping the current offset.
    pub async fn set_sort(&mut self, column: usize, ascending: bool) -> Result<(), EngineError> {
        self.check_column(column)?;
        let offset = self.pagination.offset;
        self.reload_with(
            self.filters.clone(),
            SortSpec::new(column, ascending),
            offset,
        )
        .await
    }

    pub async fn next_page(&mut self) -> Result<(), EngineError> {
        if self.is_filter_active() || !self.pagination.has_more_rows {
            debug!("next page unavailable");
            return Ok(());
        }
        let offset = self.pagination.offset.saturating_add(self.page_size());
        self.load(offset).await
    }

    pub async fn previous_page(&mut self) -> Result<(), EngineError> {
        if self.is_filter_active() || self.pagination.offset == 0 {
            debug!("previous page unavailable");
            return Ok(());
        }
        let offset = self.pagination.offset.saturating_sub(self.page_size());
        self.load(offset).await
    }

    /// Opens an edit on one loaded cell, discarding any edit already open.
    pub fn begin_edit(&mut self, row: usize, column: usize) -> Result<(), EngineError> {
        if self.settings.read_only {
            return Err(EngineError::ReadOnly);
        }
        let cell = self
            .rows
            .get(row)
            .and_then(|loaded| loaded.get(column))
            .filter(|_| column < self.columns.len())
            .ok_or(EngineError::InvalidCell { row, column })?;

        let session = EditSession::begin(row, column, cell);
        if let Some(previous) = self.edit.replace(session) {
            debug!(
                row = previous.row(),
                column = previous.column(),
                "discarded open edit"
            );
        }
        Ok(())
    }

    /// Writes `value` into the edited cell. The session closes whether or not
    /// the write succeeds; the loaded rows only change on success.
    pub async fn commit_edit(&mut self, value: &str) -> Result<(), EngineError> {
        let session = self.edit.take().ok_or(EngineError::NoActiveEdit)?;
        let (row, column) = (session.row(), session.column());
        let table = self.table.clone().ok_or(EngineError::NoTableSelected)?;

        let update = {
            let loaded = self
                .rows
                .get(row)
                .ok_or(EngineError::InvalidCell { row, column })?;
            let locator = locate_row(&self.columns, loaded, self.settings.key_column.as_deref());
            cell_update(&table, &self.columns, column, value, locator)
        };

        let result = apply_cell_update(&mut self.source, &update).await;
        match &result {
            Ok(_) => {}
            Err(WriteError::RowMatch { matched }) => {
                warn!(
                    table = %table,
                    row,
                    column,
                    matched,
                    "edit rejected: row match is not unique"
                );
            }
            Err(WriteError::Source(error)) => {
                warn!(table = %table, row, column, %error, "edit failed");
            }
        }
        self.journal_edit(&table, &session, value, &result);

        result?;
        if let Some(cell) = self
            .rows
            .get_mut(row)
            .and_then(|loaded| loaded.cells.get_mut(column))
        {
            *cell = Cell::text(value);
            self.edited_rows.insert(row);
        }
        info!(table = %table, row, column, "cell updated");
        Ok(())
    }

    pub fn cancel_edit(&mut self) {
        if let Some(session) = self.edit.take() {
            debug!(
                row = session.row(),
                column = session.column(),
                "edit cancelled"
            );
        }
    }

    pub fn edit_scratch_mut(&mut self) -> Option<&mut String> {
        self.edit.as_mut().map(EditSession::scratch_mut)
    }

    #[must_use]
    pub fn cell_state(&self, row: usize, column: usize) -> Option<CellState<'_>> {
        let cell = self.rows.get(row)?.get(column)?;
        match &self.edit {
            Some(session) if session.targets(row, column) => Some(CellState::Editing {
                scratch: session.scratch(),
            }),
            _ => Some(CellState::Display(cell)),
        }
    }

    /// Loaded rows that still belong to the filtered view, with their indices.
    ///
    /// The server's match set is trusted as loaded; only rows edited since the
    /// load are re-checked against the active filters.
    pub fn visible_rows(&self) -> impl Iterator<Item = (usize, &Row)> {
        self.rows.iter().enumerate().filter(|(index, row)| {
            !self.edited_rows.contains(index) || self.filters.matches(row)
        })
    }

    #[must_use]
    pub fn summary(&self) -> ViewSummary {
        if self.is_filter_active() {
            return ViewSummary::Filtered {
                matches: self.visible_rows().count(),
            };
        }

        let offset = self.pagination.offset;
        let loaded = self.rows.len() as u64;
        ViewSummary::Paged {
            page: self.pagination.page_number(),
            rows: (loaded > 0).then(|| offset + 1..=offset + loaded),
            has_previous: self.pagination.has_previous(),
            has_more: self.pagination.has_more_rows,
        }
    }

    /// Re-sorts the loaded page by cell text without querying; ties keep their
    /// loaded order and nulls compare as the `NULL` marker. The sort spec used
    /// for queries is left unchanged.
    pub fn resort_loaded(&mut self, column: usize, ascending: bool) -> Result<(), EngineError> {
        self.check_column(column)?;
        self.cancel_edit();

        let mut order = (0..self.rows.len()).collect::<Vec<_>>();
        order.sort_by(|&left, &right| {
            let ordering = cell_text(&self.rows[left], column)
                .cmp(cell_text(&self.rows[right], column));
            if ascending {
                ordering
            } else {
                ordering.reverse()
            }
        });

        let mut previous = std::mem::take(&mut self.rows)
            .into_iter()
            .map(Some)
            .collect::<Vec<_>>();
        self.rows = order
            .iter()
            .filter_map(|&index| previous[index].take())
            .collect();
        self.edited_rows = order
            .iter()
            .enumerate()
            .filter(|(_, old_index)| self.edited_rows.contains(*old_index))
            .map(|(new_index, _)| new_index)
            .collect();
        Ok(())
    }

    fn check_column(&self, column: usize) -> Result<(), EngineError> {
        if column < self.columns.len() {
            Ok(())
        } else {
            Err(EngineError::InvalidColumn {
                index: column,
                columns: self.columns.len(),
            })
        }
    }

    async fn reload_with(
        &mut self,
        filters: FilterSet,
        sort: SortSpec,
        offset: u64,
    ) -> Result<(), EngineError> {
        let table = self.table.as_deref().ok_or(EngineError::NoTableSelected)?;
        let page = fetch_page(
            &mut self.source,
            PageRequest {
                table,
                columns: &self.columns,
                filters: &filters,
                sort,
                window: PageWindow::new(self.settings.page_size.get(), offset),
            },
        )
        .await?;

        self.filters = filters;
        self.sort = sort;
        self.apply_page(page, offset);
        Ok(())
    }

    fn apply_page(&mut self, page: LoadedPage, offset: u64) {
        if let Some(columns) = page.discovered_columns {
            self.filters = FilterSet::empty(columns.len());
            self.columns = columns;
        }
        self.rows = page.rows;
        self.edited_rows.clear();
        self.pagination.offset = offset;
        self.pagination.has_more_rows = page.has_more_rows;
        self.cancel_edit();
    }

    fn journal_edit(
        &self,
        table: &str,
        session: &EditSession,
        value: &str,
        result: &Result<u64, WriteError>,
    ) {
        let Some(journal) = &self.journal else {
            return;
        };

        let (outcome, rows_matched, error) = match result {
            Ok(matched) => (EditOutcome::Applied, Some(*matched), None),
            Err(WriteError::RowMatch { matched }) => (EditOutcome::Rejected, Some(*matched), None),
            Err(WriteError::Source(error)) => (EditOutcome::Failed, None, Some(error.to_string())),
        };
        let record = EditRecord {
            timestamp_unix_ms: unix_timestamp_millis(),
            table: table.to_string(),
            column: self
                .columns
                .get(session.column())
                .cloned()
                .unwrap_or_default(),
            row_index: session.row(),
            previous: session.original().as_text().map(str::to_string),
            value: value.to_string(),
            outcome,
            rows_matched,
            error,
        };
        if let Err(error) = journal.append(&record) {
            warn!(%error, path = %journal.path().display(), "failed to journal edit");
        }
    }
}

fn cell_text(row: &Row, column: usize) -> &str {
    row.get(column).map_or("", Cell::display_text)
}

async fn fetch_page<S: SqlSource>(
    source: &mut S,
    request: PageRequest<'_>,
) -> Result<LoadedPage, QueryError> {
    let statement = if request.columns.is_empty() {
        initial_load_sql(request.table, request.window)
    } else {
        filtered_sorted_load_sql(
            request.table,
            request.columns,
            request.filters,
            request.sort,
            request.window,
        )
    };
    debug!(
        sql = %statement.sql,
        params = statement.params.len(),
        "loading table page"
    );
    let result = source.query(&statement).await?;

    let discovered_columns = if request.columns.is_empty() {
        Some(discover_columns(&result)?)
    } else {
        None
    };
    let width = discovered_columns
        .as_ref()
        .map_or(request.columns.len(), Vec::len);
    let rows = materialize_rows(result, width)?;
    debug!(rows = rows.len(), "page materialized");

    let has_more_rows =
        probe_more_rows(source, request.table, request.window.next_offset()).await?;

    Ok(LoadedPage {
        discovered_columns,
        rows,
        has_more_rows,
    })
}

async fn probe_more_rows<S: SqlSource>(
    source: &mut S,
    table: &str,
    offset: u64,
) -> Result<bool, QueryError> {
    let statement = existence_probe_sql(table, offset);
    debug!(sql = %statement.sql, "probing for more rows");
    let result = source.query(&statement).await?;
    if result.column_count() == 0 {
        return Err(QueryError::MalformedResult(MaterializeError::NoColumns));
    }
    Ok(result
        .value(0, 0)
        .map(str::trim)
        .is_some_and(|flag| {
            flag == "1" || flag.eq_ignore_ascii_case("t") || flag.eq_ignore_ascii_case("true")
        }))
}
