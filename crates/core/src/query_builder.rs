use crate::materializer::{Cell, Row};
use crate::source::{CellUpdate, Statement};

const LIKE_ESCAPE: char = '!';

/// `LIMIT`/`OFFSET` pair for one page of rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub limit: u64,
    pub offset: u64,
}

impl PageWindow {
    #[must_use]
    pub fn new(limit: u64, offset: u64) -> Self {
        Self { limit, offset }
    }

    #[must_use]
    pub fn next_offset(&self) -> u64 {
        self.offset.saturating_add(self.limit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortSpec {
    pub column: usize,
    pub ascending: bool,
}

impl Default for SortSpec {
    fn default() -> Self {
        Self {
            column: 0,
            ascending: true,
        }
    }
}

impl SortSpec {
    #[must_use]
    pub fn new(column: usize, ascending: bool) -> Self {
        Self { column, ascending }
    }

    fn direction_sql(self) -> &'static str {
        if self.ascending {
            "ASC"
        } else {
            "DESC"
        }
    }
}

/// One substring pattern per column; an empty pattern means "no filter".
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FilterSet {
    patterns: Vec<String>,
}

impl FilterSet {
    #[must_use]
    pub fn empty(columns: usize) -> Self {
        Self {
            patterns: vec![String::new(); columns],
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    #[must_use]
    pub fn get(&self, column: usize) -> Option<&str> {
        self.patterns.get(column).map(String::as_str)
    }

    #[must_use]
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.patterns.iter().any(|pattern| !pattern.is_empty())
    }

    /// Returns a copy with `column` set to `pattern`, or `None` when out of range.
    #[must_use]
    pub fn with_pattern(&self, column: usize, pattern: &str) -> Option<Self> {
        let mut staged = self.clone();
        *staged.patterns.get_mut(column)? = pattern.to_string();
        Some(staged)
    }

    #[must_use]
    pub fn cleared(&self) -> Self {
        Self::empty(self.patterns.len())
    }

    pub fn active(&self) -> impl Iterator<Item = (usize, &str)> {
        self.patterns
            .iter()
            .enumerate()
            .filter(|(_, pattern)| !pattern.is_empty())
            .map(|(column, pattern)| (column, pattern.as_str()))
    }

    /// Case-insensitive substring check of `row` against every active pattern.
    #[must_use]
    pub fn matches(&self, row: &Row) -> bool {
        self.active().all(|(column, pattern)| {
            row.get(column).is_some_and(|cell| {
                cell.display_text()
                    .to_lowercase()
                    .contains(&pattern.to_lowercase())
            })
        })
    }
}

/// How an update identifies the row it targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowLocator<'a> {
    Key { column: usize, value: &'a Cell },
    FullRow(&'a [Cell]),
}

#[must_use]
pub fn quote_identifier(identifier: &str) -> String {
    format!("`{}`", identifier.replace('`', "``"))
}

#[must_use]
pub fn substring_like_pattern(pattern: &str) -> String {
    let mut escaped = String::with_capacity(pattern.len() + 2);
    escaped.push('%');
    for ch in pattern.chars() {
        if matches!(ch, '%' | '_') || ch == LIKE_ESCAPE {
            escaped.push(LIKE_ESCAPE);
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

#[must_use]
pub fn initial_load_sql(table: &str, window: PageWindow) -> Statement {
    Statement::without_params(format!(
        "SELECT * FROM {} ORDER BY 1 LIMIT {} OFFSET {}",
        quote_identifier(table),
        window.limit,
        window.offset
    ))
}

/// Page query with filter predicates and ordering; falls back to the initial
/// load shape while the column list is still unknown.
#[must_use]
pub fn filtered_sorted_load_sql(
    table: &str,
    columns: &[String],
    filters: &FilterSet,
    sort: SortSpec,
    window: PageWindow,
) -> Statement {
    let Some(sort_column) = columns.get(sort.column).or_else(|| columns.first()) else {
        return initial_load_sql(table, window);
    };

    let mut sql = format!("SELECT * FROM {}", quote_identifier(table));
    let mut params = Vec::new();
    let mut predicates = Vec::new();
    for (column_index, pattern) in filters.active() {
        let Some(column) = columns.get(column_index) else {
            continue;
        };
        predicates.push(format!(
            "LOWER(CAST({} AS CHAR)) LIKE LOWER(?) ESCAPE '{LIKE_ESCAPE}'",
            quote_identifier(column)
        ));
        params.push(substring_like_pattern(pattern));
    }

    if !predicates.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&predicates.join(" AND "));
    }

    sql.push_str(&format!(
        " ORDER BY {} {} LIMIT {} OFFSET {}",
        quote_identifier(sort_column),
        sort.direction_sql(),
        window.limit,
        window.offset
    ));
    Statement::new(sql, params)
}

#[must_use]
pub fn existence_probe_sql(table: &str, offset: u64) -> Statement {
    Statement::without_params(format!(
        "SELECT EXISTS(SELECT 1 FROM {} LIMIT 1 OFFSET {offset}) AS has_more",
        quote_identifier(table)
    ))
}

/// Guarded single-cell write: count the rows the locator matches, then update
/// at most one of them.
#[must_use]
pub fn cell_update(
    table: &str,
    columns: &[String],
    target_column: usize,
    value: &str,
    locator: RowLocator<'_>,
) -> CellUpdate {
    let (where_clause, locator_params) = locator_predicate(columns, locator);
    let table = quote_identifier(table);
    let target = columns
        .get(target_column)
        .map_or_else(String::new, |column| quote_identifier(column));

    let mut update_params = Vec::with_capacity(locator_params.len() + 1);
    update_params.push(value.to_string());
    update_params.extend(locator_params.iter().cloned());

    CellUpdate {
        count: Statement::new(
            format!("SELECT COUNT(*) FROM {table} WHERE {where_clause}"),
            locator_params,
        ),
        update: Statement::new(
            format!("UPDATE {table} SET {target} = ? WHERE {where_clause} LIMIT 1"),
            update_params,
        ),
    }
}

fn locator_predicate(columns: &[String], locator: RowLocator<'_>) -> (String, Vec<String>) {
    let mut params = Vec::new();
    let predicates = match locator {
        RowLocator::Key { column, value } => columns
            .get(column)
            .map(|name| equality_predicate(name, value, &mut params))
            .into_iter()
            .collect::<Vec<_>>(),
        RowLocator::FullRow(cells) => columns
            .iter()
            .zip(cells)
            .map(|(name, cell)| equality_predicate(name, cell, &mut params))
            .collect(),
    };

    let where_clause = if predicates.is_empty() {
        "1 = 0".to_string()
    } else {
        predicates.join(" AND ")
    };
    (where_clause, params)
}

fn equality_predicate(column: &str, cell: &Cell, params: &mut Vec<String>) -> String {
    match cell {
        Cell::Null => format!("{} IS NULL", quote_identifier(column)),
        Cell::Text(value) => {
            params.push(value.clone());
            format!("{} = ?", quote_identifier(column))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        existence_probe_sql, filtered_sorted_load_sql, initial_load_sql, quote_identifier,
        substring_like_pattern, cell_update, FilterSet, PageWindow, RowLocator, SortSpec,
    };
    use crate::materializer::{Cell, Row};

    fn columns() -> Vec<String> {
        vec!["id".to_string(), "name".to_string()]
    }

    #[test]
    fn quotes_identifiers_with_backticks() {
        assert_eq!(quote_identifier("users"), "`users`");
        assert_eq!(quote_identifier("odd`name"), "`odd``name`");
    }

    #[test]
    fn initial_load_orders_by_first_column() {
        let statement = initial_load_sql("users", PageWindow::new(100, 200));
        assert_eq!(
            statement.sql,
            "SELECT * FROM `users` ORDER BY 1 LIMIT 100 OFFSET 200"
        );
        assert!(statement.params.is_empty());
    }

    #[test]
    fn filtered_load_binds_patterns_instead_of_interpolating() {
        let filters = FilterSet::empty(2)
            .with_pattern(1, "o'Brien")
            .expect("column in range");
        let statement = filtered_sorted_load_sql(
            "users",
            &columns(),
            &filters,
            SortSpec::new(1, false),
            PageWindow::new(100, 0),
        );

        assert_eq!(
            statement.sql,
            "SELECT * FROM `users` WHERE LOWER(CAST(`name` AS CHAR)) LIKE LOWER(?) ESCAPE '!' \
             ORDER BY `name` DESC LIMIT 100 OFFSET 0"
        );
        assert_eq!(statement.params, vec!["%o'Brien%".to_string()]);
    }

    #[test]
    fn filtered_load_conjoins_every_active_filter() {
        let filters = FilterSet::empty(2)
            .with_pattern(0, "1")
            .and_then(|filters| filters.with_pattern(1, "al"))
            .expect("columns in range");
        let statement = filtered_sorted_load_sql(
            "users",
            &columns(),
            &filters,
            SortSpec::default(),
            PageWindow::new(50, 0),
        );

        assert_eq!(
            statement.sql,
            "SELECT * FROM `users` WHERE LOWER(CAST(`id` AS CHAR)) LIKE LOWER(?) ESCAPE '!' \
             AND LOWER(CAST(`name` AS CHAR)) LIKE LOWER(?) ESCAPE '!' \
             ORDER BY `id` ASC LIMIT 50 OFFSET 0"
        );
        assert_eq!(statement.params, vec!["%1%".to_string(), "%al%".to_string()]);
    }

    #[test]
    fn unfiltered_sorted_load_has_no_where_clause() {
        let statement = filtered_sorted_load_sql(
            "users",
            &columns(),
            &FilterSet::empty(2),
            SortSpec::new(0, false),
            PageWindow::new(100, 100),
        );
        assert_eq!(
            statement.sql,
            "SELECT * FROM `users` ORDER BY `id` DESC LIMIT 100 OFFSET 100"
        );
    }

    #[test]
    fn filtered_load_without_schema_falls_back_to_initial_shape() {
        let statement = filtered_sorted_load_sql(
            "users",
            &[],
            &FilterSet::default(),
            SortSpec::new(3, false),
            PageWindow::new(100, 0),
        );
        assert_eq!(statement, initial_load_sql("users", PageWindow::new(100, 0)));
    }

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(substring_like_pattern("50%_off!"), "%50!%!_off!!%");
        assert_eq!(substring_like_pattern(""), "%%");
    }

    #[test]
    fn existence_probe_checks_next_page_start() {
        let statement = existence_probe_sql("users", 100);
        assert_eq!(
            statement.sql,
            "SELECT EXISTS(SELECT 1 FROM `users` LIMIT 1 OFFSET 100) AS has_more"
        );
    }

    #[test]
    fn full_row_update_uses_is_null_for_null_cells() {
        let cells = vec![Cell::text("2"), Cell::Null];
        let update = cell_update("users", &columns(), 1, "Bob", RowLocator::FullRow(&cells));

        assert_eq!(
            update.count.sql,
            "SELECT COUNT(*) FROM `users` WHERE `id` = ? AND `name` IS NULL"
        );
        assert_eq!(update.count.params, vec!["2".to_string()]);
        assert_eq!(
            update.update.sql,
            "UPDATE `users` SET `name` = ? WHERE `id` = ? AND `name` IS NULL LIMIT 1"
        );
        assert_eq!(update.update.params, vec!["Bob".to_string(), "2".to_string()]);
    }

    #[test]
    fn keyed_update_matches_on_key_column_only() {
        let key = Cell::text("7");
        let update = cell_update(
            "users",
            &columns(),
            1,
            "Alicia",
            RowLocator::Key {
                column: 0,
                value: &key,
            },
        );
        assert_eq!(update.count.sql, "SELECT COUNT(*) FROM `users` WHERE `id` = ?");
        assert_eq!(update.update.sql, "UPDATE `users` SET `name` = ? WHERE `id` = ? LIMIT 1");
        assert_eq!(update.update.params, vec!["Alicia".to_string(), "7".to_string()]);
    }

    #[test]
    fn missing_key_column_matches_nothing() {
        let key = Cell::text("7");
        let update = cell_update(
            "users",
            &columns(),
            1,
            "x",
            RowLocator::Key {
                column: 9,
                value: &key,
            },
        );
        assert_eq!(update.count.sql, "SELECT COUNT(*) FROM `users` WHERE 1 = 0");
        assert!(update.count.params.is_empty());
    }

    #[test]
    fn filter_set_tracks_activity_and_matches_rows() {
        let filters = FilterSet::empty(2);
        assert!(!filters.is_active());
        assert!(filters.with_pattern(2, "x").is_none());

        let filters = filters.with_pattern(1, "BO").expect("column in range");
        assert!(filters.is_active());
        assert!(filters.matches(&Row::new(vec![Cell::text("2"), Cell::text("Bob")])));
        assert!(!filters.matches(&Row::new(vec![Cell::text("1"), Cell::text("Alice")])));
        assert!(!filters.cleared().is_active());
        assert_eq!(filters.cleared().len(), 2);
    }

    #[test]
    fn null_cells_match_the_marker_text() {
        let filters = FilterSet::empty(1)
            .with_pattern(0, "nul")
            .expect("column in range");
        assert!(filters.matches(&Row::new(vec![Cell::Null])));
    }
}
