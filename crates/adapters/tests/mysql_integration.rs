use std::num::NonZeroU64;

use dbe_adapters::mysql::MysqlSource;
use dbe_core::config::{ConnectionProfile, ViewSettings};
use dbe_core::edit_session::WriteError;
use dbe_core::materializer::Cell;
use dbe_core::source::{SqlSource, Statement};
use dbe_core::table_view::{EngineError, TableView, ViewSummary};

fn mysql_integration_enabled() -> bool {
    matches!(
        std::env::var("DBE_RUN_MYSQL_INTEGRATION").ok().as_deref(),
        Some("1")
    )
}

fn integration_profile(database: Option<&str>) -> ConnectionProfile {
    let host = std::env::var("DBE_TEST_DB_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let user = std::env::var("DBE_TEST_DB_USER").unwrap_or_else(|_| "root".to_string());
    let port = std::env::var("DBE_TEST_DB_PORT")
        .ok()
        .and_then(|raw| raw.parse::<u16>().ok())
        .unwrap_or(3306);

    let mut profile = ConnectionProfile::new("adapters-integration", host, user);
    profile.port = port;
    profile.database = database.map(str::to_string);
    profile
}

async fn execute_sql(source: &mut MysqlSource, sql: &str) {
    source
        .query(&Statement::without_params(sql))
        .await
        .expect("statement should succeed");
}

fn names(view: &TableView<MysqlSource>) -> Vec<String> {
    view.rows()
        .iter()
        .map(|row| row.cells[1].display_text().to_string())
        .collect()
}

#[tokio::test(flavor = "current_thread")]
async fn table_view_browses_and_edits_a_live_table() {
    if !mysql_integration_enabled() {
        return;
    }

    let database = "dbe_adapters_cov";

    let mut admin = MysqlSource::connect(&integration_profile(None))
        .await
        .expect("admin connect should succeed");
    execute_sql(
        &mut admin,
        &format!("CREATE DATABASE IF NOT EXISTS `{database}`"),
    )
    .await;
    admin
        .disconnect()
        .await
        .expect("admin disconnect should succeed");

    let mut source = MysqlSource::connect(&integration_profile(Some(database)))
        .await
        .expect("connect should succeed");
    source.ping().await.expect("ping should succeed");
    execute_sql(&mut source, "DROP TABLE IF EXISTS integration_users").await;
    execute_sql(
        &mut source,
        "CREATE TABLE integration_users (\
         id BIGINT NOT NULL PRIMARY KEY,\
         name VARCHAR(64) NULL,\
         note VARCHAR(64) NULL\
         )",
    )
    .await;
    execute_sql(
        &mut source,
        "INSERT INTO integration_users (id, name, note) VALUES \
         (1, 'Alice', '100%_done'), (2, 'Bob', NULL), (3, 'Cara', 'x')",
    )
    .await;

    let tables = source.list_tables().await.expect("tables should list");
    assert!(tables.iter().any(|table| table == "integration_users"));

    let settings = ViewSettings::default().with_page_size(NonZeroU64::new(2).expect("non-zero"));
    let mut view = TableView::new(source, settings);
    view.select_table("integration_users")
        .await
        .expect("table should load");
    assert_eq!(view.columns(), ["id", "name", "note"]);
    assert_eq!(names(&view), vec!["Alice", "Bob"]);
    assert!(view.pagination().has_more_rows);
    assert_eq!(view.rows()[1].cells[2], Cell::Null);

    view.next_page().await.expect("next page should load");
    assert_eq!(names(&view), vec!["Cara"]);
    assert!(!view.pagination().has_more_rows);
    view.previous_page()
        .await
        .expect("previous page should load");
    assert_eq!(view.pagination().offset, 0);

    view.set_filter(2, "0%_").await.expect("filter should load");
    assert_eq!(names(&view), vec!["Alice"]);
    assert_eq!(view.summary(), ViewSummary::Filtered { matches: 1 });
    view.clear_all_filters().await.expect("clear should load");

    view.set_sort(1, false).await.expect("sort should load");
    assert_eq!(names(&view), vec!["Cara", "Bob"]);
    view.set_sort(0, true).await.expect("sort should load");

    view.begin_edit(1, 2).expect("edit should open");
    view.commit_edit("filled").await.expect("null cell update");
    assert_eq!(view.rows()[1].cells[2], Cell::text("filled"));

    view.begin_edit(0, 1).expect("edit should open");
    view.commit_edit("Alice").await.expect("unchanged value still matches");

    let mut source = view.into_source();
    execute_sql(
        &mut source,
        "INSERT INTO integration_users (id, name, note) VALUES (4, 'Dup', 'same')",
    )
    .await;
    execute_sql(&mut source, "ALTER TABLE integration_users DROP PRIMARY KEY").await;
    execute_sql(&mut source, "ALTER TABLE integration_users ENGINE=MyISAM").await;
    execute_sql(
        &mut source,
        "INSERT INTO integration_users (id, name, note) VALUES (4, 'Dup', 'same')",
    )
    .await;

    let mut view = TableView::new(source, ViewSettings::default());
    view.select_table("integration_users")
        .await
        .expect("table should reload");
    view.set_filter(1, "dup").await.expect("filter should load");
    assert_eq!(view.rows().len(), 2);
    view.begin_edit(0, 2).expect("edit should open");
    assert_eq!(
        view.commit_edit("changed").await,
        Err(EngineError::Write(WriteError::RowMatch { matched: 2 }))
    );

    let mut source = view.into_source();
    let untouched = source
        .query(&Statement::without_params(
            "SELECT COUNT(*) FROM integration_users WHERE note = 'same'",
        ))
        .await
        .expect("count should run");
    assert_eq!(untouched.value(0, 0), Some("2"));

    execute_sql(&mut source, "DROP TABLE IF EXISTS integration_users").await;
    source.disconnect().await.expect("disconnect should succeed");
}
