pub mod config;
pub mod edit_journal;
pub mod edit_session;
pub mod materializer;
pub mod query_builder;
pub mod source;
pub mod table_view;

pub use source::{CellUpdate, RawResultSet, SourceError, SqlSource, Statement, WriteOutcome};
pub use table_view::{EngineError, TableView};

#[must_use]
pub fn domain_name() -> &'static str {
    "dbe-core"
}
