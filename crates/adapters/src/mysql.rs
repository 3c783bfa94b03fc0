use std::path::PathBuf;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dbe_core::config::{ConfigStore, ConnectionProfile, PasswordSource, TlsMode};
use dbe_core::source::{CellUpdate, RawResultSet, SourceError, SqlSource, Statement, WriteOutcome};
use dbe_core::table_view::TableView;
use mysql_async::prelude::Queryable;
use mysql_async::{Conn, OptsBuilder, Params, Row, SslOpts, TxOpts, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

const PASSWORD_ENV_VAR: &str = "DBE_DB_PASSWORD";
const DEFAULT_KEYRING_SERVICE: &str = "dbe";

#[derive(Debug, Error)]
pub enum OpenViewError {
    #[error("no connection profile named `{0}`")]
    UnknownProfile(String),
    #[error("failed to connect: {0}")]
    Connect(#[from] SourceError),
}

/// One MySQL connection serving a single table view.
#[derive(Debug)]
pub struct MysqlSource {
    conn: Conn,
    connect_latency: Duration,
}

impl MysqlSource {
    pub async fn connect(profile: &ConnectionProfile) -> Result<Self, SourceError> {
        let started = Instant::now();
        let conn = Conn::new(opts_from_profile(profile))
            .await
            .map_err(to_source_error)?;
        let connect_latency = started.elapsed();
        info!(
            profile = %profile.name,
            host = %profile.host,
            port = profile.port,
            latency_ms = connect_latency.as_millis(),
            "connected"
        );
        Ok(Self {
            conn,
            connect_latency,
        })
    }

    /// Connects with the named profile and opens a view over that connection
    /// using the profile's effective view settings.
    pub async fn open_view(
        store: &ConfigStore,
        profile_name: &str,
    ) -> Result<TableView<Self>, OpenViewError> {
        let profile = store
            .profile(profile_name)
            .ok_or_else(|| OpenViewError::UnknownProfile(profile_name.to_string()))?;
        let source = Self::connect(profile).await?;
        Ok(TableView::new(source, store.settings_for(profile)))
    }

    #[must_use]
    pub fn connect_latency(&self) -> Duration {
        self.connect_latency
    }

    /// Tables of the current database, in server order.
    pub async fn list_tables(&mut self) -> Result<Vec<String>, SourceError> {
        self.conn
            .query_map("SHOW TABLES", |table: String| table)
            .await
            .map_err(to_source_error)
    }

    pub async fn ping(&mut self) -> Result<Duration, SourceError> {
        let started = Instant::now();
        self.conn.ping().await.map_err(to_source_error)?;
        Ok(started.elapsed())
    }

    pub async fn disconnect(self) -> Result<(), SourceError> {
        self.conn.disconnect().await.map_err(to_source_error)
    }
}

#[async_trait]
impl SqlSource for MysqlSource {
    async fn query(&mut self, statement: &Statement) -> Result<RawResultSet, SourceError> {
        let mut result = self
            .conn
            .exec_iter(statement.sql.as_str(), statement_params(statement))
            .await
            .map_err(to_source_error)?;
        let columns = result
            .columns_ref()
            .iter()
            .map(|column| column.name_str().into_owned())
            .collect::<Vec<_>>();
        let rows = result
            .collect_and_drop::<Row>()
            .await
            .map_err(to_source_error)?
            .into_iter()
            .map(row_to_cells)
            .collect::<Vec<_>>();
        Ok(RawResultSet::new(columns, rows))
    }

    async fn apply_update(&mut self, update: &CellUpdate) -> Result<WriteOutcome, SourceError> {
        let mut tx = self
            .conn
            .start_transaction(TxOpts::default())
            .await
            .map_err(to_source_error)?;

        // Counted up front: non-transactional engines ignore the rollback below.
        let counted: Option<u64> = tx
            .exec_first(update.count.sql.as_str(), statement_params(&update.count))
            .await
            .map_err(to_source_error)?;
        let rows_matched = counted.unwrap_or_default();
        if rows_matched != 1 {
            warn!(rows_matched, "skipping update that does not match one row");
            tx.rollback().await.map_err(to_source_error)?;
            return Ok(WriteOutcome::rejected(rows_matched));
        }

        tx.exec_drop(update.update.sql.as_str(), statement_params(&update.update))
            .await
            .map_err(to_source_error)?;
        let rows_updated = tx.affected_rows();
        if rows_updated == 1 {
            tx.commit().await.map_err(to_source_error)?;
            Ok(WriteOutcome::single_row())
        } else {
            warn!(rows_updated, "rolling back update that did not match one row");
            tx.rollback().await.map_err(to_source_error)?;
            Ok(WriteOutcome::rejected(rows_updated))
        }
    }
}

fn statement_params(statement: &Statement) -> Params {
    if statement.params.is_empty() {
        Params::Empty
    } else {
        Params::Positional(
            statement
                .params
                .iter()
                .map(|param| Value::from(param.as_str()))
                .collect(),
        )
    }
}

fn opts_from_profile(profile: &ConnectionProfile) -> OptsBuilder {
    // Affected rows must count matched rows, or rewriting an unchanged value reads as a miss.
    let mut builder = OptsBuilder::default()
        .ip_or_hostname(profile.host.clone())
        .tcp_port(profile.port)
        .user(Some(profile.user.clone()))
        .client_found_rows(true);

    if let Some(password) = resolve_password(profile) {
        builder = builder.pass(Some(password));
    }

    if let Some(database) = non_empty(profile.database.as_deref()) {
        builder = builder.db_name(Some(database.to_string()));
    }

    if let Some(ssl_opts) = ssl_opts_from_profile(profile) {
        builder = builder.ssl_opts(ssl_opts);
    }

    if matches!(profile.tls_mode, TlsMode::Disabled) {
        builder = builder.prefer_socket(false);
    }

    builder
}

fn resolve_password(profile: &ConnectionProfile) -> Option<String> {
    let env_password = std::env::var(PASSWORD_ENV_VAR)
        .ok()
        .filter(|pw| !pw.is_empty());

    match profile.password_source {
        PasswordSource::EnvVar => env_password,
        PasswordSource::Keyring => {
            if let Some(password) = load_keyring_password(profile) {
                return Some(password);
            }

            if let Some(password) = env_password {
                store_keyring_password(profile, &password);
                return Some(password);
            }

            debug!(profile = %profile.name, "no password in keyring or environment");
            None
        }
    }
}

fn ssl_opts_from_profile(profile: &ConnectionProfile) -> Option<SslOpts> {
    if !profile_requests_tls(profile) {
        return None;
    }

    let mut ssl_opts = SslOpts::default();
    if let Some(ca_cert_path) = non_empty(profile.tls_ca_cert_path.as_deref()) {
        ssl_opts = ssl_opts.with_root_certs(vec![PathBuf::from(ca_cert_path).into()]);
    }
    Some(ssl_opts)
}

fn profile_requests_tls(profile: &ConnectionProfile) -> bool {
    match profile.tls_mode {
        TlsMode::Disabled => false,
        TlsMode::Prefer => non_empty(profile.tls_ca_cert_path.as_deref()).is_some(),
        TlsMode::Require => true,
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.and_then(|raw| {
        let trimmed = raw.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    })
}

#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
fn load_keyring_password(profile: &ConnectionProfile) -> Option<String> {
    let entry = keyring_entry(profile)?;
    entry.get_password().ok().filter(|pw| !pw.is_empty())
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
fn load_keyring_password(_profile: &ConnectionProfile) -> Option<String> {
    None
}

#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
fn store_keyring_password(profile: &ConnectionProfile, password: &str) {
    if password.is_empty() {
        return;
    }
    if let Some(entry) = keyring_entry(profile) {
        if let Err(error) = entry.set_password(password) {
            warn!(%error, profile = %profile.name, "failed to store password in keyring");
        }
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
fn store_keyring_password(_profile: &ConnectionProfile, _password: &str) {}

#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
fn keyring_entry(profile: &ConnectionProfile) -> Option<keyring::Entry> {
    let service =
        non_empty(profile.keyring_service.as_deref()).unwrap_or(DEFAULT_KEYRING_SERVICE);
    let account = non_empty(profile.keyring_account.as_deref()).unwrap_or(profile.name.as_str());
    keyring::Entry::new(service, account).ok()
}

fn row_to_cells(row: Row) -> Vec<Option<String>> {
    row.unwrap().into_iter().map(value_to_cell).collect()
}

fn value_to_cell(value: Value) -> Option<String> {
    let text = match value {
        Value::NULL => return None,
        Value::Bytes(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Value::Int(value) => value.to_string(),
        Value::UInt(value) => value.to_string(),
        Value::Float(value) => value.to_string(),
        Value::Double(value) => value.to_string(),
        Value::Date(year, month, day, 0, 0, 0, 0) => format!("{year:04}-{month:02}-{day:02}"),
        Value::Date(year, month, day, hour, minute, second, 0) => {
            format!("{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}")
        }
        Value::Date(year, month, day, hour, minute, second, micros) => format!(
            "{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}.{micros:06}"
        ),
        Value::Time(is_negative, days, hours, minutes, seconds, micros) => {
            let sign = if is_negative { "-" } else { "" };
            let hours = u32::from(hours) + days * 24;
            if micros == 0 {
                format!("{sign}{hours:02}:{minutes:02}:{seconds:02}")
            } else {
                format!("{sign}{hours:02}:{minutes:02}:{seconds:02}.{micros:06}")
            }
        }
    };
    Some(text)
}

fn to_source_error(error: mysql_async::Error) -> SourceError {
    SourceError::new(error.to_string())
}

#[cfg(test)]
mod tests {
    use dbe_core::config::{ConfigStore, ConnectionProfile, TlsMode};
    use dbe_core::source::Statement;
    use mysql_async::{Params, Value};

    use super::{
        opts_from_profile, profile_requests_tls, statement_params, value_to_cell, MysqlSource,
        OpenViewError,
    };

    #[tokio::test]
    async fn open_view_rejects_unknown_profile_before_connecting() {
        let path = std::env::temp_dir()
            .join("dbe-adapters-missing")
            .join("config.toml");
        let store = ConfigStore::load_from_path(path).expect("missing file loads defaults");

        let err = MysqlSource::open_view(&store, "staging")
            .await
            .expect_err("unknown profile must fail");
        assert!(matches!(err, OpenViewError::UnknownProfile(name) if name == "staging"));
    }

    #[test]
    fn values_convert_to_display_text_and_null() {
        assert_eq!(value_to_cell(Value::NULL), None);
        assert_eq!(
            value_to_cell(Value::Bytes(b"hello".to_vec())),
            Some("hello".to_string())
        );
        assert_eq!(value_to_cell(Value::Int(-8)), Some("-8".to_string()));
        assert_eq!(value_to_cell(Value::UInt(8)), Some("8".to_string()));
    }

    #[test]
    fn temporal_values_use_mysql_literal_format() {
        assert_eq!(
            value_to_cell(Value::Date(2024, 3, 9, 0, 0, 0, 0)),
            Some("2024-03-09".to_string())
        );
        assert_eq!(
            value_to_cell(Value::Date(2024, 3, 9, 14, 5, 0, 0)),
            Some("2024-03-09 14:05:00".to_string())
        );
        assert_eq!(
            value_to_cell(Value::Date(2024, 3, 9, 14, 5, 0, 12)),
            Some("2024-03-09 14:05:00.000012".to_string())
        );
        assert_eq!(
            value_to_cell(Value::Time(true, 1, 2, 3, 4, 0)),
            Some("-26:03:04".to_string())
        );
    }

    #[test]
    fn statement_params_are_positional_text() {
        assert_eq!(
            statement_params(&Statement::without_params("SELECT 1")),
            Params::Empty
        );
        assert_eq!(
            statement_params(&Statement::new(
                "SELECT ?",
                vec!["a".to_string(), "%b%".to_string()]
            )),
            Params::Positional(vec![Value::from("a"), Value::from("%b%")])
        );
    }

    #[test]
    fn opts_builder_uses_profile_host_port_user() {
        let mut profile = ConnectionProfile::new("local", "127.0.0.1", "root");
        profile.port = 3307;
        profile.database = Some("app".to_string());

        let _opts = opts_from_profile(&profile);
    }

    #[test]
    fn tls_mode_prefer_requires_a_ca_certificate() {
        let mut profile = ConnectionProfile::new("local", "127.0.0.1", "root");
        profile.tls_mode = TlsMode::Prefer;
        assert!(!profile_requests_tls(&profile));

        profile.tls_ca_cert_path = Some("  ".to_string());
        assert!(!profile_requests_tls(&profile));

        profile.tls_ca_cert_path = Some("/tmp/ca.pem".to_string());
        assert!(profile_requests_tls(&profile));
    }

    #[test]
    fn tls_mode_require_always_uses_tls_and_disabled_never() {
        let mut profile = ConnectionProfile::new("local", "127.0.0.1", "root");
        profile.tls_mode = TlsMode::Require;
        assert!(profile_requests_tls(&profile));

        profile.tls_mode = TlsMode::Disabled;
        profile.tls_ca_cert_path = Some("/tmp/ca.pem".to_string());
        assert!(!profile_requests_tls(&profile));
    }
}
