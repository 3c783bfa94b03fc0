use std::env;
use std::fs;
use std::num::NonZeroU64;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_PAGE_SIZE: u64 = 100;
const DEFAULT_MYSQL_PORT: u16 = 3306;

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TlsMode {
    Disabled,
    #[default]
    Prefer,
    Require,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PasswordSource {
    #[default]
    EnvVar,
    Keyring,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ConnectionProfile {
    pub name: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    pub database: Option<String>,
    #[serde(default)]
    pub tls_mode: TlsMode,
    #[serde(default)]
    pub password_source: PasswordSource,
    #[serde(default)]
    pub keyring_service: Option<String>,
    #[serde(default)]
    pub keyring_account: Option<String>,
    #[serde(default)]
    pub tls_ca_cert_path: Option<String>,
    #[serde(default)]
    pub read_only: bool,
}

impl ConnectionProfile {
    #[must_use]
    pub fn new(name: impl Into<String>, host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port: DEFAULT_MYSQL_PORT,
            user: user.into(),
            database: None,
            tls_mode: TlsMode::Prefer,
            password_source: PasswordSource::EnvVar,
            keyring_service: None,
            keyring_account: None,
            tls_ca_cert_path: None,
            read_only: false,
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_MYSQL_PORT
}

fn default_page_size() -> NonZeroU64 {
    NonZeroU64::new(DEFAULT_PAGE_SIZE).unwrap_or(NonZeroU64::MIN)
}

/// Settings that shape how a table view pages, locates rows, and writes.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ViewSettings {
    #[serde(default = "default_page_size")]
    pub page_size: NonZeroU64,
    /// Column used to identify rows for edits when the table has it.
    #[serde(default)]
    pub key_column: Option<String>,
    #[serde(default)]
    pub read_only: bool,
    /// Append every edit attempt to the edit journal.
    #[serde(default)]
    pub journal: bool,
}

impl Default for ViewSettings {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            key_column: None,
            read_only: false,
            journal: false,
        }
    }
}

impl ViewSettings {
    #[must_use]
    pub fn with_page_size(mut self, page_size: NonZeroU64) -> Self {
        self.page_size = page_size;
        self
    }

    #[must_use]
    pub fn with_key_column(mut self, key_column: impl Into<String>) -> Self {
        self.key_column = Some(key_column.into());
        self
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config directory is unavailable for this platform")]
    ConfigDirUnavailable,
    #[error("failed to read config file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Default, Deserialize)]
struct ConfigDocument {
    #[serde(default)]
    view: ViewSettings,
    #[serde(default)]
    profiles: Vec<ConnectionProfile>,
}

impl ConfigDocument {
    fn normalize(&mut self) {
        let mut by_name = std::collections::BTreeMap::new();
        for profile in self.profiles.drain(..) {
            by_name.insert(profile.name.clone(), profile);
        }
        self.profiles = by_name.into_values().collect();
    }
}

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
    view: ViewSettings,
    profiles: Vec<ConnectionProfile>,
}

impl ConfigStore {
    pub fn load_default() -> Result<Self, ConfigError> {
        Self::load_from_path(default_config_path()?)
    }

    pub fn load_from_path(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        if !path.exists() {
            return Ok(Self::empty(path));
        }

        let raw = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        if raw.trim().is_empty() {
            return Ok(Self::empty(path));
        }

        let mut doc: ConfigDocument = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
        doc.normalize();

        Ok(Self {
            path,
            view: doc.view,
            profiles: doc.profiles,
        })
    }

    fn empty(path: PathBuf) -> Self {
        Self {
            path,
            view: ViewSettings::default(),
            profiles: Vec::new(),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn view_settings(&self) -> &ViewSettings {
        &self.view
    }

    /// View settings for a connection, read-only if either side says so.
    #[must_use]
    pub fn settings_for(&self, profile: &ConnectionProfile) -> ViewSettings {
        let mut settings = self.view.clone();
        settings.read_only |= profile.read_only;
        settings
    }

    #[must_use]
    pub fn profiles(&self) -> &[ConnectionProfile] {
        &self.profiles
    }

    #[must_use]
    pub fn profile(&self, name: &str) -> Option<&ConnectionProfile> {
        self.profiles.iter().find(|profile| profile.name == name)
    }
}

pub fn default_config_dir() -> Result<PathBuf, ConfigError> {
    let base_dir = if let Some(custom) = env::var_os("DBE_CONFIG_DIR") {
        PathBuf::from(custom)
    } else if cfg!(target_os = "windows") {
        env::var_os("APPDATA")
            .map(PathBuf::from)
            .ok_or(ConfigError::ConfigDirUnavailable)?
    } else if let Some(xdg_config_home) = env::var_os("XDG_CONFIG_HOME") {
        PathBuf::from(xdg_config_home)
    } else {
        let home = env::var_os("HOME").ok_or(ConfigError::ConfigDirUnavailable)?;
        PathBuf::from(home).join(".config")
    };

    Ok(base_dir.join("dbe"))
}

pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    Ok(default_config_dir()?.join("config.toml"))
}
