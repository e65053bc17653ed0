//! Typed access to the client's key/value settings.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use boyl_db::{Db, OperationError, get_setting, set_setting};
use serde_json::Value;

use crate::error::DownloadError;

/// Every setting the client reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingKey {
    ServerUrl,
    Email,
    Password,
    GamesDirectory,
    DefaultLauncher,
    Os,
}

impl SettingKey {
    pub const ALL: &[SettingKey] = &[
        SettingKey::ServerUrl,
        SettingKey::Email,
        SettingKey::Password,
        SettingKey::GamesDirectory,
        SettingKey::DefaultLauncher,
        SettingKey::Os,
    ];

    /// The key as stored in the `settings` table.
    pub fn as_str(&self) -> &'static str {
        match self {
            SettingKey::ServerUrl => "serverUrl",
            SettingKey::Email => "email",
            SettingKey::Password => "password",
            SettingKey::GamesDirectory => "gamesDirectory",
            SettingKey::DefaultLauncher => "defaultLauncher",
            SettingKey::Os => "os",
        }
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown setting '{0}'")]
pub struct UnknownSetting(pub String);

impl FromStr for SettingKey {
    type Err = UnknownSetting;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SettingKey::ALL
            .iter()
            .find(|key| key.as_str() == s)
            .copied()
            .ok_or_else(|| UnknownSetting(s.to_string()))
    }
}

/// Settings stored as JSON values in the record store.
#[derive(Clone)]
pub struct Settings {
    db: Db,
}

impl Settings {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub fn get(&self, key: SettingKey) -> Result<Option<Value>, OperationError> {
        get_setting(&self.db.lock(), key.as_str())
    }

    /// The value under `key` if it is a JSON string; empty otherwise.
    pub fn get_string(&self, key: SettingKey) -> Result<String, OperationError> {
        Ok(match self.get(key)? {
            Some(Value::String(s)) => s,
            _ => String::new(),
        })
    }

    pub fn set(&self, key: SettingKey, value: &Value) -> Result<(), OperationError> {
        set_setting(&self.db.lock(), key.as_str(), value)
    }

    pub fn set_string(&self, key: SettingKey, value: &str) -> Result<(), OperationError> {
        self.set(key, &Value::String(value.to_string()))
    }

    /// Root directory games are installed under.
    pub fn games_directory(&self) -> Result<PathBuf, DownloadError> {
        let dir = self.get_string(SettingKey::GamesDirectory)?;
        if dir.is_empty() {
            return Err(DownloadError::config("gamesDirectory is not set"));
        }
        Ok(PathBuf::from(dir))
    }

    /// Record the platform this client runs on.
    pub fn record_os(&self) -> Result<(), OperationError> {
        self.set_string(SettingKey::Os, std::env::consts::OS)
    }
}
