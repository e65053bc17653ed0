use std::path::PathBuf;

use crate::error::ConfigError;

/// Server settings, read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Directory scanned for game archives.
    pub games_directory: PathBuf,
    pub igdb_client_id: String,
    pub igdb_client_secret: String,
    /// First-boot administrator, if one should be created.
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
    /// Holds the catalog database and attached media.
    pub data_directory: PathBuf,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from any key lookup. Empty values count as
    /// unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());
        let require = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let data_directory = match get("BOYL_DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => dirs::data_dir()
                .map(|d| d.join("boyl-server"))
                .ok_or(ConfigError::NoDataDirectory)?,
        };

        Ok(Self {
            games_directory: PathBuf::from(require("GAMES_DIRECTORY")?),
            igdb_client_id: require("IGDB_CLIENT_ID")?,
            igdb_client_secret: require("IGDB_CLIENT_SECRET")?,
            admin_email: get("ADMIN_EMAIL"),
            admin_password: get("ADMIN_PASSWORD"),
            data_directory,
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_directory.join("server.db")
    }

    pub fn media_directory(&self) -> PathBuf {
        self.data_directory.join("media")
    }
}
