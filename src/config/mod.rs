// mongobackup/src/config/mod.rs
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use url::Url;

use crate::errors::ConfigError;
use crate::scheduler::CronSchedule;

/// Every day at 02:00 local time.
pub const DEFAULT_SCHEDULE: &str = "0 2 * * *";
pub const DEFAULT_REGION: &str = "us-east-1";

// Structs for deserializing the optional JSON config file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonMongoConfig {
    pub db: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub auth_db: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonStorageConfig {
    pub bucket_name: Option<String>,
    pub key_prefix: Option<String>,
    pub endpoint_url: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub region: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawJsonConfig {
    #[serde(default)]
    pub mongo: JsonMongoConfig,
    pub backup_dir: Option<PathBuf>,
    #[serde(default)]
    pub storage: JsonStorageConfig,
    pub schedule: Option<String>,
    pub mongodump_path: Option<PathBuf>,
}

// Application's internal configuration structs
#[derive(Clone)]
pub struct MongoConfig {
    pub db: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub auth_db: Option<String>,
}

#[derive(Clone)]
pub struct StorageConfig {
    pub endpoint_url: Url,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket_name: String,
    pub key_prefix: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub mongo: MongoConfig,
    pub backup_dir: PathBuf,
    pub storage: StorageConfig,
    pub schedule: CronSchedule,
    pub mongodump_path: Option<PathBuf>,
}

impl fmt::Debug for MongoConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MongoConfig")
            .field("db", &self.db)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"****")
            .field("auth_db", &self.auth_db)
            .finish()
    }
}

impl fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageConfig")
            .field("endpoint_url", &self.endpoint_url.as_str())
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"****")
            .field("bucket_name", &self.bucket_name)
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

impl AppConfig {
    /// Loads configuration from the optional JSON file, then lets the process
    /// environment override it. Call `dotenv` before this to pick up `.env`.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with(config_path, |key| std::env::var(key).ok())
    }

    pub fn load_with<F>(config_path: Option<&Path>, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut raw = match config_path {
            Some(path) => RawJsonConfig::from_file(path)?,
            None => RawJsonConfig::default(),
        };
        raw.apply_env(lookup)?;
        Self::from_raw(raw)
    }

    pub fn from_raw(raw: RawJsonConfig) -> Result<Self, ConfigError> {
        let RawJsonConfig {
            mongo,
            backup_dir,
            storage,
            schedule,
            mongodump_path,
        } = raw;

        let mongo = MongoConfig {
            db: required(mongo.db, "MONGO_DB")?,
            host: required(mongo.host, "MONGO_HOST")?,
            port: mongo.port.ok_or(ConfigError::Missing("MONGO_PORT"))?,
            username: required(mongo.username, "MONGO_USER")?,
            password: required(mongo.password, "MONGO_PASSWORD")?,
            auth_db: mongo.auth_db.filter(|s| !s.trim().is_empty()),
        };

        let backup_dir = backup_dir
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or(ConfigError::Missing("BACKUP_DIR"))?;

        let endpoint = required(storage.endpoint_url, "STORJ_ENDPOINT")?;
        let endpoint_url = Url::parse(&endpoint).map_err(|e| ConfigError::Invalid {
            key: "STORJ_ENDPOINT",
            reason: format!("{} ({})", e, endpoint),
        })?;
        if endpoint_url.cannot_be_a_base() {
            return Err(ConfigError::Invalid {
                key: "STORJ_ENDPOINT",
                reason: format!("not an absolute http(s) URL: {}", endpoint),
            });
        }

        let storage = StorageConfig {
            endpoint_url,
            region: storage
                .region
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_REGION.to_string()),
            access_key_id: required(storage.access_key_id, "STORJ_ACCESS_KEY")?,
            secret_access_key: required(storage.secret_access_key, "STORJ_SECRET_KEY")?,
            bucket_name: required(storage.bucket_name, "STORJ_BUCKET")?,
            key_prefix: required(storage.key_prefix, "STORJ_PATH")?,
        };

        let expression = schedule
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SCHEDULE.to_string());
        let schedule = CronSchedule::parse(&expression).map_err(|reason| ConfigError::Invalid {
            key: "BACKUP_SCHEDULE",
            reason,
        })?;

        Ok(AppConfig {
            mongo,
            backup_dir,
            storage,
            schedule,
            mongodump_path: mongodump_path.filter(|p| !p.as_os_str().is_empty()),
        })
    }
}

impl RawJsonConfig {
    pub fn from_file(config_path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(config_path).map_err(|source| ConfigError::Read {
            path: config_path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: config_path.to_path_buf(),
            source,
        })
    }

    /// Overlays environment values on top of whatever the file provided.
    /// Empty variables are ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        override_with(&mut self.mongo.db, get("MONGO_DB"));
        override_with(&mut self.mongo.host, get("MONGO_HOST"));
        override_with(&mut self.mongo.username, get("MONGO_USER"));
        override_with(&mut self.mongo.password, get("MONGO_PASSWORD"));
        override_with(&mut self.mongo.auth_db, get("MONGO_AUTH_DB"));
        if let Some(port) = get("MONGO_PORT") {
            let parsed = port.trim().parse::<u16>().map_err(|e| ConfigError::Invalid {
                key: "MONGO_PORT",
                reason: format!("{} ({})", e, port),
            })?;
            self.mongo.port = Some(parsed);
        }

        override_with(&mut self.backup_dir, get("BACKUP_DIR").map(PathBuf::from));

        override_with(&mut self.storage.bucket_name, get("STORJ_BUCKET"));
        override_with(&mut self.storage.key_prefix, get("STORJ_PATH"));
        override_with(&mut self.storage.endpoint_url, get("STORJ_ENDPOINT"));
        override_with(&mut self.storage.access_key_id, get("STORJ_ACCESS_KEY"));
        override_with(&mut self.storage.secret_access_key, get("STORJ_SECRET_KEY"));
        override_with(&mut self.storage.region, get("STORJ_REGION"));

        override_with(&mut self.schedule, get("BACKUP_SCHEDULE"));
        override_with(&mut self.mongodump_path, get("MONGODUMP_PATH").map(PathBuf::from));
        Ok(())
    }
}

fn override_with<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}

fn required(value: Option<String>, key: &'static str) -> Result<String, ConfigError> {
    value
        .filter(|s| !s.trim().is_empty())
        .ok_or(ConfigError::Missing(key))
}
