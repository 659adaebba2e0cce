use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub sink: SinkConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub receiver: ReceiverConfig,
}

/// Watch agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Directory to start watching on launch. Without it the agent waits for a selection.
    #[serde(default)]
    pub watch_dir: Option<PathBuf>,
    /// Accepted file extension, matched case-insensitively
    #[serde(default = "default_extension")]
    pub extension: String,
    /// Quiet period after the last arrival before a batch is flushed
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// How often the debouncer checks for a quiet batch
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            watch_dir: None,
            extension: default_extension(),
            debounce_ms: default_debounce_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            log_level: default_log_level(),
        }
    }
}

/// Which upload destination the agent forwards files to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    #[default]
    Http,
    ObjectStore,
    Database,
}

/// Upload sink configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SinkConfig {
    #[serde(default)]
    pub kind: SinkKind,
    /// Upper bound on a single network upload
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub http: HttpSinkConfig,
    #[serde(default)]
    pub object_store: Option<ObjectStoreConfig>,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            kind: SinkKind::default(),
            timeout_secs: default_timeout_secs(),
            http: HttpSinkConfig::default(),
            object_store: None,
        }
    }
}

/// Multipart POST destination
#[derive(Debug, Clone, Deserialize)]
pub struct HttpSinkConfig {
    #[serde(default = "default_upload_url")]
    pub url: String,
}

impl Default for HttpSinkConfig {
    fn default() -> Self {
        Self {
            url: default_upload_url(),
        }
    }
}

/// Object store PUT destination
#[derive(Debug, Clone, Deserialize)]
pub struct ObjectStoreConfig {
    pub endpoint: String,
    pub bucket: String,
    /// Prepended to every object name, e.g. `"incoming/"`
    #[serde(default)]
    pub prefix: String,
}

/// Document store shared by the database sink and the receiver
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            upload_dir: default_upload_dir(),
        }
    }
}

/// Upload receiver configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ReceiverConfig {
    #[serde(default = "default_receiver_port")]
    pub port: u16,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            port: default_receiver_port(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_extension() -> String {
    "dcm".to_string()
}

fn default_debounce_ms() -> u64 {
    2000
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_upload_url() -> String {
    "http://127.0.0.1:5000/upload".to_string()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("dicomwatch.db")
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_receiver_port() -> u16 {
    5000
}

fn default_max_upload_bytes() -> usize {
    512 * 1024 * 1024
}

impl Config {
    /// Load configuration from file
    ///
    /// Loads environment variables from .env file (if present) before loading config.
    /// Looks for config file in this order:
    /// 1. Path specified in DICOMWATCH_CONFIG environment variable
    /// 2. ./config.toml in current directory
    pub fn load() -> Result<Self> {
        // .env is optional
        let _ = dotenv::dotenv();

        let config_path = std::env::var("DICOMWATCH_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        Self::from_toml_str(&config_str)
            .with_context(|| format!("Invalid config file: {}", config_path.display()))
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(config_str: &str) -> Result<Self> {
        let config: Config = toml::from_str(config_str).context("Failed to parse config.toml")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if let Some(dir) = &self.agent.watch_dir {
            if !dir.exists() {
                anyhow::bail!("agent.watch_dir path does not exist: {}", dir.display());
            }
            if !dir.is_dir() {
                anyhow::bail!("agent.watch_dir must be a directory, not a file: {}", dir.display());
            }
        }

        if self.agent.extension.trim_start_matches('.').is_empty() {
            anyhow::bail!("agent.extension must not be empty");
        }

        if self.agent.debounce_ms == 0 {
            anyhow::bail!("agent.debounce_ms must be greater than 0");
        }

        if self.agent.poll_interval_ms == 0 || self.agent.poll_interval_ms > self.agent.debounce_ms {
            anyhow::bail!(
                "agent.poll_interval_ms must be between 1 and agent.debounce_ms ({})",
                self.agent.debounce_ms
            );
        }

        match self.sink.kind {
            SinkKind::Http => {
                url::Url::parse(&self.sink.http.url)
                    .with_context(|| format!("sink.http.url is not a valid URL: {}", self.sink.http.url))?;
            }
            SinkKind::ObjectStore => {
                let store = self
                    .sink
                    .object_store
                    .as_ref()
                    .context("sink.kind = \"object_store\" requires a [sink.object_store] section")?;
                url::Url::parse(&store.endpoint).with_context(|| {
                    format!("sink.object_store.endpoint is not a valid URL: {}", store.endpoint)
                })?;
                if store.bucket.trim().is_empty() {
                    anyhow::bail!("sink.object_store.bucket must not be empty");
                }
            }
            SinkKind::Database => {}
        }

        Ok(())
    }

    /// Extension without a leading dot, lowercased
    pub fn extension(&self) -> String {
        self.agent.extension.trim_start_matches('.').to_lowercase()
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.agent.debounce_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.agent.poll_interval_ms)
    }

    /// Get database path
    pub fn db_path(&self) -> &Path {
        &self.store.db_path
    }

    /// Directory where received file bytes are kept
    pub fn upload_dir(&self) -> &Path {
        &self.store.upload_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Serialize config tests that mutate process-wide cwd and env so they don't race.
    static CONFIG_TEST_LOCK: Mutex<()> = Mutex::new(());

    fn create_test_config(temp_dir: &TempDir) -> String {
        let watch_dir = temp_dir.path().canonicalize().unwrap();
        let watch_dir_str = watch_dir.to_str().unwrap().replace('\\', "\\\\");
        format!(
            r#"
[agent]
watch_dir = "{}"
extension = ".DCM"
debounce_ms = 1500
poll_interval_ms = 250
log_level = "debug"

[sink]
kind = "object_store"
timeout_secs = 10

[sink.object_store]
endpoint = "http://127.0.0.1:9000"
bucket = "studies"
prefix = "incoming/"

[store]
db_path = "./test.db"
upload_dir = "./uploads"

[receiver]
port = 8081
"#,
            watch_dir_str
        )
    }

    /// Restores cwd when dropped (e.g. on panic).
    struct CwdGuard(std::path::PathBuf);
    impl Drop for CwdGuard {
        fn drop(&mut self) {
            let _ = std::env::set_current_dir(&self.0);
        }
    }

    #[test]
    fn test_config_load_success() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, create_test_config(&temp_dir)).unwrap();

        let original = std::env::var("DICOMWATCH_CONFIG").ok();
        std::env::set_var("DICOMWATCH_CONFIG", config_path.to_str().unwrap());
        let config = Config::load();
        std::env::remove_var("DICOMWATCH_CONFIG");
        if let Some(v) = original {
            std::env::set_var("DICOMWATCH_CONFIG", v);
        }

        let config = config.expect("config should load");
        assert_eq!(config.agent.log_level, "debug");
        assert_eq!(config.extension(), "dcm");
        assert_eq!(config.debounce(), Duration::from_millis(1500));
        assert_eq!(config.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.sink.kind, SinkKind::ObjectStore);
        assert_eq!(config.sink.object_store.as_ref().unwrap().prefix, "incoming/");
        assert_eq!(config.receiver.port, 8081);
    }

    #[test]
    fn test_config_defaults_from_empty_document() {
        let config = Config::from_toml_str("").unwrap();
        assert!(config.agent.watch_dir.is_none());
        assert_eq!(config.extension(), "dcm");
        assert_eq!(config.debounce(), Duration::from_secs(2));
        assert_eq!(config.sink.kind, SinkKind::Http);
        assert_eq!(config.sink.http.url, "http://127.0.0.1:5000/upload");
        assert_eq!(config.db_path(), Path::new("dicomwatch.db"));
        assert_eq!(config.upload_dir(), Path::new("uploads"));
        assert_eq!(config.receiver.port, 5000);
    }

    #[test]
    fn test_config_rejects_poll_longer_than_debounce() {
        let err = Config::from_toml_str("[agent]\ndebounce_ms = 100\npoll_interval_ms = 200\n")
            .unwrap_err();
        assert!(format!("{:#}", err).contains("poll_interval_ms"));
    }

    #[test]
    fn test_config_rejects_missing_watch_dir() {
        let err = Config::from_toml_str("[agent]\nwatch_dir = \"/definitely/not/here\"\n")
            .unwrap_err();
        assert!(format!("{:#}", err).contains("does not exist"));
    }

    #[test]
    fn test_config_object_store_requires_section() {
        let err = Config::from_toml_str("[sink]\nkind = \"object_store\"\n").unwrap_err();
        assert!(format!("{:#}", err).contains("[sink.object_store]"));
    }

    #[test]
    fn test_config_rejects_bad_url() {
        let err = Config::from_toml_str("[sink.http]\nurl = \"not a url\"\n").unwrap_err();
        assert!(format!("{:#}", err).contains("sink.http.url"));
    }

    #[test]
    fn test_config_loads_from_env_file() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("custom.toml"), "[receiver]\nport = 6001\n").unwrap();
        fs::write(temp_dir.path().join(".env"), "DICOMWATCH_CONFIG=custom.toml\n").unwrap();

        let original_dir = std::env::current_dir().unwrap();
        let _cwd = CwdGuard(original_dir);
        std::env::set_current_dir(temp_dir.path()).unwrap();
        let original = std::env::var("DICOMWATCH_CONFIG").ok();
        std::env::remove_var("DICOMWATCH_CONFIG");

        let config = Config::load();
        std::env::remove_var("DICOMWATCH_CONFIG");
        if let Some(v) = original {
            std::env::set_var("DICOMWATCH_CONFIG", v);
        }
        assert_eq!(config.expect("config from .env path").receiver.port, 6001);
    }

    #[test]
    fn test_config_invalid_path() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let original = std::env::var("DICOMWATCH_CONFIG").ok();
        std::env::set_var("DICOMWATCH_CONFIG", "nonexistent.toml");
        let config = Config::load();
        assert!(config.is_err());
        std::env::remove_var("DICOMWATCH_CONFIG");
        if let Some(v) = original {
            std::env::set_var("DICOMWATCH_CONFIG", v);
        }
    }
}
