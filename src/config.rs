use serde::{Deserialize, Serialize};

/// File format used by the local-file and object storage backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFileFormat {
    /// JSONL: one compact JSON object per line
    Json,
    /// CSV: header row followed by RFC4180-escaped data rows
    Csv,
}

impl LogFileFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Json => "jsonl",
            Self::Csv => "csv",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub apilog: ApiLogConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Configuration surface consumed by the logging pipeline.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ApiLogConfig {
    /// Enable or disable the entire interception layer.
    pub enabled: bool,

    /// Logical name of this application, recorded in every entry.
    pub app_name: String,

    /// Ant-style allow-list. Empty means every path is eligible.
    pub include_paths: Vec<String>,

    /// Ant-style deny-list. Takes precedence over the allow-list.
    pub exclude_paths: Vec<String>,

    /// Header names whose values are replaced with `"***"`.
    pub mask_headers: Vec<String>,

    /// Replace the entire request body with `"***"`.
    pub mask_request_body: bool,

    /// Replace the entire response body with `"***"`.
    pub mask_response_body: bool,

    /// Maximum characters recorded for request/response bodies.
    pub max_body_size: usize,

    pub storage: StorageConfig,

    pub view: ViewConfig,
}

impl Default for ApiLogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            app_name: String::new(),
            include_paths: Vec::new(),
            exclude_paths: Vec::new(),
            mask_headers: vec![
                "Authorization".to_string(),
                "Cookie".to_string(),
                "Set-Cookie".to_string(),
            ],
            mask_request_body: false,
            mask_response_body: false,
            max_body_size: 10_000,
            storage: StorageConfig::default(),
            view: ViewConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db: DbStorageConfig,
    pub local_file: LocalFileStorageConfig,
    pub object: ObjectStorageConfig,
    pub http: HttpStorageConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DbStorageConfig {
    pub enabled: bool,

    /// Database URL. The backend opens its own connection here,
    /// independent of any pool the host application manages.
    pub url: String,

    /// Table used to store API logs.
    pub table_name: String,

    /// Issue CREATE TABLE IF NOT EXISTS (+ indexes) on startup.
    pub auto_create_table: bool,
}

impl Default for DbStorageConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "sqlite:./data/apilog.db".to_string(),
            table_name: "api_logs".to_string(),
            auto_create_table: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LocalFileStorageConfig {
    pub enabled: bool,

    /// Directory where log files are written.
    pub path: String,

    /// Entries buffered before a new file is flushed.
    pub logs_per_file: usize,

    pub format: LogFileFormat,

    /// Periodic flush interval in seconds. 0 disables the timer.
    pub flush_interval_seconds: u64,
}

impl Default for LocalFileStorageConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: "./logs/api".to_string(),
            logs_per_file: 1000,
            format: LogFileFormat::Json,
            flush_interval_seconds: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObjectStorageConfig {
    pub enabled: bool,

    /// S3-compatible storage endpoint, e.g. `https://storage.example.com/v1`.
    pub endpoint_url: String,

    /// Bearer credential for the storage endpoint.
    pub access_key: String,

    /// Target bucket name.
    pub bucket: String,

    /// Object key prefix, acts as a folder path.
    pub key_prefix: String,

    /// Entries buffered before uploading a new object.
    pub logs_per_file: usize,

    pub format: LogFileFormat,

    /// Periodic flush interval in seconds. 0 disables the timer.
    pub flush_interval_seconds: u64,

    /// Upload timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for ObjectStorageConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint_url: String::new(),
            access_key: String::new(),
            bucket: "api-logs".to_string(),
            key_prefix: "logs/".to_string(),
            logs_per_file: 1000,
            format: LogFileFormat::Json,
            flush_interval_seconds: 0,
            timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpStorageConfig {
    pub enabled: bool,

    /// Remote endpoint receiving entries, e.g.
    /// `http://apilog-view:8080/apilog/logs/receive`.
    pub endpoint_url: String,

    /// Connect/read timeout in milliseconds.
    pub timeout_ms: u64,

    /// Fire-and-forget delivery on a background worker pool.
    /// When false the POST blocks the caller.
    #[serde(rename = "async")]
    pub async_send: bool,

    /// Background worker count in async mode.
    pub workers: usize,
}

impl Default for HttpStorageConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint_url: String::new(),
            timeout_ms: 5000,
            async_send: true,
            workers: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ViewConfig {
    /// Enable the view API (ingest + query endpoints).
    pub enabled: bool,

    /// Base path for all view endpoints.
    pub base_path: String,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_path: "/apilog".to_string(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

pub fn load_config(name: &str) -> anyhow::Result<Config> {
    let config = config::Config::builder()
        .add_source(config::File::with_name(name).required(false))
        .add_source(config::Environment::with_prefix("APILOG").separator("__"))
        .build()?;

    let cfg: Config = config.try_deserialize()?;
    validate_config(&cfg)?;

    Ok(cfg)
}

fn validate_config(cfg: &Config) -> anyhow::Result<()> {
    let storage = &cfg.apilog.storage;

    if storage.http.enabled && storage.http.endpoint_url.is_empty() {
        anyhow::bail!("apilog.storage.http.endpoint_url must be set when HTTP storage is enabled");
    }

    if storage.object.enabled {
        if storage.object.endpoint_url.is_empty() {
            anyhow::bail!("apilog.storage.object.endpoint_url must be set when object storage is enabled");
        }
        if storage.object.access_key.is_empty() {
            anyhow::bail!("apilog.storage.object.access_key must be set when object storage is enabled");
        }
    }

    if cfg.apilog.view.enabled && !cfg.apilog.view.base_path.starts_with('/') {
        anyhow::bail!("apilog.view.base_path must start with '/'");
    }

    Ok(())
}
