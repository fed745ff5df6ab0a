use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::PathBuf, time::Duration};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    /// Bulk export/import job settings
    #[serde(default)]
    pub bulk: BulkConfig,
    /// Scope enforcement for bulk commands
    #[serde(default)]
    pub auth: AuthConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Server validations
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        if self.server.body_limit_bytes == 0 {
            return Err("server.body_limit_bytes must be > 0".into());
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        // Storage validation
        if self.storage.backend == StorageBackend::Remote
            && self
                .storage
                .remote
                .base_url
                .as_deref()
                .unwrap_or("")
                .is_empty()
        {
            return Err("storage.backend=remote requires storage.remote.base_url".into());
        }
        if let Some(base) = self.storage.remote.base_url.as_deref()
            && !base.is_empty()
            && let Err(e) = url::Url::parse(base)
        {
            return Err(format!("storage.remote.base_url is not a valid URL: {e}"));
        }
        if let Some(base) = self.server.base_url.as_deref()
            && let Err(e) = url::Url::parse(base)
        {
            return Err(format!("server.base_url is not a valid URL: {e}"));
        }
        if self.storage.remote.timeout_ms == 0 {
            return Err("storage.remote.timeout_ms must be > 0".into());
        }
        // Bulk validations
        if self.bulk.max_concurrent_jobs == 0 {
            return Err("bulk.max_concurrent_jobs must be > 0".into());
        }
        if self.bulk.job_timeout_secs == 0 {
            return Err("bulk.job_timeout_secs must be > 0".into());
        }
        if self.bulk.batch_size == 0 {
            return Err("bulk.batch_size must be > 0".into());
        }
        if self.bulk.max_resources_per_file == 0 {
            return Err("bulk.max_resources_per_file must be > 0".into());
        }
        if self.bulk.cleanup_interval_seconds == 0 {
            return Err("bulk.cleanup_interval_seconds must be > 0".into());
        }
        // Auth validation
        if self.auth.enforce_scopes && self.auth.scopes_header.trim().is_empty() {
            return Err("auth.enforce_scopes=true requires auth.scopes_header".into());
        }
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        use std::net::{IpAddr, Ipv4Addr};
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        SocketAddr::from((host, self.server.port))
    }

    /// Returns the base URL for the server.
    /// If `base_url` is configured, returns that; otherwise computes from host:port.
    pub fn base_url(&self) -> String {
        self.server
            .base_url
            .clone()
            .unwrap_or_else(|| format!("http://{}:{}", self.server.host, self.server.port))
            .trim_end_matches('/')
            .to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Base URL for the server, used in status and manifest links.
    /// If not set, defaults to http://{host}:{port}
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}
fn default_body_limit() -> usize {
    16 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            base_url: None,
            body_limit_bytes: default_body_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Which resource store the bulk jobs talk to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Process-local store, for development and tests.
    #[default]
    Memory,
    /// An upstream FHIR server reached over HTTP.
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default)]
    pub remote: RemoteStoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteStoreConfig {
    /// Base URL of the upstream FHIR server, e.g. `http://fhir:8080/fhir`
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_remote_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_remote_timeout_ms() -> u64 {
    30_000
}

impl Default for RemoteStoreConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_ms: default_remote_timeout_ms(),
        }
    }
}

impl RemoteStoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Bulk job configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkConfig {
    /// Jobs processed at the same time; the rest wait for a slot
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    /// Hard limit on a single job's processing time
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,
    /// Page size used when reading from the resource store
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    /// NDJSON files are split after this many lines
    #[serde(default = "default_max_resources_per_file")]
    pub max_resources_per_file: usize,
    /// Directory holding export output, one subdirectory per job
    #[serde(default = "default_export_path")]
    pub export_path: PathBuf,
    /// Terminal jobs and their files are removed after this many hours
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,
    #[serde(default = "default_cleanup_interval_seconds")]
    pub cleanup_interval_seconds: u64,
}

fn default_max_concurrent_jobs() -> usize {
    4
}
fn default_job_timeout_secs() -> u64 {
    3600
}
fn default_batch_size() -> u32 {
    500
}
fn default_max_resources_per_file() -> usize {
    100_000
}
fn default_export_path() -> PathBuf {
    PathBuf::from("./exports")
}
fn default_retention_hours() -> u64 {
    24
}
fn default_cleanup_interval_seconds() -> u64 {
    3600
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            job_timeout_secs: default_job_timeout_secs(),
            batch_size: default_batch_size(),
            max_resources_per_file: default_max_resources_per_file(),
            export_path: default_export_path(),
            retention_hours: default_retention_hours(),
            cleanup_interval_seconds: default_cleanup_interval_seconds(),
        }
    }
}

impl BulkConfig {
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_hours * 3600)
    }
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// When true, bulk commands require `$export`/`$import` operation scopes
    #[serde(default)]
    pub enforce_scopes: bool,
    /// Header carrying the caller's granted scopes, space separated
    #[serde(default = "default_scopes_header")]
    pub scopes_header: String,
}

fn default_scopes_header() -> String {
    "x-granted-scopes".into()
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enforce_scopes: false,
            scopes_header: default_scopes_header(),
        }
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    /// Default configuration file name looked up in the working directory.
    pub const DEFAULT_CONFIG_FILE: &str = "fhirbridge.toml";

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., FHIRBRIDGE__SERVER__PORT=9090
        builder = builder.add_source(
            Environment::with_prefix("FHIRBRIDGE")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.bulk.max_concurrent_jobs, 4);
        assert_eq!(cfg.bulk.batch_size, 500);
        assert_eq!(cfg.storage.backend, StorageBackend::Memory);
        assert_eq!(cfg.auth.scopes_header, "x-granted-scopes");
        assert!(!cfg.auth.enforce_scopes);
    }

    #[test]
    fn remote_backend_requires_base_url() {
        let mut cfg = AppConfig::default();
        cfg.storage.backend = StorageBackend::Remote;
        assert!(cfg.validate().unwrap_err().contains("base_url"));

        cfg.storage.remote.base_url = Some("http://fhir.local/fhir".into());
        assert!(cfg.validate().is_ok());

        cfg.storage.remote.base_url = Some("not a url".into());
        assert!(cfg.validate().unwrap_err().contains("not a valid URL"));
    }

    #[test]
    fn zero_values_rejected() {
        let mut cfg = AppConfig::default();
        cfg.bulk.max_concurrent_jobs = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.bulk.job_timeout_secs = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.bulk.batch_size = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.logging.level = "loud".into();
        assert!(cfg.validate().unwrap_err().contains("logging.level"));
    }

    #[test]
    fn base_url_falls_back_to_host_port() {
        let mut cfg = AppConfig::default();
        cfg.server.host = "127.0.0.1".into();
        cfg.server.port = 9000;
        assert_eq!(cfg.base_url(), "http://127.0.0.1:9000");

        cfg.server.base_url = Some("https://bridge.example.org/fhir/".into());
        assert_eq!(cfg.base_url(), "https://bridge.example.org/fhir");
    }
}
