use serde::{Deserialize, Serialize};

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Server bootstrap configuration. Carries no provider credentials — those live
/// exclusively in the credential store file (see `crate::credentials`).
#[derive(Debug, Clone, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default)]
    pub base_path: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_worker_threads: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_max_blocking_threads: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tcp_reuse_port_listener_count: Option<usize>,
}

fn default_port() -> u16 {
    3000
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_connect_timeout_ms() -> u64 {
    5000
}
fn default_request_timeout_ms() -> u64 {
    120_000
}

#[derive(Debug, Deserialize)]
struct ServerConfigWire {
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_host")]
    host: String,
    #[serde(default)]
    base_path: String,
    #[serde(default = "default_connect_timeout_ms")]
    connect_timeout_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    request_timeout_ms: u64,
    #[serde(default)]
    runtime_worker_threads: Option<RuntimeThreadsSetting>,
    #[serde(default)]
    runtime_max_blocking_threads: Option<RuntimeThreadsSetting>,
    #[serde(default)]
    tcp_reuse_port_listener_count: Option<usize>,
}

/// Distinguishes "key absent" (use the runtime default) from "key present and
/// explicitly null" (force a single value, e.g. one worker thread) during YAML
/// deserialization — an untagged enum is the only way serde tells these apart.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RuntimeThreadsSetting {
    Fixed(usize),
    Auto(()),
}

fn runtime_threads_or_default(setting: Option<&RuntimeThreadsSetting>) -> Option<usize> {
    match setting {
        None => None,
        Some(RuntimeThreadsSetting::Fixed(threads)) => Some(*threads),
        Some(RuntimeThreadsSetting::Auto(())) => None,
    }
}

impl<'de> Deserialize<'de> for ServerConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let wire = ServerConfigWire::deserialize(deserializer)?;
        Ok(Self {
            port: wire.port,
            host: wire.host,
            base_path: wire.base_path,
            connect_timeout_ms: wire.connect_timeout_ms,
            request_timeout_ms: wire.request_timeout_ms,
            runtime_worker_threads: runtime_threads_or_default(wire.runtime_worker_threads.as_ref()),
            runtime_max_blocking_threads: runtime_threads_or_default(
                wire.runtime_max_blocking_threads.as_ref(),
            ),
            tcp_reuse_port_listener_count: wire.tcp_reuse_port_listener_count,
        })
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            base_path: String::new(),
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            runtime_worker_threads: None,
            runtime_max_blocking_threads: None,
            tcp_reuse_port_listener_count: None,
        }
    }
}

/// Feature flags and settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// Override for the credential store's on-disk location; `None` uses the XDG default
/// (see `crate::credentials::default_credentials_path`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialsConfig {
    #[serde(default)]
    pub path: Option<String>,
}

/// Top-level application configuration, loaded from `config.yaml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
}

/// Load configuration from a YAML file.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails or [`ConfigError::Yaml`]
/// when parsing fails.
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let config: AppConfig = serde_yaml::from_str(&contents)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_example_config() {
        let config = load_config("config.example.yaml");
        assert!(
            config.is_ok(),
            "Failed to load example config: {:?}",
            config.err()
        );
        let config = config.unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.features.log_level, "INFO");
    }

    #[test]
    fn server_config_runtime_defaults() {
        let server = ServerConfig::default();
        assert_eq!(server.runtime_worker_threads, None);
        assert_eq!(server.runtime_max_blocking_threads, None);
        assert!(server.tcp_reuse_port_listener_count.is_none());
    }

    #[test]
    fn runtime_worker_threads_distinguishes_absent_from_null() {
        let absent: AppConfig = serde_yaml::from_str("server:\n  port: 4000\n").unwrap();
        assert_eq!(absent.server.runtime_worker_threads, None);

        let explicit_null: AppConfig =
            serde_yaml::from_str("server:\n  runtime_worker_threads: ~\n").unwrap();
        assert_eq!(explicit_null.server.runtime_worker_threads, None);

        let fixed: AppConfig =
            serde_yaml::from_str("server:\n  runtime_worker_threads: 4\n").unwrap();
        assert_eq!(fixed.server.runtime_worker_threads, Some(4));
    }

    #[test]
    fn default_app_config_has_empty_credentials_override() {
        let config = AppConfig::default();
        assert!(config.credentials.path.is_none());
    }
}
