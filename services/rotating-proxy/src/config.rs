//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! API keys are loaded from the ROTATOR_API_KEYS env var or api_keys_file,
//! never stored in the TOML directly.

use common::Secret;
use key_pool::Strategy;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Env var holding comma-separated API keys
pub const API_KEYS_ENV: &str = "ROTATOR_API_KEYS";

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub rotation: RotationConfig,
    #[serde(default)]
    pub headers: Vec<HeaderInjection>,
    #[serde(skip)]
    pub api_keys: Vec<Secret<String>>,
}

/// HTTP proxy settings
#[derive(Debug, Deserialize)]
pub struct ProxyConfig {
    pub listen_addr: SocketAddr,
    pub upstream_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Key rotation settings
#[derive(Debug, Deserialize)]
pub struct RotationConfig {
    #[serde(default)]
    pub strategy: Strategy,
    #[serde(default = "default_backoff")]
    pub backoff_secs: u64,
    /// File with comma- or newline-separated keys (alternative to ROTATOR_API_KEYS)
    #[serde(default)]
    pub api_keys_file: Option<PathBuf>,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            backoff_secs: default_backoff(),
            api_keys_file: None,
        }
    }
}

/// Header to inject into upstream requests
#[derive(Debug, Clone, Deserialize)]
pub struct HeaderInjection {
    pub name: String,
    pub value: String,
}

impl From<HeaderInjection> for backend::HeaderInjection {
    fn from(h: HeaderInjection) -> Self {
        backend::HeaderInjection {
            name: h.name,
            value: h.value,
        }
    }
}

fn default_timeout() -> u64 {
    60
}

fn default_max_connections() -> usize {
    1000
}

fn default_backoff() -> u64 {
    key_pool::DEFAULT_BACKOFF.as_secs()
}

/// Split a key list on commas and newlines, dropping blanks.
fn parse_key_list(raw: &str) -> Vec<Secret<String>> {
    raw.split([',', '\n'])
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(|k| Secret::new(k.to_owned()))
        .collect()
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// API key resolution order:
    /// 1. ROTATOR_API_KEYS env var
    /// 2. api_keys_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if !config.proxy.upstream_url.starts_with("http://")
            && !config.proxy.upstream_url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "upstream_url must start with http:// or https://, got: {}",
                config.proxy.upstream_url
            )));
        }

        if config.proxy.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if config.proxy.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        if config.rotation.backoff_secs == 0 {
            return Err(common::Error::Config(
                "backoff_secs must be greater than 0".into(),
            ));
        }

        if config.rotation.backoff_secs > key_pool::MAX_BACKOFF.as_secs() {
            return Err(common::Error::Config(format!(
                "backoff_secs must not exceed {}, got {}",
                key_pool::MAX_BACKOFF.as_secs(),
                config.rotation.backoff_secs
            )));
        }

        config.api_keys = match std::env::var(API_KEYS_ENV) {
            Ok(raw) => parse_key_list(&raw),
            Err(_) => match config.rotation.api_keys_file {
                Some(ref key_file) => {
                    let raw = std::fs::read_to_string(key_file).map_err(|e| {
                        common::Error::Config(format!(
                            "failed to read api_keys_file {}: {e}",
                            key_file.display()
                        ))
                    })?;
                    parse_key_list(&raw)
                }
                None => Vec::new(),
            },
        };

        if config.api_keys.is_empty() {
            return Err(common::Error::Config(format!(
                "no API keys configured: set {API_KEYS_ENV} or rotation.api_keys_file"
            )));
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("key-rotation-proxy.toml")
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.proxy.timeout_secs)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.rotation.backoff_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Mutex to serialize tests that mutate environment variables, preventing
    /// data races when tests run in parallel.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// SAFETY: Callers must hold ENV_MUTEX to prevent concurrent env mutation.
    unsafe fn set_env(key: &str, val: &str) {
        unsafe { std::env::set_var(key, val) };
    }

    unsafe fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) };
    }

    const PROXY_TABLE: &str = r#"
[proxy]
listen_addr = "127.0.0.1:8080"
upstream_url = "https://chat.example.org/v1"
"#;

    fn write_config(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("config.toml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn exposed(config: &Config) -> Vec<&str> {
        config.api_keys.iter().map(|k| k.expose().as_str()).collect()
    }

    #[test]
    fn test_load_valid_config_with_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            &format!(
                r#"{PROXY_TABLE}
[[headers]]
name = "x-client"
value = "rotator"
"#
            ),
        );

        unsafe { set_env(API_KEYS_ENV, "key-a,key-b") };
        let config = Config::load(&path).unwrap();
        unsafe { remove_env(API_KEYS_ENV) };

        assert_eq!(config.proxy.upstream_url, "https://chat.example.org/v1");
        assert_eq!(config.proxy.timeout_secs, 60);
        assert_eq!(config.proxy.max_connections, 1000);
        assert_eq!(config.rotation.strategy, Strategy::RoundRobin);
        assert_eq!(config.backoff(), Duration::from_secs(60));
        assert!(config.rotation.api_keys_file.is_none());
        assert_eq!(config.headers.len(), 1);
        assert_eq!(config.headers[0].name, "x-client");
        assert_eq!(exposed(&config), ["key-a", "key-b"]);
    }

    #[test]
    fn test_rotation_table_parsed() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            &format!(
                r#"{PROXY_TABLE}
[rotation]
strategy = "least_used"
backoff_secs = 15
"#
            ),
        );

        unsafe { set_env(API_KEYS_ENV, "k1") };
        let config = Config::load(&path).unwrap();
        unsafe { remove_env(API_KEYS_ENV) };

        assert_eq!(config.rotation.strategy, Strategy::LeastUsed);
        assert_eq!(config.backoff(), Duration::from_secs(15));
    }

    #[test]
    fn test_unknown_strategy_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            &format!(
                r#"{PROXY_TABLE}
[rotation]
strategy = "fastest"
"#
            ),
        );

        unsafe { set_env(API_KEYS_ENV, "k1") };
        let result = Config::load(&path);
        unsafe { remove_env(API_KEYS_ENV) };

        assert!(result.is_err(), "unknown strategy must be rejected");
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load(Path::new("/nonexistent/path/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "not valid {{{{ toml");
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_keys_from_env_trimmed_and_blank_dropped() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, PROXY_TABLE);

        unsafe { set_env(API_KEYS_ENV, " k1 , ,k2,, k3 ") };
        let config = Config::load(&path).unwrap();
        unsafe { remove_env(API_KEYS_ENV) };

        assert_eq!(exposed(&config), ["k1", "k2", "k3"]);
    }

    #[test]
    fn test_keys_from_file() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("keys");
        std::fs::write(&key_path, "file-k1\nfile-k2, file-k3\n\n").unwrap();
        let path = write_config(
            &dir,
            &format!(
                r#"{PROXY_TABLE}
[rotation]
api_keys_file = "{}"
"#,
                key_path.display()
            ),
        );

        unsafe { remove_env(API_KEYS_ENV) };
        let config = Config::load(&path).unwrap();
        assert_eq!(exposed(&config), ["file-k1", "file-k2", "file-k3"]);
    }

    #[test]
    fn test_keys_env_overrides_file() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("keys");
        std::fs::write(&key_path, "file-key").unwrap();
        let path = write_config(
            &dir,
            &format!(
                r#"{PROXY_TABLE}
[rotation]
api_keys_file = "{}"
"#,
                key_path.display()
            ),
        );

        unsafe { set_env(API_KEYS_ENV, "env-key") };
        let config = Config::load(&path).unwrap();
        unsafe { remove_env(API_KEYS_ENV) };

        assert_eq!(exposed(&config), ["env-key"]);
    }

    #[test]
    fn test_keys_env_overrides_nonexistent_file() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            &format!(
                r#"{PROXY_TABLE}
[rotation]
api_keys_file = "/nonexistent/path/keys"
"#
            ),
        );

        unsafe { set_env(API_KEYS_ENV, "env-wins") };
        let config = Config::load(&path).unwrap();
        unsafe { remove_env(API_KEYS_ENV) };

        assert_eq!(exposed(&config), ["env-wins"]);
    }

    #[test]
    fn test_keys_file_nonexistent_returns_error() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            &format!(
                r#"{PROXY_TABLE}
[rotation]
api_keys_file = "/nonexistent/path/keys"
"#
            ),
        );

        unsafe { remove_env(API_KEYS_ENV) };
        let err = Config::load(&path).unwrap_err().to_string();
        assert!(err.contains("api_keys_file"), "got: {err}");
    }

    #[test]
    fn test_no_keys_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, PROXY_TABLE);

        unsafe { remove_env(API_KEYS_ENV) };
        let err = Config::load(&path).unwrap_err().to_string();
        assert!(err.contains(API_KEYS_ENV), "got: {err}");
    }

    #[test]
    fn test_blank_env_keys_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, PROXY_TABLE);

        unsafe { set_env(API_KEYS_ENV, " , ,") };
        let result = Config::load(&path);
        unsafe { remove_env(API_KEYS_ENV) };

        assert!(result.is_err(), "key list of blanks must be rejected");
    }

    #[test]
    fn test_debug_output_redacts_keys() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, PROXY_TABLE);

        unsafe { set_env(API_KEYS_ENV, "sk-very-secret-value") };
        let config = Config::load(&path).unwrap();
        unsafe { remove_env(API_KEYS_ENV) };

        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-very-secret-value"), "got: {debug}");
    }

    #[test]
    fn test_resolve_path_cli_arg() {
        let path = Config::resolve_path(Some("/custom/path.toml"));
        assert_eq!(path, PathBuf::from("/custom/path.toml"));
    }

    #[test]
    fn test_resolve_path_env_var() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("CONFIG_PATH", "/env/path.toml") };
        let path = Config::resolve_path(None);
        assert_eq!(path, PathBuf::from("/env/path.toml"));
        unsafe { remove_env("CONFIG_PATH") };
    }

    #[test]
    fn test_resolve_path_default() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("CONFIG_PATH") };
        let path = Config::resolve_path(None);
        assert_eq!(path, PathBuf::from("key-rotation-proxy.toml"));
    }

    #[test]
    fn test_resolve_path_cli_overrides_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("CONFIG_PATH", "/env/should-lose.toml") };
        let path = Config::resolve_path(Some("/cli/wins.toml"));
        assert_eq!(
            path,
            PathBuf::from("/cli/wins.toml"),
            "CLI arg must take precedence over CONFIG_PATH env var"
        );
        unsafe { remove_env("CONFIG_PATH") };
    }

    #[test]
    fn test_invalid_upstream_url_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
[proxy]
listen_addr = "127.0.0.1:8080"
upstream_url = "chat.example.org"
"#,
        );

        unsafe { set_env(API_KEYS_ENV, "k1") };
        let result = Config::load(&path);
        unsafe { remove_env(API_KEYS_ENV) };

        let err = result.unwrap_err().to_string();
        assert!(
            err.contains("upstream_url must start with http"),
            "error message should explain the issue, got: {err}"
        );
    }

    #[test]
    fn test_zero_values_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        unsafe { set_env(API_KEYS_ENV, "k1") };

        for (extra, field) in [
            ("timeout_secs = 0", "timeout_secs"),
            ("max_connections = 0", "max_connections"),
        ] {
            let path = write_config(&dir, &format!("{PROXY_TABLE}{extra}\n"));
            let err = Config::load(&path).unwrap_err().to_string();
            assert!(err.contains(field), "{field}: got {err}");
        }

        let path = write_config(&dir, &format!("{PROXY_TABLE}\n[rotation]\nbackoff_secs = 0\n"));
        let err = Config::load(&path).unwrap_err().to_string();
        assert!(err.contains("backoff_secs"), "got {err}");

        unsafe { remove_env(API_KEYS_ENV) };
    }

    #[test]
    fn test_oversized_backoff_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        unsafe { set_env(API_KEYS_ENV, "k1") };

        let path = write_config(
            &dir,
            &format!("{PROXY_TABLE}\n[rotation]\nbackoff_secs = 9223372036854775807\n"),
        );
        let err = Config::load(&path).unwrap_err().to_string();
        assert!(err.contains("must not exceed"), "got {err}");

        let path = write_config(&dir, &format!("{PROXY_TABLE}\n[rotation]\nbackoff_secs = 86400\n"));
        let config = Config::load(&path).unwrap();
        assert_eq!(config.backoff(), key_pool::MAX_BACKOFF);

        unsafe { remove_env(API_KEYS_ENV) };
    }

    #[test]
    fn test_header_injection_converts_to_backend_rule() {
        let rule: backend::HeaderInjection = HeaderInjection {
            name: "x-client".into(),
            value: "rotator".into(),
        }
        .into();
        assert_eq!(rule.name, "x-client");
        assert_eq!(rule.value, "rotator");
    }
}
