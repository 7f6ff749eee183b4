//! Application configuration for BreachWatch.
//!
//! User config lives at `~/.breachwatch/breachwatch.toml`.
//! Environment variables override config file values, which override defaults.
//! Secrets never live in the file: each section names the env var holding its key.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{BreachWatchError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "breachwatch.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".breachwatch";

// ---------------------------------------------------------------------------
// Config structs (matching breachwatch.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Relational finding log.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Search index.
    #[serde(default)]
    pub search: SearchConfig,

    /// Breach-intelligence source.
    #[serde(default)]
    pub breach_source: BreachSourceConfig,

    /// Asset inventory.
    #[serde(default)]
    pub inventory: InventoryConfig,

    /// Retry policy for outbound calls.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Log output.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// `[database]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Local libSQL database file, used when `url` is unset.
    #[serde(default = "default_db_path")]
    pub path: String,

    /// Remote libSQL / Turso URL. Takes precedence over `path`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Name of the env var holding the remote database auth token.
    #[serde(default = "default_db_token_env")]
    pub auth_token_env: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            url: None,
            auth_token_env: default_db_token_env(),
        }
    }
}

fn default_db_path() -> String {
    "var/breachwatch.db".into()
}
fn default_db_token_env() -> String {
    "BREACHWATCH_DB_AUTH_TOKEN".into()
}

/// `[search]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Base URL of the Elasticsearch-compatible service.
    #[serde(default = "default_search_url")]
    pub url: String,

    /// Index that receives finding documents.
    #[serde(default = "default_index_name")]
    pub index: String,

    /// Optional env var holding an `ApiKey` credential for the index service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            url: default_search_url(),
            index: default_index_name(),
            api_key_env: None,
        }
    }
}

fn default_search_url() -> String {
    "http://localhost:9200".into()
}
fn default_index_name() -> String {
    "breaches".into()
}

/// `[breach_source]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreachSourceConfig {
    /// Per-identifier endpoint prefix; the identifier is appended.
    #[serde(default = "default_breach_url")]
    pub base_url: String,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_breach_key_env")]
    pub api_key_env: String,
}

impl Default for BreachSourceConfig {
    fn default() -> Self {
        Self {
            base_url: default_breach_url(),
            api_key_env: default_breach_key_env(),
        }
    }
}

fn default_breach_url() -> String {
    "https://haveibeenpwned.com/api/v3/breachedaccount/".into()
}
fn default_breach_key_env() -> String {
    "HIBP_API_KEY".into()
}

/// `[inventory]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryConfig {
    /// NetBox API root, ending in `/api/`.
    #[serde(default = "default_inventory_url")]
    pub base_url: String,

    /// Name of the env var holding the API token.
    #[serde(default = "default_inventory_key_env")]
    pub api_key_env: String,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            base_url: default_inventory_url(),
            api_key_env: default_inventory_key_env(),
        }
    }
}

fn default_inventory_url() -> String {
    "https://netbox.example.com/api/".into()
}
fn default_inventory_key_env() -> String {
    "NETBOX_API_KEY".into()
}

/// `[retry]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per outbound operation.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Fixed pause between attempts.
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_ms: default_delay_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_delay_ms() -> u64 {
    2000
}

/// `[logging]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Append logs to this file instead of stderr.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

// ---------------------------------------------------------------------------
// Environment overrides and credentials
// ---------------------------------------------------------------------------

/// Secrets resolved from the environment at start-up.
#[derive(Clone)]
pub struct Credentials {
    /// Breach-source API key.
    pub breach_api_key: String,
    /// Inventory API token.
    pub inventory_token: String,
    /// Secrets for the two finding stores.
    pub store: StoreCredentials,
}

/// Secrets needed to open the finding stores on their own.
#[derive(Clone, Default)]
pub struct StoreCredentials {
    /// Remote database auth token, only needed with `database.url`.
    pub db_auth_token: Option<String>,
    /// Search index API key, only when `search.api_key_env` is set.
    pub search_api_key: Option<String>,
}

fn redacted(value: &Option<String>) -> Option<&'static str> {
    value.as_ref().map(|_| "[REDACTED]")
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("breach_api_key", &"[REDACTED]")
            .field("inventory_token", &"[REDACTED]")
            .field("store", &self.store)
            .finish()
    }
}

impl std::fmt::Debug for StoreCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreCredentials")
            .field("db_auth_token", &redacted(&self.db_auth_token))
            .field("search_api_key", &redacted(&self.search_api_key))
            .finish()
    }
}

/// Read a required variable, failing with a message naming it.
fn require_var(var: &impl Fn(&str) -> Option<String>, name: &str) -> Result<String> {
    match var(name) {
        Some(val) if !val.is_empty() => Ok(val),
        _ => Err(BreachWatchError::config(format!(
            "credential not found. Set the {name} environment variable."
        ))),
    }
}

impl AppConfig {
    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_env_from(|name| std::env::var(name).ok());
    }

    /// Apply overrides from an arbitrary variable source.
    pub fn apply_env_from(&mut self, var: impl Fn(&str) -> Option<String>) {
        let var = |name: &str| var(name).filter(|v| !v.is_empty());

        if let Some(path) = var("BREACHWATCH_DB_PATH") {
            self.database.path = path;
        }
        if let Some(url) = var("BREACHWATCH_DB_URL") {
            self.database.url = Some(url);
        }
        if let Some(host) = var("ES_HOST") {
            self.search.url = if host.starts_with("http://") || host.starts_with("https://") {
                host
            } else {
                format!("http://{host}")
            };
        }
        if let Some(url) = var("HIBP_API_URL") {
            self.breach_source.base_url = url;
        }
        if let Some(url) = var("NETBOX_API_URL") {
            self.inventory.base_url = url;
        }
    }

    /// Resolve every credential from the process environment.
    pub fn credentials(&self) -> Result<Credentials> {
        self.credentials_from(|name| std::env::var(name).ok())
    }

    /// Resolve credentials from an arbitrary variable source.
    ///
    /// Fails if a required key is missing or empty.
    pub fn credentials_from(&self, var: impl Fn(&str) -> Option<String>) -> Result<Credentials> {
        Ok(Credentials {
            breach_api_key: require_var(&var, &self.breach_source.api_key_env)?,
            inventory_token: require_var(&var, &self.inventory.api_key_env)?,
            store: self.store_credentials_from(&var)?,
        })
    }

    /// Resolve only what the finding stores need from the process environment.
    pub fn store_credentials(&self) -> Result<StoreCredentials> {
        self.store_credentials_from(|name| std::env::var(name).ok())
    }

    /// Resolve store credentials from an arbitrary variable source.
    pub fn store_credentials_from(
        &self,
        var: impl Fn(&str) -> Option<String>,
    ) -> Result<StoreCredentials> {
        let db_auth_token = match self.database.url {
            Some(_) => Some(require_var(&var, &self.database.auth_token_env)?),
            None => None,
        };
        let search_api_key = match &self.search.api_key_env {
            Some(name) => Some(require_var(&var, name)?),
            None => None,
        };
        Ok(StoreCredentials {
            db_auth_token,
            search_api_key,
        })
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.breachwatch/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| BreachWatchError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.breachwatch/breachwatch.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk and apply environment overrides.
/// Uses defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    let mut config = if path.exists() {
        load_config_from(&path)?
    } else {
        tracing::debug!(?path, "config file not found, using defaults");
        AppConfig::default()
    };
    config.apply_env_overrides();
    Ok(config)
}

/// Load the application config from a specific file path, without env overrides.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| BreachWatchError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        BreachWatchError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| BreachWatchError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| BreachWatchError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| BreachWatchError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("HIBP_API_KEY"));
        assert!(toml_str.contains("NETBOX_API_KEY"));
        assert!(toml_str.contains("breaches"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.retry.max_attempts, 3);
        assert_eq!(parsed.retry.delay_ms, 2000);
        assert_eq!(parsed.search.index, "breaches");
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let toml_str = r#"
[search]
url = "http://es.internal:9200"

[logging]
file = "breach_monitor.log"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.search.url, "http://es.internal:9200");
        assert_eq!(config.search.index, "breaches");
        assert_eq!(config.logging.file.as_deref(), Some("breach_monitor.log"));
        assert_eq!(config.inventory.api_key_env, "NETBOX_API_KEY");
    }

    #[test]
    fn env_overrides_hosts() {
        let mut config = AppConfig::default();
        config.apply_env_from(vars(&[
            ("ES_HOST", "localhost:9201"),
            ("NETBOX_API_URL", "https://nb.local/api/"),
            ("BREACHWATCH_DB_PATH", "/tmp/bw.db"),
            ("HIBP_API_URL", ""),
        ]));
        assert_eq!(config.search.url, "http://localhost:9201");
        assert_eq!(config.inventory.base_url, "https://nb.local/api/");
        assert_eq!(config.database.path, "/tmp/bw.db");
        // empty values are ignored
        assert_eq!(
            config.breach_source.base_url,
            "https://haveibeenpwned.com/api/v3/breachedaccount/"
        );
    }

    #[test]
    fn credentials_require_both_api_keys() {
        let config = AppConfig::default();

        let err = config
            .credentials_from(vars(&[("HIBP_API_KEY", "k")]))
            .unwrap_err();
        assert!(err.to_string().contains("NETBOX_API_KEY"));

        let err = config
            .credentials_from(vars(&[("HIBP_API_KEY", ""), ("NETBOX_API_KEY", "t")]))
            .unwrap_err();
        assert!(err.to_string().contains("HIBP_API_KEY"));

        let creds = config
            .credentials_from(vars(&[("HIBP_API_KEY", "k"), ("NETBOX_API_KEY", "t")]))
            .expect("credentials");
        assert_eq!(creds.breach_api_key, "k");
        assert_eq!(creds.inventory_token, "t");
        assert!(creds.store.db_auth_token.is_none());
    }

    #[test]
    fn remote_database_needs_token() {
        let mut config = AppConfig::default();
        config.database.url = Some("libsql://breaches.turso.io".into());
        let err = config.store_credentials_from(vars(&[])).unwrap_err();
        assert!(err.to_string().contains("BREACHWATCH_DB_AUTH_TOKEN"));

        let store = config
            .store_credentials_from(vars(&[("BREACHWATCH_DB_AUTH_TOKEN", "tok")]))
            .expect("store credentials");
        assert_eq!(store.db_auth_token.as_deref(), Some("tok"));
        assert!(store.search_api_key.is_none());
    }

    #[test]
    fn credentials_debug_is_redacted() {
        let config = AppConfig::default();
        let creds = config
            .credentials_from(vars(&[("HIBP_API_KEY", "secret-1"), ("NETBOX_API_KEY", "secret-2")]))
            .unwrap();
        let printed = format!("{creds:?}");
        assert!(!printed.contains("secret-1"));
        assert!(printed.contains("REDACTED"));
    }
}
