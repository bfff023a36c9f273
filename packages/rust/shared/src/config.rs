//! Application configuration for TaxDesk.
//!
//! User config lives at `~/.taxdesk/taxdesk.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TaxDeskError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "taxdesk.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".taxdesk";

/// Upper bound on partitions searched for a single question.
pub const MAX_PARTITIONS_PER_QUERY: usize = 3;

/// Default retrieval budget in milliseconds.
pub const DEFAULT_RETRIEVAL_TIMEOUT_MS: u64 = 60_000;

// ---------------------------------------------------------------------------
// Config structs (matching taxdesk.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Catalog file locations.
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// Retrieval budget.
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// OpenRouter settings.
    #[serde(default)]
    pub openrouter: OpenRouterConfig,

    /// Local database.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Portal fetch policy.
    #[serde(default)]
    pub fetch: FetchConfig,
}

/// `[catalog]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default = "default_portals_path")]
    pub portals_path: String,

    #[serde(default = "default_partitions_path")]
    pub partitions_path: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            portals_path: default_portals_path(),
            partitions_path: default_partitions_path(),
        }
    }
}

fn default_portals_path() -> String {
    "catalog/portals.toml".into()
}
fn default_partitions_path() -> String {
    "catalog/partitions.toml".into()
}

/// `[retrieval]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Wall-clock budget for one question, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum partitions searched per question.
    #[serde(default = "default_max_partitions")]
    pub max_partitions: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_partitions: default_max_partitions(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    DEFAULT_RETRIEVAL_TIMEOUT_MS
}
fn default_max_partitions() -> usize {
    MAX_PARTITIONS_PER_QUERY
}

/// `[openrouter]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenRouterConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Model used for document classification.
    #[serde(default = "default_model")]
    pub default_model: String,

    /// API base URL.
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            default_model: default_model(),
            base_url: default_base_url(),
        }
    }
}

fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_model() -> String {
    "openai/gpt-4o-mini".into()
}
fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "var/taxdesk.db".into()
}

/// `[fetch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Per-request timeout in seconds.
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,

    /// Hosts portal pages may be fetched from. Empty allows every public host.
    #[serde(default = "default_allowed_domains")]
    pub allowed_domains: Vec<AllowedDomain>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout(),
            allowed_domains: default_allowed_domains(),
        }
    }
}

fn default_fetch_timeout() -> u64 {
    30
}
fn default_allowed_domains() -> Vec<AllowedDomain> {
    vec![AllowedDomain {
        pattern: "*.gov.br".into(),
        path_allowlist: Vec::new(),
    }]
}

/// `[[fetch.allowed_domains]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowedDomain {
    /// Exact host, or `*.suffix` for any sub-domain.
    pub pattern: String,

    /// Path prefixes allowed on this host. Empty allows every path.
    #[serde(default)]
    pub path_allowlist: Vec<String>,
}

// ---------------------------------------------------------------------------
// Retrieval options (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime retrieval options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrievalOptions {
    pub timeout: Duration,
    pub max_partitions: usize,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_RETRIEVAL_TIMEOUT_MS),
            max_partitions: MAX_PARTITIONS_PER_QUERY,
        }
    }
}

impl From<&AppConfig> for RetrievalOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.retrieval.timeout_ms),
            max_partitions: config.retrieval.max_partitions,
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.taxdesk/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| TaxDeskError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.taxdesk/taxdesk.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| TaxDeskError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| TaxDeskError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| TaxDeskError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| TaxDeskError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| TaxDeskError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check that the OpenRouter API key env var is set and non-empty.
pub fn validate_api_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.openrouter.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(TaxDeskError::config(format!(
            "OpenRouter API key not found. Set the {var_name} environment variable.\n\
             Get a key at https://openrouter.ai/keys"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("partitions_path"));
        assert!(toml_str.contains("OPENROUTER_API_KEY"));
        assert!(toml_str.contains("*.gov.br"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.retrieval.timeout_ms, 60_000);
        assert_eq!(parsed.retrieval.max_partitions, 3);
        assert_eq!(parsed.openrouter.default_model, "openai/gpt-4o-mini");
    }

    #[test]
    fn config_with_allowed_domains() {
        let toml_str = r#"
[retrieval]
timeout_ms = 1500

[[fetch.allowed_domains]]
pattern = "www.nfe.fazenda.gov.br"
path_allowlist = ["/portal"]

[[fetch.allowed_domains]]
pattern = "*.confaz.fazenda.gov.br"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.retrieval.timeout_ms, 1500);
        assert_eq!(config.retrieval.max_partitions, 3);
        assert_eq!(config.fetch.allowed_domains.len(), 2);
        assert_eq!(config.fetch.allowed_domains[0].path_allowlist, vec!["/portal"]);
        assert!(config.fetch.allowed_domains[1].path_allowlist.is_empty());
        assert_eq!(config.storage.db_path, "var/taxdesk.db");
    }

    #[test]
    fn retrieval_options_from_app_config() {
        let mut app = AppConfig::default();
        app.retrieval.timeout_ms = 250;
        let options = RetrievalOptions::from(&app);
        assert_eq!(options.timeout, Duration::from_millis(250));
        assert_eq!(options.max_partitions, 3);
    }

    #[test]
    fn api_key_validation() {
        let mut config = AppConfig::default();
        config.openrouter.api_key_env = "TAXDESK_TEST_NONEXISTENT_KEY_12345".into();
        let result = validate_api_key(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API key not found"));
    }
}
