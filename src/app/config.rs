use anyhow::{Context, Result};
use directories::ProjectDirs;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::constants::{
    CONNECT_TIMEOUT_MS, DEFAULT_ADMIN_URL, DEFAULT_BACKUPS_ROOT, DEFAULT_ENV_FILES,
    DEFAULT_GATEWAY_URL, DEFAULT_SHARED_NETWORK, DNS_TIMEOUT_MS, HTTP_REQUEST_TIMEOUT_MS,
    OBSERVER_RETRIES, OBSERVER_RETRY_DELAY_MS, PROVIDER_AUTH_PLUGIN,
};
use crate::network::ServicePath;

const LOCAL_CONFIG_FILE: &str = "gateway-doctor.toml";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Admin API connection
    #[serde(default)]
    pub admin: AdminConfig,

    /// Data plane and plugin naming
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Timeouts and the observation retry budget
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Snapshot storage
    #[serde(default)]
    pub snapshot: SnapshotConfig,

    /// Container runtime
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// The configuration the live gateway is diffed against
    #[serde(default)]
    pub desired: DesiredConfig,
}

/// Admin API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    pub url: String,
    /// Shared secret sent on every admin request
    pub api_key: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_ADMIN_URL.to_string(),
            api_key: String::new(),
        }
    }
}

/// Gateway data plane configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub url: String,
    /// Plugins that authenticate against the provider natively
    pub provider_auth_plugins: Vec<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_GATEWAY_URL.to_string(),
            provider_auth_plugins: vec![PROVIDER_AUTH_PLUGIN.to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    pub http_ms: u64,
    pub dns_ms: u64,
    pub connect_ms: u64,
    /// Extra attempts after the first one, observation only
    pub retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            http_ms: HTTP_REQUEST_TIMEOUT_MS,
            dns_ms: DNS_TIMEOUT_MS,
            connect_ms: CONNECT_TIMEOUT_MS,
            retries: OBSERVER_RETRIES,
            retry_delay_ms: OBSERVER_RETRY_DELAY_MS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    pub backups_root: PathBuf,
    /// Environment files copied into every snapshot
    pub env_files: Vec<PathBuf>,
    /// Capture a snapshot before any remediation
    pub capture_before_fix: bool,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            backups_root: PathBuf::from(DEFAULT_BACKUPS_ROOT),
            env_files: DEFAULT_ENV_FILES.iter().map(PathBuf::from).collect(),
            capture_before_fix: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RuntimeConfig {
    /// `docker` or `podman`; detected when unset
    pub binary: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DesiredConfig {
    /// Canonical consumer secret
    #[serde(default)]
    pub shared_secret: String,
    /// Expected upstream TLS verification when a provider does not say
    #[serde(default)]
    pub ssl_verify_default: Option<bool>,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    /// Consumer usernames that must exist
    #[serde(default)]
    pub consumers: Vec<String>,
    #[serde(default)]
    pub network: NetworkConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub route_id: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub token: Option<String>,
    /// Environment variable containing the bearer token
    #[serde(default)]
    pub token_env: Option<String>,
    #[serde(default)]
    pub ssl_verify: Option<bool>,
    #[serde(default)]
    pub probe: Option<ProbeConfig>,
}

/// Synthetic request sent through the gateway to a provider route
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    #[serde(default = "default_probe_method")]
    pub method: String,
    /// Defaults to the route URI without its trailing wildcard
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub payload: Value,
}

fn default_probe_method() -> String {
    "POST".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub shared_network: String,
    pub paths: Vec<ServicePath>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            shared_network: DEFAULT_SHARED_NETWORK.to_string(),
            paths: Vec::new(),
        }
    }
}

/// Load configuration from multiple sources
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let mut figment = Figment::from(Serialized::defaults(Config::default()));

    // Global config if it exists
    if let Ok(config_dir) = get_config_dir() {
        let global_config = config_dir.join("config.toml");
        if global_config.exists() {
            figment = figment.merge(Toml::file(&global_config));
        }
    }

    // Local config if it exists
    let local_config = PathBuf::from(LOCAL_CONFIG_FILE);
    if local_config.exists() {
        figment = figment.merge(Toml::file(&local_config));
    }

    if let Some(path) = explicit {
        if !path.exists() {
            anyhow::bail!("Config file {} does not exist", path.display());
        }
        figment = figment.merge(Toml::file(path));
    }

    // GWDOCTOR_ADMIN__API_KEY=... style overrides
    figment = figment.merge(Env::prefixed("GWDOCTOR_").split("__"));

    figment
        .extract()
        .context("Failed to load configuration")
}

/// Get the configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    if let Some(proj_dirs) = ProjectDirs::from("", "", "gateway-doctor") {
        Ok(proj_dirs.config_dir().to_path_buf())
    } else {
        // Fallback to home directory
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .context("Could not determine home directory")?;
        Ok(PathBuf::from(home).join(".config").join("gateway-doctor"))
    }
}

/// Save configuration to file
pub fn save_config(config: &Config, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_string = toml::to_string_pretty(config)?;
    std::fs::write(path, toml_string)
        .with_context(|| format!("Failed to write config to {}", path.display()))?;

    Ok(())
}

/// Create a default local configuration file if it doesn't exist
pub fn init_config() -> Result<PathBuf> {
    let path = PathBuf::from(LOCAL_CONFIG_FILE);
    if !path.exists() {
        save_config(&Config::default(), &path)?;
    }
    Ok(path)
}
