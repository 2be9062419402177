use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::catalog::CatalogEntry;
use crate::error::{AppError, Result};
use crate::probe::{split_host_port, Credentials, TargetKind};
use crate::proxy::ProxySpec;

/// Which service clouds to probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloudSelection {
    #[default]
    All,
    Vdc,
    Rdc,
    Headless,
}

impl std::fmt::Display for CloudSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloudSelection::All => write!(f, "all"),
            CloudSelection::Vdc => write!(f, "vdc"),
            CloudSelection::Rdc => write!(f, "rdc"),
            CloudSelection::Headless => write!(f, "headless"),
        }
    }
}

impl std::str::FromStr for CloudSelection {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "all" => Ok(CloudSelection::All),
            "vdc" | "virtual" => Ok(CloudSelection::Vdc),
            "rdc" | "real" => Ok(CloudSelection::Rdc),
            "headless" => Ok(CloudSelection::Headless),
            _ => Err(AppError::Config(format!(
                "Unknown cloud: {}. Only 'all', 'vdc', 'rdc' or 'headless' are allowed",
                s
            ))),
        }
    }
}

/// Which datacenters to probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatacenterSelection {
    #[default]
    All,
    Na,
    Eu,
    East,
}

impl std::fmt::Display for DatacenterSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatacenterSelection::All => write!(f, "all"),
            DatacenterSelection::Na => write!(f, "na"),
            DatacenterSelection::Eu => write!(f, "eu"),
            DatacenterSelection::East => write!(f, "east"),
        }
    }
}

impl std::str::FromStr for DatacenterSelection {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "all" => Ok(DatacenterSelection::All),
            "na" | "us" | "us-west-1" => Ok(DatacenterSelection::Na),
            "eu" | "eu-central-1" => Ok(DatacenterSelection::Eu),
            "east" | "us-east-1" => Ok(DatacenterSelection::East),
            _ => Err(AppError::Config(format!("Unknown datacenter: {}", s))),
        }
    }
}

/// Output format for reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Human,
    Json,
    Junit,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Human => write!(f, "human"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Junit => write!(f, "junit"),
        }
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "human" | "text" | "console" => Ok(OutputFormat::Human),
            "json" => Ok(OutputFormat::Json),
            "junit" | "xml" => Ok(OutputFormat::Junit),
            _ => Err(AppError::Config(format!("Unknown output format: {}", s))),
        }
    }
}

pub const DEFAULT_PREFLIGHT_URL: &str = "https://www.saucelabs.com";

/// Global configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Known-good URL checked before the main run
    #[serde(default = "default_preflight_url")]
    pub preflight_url: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// Accept any certificate when going through a proxy (intercepting proxies)
    #[serde(default = "default_true")]
    pub insecure_proxy_tls: bool,
    /// Number of probes in flight at once; 1 probes strictly in order
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub output_format: OutputFormat,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            preflight_url: default_preflight_url(),
            connect_timeout_seconds: default_connect_timeout(),
            request_timeout_seconds: default_request_timeout(),
            insecure_proxy_tls: true,
            concurrency: default_concurrency(),
            output_format: OutputFormat::Human,
        }
    }
}

fn default_preflight_url() -> String {
    DEFAULT_PREFLIGHT_URL.to_string()
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_request_timeout() -> u64 {
    30
}

fn default_concurrency() -> usize {
    1
}

fn default_true() -> bool {
    true
}

/// Proxy configuration; `--proxy` takes precedence
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProxyConfig {
    pub url: Option<String>,
}

/// Identity and access key for one REST API
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CredentialProfile {
    pub username: Option<String>,
    pub access_key: Option<String>,
}

impl CredentialProfile {
    /// Credentials usable for a probe; requires at least a username.
    pub fn credentials(&self) -> Option<Credentials> {
        let username = self.username.as_deref().filter(|u| !u.trim().is_empty())?;
        Some(Credentials::new(
            username,
            self.access_key.clone().unwrap_or_default(),
        ))
    }
}

/// Environment variables feeding each credential profile: (profile, username var, key var)
pub const CREDENTIAL_ENV: &[(&str, &str, &str)] = &[
    ("sauce", "SAUCE_USERNAME", "SAUCE_ACCESS_KEY"),
    ("headless", "SAUCE_USERNAME", "HEADLESS_ACCESS_KEY"),
    ("rdc", "RDC_USERNAME", "RDC_ACCESS_KEY"),
];

/// Complete application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub credentials: BTreeMap<String, CredentialProfile>,
    /// Replaces the built-in endpoint catalog when non-empty
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub catalog: Vec<CatalogEntry>,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AppError::FileNotFound(path.display().to_string())
            } else {
                AppError::Io(e)
            }
        })?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        let credentials = CREDENTIAL_ENV
            .iter()
            .map(|(profile, _, _)| (profile.to_string(), CredentialProfile::default()))
            .collect();

        Config {
            global: GlobalConfig::default(),
            proxy: ProxyConfig::default(),
            credentials,
            catalog: Vec::new(),
        }
    }

    /// Serialize configuration to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| AppError::Config(e.to_string()))
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    /// Apply overrides from any variable source.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        for (profile, user_var, key_var) in CREDENTIAL_ENV {
            let username = lookup(user_var).filter(|v| !v.is_empty());
            let access_key = lookup(key_var).filter(|v| !v.is_empty());
            if username.is_none() && access_key.is_none() {
                continue;
            }

            let entry = self.credentials.entry(profile.to_string()).or_default();
            if username.is_some() {
                entry.username = username;
            }
            if access_key.is_some() {
                entry.access_key = access_key;
            }
        }

        if let Some(url) = lookup("NETHELP_PREFLIGHT_URL").filter(|v| !v.is_empty()) {
            self.global.preflight_url = url;
        }
    }

    /// Credentials for a named profile, when a username is known.
    pub fn profile_credentials(&self, profile: &str) -> Option<Credentials> {
        self.credentials.get(profile).and_then(|p| p.credentials())
    }
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<Vec<String>> {
    let mut warnings = Vec::new();

    if url::Url::parse(&config.global.preflight_url).is_err() {
        warnings.push(format!(
            "preflight_url '{}' is not a valid URL",
            config.global.preflight_url
        ));
    }

    if config.global.connect_timeout_seconds == 0 {
        warnings.push("connect_timeout_seconds is 0; every connection will time out".to_string());
    }

    if config.global.concurrency == 0 {
        warnings.push("concurrency is 0; probes will run one at a time".to_string());
    }

    if let Some(proxy) = &config.proxy.url {
        if let Err(e) = ProxySpec::parse(proxy) {
            warnings.push(e.to_string());
        }
    }

    for (name, profile) in &config.credentials {
        if profile.username.is_none() {
            warnings.push(format!(
                "Credential profile '{}' has no username; its REST endpoints will be skipped",
                name
            ));
        } else if profile.access_key.is_none() {
            warnings.push(format!(
                "Credential profile '{}' has no access key; REST endpoints will report unauthenticated",
                name
            ));
        }
    }

    for entry in &config.catalog {
        if entry.kind == TargetKind::HttpGetAuthenticated && entry.credentials.is_none() {
            warnings.push(format!(
                "Catalog entry {}/{} is authenticated but names no credential profile",
                entry.cloud, entry.datacenter
            ));
        }
        if let Some(profile) = &entry.credentials {
            if !config.credentials.contains_key(profile) {
                warnings.push(format!(
                    "Catalog entry {}/{} uses unknown credential profile '{}'",
                    entry.cloud, entry.datacenter, profile
                ));
            }
        }
        if entry.kind == TargetKind::TcpDial {
            for address in &entry.addresses {
                if let Err(e) = split_host_port(address) {
                    warnings.push(format!(
                        "Catalog entry {}/{}: {}",
                        entry.cloud, entry.datacenter, e
                    ));
                }
            }
        }
    }

    Ok(warnings)
}
