//! Configuration types for the LDAP to Vault bridge.
//!
//! Configuration is loaded from YAML files and validated before use.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::error::{ConfigError, ConfigResult};

/// Root configuration for the bridge.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BridgeConfig {
    /// LDAP listener configuration.
    #[serde(default)]
    pub listen: ListenConfig,

    /// Secret store connection configuration.
    pub vault: VaultConfig,

    /// Application (first phase) authentication settings.
    #[serde(default)]
    pub authentication: AuthenticationConfig,

    /// Where and how end-user credential records are looked up.
    #[serde(default)]
    pub users: UserLookupConfig,

    /// Prometheus metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// LDAP listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenConfig {
    /// Address to bind to, e.g., "0.0.0.0:10389".
    #[serde(default = "default_listen_address")]
    pub address: String,

    /// Maximum number of concurrent client connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Secret store (Vault) connection configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VaultConfig {
    /// Base URL of the Vault server, e.g. "https://vault.example.com:8200".
    pub address: String,

    /// Static token used before (or instead of) application login.
    ///
    /// Supports environment variable expansion: "${VAULT_TOKEN}".
    /// Needed for user record reads when `authenticate_apps` is disabled.
    #[serde(default)]
    pub token: Option<String>,

    /// Vault Enterprise namespace.
    #[serde(default)]
    pub namespace: Option<String>,

    /// Per-request timeout in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Verify the server certificate on https connections.
    #[serde(default = "default_verify_tls")]
    pub verify_tls: bool,
}

impl VaultConfig {
    /// Get the static token with environment variables expanded.
    ///
    /// An empty expansion counts as no token.
    #[must_use]
    pub fn token(&self) -> Option<String> {
        self.token
            .as_deref()
            .map(expand_env_vars)
            .filter(|token| !token.is_empty())
    }

    /// Request timeout as a `Duration`.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// How an application proves its identity on the first bind of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AppAuthMethod {
    /// AppRole login: bind DN carries the role ID, bind password the secret ID.
    #[default]
    #[serde(rename = "approle")]
    AppRole,
    /// Userpass login: bind DN carries the username, bind password the password.
    Userpass,
}

impl AppAuthMethod {
    /// Default Vault auth mount for this method.
    #[must_use]
    pub fn default_mount(&self) -> &'static str {
        match self {
            Self::AppRole => "approle",
            Self::Userpass => "userpass",
        }
    }
}

/// Application authentication settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthenticationConfig {
    /// Require an application bind before any end-user bind.
    ///
    /// When disabled, connections start out as application-authenticated.
    #[serde(default = "default_authenticate_apps")]
    pub authenticate_apps: bool,

    /// Login method used for the application bind.
    #[serde(default)]
    pub app_method: AppAuthMethod,

    /// Auth mount path; defaults to the method's conventional mount.
    #[serde(default)]
    pub app_mount: Option<String>,
}

impl AuthenticationConfig {
    /// Auth mount used for application logins.
    #[must_use]
    pub fn app_mount(&self) -> &str {
        self.app_mount
            .as_deref()
            .unwrap_or_else(|| self.app_method.default_mount())
    }
}

/// How the bind DN of an end user is turned into a record location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UserLookupMode {
    /// `users_path/<identity>` where identity is the first RDN value.
    #[default]
    Flat,
    /// `users_path/<path>` where path is every RDN value, root-most first.
    Hierarchical,
}

/// End-user credential record lookup.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UserLookupConfig {
    /// Flat username or hierarchical DN path.
    #[serde(default)]
    pub lookup: UserLookupMode,

    /// KV secrets engine mount.
    #[serde(default = "default_kv_mount")]
    pub kv_mount: String,

    /// KV secrets engine version (1 or 2).
    #[serde(default = "default_kv_version")]
    pub kv_version: u8,

    /// Prefix prepended to every record path. May be empty.
    #[serde(default = "default_users_path")]
    pub users_path: String,

    /// Record field holding the stored password.
    #[serde(default = "default_password_field")]
    pub password_field: String,
}

impl UserLookupConfig {
    /// Resolve the record path for a lookup key produced from the bind DN.
    ///
    /// Returns `None` for keys that could address a record outside
    /// `users_path`: empty, `.` or `..` segments, and characters that change
    /// the meaning of a URL path.
    #[must_use]
    pub fn record_path(&self, key: &str) -> Option<String> {
        let key = key.trim_matches('/');
        let safe = !key.is_empty()
            && key
                .split('/')
                .all(|segment| !matches!(segment, "" | "." | ".."))
            && !key
                .chars()
                .any(|c| matches!(c, '?' | '#' | '%' | '\\') || c.is_control());
        if !safe {
            return None;
        }

        let prefix = self.users_path.trim_matches('/');
        if prefix.is_empty() {
            Some(key.to_string())
        } else {
            Some(format!("{prefix}/{key}"))
        }
    }
}

/// Prometheus metrics configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    /// Whether to enable the metrics endpoint.
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,

    /// Address for the metrics HTTP server.
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output logs in JSON format (for production).
    #[serde(default)]
    pub json: bool,
}

/// Expand environment variables in a string.
///
/// Replaces `${VAR_NAME}` with the value of the environment variable `VAR_NAME`.
/// If the variable is not set, replaces with an empty string.
fn expand_env_vars(s: &str) -> String {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid regex");
    re.replace_all(s, |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_default()
    })
    .to_string()
}

// Default value functions

fn default_listen_address() -> String {
    "0.0.0.0:10389".to_string()
}

fn default_max_connections() -> usize {
    1000
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_verify_tls() -> bool {
    true
}

fn default_authenticate_apps() -> bool {
    true
}

fn default_kv_mount() -> String {
    "secret".to_string()
}

fn default_kv_version() -> u8 {
    1
}

fn default_users_path() -> String {
    "users".to_string()
}

fn default_password_field() -> String {
    "password".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_address() -> String {
    "0.0.0.0:9090".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

// Default implementations

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            address: default_listen_address(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for AuthenticationConfig {
    fn default() -> Self {
        Self {
            authenticate_apps: default_authenticate_apps(),
            app_method: AppAuthMethod::default(),
            app_mount: None,
        }
    }
}

impl Default for UserLookupConfig {
    fn default() -> Self {
        Self {
            lookup: UserLookupMode::default(),
            kv_mount: default_kv_mount(),
            kv_version: default_kv_version(),
            users_path: default_users_path(),
            password_field: default_password_field(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            address: default_metrics_address(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Configuration loading and validation

impl BridgeConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if
    /// validation fails.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            path: path.display().to_string(),
            source: e,
        })?;

        Self::from_str(&content)
    }

    /// Load configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if parsing or validation fails.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> ConfigResult<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any validation check fails.
    pub fn validate(&self) -> ConfigResult<()> {
        parse_socket_addr(&self.listen.address)?;
        if self.metrics.enabled {
            parse_socket_addr(&self.metrics.address)?;
        }
        self.vault.validate()?;
        self.users.validate()
    }
}

impl VaultConfig {
    /// Validate the secret store settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is not an http(s) URL with a host.
    pub fn validate(&self) -> ConfigResult<()> {
        self.parsed_address()
            .map(|_| ())
            .ok_or_else(|| ConfigError::InvalidVaultAddress(self.address.clone()))
    }

    /// The address as a URL, if it is a usable http(s) URL.
    #[must_use]
    pub fn parsed_address(&self) -> Option<Url> {
        let url = Url::parse(self.address.trim()).ok()?;
        let usable = matches!(url.scheme(), "http" | "https")
            && url.host_str().is_some_and(|host| !host.is_empty());
        usable.then_some(url)
    }
}

impl UserLookupConfig {
    /// Validate the lookup settings.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `kv_version` is neither 1 nor 2
    /// - `kv_mount` is empty
    /// - `password_field` is empty
    pub fn validate(&self) -> ConfigResult<()> {
        if !matches!(self.kv_version, 1 | 2) {
            return Err(ConfigError::UnsupportedKvVersion(self.kv_version));
        }
        if self.kv_mount.trim_matches('/').is_empty() {
            return Err(ConfigError::EmptyValue("users.kv_mount"));
        }
        if self.password_field.is_empty() {
            return Err(ConfigError::EmptyValue("users.password_field"));
        }
        Ok(())
    }
}

fn parse_socket_addr(address: &str) -> ConfigResult<SocketAddr> {
    address
        .parse()
        .map_err(|_| ConfigError::InvalidAddress(address.to_string()))
}
