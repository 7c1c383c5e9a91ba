// crates/agent-relay-config/src/config.rs
// ============================================================================
// Module: Agent Relay Configuration
// Description: Configuration loading and validation for the relay.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: serde, toml, url, thiserror
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with a size cap, then overlaid
//! with a fixed, enumerated set of environment variables so deployment
//! secrets stay out of the file. Missing or invalid configuration fails
//! closed. Two flags deserve attention: `auth.require_auth` gates the whole
//! authentication layer and defaults to off only for local testing, and
//! `auth.allow_any_authenticated` weakens per-agent role gating and ships
//! disabled.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;
use url::Url;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "agent-relay.toml";
/// Environment variable used to override the config path.
pub const CONFIG_ENV_VAR: &str = "AGENT_RELAY_CONFIG";
/// Maximum configuration file size in bytes.
pub(crate) const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of the confidential client secret.
pub(crate) const MAX_CLIENT_SECRET_LENGTH: usize = 512;
/// Minimum downstream request timeout in milliseconds.
pub(crate) const MIN_REQUEST_TIMEOUT_MS: u64 = 500;
/// Maximum downstream request timeout in milliseconds.
pub(crate) const MAX_REQUEST_TIMEOUT_MS: u64 = 120_000;
/// Default downstream request timeout in milliseconds.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
/// Minimum health probe timeout in milliseconds.
pub(crate) const MIN_HEALTH_TIMEOUT_MS: u64 = 100;
/// Maximum health probe timeout in milliseconds.
pub(crate) const MAX_HEALTH_TIMEOUT_MS: u64 = 30_000;
/// Default health probe timeout in milliseconds.
pub const DEFAULT_HEALTH_TIMEOUT_MS: u64 = 5_000;
/// Minimum oracle timeout in milliseconds.
pub(crate) const MIN_ORACLE_TIMEOUT_MS: u64 = 100;
/// Maximum oracle timeout in milliseconds.
pub(crate) const MAX_ORACLE_TIMEOUT_MS: u64 = 60_000;
/// Default oracle timeout in milliseconds.
pub const DEFAULT_ORACLE_TIMEOUT_MS: u64 = 10_000;
/// Default session map capacity.
pub const DEFAULT_SESSION_CAPACITY: usize = 1_024;
/// Maximum session map capacity.
pub(crate) const MAX_SESSION_CAPACITY: usize = 1_048_576;
/// Default session entry time-to-live in seconds.
pub const DEFAULT_SESSION_TTL_SECONDS: u64 = 3_600;
/// Maximum session entry time-to-live in seconds.
pub(crate) const MAX_SESSION_TTL_SECONDS: u64 = 86_400 * 30;
/// Token signature algorithms accepted by the validator configuration.
pub(crate) const SUPPORTED_ALGORITHMS: &[&str] =
    &["RS256", "RS384", "RS512", "ES256", "ES384", "HS256"];

/// Environment override for the confidential client identifier.
pub const ENV_CLIENT_ID: &str = "AGENT_RELAY_CLIENT_ID";
/// Environment override for the confidential client secret.
pub const ENV_CLIENT_SECRET: &str = "AGENT_RELAY_CLIENT_SECRET";
/// Environment override for the identity provider authority URL.
pub const ENV_AUTHORITY: &str = "AGENT_RELAY_AUTHORITY";
/// Environment override for the expected token audience.
pub const ENV_AUDIENCE: &str = "AGENT_RELAY_AUDIENCE";
/// Environment override for the expected token issuer.
pub const ENV_ISSUER: &str = "AGENT_RELAY_ISSUER";
/// Environment override for the require-authentication flag.
pub const ENV_REQUIRE_AUTH: &str = "AGENT_RELAY_REQUIRE_AUTH";
/// Environment override for the any-authenticated fallback flag.
pub const ENV_ALLOW_ANY_AUTHENTICATED: &str = "AGENT_RELAY_ALLOW_ANY_AUTHENTICATED";
/// Environment override for the Python agent base URL.
pub const ENV_PYTHON_AGENT_URL: &str = "AGENT_RELAY_PYTHON_AGENT_URL";
/// Environment override for the payroll agent base URL.
pub const ENV_DOTNET_AGENT_URL: &str = "AGENT_RELAY_DOTNET_AGENT_URL";

// ============================================================================
// SECTION: Configuration Types
// ============================================================================

/// Top-level relay configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RelayConfig {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Identity provider and confidential client configuration.
    #[serde(default)]
    pub identity: IdentityConfig,
    /// Authentication and authorization toggles.
    #[serde(default)]
    pub auth: AuthConfig,
    /// Downstream agent endpoints.
    #[serde(default)]
    pub agents: AgentsConfig,
    /// Routing oracle configuration.
    #[serde(default)]
    pub routing: RoutingConfig,
    /// Outbound timeout configuration.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Conversation session map bounds.
    #[serde(default)]
    pub session: SessionConfig,
    /// Audit sink configuration.
    #[serde(default)]
    pub audit: AuditConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Socket address the relay binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

/// Identity provider and confidential client registration.
///
/// # Invariants
/// - All fields must be present when `auth.require_auth` is enabled.
/// - The secret never appears in audit events or status payloads.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    /// Identity provider authority URL (tenant/issuer root).
    #[serde(default)]
    pub authority: String,
    /// Expected `aud` claim for inbound tokens.
    #[serde(default)]
    pub audience: String,
    /// Expected `iss` claim for inbound tokens.
    #[serde(default)]
    pub issuer: String,
    /// Token signature algorithm.
    #[serde(default = "default_algorithm")]
    pub algorithm: String,
    /// Confidential client identifier for delegated exchange.
    #[serde(default)]
    pub client_id: String,
    /// Confidential client secret for delegated exchange.
    #[serde(default)]
    pub client_secret: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            authority: String::new(),
            audience: String::new(),
            issuer: String::new(),
            algorithm: default_algorithm(),
            client_id: String::new(),
            client_secret: String::new(),
        }
    }
}

/// Authentication and authorization toggles.
#[derive(Debug, Clone, Copy, Deserialize, Default)]
pub struct AuthConfig {
    /// Require and validate inbound bearer credentials.
    ///
    /// When disabled the relay substitutes a fixed synthetic test identity;
    /// never enable that mode in a deployed configuration.
    #[serde(default)]
    pub require_auth: bool,
    /// Grant agent access to authenticated callers with no recognized role.
    ///
    /// This weakens per-agent role gating to advisory and ships disabled.
    #[serde(default)]
    pub allow_any_authenticated: bool,
}

/// Downstream agent endpoint set.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentsConfig {
    /// General-purpose Python specialist endpoint.
    #[serde(default = "default_python_endpoint")]
    pub python: AgentEndpointConfig,
    /// Payroll specialist endpoint.
    #[serde(default = "default_dotnet_endpoint")]
    pub dotnet: AgentEndpointConfig,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            python: default_python_endpoint(),
            dotnet: default_dotnet_endpoint(),
        }
    }
}

/// One downstream agent endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentEndpointConfig {
    /// Base URL of the agent service.
    pub base_url: String,
    /// Scopes requested during delegated exchange for this agent.
    #[serde(default)]
    pub scopes: Vec<String>,
}

/// Routing oracle configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RoutingConfig {
    /// Consult the external routing oracle before keyword scoring.
    #[serde(default)]
    pub oracle_enabled: bool,
    /// Oracle command line (program followed by arguments).
    #[serde(default)]
    pub oracle_command: Vec<String>,
    /// Oracle invocation timeout in milliseconds.
    #[serde(default = "default_oracle_timeout_ms")]
    pub oracle_timeout_ms: u64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            oracle_enabled: false,
            oracle_command: Vec::new(),
            oracle_timeout_ms: default_oracle_timeout_ms(),
        }
    }
}

/// Outbound timeout configuration.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct TimeoutConfig {
    /// Downstream agent request timeout in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Agent health probe timeout in milliseconds.
    #[serde(default = "default_health_timeout_ms")]
    pub health_timeout_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            health_timeout_ms: default_health_timeout_ms(),
        }
    }
}

/// Conversation session map bounds.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SessionConfig {
    /// Maximum tracked conversations before least-recently-used eviction.
    #[serde(default = "default_session_capacity")]
    pub capacity: usize,
    /// Session entry time-to-live in seconds.
    #[serde(default = "default_session_ttl_seconds")]
    pub ttl_seconds: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            capacity: default_session_capacity(),
            ttl_seconds: default_session_ttl_seconds(),
        }
    }
}

/// Audit sink selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditSinkKind {
    /// JSON lines on stderr.
    Stderr,
    /// JSON lines appended to a file.
    File,
    /// Discard events (tests only).
    Noop,
}

/// Audit sink configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    /// Selected sink.
    #[serde(default = "default_audit_sink")]
    pub sink: AuditSinkKind,
    /// Log file path when the file sink is selected.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            sink: default_audit_sink(),
            path: None,
        }
    }
}

// ============================================================================
// SECTION: Defaults
// ============================================================================

/// Default relay bind address.
fn default_bind_addr() -> String {
    "127.0.0.1:8081".to_string()
}

/// Default token signature algorithm.
fn default_algorithm() -> String {
    "RS256".to_string()
}

/// Default Python agent endpoint.
fn default_python_endpoint() -> AgentEndpointConfig {
    AgentEndpointConfig {
        base_url: "http://localhost:8000".to_string(),
        scopes: vec!["api://python-agent/.default".to_string()],
    }
}

/// Default payroll agent endpoint.
fn default_dotnet_endpoint() -> AgentEndpointConfig {
    AgentEndpointConfig {
        base_url: "http://localhost:5000".to_string(),
        scopes: vec!["api://dotnet-agent/.default".to_string()],
    }
}

/// Default oracle timeout in milliseconds.
const fn default_oracle_timeout_ms() -> u64 {
    DEFAULT_ORACLE_TIMEOUT_MS
}

/// Default downstream request timeout in milliseconds.
const fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

/// Default health probe timeout in milliseconds.
const fn default_health_timeout_ms() -> u64 {
    DEFAULT_HEALTH_TIMEOUT_MS
}

/// Default session map capacity.
const fn default_session_capacity() -> usize {
    DEFAULT_SESSION_CAPACITY
}

/// Default session entry time-to-live in seconds.
const fn default_session_ttl_seconds() -> u64 {
    DEFAULT_SESSION_TTL_SECONDS
}

/// Default audit sink.
const fn default_audit_sink() -> AuditSinkKind {
    AuditSinkKind::Stderr
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("config file {path} could not be read: {reason}")]
    Io {
        /// Path that failed to load.
        path: PathBuf,
        /// Underlying reason.
        reason: String,
    },
    /// The config file exceeds the size cap.
    #[error("config file {path} exceeds {limit} bytes")]
    TooLarge {
        /// Path that failed to load.
        path: PathBuf,
        /// Size limit in bytes.
        limit: usize,
    },
    /// The config file is not valid TOML.
    #[error("config parse error: {0}")]
    Parse(String),
    /// A field failed validation.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Loading
// ============================================================================

impl RelayConfig {
    /// Loads configuration from the given path, the `AGENT_RELAY_CONFIG`
    /// environment variable, or `./agent-relay.toml`, in that order. A
    /// missing file yields built-in defaults so local testing works out of
    /// the box; environment overrides are applied either way.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when an explicitly named file cannot be read,
    /// the file fails to parse, or validation rejects a field.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let env_path = env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from);
        let resolved = path
            .map(Path::to_path_buf)
            .or(env_path)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_NAME));
        let explicit = path.is_some() || env::var(CONFIG_ENV_VAR).is_ok();

        let mut config = if resolved.exists() {
            Self::from_file(&resolved)?
        } else if explicit {
            return Err(ConfigError::Io {
                path: resolved,
                reason: "file not found".to_string(),
            });
        } else {
            Self::default()
        };
        config.apply_env_overrides(|name| env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Loads and parses a config file without applying overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let metadata = fs::metadata(path).map_err(|err| ConfigError::Io {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
        if metadata.len() > MAX_CONFIG_FILE_SIZE as u64 {
            return Err(ConfigError::TooLarge {
                path: path.to_path_buf(),
                limit: MAX_CONFIG_FILE_SIZE,
            });
        }
        let contents = fs::read_to_string(path).map_err(|err| ConfigError::Io {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
        toml::from_str(&contents).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Applies the enumerated environment overrides through a lookup.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_CLIENT_ID) {
            self.identity.client_id = value;
        }
        if let Some(value) = lookup(ENV_CLIENT_SECRET) {
            self.identity.client_secret = value;
        }
        if let Some(value) = lookup(ENV_AUTHORITY) {
            self.identity.authority = value;
        }
        if let Some(value) = lookup(ENV_AUDIENCE) {
            self.identity.audience = value;
        }
        if let Some(value) = lookup(ENV_ISSUER) {
            self.identity.issuer = value;
        }
        if let Some(value) = lookup(ENV_REQUIRE_AUTH) {
            self.auth.require_auth = parse_bool(&value).unwrap_or(self.auth.require_auth);
        }
        if let Some(value) = lookup(ENV_ALLOW_ANY_AUTHENTICATED) {
            self.auth.allow_any_authenticated =
                parse_bool(&value).unwrap_or(self.auth.allow_any_authenticated);
        }
        if let Some(value) = lookup(ENV_PYTHON_AGENT_URL) {
            self.agents.python.base_url = value;
        }
        if let Some(value) = lookup(ENV_DOTNET_AGENT_URL) {
            self.agents.dotnet.base_url = value;
        }
    }

    /// Validates every field, failing closed on the first violation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.bind_addr.parse::<SocketAddr>().map_err(|_| {
            invalid(format!(
                "server.bind_addr {} is not a socket address",
                self.server.bind_addr
            ))
        })?;

        validate_agent_endpoint("agents.python", &self.agents.python)?;
        validate_agent_endpoint("agents.dotnet", &self.agents.dotnet)?;

        validate_range(
            "timeouts.request_timeout_ms",
            self.timeouts.request_timeout_ms,
            MIN_REQUEST_TIMEOUT_MS,
            MAX_REQUEST_TIMEOUT_MS,
        )?;
        validate_range(
            "timeouts.health_timeout_ms",
            self.timeouts.health_timeout_ms,
            MIN_HEALTH_TIMEOUT_MS,
            MAX_HEALTH_TIMEOUT_MS,
        )?;
        validate_range(
            "routing.oracle_timeout_ms",
            self.routing.oracle_timeout_ms,
            MIN_ORACLE_TIMEOUT_MS,
            MAX_ORACLE_TIMEOUT_MS,
        )?;

        if self.session.capacity == 0 || self.session.capacity > MAX_SESSION_CAPACITY {
            return Err(invalid(format!(
                "session.capacity must be in 1..={MAX_SESSION_CAPACITY}"
            )));
        }
        if self.session.ttl_seconds == 0 || self.session.ttl_seconds > MAX_SESSION_TTL_SECONDS {
            return Err(invalid(format!(
                "session.ttl_seconds must be in 1..={MAX_SESSION_TTL_SECONDS}"
            )));
        }

        if self.identity.client_secret.len() > MAX_CLIENT_SECRET_LENGTH {
            return Err(invalid("identity.client_secret exceeds length cap".to_string()));
        }
        if !SUPPORTED_ALGORITHMS.contains(&self.identity.algorithm.as_str()) {
            return Err(invalid(format!(
                "identity.algorithm {} is not supported",
                self.identity.algorithm
            )));
        }

        if self.auth.require_auth {
            for (field, value) in [
                ("identity.authority", &self.identity.authority),
                ("identity.audience", &self.identity.audience),
                ("identity.issuer", &self.identity.issuer),
            ] {
                if value.trim().is_empty() {
                    return Err(invalid(format!("{field} is required when auth.require_auth is on")));
                }
            }
            Url::parse(&self.identity.authority)
                .map_err(|_| invalid("identity.authority is not a valid URL".to_string()))?;
        }

        if self.routing.oracle_enabled && self.routing.oracle_command.is_empty() {
            return Err(invalid(
                "routing.oracle_command is required when routing.oracle_enabled is on".to_string(),
            ));
        }

        if self.audit.sink == AuditSinkKind::File && self.audit.path.is_none() {
            return Err(invalid("audit.path is required when audit.sink is \"file\"".to_string()));
        }

        Ok(())
    }

    /// Returns the exchange scope list for an agent label.
    ///
    /// Unknown labels yield an empty list; callers resolve labels through the
    /// closed agent set before reaching configuration.
    #[must_use]
    pub fn scopes_for(&self, agent_label: &str) -> &[String] {
        match agent_label {
            "python" => &self.agents.python.scopes,
            "dotnet" => &self.agents.dotnet.scopes,
            _ => &[],
        }
    }

    /// Returns a redacted identity summary safe for status payloads.
    #[must_use]
    pub fn identity_summary(&self) -> BTreeMap<String, String> {
        let mut summary = BTreeMap::new();
        summary.insert("authority".to_string(), self.identity.authority.clone());
        summary.insert("audience".to_string(), self.identity.audience.clone());
        summary.insert("algorithm".to_string(), self.identity.algorithm.clone());
        summary.insert(
            "client_secret".to_string(),
            if self.identity.client_secret.is_empty() { "unset" } else { "set" }.to_string(),
        );
        summary
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Builds an invalid-config error.
fn invalid(message: String) -> ConfigError {
    ConfigError::Invalid(message)
}

/// Validates one agent endpoint block.
fn validate_agent_endpoint(
    field: &str,
    endpoint: &AgentEndpointConfig,
) -> Result<(), ConfigError> {
    let url = Url::parse(&endpoint.base_url)
        .map_err(|_| invalid(format!("{field}.base_url is not a valid URL")))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(invalid(format!("{field}.base_url must use http or https")));
    }
    if url.host_str().is_none() {
        return Err(invalid(format!("{field}.base_url requires a host")));
    }
    for scope in &endpoint.scopes {
        if scope.trim().is_empty() {
            return Err(invalid(format!("{field}.scopes entries must be non-empty")));
        }
    }
    Ok(())
}

/// Validates a bounded numeric field.
fn validate_range(field: &str, value: u64, min: u64, max: u64) -> Result<(), ConfigError> {
    if value < min || value > max {
        return Err(invalid(format!("{field} must be in {min}..={max}")));
    }
    Ok(())
}

/// Parses a boolean environment value.
fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
