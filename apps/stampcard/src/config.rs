//! # Configuration
//!
//! Server configuration, loaded from an optional TOML file and then
//! overridden by `STAMPCARD_*` environment variables.
//!
//! ## Environment Variables
//!
//! - `STAMPCARD_HOST`, `STAMPCARD_PORT`: bind address
//! - `STAMPCARD_DATABASE`: ledger database path
//! - `STAMPCARD_BACKEND`: `redb` or `memory`
//! - `STAMPCARD_ALLOWED_DOMAIN`: email domain allowed to log in
//! - `STAMPCARD_SESSION_SECRET`: HS256 secret for session tokens
//! - `STAMPCARD_SESSION_TTL`: session lifetime in seconds
//! - `STAMPCARD_IDENTITY_SECRET`: HS256 secret shared with the identity service
//! - `STAMPCARD_IDENTITY_ISSUER`: expected issuer of identity tokens
//! - `STAMPCARD_CORS_ORIGINS`: comma-separated origins, or "*" for all
//! - `STAMPCARD_RATE_LIMIT`: requests per second (0 disables)

use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Default allowed login domain.
pub const DEFAULT_ALLOWED_DOMAIN: &str = "jeohyeon.hs.kr";

/// Default session lifetime: 24 hours.
pub const DEFAULT_SESSION_TTL_SECS: u64 = 24 * 60 * 60;

/// Longest accepted session lifetime: one year.
pub const MAX_SESSION_TTL_SECS: u64 = 365 * 24 * 60 * 60;

/// Minimum length of an HS256 secret.
pub const MIN_SECRET_LENGTH: usize = 32;

/// Maximum size of a configuration file (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

// =============================================================================
// STORAGE BACKEND
// =============================================================================

/// Which ledger backend to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Redb,
    Memory,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Redb => f.write_str("redb"),
            Self::Memory => f.write_str("memory"),
        }
    }
}

impl FromStr for Backend {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redb" => Ok(Self::Redb),
            "memory" => Ok(Self::Memory),
            other => Err(AppError::Config(format!(
                "unknown backend '{}' (expected 'redb' or 'memory')",
                other
            ))),
        }
    }
}

// =============================================================================
// CONFIG SECTIONS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub path: PathBuf,
    pub backend: Backend,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("stampcard.db"),
            backend: Backend::Redb,
        }
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Logins from other email domains are refused.
    pub allowed_domain: String,
    pub session_secret: Option<String>,
    pub session_ttl_secs: u64,
    pub session_issuer: String,
    pub identity_secret: Option<String>,
    /// When set, identity tokens must carry this issuer.
    pub identity_issuer: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            allowed_domain: DEFAULT_ALLOWED_DOMAIN.to_string(),
            session_secret: None,
            session_ttl_secs: DEFAULT_SESSION_TTL_SECS,
            session_issuer: "stampcard".to_string(),
            identity_secret: None,
            identity_issuer: None,
        }
    }
}

// Secrets stay out of logs.
impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("allowed_domain", &self.allowed_domain)
            .field("session_secret", &self.session_secret.as_ref().map(|_| "***"))
            .field("session_ttl_secs", &self.session_ttl_secs)
            .field("session_issuer", &self.session_issuer)
            .field("identity_secret", &self.identity_secret.as_ref().map(|_| "***"))
            .field("identity_issuer", &self.identity_issuer)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Comma-separated origins, "*" for all, unset for localhost only.
    pub cors_origins: Option<String>,
    /// Requests per second; 0 disables rate limiting.
    pub rate_limit: u32,
    pub body_limit_bytes: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            cors_origins: None,
            rate_limit: 100,
            body_limit_bytes: 64 * 1024,
        }
    }
}

// =============================================================================
// APP CONFIG
// =============================================================================

/// Complete application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub auth: AuthConfig,
    pub http: HttpConfig,
}

impl AppConfig {
    /// Load from `path` (if given) and apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, AppError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let metadata = std::fs::metadata(path).map_err(|e| {
            AppError::Config(format!("cannot read '{}': {}", path.display(), e))
        })?;
        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(AppError::Config(format!(
                "'{}' exceeds {} bytes",
                path.display(),
                MAX_CONFIG_FILE_SIZE
            )));
        }
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, AppError> {
        toml::from_str(contents).map_err(|e| AppError::Config(format!("invalid TOML: {}", e)))
    }

    /// Apply `STAMPCARD_*` overrides read through `lookup`.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), AppError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(host) = get("STAMPCARD_HOST") {
            self.server.host = host;
        }
        if let Some(port) = get("STAMPCARD_PORT") {
            self.server.port = parse_number("STAMPCARD_PORT", &port)?;
        }
        if let Some(path) = get("STAMPCARD_DATABASE") {
            self.storage.path = PathBuf::from(path);
        }
        if let Some(backend) = get("STAMPCARD_BACKEND") {
            self.storage.backend = backend.parse()?;
        }
        if let Some(domain) = get("STAMPCARD_ALLOWED_DOMAIN") {
            self.auth.allowed_domain = domain;
        }
        if let Some(secret) = get("STAMPCARD_SESSION_SECRET") {
            self.auth.session_secret = Some(secret);
        }
        if let Some(ttl) = get("STAMPCARD_SESSION_TTL") {
            self.auth.session_ttl_secs = parse_number("STAMPCARD_SESSION_TTL", &ttl)?;
        }
        if let Some(secret) = get("STAMPCARD_IDENTITY_SECRET") {
            self.auth.identity_secret = Some(secret);
        }
        if let Some(issuer) = get("STAMPCARD_IDENTITY_ISSUER") {
            self.auth.identity_issuer = Some(issuer);
        }
        if let Some(origins) = get("STAMPCARD_CORS_ORIGINS") {
            self.http.cors_origins = Some(origins);
        }
        if let Some(rate) = get("STAMPCARD_RATE_LIMIT") {
            self.http.rate_limit = parse_number("STAMPCARD_RATE_LIMIT", &rate)?;
        }
        Ok(())
    }

    /// Check the settings the HTTP server cannot run without.
    pub fn validate_for_server(&self) -> Result<(), AppError> {
        check_secret("session_secret", self.auth.session_secret.as_deref())?;
        check_secret("identity_secret", self.auth.identity_secret.as_deref())?;
        if !(1..=MAX_SESSION_TTL_SECS).contains(&self.auth.session_ttl_secs) {
            return Err(AppError::Config(format!(
                "session_ttl_secs must be between 1 and {}",
                MAX_SESSION_TTL_SECS
            )));
        }
        if self.auth.allowed_domain.trim().is_empty() {
            return Err(AppError::Config(
                "allowed_domain must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T, AppError> {
    value
        .trim()
        .parse()
        .map_err(|_| AppError::Config(format!("{} must be a number, got '{}'", key, value)))
}

fn check_secret(name: &str, secret: Option<&str>) -> Result<(), AppError> {
    match secret {
        None => Err(AppError::Config(format!(
            "{} is required to run the server",
            name
        ))),
        Some(s) if s.len() < MIN_SECRET_LENGTH => Err(AppError::Config(format!(
            "{} must be at least {} bytes",
            name, MIN_SECRET_LENGTH
        ))),
        Some(_) => Ok(()),
    }
}

// =============================================================================
// TESTS
// =============================================================================
