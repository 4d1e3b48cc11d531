//! Service configuration.
//!
//! Loaded from a TOML file with shell-style environment variable expansion,
//! so secrets like the platform service key never live in the file itself.
//! A missing config file yields defaults.

use std::io::ErrorKind;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tokio::fs;

// ============================================================================
// Config (root)
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub platform: PlatformConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    #[serde(default = "default_keep_alive_interval")]
    pub keep_alive_interval_seconds: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_seconds: default_request_timeout(),
            keep_alive_interval_seconds: default_keep_alive_interval(),
            max_connections: default_max_connections(),
        }
    }
}

/// Connection to the platform configuration service.
#[derive(Debug, Default, Deserialize)]
pub struct PlatformConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub service_key: String,
}

#[derive(Debug, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_session_ttl")]
    pub session_ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            session_ttl_seconds: default_session_ttl(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("environment variable '{0}' is not set")]
    MissingEnvVar(String),

    #[error("unclosed variable reference '${{' (missing '}}')")]
    UnclosedVarReference,
}

impl Config {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = match fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::Io(e)),
        };
        let expanded = expand_env_vars(&contents)?;
        Ok(toml::from_str(&expanded)?)
    }
}

// ============================================================================
// Private Helpers (Serde Defaults)
// ============================================================================

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    300
}

fn default_keep_alive_interval() -> u64 {
    15
}

fn default_max_connections() -> usize {
    512
}

fn default_session_ttl() -> u64 {
    180
}

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand environment variables in a string.
///
/// Shell-compatible syntax: `${VAR}` (required, errors if unset),
/// `${VAR:-default}` (optional with default), `$$` (escaped `$`).
/// Nested references are not expanded.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            result.push(c);
            continue;
        }
        match chars.peek() {
            Some('$') => {
                chars.next();
                result.push('$');
            }
            Some('{') => {
                chars.next();
                result.push_str(&resolve_var(&mut chars)?);
            }
            _ => result.push('$'),
        }
    }

    Ok(result)
}

fn resolve_var(chars: &mut std::iter::Peekable<std::str::Chars>) -> Result<String, ConfigError> {
    let mut name = String::new();
    let mut default: Option<String> = None;
    let mut closed = false;

    while let Some(c) = chars.next() {
        match c {
            '}' => {
                closed = true;
                break;
            }
            ':' if default.is_none() && chars.peek() == Some(&'-') => {
                chars.next();
                default = Some(String::new());
            }
            _ => match default.as_mut() {
                Some(d) => d.push(c),
                None => name.push(c),
            },
        }
    }
    if !closed {
        return Err(ConfigError::UnclosedVarReference);
    }

    match std::env::var(&name) {
        Ok(value) => Ok(value),
        Err(_) => default.ok_or(ConfigError::MissingEnvVar(name)),
    }
}

// ============================================================================
// Tests
// ============================================================================
