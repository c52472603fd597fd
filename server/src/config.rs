//! Server configuration module.
//!
//! Parses configuration from environment variables for the Sparq realtime
//! server.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `SPARQ_SESSION_PUBLIC_KEY` | Yes | - | Base64 Ed25519 key of the login service |
//! | `SPARQ_DIRECTORY_URL` | Yes | - | Base URL of the platform directory service |
//! | `SPARQ_DIRECTORY_API_KEY` | Yes | - | API key for directory requests |
//! | `SPARQ_ALLOWED_ORIGINS` | Yes | - | Comma-separated list of allowed origins |
//! | `SPARQ_PRODUCER_KEYS` | No | - | Format: `producer1:pubkey1,producer2:pubkey2`; fetched from the directory when unset |
//! | `SPARQ_PREVIEW_ORIGIN_SUFFIX` | No | - | Origin suffix admitted for preview deploys |
//! | `PORT` | No | 8080 | HTTP server port |

use std::collections::HashMap;
use std::env;

use thiserror::Error;

use crate::token;

/// Default HTTP server port.
const DEFAULT_PORT: u16 = 8080;

/// Errors that can occur when parsing configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    /// Environment variable has invalid format.
    #[error("invalid format for {var}: {message}")]
    InvalidFormat { var: String, message: String },

    /// Port number is invalid.
    #[error("invalid port number: {0}")]
    InvalidPort(#[from] std::num::ParseIntError),
}

/// Server configuration parsed from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base64-encoded Ed25519 public key of the login service, used to
    /// verify session tokens.
    pub session_public_key: String,

    /// Map of producer id to base64-encoded Ed25519 public key. May be
    /// empty at parse time; the binary then bootstraps keys from the
    /// directory service.
    pub producer_keys: HashMap<String, String>,

    /// Base URL of the platform directory service.
    pub directory_url: String,

    /// API key presented on directory requests.
    pub directory_api_key: String,

    /// Origins allowed to issue credentialed requests and open channels.
    pub allowed_origins: Vec<String>,

    /// Optional origin suffix admitted for same-provider preview deploys
    /// (e.g. `.sparq-preview.app`).
    pub preview_origin_suffix: Option<String>,

    /// HTTP server port.
    pub port: u16,
}

impl Config {
    /// Parse configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a required variable is missing, the
    /// session key does not decode to a valid Ed25519 public key, the
    /// producer key list is malformed, or the port is not a valid u16.
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = parse_port()?;
        let session_public_key = require_env("SPARQ_SESSION_PUBLIC_KEY")?;
        let directory_url = require_env("SPARQ_DIRECTORY_URL")?;
        let directory_api_key = require_env("SPARQ_DIRECTORY_API_KEY")?;
        let allowed_origins = parse_allowed_origins()?;
        let producer_keys = parse_producer_keys()?;
        let preview_origin_suffix = env::var("SPARQ_PREVIEW_ORIGIN_SUFFIX")
            .ok()
            .filter(|s| !s.is_empty());

        let config = Self {
            session_public_key,
            producer_keys,
            directory_url: directory_url.trim_end_matches('/').to_string(),
            directory_api_key,
            allowed_origins,
            preview_origin_suffix,
            port,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// Ensures the session public key decodes to a usable Ed25519 key so a
    /// bad key fails at startup rather than on the first login.
    fn validate(&self) -> Result<(), ConfigError> {
        if let Err(err) = token::decode_verifying_key(&self.session_public_key) {
            return Err(ConfigError::InvalidFormat {
                var: "SPARQ_SESSION_PUBLIC_KEY".to_string(),
                message: err.to_string(),
            });
        }

        Ok(())
    }

    /// Returns `true` if `origin` may issue credentialed requests.
    ///
    /// An origin is admitted when it matches the allow-list exactly, or
    /// when a preview suffix is configured and the origin is an https
    /// origin ending in that suffix.
    #[must_use]
    pub fn origin_allowed(&self, origin: &str) -> bool {
        if self.allowed_origins.iter().any(|o| o == origin) {
            return true;
        }

        if let Some(ref suffix) = self.preview_origin_suffix {
            return origin.starts_with("https://") && origin.ends_with(suffix.as_str());
        }

        false
    }
}

/// Reads a required environment variable, rejecting empty values.
fn require_env(name: &str) -> Result<String, ConfigError> {
    match env::var(name) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(ConfigError::MissingEnvVar(name.to_string())),
    }
}

/// Parse the PORT environment variable.
///
/// Returns the default port if not set.
fn parse_port() -> Result<u16, ConfigError> {
    match env::var("PORT") {
        Ok(port_str) => Ok(port_str.parse()?),
        Err(env::VarError::NotPresent) => Ok(DEFAULT_PORT),
        Err(env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidFormat {
            var: "PORT".to_string(),
            message: "contains invalid unicode".to_string(),
        }),
    }
}

/// Parse the SPARQ_ALLOWED_ORIGINS environment variable.
///
/// Expected format: comma-separated origins, e.g.
/// `https://app.sparq.example,https://staging.sparq.example`.
fn parse_allowed_origins() -> Result<Vec<String>, ConfigError> {
    let raw = require_env("SPARQ_ALLOWED_ORIGINS")?;

    let origins: Vec<String> = raw
        .split(',')
        .map(|o| o.trim().trim_end_matches('/').to_string())
        .filter(|o| !o.is_empty())
        .collect();

    if origins.is_empty() {
        return Err(ConfigError::InvalidFormat {
            var: "SPARQ_ALLOWED_ORIGINS".to_string(),
            message: "must list at least one origin".to_string(),
        });
    }

    Ok(origins)
}

/// Parse the SPARQ_PRODUCER_KEYS environment variable.
///
/// Expected format: `producer1:pubkey1,producer2:pubkey2`
/// where pubkey is a base64-encoded Ed25519 public key. An unset or empty
/// variable yields an empty map; the binary then fetches keys from the
/// directory at startup.
fn parse_producer_keys() -> Result<HashMap<String, String>, ConfigError> {
    let keys_str = match env::var("SPARQ_PRODUCER_KEYS") {
        Ok(s) if !s.is_empty() => s,
        _ => return Ok(HashMap::new()),
    };

    let mut keys = HashMap::new();

    for pair in keys_str.split(',') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }

        let parts: Vec<&str> = pair.splitn(2, ':').collect();
        if parts.len() != 2 {
            return Err(ConfigError::InvalidFormat {
                var: "SPARQ_PRODUCER_KEYS".to_string(),
                message: format!("expected 'producer:pubkey' format, got '{}'", pair),
            });
        }

        let producer_id = parts[0].trim();
        let pubkey = parts[1].trim();

        if producer_id.is_empty() {
            return Err(ConfigError::InvalidFormat {
                var: "SPARQ_PRODUCER_KEYS".to_string(),
                message: "producer id cannot be empty".to_string(),
            });
        }

        if pubkey.is_empty() {
            return Err(ConfigError::InvalidFormat {
                var: "SPARQ_PRODUCER_KEYS".to_string(),
                message: format!("pubkey for producer '{}' cannot be empty", producer_id),
            });
        }

        keys.insert(producer_id.to_string(), pubkey.to_string());
    }

    Ok(keys)
}
