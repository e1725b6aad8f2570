//! Configuration loading from disk and the environment.
//!
//! Precedence: built-in defaults < TOML file < environment variables.

use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::auth::Strategy;
use crate::config::schema::IngressConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid environment variable {name}: {reason}")]
    Env { name: &'static str, reason: String },
    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load, apply environment overrides and validate.
///
/// A missing `path` means "defaults plus environment".
pub fn load_config(path: Option<&Path>) -> Result<IngressConfig, ConfigError> {
    let mut config = match path {
        Some(path) => {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)?
        }
        None => IngressConfig::default(),
    };

    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Overlay the deployment environment variables onto `config`.
///
/// | variable             | key                     |
/// |----------------------|-------------------------|
/// | `PORT`               | `listener.http_port`    |
/// | `AUTHENTICATOR`      | `auth.authenticator`    |
/// | `CONSUMER_SECRET`    | `auth.consumer_secret`  |
/// | `VALID_EMAIL_DOMAIN` | `auth.valid_email`      |
/// | `MONGODB_URI`        | `store.*`               |
pub fn apply_env_overrides<F>(config: &mut IngressConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(port) = lookup("PORT") {
        config.listener.http_port = port.trim().parse().map_err(|_| ConfigError::Env {
            name: "PORT",
            reason: format!("not a port number: {port:?}"),
        })?;
    }

    if let Some(name) = lookup("AUTHENTICATOR") {
        config.auth.authenticator = name.trim().parse::<Strategy>().map_err(|e| ConfigError::Env {
            name: "AUTHENTICATOR",
            reason: e.to_string(),
        })?;
    }

    if let Some(secret) = lookup("CONSUMER_SECRET") {
        config.auth.consumer_secret = Some(secret);
    }

    if let Some(domain) = lookup("VALID_EMAIL_DOMAIN") {
        config.auth.valid_email = Some(domain);
    }

    if let Some(uri) = lookup("MONGODB_URI") {
        apply_mongodb_uri(config, &uri)?;
    }

    Ok(())
}

fn mongodb_uri_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        match Regex::new(r"^mongodb://(?:([^:@/]+):([^@/]*)@)?([^:/?]+)(?::(\d+))?(?:/([^?]*))?") {
            Ok(re) => re,
            Err(e) => unreachable!("static pattern: {e}"),
        }
    })
}

fn apply_mongodb_uri(config: &mut IngressConfig, uri: &str) -> Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::Env {
        name: "MONGODB_URI",
        reason: reason.to_string(),
    };
    let caps = mongodb_uri_pattern()
        .captures(uri.trim())
        .ok_or_else(|| invalid("expected mongodb://[user:pass@]host[:port][/database]"))?;

    let store = &mut config.store;
    if let (Some(user), Some(pass)) = (caps.get(1), caps.get(2)) {
        store.username = Some(user.as_str().to_string());
        store.password = Some(pass.as_str().to_string());
    }
    if let Some(host) = caps.get(3) {
        store.host = host.as_str().to_string();
    }
    if let Some(port) = caps.get(4) {
        store.port = port.as_str().parse().map_err(|_| invalid("port out of range"))?;
    }
    if let Some(db) = caps.get(5).filter(|m| !m.as_str().is_empty()) {
        store.database = db.as_str().to_string();
    }
    Ok(())
}
