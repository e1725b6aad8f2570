//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check that the selected authenticator has what it needs
//! - Validate value ranges (timeouts > 0, frame limits, addresses)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: IngressConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use crate::auth::Strategy;
use crate::config::schema::IngressConfig;

/// A single semantic problem, tagged with the offending key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

pub fn validate_config(config: &IngressConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let auth = &config.auth;
    if auth.authenticator.requires_secret()
        && auth.consumer_secret.as_deref().map_or(true, str::is_empty)
    {
        errors.push(ValidationError::new(
            "auth.consumer_secret",
            format!("required by {}", auth.authenticator),
        ));
    }
    if auth.authenticator == Strategy::EmailRestrictedSignedRequest
        && auth.valid_email.as_deref().map_or(true, str::is_empty)
    {
        errors.push(ValidationError::new(
            "auth.valid_email",
            format!("required by {}", auth.authenticator),
        ));
    }
    if auth.authenticator == Strategy::MongoCookie {
        if auth.collection.is_empty() {
            errors.push(ValidationError::new("auth.collection", "must not be empty"));
        }
        if auth.session_cookie.is_empty() {
            errors.push(ValidationError::new("auth.session_cookie", "must not be empty"));
        }
    }
    if auth.authenticator == Strategy::OrgIdRestrictedSignedRequest && auth.org_filter_field.is_empty() {
        errors.push(ValidationError::new("auth.org_filter_field", "must not be empty"));
    }

    let listener = &config.listener;
    if listener.bind_address.is_empty() {
        errors.push(ValidationError::new("listener.bind_address", "must not be empty"));
    }
    if listener.max_body_size == 0 {
        errors.push(ValidationError::new("listener.max_body_size", "must be > 0"));
    }

    let ws = &config.websocket;
    if ws.max_frame_size == 0 {
        errors.push(ValidationError::new("websocket.max_frame_size", "must be > 0"));
    }
    if ws.max_message_size < ws.max_frame_size {
        errors.push(ValidationError::new(
            "websocket.max_message_size",
            "must be >= max_frame_size",
        ));
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be > 0"));
    }
    if config.store.max_events_per_type == 0 {
        errors.push(ValidationError::new("store.max_events_per_type", "must be > 0"));
    }
    if config.store.max_event_types == 0 {
        errors.push(ValidationError::new("store.max_event_types", "must be > 0"));
    }

    let obs = &config.observability;
    if !LOG_LEVELS.contains(&obs.log_level.to_ascii_lowercase().as_str()) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("unknown level {:?}", obs.log_level),
        ));
    }
    if obs.metrics_enabled && obs.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("not a socket address: {:?}", obs.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&IngressConfig::default()).is_ok());
    }

    #[test]
    fn signed_strategies_need_a_secret() {
        let mut config = IngressConfig::default();
        config.auth.authenticator = Strategy::EmailRestrictedSignedRequest;
        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(fields, vec!["auth.consumer_secret", "auth.valid_email"]);

        config.auth.consumer_secret = Some("s".into());
        config.auth.valid_email = Some("x.com".into());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn collects_every_range_error() {
        let mut config = IngressConfig::default();
        config.websocket.max_message_size = 10;
        config.timeouts.request_secs = 0;
        config.observability.log_level = "loud".into();
        config.store.max_event_types = 0;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors.iter().any(|e| e.field == "store.max_event_types"));
    }
}
