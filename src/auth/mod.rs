//! Request authentication.
//!
//! # Data Flow
//! ```text
//! config [auth].authenticator
//!     → Strategy (name)
//!     → Authenticator::resolve (one per process)
//!
//! HTTP request / WebSocket handshake
//!     → Authenticator::check(&Parts)
//!     → Ok(AuthorizationContext)   → handler sees it as `authorized`
//!     → Err(AuthError)             → 403 (or 503 if the store is down)
//! ```
//!
//! # Design Decisions
//! - The strategy set is closed, so dispatch is an enum match, not a trait object
//! - Every strategy sees only the request head; bodies are never read
//! - Rejection reasons are logged and counted but never sent to the client

pub mod context;
pub mod cookie;
pub mod error;
pub mod filter;
pub mod mongo_cookie;
pub mod signed;
pub mod signed_request;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use axum::http::request::Parts;
use serde::{Deserialize, Serialize};

use crate::config::AuthConfig;
use crate::observability::metrics;
use crate::store::UserStore;

pub use context::AuthorizationContext;
pub use error::AuthError;
pub use filter::QueryGrammars;
pub use mongo_cookie::MongoCookie;
pub use signed::{
    EmailRestrictedSignedRequest, OrgIdRestrictedSignedRequest, RecordingSignedRequest,
    SignedRequest,
};

/// Authenticator names as they appear in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    #[default]
    AllowAll,
    ReadOnly,
    MongoCookie,
    SignedRequest,
    RecordingSignedRequest,
    EmailRestrictedSignedRequest,
    #[serde(rename = "orgid_restricted_signed_request")]
    OrgIdRestrictedSignedRequest,
}

impl Strategy {
    pub const ALL: [Strategy; 7] = [
        Strategy::AllowAll,
        Strategy::ReadOnly,
        Strategy::MongoCookie,
        Strategy::SignedRequest,
        Strategy::RecordingSignedRequest,
        Strategy::EmailRestrictedSignedRequest,
        Strategy::OrgIdRestrictedSignedRequest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::AllowAll => "allow_all",
            Strategy::ReadOnly => "read_only",
            Strategy::MongoCookie => "mongo_cookie",
            Strategy::SignedRequest => "signed_request",
            Strategy::RecordingSignedRequest => "recording_signed_request",
            Strategy::EmailRestrictedSignedRequest => "email_restricted_signed_request",
            Strategy::OrgIdRestrictedSignedRequest => "orgid_restricted_signed_request",
        }
    }

    /// The signed-request family needs the consumer secret.
    pub fn requires_secret(&self) -> bool {
        matches!(
            self,
            Strategy::SignedRequest
                | Strategy::RecordingSignedRequest
                | Strategy::EmailRestrictedSignedRequest
                | Strategy::OrgIdRestrictedSignedRequest
        )
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown authenticator {0:?}")]
pub struct UnknownStrategy(pub String);

impl FromStr for Strategy {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Strategy::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == s)
            .ok_or_else(|| UnknownStrategy(s.to_string()))
    }
}

/// Why an authenticator could not be built from configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("{0} requires a consumer secret")]
    MissingSecret(Strategy),
    #[error("email_restricted_signed_request requires a valid email domain")]
    MissingEmailDomain,
}

/// The process-wide authenticator, resolved once at startup.
#[derive(Clone)]
pub enum Authenticator {
    AllowAll,
    ReadOnly,
    MongoCookie(MongoCookie),
    SignedRequest(SignedRequest),
    RecordingSignedRequest(RecordingSignedRequest),
    EmailRestricted(EmailRestrictedSignedRequest),
    OrgIdRestricted(OrgIdRestrictedSignedRequest),
}

impl Authenticator {
    pub fn resolve(config: &AuthConfig, users: Arc<dyn UserStore>) -> Result<Self, ResolveError> {
        let strategy = config.authenticator;
        let secret = || {
            config
                .consumer_secret
                .as_deref()
                .filter(|s| !s.is_empty())
                .map(SignedRequest::new)
                .ok_or(ResolveError::MissingSecret(strategy))
        };

        let authenticator = match strategy {
            Strategy::AllowAll => Authenticator::AllowAll,
            Strategy::ReadOnly => Authenticator::ReadOnly,
            Strategy::MongoCookie => Authenticator::MongoCookie(MongoCookie::new(
                users,
                &config.collection,
                &config.session_cookie,
            )),
            Strategy::SignedRequest => Authenticator::SignedRequest(secret()?),
            Strategy::RecordingSignedRequest => {
                Authenticator::RecordingSignedRequest(RecordingSignedRequest::new(secret()?))
            }
            Strategy::EmailRestrictedSignedRequest => {
                let inner = secret()?;
                let domain = config
                    .valid_email
                    .as_deref()
                    .filter(|d| !d.is_empty())
                    .ok_or(ResolveError::MissingEmailDomain)?;
                Authenticator::EmailRestricted(EmailRestrictedSignedRequest::new(inner, domain))
            }
            Strategy::OrgIdRestrictedSignedRequest => {
                Authenticator::OrgIdRestricted(OrgIdRestrictedSignedRequest::new(
                    secret()?,
                    QueryGrammars::equality(&config.org_filter_field),
                ))
            }
        };

        tracing::info!(authenticator = %strategy, "Authenticator resolved");
        Ok(authenticator)
    }

    pub fn strategy(&self) -> Strategy {
        match self {
            Authenticator::AllowAll => Strategy::AllowAll,
            Authenticator::ReadOnly => Strategy::ReadOnly,
            Authenticator::MongoCookie(_) => Strategy::MongoCookie,
            Authenticator::SignedRequest(_) => Strategy::SignedRequest,
            Authenticator::RecordingSignedRequest(_) => Strategy::RecordingSignedRequest,
            Authenticator::EmailRestricted(_) => Strategy::EmailRestrictedSignedRequest,
            Authenticator::OrgIdRestricted(_) => Strategy::OrgIdRestrictedSignedRequest,
        }
    }

    /// Authenticate a request head (plain request or WebSocket handshake).
    pub async fn check(&self, parts: &Parts) -> Result<AuthorizationContext, AuthError> {
        let result = match self {
            Authenticator::AllowAll => Ok(AuthorizationContext::admin()),
            Authenticator::ReadOnly => Ok(AuthorizationContext::read_only()),
            Authenticator::MongoCookie(strategy) => strategy.check(parts).await,
            Authenticator::SignedRequest(strategy) => strategy.check(parts),
            Authenticator::RecordingSignedRequest(strategy) => strategy.check(parts),
            Authenticator::EmailRestricted(strategy) => strategy.check(parts),
            Authenticator::OrgIdRestricted(strategy) => strategy.check(parts),
        };

        let strategy = self.strategy();
        match &result {
            Ok(_) => {
                tracing::debug!(
                    authenticator = %strategy,
                    method = %parts.method,
                    path = %parts.uri.path(),
                    "Request authorized"
                );
                metrics::record_auth(strategy.as_str(), "authorized");
            }
            Err(e) if e.is_retryable() => {
                tracing::warn!(
                    authenticator = %strategy,
                    path = %parts.uri.path(),
                    error = %e,
                    "Authentication deferred: store unavailable"
                );
                metrics::record_auth(strategy.as_str(), e.kind());
            }
            Err(e) => {
                tracing::info!(
                    authenticator = %strategy,
                    method = %parts.method,
                    path = %parts.uri.path(),
                    reason = e.kind(),
                    error = %e,
                    "Request rejected"
                );
                metrics::record_auth(strategy.as_str(), e.kind());
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryUserStore;
    use axum::http::{Method, Request};

    fn users() -> Arc<dyn UserStore> {
        Arc::new(MemoryUserStore::new())
    }

    fn get(uri: &str) -> Parts {
        Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(())
            .unwrap()
            .into_parts()
            .0
    }

    #[test]
    fn strategy_names_parse_and_display() {
        for strategy in Strategy::ALL {
            assert_eq!(strategy.as_str().parse::<Strategy>().unwrap(), strategy);
            let json = serde_json::to_value(strategy).unwrap();
            assert_eq!(json, strategy.as_str());
        }
        assert!("magic".parse::<Strategy>().is_err());
    }

    #[tokio::test]
    async fn capability_strategies_accept_everything() {
        let mut config = AuthConfig::default();
        let allow = Authenticator::resolve(&config, users()).unwrap();
        assert!(allow.check(&get("/anything")).await.unwrap().is_admin());

        config.authenticator = Strategy::ReadOnly;
        let read_only = Authenticator::resolve(&config, users()).unwrap();
        let ctx = read_only.check(&get("/anything")).await.unwrap();
        assert_eq!(ctx, AuthorizationContext::read_only());
    }

    #[test]
    fn resolve_requires_strategy_parameters() {
        let mut config = AuthConfig {
            authenticator: Strategy::SignedRequest,
            ..AuthConfig::default()
        };
        assert_eq!(
            Authenticator::resolve(&config, users()).err(),
            Some(ResolveError::MissingSecret(Strategy::SignedRequest))
        );

        config.authenticator = Strategy::EmailRestrictedSignedRequest;
        config.consumer_secret = Some("s".into());
        assert_eq!(
            Authenticator::resolve(&config, users()).err(),
            Some(ResolveError::MissingEmailDomain)
        );

        config.valid_email = Some("x.com".into());
        let auth = Authenticator::resolve(&config, users()).unwrap();
        assert_eq!(auth.strategy(), Strategy::EmailRestrictedSignedRequest);
    }

    #[tokio::test]
    async fn resolved_signed_request_rejects_unsigned_requests() {
        let config = AuthConfig {
            authenticator: Strategy::SignedRequest,
            consumer_secret: Some("s".into()),
            ..AuthConfig::default()
        };
        let auth = Authenticator::resolve(&config, users()).unwrap();
        let err = auth.check(&get("/1.0/event")).await.unwrap_err();
        assert_eq!(err.kind(), "no_token_in_request");
    }
}
