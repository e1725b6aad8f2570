//! The signed-request strategy family.
//!
//! `signed_request` verifies the envelope in the `Authorization` header.
//! The recording, email-restricted and org-id-restricted variants run the
//! same verification first, then decode the payload and authorize on its
//! contents. `OPTIONS` (CORS preflight) is always anonymously authorized.

use axum::http::{header::AUTHORIZATION, request::Parts, Method};
use serde::Deserialize;
use serde_json::Value;

use crate::auth::context::{AuthorizationContext, SignedIdentity};
use crate::auth::error::AuthError;
use crate::auth::filter::QueryGrammars;
use crate::auth::signed_request::{self, EnvelopeError};

/// Literal that starts a signed `Authorization` header, separator included.
pub const SIGNED_REQUEST_PREFIX: &str = "SIGNED_REQUEST ";

/// Decoded payload of a signed request.
#[derive(Debug, Clone, Deserialize)]
pub struct SignedPayload {
    pub context: SignedContext,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignedContext {
    pub user: SignedUser,
    pub organization: SignedOrganization,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignedUser {
    pub email: Option<String>,
    #[serde(rename = "userName")]
    pub user_name: Option<String>,
    #[serde(rename = "userId", default)]
    pub user_id: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignedOrganization {
    pub name: Option<String>,
    #[serde(rename = "organizationId", alias = "organizationID", default)]
    pub organization_id: Value,
}

impl SignedPayload {
    /// Organization id as text; numbers are rendered in decimal.
    pub fn org_id(&self) -> Option<String> {
        match &self.context.organization.organization_id {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

fn is_preflight(parts: &Parts) -> bool {
    parts.method == Method::OPTIONS
}

/// The `signed_request` strategy.
#[derive(Clone)]
pub struct SignedRequest {
    secret: Vec<u8>,
}

impl SignedRequest {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    pub fn check(&self, parts: &Parts) -> Result<AuthorizationContext, AuthError> {
        if is_preflight(parts) {
            return Ok(AuthorizationContext::anonymous());
        }
        self.verified_payload(parts)?;
        Ok(AuthorizationContext::signed())
    }

    /// Verify the header and return the still-encoded payload.
    fn verified_payload<'a>(&self, parts: &'a Parts) -> Result<&'a str, AuthError> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or(AuthError::MissingHeader)?
            .to_str()
            .map_err(|_| AuthError::NotSignedRequest)?;
        let raw = header
            .strip_prefix(SIGNED_REQUEST_PREFIX)
            .ok_or(AuthError::NotSignedRequest)?;
        let envelope = signed_request::parse(raw).map_err(AuthError::InvalidEnvelope)?;
        if !signed_request::verify(envelope.signature, &self.secret, envelope.payload) {
            return Err(AuthError::InvalidSignature);
        }
        Ok(envelope.payload)
    }

    /// Verify the header and decode its payload.
    fn verified_claims(&self, parts: &Parts) -> Result<SignedPayload, AuthError> {
        let payload = self.verified_payload(parts)?;
        signed_request::decode_payload(payload).map_err(AuthError::InvalidPayload)
    }
}

/// The `recording_signed_request` strategy.
#[derive(Clone)]
pub struct RecordingSignedRequest {
    inner: SignedRequest,
}

impl RecordingSignedRequest {
    pub fn new(inner: SignedRequest) -> Self {
        Self { inner }
    }

    pub fn check(&self, parts: &Parts) -> Result<AuthorizationContext, AuthError> {
        if is_preflight(parts) {
            return Ok(AuthorizationContext::anonymous());
        }
        let claims = self.inner.verified_claims(parts)?;
        let SignedContext { user, organization } = claims.context;
        Ok(AuthorizationContext::Identity(SignedIdentity {
            email: user.email,
            username: user.user_name,
            user_id: user.user_id,
            org_name: organization.name,
            org_id: organization.organization_id,
        }))
    }
}

/// The `email_restricted_signed_request` strategy.
#[derive(Clone)]
pub struct EmailRestrictedSignedRequest {
    inner: SignedRequest,
    suffix: String,
}

impl EmailRestrictedSignedRequest {
    pub fn new(inner: SignedRequest, domain: &str) -> Self {
        Self {
            inner,
            suffix: format!("@{}", domain.trim_start_matches('@').to_ascii_lowercase()),
        }
    }

    pub fn check(&self, parts: &Parts) -> Result<AuthorizationContext, AuthError> {
        if is_preflight(parts) {
            return Ok(AuthorizationContext::anonymous());
        }
        let claims = self.inner.verified_claims(parts)?;
        let email = claims.context.user.email.ok_or(AuthError::InvalidPayload(
            EnvelopeError::MissingField("context.user.email"),
        ))?;
        if email.to_ascii_lowercase().ends_with(&self.suffix) {
            Ok(AuthorizationContext::Email { email })
        } else {
            Err(AuthError::UnauthorizedEmail)
        }
    }
}

/// The `orgid_restricted_signed_request` strategy.
///
/// The org the query filters on (from `?expression=`) must equal the org the
/// payload was signed for.
#[derive(Clone)]
pub struct OrgIdRestrictedSignedRequest {
    inner: SignedRequest,
    grammars: QueryGrammars,
}

impl OrgIdRestrictedSignedRequest {
    pub fn new(inner: SignedRequest, grammars: QueryGrammars) -> Self {
        Self { inner, grammars }
    }

    pub fn check(&self, parts: &Parts) -> Result<AuthorizationContext, AuthError> {
        if is_preflight(parts) {
            return Ok(AuthorizationContext::anonymous());
        }
        let claims = self.inner.verified_claims(parts)?;
        let filter = self.grammars.org_filter(parts.uri.path(), parts.uri.query())?;
        match claims.org_id() {
            Some(org_id) if org_id == filter => Ok(AuthorizationContext::Organization { org_id }),
            _ => Err(AuthError::UnauthorizedOrg),
        }
    }
}
