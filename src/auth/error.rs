//! Authentication failures.

use crate::auth::filter::FilterError;
use crate::auth::signed_request::EnvelopeError;
use crate::store::StoreError;

/// Why a request was not authorized.
///
/// Everything except [`AuthError::Store`] is a plain rejection; store
/// failures are reported as retryable instead.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("no_token_in_request")]
    NoTokenInRequest,
    #[error("missing_user")]
    MissingUser,
    #[error("missing_token")]
    MissingToken,
    #[error("bad_token")]
    BadToken,
    #[error("No Authorization header found")]
    MissingHeader,
    #[error("Authorization header does not contain a signed request")]
    NotSignedRequest,
    #[error("Invalid Signature")]
    InvalidSignature,
    #[error(transparent)]
    InvalidEnvelope(EnvelopeError),
    #[error("Invalid signed request: {0}")]
    InvalidPayload(EnvelopeError),
    #[error("Unauthorized email address")]
    UnauthorizedEmail,
    #[error("Unauthorized organization ID")]
    UnauthorizedOrg,
    #[error("invalid filter expression: {0}")]
    InvalidExpression(#[from] FilterError),
    #[error("backing store unavailable: {0}")]
    Store(#[from] StoreError),
}

impl AuthError {
    /// Stable tag for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NoTokenInRequest | Self::MissingHeader => "no_token_in_request",
            Self::MissingUser => "missing_user",
            Self::MissingToken => "missing_token",
            Self::BadToken => "bad_token",
            Self::InvalidSignature => "invalid_signature",
            Self::NotSignedRequest | Self::InvalidEnvelope(_) | Self::InvalidPayload(_) => {
                "invalid_envelope"
            }
            Self::UnauthorizedEmail => "unauthorized_email",
            Self::UnauthorizedOrg => "unauthorized_org",
            Self::InvalidExpression(_) => "invalid_expression",
            Self::Store(_) => "store_unavailable",
        }
    }

    /// Store outages may succeed on retry; rejections never do.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_retryable())
    }
}
