//! Authorization contexts attached to requests and connections.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// What a successful authentication grants.
///
/// Serialized untagged, so each variant renders as the plain record the
/// handlers see (`{"admin":true}`, `{"orgId":"42"}`, ...).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AuthorizationContext {
    /// Uniform capability (`allow_all` / `read_only`).
    Capability { admin: bool },
    /// CORS preflight on the signed-request family.
    Anonymous { anonymous: bool },
    /// Valid signature, payload not inspected.
    Signed { signed: bool },
    /// Identity recorded from a signed payload.
    Identity(SignedIdentity),
    /// Email that passed the domain restriction.
    Email { email: String },
    /// Organization that passed the org-id filter.
    Organization {
        #[serde(rename = "orgId")]
        org_id: String,
    },
    /// Session token record with its hash removed.
    Token(TokenGrant),
}

impl AuthorizationContext {
    pub fn admin() -> Self {
        Self::Capability { admin: true }
    }

    pub fn read_only() -> Self {
        Self::Capability { admin: false }
    }

    pub fn anonymous() -> Self {
        Self::Anonymous { anonymous: true }
    }

    pub fn signed() -> Self {
        Self::Signed { signed: true }
    }

    /// True only for the `allow_all` capability.
    pub fn is_admin(&self) -> bool {
        matches!(self, Self::Capability { admin: true })
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous { .. })
    }

    /// JSON form, as stapled onto WebSocket messages and events.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// `{email, username, userId, orgName, orgId}` from a signed payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignedIdentity {
    pub email: Option<String>,
    pub username: Option<String>,
    #[serde(rename = "userId")]
    pub user_id: Value,
    #[serde(rename = "orgName")]
    pub org_name: Option<String>,
    #[serde(rename = "orgId")]
    pub org_id: Value,
}

/// A stored token minus `hashed_secret`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenGrant {
    pub uid: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
