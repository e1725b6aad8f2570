//! Session-cookie authentication against stored token hashes.
//!
//! # Data Flow
//! ```text
//! Cookie: _cube_session=<b64 uid>--<b64 secret>
//!     → cookie.rs (decode uid + secret)
//!     → UserStore::find_by_token_uid
//!     → exactly one token with that uid
//!     → bcrypt or Argon2 verify (blocking pool)
//!     → token record, hash removed
//! ```

use std::sync::Arc;

use argon2::password_hash::{rand_core::OsRng, SaltString};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use axum::http::request::Parts;

use crate::auth::context::{AuthorizationContext, TokenGrant};
use crate::auth::cookie;
use crate::auth::error::AuthError;
use crate::store::UserStore;

/// The `mongo_cookie` strategy.
#[derive(Clone)]
pub struct MongoCookie {
    store: Arc<dyn UserStore>,
    collection: String,
    session_cookie: String,
}

impl MongoCookie {
    pub fn new(store: Arc<dyn UserStore>, collection: &str, session_cookie: &str) -> Self {
        Self {
            store,
            collection: collection.to_string(),
            session_cookie: session_cookie.to_string(),
        }
    }

    pub async fn check(&self, parts: &Parts) -> Result<AuthorizationContext, AuthError> {
        let token = cookie::from_headers(&parts.headers, &self.session_cookie)
            .ok_or(AuthError::NoTokenInRequest)?;

        tracing::trace!(token_uid = %token.uid, "Looking up session token");

        let user = self
            .store
            .find_by_token_uid(&self.collection, &token.uid)
            .await?
            .ok_or(AuthError::MissingUser)?;

        let mut matching = user.tokens.into_iter().filter(|t| t.uid == token.uid);
        let stored = match (matching.next(), matching.next()) {
            (Some(stored), None) => stored,
            _ => {
                tracing::debug!(token_uid = %token.uid, user = %user.id, "Token uid not unique on user");
                return Err(AuthError::MissingToken);
            }
        };

        let secret = token.secret;
        let hashed = stored.hashed_secret;
        let verified = tokio::task::spawn_blocking(move || verify_secret(&secret, &hashed))
            .await
            .unwrap_or(false);
        if !verified {
            return Err(AuthError::BadToken);
        }

        Ok(AuthorizationContext::Token(TokenGrant {
            uid: stored.uid,
            extra: stored.extra,
        }))
    }
}

const BCRYPT_PREFIXES: [&str; 3] = ["$2a$", "$2b$", "$2y$"];

/// Check `secret` against a stored hash.
///
/// Modular-crypt bcrypt (`$2a$`, `$2b$`, `$2y$`) is what existing user
/// records hold; anything else must be a PHC-format Argon2 hash. Malformed
/// hashes never match.
pub fn verify_secret(secret: &str, hashed: &str) -> bool {
    if BCRYPT_PREFIXES.iter().any(|prefix| hashed.starts_with(prefix)) {
        return bcrypt::verify(secret, hashed).unwrap_or(false);
    }
    PasswordHash::new(hashed)
        .map(|parsed| {
            Argon2::default()
                .verify_password(secret.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

/// Hash `secret` with a fresh salt, for provisioning user tokens.
pub fn hash_secret(secret: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(secret.as_bytes(), &salt)?
        .to_string())
}
