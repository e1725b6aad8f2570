//! Session cookie encoding.
//!
//! A session cookie carries a token uid and its plaintext secret:
//! `<name>=<base64(uid)>--<base64(secret)>;`

use axum::http::HeaderMap;
use axum_extra::extract::cookie::CookieJar;
use base64::{engine::general_purpose::STANDARD, Engine};

/// Separator between the encoded uid and the encoded secret.
pub const TOKEN_DELIMITER: &str = "--";

/// Default session cookie name.
pub const DEFAULT_SESSION_COOKIE: &str = "_cube_session";

/// A decoded session token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken {
    pub uid: String,
    pub secret: String,
}

/// Render a `Set-Cookie`-style fragment for `uid` and `secret`.
pub fn encode_cookie(session_name: &str, uid: &str, secret: &str) -> String {
    format!(
        "{}={}{}{};",
        session_name,
        STANDARD.encode(uid),
        TOKEN_DELIMITER,
        STANDARD.encode(secret)
    )
}

/// Decode the value of a session cookie.
///
/// Returns `None` unless both halves are present, valid base64, valid UTF-8
/// and non-empty.
pub fn decode_value(value: &str) -> Option<SessionToken> {
    let value = urlencoding::decode(value).ok()?;
    let (uid, secret) = value.split_once(TOKEN_DELIMITER)?;
    let uid = decode_part(uid)?;
    let secret = decode_part(secret)?;
    Some(SessionToken { uid, secret })
}

/// Find and decode the session cookie `session_name` in request headers.
pub fn from_headers(headers: &HeaderMap, session_name: &str) -> Option<SessionToken> {
    let jar = CookieJar::from_headers(headers);
    let cookie = jar.get(session_name)?;
    decode_value(cookie.value())
}

fn decode_part(part: &str) -> Option<String> {
    let bytes = STANDARD.decode(part).ok()?;
    let text = String::from_utf8(bytes).ok()?;
    (!text.is_empty()).then_some(text)
}
