//! Access token fixtures.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use courier_session_core::token::AccessToken;
use std::sync::atomic::{AtomicU64, Ordering};

static SERIAL: AtomicU64 = AtomicU64::new(1);

/// Build an unsigned JWT-shaped access token for `user_id` expiring at `exp`.
///
/// Every call yields a distinct token, even for identical arguments, so tests
/// can tell a refreshed token from the one it replaced.
#[must_use]
pub fn issue_access_token(user_id: &str, exp: DateTime<Utc>) -> AccessToken {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let claims = serde_json::json!({
        "sub": user_id,
        "exp": exp.timestamp(),
        "jti": SERIAL.fetch_add(1, Ordering::Relaxed),
    });
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    AccessToken::new(format!("{header}.{payload}.unsigned"))
}
