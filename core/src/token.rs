//! Bearer credentials and their embedded expiry claim.
//!
//! Access tokens are opaque to the session manager except for the payload
//! segment of a JWT-style `header.payload.signature` string, which carries the
//! `exp` claim. Signatures are never checked here; the server is the
//! authority, the client only needs to know when to refresh.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::SessionError;

/// Short-lived bearer credential.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessToken(String);

/// Long-lived credential exchanged for a new token pair.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RefreshToken(String);

/// Claims read from an access token payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AccessClaims {
    /// Expiry, seconds since the Unix epoch.
    pub exp: i64,

    /// Subject (user id), when the issuer embeds it.
    #[serde(default)]
    pub sub: Option<String>,
}

impl AccessToken {
    /// Wrap a raw token string.
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The raw bearer string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Decode the payload claims without verifying the signature.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::MalformedToken`] if the token is not a
    /// three-segment JWT, the payload is not base64url JSON, or `exp` is absent.
    pub fn claims(&self) -> Result<AccessClaims, SessionError> {
        let mut segments = self.0.split('.');
        let payload = match (segments.next(), segments.next(), segments.next(), segments.next()) {
            (Some(_), Some(payload), Some(_), None) => payload,
            _ => return Err(SessionError::MalformedToken("expected three segments".into())),
        };

        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| SessionError::MalformedToken(format!("payload is not base64url: {e}")))?;

        serde_json::from_slice(&bytes)
            .map_err(|e| SessionError::MalformedToken(format!("payload claims: {e}")))
    }

    /// Decode the `exp` claim into a timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::MalformedToken`] if the claims cannot be read or
    /// `exp` is out of range.
    pub fn expires_at(&self) -> Result<DateTime<Utc>, SessionError> {
        let claims = self.claims()?;
        DateTime::from_timestamp(claims.exp, 0)
            .ok_or_else(|| SessionError::MalformedToken(format!("exp out of range: {}", claims.exp)))
    }
}

impl RefreshToken {
    /// Wrap a raw token string.
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The raw token string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Tokens end up in logs through `?session`; never print them.
impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

impl fmt::Debug for RefreshToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RefreshToken(***)")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn token_with_payload(payload: &str) -> AccessToken {
        AccessToken::new(format!(
            "{}.{}.sig",
            URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#),
            URL_SAFE_NO_PAD.encode(payload.as_bytes())
        ))
    }

    #[test]
    fn decodes_expiry_and_subject() {
        let token = token_with_payload(r#"{"exp":1735689600,"sub":"courier-7"}"#);
        let claims = token.claims().unwrap();
        assert_eq!(claims.exp, 1_735_689_600);
        assert_eq!(claims.sub.as_deref(), Some("courier-7"));
        assert_eq!(
            token.expires_at().unwrap(),
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z").unwrap()
        );
    }

    #[test]
    fn tolerates_padded_payload() {
        let padded = base64::engine::general_purpose::URL_SAFE.encode(br#"{"exp":10}"#);
        let token = AccessToken::new(format!("h.{padded}.s"));
        assert_eq!(token.claims().unwrap().exp, 10);
    }

    #[test]
    fn rejects_missing_exp() {
        let token = token_with_payload(r#"{"sub":"x"}"#);
        assert!(matches!(token.claims(), Err(SessionError::MalformedToken(_))));
    }

    #[test]
    fn rejects_wrong_segment_count() {
        assert!(AccessToken::new("opaque").claims().is_err());
        assert!(AccessToken::new("a.b.c.d").claims().is_err());
    }

    #[test]
    fn debug_is_redacted() {
        let token = AccessToken::new("secret.value.here");
        assert_eq!(format!("{token:?}"), "AccessToken(***)");
        assert_eq!(format!("{:?}", RefreshToken::new("r")), "RefreshToken(***)");
    }
}
