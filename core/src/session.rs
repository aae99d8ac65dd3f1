//! Session data model.
//!
//! A [`Session`] is the authenticated identity bound to a token pair. At most
//! one exists per process; it is owned by the token lifecycle manager and
//! every other component works from a clone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::SessionError;
use crate::token::{AccessToken, RefreshToken};

// ═══════════════════════════════════════════════════════════════════════
// Identity
// ═══════════════════════════════════════════════════════════════════════

/// Opaque user identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    /// Wrap a raw identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which side of the marketplace the account is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    /// Sends deliveries.
    Client,
    /// Carries deliveries.
    Courier,
}

/// Cached user record.
///
/// Fields the session manager does not interpret are preserved in `extra`
/// so the cached JSON round-trips without loss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// User ID.
    pub id: UserId,

    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Marketplace role.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<UserRole>,

    /// Phone number used for OTP sign-in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,

    /// Everything else the server sent.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl User {
    /// Minimal record carrying only an id.
    #[must_use]
    pub fn with_id(id: UserId) -> Self {
        Self {
            id,
            name: None,
            role: None,
            phone: None,
            extra: serde_json::Map::new(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Requests and grants
// ═══════════════════════════════════════════════════════════════════════

/// Identifier/secret sign-in request.
#[derive(Clone, Serialize)]
pub struct Credentials {
    /// Email or phone.
    pub identifier: String,
    /// Password.
    pub secret: String,
}

impl Credentials {
    /// Build a credential pair.
    #[must_use]
    pub fn new(identifier: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("identifier", &self.identifier)
            .field("secret", &"***")
            .finish()
    }
}

/// One-time-password verification request.
#[derive(Debug, Clone, Serialize)]
pub struct OtpVerification {
    /// Phone or email the code was sent to.
    pub identifier: String,
    /// The code.
    pub code: String,
}

impl OtpVerification {
    /// Build a verification request.
    #[must_use]
    pub fn new(identifier: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            code: code.into(),
        }
    }
}

/// Token pair issued by sign-in, OTP verification or refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenGrant {
    /// New access token.
    pub access_token: AccessToken,
    /// New refresh token (rotated on every exchange).
    pub refresh_token: RefreshToken,
    /// User record; present on sign-in, usually absent on refresh.
    #[serde(default)]
    pub user: Option<User>,
}

// ═══════════════════════════════════════════════════════════════════════
// Session
// ═══════════════════════════════════════════════════════════════════════

/// The authenticated identity bound to a token pair.
///
/// A session whose `expires_at` is in the past is still a valid value: it is
/// stale and waiting for a refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    /// Owner of the tokens.
    pub user: User,

    /// Current access token.
    pub access_token: AccessToken,

    /// Current refresh token.
    pub refresh_token: RefreshToken,

    /// Decoded from the access token's `exp` claim.
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Build a session from a grant, decoding the access token's expiry.
    ///
    /// When the grant carries no user record, `fallback_user` is used, then
    /// the token's `sub` claim.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::MalformedToken`] if the expiry cannot be decoded
    /// or no user identity is available.
    pub fn from_grant(grant: TokenGrant, fallback_user: Option<User>) -> Result<Self, SessionError> {
        let claims = grant.access_token.claims()?;
        let expires_at = grant.access_token.expires_at()?;
        let user = match (grant.user, fallback_user, claims.sub) {
            (Some(user), _, _) | (None, Some(user), _) => user,
            (None, None, Some(sub)) => User::with_id(UserId::new(sub)),
            (None, None, None) => {
                return Err(SessionError::MalformedToken(
                    "no user record and no sub claim".into(),
                ));
            }
        };

        Ok(Self {
            user,
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
            expires_at,
        })
    }

    /// Owner id.
    #[must_use]
    pub const fn user_id(&self) -> &UserId {
        &self.user.id
    }

    /// `true` iff `expires_at` is strictly after `now`.
    #[must_use]
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}
