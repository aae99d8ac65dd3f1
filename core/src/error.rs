//! Error types for session, storage, realtime and configuration operations.

use thiserror::Error;

/// Result type alias for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;

/// Error taxonomy surfaced by the session manager.
///
/// Only [`SessionError::SessionExpired`] is terminal for the current session;
/// it is the one error that cascades into a sign-out. Everything else leaves
/// the session untouched.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    // ═══════════════════════════════════════════════════════════
    // Authentication Errors
    // ═══════════════════════════════════════════════════════════

    /// Sign-in or OTP verification was rejected.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// The refresh token was rejected; the session is gone.
    #[error("Session has expired")]
    SessionExpired,

    /// The operation needs a session and none is present.
    #[error("Not signed in")]
    NotSignedIn,

    /// A resource rejected a freshly refreshed access token.
    #[error("Request unauthorized after token refresh")]
    Unauthorized,

    /// The server issued an access token whose expiry claim cannot be read.
    #[error("Malformed access token: {0}")]
    MalformedToken(String),

    // ═══════════════════════════════════════════════════════════
    // Transient Errors
    // ═══════════════════════════════════════════════════════════

    /// Transport failure talking to the auth endpoints. Retryable.
    #[error("Network error: {0}")]
    Network(String),

    /// Realtime connection failure. Retryable, never affects the session.
    #[error("Realtime connection error: {0}")]
    Connection(#[from] ConnectionError),

    // ═══════════════════════════════════════════════════════════
    // System Errors
    // ═══════════════════════════════════════════════════════════

    /// Credential store operation failed.
    #[error("Credential store error: {0}")]
    Storage(#[from] StoreError),
}

impl SessionError {
    /// Returns `true` if retrying later may succeed without user action.
    ///
    /// # Examples
    ///
    /// ```
    /// # use courier_session_core::SessionError;
    /// assert!(SessionError::Network("timeout".into()).is_retryable());
    /// assert!(!SessionError::SessionExpired.is_retryable());
    /// ```
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Connection(_) | Self::MalformedToken(_) | Self::Storage(_)
        )
    }

    /// Returns `true` if the current session is gone and the user must sign in again.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::SessionExpired)
    }

    /// Returns `true` if this error is correctable by the user.
    #[must_use]
    pub const fn is_user_error(&self) -> bool {
        matches!(self, Self::InvalidCredentials)
    }
}

/// Realtime connection failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// The connection could not be established.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The established connection failed.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The server closed the connection.
    #[error("closed by peer{}", .0.as_ref().map(|r| format!(": {r}")).unwrap_or_default())]
    ClosedByPeer(Option<String>),
}

/// Credential store failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backing store rejected the operation.
    #[error("store backend failure: {0}")]
    Backend(String),

    /// A stored value could not be encoded or decoded.
    #[error("stored value could not be (de)serialized: {0}")]
    Serialization(String),
}

/// Errors reported by the auth endpoints.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthApiError {
    /// Sign-in or OTP rejected.
    #[error("credentials rejected")]
    InvalidCredentials,

    /// Refresh token explicitly rejected (invalid, expired or revoked).
    #[error("refresh token rejected")]
    RefreshRejected,

    /// The request never produced a usable response.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The response could not be understood.
    #[error("unexpected response: {0}")]
    Protocol(String),
}

impl From<AuthApiError> for SessionError {
    fn from(err: AuthApiError) -> Self {
        match err {
            AuthApiError::InvalidCredentials => Self::InvalidCredentials,
            AuthApiError::RefreshRejected => Self::SessionExpired,
            AuthApiError::Transport(reason) | AuthApiError::Protocol(reason) => {
                Self::Network(reason)
            }
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A value is present but unusable.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// Setting name
        key: String,
        /// Why it was rejected
        reason: String,
    },

    /// A required setting is absent.
    #[error("missing required setting: {0}")]
    Missing(String),
}
