//! Typed notifications published by the session manager.

use std::fmt;
use std::time::Duration;

use crate::session::UserId;
use crate::token::AccessToken;

/// Token lifecycle events.
///
/// Independent subsystems (other HTTP clients, the realtime supervisor)
/// observe these instead of polling token state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// A session was created by sign-in, OTP verification or restore.
    SignedIn(UserId),

    /// The token pair was exchanged; carries the new access token.
    Refreshed(AccessToken),

    /// The system invalidated the session. Fired once per session.
    Expired,

    /// The session was cleared by the user.
    SignedOut,
}

/// User-facing advisories.
///
/// The two variants must never be conflated: one is retryable and resolves
/// itself, the other requires the user to sign in again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advisory {
    /// The realtime connection dropped and a reconnect is scheduled.
    ConnectionInterrupted {
        /// What went wrong.
        reason: String,
        /// Delay before the next attempt.
        retry_in: Duration,
    },

    /// The session ended without the user asking for it.
    SessionExpired,
}

impl Advisory {
    /// `true` for advisories that clear up on their own.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::ConnectionInterrupted { .. })
    }
}

impl fmt::Display for Advisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionInterrupted { retry_in, .. } => write!(
                f,
                "Connection lost. Reconnecting in {}s.",
                retry_in.as_secs().max(1)
            ),
            Self::SessionExpired => f.write_str("Your session expired, please sign in again."),
        }
    }
}
