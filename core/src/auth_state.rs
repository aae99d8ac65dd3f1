//! Session facade state machine.
//!
//! ```text
//!   SignedOut ──SignInStarted──> Authenticating ──SignInSucceeded──> SignedIn
//!       ▲                            │                                  │
//!       └────────SignInFailed────────┘                                  │
//!       └─────────────────────SignedOut / Expired───────────────────────┘
//! ```
//!
//! `session_expired` is sticky: set when the system ends a session, cleared
//! only by a successful sign-in. A voluntary sign-out leaves it untouched.

use smallvec::smallvec;

use crate::events::Advisory;
use crate::reducer::{Effects, Reducer};

/// Authentication phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthPhase {
    /// No session.
    #[default]
    SignedOut,
    /// A sign-in or OTP verification is in flight.
    Authenticating,
    /// A session exists (its access token may be stale).
    SignedIn,
}

/// Facade state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuthState {
    /// Current phase.
    pub phase: AuthPhase,
    /// Last session ended because the system invalidated it.
    pub session_expired: bool,
    /// Authenticating while the previous session is still live. Its
    /// realtime connection and validity poll keep running until the
    /// exchange settles.
    pub replacing: bool,
}

/// Inputs to the facade state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthAction {
    /// `sign_in` or `verify_otp` called.
    SignInStarted,
    /// The exchange succeeded and the session is stored.
    SignInSucceeded,
    /// The exchange failed.
    SignInFailed,
    /// A session was reloaded from the credential store.
    Restored,
    /// The user signed out.
    SignedOut,
    /// The token manager reported the session as expired.
    Expired,
    /// The token pair was refreshed.
    Refreshed,
}

/// Side effects requested by the facade state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEffect {
    /// Start the realtime supervisor (no-op if already running).
    StartRealtime,
    /// Stop the realtime supervisor and clear its channels.
    StopRealtime,
    /// Arm the periodic validity check.
    StartValidityPoll,
    /// Disarm the periodic validity check.
    StopValidityPoll,
    /// Surface an advisory.
    Advise(Advisory),
}

/// Reducer for [`AuthState`].
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthReducer;

impl Reducer for AuthReducer {
    type State = AuthState;
    type Action = AuthAction;
    type Effect = AuthEffect;
    type Environment = ();

    fn reduce(&self, state: &mut AuthState, action: AuthAction, _env: &()) -> Effects<AuthEffect> {
        use AuthPhase::{Authenticating, SignedIn, SignedOut};

        match (state.phase, action) {
            (SignedOut, AuthAction::SignInStarted) => {
                state.phase = Authenticating;
                smallvec![]
            }
            // Switching accounts: the old session stays up until the exchange settles.
            (SignedIn, AuthAction::SignInStarted) => {
                state.phase = Authenticating;
                state.replacing = true;
                smallvec![]
            }

            (Authenticating, AuthAction::SignInSucceeded) => {
                state.phase = SignedIn;
                state.session_expired = false;
                if std::mem::take(&mut state.replacing) {
                    // The old connection is bound to the old identity.
                    smallvec![
                        AuthEffect::StopValidityPoll,
                        AuthEffect::StopRealtime,
                        AuthEffect::StartValidityPoll,
                        AuthEffect::StartRealtime,
                    ]
                } else {
                    smallvec![AuthEffect::StartValidityPoll, AuthEffect::StartRealtime]
                }
            }

            // A failed switch keeps the previous session.
            (Authenticating, AuthAction::SignInFailed) => {
                state.phase = if std::mem::take(&mut state.replacing) {
                    SignedIn
                } else {
                    SignedOut
                };
                smallvec![]
            }

            (SignedOut, AuthAction::Restored) => {
                state.phase = SignedIn;
                smallvec![AuthEffect::StartValidityPoll, AuthEffect::StartRealtime]
            }

            (_, AuthAction::SignedOut) => {
                state.phase = SignedOut;
                state.replacing = false;
                smallvec![AuthEffect::StopValidityPoll, AuthEffect::StopRealtime]
            }

            // The session being replaced died; the exchange decides what comes next.
            (Authenticating, AuthAction::Expired) if state.replacing => {
                state.replacing = false;
                state.session_expired = true;
                smallvec![
                    AuthEffect::StopValidityPoll,
                    AuthEffect::StopRealtime,
                    AuthEffect::Advise(Advisory::SessionExpired),
                ]
            }

            (SignedIn, AuthAction::Expired) => {
                state.phase = SignedOut;
                state.session_expired = true;
                smallvec![
                    AuthEffect::StopValidityPoll,
                    AuthEffect::StopRealtime,
                    AuthEffect::Advise(Advisory::SessionExpired),
                ]
            }

            // New token, new connect URL.
            (SignedIn, AuthAction::Refreshed) => smallvec![AuthEffect::StartRealtime],

            _ => smallvec![],
        }
    }
}
