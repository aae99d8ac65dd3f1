//! Realtime connection state machine.
//!
//! ```text
//!            Start                 Opened
//!   Idle ───────────> Connecting ─────────> Open
//!    ▲                    │                   │
//!    │ ReconnectDue       │ Failed            │ Failed (error / unexpected close)
//!    │ (no session)       ▼                   ▼
//!    └──────────────── Closing <──────────────┘
//!                         │
//!                         └── ReconnectDue (session present) ──> Connecting
//!
//!   Stop: any phase ──> Idle (reconnect cancelled, channels cleared)
//! ```
//!
//! Every connection attempt gets a fresh `epoch`. Reports from an attempt
//! that has since been superseded (a late handshake after `Stop`, an error
//! from the previous socket) carry a stale epoch and are ignored.

use smallvec::smallvec;
use std::time::Duration;

use crate::config::ReconnectPolicy;
use crate::events::Advisory;
use crate::reducer::{Effects, Reducer};

/// Connection phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionPhase {
    /// No socket, nothing scheduled.
    #[default]
    Idle,
    /// Socket requested, handshake pending.
    Connecting,
    /// Usable.
    Open,
    /// Torn down after a failure; a reconnect is scheduled.
    Closing,
}

/// Supervisor state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionState {
    /// Current phase.
    pub phase: ConnectionPhase,
    /// Identifies the current attempt.
    pub epoch: u64,
    /// Consecutive failures since the connection was last open.
    pub failures: u32,
}

impl ConnectionState {
    /// `true` iff the phase is `Open`.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.phase == ConnectionPhase::Open
    }
}

/// Inputs to the connection state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAction {
    /// A valid session with a user identity is available.
    Start,
    /// Handshake for `epoch` completed.
    Opened {
        /// Attempt that completed
        epoch: u64,
    },
    /// Attempt `epoch` failed: handshake failure, socket error or unexpected close.
    Failed {
        /// Attempt that failed
        epoch: u64,
        /// Human-readable cause
        reason: String,
    },
    /// The reconnect delay elapsed.
    ReconnectDue {
        /// Whether a session exists at fire time
        session_present: bool,
    },
    /// Sign-out or session expiry.
    Stop,
}

/// Side effects requested by the connection state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEffect {
    /// Begin attempt `epoch`: ensure a valid token, bind the URL, connect.
    Connect {
        /// Attempt id
        epoch: u64,
    },
    /// Arm the reconnect timer.
    ScheduleReconnect {
        /// Delay before `ReconnectDue`
        delay: Duration,
    },
    /// Disarm the reconnect timer and abandon any in-flight attempt.
    CancelReconnect,
    /// Drop the current socket.
    Disconnect,
    /// Update the `connected` signal.
    PublishConnected(bool),
    /// Drop every channel registration.
    ClearChannels,
    /// Surface an advisory.
    Advise(Advisory),
}

/// Reducer for [`ConnectionState`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectionReducer;

impl Reducer for ConnectionReducer {
    type State = ConnectionState;
    type Action = ConnectionAction;
    type Effect = ConnectionEffect;
    type Environment = ReconnectPolicy;

    fn reduce(
        &self,
        state: &mut ConnectionState,
        action: ConnectionAction,
        policy: &ReconnectPolicy,
    ) -> Effects<ConnectionEffect> {
        use ConnectionPhase::{Closing, Connecting, Idle, Open};

        match (state.phase, action) {
            (Idle, ConnectionAction::Start) => {
                state.phase = Connecting;
                state.epoch += 1;
                smallvec![ConnectionEffect::Connect { epoch: state.epoch }]
            }

            (Connecting, ConnectionAction::Opened { epoch }) if epoch == state.epoch => {
                state.phase = Open;
                state.failures = 0;
                smallvec![ConnectionEffect::PublishConnected(true)]
            }

            (phase @ (Connecting | Open), ConnectionAction::Failed { epoch, reason })
                if epoch == state.epoch =>
            {
                let delay = policy.delay_for_attempt(state.failures);
                state.phase = Closing;
                state.failures = state.failures.saturating_add(1);

                let mut effects: Effects<ConnectionEffect> = smallvec![ConnectionEffect::Disconnect];
                if phase == Open {
                    effects.push(ConnectionEffect::PublishConnected(false));
                }
                effects.push(ConnectionEffect::Advise(Advisory::ConnectionInterrupted {
                    reason,
                    retry_in: delay,
                }));
                effects.push(ConnectionEffect::ScheduleReconnect { delay });
                effects
            }

            (Closing, ConnectionAction::ReconnectDue { session_present: true }) => {
                state.phase = Connecting;
                state.epoch += 1;
                smallvec![ConnectionEffect::Connect { epoch: state.epoch }]
            }

            (Closing, ConnectionAction::ReconnectDue { session_present: false }) => {
                state.phase = Idle;
                state.failures = 0;
                smallvec![]
            }

            (phase, ConnectionAction::Stop) => {
                state.phase = Idle;
                state.failures = 0;
                // Invalidate whatever attempt is still in flight.
                state.epoch += 1;

                let mut effects: Effects<ConnectionEffect> = smallvec![ConnectionEffect::CancelReconnect];
                if phase != Idle {
                    effects.push(ConnectionEffect::Disconnect);
                }
                if phase == Open {
                    effects.push(ConnectionEffect::PublishConnected(false));
                }
                effects.push(ConnectionEffect::ClearChannels);
                effects
            }

            // Start while busy, stale epochs, timers firing outside Closing.
            _ => smallvec![],
        }
    }
}
