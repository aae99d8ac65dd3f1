//! # Courier Session Core
//!
//! Data model, collaborator traits and pure state machines for the courier
//! session manager.
//!
//! This crate has no I/O. Everything that touches the network, storage or
//! time is a trait ([`providers`], [`environment`]); everything that decides
//! what to do next is a [`Reducer`] whose effects the runtime executes.
//!
//! ## Core Concepts
//!
//! - **Session**: authenticated identity bound to an access/refresh token pair
//! - **`ConnectionReducer`**: realtime connection lifecycle with a fixed reconnect delay
//! - **`AuthReducer`**: signed-in/out phases plus the sticky `session_expired` flag
//! - **Providers**: credential store, auth endpoints, realtime connector
//!
//! ## Architecture Principles
//!
//! - Functional Core, Imperative Shell
//! - Explicit Effects (no hidden I/O)
//! - Dependency Injection via traits
//!
//! ## Example
//!
//! ```
//! use courier_session_core::{
//!     ConnectionAction, ConnectionEffect, ConnectionReducer, ConnectionState, Reducer,
//!     ReconnectPolicy,
//! };
//!
//! let mut state = ConnectionState::default();
//! let effects = ConnectionReducer.reduce(
//!     &mut state,
//!     ConnectionAction::Start,
//!     &ReconnectPolicy::default(),
//! );
//! assert_eq!(effects[0], ConnectionEffect::Connect { epoch: 1 });
//! ```

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]

pub mod auth_state;
pub mod config;
pub mod connection;
pub mod environment;
pub mod error;
pub mod events;
pub mod message;
pub mod providers;
pub mod reducer;
pub mod session;
pub mod token;

pub use auth_state::{AuthAction, AuthEffect, AuthPhase, AuthReducer, AuthState};
pub use config::{ApiConfig, RealtimeConfig, ReconnectPolicy, SessionConfig, TokenConfig};
pub use connection::{
    ConnectionAction, ConnectionEffect, ConnectionPhase, ConnectionReducer, ConnectionState,
};
pub use environment::{Clock, SystemClock};
pub use error::{AuthApiError, ConfigError, ConnectionError, Result, SessionError, StoreError};
pub use events::{Advisory, LifecycleEvent};
pub use message::ChannelMessage;
pub use providers::{AuthApi, CredentialKey, CredentialStore, RealtimeConnector, RealtimeLink};
pub use reducer::{Effects, Reducer};
pub use session::{Credentials, OtpVerification, Session, TokenGrant, User, UserId, UserRole};
pub use token::{AccessClaims, AccessToken, RefreshToken};
