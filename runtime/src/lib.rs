//! # Courier Session Runtime
//!
//! Imperative shell of the courier session manager: executes the effects
//! described by the reducers in `courier-session-core` against real
//! collaborators.
//!
//! ## Core Components
//!
//! - **`TokenLifecycleManager`**: owns the session, single-flight refresh, expiry cascade
//! - **`RealtimeSupervisor`**: one realtime connection, reconnect timer, `connected` signal
//! - **`ChannelBus`**: named channels over that connection, surviving reconnects
//! - **`SessionFacade`**: signed-in/out state machine tying the three together
//! - **Adapters**: `HttpAuthApi` (reqwest) and `WebSocketConnector` (tokio-tungstenite)
//!
//! ## Example
//!
//! ```no_run
//! use courier_session_core::{OtpVerification, SessionConfig, SystemClock};
//! use courier_session_runtime::{HttpAuthApi, SessionFacade, WebSocketConnector};
//! # use courier_session_testing::InMemoryCredentialStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SessionConfig::from_env()?;
//! let facade = SessionFacade::new(
//!     InMemoryCredentialStore::new(),
//!     HttpAuthApi::new(config.api.clone())?,
//!     SystemClock,
//!     WebSocketConnector::new(),
//!     config,
//! );
//!
//! if facade.restore().await?.is_none() {
//!     facade
//!         .verify_otp(&OtpVerification::new("+15550100", "123456"))
//!         .await?;
//! }
//!
//! let mut connected = facade.watch_connected();
//! connected.wait_for(|open| *open).await?;
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]

/// Channel bus over the realtime connection
pub mod channels;

/// Session facade
pub mod facade;

/// HTTP auth endpoints
pub mod http;

/// Authorized requests with one retry
pub mod interceptor;

/// Metric names and recorders
pub mod metrics;

/// Realtime connection supervisor
pub mod supervisor;

/// Owned background tasks
pub mod tasks;

/// Token lifecycle manager
pub mod tokens;

/// WebSocket realtime connector
pub mod websocket;

pub use channels::{ChannelBus, Unsubscribe};
pub use facade::SessionFacade;
pub use http::HttpAuthApi;
pub use interceptor::{Attempt, with_fresh_token};
pub use supervisor::RealtimeSupervisor;
pub use tasks::ScopedTask;
pub use tokens::{ListenerId, TokenLifecycleManager, TokenSource};
pub use websocket::WebSocketConnector;
