//! # Courier Session Testing
//!
//! Testing utilities for the courier session manager.
//!
//! This crate provides:
//! - Deterministic clocks ([`FixedClock`], [`ManualClock`])
//! - Unsigned access tokens with a chosen expiry ([`issue_access_token`])
//! - In-memory implementations of every provider trait
//! - A scripted realtime connector with a server-side handle per connection
//!
//! ## Example
//!
//! ```ignore
//! use courier_session_testing::{InMemoryCredentialStore, ManualClock, MockAuthApi};
//!
//! #[tokio::test]
//! async fn refresh_is_single_flight() {
//!     let clock = ManualClock::default();
//!     let api = MockAuthApi::new(clock.clone()).with_user("ada", "pw", "user-1");
//!     let tokens = TokenLifecycleManager::new(InMemoryCredentialStore::new(), api.clone(), clock.clone(), TokenConfig::default());
//!
//!     tokens.sign_in(Credentials::new("ada", "pw")).await.unwrap();
//!     clock.advance(chrono::Duration::hours(1));
//!
//!     let (a, b) = tokio::join!(tokens.ensure_valid(), tokens.ensure_valid());
//!     assert_eq!(a.unwrap().access_token, b.unwrap().access_token);
//!     assert_eq!(api.refresh_calls(), 1);
//! }
//! ```

/// Mock implementations of environment and provider traits.
pub mod mocks;

pub use mocks::auth_api::{MockAuthApi, RefreshOutcome};
pub use mocks::clock::{FixedClock, ManualClock, test_clock};
pub use mocks::realtime::{ConnectOutcome, MockConnector, ServerHandle};
pub use mocks::store::InMemoryCredentialStore;
pub use mocks::token::issue_access_token;

/// Install a test-friendly `tracing` subscriber.
///
/// Honours `RUST_LOG`; output is captured per test. Safe to call from every
/// test: only the first call installs anything.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
