//! Collaborator interfaces.
//!
//! The session manager depends on these traits; concrete implementations are
//! injected by the application (secure storage, HTTP, WebSocket) or by tests
//! (in-memory, scripted).
//!
//! ```text
//! ┌────────────────────┐   get/set/delete   ┌──────────────────┐
//! │ TokenLifecycle     │───────────────────>│ CredentialStore  │
//! │ Manager            │   sign_in/refresh  ├──────────────────┤
//! │                    │───────────────────>│ AuthApi          │
//! └─────────┬──────────┘                    └──────────────────┘
//!           │ ensure_valid()
//! ┌─────────▼──────────┐   connect(url)     ┌──────────────────┐
//! │ Realtime           │───────────────────>│ RealtimeConnector│
//! │ Supervisor         │<─── frames ────────│                  │
//! └────────────────────┘                    └──────────────────┘
//! ```

pub mod auth_api;
pub mod credential_store;
pub mod realtime;

pub use auth_api::AuthApi;
pub use credential_store::{CredentialKey, CredentialStore};
pub use realtime::{FrameSink, FrameStream, RealtimeConnector, RealtimeLink};
