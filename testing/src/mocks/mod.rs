//! Mock provider implementations for testing.
//!
//! Simple, in-memory implementations of all provider traits for use in unit
//! and integration tests.
//!
//! **WARNING**: Do NOT use in production. These are for testing only!

pub mod auth_api;
pub mod clock;
pub mod realtime;
pub mod store;
pub mod token;
