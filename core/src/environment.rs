//! Environment traits injected into the token lifecycle.
//!
//! All time reads go through [`Clock`] so validity checks can be driven
//! deterministically in tests.

use chrono::{DateTime, Utc};

/// Clock trait - abstracts time operations for testability
///
/// # Examples
///
/// ```
/// use chrono::Utc;
/// use courier_session_core::environment::{Clock, SystemClock};
///
/// let clock = SystemClock;
/// assert!(clock.now() <= Utc::now());
/// ```
pub trait Clock: Send + Sync + 'static {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

impl<C: Clock> Clock for std::sync::Arc<C> {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}
